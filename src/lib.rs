#![deny(unreachable_pub)]
pub mod config;
pub mod grid;

pub use crate::config::{ConfigError, LogConfig, Settings, SimConfig};
pub use crate::grid::{
    CyclePhase, EngineCommand, EngineError, EngineResult, EngineRunner, EngineStatus,
    EngineSummary, EntryMode, GridConfig, GridEngine, InstrumentSpec, ProfitTarget, RunnerConfig,
    StartMode, TrailingParams,
};
