//! Position-Averaging Grid Engine
//!
//! This module implements a martingale-style averaging strategy: entries are
//! added at fixed price steps against the trend, each level scales the volume
//! geometrically, and the whole position exits on a profit target, a hard
//! stop, or a trailing stop measured from the volume-weighted average price.
//!
//! # Architecture
//!
//! The engine is organized into several sub-modules:
//!
//! - [`config`] - Grid configuration, instrument rounding rules, validation
//! - [`types`] - Core data types (CyclePhase, Side, OrderEvent, etc.)
//! - [`errors`] - Engine-specific error types
//! - [`cycle`] - Position aggregate with VWAP and netting arithmetic
//! - [`trailing`] - Stepped trailing stop controller
//! - [`gateway`] - Venue abstraction (mockable for testing)
//! - [`state`] - Snapshot persistence with JSON files
//! - [`engine`] - Core cycle logic driven by prices and order events
//! - [`runner`] - Main execution loop
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use grid_engine::grid::{
//!     EngineCommand, EngineRunner, GridConfig, InstrumentSpec,
//!     ProfitTarget, RunnerConfig, StartMode,
//! };
//! use rust_decimal_macros::dec;
//!
//! // 5 levels, 10 points apart, volume doubling per level,
//! // take profit at 50 currency units
//! let instrument = InstrumentSpec::new("EURUSD", dec!(0.00001), dec!(0.01), dec!(0.01));
//! let config = GridConfig::new(
//!     instrument,
//!     dec!(0.1),
//!     dec!(2),
//!     dec!(200),
//!     5,
//!     ProfitTarget::Currency(dec!(50)),
//! )
//! .with_stop_loss(dec!(1500))
//! .with_start_mode(StartMode::Long)
//! .with_state_file("grid_state.json");
//!
//! // Create runner (with real gateway, price feed, order event feed)
//! let runner = EngineRunner::new(
//!     config,
//!     gateway,
//!     price_feed,
//!     event_feed,
//!     RunnerConfig::default(),
//! )?;
//!
//! // Keep a control handle, then run the engine
//! let handle = runner.handle();
//! let task = tokio::spawn(runner.run());
//!
//! // ... later
//! handle.send(EngineCommand::Stop)?;
//! task.await??;
//! ```
//!
//! # Testing
//!
//! The module provides mock implementations for testing without connecting
//! to a real venue:
//!
//! ```rust,ignore
//! use grid_engine::grid::gateway::mock::MockGateway;
//! use grid_engine::grid::{ChannelOrderEventFeed, ChannelPriceFeed};
//!
//! let gateway = MockGateway::new();
//! let (price_tx, price_feed) = ChannelPriceFeed::new();
//! let (event_tx, event_feed) = ChannelOrderEventFeed::new();
//!
//! // Use in tests...
//! ```

pub mod config;
pub mod cycle;
pub mod engine;
pub mod errors;
pub mod gateway;
pub mod runner;
pub mod state;
pub mod trailing;
pub mod types;

// Re-export commonly used types
pub use config::{GridConfig, InstrumentSpec, ProfitTarget, TrailingParams};
pub use cycle::GridCycle;
pub use engine::GridEngine;
pub use errors::{EngineError, EngineResult};
pub use gateway::{
    ChannelOrderEventFeed, ChannelPriceFeed, OrderEventFeed, OrderGateway, PriceFeed,
};
pub use runner::{EngineCommand, EngineRunner, RunnerConfig};
pub use state::{CycleSnapshot, StateManager};
pub use trailing::TrailingController;
pub use types::{
    CyclePhase, CycleStats, EngineStatus, EngineSummary, EntryMode, ExitReason, FillEvent,
    OrderEvent, OrderIntent, OrderSide, PendingOrder, PriceTick, Side, StartMode,
};
