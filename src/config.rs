use config::{Config, File};
pub use config::ConfigError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::grid::GridConfig;

/// Main configuration struct
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Grid engine configuration
    pub grid: GridConfig,
    /// Simulated price path parameters
    #[serde(default)]
    pub sim: SimConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Parameters for the deterministic zigzag price path used by the simulator
#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    /// Price at the start of the simulation
    #[serde(default = "default_start_price")]
    pub start_price: Decimal,
    /// Points moved per simulated tick
    #[serde(default = "default_tick_points")]
    pub tick_points: Decimal,
    /// Points the price falls before each recovery leg
    #[serde(default = "default_swing_points")]
    pub swing_points: Decimal,
    /// Number of fall-and-recover swings to simulate
    #[serde(default = "default_swings")]
    pub swings: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            start_price: default_start_price(),
            tick_points: default_tick_points(),
            swing_points: default_swing_points(),
            swings: default_swings(),
        }
    }
}

fn default_start_price() -> Decimal {
    dec!(60000)
}

fn default_tick_points() -> Decimal {
    dec!(50)
}

fn default_swing_points() -> Decimal {
    dec!(6000)
}

fn default_swings() -> u32 {
    3
}

#[derive(Debug, Deserialize, Default)]
pub struct LogConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings from a configuration file
    pub fn new(config_path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            // Add configuration file
            .add_source(File::with_name(config_path))
            // Add environment variables (overrides file)
            // e.g. APP_GRID__MAX_LEVEL=3 or APP_LOG__LEVEL=debug
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
