//! Engine state persistence with JSON snapshots
//!
//! The engine serializes its cycle into a [`CycleSnapshot`] which the
//! runner saves on an interval and after every fill. On restart the
//! snapshot is validated against the active configuration and the cycle
//! resumes with its aggregate intact.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::config::GridConfig;
use super::cycle::GridCycle;
use super::errors::{EngineError, EngineResult};
use super::types::{CyclePhase, CycleStats};

/// Persistent engine state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSnapshot {
    /// Instrument the state belongs to
    pub instrument: String,

    /// Cycle phase at save time
    pub phase: CyclePhase,

    /// Aggregate position of the current cycle
    pub cycle: GridCycle,

    /// Trailing anchor, if the trailing stop was armed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing_anchor: Option<Decimal>,

    /// Trailing stop level, if armed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing_stop: Option<Decimal>,

    /// Whether the level cap suppressed further entries
    pub exposure_limited: bool,

    /// Transaction ids already applied, for replay protection
    #[serde(default)]
    pub processed_fills: Vec<u64>,

    /// Lifetime statistics across completed cycles
    pub stats: CycleStats,

    /// Count of fills dropped by accounting guards
    pub accounting_alerts: u64,

    /// Last observed price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_price: Option<Decimal>,

    /// Timestamp of last state update
    pub last_updated: u64,

    /// Configuration snapshot (for recovery validation)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) config_snapshot: Option<ConfigSnapshot>,
}

/// Minimal config snapshot for state validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ConfigSnapshot {
    symbol: String,
    base_volume: Decimal,
    volume_multiplier: Decimal,
    step_distance: Decimal,
    max_level: u32,
}

impl ConfigSnapshot {
    pub(crate) fn from_config(config: &GridConfig) -> Self {
        Self {
            symbol: config.instrument.symbol.clone(),
            base_volume: config.base_volume,
            volume_multiplier: config.volume_multiplier,
            step_distance: config.step_distance,
            max_level: config.max_level,
        }
    }
}

impl CycleSnapshot {
    /// Validate that loaded state matches the current config
    ///
    /// A snapshot taken under different grid parameters must not be
    /// resumed; the volume ladder and trigger spacing would no longer
    /// line up with the recorded aggregate.
    pub fn validate_against_config(&self, config: &GridConfig) -> EngineResult<()> {
        if let Some(snapshot) = &self.config_snapshot {
            if snapshot.symbol != config.instrument.symbol {
                return Err(EngineError::InvalidConfig(format!(
                    "State instrument '{}' doesn't match config instrument '{}'",
                    snapshot.symbol, config.instrument.symbol
                )));
            }

            if snapshot.base_volume != config.base_volume
                || snapshot.volume_multiplier != config.volume_multiplier
                || snapshot.step_distance != config.step_distance
                || snapshot.max_level != config.max_level
            {
                return Err(EngineError::InvalidConfig(
                    "State grid parameters don't match config".into(),
                ));
            }
        }
        Ok(())
    }

    /// Update timestamp
    pub fn touch(&mut self) {
        self.last_updated = chrono::Utc::now().timestamp_millis() as u64;
    }

    /// Load state from file
    pub fn load_from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: Self = serde_json::from_str(&content)?;
        Ok(snapshot)
    }

    /// Save state to file atomically (write to temp, then rename)
    pub fn save_to_file_atomic(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        let temp_path = path.with_extension("tmp");

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, path)?;

        Ok(())
    }
}

/// Interval-gated snapshot persistence
///
/// Owned exclusively by the runner task; the engine is single-threaded
/// per instrument so no locking is involved.
pub struct StateManager {
    save_path: Option<PathBuf>,
    save_interval: Duration,
    last_save: Instant,
}

impl StateManager {
    /// Create a state manager from config
    pub fn from_config(config: &GridConfig) -> Self {
        Self {
            save_path: config.state_file.clone(),
            save_interval: Duration::from_secs(config.state_save_interval_secs),
            last_save: Instant::now(),
        }
    }

    /// Load a previously saved snapshot, if one is valid for this config
    ///
    /// Corrupt or mismatching state files are logged and ignored so the
    /// engine starts a fresh cycle instead of aborting.
    pub fn load(&self, config: &GridConfig) -> Option<CycleSnapshot> {
        let path = self.save_path.as_ref()?;

        if !path.exists() {
            info!("No existing state file, starting fresh");
            return None;
        }

        info!("Loading existing state from {:?}", path);
        match CycleSnapshot::load_from_file(path) {
            Ok(snapshot) => match snapshot.validate_against_config(config) {
                Ok(()) => {
                    info!(
                        "Loaded state: phase={:?}, level={}, volume={}",
                        snapshot.phase, snapshot.cycle.level, snapshot.cycle.total_volume
                    );
                    Some(snapshot)
                }
                Err(e) => {
                    warn!("State file rejected: {}, starting fresh", e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to load state: {}, starting fresh", e);
                None
            }
        }
    }

    /// Save unconditionally
    pub fn force_save(&mut self, snapshot: &CycleSnapshot) -> EngineResult<()> {
        if let Some(path) = &self.save_path {
            snapshot.save_to_file_atomic(path)?;
            self.last_save = Instant::now();
            debug!("State saved to {:?}", path);
        }
        Ok(())
    }

    /// Save if enough time has passed since last save
    pub fn maybe_save(&mut self, snapshot: &CycleSnapshot) -> EngineResult<()> {
        if self.last_save.elapsed() >= self.save_interval {
            self.force_save(snapshot)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::config::{InstrumentSpec, ProfitTarget};
    use crate::grid::types::OrderSide;
    use rust_decimal_macros::dec;

    fn test_config() -> GridConfig {
        GridConfig::new(
            InstrumentSpec::new("EURUSD", dec!(1), dec!(0.01), dec!(0.01)),
            dec!(1),
            dec!(2),
            dec!(10),
            5,
            ProfitTarget::Currency(dec!(5)),
        )
    }

    fn test_snapshot(config: &GridConfig) -> CycleSnapshot {
        let mut cycle = GridCycle::new();
        cycle
            .apply_entry_fill(OrderSide::Buy, dec!(100), dec!(1), true)
            .unwrap();
        cycle
            .apply_entry_fill(OrderSide::Buy, dec!(90), dec!(2), true)
            .unwrap();

        CycleSnapshot {
            instrument: "EURUSD".to_string(),
            phase: CyclePhase::Armed,
            cycle,
            trailing_anchor: None,
            trailing_stop: None,
            exposure_limited: false,
            processed_fills: vec![1, 2],
            stats: CycleStats::default(),
            accounting_alerts: 0,
            last_price: Some(dec!(90)),
            last_updated: 0,
            config_snapshot: Some(ConfigSnapshot::from_config(config)),
        }
    }

    #[test]
    fn test_snapshot_serialization() {
        let config = test_config();
        let snapshot = test_snapshot(&config);

        let json = serde_json::to_string(&snapshot).unwrap();
        let loaded: CycleSnapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(loaded.phase, CyclePhase::Armed);
        assert_eq!(loaded.cycle.level, 2);
        assert_eq!(loaded.cycle.total_volume, dec!(3));
        assert_eq!(loaded.processed_fills, vec![1, 2]);
    }

    #[test]
    fn test_config_validation() {
        let config = test_config();
        let snapshot = test_snapshot(&config);

        assert!(snapshot.validate_against_config(&config).is_ok());

        // Different instrument should fail
        let mut other = test_config();
        other.instrument.symbol = "GBPUSD".to_string();
        assert!(snapshot.validate_against_config(&other).is_err());

        // Different ladder parameters should fail
        let mut other = test_config();
        other.step_distance = dec!(20);
        assert!(snapshot.validate_against_config(&other).is_err());
    }

    #[test]
    fn test_snapshot_without_config_section_passes() {
        let config = test_config();
        let mut snapshot = test_snapshot(&config);
        snapshot.config_snapshot = None;

        assert!(snapshot.validate_against_config(&config).is_ok());
    }
}
