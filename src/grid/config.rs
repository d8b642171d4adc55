//! Grid engine configuration

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::errors::{EngineError, EngineResult};
use super::types::{EntryMode, StartMode};

/// Profit objective for closing a cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfitTarget {
    /// Fixed amount of account currency (e.g., 5.00 USD)
    Currency(Decimal),
    /// Percentage of current account equity (e.g., 0.5 = 0.5%)
    EquityPercent(Decimal),
}

/// Trailing stop parameters, all distances in points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingParams {
    /// Favorable distance from average price that arms the trailing stop
    pub activation_distance: Decimal,
    /// Minimum favorable move before the anchor advances again
    pub step_distance: Decimal,
    /// Distance from the anchor to the stop level
    pub stop_distance: Decimal,
}

/// Instrument contract details used for price and volume normalization
///
/// All strategy distances are expressed in points. One point equals
/// `price_step`, the minimum quote increment of the instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Instrument symbol (e.g., "EURUSD", "BTC-PERP")
    pub symbol: String,
    /// Minimum price increment (one point)
    pub price_step: Decimal,
    /// Minimum volume increment
    pub volume_step: Decimal,
    /// Minimum order volume accepted by the venue
    pub min_volume: Decimal,
}

impl InstrumentSpec {
    pub fn new(
        symbol: impl Into<String>,
        price_step: Decimal,
        volume_step: Decimal,
        min_volume: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            price_step,
            volume_step,
            min_volume,
        }
    }

    /// Convert a distance in points to a price distance
    pub fn price_offset(&self, points: Decimal) -> Decimal {
        points * self.price_step
    }

    /// Round a price to the nearest price step
    pub fn round_price(&self, price: Decimal) -> Decimal {
        let steps = (price / self.price_step)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        steps * self.price_step
    }

    /// Round a volume to the nearest volume step, clamped to the venue minimum
    pub fn round_volume(&self, volume: Decimal) -> Decimal {
        let steps = (volume / self.volume_step)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        let rounded = steps * self.volume_step;
        if rounded < self.min_volume {
            self.min_volume
        } else {
            rounded
        }
    }

    fn validate(&self) -> EngineResult<()> {
        if self.symbol.is_empty() {
            return Err(EngineError::InvalidConfig("symbol cannot be empty".into()));
        }
        if self.price_step <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(
                "price_step must be positive".into(),
            ));
        }
        if self.volume_step <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(
                "volume_step must be positive".into(),
            ));
        }
        if self.min_volume <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(
                "min_volume must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Grid engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Instrument contract details
    pub instrument: InstrumentSpec,

    /// Volume of the first entry in a cycle
    pub base_volume: Decimal,

    /// Geometric factor applied to each deeper level
    /// Level n trades base_volume * volume_multiplier^(n-1)
    pub volume_multiplier: Decimal,

    /// Base distance in points between averaging entries
    /// The trigger for level n+1 sits n * step_distance points beyond
    /// the last entry price
    pub step_distance: Decimal,

    /// Maximum number of entries in a cycle
    pub max_level: u32,

    /// Profit objective that closes the whole position
    pub profit_target: ProfitTarget,

    /// Hard stop distance in points from the average price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss_distance: Option<Decimal>,

    /// Trailing stop parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing: Option<TrailingParams>,

    /// Which side the first entry of a cycle may take
    #[serde(default)]
    pub start_mode: StartMode,

    /// Whether deeper levels average in or reverse direction
    #[serde(default)]
    pub entry_mode: EntryMode,

    /// Seconds before an unfilled entry order is cancelled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_expiry_secs: Option<u64>,

    /// State persistence file path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,

    /// State save interval in seconds
    #[serde(default = "default_save_interval")]
    pub state_save_interval_secs: u64,

    /// Maximum retry attempts for order submission
    #[serde(default = "default_max_retries")]
    pub max_order_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
}

fn default_save_interval() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_delay() -> u64 {
    100
}

impl GridConfig {
    /// Create a new grid configuration with required parameters
    ///
    /// State file is automatically generated with format:
    /// `grid_{symbol}_{YYYYMMDD_HHMMSS}.json`
    ///
    /// # Arguments
    /// * `instrument` - Instrument contract details
    /// * `base_volume` - Volume of the first entry
    /// * `volume_multiplier` - Geometric factor for deeper levels
    /// * `step_distance` - Base entry spacing in points
    /// * `max_level` - Maximum entries per cycle
    /// * `profit_target` - Objective that closes the position
    pub fn new(
        instrument: InstrumentSpec,
        base_volume: Decimal,
        volume_multiplier: Decimal,
        step_distance: Decimal,
        max_level: u32,
        profit_target: ProfitTarget,
    ) -> Self {
        let state_file = Self::generate_state_filename(&instrument.symbol);

        Self {
            instrument,
            base_volume,
            volume_multiplier,
            step_distance,
            max_level,
            profit_target,
            stop_loss_distance: None,
            trailing: None,
            start_mode: StartMode::default(),
            entry_mode: EntryMode::default(),
            pending_expiry_secs: None,
            state_file: Some(state_file),
            state_save_interval_secs: default_save_interval(),
            max_order_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
        }
    }

    /// Generate a unique state filename based on symbol and timestamp
    ///
    /// Format: `grid_{symbol}_{YYYYMMDD_HHMMSS}.json`
    /// Example: `grid_EURUSD_20251206_143052.json`
    pub fn generate_state_filename(symbol: &str) -> PathBuf {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        // Replace '/' with '-' for filesystem compatibility
        let safe_symbol = symbol.replace('/', "-");
        PathBuf::from(format!("grid_{safe_symbol}_{timestamp}.json"))
    }

    /// Builder: set hard stop loss distance in points
    pub fn with_stop_loss(mut self, distance: Decimal) -> Self {
        self.stop_loss_distance = Some(distance);
        self
    }

    /// Builder: set trailing stop parameters
    pub fn with_trailing(mut self, params: TrailingParams) -> Self {
        self.trailing = Some(params);
        self
    }

    /// Builder: set start mode
    pub fn with_start_mode(mut self, mode: StartMode) -> Self {
        self.start_mode = mode;
        self
    }

    /// Builder: set entry mode
    pub fn with_entry_mode(mut self, mode: EntryMode) -> Self {
        self.entry_mode = mode;
        self
    }

    /// Builder: set pending entry expiry in seconds
    pub fn with_pending_expiry(mut self, secs: u64) -> Self {
        self.pending_expiry_secs = Some(secs);
        self
    }

    /// Builder: override the auto-generated state file path
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    /// Builder: disable state persistence
    pub fn without_state_file(mut self) -> Self {
        self.state_file = None;
        self
    }

    /// Builder: set state save interval
    pub fn with_save_interval(mut self, secs: u64) -> Self {
        self.state_save_interval_secs = secs;
        self
    }

    /// Builder: set retry parameters
    pub fn with_retry_config(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.max_order_retries = max_retries;
        self.retry_base_delay_ms = base_delay_ms;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> EngineResult<()> {
        self.instrument.validate()?;

        if self.base_volume <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(
                "base_volume must be positive".into(),
            ));
        }

        if self.volume_multiplier < Decimal::ONE {
            return Err(EngineError::InvalidConfig(
                "volume_multiplier must be at least 1".into(),
            ));
        }

        if self.step_distance <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(
                "step_distance must be positive".into(),
            ));
        }

        if self.max_level == 0 {
            return Err(EngineError::InvalidConfig(
                "max_level must be at least 1".into(),
            ));
        }

        let target_value = match self.profit_target {
            ProfitTarget::Currency(v) => v,
            ProfitTarget::EquityPercent(v) => v,
        };
        if target_value <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(
                "profit_target must be positive".into(),
            ));
        }

        if let Some(distance) = self.stop_loss_distance {
            if distance <= Decimal::ZERO {
                return Err(EngineError::InvalidConfig(
                    "stop_loss_distance must be positive".into(),
                ));
            }
        }

        if let Some(trailing) = &self.trailing {
            if trailing.activation_distance <= Decimal::ZERO
                || trailing.step_distance <= Decimal::ZERO
                || trailing.stop_distance <= Decimal::ZERO
            {
                return Err(EngineError::InvalidConfig(
                    "trailing distances must be positive".into(),
                ));
            }
        }

        Ok(())
    }

    /// Calculate the volume for a given entry level (1-based)
    ///
    /// Level n trades base_volume * volume_multiplier^(n-1), rounded to
    /// the instrument's volume step and never below its minimum volume.
    pub fn volume_for_level(&self, level: u32) -> Decimal {
        let mut volume = self.base_volume;
        for _ in 1..level {
            volume *= self.volume_multiplier;
        }
        self.instrument.round_volume(volume)
    }

    /// Price distance that must move against the position before the
    /// next level triggers
    ///
    /// Spacing widens with depth: moving from level n to level n+1
    /// requires n * step_distance points beyond the last entry price.
    pub fn next_level_distance(&self, current_level: u32) -> Decimal {
        self.instrument
            .price_offset(Decimal::from(current_level) * self.step_distance)
    }

    /// Price distance between a cycle's average price and its hard stop
    pub fn stop_loss_offset(&self) -> Option<Decimal> {
        self.stop_loss_distance
            .map(|points| self.instrument.price_offset(points))
    }

    /// Load config from JSON file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to JSON file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> EngineResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_instrument() -> InstrumentSpec {
        InstrumentSpec::new("EURUSD", dec!(1), dec!(0.01), dec!(0.01))
    }

    fn test_config() -> GridConfig {
        GridConfig::new(
            test_instrument(),
            dec!(1),
            dec!(2),
            dec!(10),
            5,
            ProfitTarget::Currency(dec!(5)),
        )
    }

    #[test]
    fn test_config_validation() {
        let config = test_config();
        assert!(config.validate().is_ok());

        // Invalid: base_volume <= 0
        let mut config = test_config();
        config.base_volume = Decimal::ZERO;
        assert!(config.validate().is_err());

        // Invalid: multiplier < 1
        let mut config = test_config();
        config.volume_multiplier = dec!(0.5);
        assert!(config.validate().is_err());

        // Invalid: step_distance <= 0
        let mut config = test_config();
        config.step_distance = Decimal::ZERO;
        assert!(config.validate().is_err());

        // Invalid: max_level == 0
        let mut config = test_config();
        config.max_level = 0;
        assert!(config.validate().is_err());

        // Invalid: profit target <= 0
        let mut config = test_config();
        config.profit_target = ProfitTarget::Currency(Decimal::ZERO);
        assert!(config.validate().is_err());

        // Invalid: negative trailing distance
        let config = test_config().with_trailing(TrailingParams {
            activation_distance: dec!(-2),
            step_distance: dec!(0.5),
            stop_distance: dec!(1),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_volume_for_level() {
        // base 1, multiplier 2 => 1, 2, 4, 8
        let config = test_config();
        assert_eq!(config.volume_for_level(1), dec!(1));
        assert_eq!(config.volume_for_level(2), dec!(2));
        assert_eq!(config.volume_for_level(3), dec!(4));
        assert_eq!(config.volume_for_level(4), dec!(8));
    }

    #[test]
    fn test_volume_rounding() {
        let instrument = InstrumentSpec::new("EURUSD", dec!(1), dec!(0.1), dec!(0.1));
        let mut config = test_config();
        config.instrument = instrument;
        config.base_volume = dec!(0.1);
        config.volume_multiplier = dec!(1.5);

        // 0.1 * 1.5 = 0.15, rounds to 0.2 (nearest step, half away from zero)
        assert_eq!(config.volume_for_level(2), dec!(0.2));

        // Raw volume below the venue minimum clamps up to it
        assert_eq!(config.instrument.round_volume(dec!(0.04)), dec!(0.1));
    }

    #[test]
    fn test_next_level_distance() {
        // step 10 points, point size 1: level 1 -> 10, level 2 -> 20
        let config = test_config();
        assert_eq!(config.next_level_distance(1), dec!(10));
        assert_eq!(config.next_level_distance(2), dec!(20));
        assert_eq!(config.next_level_distance(3), dec!(30));
    }

    #[test]
    fn test_price_offset_scales_with_point_size() {
        let instrument = InstrumentSpec::new("EURUSD", dec!(0.0001), dec!(0.01), dec!(0.01));
        assert_eq!(instrument.price_offset(dec!(10)), dec!(0.0010));
    }

    #[test]
    fn test_round_price() {
        let instrument = InstrumentSpec::new("EURUSD", dec!(0.25), dec!(0.01), dec!(0.01));
        assert_eq!(instrument.round_price(dec!(100.30)), dec!(100.25));
        assert_eq!(instrument.round_price(dec!(100.40)), dec!(100.50));
    }

    #[test]
    fn test_stop_loss_offset() {
        let config = test_config().with_stop_loss(dec!(50));
        assert_eq!(config.stop_loss_offset(), Some(dec!(50)));

        let config = test_config();
        assert_eq!(config.stop_loss_offset(), None);
    }
}
