//! Core data types for the averaging grid engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side as sent to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Convert to a short side string for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "B",
            OrderSide::Sell => "A",
        }
    }
}

/// Direction of a grid cycle, fixed once the first entry fills
/// (reversal mode may flip it on a netting trade)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Returns the opposite direction
    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Order side that adds exposure in this direction
    pub fn entry_order(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces exposure in this direction
    pub fn closing_order(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }

    /// Cycle direction opened by a fill on the given order side
    pub fn from_order(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => Side::Long,
            OrderSide::Sell => Side::Short,
        }
    }

    /// Signed distance in the favorable direction: positive when `price`
    /// has moved in this side's favor relative to `reference`
    pub fn favorable_distance(&self, reference: Decimal, price: Decimal) -> Decimal {
        match self {
            Side::Long => price - reference,
            Side::Short => reference - price,
        }
    }

    /// Signed distance in the adverse direction: positive when `price`
    /// has moved against this side relative to `reference`
    pub fn adverse_distance(&self, reference: Decimal, price: Decimal) -> Decimal {
        -self.favorable_distance(reference, price)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

/// Which direction the engine opens the first entry in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMode {
    /// Immediate market entry long
    Long,
    /// Immediate market entry short
    Short,
    /// Two resting stop orders straddling the start price; the first fill
    /// picks the cycle direction
    Either,
}

impl Default for StartMode {
    fn default() -> Self {
        Self::Either
    }
}

/// How the next-level order relates to the current exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryMode {
    /// Same-direction entries, geometric volume scaling
    Averaging,
    /// Opposite-direction entries with doubled volume; the cycle side flips
    /// and accounting resets against the new net position
    Reversal,
}

impl Default for EntryMode {
    fn default() -> Self {
        Self::Averaging
    }
}

/// Phase of the current cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CyclePhase {
    /// No exposure; waiting to start (straddle stops may be resting)
    Flat,
    /// Open exposure, no order in flight; triggers are evaluated per tick
    Armed,
    /// An entry or reversal order is awaiting fill
    Pending,
    /// A close order is awaiting fill; retried until flat
    Closing,
}

impl CyclePhase {
    /// Check if an order is in flight for this phase
    pub fn awaiting_order(&self) -> bool {
        matches!(self, CyclePhase::Pending | CyclePhase::Closing)
    }
}

/// Runner execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineStatus {
    /// Placing the first entry or straddle
    Initializing,
    /// Normal operation
    Running,
    /// Paused (manual); events are drained but not acted on
    Paused,
    /// Shutting down
    Stopping,
    /// Fully stopped
    Stopped,
}

impl EngineStatus {
    /// Check if price updates should be processed
    pub fn should_process_prices(&self) -> bool {
        matches!(self, EngineStatus::Running | EngineStatus::Initializing)
    }
}

/// One price observation from the feed
///
/// Timestamps must be monotonic per instrument.
#[derive(Debug, Clone)]
pub struct PriceTick {
    /// Instrument identifier
    pub instrument: String,
    /// Observation time, unix millis
    pub timestamp_ms: u64,
    /// Last trade or candle close price
    pub price: Decimal,
}

impl PriceTick {
    pub fn new(instrument: impl Into<String>, timestamp_ms: u64, price: Decimal) -> Self {
        Self {
            instrument: instrument.into(),
            timestamp_ms,
            price,
        }
    }
}

/// Fill confirmation from the gateway
#[derive(Debug, Clone)]
pub struct FillEvent {
    /// Gateway order ID the fill belongs to
    pub order_id: u64,
    /// Unique fill/transaction ID, used for replay protection
    pub txn_id: u64,
    /// Execution price
    pub price: Decimal,
    /// Executed volume (may be a partial fill of the order)
    pub volume: Decimal,
    /// Side of the executed order
    pub side: OrderSide,
    /// Execution time, unix millis
    pub timestamp_ms: u64,
}

/// Order lifecycle event from the gateway
#[derive(Debug, Clone)]
pub enum OrderEvent {
    /// An order (fully or partially) executed
    Filled(FillEvent),
    /// An order was rejected and will not execute
    Rejected { order_id: u64, reason: String },
    /// An order was cancelled before executing
    Cancelled { order_id: u64 },
}

/// What an in-flight order is meant to accomplish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderIntent {
    /// First or next-level entry (including reversal trades)
    Entry,
    /// Basket close for the full cycle volume
    Close,
}

/// The single order the cycle is allowed to have in flight
#[derive(Debug, Clone)]
pub struct PendingOrder {
    /// Gateway order ID
    pub order_id: u64,
    /// Entry or close
    pub intent: OrderIntent,
    /// Order side as submitted
    pub side: OrderSide,
    /// Submitted volume
    pub volume: Decimal,
    /// Volume executed so far
    pub filled: Decimal,
    /// Submission time, unix millis
    pub submitted_at_ms: u64,
}

impl PendingOrder {
    pub fn new(order_id: u64, intent: OrderIntent, side: OrderSide, volume: Decimal) -> Self {
        Self {
            order_id,
            intent,
            side,
            volume,
            filled: Decimal::ZERO,
            submitted_at_ms: chrono::Utc::now().timestamp_millis() as u64,
        }
    }

    /// Check if the submitted volume has been fully executed
    pub fn is_complete(&self) -> bool {
        self.filled >= self.volume
    }
}

/// Why a close order was submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Hard stop-loss distance breached
    StopLoss,
    /// Aggregate profit target reached
    ProfitTarget,
    /// Price retraced through the trailing stop
    Trailing,
    /// Operator-initiated shutdown
    Shutdown,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::ProfitTarget => "profit_target",
            ExitReason::Trailing => "trailing_stop",
            ExitReason::Shutdown => "shutdown",
        }
    }
}

/// Lifetime statistics across completed cycles
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleStats {
    /// Number of cycles closed back to flat
    pub cycles_completed: u32,
    /// Realized PnL summed over completed cycles
    pub realized_pnl: Decimal,
    /// Total volume traded across all entries and closes
    pub total_volume_traded: Decimal,
}

impl CycleStats {
    /// Record a cycle that went back to flat
    pub fn complete_cycle(&mut self, cycle_pnl: Decimal, cycle_volume: Decimal) {
        self.cycles_completed += 1;
        self.realized_pnl += cycle_pnl;
        self.total_volume_traded += cycle_volume;
    }
}

/// Point-in-time view of the engine for logging and monitoring
#[derive(Debug, Clone, Serialize)]
pub struct EngineSummary {
    pub instrument: String,
    pub phase: CyclePhase,
    pub side: Option<Side>,
    pub level: u32,
    pub average_price: Decimal,
    pub total_volume: Decimal,
    pub last_entry_price: Decimal,
    /// Realized + unrealized PnL of the open cycle at the last price
    pub floating_pnl: Decimal,
    pub trailing_anchor: Option<Decimal>,
    pub trailing_stop: Option<Decimal>,
    /// True when level == max_level and further entries are suppressed
    pub exposure_limited: bool,
    pub last_price: Option<Decimal>,
    pub stats: CycleStats,
    /// Count of dropped fills (unknown order id, negative volume)
    pub accounting_alerts: u64,
}
