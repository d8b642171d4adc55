//! Cycle position accounting
//!
//! A cycle is the unit of work of the averaging grid: everything between
//! the first entry and the return to flat. [`GridCycle`] tracks the net
//! position of the current cycle as a single volume-weighted aggregate.
//! It is pure bookkeeping. Order placement and trigger evaluation live in
//! the engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::errors::{EngineError, EngineResult};
use super::types::{OrderSide, Side};

/// Aggregate position of the current cycle
///
/// All mutation happens through fill application. The average price is a
/// VWAP over same-direction entries, derived from the exact notional sum
/// so repeated updates don't accumulate rounding drift.
/// Opposite-direction fills net against the aggregate first (realizing
/// PnL) and flip the side when they exceed it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridCycle {
    /// Direction of the open exposure, None while flat
    pub side: Option<Side>,
    /// Number of entry orders that have contributed volume this cycle
    pub level: u32,
    /// Volume-weighted average entry price of the open exposure
    pub average_price: Decimal,
    /// Sum of price * volume over the entries behind the aggregate
    pub notional: Decimal,
    /// Net open volume
    pub total_volume: Decimal,
    /// Price of the most recent entry fill, reference for the next trigger
    pub last_entry_price: Decimal,
    /// Executed volume of the most recent completed entry order
    pub last_entry_volume: Decimal,
    /// PnL realized inside this cycle by netting trades
    pub realized_pnl: Decimal,
    /// Gross volume executed this cycle, entries and closes
    pub traded_volume: Decimal,
}

impl GridCycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the cycle holds no exposure
    pub fn is_flat(&self) -> bool {
        self.side.is_none() || self.total_volume == Decimal::ZERO
    }

    /// Apply an entry (or reversal) fill to the aggregate
    ///
    /// `new_entry` is set on the first fill of each entry order so that
    /// the level counts orders, not partial executions.
    ///
    /// Same-direction volume folds into the notional sum and the VWAP
    /// is re-derived as `notional / total_volume`, so the average stays
    /// exact no matter how many entries contribute.
    /// Opposite-direction volume reduces the aggregate at the entry
    /// average, realizing the difference, and any excess opens the
    /// opposite side at the fill price.
    pub fn apply_entry_fill(
        &mut self,
        order_side: OrderSide,
        price: Decimal,
        volume: Decimal,
        new_entry: bool,
    ) -> EngineResult<()> {
        if volume <= Decimal::ZERO {
            return Err(EngineError::Accounting(format!(
                "entry fill with non-positive volume {volume}"
            )));
        }

        if new_entry {
            self.level += 1;
        }
        self.traded_volume += volume;

        match self.side {
            None => {
                self.side = Some(Side::from_order(order_side));
                self.average_price = price;
                self.notional = price * volume;
                self.total_volume = volume;
                self.last_entry_price = price;
            }
            Some(side) if order_side == side.entry_order() => {
                // VWAP from the exact notional, one division per update
                self.notional += price * volume;
                self.total_volume += volume;
                self.average_price = self.notional / self.total_volume;
                self.last_entry_price = price;
            }
            Some(side) => {
                // Netting trade: reduce first, flip with the remainder
                let netted = volume.min(self.total_volume);
                self.realized_pnl += side.favorable_distance(self.average_price, price) * netted;
                self.total_volume -= netted;

                let remainder = volume - netted;
                if remainder > Decimal::ZERO {
                    self.side = Some(side.opposite());
                    self.average_price = price;
                    self.notional = price * remainder;
                    self.total_volume = remainder;
                } else if self.total_volume == Decimal::ZERO {
                    self.side = None;
                    self.average_price = Decimal::ZERO;
                    self.notional = Decimal::ZERO;
                } else {
                    self.notional = self.average_price * self.total_volume;
                }
                self.last_entry_price = price;
            }
        }

        Ok(())
    }

    /// Apply a closing fill at `price` for `volume`
    ///
    /// Returns the PnL realized by this fill. The average price is left
    /// untouched so later partial closes realize against the same basis.
    pub fn apply_close_fill(&mut self, price: Decimal, volume: Decimal) -> EngineResult<Decimal> {
        if volume <= Decimal::ZERO {
            return Err(EngineError::Accounting(format!(
                "close fill with non-positive volume {volume}"
            )));
        }
        let side = self.side.ok_or_else(|| {
            EngineError::Accounting("close fill while cycle is flat".to_string())
        })?;
        if volume > self.total_volume {
            return Err(EngineError::Accounting(format!(
                "close fill volume {volume} exceeds open volume {}",
                self.total_volume
            )));
        }

        let realized = side.favorable_distance(self.average_price, price) * volume;
        self.realized_pnl += realized;
        self.total_volume -= volume;
        self.traded_volume += volume;

        if self.total_volume == Decimal::ZERO {
            self.side = None;
            self.average_price = Decimal::ZERO;
            self.notional = Decimal::ZERO;
        } else {
            self.notional = self.average_price * self.total_volume;
        }

        Ok(realized)
    }

    /// Record the executed volume of a completed entry order
    ///
    /// Reversal sizing doubles this amount for the next level.
    pub fn record_entry_volume(&mut self, executed: Decimal) {
        self.last_entry_volume = executed;
    }

    /// Unrealized PnL of the open exposure at `price`
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        match self.side {
            Some(side) => side.favorable_distance(self.average_price, price) * self.total_volume,
            None => Decimal::ZERO,
        }
    }

    /// Realized plus unrealized PnL of the cycle at `price`
    pub fn floating_pnl(&self, price: Decimal) -> Decimal {
        self.realized_pnl + self.unrealized_pnl(price)
    }

    /// Reset to flat for the next cycle
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_vwap_over_three_entries() {
        let mut cycle = GridCycle::new();

        // 1 @ 100, 2 @ 90, 4 @ 70
        cycle
            .apply_entry_fill(OrderSide::Buy, dec!(100), dec!(1), true)
            .unwrap();
        cycle
            .apply_entry_fill(OrderSide::Buy, dec!(90), dec!(2), true)
            .unwrap();
        cycle
            .apply_entry_fill(OrderSide::Buy, dec!(70), dec!(4), true)
            .unwrap();

        // (1*100 + 2*90 + 4*70) / 7 = 80
        assert_eq!(cycle.average_price, dec!(80));
        assert_eq!(cycle.total_volume, dec!(7));
        assert_eq!(cycle.level, 3);
        assert_eq!(cycle.last_entry_price, dec!(70));
        assert_eq!(cycle.side, Some(Side::Long));
    }

    #[test]
    fn test_partial_fills_count_one_level() {
        let mut cycle = GridCycle::new();

        // One entry order executed in two pieces
        cycle
            .apply_entry_fill(OrderSide::Sell, dec!(200), dec!(1), true)
            .unwrap();
        cycle
            .apply_entry_fill(OrderSide::Sell, dec!(199), dec!(1), false)
            .unwrap();

        assert_eq!(cycle.level, 1);
        assert_eq!(cycle.total_volume, dec!(2));
        assert_eq!(cycle.average_price, dec!(199.5));
    }

    #[test]
    fn test_close_realizes_profit() {
        let mut cycle = GridCycle::new();
        cycle
            .apply_entry_fill(OrderSide::Buy, dec!(100), dec!(1), true)
            .unwrap();
        cycle
            .apply_entry_fill(OrderSide::Buy, dec!(90), dec!(2), true)
            .unwrap();
        cycle
            .apply_entry_fill(OrderSide::Buy, dec!(70), dec!(4), true)
            .unwrap();

        // Close all 7 at 80.8: (80.8 - 80) * 7 = 5.6
        let realized = cycle.apply_close_fill(dec!(80.8), dec!(7)).unwrap();
        assert_eq!(realized, dec!(5.6));
        assert!(cycle.is_flat());
        assert_eq!(cycle.realized_pnl, dec!(5.6));
    }

    #[test]
    fn test_partial_close_keeps_average() {
        let mut cycle = GridCycle::new();
        cycle
            .apply_entry_fill(OrderSide::Buy, dec!(80), dec!(7), true)
            .unwrap();

        let realized = cycle.apply_close_fill(dec!(82), dec!(3)).unwrap();
        assert_eq!(realized, dec!(6));
        assert_eq!(cycle.total_volume, dec!(4));
        assert_eq!(cycle.average_price, dec!(80)); // basis unchanged for the rest

        cycle.apply_close_fill(dec!(82), dec!(4)).unwrap();
        assert!(cycle.is_flat());
        assert_eq!(cycle.realized_pnl, dec!(14));
    }

    #[test]
    fn test_close_cannot_exceed_open_volume() {
        let mut cycle = GridCycle::new();
        cycle
            .apply_entry_fill(OrderSide::Buy, dec!(100), dec!(2), true)
            .unwrap();

        assert!(cycle.apply_close_fill(dec!(101), dec!(3)).is_err());
        assert!(cycle.apply_close_fill(dec!(101), Decimal::ZERO).is_err());
    }

    #[test]
    fn test_reversal_fill_reduces_then_flips() {
        let mut cycle = GridCycle::new();
        cycle
            .apply_entry_fill(OrderSide::Buy, dec!(100), dec!(1), true)
            .unwrap();

        // Opposite side, doubled volume: nets the long 1 and opens short 1
        cycle
            .apply_entry_fill(OrderSide::Sell, dec!(95), dec!(2), true)
            .unwrap();

        assert_eq!(cycle.side, Some(Side::Short));
        assert_eq!(cycle.level, 2);
        assert_eq!(cycle.total_volume, dec!(1));
        assert_eq!(cycle.average_price, dec!(95)); // basis resets at the flip price
        assert_eq!(cycle.realized_pnl, dec!(-5)); // (95 - 100) * 1
        assert_eq!(cycle.last_entry_price, dec!(95));
    }

    #[test]
    fn test_partial_net_keeps_side_and_basis() {
        let mut cycle = GridCycle::new();
        cycle
            .apply_entry_fill(OrderSide::Buy, dec!(100), dec!(2), true)
            .unwrap();
        cycle
            .apply_entry_fill(OrderSide::Sell, dec!(95), dec!(1), true)
            .unwrap();

        assert_eq!(cycle.side, Some(Side::Long));
        assert_eq!(cycle.total_volume, dec!(1));
        assert_eq!(cycle.average_price, dec!(100));
        assert_eq!(cycle.realized_pnl, dec!(-5));
    }

    #[test]
    fn test_reversal_exact_net_goes_flat() {
        let mut cycle = GridCycle::new();
        cycle
            .apply_entry_fill(OrderSide::Buy, dec!(100), dec!(2), true)
            .unwrap();
        cycle
            .apply_entry_fill(OrderSide::Sell, dec!(90), dec!(2), true)
            .unwrap();

        assert!(cycle.is_flat());
        assert_eq!(cycle.realized_pnl, dec!(-20));
        assert_eq!(cycle.level, 2);

        // A later partial of the same reversal order reopens short
        cycle
            .apply_entry_fill(OrderSide::Sell, dec!(90), dec!(1), false)
            .unwrap();
        assert_eq!(cycle.side, Some(Side::Short));
        assert_eq!(cycle.level, 2);
        assert_eq!(cycle.average_price, dec!(90));
    }

    #[test]
    fn test_floating_pnl_short_side() {
        let mut cycle = GridCycle::new();
        cycle
            .apply_entry_fill(OrderSide::Sell, dec!(100), dec!(2), true)
            .unwrap();

        assert_eq!(cycle.unrealized_pnl(dec!(97)), dec!(6));
        assert_eq!(cycle.unrealized_pnl(dec!(102)), dec!(-4));
        assert_eq!(cycle.floating_pnl(dec!(97)), dec!(6));
    }

    #[test]
    fn test_traded_volume_accumulates() {
        let mut cycle = GridCycle::new();
        cycle
            .apply_entry_fill(OrderSide::Buy, dec!(100), dec!(1), true)
            .unwrap();
        cycle
            .apply_entry_fill(OrderSide::Buy, dec!(90), dec!(2), true)
            .unwrap();
        cycle.apply_close_fill(dec!(95), dec!(3)).unwrap();

        assert_eq!(cycle.traded_volume, dec!(6));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut cycle = GridCycle::new();
        cycle
            .apply_entry_fill(OrderSide::Buy, dec!(100), dec!(1), true)
            .unwrap();
        cycle.record_entry_volume(dec!(1));
        cycle.reset();

        assert!(cycle.is_flat());
        assert_eq!(cycle.level, 0);
        assert_eq!(cycle.realized_pnl, Decimal::ZERO);
        assert_eq!(cycle.last_entry_volume, Decimal::ZERO);
    }
}
