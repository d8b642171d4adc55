//! Trailing stop tracking
//!
//! Once the cycle is in profit by the activation distance, an anchor
//! starts following the best favorable price and drags a stop level
//! behind it. The anchor advances in step-sized moves only, and the stop
//! never retreats. Crossing the stop (inclusive) closes the cycle.

use log::debug;
use rust_decimal::Decimal;

use super::config::{InstrumentSpec, TrailingParams};
use super::types::Side;

/// Per-cycle trailing stop state
///
/// All distances are in price units. The controller is direction-neutral:
/// the cycle side is passed with every observation.
#[derive(Debug, Clone)]
pub struct TrailingController {
    /// Favorable distance from the average that arms the stop
    activation: Decimal,
    /// Minimum favorable move before the anchor advances again
    step: Decimal,
    /// Distance from the anchor to the stop level
    offset: Decimal,
    /// Best favorable price since activation
    anchor: Option<Decimal>,
    /// Current stop level, monotonic in the favorable direction
    stop: Option<Decimal>,
}

impl TrailingController {
    /// Create a controller from distances already in price units
    pub fn new(activation: Decimal, step: Decimal, offset: Decimal) -> Self {
        Self {
            activation,
            step,
            offset,
            anchor: None,
            stop: None,
        }
    }

    /// Create a controller from point-denominated parameters
    pub fn from_params(params: &TrailingParams, instrument: &InstrumentSpec) -> Self {
        Self::new(
            instrument.price_offset(params.activation_distance),
            instrument.price_offset(params.step_distance),
            instrument.price_offset(params.stop_distance),
        )
    }

    /// True once the activation distance has been reached
    pub fn is_armed(&self) -> bool {
        self.anchor.is_some()
    }

    /// Best favorable price since activation, if armed
    pub fn anchor(&self) -> Option<Decimal> {
        self.anchor
    }

    /// Current stop level, if armed
    pub fn stop(&self) -> Option<Decimal> {
        self.stop
    }

    /// Feed one price observation
    ///
    /// Returns true when the price has crossed the stop level (inclusive)
    /// and the cycle should close. Arms on the first observation at or
    /// beyond the activation distance from `average_price`; afterwards
    /// advances the anchor on step-sized favorable moves and lifts the
    /// stop with it, never back.
    pub fn observe(&mut self, side: Side, average_price: Decimal, price: Decimal) -> bool {
        let (anchor, stop) = match (self.anchor, self.stop) {
            (Some(anchor), Some(stop)) => (anchor, stop),
            _ => {
                if side.favorable_distance(average_price, price) >= self.activation {
                    let stop = self.stop_behind(side, price);
                    debug!(
                        "Trailing armed: anchor={price} stop={stop} (avg={average_price}, {})",
                        side.as_str()
                    );
                    self.anchor = Some(price);
                    self.stop = Some(stop);
                }
                return false;
            }
        };

        let hit = match side {
            Side::Long => price <= stop,
            Side::Short => price >= stop,
        };
        if hit {
            debug!("Trailing stop hit at {price} (stop={stop})");
            return true;
        }

        if side.favorable_distance(anchor, price) >= self.step {
            let new_stop = self.stop_behind(side, price);
            let improved = match side {
                Side::Long => new_stop.max(stop),
                Side::Short => new_stop.min(stop),
            };
            debug!("Trailing advanced: anchor={price} stop={improved}");
            self.anchor = Some(price);
            self.stop = Some(improved);
        }

        false
    }

    fn stop_behind(&self, side: Side, anchor: Decimal) -> Decimal {
        match side {
            Side::Long => anchor - self.offset,
            Side::Short => anchor + self.offset,
        }
    }

    /// Restore anchor and stop from a persisted snapshot
    pub fn restore(&mut self, anchor: Option<Decimal>, stop: Option<Decimal>) {
        self.anchor = anchor;
        self.stop = stop;
    }

    /// Clear the armed state, used whenever the aggregate changes
    pub fn reset(&mut self) {
        self.anchor = None;
        self.stop = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn controller() -> TrailingController {
        // activation 2, step 0.5, stop offset 1, point size 1
        TrailingController::new(dec!(2), dec!(0.5), dec!(1))
    }

    #[test]
    fn test_arms_advances_and_triggers() {
        let mut t = controller();
        let avg = dec!(100);

        // Below activation distance: nothing happens
        assert!(!t.observe(Side::Long, avg, dec!(101.9)));
        assert!(!t.is_armed());

        // 102 reaches the activation distance: anchor 102, stop 101
        assert!(!t.observe(Side::Long, avg, dec!(102)));
        assert_eq!(t.anchor(), Some(dec!(102)));
        assert_eq!(t.stop(), Some(dec!(101)));

        // 103 is a full step beyond the anchor: anchor 103, stop 102
        assert!(!t.observe(Side::Long, avg, dec!(103)));
        assert_eq!(t.anchor(), Some(dec!(103)));
        assert_eq!(t.stop(), Some(dec!(102)));

        // Retrace to the stop level closes (inclusive)
        assert!(t.observe(Side::Long, avg, dec!(102)));
    }

    #[test]
    fn test_stop_never_retreats() {
        let mut t = controller();
        let avg = dec!(100);

        t.observe(Side::Long, avg, dec!(103)); // arm: anchor 103, stop 102
        t.observe(Side::Long, avg, dec!(104)); // advance: stop 103

        // Sub-step wiggles move neither anchor nor stop
        assert!(!t.observe(Side::Long, avg, dec!(104.4)));
        assert_eq!(t.anchor(), Some(dec!(104)));
        assert_eq!(t.stop(), Some(dec!(103)));

        // Another full step lifts both again
        assert!(!t.observe(Side::Long, avg, dec!(104.5)));
        assert_eq!(t.stop(), Some(dec!(103.5)));
    }

    #[test]
    fn test_short_side_mirrors() {
        let mut t = controller();
        let avg = dec!(100);

        assert!(!t.observe(Side::Short, avg, dec!(98)));
        assert_eq!(t.anchor(), Some(dec!(98)));
        assert_eq!(t.stop(), Some(dec!(99)));

        assert!(!t.observe(Side::Short, avg, dec!(97)));
        assert_eq!(t.stop(), Some(dec!(98)));

        // Bounce back up through the stop
        assert!(t.observe(Side::Short, avg, dec!(98)));
    }

    #[test]
    fn test_never_arms_below_activation() {
        let mut t = controller();
        let avg = dec!(100);

        for price in [dec!(100.5), dec!(101), dec!(101.5), dec!(99)] {
            assert!(!t.observe(Side::Long, avg, price));
        }
        assert!(!t.is_armed());
        assert_eq!(t.stop(), None);
    }

    #[test]
    fn test_reset_clears_armed_state() {
        let mut t = controller();
        t.observe(Side::Long, dec!(100), dec!(102));
        assert!(t.is_armed());

        t.reset();
        assert!(!t.is_armed());
        assert_eq!(t.anchor(), None);

        // Re-arms from scratch against the new average
        assert!(!t.observe(Side::Long, dec!(101), dec!(102.9)));
        assert!(!t.is_armed());
        assert!(!t.observe(Side::Long, dec!(101), dec!(103)));
        assert!(t.is_armed());
    }

    #[test]
    fn test_restore_from_snapshot() {
        let mut t = controller();
        t.restore(Some(dec!(103)), Some(dec!(102)));
        assert!(t.is_armed());

        // Restored stop is live immediately
        assert!(t.observe(Side::Long, dec!(100), dec!(102)));
    }

    #[test]
    fn test_from_params_converts_points() {
        let instrument = InstrumentSpec::new("EURUSD", dec!(0.1), dec!(0.01), dec!(0.01));
        let params = TrailingParams {
            activation_distance: dec!(20),
            step_distance: dec!(5),
            stop_distance: dec!(10),
        };
        let mut t = TrailingController::from_params(&params, &instrument);

        // 20 points * 0.1 = 2.0 price units to arm
        assert!(!t.observe(Side::Long, dec!(100), dec!(101.9)));
        assert!(!t.is_armed());
        assert!(!t.observe(Side::Long, dec!(100), dec!(102)));
        assert_eq!(t.stop(), Some(dec!(101))); // offset 10 points = 1.0
    }
}
