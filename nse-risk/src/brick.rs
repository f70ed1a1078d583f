//! Brick-movement tracker (§4.12).
//!
//! Guards against firing two exit signals for the same `(symbol, direction)`
//! pair over a price move too small to be worth acting on twice. Each exit
//! must move the price at least `min_brick_pct` away from the last exit
//! recorded for that pair; the first exit for a pair is always allowed,
//! since there is nothing to compare it against.

use fnv::FnvHashMap;
use nse_core::model::{Direction, Symbol};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::sizing::favorable_movement;

/// Tracks the last price an exit was recorded at, per `(symbol, direction)`.
#[derive(Debug, Default)]
pub struct BrickTracker {
    last_exit_price: Mutex<FnvHashMap<(Symbol, Direction), Decimal>>,
}

impl BrickTracker {
    pub fn new() -> Self {
        Self {
            last_exit_price: Mutex::new(FnvHashMap::default()),
        }
    }

    /// The signed fractional move, in the favourable direction for
    /// `direction`, between `exit_price` and the last recorded exit price
    /// for this pair — positive when `exit_price` moved favourably, negative
    /// when it moved adversely — or `None` if no prior exit exists.
    pub fn brick_movement(
        &self,
        symbol: &Symbol,
        direction: Direction,
        exit_price: Decimal,
    ) -> Option<Decimal> {
        let guard = self.last_exit_price.lock();
        guard.get(&(symbol.clone(), direction)).map(|last| {
            let magnitude = ((exit_price - *last) / *last).abs();
            if favorable_movement(direction, *last, exit_price) {
                magnitude
            } else {
                -magnitude
            }
        })
    }

    /// Whether an exit at `exit_price` is far enough in the favourable
    /// direction from the last recorded exit for this `(symbol, direction)`
    /// pair to be allowed through (§4.12). An adverse move, however large,
    /// never passes this gate. Pairs with no prior exit are always allowed.
    pub fn should_allow_exit(
        &self,
        symbol: &Symbol,
        direction: Direction,
        exit_price: Decimal,
        min_brick_pct: Decimal,
    ) -> bool {
        match self.brick_movement(symbol, direction, exit_price) {
            None => true,
            Some(movement) => movement >= min_brick_pct,
        }
    }

    /// Records `exit_price` as the new reference point for this pair.
    pub fn record_exit(&self, symbol: &Symbol, direction: Direction, exit_price: Decimal) {
        let mut guard = self.last_exit_price.lock();
        guard.insert((symbol.clone(), direction), exit_price);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn first_exit_for_a_pair_is_always_allowed() {
        let tracker = BrickTracker::new();
        let symbol = Symbol::from("RELIANCE");
        assert!(tracker.should_allow_exit(&symbol, Direction::Buy, dec!(2500), dec!(0.005)));
    }

    #[test]
    fn subsequent_exit_within_threshold_is_rejected() {
        let tracker = BrickTracker::new();
        let symbol = Symbol::from("RELIANCE");
        tracker.record_exit(&symbol, Direction::Buy, dec!(2500));
        // 0.1% move: below the 0.5% default threshold.
        assert!(!tracker.should_allow_exit(&symbol, Direction::Buy, dec!(2502.5), dec!(0.005)));
    }

    #[test]
    fn subsequent_exit_beyond_threshold_is_allowed() {
        let tracker = BrickTracker::new();
        let symbol = Symbol::from("RELIANCE");
        tracker.record_exit(&symbol, Direction::Buy, dec!(2500));
        assert!(tracker.should_allow_exit(&symbol, Direction::Buy, dec!(2520), dec!(0.005)));
    }

    #[test]
    fn directions_are_tracked_independently() {
        let tracker = BrickTracker::new();
        let symbol = Symbol::from("RELIANCE");
        tracker.record_exit(&symbol, Direction::Buy, dec!(2500));
        // A Sell exit on the same symbol has no prior reference yet.
        assert!(tracker.should_allow_exit(&symbol, Direction::Sell, dec!(2500.1), dec!(0.005)));
    }

    #[test]
    fn adverse_move_is_rejected_regardless_of_magnitude() {
        let tracker = BrickTracker::new();
        let symbol = Symbol::from("RELIANCE");
        // Buy: favourable is up. A 2% drop is a large move but the wrong
        // direction, so it must not satisfy the brick gate.
        tracker.record_exit(&symbol, Direction::Buy, dec!(2500));
        assert!(!tracker.should_allow_exit(&symbol, Direction::Buy, dec!(2450), dec!(0.005)));

        // Sell: favourable is down. A price rise is adverse here too.
        tracker.record_exit(&symbol, Direction::Sell, dec!(2500));
        assert!(!tracker.should_allow_exit(&symbol, Direction::Sell, dec!(2550), dec!(0.005)));
    }
}
