//! Exit Qualification (§4.14).
//!
//! Sits between "an exit was detected" and "an exit intent gets created":
//! a detected exit is only confirmed if the broker it would route through
//! is usable, the trade is still open, and the exit makes sense given the
//! trade's direction. Exposure checking against the portfolio is optional —
//! callers that don't have a `Portfolio` on hand (e.g. replaying a scenario
//! with no portfolio wiring) simply pass `None` and skip that check.

use nse_core::model::{Direction, Portfolio, RejectionReason, Trade, TradeStatus, UserBroker};
use rust_decimal::Decimal;

/// Runs every qualification check in order and returns the first failure,
/// or `Ok(())` if the exit is clear to confirm.
pub fn qualify(
    trade: &Trade,
    user_broker: &UserBroker,
    exit_direction: Direction,
    portfolio: Option<&Portfolio>,
) -> Result<(), RejectionReason> {
    if !user_broker.enabled {
        return Err(RejectionReason::BrokerDisabled);
    }
    if !user_broker.connected {
        return Err(RejectionReason::BrokerDisconnected);
    }
    if !matches!(trade.status, TradeStatus::Open) {
        return Err(RejectionReason::TradeNotOpen);
    }
    if trade.entry_qty <= 0 {
        return Err(RejectionReason::QuantityBelowMinimum);
    }
    // An exit signal is only meaningful against the position it names —
    // a `Sell` exit can't apply to a `Sell` trade's close.
    if exit_direction != trade.direction {
        return Err(RejectionReason::TradeNotOpen);
    }
    if let Some(portfolio) = portfolio {
        if portfolio_exposure_exceeded(trade, portfolio) {
            return Err(RejectionReason::PortfolioExposureExceeded);
        }
    }
    Ok(())
}

fn portfolio_exposure_exceeded(trade: &Trade, portfolio: &Portfolio) -> bool {
    let position_notional = Decimal::from(trade.entry_qty) * trade.entry_price;
    let deployed_share = if portfolio.total_capital > Decimal::ZERO {
        position_notional / portfolio.total_capital
    } else {
        Decimal::ZERO
    };
    deployed_share > portfolio.max_symbol_weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nse_core::model::{BrokerRole, Symbol};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn trade() -> Trade {
        Trade {
            trade_id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            user_broker_id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            symbol: Symbol::from("RELIANCE"),
            direction: Direction::Buy,
            entry_price: dec!(2500),
            entry_qty: 10,
            entry_ts: Utc::now(),
            entry_effective_floor: dec!(2450),
            entry_effective_ceiling: dec!(2600),
            exit_target_price: None,
            exit_target_fraction: None,
            trailing_active: false,
            trailing_highest_price: None,
            trailing_stop_price: None,
            status: TradeStatus::Open,
            closed_at: None,
            close_price: None,
        }
    }

    fn broker() -> UserBroker {
        UserBroker {
            user_broker_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            role: BrokerRole::Exec,
            enabled: true,
            connected: true,
            max_per_trade: dec!(100_000),
            daily_loss_limit: dec!(10_000),
            weekly_loss_limit: dec!(30_000),
            daily_loss_so_far: dec!(0),
            weekly_loss_so_far: dec!(0),
        }
    }

    #[test]
    fn qualifies_a_healthy_open_trade() {
        assert!(qualify(&trade(), &broker(), Direction::Buy, None).is_ok());
    }

    #[test]
    fn rejects_disabled_broker() {
        let mut b = broker();
        b.enabled = false;
        assert_eq!(
            qualify(&trade(), &b, Direction::Buy, None),
            Err(RejectionReason::BrokerDisabled)
        );
    }

    #[test]
    fn rejects_closed_trade() {
        let mut t = trade();
        t.status = TradeStatus::Closed;
        assert_eq!(
            qualify(&t, &broker(), Direction::Buy, None),
            Err(RejectionReason::TradeNotOpen)
        );
    }

    #[test]
    fn rejects_direction_mismatch() {
        assert_eq!(
            qualify(&trade(), &broker(), Direction::Sell, None),
            Err(RejectionReason::TradeNotOpen)
        );
    }
}
