//! `ExitCoordinator` (§4.13, exit lifecycle).
//!
//! Partitioned by `trade_id`: every exit-related mutation for a given trade
//! runs through the same partition, so a trailing-stop hit and a
//! stop-loss hit detected moments apart on the same trade can never race.
//! Episode numbers come from exactly one place — [`ExitSignalRepository::generate_episode`]
//! — which is also where the authoritative 30-second re-arm cooldown lives
//! (I5, §9). The in-memory map here is a fast-path check only, so a
//! re-detection inside the cooldown window never even reaches the store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fnv::FnvHashMap;
use nse_core::clock::is_within_session;
use nse_core::error::CoreError;
use nse_core::model::{
    ExitIntent, ExitIntentStatus, ExitReason, ExitSignal, ExitSignalStatus, OrderType, Portfolio,
    RejectionReason, Trade, UserBroker,
};
use nse_core::partition::PartitionExecutor;
use nse_store::event::{EventScope, EventType};
use nse_store::repository::{ExitIntentRepository, ExitSignalRepository, Store};
use nse_store::{EventBus, StoreError};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SignalsError;
use crate::qualification::qualify;

/// Fast-path mirror of the store's authoritative cooldown (AV-6). Kept in
/// sync with [`nse_store::memory::EXIT_REARM_COOLDOWN`] but never trusted
/// on its own — the store's `generate_episode` is the real enforcement
/// point.
pub const EXIT_REARM_COOLDOWN: Duration = Duration::seconds(30);

/// Quantity to close for this detected exit (§4.11 partial scale-out). Only
/// a `TargetHit` takes a fraction of the position, sized against the ladder
/// rung's `exit_target_fraction`; every other reason (trailing stop, stop
/// loss, time-based) closes whatever remains of the trade.
fn partial_exit_qty(trade: &Trade, reason: ExitReason) -> i64 {
    use rust_decimal::prelude::ToPrimitive;

    if reason != ExitReason::TargetHit {
        return trade.entry_qty;
    }
    match trade.exit_target_fraction {
        Some(fraction) if fraction > Decimal::ZERO && fraction < Decimal::ONE => {
            let qty = (Decimal::from(trade.entry_qty) * fraction)
                .floor()
                .to_i64()
                .unwrap_or(trade.entry_qty);
            qty.clamp(1, trade.entry_qty)
        }
        _ => trade.entry_qty,
    }
}

/// Everything the exit monitor has already determined about a detected
/// exit condition, handed to the coordinator to qualify and (if it
/// qualifies) publish.
#[derive(Debug, Clone)]
pub struct ExitCandidate {
    pub trade: Trade,
    pub user_broker: UserBroker,
    pub portfolio: Option<Portfolio>,
    pub reason: ExitReason,
    pub exit_price: Decimal,
    pub brick_movement: Decimal,
    pub favorable_movement: bool,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ExitOutcome {
    Detected(Uuid),
    CooldownRejected,
    QualificationFailed(RejectionReason),
    MarketClosed,
}

pub struct ExitCoordinator {
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
    partitions: PartitionExecutor,
    last_rearm: Mutex<FnvHashMap<(Uuid, ExitReason), DateTime<Utc>>>,
}

impl std::fmt::Debug for ExitCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitCoordinator").finish_non_exhaustive()
    }
}

impl ExitCoordinator {
    pub fn new(store: Arc<dyn Store>, bus: Arc<dyn EventBus>, partitions: PartitionExecutor) -> Self {
        Self {
            store,
            bus,
            partitions,
            last_rearm: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Schedules [`on_exit_detected`] onto this trade's partition.
    pub fn submit_exit_detected(self: &Arc<Self>, candidate: ExitCandidate) -> Result<(), CoreError> {
        let this = Arc::clone(self);
        let trade_id = candidate.trade.trade_id;
        self.partitions.execute(&trade_id, move || async move {
            match this.on_exit_detected(candidate).await {
                Ok(outcome) => info!(?outcome, "exit candidate processed"),
                Err(err) => warn!(%err, "exit candidate processing failed"),
            }
        })
    }

    /// The full detected-exit lifecycle: market-open guard, AV-6 cooldown
    /// fast path, episode allocation (the store enforces the cooldown
    /// authoritatively), qualification, and — on a pass — publication of a
    /// `DETECTED` `ExitSignal`.
    pub async fn on_exit_detected(&self, candidate: ExitCandidate) -> Result<ExitOutcome, SignalsError> {
        if !is_within_session(candidate.detected_at) {
            return Ok(ExitOutcome::MarketClosed);
        }

        let key = (candidate.trade.trade_id, candidate.reason);
        let fast_path_blocked = {
            let rearm = self.last_rearm.lock();
            rearm
                .get(&key)
                .map(|last| candidate.detected_at - *last < EXIT_REARM_COOLDOWN)
                .unwrap_or(false)
        };
        if fast_path_blocked {
            self.record_cooldown_rejection(&candidate).await?;
            return Ok(ExitOutcome::CooldownRejected);
        }

        let episode_id = match self
            .store
            .generate_episode(candidate.trade.trade_id, candidate.reason)
            .await
        {
            Ok(id) => id,
            Err(StoreError::ExitCooldownActive) => {
                self.record_cooldown_rejection(&candidate).await?;
                return Ok(ExitOutcome::CooldownRejected);
            }
            Err(err) => return Err(err.into()),
        };

        let qualification = qualify(
            &candidate.trade,
            &candidate.user_broker,
            candidate.trade.direction,
            candidate.portfolio.as_ref(),
        );

        let exit_signal_id = Uuid::new_v4();
        let now = candidate.detected_at;

        match qualification {
            Err(reason) => {
                let intent = ExitIntent {
                    exit_intent_id: Uuid::new_v4(),
                    exit_signal_id: None,
                    trade_id: candidate.trade.trade_id,
                    user_broker_id: candidate.user_broker.user_broker_id,
                    reason: candidate.reason,
                    episode_id,
                    status: ExitIntentStatus::Rejected,
                    qualification_errors: vec![reason],
                    calculated_qty: 0,
                    order_type: OrderType::Market,
                    limit_price: None,
                    created_at: now,
                };
                ExitIntentRepository::insert(self.store.as_ref(), intent).await?;
                self.bus
                    .emit(
                        EventScope::UserBroker(candidate.user_broker.user_broker_id),
                        EventType::ExitIntentRejected,
                        serde_json::json!({
                            "trade_id": candidate.trade.trade_id,
                            "reason": format!("{:?}", reason),
                        }),
                        "exit_coordinator",
                    )
                    .await;
                self.remember_rearm(key, now);
                return Ok(ExitOutcome::QualificationFailed(reason));
            }
            Ok(()) => {}
        }

        let exit_signal = ExitSignal {
            exit_signal_id,
            trade_id: candidate.trade.trade_id,
            symbol: candidate.trade.symbol.clone(),
            direction: candidate.trade.direction,
            reason: candidate.reason,
            exit_price: candidate.exit_price,
            brick_movement: candidate.brick_movement,
            favorable_movement: candidate.favorable_movement,
            episode_id,
            status: ExitSignalStatus::Detected,
            detected_at: now,
        };
        ExitSignalRepository::insert(self.store.as_ref(), exit_signal).await?;

        let intent = ExitIntent {
            exit_intent_id: Uuid::new_v4(),
            exit_signal_id: Some(exit_signal_id),
            trade_id: candidate.trade.trade_id,
            user_broker_id: candidate.user_broker.user_broker_id,
            reason: candidate.reason,
            episode_id,
            status: ExitIntentStatus::Approved,
            qualification_errors: vec![],
            calculated_qty: partial_exit_qty(&candidate.trade, candidate.reason),
            order_type: OrderType::Market,
            limit_price: None,
            created_at: now,
        };
        ExitIntentRepository::insert(self.store.as_ref(), intent).await?;

        self.bus
            .emit(
                EventScope::Global,
                EventType::ExitSignalDetected,
                serde_json::json!({
                    "exit_signal_id": exit_signal_id,
                    "trade_id": candidate.trade.trade_id,
                    "reason": format!("{:?}", candidate.reason),
                    "episode_id": episode_id,
                }),
                "exit_coordinator",
            )
            .await;

        self.remember_rearm(key, now);
        Ok(ExitOutcome::Detected(exit_signal_id))
    }

    async fn record_cooldown_rejection(&self, candidate: &ExitCandidate) -> Result<(), SignalsError> {
        let intent = ExitIntent {
            exit_intent_id: Uuid::new_v4(),
            exit_signal_id: None,
            trade_id: candidate.trade.trade_id,
            user_broker_id: candidate.user_broker.user_broker_id,
            reason: candidate.reason,
            episode_id: 0,
            status: ExitIntentStatus::Rejected,
            qualification_errors: vec![RejectionReason::ExitCooldownActive],
            calculated_qty: 0,
            order_type: OrderType::Market,
            limit_price: None,
            created_at: candidate.detected_at,
        };
        ExitIntentRepository::insert(self.store.as_ref(), intent).await?;
        self.bus
            .emit(
                EventScope::UserBroker(candidate.user_broker.user_broker_id),
                EventType::ExitIntentCooldownRejected,
                serde_json::json!({
                    "trade_id": candidate.trade.trade_id,
                    "reason": format!("{:?}", candidate.reason),
                }),
                "exit_coordinator",
            )
            .await;
        Ok(())
    }

    fn remember_rearm(&self, key: (Uuid, ExitReason), at: DateTime<Utc>) {
        self.last_rearm.lock().insert(key, at);
    }

    /// `DETECTED → CONFIRMED`. `trade_id` is only used to route this call
    /// onto the right partition; the store looks the row up by `id`.
    pub fn submit_confirm(
        self: &Arc<Self>,
        trade_id: Uuid,
        exit_signal_id: Uuid,
    ) -> Result<(), CoreError> {
        let this = Arc::clone(self);
        self.partitions.execute(&trade_id, move || async move {
            if let Err(err) = this.confirm_exit_signal(exit_signal_id).await {
                warn!(%err, "exit confirmation failed");
            }
        })
    }

    pub async fn confirm_exit_signal(&self, exit_signal_id: Uuid) -> Result<(), SignalsError> {
        ExitSignalRepository::update_status(
            self.store.as_ref(),
            exit_signal_id,
            ExitSignalStatus::Confirmed,
        )
        .await?;
        self.bus
            .emit(
                EventScope::Global,
                EventType::ExitSignalConfirmed,
                serde_json::json!({ "exit_signal_id": exit_signal_id }),
                "exit_coordinator",
            )
            .await;
        Ok(())
    }

    /// Cancels an exit signal in any pre-`EXECUTED` state. Callers (e.g. a
    /// manual override, or a re-detected exit superseding an earlier one)
    /// are responsible for knowing the signal hasn't already executed —
    /// the store does not re-validate the prior state here, matching the
    /// unconditional `update_status` contract used throughout SMS.
    pub fn submit_cancel(
        self: &Arc<Self>,
        trade_id: Uuid,
        exit_signal_id: Uuid,
        reason: &'static str,
    ) -> Result<(), CoreError> {
        let this = Arc::clone(self);
        self.partitions.execute(&trade_id, move || async move {
            if let Err(err) = this.cancel_exit_signal(exit_signal_id, reason).await {
                warn!(%err, "exit cancellation failed");
            }
        })
    }

    pub async fn cancel_exit_signal(&self, exit_signal_id: Uuid, reason: &str) -> Result<(), SignalsError> {
        self.store.cancel(exit_signal_id).await?;
        self.bus
            .emit(
                EventScope::Global,
                EventType::ExitSignalCancelled,
                serde_json::json!({ "exit_signal_id": exit_signal_id, "reason": reason }),
                "exit_coordinator",
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nse_core::model::{BrokerRole, Direction, Symbol, TradeStatus};
    use nse_store::event::NullEventBus;
    use nse_store::memory::InMemoryStore;
    use rust_decimal_macros::dec;

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

    fn trade(entry_ts: DateTime<Utc>) -> Trade {
        Trade {
            trade_id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            user_broker_id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            symbol: Symbol::from("RELIANCE"),
            direction: Direction::Buy,
            entry_price: dec!(2500),
            entry_qty: 10,
            entry_ts,
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

    fn candidate(reason: ExitReason, at: DateTime<Utc>) -> ExitCandidate {
        ExitCandidate {
            trade: trade(at - Duration::minutes(5)),
            user_broker: broker(),
            portfolio: None,
            reason,
            exit_price: dec!(2560),
            brick_movement: dec!(0.02),
            favorable_movement: true,
            detected_at: at,
        }
    }

    fn coordinator(store: Arc<InMemoryStore>) -> ExitCoordinator {
        let (partitions, _handles) = PartitionExecutor::spawn(4);
        ExitCoordinator::new(store, Arc::new(NullEventBus), partitions)
    }

    fn noon() -> DateTime<Utc> {
        chrono::Utc.with_ymd_and_hms(2026, 7, 28, 7, 0, 0).unwrap()
    }

    #[test]
    fn target_hit_scales_by_the_ladder_fraction() {
        let mut t = trade(noon());
        t.entry_qty = 10;
        t.exit_target_fraction = Some(dec!(0.25));
        assert_eq!(partial_exit_qty(&t, ExitReason::TargetHit), 2);
    }

    #[test]
    fn target_hit_with_no_fraction_closes_the_full_position() {
        let mut t = trade(noon());
        t.entry_qty = 10;
        t.exit_target_fraction = None;
        assert_eq!(partial_exit_qty(&t, ExitReason::TargetHit), 10);
    }

    #[test]
    fn non_target_reasons_always_close_the_full_position() {
        let mut t = trade(noon());
        t.entry_qty = 10;
        t.exit_target_fraction = Some(dec!(0.25));
        assert_eq!(partial_exit_qty(&t, ExitReason::TrailingStop), 10);
        assert_eq!(partial_exit_qty(&t, ExitReason::StopLoss), 10);
        assert_eq!(partial_exit_qty(&t, ExitReason::TimeBased), 10);
    }

    #[tokio::test]
    async fn qualifying_exit_publishes_a_detected_signal_with_episode_one() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(store);
        let outcome = coordinator
            .on_exit_detected(candidate(ExitReason::TargetHit, noon()))
            .await
            .unwrap();
        assert!(matches!(outcome, ExitOutcome::Detected(_)));
    }

    #[tokio::test]
    async fn second_exit_within_cooldown_is_rejected() {
        // E2E scenario 5.
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(store);
        let first_at = noon();
        coordinator
            .on_exit_detected(candidate(ExitReason::TargetHit, first_at))
            .await
            .unwrap();

        let second_at = first_at + Duration::seconds(20);
        let outcome = coordinator
            .on_exit_detected(candidate(ExitReason::TargetHit, second_at))
            .await
            .unwrap();
        assert_eq!(outcome, ExitOutcome::CooldownRejected);
    }

    #[tokio::test]
    async fn exit_after_cooldown_elapses_gets_the_next_episode() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(store);
        let first_at = noon();
        let first = coordinator
            .on_exit_detected(candidate(ExitReason::TargetHit, first_at))
            .await
            .unwrap();
        let ExitOutcome::Detected(first_id) = first else {
            panic!("expected first exit to be detected");
        };

        let third_at = first_at + Duration::seconds(35);
        let third = coordinator
            .on_exit_detected(candidate(ExitReason::TargetHit, third_at))
            .await
            .unwrap();
        let ExitOutcome::Detected(third_id) = third else {
            panic!("expected third exit to be detected");
        };
        assert_ne!(first_id, third_id);
    }

    #[tokio::test]
    async fn disabled_broker_fails_qualification_but_still_records_an_intent() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(store);
        let mut c = candidate(ExitReason::StopLoss, noon());
        c.user_broker.enabled = false;
        let outcome = coordinator.on_exit_detected(c).await.unwrap();
        assert_eq!(
            outcome,
            ExitOutcome::QualificationFailed(RejectionReason::BrokerDisabled)
        );
    }

    #[tokio::test]
    async fn exit_outside_session_is_dropped() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(store);
        // 2026-08-01 is a Saturday.
        let weekend = chrono::Utc.with_ymd_and_hms(2026, 8, 1, 7, 0, 0).unwrap();
        let outcome = coordinator
            .on_exit_detected(candidate(ExitReason::StopLoss, weekend))
            .await
            .unwrap();
        assert_eq!(outcome, ExitOutcome::MarketClosed);
    }
}
