//! `EntryCoordinator` (§4.13).
//!
//! Partitioned by symbol: every signal-related operation for a given
//! symbol runs through the same `PartitionExecutor` partition, so two
//! concurrently-detected signals on the same symbol are always serialised
//! and never race on the dedupe/supersede logic below.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fnv::FnvHashMap;
use nse_core::clock::market_closes_within;
use nse_core::error::CoreError;
use nse_core::model::{
    ConfluenceType, RejectionReason, Signal, SignalStatus, Strength, Symbol, TimeframeIndicator,
    Zone,
};
use nse_core::partition::PartitionExecutor;
use nse_store::event::{EventScope, EventType};
use nse_store::repository::{SignalDeliveryRepository, SignalRepository, Store};
use nse_store::{EventBus, StoreError};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::delivery_index::SignalDeliveryIndex;
use crate::error::SignalsError;

/// Entry signals expire 30 minutes after generation if never cancelled or
/// superseded first.
pub const ENTRY_SIGNAL_TTL: Duration = Duration::minutes(30);

/// New signals are suppressed within 60 seconds of the session close —
/// there usually isn't enough time left in the session to act on one.
const ENTRY_SUPPRESSION_WINDOW: Duration = Duration::seconds(60);

/// Everything the zone detector, confluence calculator and sizing
/// primitives have already computed for one symbol/direction pair, handed
/// to the coordinator to turn into a published (or rejected) [`Signal`].
#[derive(Debug, Clone)]
pub struct SignalCandidate {
    pub symbol: Symbol,
    pub direction: nse_core::model::Direction,
    pub htf: TimeframeIndicator,
    pub itf: TimeframeIndicator,
    pub ltf: TimeframeIndicator,
    pub confluence_type: ConfluenceType,
    pub confluence_score: Decimal,
    pub strength: Strength,
    pub confluence_passed: bool,
    pub p_win: Decimal,
    pub p_fill: Decimal,
    pub kelly: Decimal,
    pub reference_price: Decimal,
    pub effective_floor: Decimal,
    pub effective_ceiling: Decimal,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum EntryOutcome {
    Published(Uuid),
    AlreadyHandled,
    OutOfOrder,
    SuppressedNearClose,
    Rejected(RejectionReason),
}

pub struct EntryCoordinator {
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
    partitions: PartitionExecutor,
    delivery_index: Arc<SignalDeliveryIndex>,
    last_seen: Mutex<FnvHashMap<Symbol, DateTime<Utc>>>,
}

impl std::fmt::Debug for EntryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryCoordinator").finish_non_exhaustive()
    }
}

impl EntryCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<dyn EventBus>,
        partitions: PartitionExecutor,
        delivery_index: Arc<SignalDeliveryIndex>,
    ) -> Self {
        Self {
            store,
            bus,
            partitions,
            delivery_index,
            last_seen: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Schedules [`on_signal_detected`] onto this symbol's partition. Errors
    /// reaching `tracing::warn` rather than the caller, mirroring the
    /// fire-and-forget contract the tick-ingest worker pool uses.
    pub fn submit_signal_detected(self: &Arc<Self>, candidate: SignalCandidate) -> Result<(), CoreError> {
        let this = Arc::clone(self);
        let symbol = candidate.symbol.clone();
        self.partitions.execute(&symbol, move || async move {
            match this.on_signal_detected(candidate).await {
                Ok(outcome) => info!(?outcome, "entry signal processed"),
                Err(err) => warn!(%err, "entry signal processing failed"),
            }
        })
    }

    /// The full detected-signal lifecycle: out-of-order guard (AV-8),
    /// near-close suppression, dedupe via the store's unique index,
    /// supersession of overlapping predecessors, delivery fan-out.
    pub async fn on_signal_detected(&self, candidate: SignalCandidate) -> Result<EntryOutcome, SignalsError> {
        if !candidate.confluence_passed {
            return Ok(EntryOutcome::Rejected(RejectionReason::ConfluenceNotMet));
        }

        {
            let mut last_seen = self.last_seen.lock();
            if let Some(prev) = last_seen.get(&candidate.symbol) {
                if candidate.detected_at < *prev {
                    return Ok(EntryOutcome::OutOfOrder);
                }
            }
            last_seen.insert(candidate.symbol.clone(), candidate.detected_at);
        }

        if market_closes_within(candidate.detected_at, ENTRY_SUPPRESSION_WINDOW) {
            return Ok(EntryOutcome::SuppressedNearClose);
        }

        let signal = Signal {
            signal_id: Uuid::new_v4(),
            symbol: candidate.symbol.clone(),
            direction: candidate.direction,
            htf: candidate.htf,
            itf: candidate.itf,
            ltf: candidate.ltf,
            confluence_type: candidate.confluence_type,
            confluence_score: candidate.confluence_score,
            strength: candidate.strength,
            p_win: candidate.p_win,
            p_fill: candidate.p_fill,
            kelly: candidate.kelly,
            reference_price: candidate.reference_price,
            effective_floor: candidate.effective_floor,
            effective_ceiling: candidate.effective_ceiling,
            generated_at: candidate.detected_at,
            expires_at: candidate.detected_at + ENTRY_SIGNAL_TTL,
            status: SignalStatus::Published,
            version: 1,
        };

        match SignalRepository::insert(self.store.as_ref(), signal.clone()).await {
            Ok(()) => {}
            Err(StoreError::AlreadyHandled(_)) => return Ok(EntryOutcome::AlreadyHandled),
            Err(err) => return Err(err.into()),
        }

        self.supersede_overlapping(&signal).await?;
        self.fan_out(&signal).await?;

        self.bus
            .emit(
                EventScope::Global,
                EventType::SignalGenerated,
                serde_json::json!({
                    "signal_id": signal.signal_id,
                    "symbol": signal.symbol.as_str(),
                    "confluence_type": format!("{:?}", signal.confluence_type),
                }),
                "entry_coordinator",
            )
            .await;

        Ok(EntryOutcome::Published(signal.signal_id))
    }

    /// Marks every other still-`Published` signal on this symbol whose buy
    /// zone overlaps the new one as `Superseded`, and tears down their
    /// deliveries — one live signal per overlapping zone, at most.
    async fn supersede_overlapping(&self, signal: &Signal) -> Result<(), SignalsError> {
        let siblings = self
            .store
            .find_by_symbol_and_status(&signal.symbol, SignalStatus::Published)
            .await?;

        for sibling in siblings {
            if sibling.signal_id == signal.signal_id {
                continue;
            }
            if zones_overlap(
                sibling.effective_floor,
                sibling.effective_ceiling,
                signal.effective_floor,
                signal.effective_ceiling,
            ) {
                SignalRepository::update_status(
                    self.store.as_ref(),
                    sibling.signal_id,
                    SignalStatus::Superseded,
                )
                .await?;
                self.store.cancel_all_for_signal(sibling.signal_id).await?;
                self.delivery_index.remove_for_signal(sibling.signal_id);
                self.bus
                    .emit(
                        EventScope::Global,
                        EventType::SignalCancelled,
                        serde_json::json!({ "signal_id": sibling.signal_id, "reason": "superseded" }),
                        "entry_coordinator",
                    )
                    .await;
            }
        }
        Ok(())
    }

    async fn fan_out(&self, signal: &Signal) -> Result<(), SignalsError> {
        let brokers = self.store.find_enabled_exec_brokers().await?;
        for broker in brokers {
            let delivery = nse_core::model::SignalDelivery {
                delivery_id: Uuid::new_v4(),
                signal_id: signal.signal_id,
                user_broker_id: broker.user_broker_id,
                user_id: broker.user_id,
                status: nse_core::model::DeliveryStatus::Created,
                intent_id: None,
                created_at: signal.generated_at,
                delivered_at: None,
                consumed_at: None,
                user_action_at: None,
            };
            SignalDeliveryRepository::insert(self.store.as_ref(), delivery.clone()).await?;
            self.delivery_index.insert(&delivery);
            self.bus
                .emit(
                    EventScope::UserBroker(broker.user_broker_id),
                    EventType::SignalDelivered,
                    serde_json::json!({ "signal_id": signal.signal_id, "delivery_id": delivery.delivery_id }),
                    "entry_coordinator",
                )
                .await;
        }
        Ok(())
    }

    /// Zone-break invalidation: cancels any `Published` signal on `symbol`
    /// whose floor (for a `Buy`) or ceiling (for a `Sell`) the latest price
    /// has broken through.
    pub async fn on_price_update(&self, symbol: &Symbol, price: Decimal) -> Result<(), SignalsError> {
        let published = self
            .store
            .find_by_symbol_and_status(symbol, SignalStatus::Published)
            .await?;

        for signal in published {
            let broke = match signal.direction {
                nse_core::model::Direction::Buy => price < signal.effective_floor,
                nse_core::model::Direction::Sell => price > signal.effective_ceiling,
            };
            if broke {
                self.cancel_signal(signal.signal_id).await?;
            }
        }
        Ok(())
    }

    pub async fn cancel_signal(&self, signal_id: Uuid) -> Result<(), SignalsError> {
        SignalRepository::update_status(self.store.as_ref(), signal_id, SignalStatus::Cancelled)
            .await?;
        self.store.cancel_all_for_signal(signal_id).await?;
        self.delivery_index.remove_for_signal(signal_id);
        self.bus
            .emit(
                EventScope::Global,
                EventType::SignalCancelled,
                serde_json::json!({ "signal_id": signal_id }),
                "entry_coordinator",
            )
            .await;
        Ok(())
    }

    /// Expires every `Published` signal whose `expires_at` has passed.
    /// Intended to be driven by the 1-minute expiry scheduler.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<(), SignalsError> {
        let _ = now;
        let due = self.store.find_expiring_soon(Duration::zero()).await?;
        for signal in due {
            SignalRepository::update_status(self.store.as_ref(), signal.signal_id, SignalStatus::Expired)
                .await?;
            self.store.expire_all_for_signal(signal.signal_id).await?;
            self.delivery_index.remove_for_signal(signal.signal_id);
            self.bus
                .emit(
                    EventScope::Global,
                    EventType::SignalExpired,
                    serde_json::json!({ "signal_id": signal.signal_id }),
                    "entry_coordinator",
                )
                .await;
        }
        Ok(())
    }

    /// Spawns the 1-minute expiry sweep on the current Tokio runtime.
    pub fn spawn_expiry_scheduler(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                ticker.tick().await;
                if let Err(err) = self.expire_due(Utc::now()).await {
                    warn!(%err, "expiry sweep failed");
                }
            }
        })
    }
}

fn zones_overlap(a_low: Decimal, a_high: Decimal, b_low: Decimal, b_high: Decimal) -> bool {
    a_low <= b_high && b_low <= a_high
}

/// Exposed for callers that need a bare zone/ceiling overlap check (e.g. an
/// operator tool inspecting why two signals collided) without depending on
/// a full [`Zone`] value.
pub fn overlaps(a: Zone, b: Zone) -> bool {
    zones_overlap(a.low, a.high, b.low, b.high)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nse_core::model::{BrokerRole, Direction, UserBroker};
    use nse_store::event::NullEventBus;
    use nse_store::memory::InMemoryStore;
    use rust_decimal_macros::dec;

    fn candidate(symbol: &str, floor: Decimal, ceiling: Decimal, now: DateTime<Utc>) -> SignalCandidate {
        let zone = Zone::from_extrema(floor, ceiling, dec!(0.5));
        SignalCandidate {
            symbol: Symbol::from(symbol),
            direction: Direction::Buy,
            htf: TimeframeIndicator { in_zone: true, zone },
            itf: TimeframeIndicator { in_zone: true, zone },
            ltf: TimeframeIndicator { in_zone: true, zone },
            confluence_type: ConfluenceType::Triple,
            confluence_score: dec!(1.0),
            strength: Strength::VeryStrong,
            confluence_passed: true,
            p_win: dec!(0.65),
            p_fill: dec!(0.9),
            kelly: dec!(0.2),
            reference_price: (floor + ceiling) / dec!(2),
            effective_floor: floor,
            effective_ceiling: ceiling,
            detected_at: now,
        }
    }

    fn coordinator(store: Arc<InMemoryStore>) -> EntryCoordinator {
        let (partitions, _handles) = PartitionExecutor::spawn(4);
        EntryCoordinator::new(
            store,
            Arc::new(NullEventBus),
            partitions,
            Arc::new(SignalDeliveryIndex::new()),
        )
    }

    #[tokio::test]
    async fn publishes_and_fans_out_to_enabled_exec_brokers() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_user_broker(UserBroker {
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
        });
        let coordinator = coordinator(store);
        let noon = chrono::Utc.with_ymd_and_hms(2026, 7, 28, 7, 0, 0).unwrap();
        let outcome = coordinator
            .on_signal_detected(candidate("RELIANCE", dec!(2450), dec!(2550), noon))
            .await
            .unwrap();
        assert!(matches!(outcome, EntryOutcome::Published(_)));
    }

    #[tokio::test]
    async fn duplicate_candidate_is_already_handled() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(store);
        let noon = chrono::Utc.with_ymd_and_hms(2026, 7, 28, 7, 0, 0).unwrap();
        let c1 = candidate("INFY", dec!(1000), dec!(1100), noon);
        let c2 = c1.clone();
        coordinator.on_signal_detected(c1).await.unwrap();
        let second = coordinator.on_signal_detected(c2).await.unwrap();
        assert_eq!(second, EntryOutcome::AlreadyHandled);
    }

    #[tokio::test]
    async fn out_of_order_detection_is_ignored() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(store);
        let noon = chrono::Utc.with_ymd_and_hms(2026, 7, 28, 7, 0, 0).unwrap();
        let earlier = noon - Duration::minutes(5);

        let first = candidate("TCS", dec!(3000), dec!(3100), noon);
        coordinator.on_signal_detected(first).await.unwrap();

        let stale = candidate("TCS", dec!(2900), dec!(3000), earlier);
        let outcome = coordinator.on_signal_detected(stale).await.unwrap();
        assert_eq!(outcome, EntryOutcome::OutOfOrder);
    }
}
