//! Signal-delivery fan-out index (§4.13).
//!
//! An in-memory, rebuildable index over every non-terminal
//! [`SignalDelivery`]. Three views are kept consistent under one lock so a
//! delivery lookup never needs to fall back to the store on the hot path:
//! user-broker → signals, signal → user-brokers, and delivery id → the
//! `(signal_id, user_broker_id)` pair it was created for.

use std::collections::HashSet;

use fnv::FnvHashMap;
use nse_core::model::SignalDelivery;
use nse_store::repository::SignalDeliveryRepository;
use parking_lot::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Views {
    by_user_broker: FnvHashMap<Uuid, HashSet<Uuid>>,
    by_signal: FnvHashMap<Uuid, HashSet<Uuid>>,
    pair_by_delivery: FnvHashMap<Uuid, (Uuid, Uuid)>,
}

/// Rebuilt from the store at startup (see [`SignalDeliveryIndex::rebuild`]);
/// kept current thereafter by the coordinators calling [`insert`]/[`remove`]
/// as deliveries are created, consumed or torn down.
#[derive(Default)]
pub struct SignalDeliveryIndex {
    views: RwLock<Views>,
}

impl std::fmt::Debug for SignalDeliveryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalDeliveryIndex").finish_non_exhaustive()
    }
}

impl SignalDeliveryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every active (`Created`/`Delivered`) delivery from the store
    /// and rebuilds the three views from scratch.
    pub async fn rebuild(
        repo: &dyn SignalDeliveryRepository,
    ) -> Result<Self, nse_store::StoreError> {
        let index = Self::new();
        for delivery in repo.find_all_active_for_index().await? {
            index.insert(&delivery);
        }
        Ok(index)
    }

    pub fn insert(&self, delivery: &SignalDelivery) {
        let mut views = self.views.write();
        views
            .by_user_broker
            .entry(delivery.user_broker_id)
            .or_default()
            .insert(delivery.signal_id);
        views
            .by_signal
            .entry(delivery.signal_id)
            .or_default()
            .insert(delivery.user_broker_id);
        views.pair_by_delivery.insert(
            delivery.delivery_id,
            (delivery.signal_id, delivery.user_broker_id),
        );
    }

    /// Removes a single delivery by id (used on consume/reject).
    pub fn remove_delivery(&self, delivery_id: Uuid) {
        let mut views = self.views.write();
        if let Some((signal_id, user_broker_id)) = views.pair_by_delivery.remove(&delivery_id) {
            if let Some(set) = views.by_user_broker.get_mut(&user_broker_id) {
                set.remove(&signal_id);
            }
            if let Some(set) = views.by_signal.get_mut(&signal_id) {
                set.remove(&user_broker_id);
            }
        }
    }

    /// Removes every delivery for a signal (used on cancel/expire/supersede).
    pub fn remove_for_signal(&self, signal_id: Uuid) {
        let mut views = self.views.write();
        if let Some(user_brokers) = views.by_signal.remove(&signal_id) {
            for user_broker_id in user_brokers {
                if let Some(set) = views.by_user_broker.get_mut(&user_broker_id) {
                    set.remove(&signal_id);
                }
            }
        }
        views
            .pair_by_delivery
            .retain(|_, (sig, _)| *sig != signal_id);
    }

    pub fn signals_for_user_broker(&self, user_broker_id: Uuid) -> Vec<Uuid> {
        self.views
            .read()
            .by_user_broker
            .get(&user_broker_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn user_brokers_for_signal(&self, signal_id: Uuid) -> Vec<Uuid> {
        self.views
            .read()
            .by_signal
            .get(&signal_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }
}
