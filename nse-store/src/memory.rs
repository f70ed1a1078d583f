//! In-memory reference `Store` implementation.
//!
//! Exists purely so the end-to-end scenarios in the spec's testable
//! properties are exercisable without a real database. Implements the same
//! idempotency contracts a production store must: a unique index on the
//! signal dedupe tuple, and an atomic, cooldown-enforcing episode counter.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use nse_core::clock::Timeframe;
use nse_core::config::{MtfGlobalConfig, MtfSymbolConfigOverride};
use nse_core::model::{
    Candle, ExitIntent, ExitReason, ExitSignal, ExitSignalStatus, Portfolio, Signal,
    SignalDelivery, SignalStatus, Symbol, Trade, TradeIntent, UserBroker,
};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::repository::{
    CandleRepository, ExitIntentRepository, ExitSignalRepository, MtfConfigRepository,
    PortfolioRepository, SignalDeliveryRepository, SignalRepository, TradeIntentRepository,
    TradeRepository, UserBrokerRepository, WatchlistRepository,
};

/// The minimum spacing the store enforces between two episode allocations
/// for the same `(trade_id, reason)` key (§4.13, §6).
pub const EXIT_REARM_COOLDOWN: Duration = Duration::seconds(30);

type DedupeKey = (Symbol, nse_core::model::ConfluenceType, chrono::NaiveDate, rust_decimal::Decimal, rust_decimal::Decimal);

#[derive(Default)]
struct Inner {
    signals: HashMap<Uuid, Signal>,
    dedupe_index: HashSet<DedupeKey>,
    deliveries: HashMap<Uuid, SignalDelivery>,
    exit_signals: HashMap<Uuid, ExitSignal>,
    episodes: HashMap<(Uuid, ExitReason), (i64, DateTime<Utc>)>,
    exit_intents: HashMap<Uuid, ExitIntent>,
    trade_intents: HashMap<Uuid, TradeIntent>,
    trades: HashMap<Uuid, Trade>,
    portfolios: HashMap<Uuid, Portfolio>,
    user_brokers: HashMap<Uuid, UserBroker>,
    watchlist: HashSet<Symbol>,
    global_config: MtfGlobalConfig,
    symbol_overrides: HashMap<Symbol, MtfSymbolConfigOverride>,
    candles: HashMap<(Symbol, Timeframe), Vec<Candle>>,
}

/// An in-process, `Mutex`-guarded `Store`. Not for production use (no
/// durability across restarts) — a direct analogue of the `mock`
/// collaborators the teacher's examples use to drive engine tests.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish_non_exhaustive()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_watchlist(&self, symbols: impl IntoIterator<Item = Symbol>) {
        self.inner.lock().watchlist.extend(symbols);
    }

    pub fn seed_user_broker(&self, broker: UserBroker) {
        self.inner.lock().user_brokers.insert(broker.user_broker_id, broker);
    }

    pub fn seed_portfolio(&self, portfolio: Portfolio) {
        self.inner.lock().portfolios.insert(portfolio.portfolio_id, portfolio);
    }

    pub fn set_global_config(&self, cfg: MtfGlobalConfig) {
        self.inner.lock().global_config = cfg;
    }

    pub fn seed_trade(&self, trade: Trade) {
        self.inner.lock().trades.insert(trade.trade_id, trade);
    }
}

#[async_trait]
impl SignalRepository for InMemoryStore {
    async fn insert(&self, signal: Signal) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let key = signal.dedupe_key();
        if !inner.dedupe_index.insert(key) {
            return Err(StoreError::AlreadyHandled("signal dedupe tuple".into()));
        }
        inner.signals.insert(signal.signal_id, signal);
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: SignalStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let signal = inner
            .signals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        signal.status = status;
        Ok(())
    }

    async fn find_by_symbol_and_status(
        &self,
        symbol: &Symbol,
        status: SignalStatus,
    ) -> Result<Vec<Signal>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .signals
            .values()
            .filter(|s| &s.symbol == symbol && std::mem::discriminant(&s.status) == std::mem::discriminant(&status))
            .cloned()
            .collect())
    }

    async fn find_expiring_soon(&self, window: Duration) -> Result<Vec<Signal>, StoreError> {
        let inner = self.inner.lock();
        let now = Utc::now();
        Ok(inner
            .signals
            .values()
            .filter(|s| matches!(s.status, SignalStatus::Published) && s.expires_at - now <= window)
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Signal>, StoreError> {
        Ok(self.inner.lock().signals.get(&id).cloned())
    }
}

#[async_trait]
impl SignalDeliveryRepository for InMemoryStore {
    async fn insert(&self, delivery: SignalDelivery) -> Result<(), StoreError> {
        self.inner.lock().deliveries.insert(delivery.delivery_id, delivery);
        Ok(())
    }

    async fn update(&self, delivery: SignalDelivery) -> Result<(), StoreError> {
        self.inner.lock().deliveries.insert(delivery.delivery_id, delivery);
        Ok(())
    }

    async fn find_all_active_for_index(&self) -> Result<Vec<SignalDelivery>, StoreError> {
        use nse_core::model::DeliveryStatus::*;
        Ok(self
            .inner
            .lock()
            .deliveries
            .values()
            .filter(|d| matches!(d.status, Created | Delivered))
            .cloned()
            .collect())
    }

    async fn expire_all_for_signal(&self, signal_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        for d in inner.deliveries.values_mut() {
            if d.signal_id == signal_id {
                d.status = nse_core::model::DeliveryStatus::Expired;
            }
        }
        Ok(())
    }

    async fn cancel_all_for_signal(&self, signal_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        for d in inner.deliveries.values_mut() {
            if d.signal_id == signal_id {
                d.status = nse_core::model::DeliveryStatus::Rejected;
            }
        }
        Ok(())
    }

    async fn find_by_signal(&self, signal_id: Uuid) -> Result<Vec<SignalDelivery>, StoreError> {
        Ok(self
            .inner
            .lock()
            .deliveries
            .values()
            .filter(|d| d.signal_id == signal_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ExitSignalRepository for InMemoryStore {
    async fn generate_episode(&self, trade_id: Uuid, reason: ExitReason) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let key = (trade_id, reason);
        if let Some((last_episode, last_ts)) = inner.episodes.get(&key).copied() {
            if now - last_ts < EXIT_REARM_COOLDOWN {
                return Err(StoreError::ExitCooldownActive);
            }
            let next = last_episode + 1;
            inner.episodes.insert(key, (next, now));
            Ok(next)
        } else {
            inner.episodes.insert(key, (1, now));
            Ok(1)
        }
    }

    async fn insert(&self, exit_signal: ExitSignal) -> Result<(), StoreError> {
        self.inner
            .lock()
            .exit_signals
            .insert(exit_signal.exit_signal_id, exit_signal);
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: ExitSignalStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let exit_signal = inner
            .exit_signals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        exit_signal.status = status;
        Ok(())
    }

    async fn cancel(&self, id: Uuid) -> Result<(), StoreError> {
        self.update_status(id, ExitSignalStatus::Cancelled).await
    }

    async fn find_by_trade_id(&self, trade_id: Uuid) -> Result<Vec<ExitSignal>, StoreError> {
        Ok(self
            .inner
            .lock()
            .exit_signals
            .values()
            .filter(|e| e.trade_id == trade_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TradeIntentRepository for InMemoryStore {
    async fn insert(&self, intent: TradeIntent) -> Result<(), StoreError> {
        self.inner.lock().trade_intents.insert(intent.intent_id, intent);
        Ok(())
    }

    async fn update(&self, intent: TradeIntent) -> Result<(), StoreError> {
        self.inner.lock().trade_intents.insert(intent.intent_id, intent);
        Ok(())
    }

    async fn find_by_signal(&self, signal_id: Uuid) -> Result<Vec<TradeIntent>, StoreError> {
        Ok(self
            .inner
            .lock()
            .trade_intents
            .values()
            .filter(|i| i.signal_id == signal_id)
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TradeIntent>, StoreError> {
        Ok(self.inner.lock().trade_intents.get(&id).cloned())
    }
}

#[async_trait]
impl ExitIntentRepository for InMemoryStore {
    async fn insert(&self, intent: ExitIntent) -> Result<(), StoreError> {
        self.inner.lock().exit_intents.insert(intent.exit_intent_id, intent);
        Ok(())
    }

    async fn update(&self, intent: ExitIntent) -> Result<(), StoreError> {
        self.inner.lock().exit_intents.insert(intent.exit_intent_id, intent);
        Ok(())
    }

    async fn find_by_trade_id(&self, trade_id: Uuid) -> Result<Vec<ExitIntent>, StoreError> {
        Ok(self
            .inner
            .lock()
            .exit_intents
            .values()
            .filter(|i| i.trade_id == trade_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TradeRepository for InMemoryStore {
    async fn insert(&self, trade: Trade) -> Result<(), StoreError> {
        self.inner.lock().trades.insert(trade.trade_id, trade);
        Ok(())
    }

    async fn update(&self, trade: Trade) -> Result<(), StoreError> {
        self.inner.lock().trades.insert(trade.trade_id, trade);
        Ok(())
    }

    async fn find_open_by_symbol(&self, symbol: &Symbol) -> Result<Vec<Trade>, StoreError> {
        use nse_core::model::TradeStatus::Open;
        Ok(self
            .inner
            .lock()
            .trades
            .values()
            .filter(|t| &t.symbol == symbol && matches!(t.status, Open))
            .cloned()
            .collect())
    }

    async fn find_by_portfolio_id(&self, portfolio_id: Uuid) -> Result<Vec<Trade>, StoreError> {
        Ok(self
            .inner
            .lock()
            .trades
            .values()
            .filter(|t| t.portfolio_id == portfolio_id)
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Trade>, StoreError> {
        Ok(self.inner.lock().trades.get(&id).cloned())
    }
}

#[async_trait]
impl PortfolioRepository for InMemoryStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Portfolio>, StoreError> {
        Ok(self.inner.lock().portfolios.get(&id).cloned())
    }

    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<Portfolio>, StoreError> {
        Ok(self
            .inner
            .lock()
            .portfolios
            .values()
            .find(|p| p.user_id == user_id)
            .cloned())
    }

    async fn update(&self, portfolio: Portfolio) -> Result<(), StoreError> {
        self.inner.lock().portfolios.insert(portfolio.portfolio_id, portfolio);
        Ok(())
    }
}

#[async_trait]
impl UserBrokerRepository for InMemoryStore {
    async fn find_enabled_exec_brokers(&self) -> Result<Vec<UserBroker>, StoreError> {
        use nse_core::model::BrokerRole::Exec;
        Ok(self
            .inner
            .lock()
            .user_brokers
            .values()
            .filter(|b| b.enabled && matches!(b.role, Exec))
            .cloned()
            .collect())
    }

    async fn find_enabled_data_broker(&self) -> Result<Option<UserBroker>, StoreError> {
        use nse_core::model::BrokerRole::Data;
        Ok(self
            .inner
            .lock()
            .user_brokers
            .values()
            .find(|b| b.enabled && matches!(b.role, Data))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserBroker>, StoreError> {
        Ok(self.inner.lock().user_brokers.get(&id).cloned())
    }

    async fn update(&self, broker: UserBroker) -> Result<(), StoreError> {
        self.inner.lock().user_brokers.insert(broker.user_broker_id, broker);
        Ok(())
    }
}

#[async_trait]
impl WatchlistRepository for InMemoryStore {
    async fn contains(&self, symbol: &Symbol) -> Result<bool, StoreError> {
        Ok(self.inner.lock().watchlist.contains(symbol))
    }
}

#[async_trait]
impl MtfConfigRepository for InMemoryStore {
    async fn global(&self) -> Result<MtfGlobalConfig, StoreError> {
        Ok(self.inner.lock().global_config.clone())
    }

    async fn symbol_override(
        &self,
        symbol: &Symbol,
    ) -> Result<Option<MtfSymbolConfigOverride>, StoreError> {
        Ok(self.inner.lock().symbol_overrides.get(symbol).cloned())
    }
}

#[async_trait]
impl CandleRepository for InMemoryStore {
    async fn persist(&self, candle: Candle) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner
            .candles
            .entry((candle.symbol.clone(), candle.timeframe))
            .or_default()
            .push(candle);
        Ok(())
    }

    async fn get_recent(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        n: usize,
    ) -> Result<Vec<Candle>, StoreError> {
        let inner = self.inner.lock();
        let all = inner
            .candles
            .get(&(symbol.clone(), timeframe))
            .cloned()
            .unwrap_or_default();
        let start = all.len().saturating_sub(n);
        Ok(all[start..].to_vec())
    }
}
