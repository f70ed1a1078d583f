//! Typed repository traits composing the `Store` boundary (§6).
//!
//! Every method that mutates signal/delivery/exit state is restricted to
//! being called only from `nse-signals`' coordinators at the type level: the
//! traits live here, but nothing outside `nse-signals` is expected to hold a
//! `&dyn` reference capable of calling the mutating methods in production
//! wiring (see `DESIGN.md` for how the single-writer discipline note in the
//! spec is pinned down).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use nse_core::clock::Timeframe;
use nse_core::config::{MtfGlobalConfig, MtfSymbolConfigOverride};
use nse_core::model::{
    Candle, ExitIntent, ExitReason, ExitSignal, ExitSignalStatus, Portfolio, Signal,
    SignalDelivery, SignalStatus, Symbol, Trade, TradeIntent, UserBroker,
};
use uuid::Uuid;

use crate::error::StoreError;

#[async_trait]
pub trait SignalRepository: Send + Sync {
    /// Inserts a new signal. Must be protected by a unique index on
    /// `(symbol, confluence_type, date(generated_at), effective_floor, effective_ceiling)`;
    /// a duplicate insert returns `StoreError::AlreadyHandled`, which SMS
    /// treats as a no-op (P9).
    async fn insert(&self, signal: Signal) -> Result<(), StoreError>;

    async fn update_status(&self, id: Uuid, status: SignalStatus) -> Result<(), StoreError>;

    async fn find_by_symbol_and_status(
        &self,
        symbol: &Symbol,
        status: SignalStatus,
    ) -> Result<Vec<Signal>, StoreError>;

    async fn find_expiring_soon(&self, window: Duration) -> Result<Vec<Signal>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Signal>, StoreError>;
}

#[async_trait]
pub trait SignalDeliveryRepository: Send + Sync {
    /// Inserts a delivery row. FK-constrained on `signals.signal_id`.
    async fn insert(&self, delivery: SignalDelivery) -> Result<(), StoreError>;

    async fn update(&self, delivery: SignalDelivery) -> Result<(), StoreError>;

    /// Loads every delivery still in a non-terminal state, for
    /// `SignalDeliveryIndex` rebuild at startup.
    async fn find_all_active_for_index(&self) -> Result<Vec<SignalDelivery>, StoreError>;

    async fn expire_all_for_signal(&self, signal_id: Uuid) -> Result<(), StoreError>;

    async fn cancel_all_for_signal(&self, signal_id: Uuid) -> Result<(), StoreError>;

    async fn find_by_signal(&self, signal_id: Uuid) -> Result<Vec<SignalDelivery>, StoreError>;
}

#[async_trait]
pub trait ExitSignalRepository: Send + Sync {
    /// The sole source of episode numbers (I5). Atomically allocates the
    /// next episode for `(trade_id, reason)` and returns
    /// `StoreError::ExitCooldownActive` if the last exit for this key was
    /// raised less than 30 seconds ago.
    async fn generate_episode(&self, trade_id: Uuid, reason: ExitReason) -> Result<i64, StoreError>;

    async fn insert(&self, exit_signal: ExitSignal) -> Result<(), StoreError>;

    async fn update_status(&self, id: Uuid, status: ExitSignalStatus) -> Result<(), StoreError>;

    async fn cancel(&self, id: Uuid) -> Result<(), StoreError>;

    async fn find_by_trade_id(&self, trade_id: Uuid) -> Result<Vec<ExitSignal>, StoreError>;
}

/// Entry-side sizing/validation decisions (§4.15), distinct from the
/// `ExitIntent` the exit pipeline produces. I3 requires every row here to
/// reference a preceding `SignalDelivery` via `signal_id`.
#[async_trait]
pub trait TradeIntentRepository: Send + Sync {
    async fn insert(&self, intent: TradeIntent) -> Result<(), StoreError>;

    async fn update(&self, intent: TradeIntent) -> Result<(), StoreError>;

    async fn find_by_signal(&self, signal_id: Uuid) -> Result<Vec<TradeIntent>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TradeIntent>, StoreError>;
}

#[async_trait]
pub trait ExitIntentRepository: Send + Sync {
    async fn insert(&self, intent: ExitIntent) -> Result<(), StoreError>;

    async fn update(&self, intent: ExitIntent) -> Result<(), StoreError>;

    async fn find_by_trade_id(&self, trade_id: Uuid) -> Result<Vec<ExitIntent>, StoreError>;
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn insert(&self, trade: Trade) -> Result<(), StoreError>;

    async fn update(&self, trade: Trade) -> Result<(), StoreError>;

    /// The database is authoritative for open-trade lookup; there is no
    /// parallel in-memory open-trade set (§9 design note).
    async fn find_open_by_symbol(&self, symbol: &Symbol) -> Result<Vec<Trade>, StoreError>;

    async fn find_by_portfolio_id(&self, portfolio_id: Uuid) -> Result<Vec<Trade>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Trade>, StoreError>;
}

#[async_trait]
pub trait PortfolioRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Portfolio>, StoreError>;
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<Portfolio>, StoreError>;
    async fn update(&self, portfolio: Portfolio) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserBrokerRepository: Send + Sync {
    async fn find_enabled_exec_brokers(&self) -> Result<Vec<UserBroker>, StoreError>;
    async fn find_enabled_data_broker(&self) -> Result<Option<UserBroker>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserBroker>, StoreError>;
    async fn update(&self, broker: UserBroker) -> Result<(), StoreError>;
}

#[async_trait]
pub trait WatchlistRepository: Send + Sync {
    async fn contains(&self, symbol: &Symbol) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait MtfConfigRepository: Send + Sync {
    async fn global(&self) -> Result<MtfGlobalConfig, StoreError>;
    async fn symbol_override(
        &self,
        symbol: &Symbol,
    ) -> Result<Option<MtfSymbolConfigOverride>, StoreError>;
}

#[async_trait]
pub trait CandleRepository: Send + Sync {
    async fn persist(&self, candle: Candle) -> Result<(), StoreError>;

    /// Returns the most recent `n` closed candles for `(symbol, timeframe)`,
    /// newest last. A short result (fewer than `n`) is a first-class
    /// outcome, not an error — the caller compares `len()` against the
    /// timeframe's lookback floor.
    async fn get_recent(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        n: usize,
    ) -> Result<Vec<Candle>, StoreError>;
}

/// The composed `Store` boundary. A single concrete type implements all
/// repositories (typically by delegating to a connection pool per
/// aggregate); collaborators depend on whichever sub-trait they need.
pub trait Store:
    SignalRepository
    + SignalDeliveryRepository
    + TradeIntentRepository
    + ExitSignalRepository
    + ExitIntentRepository
    + TradeRepository
    + PortfolioRepository
    + UserBrokerRepository
    + WatchlistRepository
    + MtfConfigRepository
    + CandleRepository
{
}

impl<T> Store for T where
    T: SignalRepository
        + SignalDeliveryRepository
        + TradeIntentRepository
        + ExitSignalRepository
        + ExitIntentRepository
        + TradeRepository
        + PortfolioRepository
        + UserBrokerRepository
        + WatchlistRepository
        + MtfConfigRepository
        + CandleRepository
{
}

/// Re-exported so downstream crates importing `nse_store::repository::*` get
/// the instant type used by `find_expiring_soon`'s window parameter.
pub type Instant = DateTime<Utc>;
