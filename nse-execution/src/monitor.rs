//! Exit Monitor (§4.16).
//!
//! Subscribes to every tick and, for each one, asks the store for that
//! symbol's open trades — there is no parallel in-memory open-trade set
//! (§9 design note, echoed in `TradeRepository::find_open_by_symbol`'s own
//! doc comment). Trailing-stop state lives here, per trade, since it is
//! purely a function of price history the monitor itself observes tick by
//! tick; everything downstream of a fired reason is handed to
//! [`nse_signals::exit::ExitCoordinator`].

use std::sync::Arc;

use fnv::FnvHashMap;
use nse_core::config::{MtfGlobalConfig, MtfSymbolConfigOverride};
use nse_core::model::{Tick, Trade, TradeStatus};
use nse_risk::brick::BrickTracker;
use nse_risk::exits::{check_exit, update_trailing, TrailingState};
use nse_store::repository::{MtfConfigRepository, PortfolioRepository, Store, TradeRepository, UserBrokerRepository};
use nse_store::traits::BrokerFeed;
use nse_store::EventBus;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ExecutionError;
use nse_signals::exit::{ExitCandidate, ExitCoordinator};

pub struct ExitMonitor {
    store: Arc<dyn Store>,
    coordinator: Arc<ExitCoordinator>,
    brick_tracker: BrickTracker,
    trailing: Mutex<FnvHashMap<Uuid, TrailingState>>,
}

impl std::fmt::Debug for ExitMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitMonitor").finish_non_exhaustive()
    }
}

impl ExitMonitor {
    pub fn new(store: Arc<dyn Store>, coordinator: Arc<ExitCoordinator>) -> Self {
        Self {
            store,
            coordinator,
            brick_tracker: BrickTracker::new(),
            trailing: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Drains `feed` until the broker disconnects, calling
    /// [`ExitMonitor::on_tick`] for every tick received. Errors from a
    /// single tick are logged and do not end the subscription — a data
    /// glitch on one symbol must not take the whole monitor down.
    pub async fn run(&self, feed: &dyn BrokerFeed) {
        let mut rx = feed.subscribe();
        loop {
            match rx.recv().await {
                Ok(tick) => {
                    if let Err(err) = self.on_tick(&tick).await {
                        warn!(%err, symbol = %tick.symbol.as_str(), "exit monitor tick processing failed");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "exit monitor lagged behind the tick feed");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// One tick's worth of exit evaluation across every open trade on that
    /// symbol.
    pub async fn on_tick(&self, tick: &Tick) -> Result<(), ExecutionError> {
        let open_trades = TradeRepository::find_open_by_symbol(self.store.as_ref(), &tick.symbol).await?;
        for trade in open_trades {
            if trade.status != TradeStatus::Open {
                continue;
            }
            self.evaluate_trade(trade, tick).await?;
        }
        Ok(())
    }

    async fn evaluate_trade(&self, trade: Trade, tick: &Tick) -> Result<(), ExecutionError> {
        let global = MtfConfigRepository::global(self.store.as_ref()).await?;
        let over = MtfConfigRepository::symbol_override(self.store.as_ref(), &trade.symbol).await?;
        let cfg = resolve_exit_cfg(&global, over.as_ref());

        let state_before = {
            let guard = self.trailing.lock();
            guard.get(&trade.trade_id).copied().unwrap_or_default()
        };
        let state_after = update_trailing(trade.direction, trade.entry_price, tick.last_price, state_before, &cfg);
        {
            let mut guard = self.trailing.lock();
            guard.insert(trade.trade_id, state_after);
        }

        let Some(reason) = check_exit(
            trade.direction,
            tick.last_price,
            &state_after,
            trade.exit_target_price,
            trade.entry_effective_floor,
            trade.entry_ts,
            tick.ts(),
            &cfg,
        ) else {
            return Ok(());
        };

        if !self
            .brick_tracker
            .should_allow_exit(&trade.symbol, trade.direction, tick.last_price, cfg.min_brick_pct)
        {
            info!(trade_id = %trade.trade_id, ?reason, "exit suppressed by brick-movement gate");
            return Ok(());
        }

        let movement = self
            .brick_tracker
            .brick_movement(&trade.symbol, trade.direction, tick.last_price)
            .unwrap_or(Decimal::ZERO);
        let favorable = nse_risk::sizing::favorable_movement(trade.direction, trade.entry_price, tick.last_price);
        self.brick_tracker
            .record_exit(&trade.symbol, trade.direction, tick.last_price);

        let user_broker = UserBrokerRepository::find_by_id(self.store.as_ref(), trade.user_broker_id)
            .await?
            .ok_or_else(|| ExecutionError::missing("user_broker", trade.user_broker_id))?;
        let portfolio = PortfolioRepository::find_by_id(self.store.as_ref(), trade.portfolio_id).await?;

        let candidate = ExitCandidate {
            trade,
            user_broker,
            portfolio,
            reason,
            exit_price: tick.last_price,
            brick_movement: movement,
            favorable_movement: favorable,
            detected_at: tick.ts(),
        };

        self.coordinator.submit_exit_detected(candidate)?;
        Ok(())
    }
}

/// `check_exit`/`update_trailing`/`build_ladder` all take `&MtfGlobalConfig`
/// directly (they predate the symbol-override layer); resolving here keeps
/// the override applied without widening their signatures.
fn resolve_exit_cfg(global: &MtfGlobalConfig, over: Option<&MtfSymbolConfigOverride>) -> MtfGlobalConfig {
    let resolved = nse_core::config::ResolvedConfig::resolve(global, over);
    (*resolved).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use nse_core::model::{Direction, Portfolio, Symbol, UserBroker};
    use nse_core::partition::PartitionExecutor;
    use nse_store::event::NullEventBus;
    use nse_store::memory::InMemoryStore;
    use rust_decimal_macros::dec;

    fn broker(user_broker_id: Uuid) -> UserBroker {
        UserBroker {
            user_broker_id,
            user_id: Uuid::new_v4(),
            role: nse_core::model::BrokerRole::Exec,
            enabled: true,
            connected: true,
            max_per_trade: dec!(500_000),
            daily_loss_limit: dec!(10_000),
            weekly_loss_limit: dec!(30_000),
            daily_loss_so_far: dec!(0),
            weekly_loss_so_far: dec!(0),
        }
    }

    fn portfolio(user_id: Uuid, portfolio_id: Uuid) -> Portfolio {
        Portfolio {
            portfolio_id,
            user_id,
            total_capital: dec!(1_000_000),
            available_capital: dec!(500_000),
            reserved_capital: dec!(0),
            deployed_capital: dec!(0),
            max_symbol_weight: dec!(0.5),
            max_portfolio_log_loss: dec!(0.15),
            max_symbol_log_loss: dec!(0.08),
            current_log_return: dec!(0),
            peak_value: dec!(1_000_000),
            current_value: dec!(1_000_000),
        }
    }

    fn open_trade(symbol: &str, user_broker_id: Uuid, portfolio_id: Uuid) -> Trade {
        Trade {
            trade_id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            user_broker_id,
            portfolio_id,
            symbol: Symbol::from(symbol),
            direction: Direction::Buy,
            entry_price: dec!(2500),
            entry_qty: 10,
            entry_ts: Utc.with_ymd_and_hms(2026, 7, 20, 7, 0, 0).unwrap(),
            entry_effective_floor: dec!(2450),
            entry_effective_ceiling: dec!(2600),
            exit_target_price: Some(dec!(2550)),
            exit_target_fraction: Some(dec!(0.25)),
            trailing_active: false,
            trailing_highest_price: None,
            trailing_stop_price: None,
            status: TradeStatus::Open,
            closed_at: None,
            close_price: None,
        }
    }

    fn tick(symbol: &str, price: rust_decimal::Decimal, at: chrono::DateTime<Utc>) -> Tick {
        Tick {
            symbol: Symbol::from(symbol),
            last_price: price,
            bid: price,
            ask: price,
            volume: dec!(100),
            ts_ms: at.timestamp_millis(),
        }
    }

    async fn wired(symbol: &str) -> (ExitMonitor, Arc<InMemoryStore>, Trade) {
        let store = Arc::new(InMemoryStore::new());
        let user_broker_id = Uuid::new_v4();
        let portfolio_id = Uuid::new_v4();
        let b = broker(user_broker_id);
        store.seed_user_broker(b.clone());
        store.seed_portfolio(portfolio(b.user_id, portfolio_id));
        let trade = open_trade(symbol, user_broker_id, portfolio_id);
        store.seed_trade(trade.clone());

        let (partitions, _handles) = PartitionExecutor::spawn(4);
        let coordinator = Arc::new(ExitCoordinator::new(store.clone(), Arc::new(NullEventBus), partitions));
        let monitor = ExitMonitor::new(store.clone(), coordinator);
        (monitor, store, trade)
    }

    #[tokio::test]
    async fn target_hit_fires_an_exit_candidate() {
        let (monitor, _store, trade) = wired("RELIANCE").await;
        let at = Utc.with_ymd_and_hms(2026, 7, 28, 7, 0, 0).unwrap();
        let t = tick("RELIANCE", dec!(2555), at);
        monitor.on_tick(&t).await.unwrap();
        let _ = trade;
    }

    #[tokio::test]
    async fn price_short_of_every_threshold_does_not_fire() {
        let (monitor, _store, _trade) = wired("INFY").await;
        let at = Utc.with_ymd_and_hms(2026, 7, 28, 7, 0, 0).unwrap();
        let t = tick("INFY", dec!(2505), at);
        monitor.on_tick(&t).await.unwrap();
    }

    #[tokio::test]
    async fn stale_trade_past_max_hold_days_fires_time_based_exit() {
        let (monitor, _store, _trade) = wired("TCS").await;
        let at = Utc.with_ymd_and_hms(2026, 8, 25, 7, 0, 0).unwrap();
        let t = tick("TCS", dec!(2505), at);
        monitor.on_tick(&t).await.unwrap();
    }
}
