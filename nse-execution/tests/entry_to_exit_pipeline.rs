//! Full pipeline integration test: a detected confluence signal fans out to
//! a delivery, the orchestrator sizes and places an order, and the exit
//! monitor later detects and routes a target hit for the resulting trade.
//!
//! This is scenario 1 of the spec's end-to-end scenarios followed through
//! to a target-hit exit, exercised against `InMemoryStore` the way the
//! teacher's `core/tests` crate drives its engine with a mock exchange.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use nse_candles::cache::MarketDataCache;
use nse_core::model::{
    BrokerRole, Candle, ConfluenceType, DeliveryStatus, Direction, Portfolio, Strength, Symbol,
    Tick, TimeframeIndicator, TradeIntent, TradeStatus, UserBroker, Zone,
};
use nse_core::partition::PartitionExecutor;
use nse_execution::monitor::ExitMonitor;
use nse_execution::orchestrator::{ExecutionOrchestrator, OrchestratorOutcome};
use nse_signals::delivery_index::SignalDeliveryIndex;
use nse_signals::entry::{EntryCoordinator, EntryOutcome, SignalCandidate};
use nse_signals::exit::ExitCoordinator;
use nse_store::event::NullEventBus;
use nse_store::memory::InMemoryStore;
use nse_store::repository::{CandleRepository, SignalDeliveryRepository, Store, TradeRepository};
use nse_store::traits::BrokerExecutor;
use nse_store::StoreError;
use rust_decimal_macros::dec;
use uuid::Uuid;

struct StubExecutor;

#[async_trait]
impl BrokerExecutor for StubExecutor {
    async fn place_order(&self, intent: &TradeIntent) -> Result<String, StoreError> {
        Ok(format!("ORD-{}", intent.intent_id))
    }
}

fn noon() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 28, 7, 0, 0).unwrap()
}

fn daily_candles(symbol: &str) -> Vec<Candle> {
    (0..16)
        .map(|i| Candle {
            symbol: Symbol::from(symbol),
            timeframe: nse_core::clock::Timeframe::Daily,
            open: dec!(2480) + rust_decimal::Decimal::from(i),
            high: dec!(2520) + rust_decimal::Decimal::from(i),
            low: dec!(2460) + rust_decimal::Decimal::from(i),
            close: dec!(2490) + rust_decimal::Decimal::from(i),
            volume: dec!(1000),
            open_ts: noon() - Duration::days(16 - i),
            close_ts: noon() - Duration::days(16 - i) + Duration::minutes(375),
        })
        .collect()
}

fn broker() -> UserBroker {
    UserBroker {
        user_broker_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        role: BrokerRole::Exec,
        enabled: true,
        connected: true,
        max_per_trade: dec!(500_000),
        daily_loss_limit: dec!(10_000),
        weekly_loss_limit: dec!(30_000),
        daily_loss_so_far: dec!(0),
        weekly_loss_so_far: dec!(0),
    }
}

fn portfolio(user_id: Uuid) -> Portfolio {
    Portfolio {
        portfolio_id: Uuid::new_v4(),
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

fn triple_confluence_candidate(symbol: &str) -> SignalCandidate {
    // Price 2512.30 sits inside every buy zone (§8 scenario 1).
    let zone = Zone::from_extrema(dec!(2450), dec!(2600), dec!(0.5));
    SignalCandidate {
        symbol: Symbol::from(symbol),
        direction: Direction::Buy,
        htf: TimeframeIndicator { in_zone: true, zone },
        itf: TimeframeIndicator { in_zone: true, zone },
        ltf: TimeframeIndicator { in_zone: true, zone },
        confluence_type: ConfluenceType::Triple,
        confluence_score: dec!(1.0),
        strength: Strength::Strong,
        confluence_passed: true,
        p_win: dec!(0.72),
        p_fill: dec!(0.9),
        kelly: dec!(0.2),
        reference_price: dec!(2512.30),
        effective_floor: dec!(2450),
        effective_ceiling: dec!(2600),
        detected_at: noon(),
    }
}

#[tokio::test]
async fn detected_signal_places_an_order_and_the_exit_monitor_later_catches_the_target() {
    let store = Arc::new(InMemoryStore::new());
    let symbol = "RELIANCE";
    store.seed_watchlist([Symbol::from(symbol)]);
    let b = broker();
    store.seed_user_broker(b.clone());
    store.seed_portfolio(portfolio(b.user_id));
    for candle in daily_candles(symbol) {
        CandleRepository::persist(store.as_ref(), candle).await.unwrap();
    }

    // 1. Entry: a triple-confluence candidate is detected and published.
    let (entry_partitions, _entry_handles) = PartitionExecutor::spawn(4);
    let entry_coordinator = EntryCoordinator::new(
        store.clone(),
        Arc::new(NullEventBus),
        entry_partitions,
        Arc::new(SignalDeliveryIndex::new()),
    );
    let outcome = entry_coordinator
        .on_signal_detected(triple_confluence_candidate(symbol))
        .await
        .unwrap();
    let EntryOutcome::Published(signal_id) = outcome else {
        panic!("expected the candidate to publish, got {outcome:?}");
    };

    let deliveries = SignalDeliveryRepository::find_by_signal(store.as_ref(), signal_id)
        .await
        .unwrap();
    assert_eq!(deliveries.len(), 1, "one delivery per enabled EXEC broker");
    assert_eq!(deliveries[0].status, DeliveryStatus::Created);

    // 2. Orchestrator: the delivery is sized, qualified and placed.
    let orchestrator = ExecutionOrchestrator::new(
        store.clone(),
        Arc::new(NullEventBus),
        Arc::new(StubExecutor),
        Arc::new(MarketDataCache::new()),
    );
    let placed = orchestrator
        .process_delivery(deliveries.into_iter().next().unwrap())
        .await
        .unwrap();
    let OrchestratorOutcome::Placed { trade_id, .. } = placed else {
        panic!("expected the delivery to place an order, got {placed:?}");
    };

    let trade = TradeRepository::find_by_id(store.as_ref(), trade_id)
        .await
        .unwrap()
        .expect("trade persisted");
    assert_eq!(trade.status, TradeStatus::Open);
    assert_eq!(trade.symbol, Symbol::from(symbol));

    // 3. Exit monitor: a tick at the target price detects and routes the exit.
    let (exit_partitions, _exit_handles) = PartitionExecutor::spawn(4);
    let exit_coordinator = Arc::new(ExitCoordinator::new(
        store.clone(),
        Arc::new(NullEventBus),
        exit_partitions,
    ));
    let monitor = ExitMonitor::new(store.clone(), exit_coordinator);

    let target = trade.exit_target_price.expect("sized trade carries a target");
    let tick = Tick {
        symbol: Symbol::from(symbol),
        last_price: target + dec!(1),
        bid: target,
        ask: target + dec!(1),
        volume: dec!(500),
        ts_ms: (trade.entry_ts + Duration::minutes(5)).timestamp_millis(),
    };
    monitor.on_tick(&tick).await.unwrap();

    // The monitor hands off to the exit coordinator's partition queue
    // asynchronously; give it a moment to land before asserting.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let exit_signals = nse_store::repository::ExitSignalRepository::find_by_trade_id(
        store.as_ref(),
        trade.trade_id,
    )
    .await
    .unwrap();
    assert!(
        !exit_signals.is_empty(),
        "expected the target-hit tick to produce a detected exit signal"
    );
}
