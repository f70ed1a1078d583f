//! Execution Orchestrator (§4.15).
//!
//! Turns one `CREATED` `SignalDelivery` into a placed order. The ten checks
//! run in a fixed order and the first failure wins, mirroring
//! `nse_signals::qualification::qualify`'s style: a check further down the
//! list (sizing, notional bounds, loss limits) is meaningless unless every
//! earlier one already passed. Fan-out across `M` signals × `N` EXEC brokers
//! is just `M×N` independent [`ExecutionOrchestrator::process_delivery`]
//! calls — parallelising that fan-out is the caller's concern, typically one
//! task per delivery on the engine's partition pool.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use nse_candles::cache::MarketDataCache;
use nse_core::config::ResolvedConfig;
use nse_core::model::{
    DeliveryStatus, IntentDecision, ProductType, RejectionReason, Signal, SignalDelivery, Trade,
    TradeIntent, TradeStatus, UserBroker,
};
use nse_risk::exits::{build_ladder, ExitLevel, ExitLevelKind};
use nse_risk::sizer::{calculate_add_size, size, SizingOutcome, SizingRequest};
use nse_risk::sizing::{atr, averaging_gate, TrueRangeInput};
use nse_risk::utility::{gate_passes, log_return_to_ceiling, log_return_to_floor};
use nse_store::event::{EventScope, EventType};
use nse_store::repository::{
    CandleRepository, MtfConfigRepository, PortfolioRepository, SignalDeliveryRepository,
    SignalRepository, Store, TradeIntentRepository, TradeRepository, UserBrokerRepository,
    WatchlistRepository,
};
use nse_store::traits::BrokerExecutor;
use nse_store::{EventBus, StoreError};
use rust_decimal::{Decimal, MathematicalOps};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ExecutionError;

/// Per-delivery validation timeout (§4.15): a validation that hasn't
/// resolved inside this window is rejected with `VALIDATION_TIMEOUT` rather
/// than left to hold up the caller indefinitely.
const VALIDATION_TIMEOUT: StdDuration = StdDuration::from_secs(5);

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum OrchestratorOutcome {
    Placed {
        intent_id: Uuid,
        trade_id: Uuid,
        broker_order_id: String,
    },
    Rejected {
        intent_id: Uuid,
        reason: RejectionReason,
    },
    Timeout {
        intent_id: Uuid,
    },
}

pub struct ExecutionOrchestrator {
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
    executor: Arc<dyn BrokerExecutor>,
    market_data: Arc<MarketDataCache>,
}

impl std::fmt::Debug for ExecutionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionOrchestrator").finish_non_exhaustive()
    }
}

impl ExecutionOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<dyn EventBus>,
        executor: Arc<dyn BrokerExecutor>,
        market_data: Arc<MarketDataCache>,
    ) -> Self {
        Self {
            store,
            bus,
            executor,
            market_data,
        }
    }

    /// Processes one `CREATED` delivery end to end: the 10-point validation
    /// (under the 5-second timeout), `TradeIntent` persistence, order
    /// placement on an approval, and the delivery's `CREATED → CONSUMED`
    /// transition — which happens exactly once an intent exists, win or
    /// lose (§4.15's "Delivery transitions: CREATED → CONSUMED once an
    /// intent exists").
    pub async fn process_delivery(
        &self,
        delivery: SignalDelivery,
    ) -> Result<OrchestratorOutcome, ExecutionError> {
        let intent_id = Uuid::new_v4();
        let now = Utc::now();

        let validated = match tokio::time::timeout(VALIDATION_TIMEOUT, self.validate(&delivery)).await
        {
            Ok(inner) => inner?,
            Err(_elapsed) => Err(RejectionReason::ValidationTimeout),
        };

        let sizing = match validated {
            Ok(sizing) => sizing,
            Err(reason) => {
                let intent = rejected_intent(intent_id, &delivery, reason, now);
                TradeIntentRepository::insert(self.store.as_ref(), intent).await?;
                self.consume_delivery(delivery, intent_id, now).await?;
                warn!(?reason, %intent_id, "trade intent rejected");
                return Ok(OrchestratorOutcome::Rejected { intent_id, reason });
            }
        };

        let mut intent = TradeIntent {
            intent_id,
            signal_id: delivery.signal_id,
            user_broker_id: delivery.user_broker_id,
            decision: IntentDecision::Approved,
            quantity: sizing.quantity,
            limiting_constraint: sizing.limiting_constraint,
            limit_price: None,
            product_type: ProductType::Intraday,
            errors: vec![],
            broker_order_id: None,
            created_at: now,
            placed_at: None,
            filled_at: None,
        };
        TradeIntentRepository::insert(self.store.as_ref(), intent.clone()).await?;

        let broker_order_id = self.executor.place_order(&intent).await?;
        let placed_at = Utc::now();
        intent.broker_order_id = Some(broker_order_id.clone());
        intent.placed_at = Some(placed_at);
        intent.filled_at = Some(placed_at);
        TradeIntentRepository::update(self.store.as_ref(), intent.clone()).await?;

        let signal = SignalRepository::find_by_id(self.store.as_ref(), delivery.signal_id)
            .await?
            .ok_or_else(|| ExecutionError::missing("signal", delivery.signal_id))?;
        let portfolio = self
            .store
            .find_by_user_id(delivery.user_id)
            .await?
            .ok_or_else(|| ExecutionError::missing("portfolio", delivery.user_id))?;

        let global = MtfConfigRepository::global(self.store.as_ref()).await?;
        let over = MtfConfigRepository::symbol_override(self.store.as_ref(), &signal.symbol).await?;
        let exit_cfg = ResolvedConfig::resolve(&global, over.as_ref());

        let trade_id = Uuid::new_v4();
        let exit_target = Self::exit_target(&signal, &exit_cfg);
        let trade = Trade {
            trade_id,
            signal_id: delivery.signal_id,
            user_broker_id: delivery.user_broker_id,
            portfolio_id: portfolio.portfolio_id,
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            entry_price: signal.reference_price,
            entry_qty: sizing.quantity,
            entry_ts: placed_at,
            entry_effective_floor: signal.effective_floor,
            entry_effective_ceiling: signal.effective_ceiling,
            exit_target_price: exit_target.as_ref().map(|level| level.price),
            exit_target_fraction: exit_target.as_ref().map(|level| level.fraction),
            trailing_active: false,
            trailing_highest_price: None,
            trailing_stop_price: None,
            status: TradeStatus::Open,
            closed_at: None,
            close_price: None,
        };
        TradeRepository::insert(self.store.as_ref(), trade).await?;

        self.bus
            .emit(
                EventScope::UserBroker(delivery.user_broker_id),
                EventType::TradeCreated,
                serde_json::json!({
                    "trade_id": trade_id,
                    "intent_id": intent_id,
                    "symbol": signal.symbol.as_str(),
                    "quantity": sizing.quantity,
                }),
                "execution_orchestrator",
            )
            .await;

        self.consume_delivery(delivery, intent_id, placed_at).await?;
        info!(%trade_id, %intent_id, "order placed and trade opened");
        Ok(OrchestratorOutcome::Placed {
            intent_id,
            trade_id,
            broker_order_id,
        })
    }

    async fn consume_delivery(
        &self,
        mut delivery: SignalDelivery,
        intent_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), ExecutionError> {
        delivery.status = DeliveryStatus::Consumed;
        delivery.intent_id = Some(intent_id);
        delivery.consumed_at = Some(at);
        SignalDeliveryRepository::update(self.store.as_ref(), delivery).await?;
        Ok(())
    }

    /// Runs the ten checks in order. The outer `Result` carries genuine
    /// invariant violations (a delivery whose broker/portfolio/signal FK
    /// target has vanished); the inner one is the first failing gate, or the
    /// sizing outcome if every gate passed.
    async fn validate(
        &self,
        delivery: &SignalDelivery,
    ) -> Result<Result<SizingOutcome, RejectionReason>, ExecutionError> {
        let user_broker = UserBrokerRepository::find_by_id(self.store.as_ref(), delivery.user_broker_id)
            .await?
            .ok_or_else(|| ExecutionError::missing("user_broker", delivery.user_broker_id))?;
        let portfolio = self
            .store
            .find_by_user_id(delivery.user_id)
            .await?
            .ok_or_else(|| ExecutionError::missing("portfolio", delivery.user_id))?;
        let signal = SignalRepository::find_by_id(self.store.as_ref(), delivery.signal_id)
            .await?
            .ok_or_else(|| ExecutionError::missing("signal", delivery.signal_id))?;

        // 1. Broker usable.
        if !user_broker.enabled {
            return Ok(Err(RejectionReason::BrokerDisabled));
        }
        if !user_broker.connected {
            return Ok(Err(RejectionReason::BrokerDisconnected));
        }

        // 2. Symbol watchlisted.
        if !WatchlistRepository::contains(self.store.as_ref(), &signal.symbol).await? {
            return Ok(Err(RejectionReason::SymbolNotWatchlisted));
        }

        let global = MtfConfigRepository::global(self.store.as_ref()).await?;
        let over = MtfConfigRepository::symbol_override(self.store.as_ref(), &signal.symbol).await?;
        let cfg = ResolvedConfig::resolve(&global, over.as_ref());

        // 3. Confluence requirement.
        if signal.confluence_type < cfg.min_confluence_type {
            return Ok(Err(RejectionReason::ConfluenceNotMet));
        }

        // 4. p_win floor.
        if signal.p_win < cfg.min_p_win_orchestrator {
            return Ok(Err(RejectionReason::PWinTooLow));
        }

        // 5. Kelly floor.
        if signal.kelly < cfg.min_kelly_orchestrator {
            return Ok(Err(RejectionReason::KellyTooLow));
        }

        // 6. Sizing (§4.10), including the upstream utility gate and, for an
        // add, the averaging gate.
        let sizing = match self.size_candidate(&signal, &user_broker, &portfolio, &cfg).await? {
            Ok(sizing) => sizing,
            Err(reason) => return Ok(Err(reason)),
        };

        // 7. qty >= 1.
        if sizing.quantity < 1 {
            return Ok(Err(RejectionReason::QuantityBelowMinimum));
        }

        let notional = Decimal::from(sizing.quantity) * signal.reference_price;

        // 8. value >= min_notional.
        if notional < cfg.min_notional {
            return Ok(Err(RejectionReason::NotionalBelowMinimum));
        }

        // 9. value <= user.max_per_trade.
        if notional > user_broker.max_per_trade {
            return Ok(Err(RejectionReason::NotionalAboveUserMax));
        }

        // 10. Daily/weekly loss limits.
        if user_broker.daily_loss_so_far >= user_broker.daily_loss_limit {
            return Ok(Err(RejectionReason::DailyLossLimitBreached));
        }
        if user_broker.weekly_loss_so_far >= user_broker.weekly_loss_limit {
            return Ok(Err(RejectionReason::WeeklyLossLimitBreached));
        }

        Ok(Ok(sizing))
    }

    /// Builds the sizing request from the signal, the account, and the
    /// current open positions, runs the utility gate (the sizer's implicit
    /// seventh constraint) and, if this would be an add, the averaging gate,
    /// and returns whichever of `size`/`calculate_add_size` applies.
    async fn size_candidate(
        &self,
        signal: &Signal,
        user_broker: &UserBroker,
        portfolio: &nse_core::model::Portfolio,
        cfg: &ResolvedConfig,
    ) -> Result<Result<SizingOutcome, RejectionReason>, ExecutionError> {
        let entry = signal.reference_price;

        let max_drop = match self.atr_daily(&signal.symbol).await? {
            Some(v) if v > Decimal::ZERO => v,
            // Without a usable ATR there's no basis for a quantity; treated
            // the same as the check at point 7 would treat a zero-size
            // sizer outcome.
            _ => return Ok(Err(RejectionReason::QuantityBelowMinimum)),
        };

        let Some(pi) = log_return_to_ceiling(entry, signal.effective_ceiling) else {
            return Ok(Err(RejectionReason::UtilityGateFailed));
        };
        let Some(ell) = log_return_to_floor(entry, signal.effective_floor) else {
            return Ok(Err(RejectionReason::UtilityGateFailed));
        };

        if cfg.utility_gate_enabled {
            match gate_passes(signal.p_win, pi, ell, cfg) {
                Some(true) => {}
                _ => return Ok(Err(RejectionReason::UtilityGateFailed)),
            }
        }

        let open_trades = TradeRepository::find_open_by_symbol(self.store.as_ref(), &signal.symbol).await?;
        let same_account: Vec<&Trade> = open_trades
            .iter()
            .filter(|t| t.user_broker_id == user_broker.user_broker_id)
            .collect();
        let existing_qty: i64 = same_account.iter().map(|t| t.entry_qty).sum();
        let existing_avg = if existing_qty > 0 {
            let total_cost: Decimal = same_account
                .iter()
                .map(|t| t.entry_price * Decimal::from(t.entry_qty))
                .sum();
            total_cost / Decimal::from(existing_qty)
        } else {
            Decimal::ZERO
        };

        let portfolio_trades =
            TradeRepository::find_by_portfolio_id(self.store.as_ref(), portfolio.portfolio_id).await?;
        let portfolio_log_return_current = self.log_return_sum(&portfolio_trades, None);
        let symbol_log_return_current = self.log_return_sum(&portfolio_trades, Some(&signal.symbol));

        let req = SizingRequest {
            entry,
            ceiling: signal.effective_ceiling,
            floor: signal.effective_floor,
            max_drop,
            ell,
            p_fill: signal.p_fill,
            strength: signal.strength,
            velocity: self.velocity(&signal.symbol, max_drop, portfolio, cfg).await,
            existing_qty,
            existing_avg,
            max_per_trade: user_broker.max_per_trade,
            available_capital: portfolio.available_capital,
            kelly_fraction_cfg: cfg.kelly_fraction,
            max_kelly_multiplier: cfg.max_kelly_multiplier,
            max_position_log_loss: cfg.max_position_log_loss,
            portfolio_log_return_current,
            max_portfolio_log_loss: cfg.max_portfolio_log_loss,
            symbol_log_return_current,
            max_symbol_log_loss: cfg.max_symbol_log_loss,
        };

        if existing_qty > 0 {
            let fills: Vec<Decimal> = same_account.iter().map(|t| t.entry_price).collect();
            let price_market = self
                .market_data
                .latest(&signal.symbol)
                .map(|t| t.last_price)
                .unwrap_or(entry);
            let gate = averaging_gate(
                &fills,
                price_market,
                entry,
                max_drop,
                cfg.min_reentry_spacing_atr_multiplier,
            );
            if !gate.passed {
                return Ok(Err(RejectionReason::AveragingGateFailed));
            }
            Ok(Ok(calculate_add_size(&req)))
        } else {
            Ok(Ok(size(&req)))
        }
    }

    /// Runs the §4.11 exit ladder builder against the signal's per-TF zone
    /// ceilings and picks out the `TARGET` rung's price and fraction, which
    /// the exit monitor's `check_exit` and the exit coordinator's partial
    /// sizing compare `Trade::exit_target_price`/`exit_target_fraction`
    /// against. `None` only if the ladder's merge step folded `TARGET` into
    /// a neighbouring rung because it fell within `MERGE_THRESHOLD_PCT` of
    /// it, in which case the merged rung — not this trade — carries the
    /// price that matters, and no plain target level should fire on its own.
    fn exit_target(signal: &Signal, cfg: &ResolvedConfig) -> Option<ExitLevel> {
        let entry = signal.reference_price;
        let risk_per_share = entry * cfg.min_profit_pct;
        let ladder = build_ladder(
            signal.direction,
            entry,
            risk_per_share,
            signal.ltf.zone.sell_zone_bottom,
            signal.itf.zone.sell_zone_bottom,
            signal.htf.zone.sell_zone_bottom,
            cfg,
        );
        ladder.into_iter().find(|level| level.kind == ExitLevelKind::Target)
    }

    /// `Σ direction-signed ln(current/entry)` over a set of open trades,
    /// optionally filtered to one symbol, per §4.9's portfolio/symbol
    /// headroom definition. Uses the live market-data cache for `current`,
    /// falling back to the trade's own entry price (a zero contribution)
    /// when no tick has arrived yet.
    fn log_return_sum(&self, trades: &[Trade], filter_symbol: Option<&nse_core::model::Symbol>) -> Decimal {
        let mut total = Decimal::ZERO;
        for trade in trades {
            if let Some(symbol) = filter_symbol {
                if &trade.symbol != symbol {
                    continue;
                }
            }
            let current = self
                .market_data
                .latest(&trade.symbol)
                .map(|tick| tick.last_price)
                .unwrap_or(trade.entry_price);
            if trade.entry_price <= Decimal::ZERO {
                continue;
            }
            if let Some(r) = (current / trade.entry_price).checked_ln() {
                total += Decimal::from(trade.direction.sign()) * r;
            }
        }
        total
    }

    /// Wilder-smoothed ATR (§4.9) over the most recent DAILY candles.
    async fn atr_daily(&self, symbol: &nse_core::model::Symbol) -> Result<Option<Decimal>, ExecutionError> {
        let candles = CandleRepository::get_recent(
            self.store.as_ref(),
            symbol,
            nse_core::clock::Timeframe::Daily,
            15,
        )
        .await?;
        if candles.len() < 2 {
            return Ok(None);
        }
        let mut bars = Vec::with_capacity(candles.len());
        for (idx, candle) in candles.iter().enumerate() {
            let prev_close = if idx == 0 {
                candle.close
            } else {
                candles[idx - 1].close
            };
            bars.push(TrueRangeInput {
                high: candle.high,
                low: candle.low,
                prev_close,
            });
        }
        Ok(atr(&bars))
    }

    /// Final velocity `V` (§4.9): range regime over LTF candles, penalised
    /// by body ratio and the portfolio's stress drawdown. Missing LTF
    /// history or a degenerate ATR both fall back to the neutral `1.0` —
    /// the orchestrator has already confirmed a usable daily ATR via
    /// `max_drop` by the time this runs, so this only governs how much the
    /// Kelly fraction gets throttled, never whether sizing runs at all.
    async fn velocity(
        &self,
        symbol: &nse_core::model::Symbol,
        daily_atr: Decimal,
        portfolio: &nse_core::model::Portfolio,
        cfg: &ResolvedConfig,
    ) -> Decimal {
        use nse_risk::sizing::{
            body_ratio_penalty, ema, final_velocity, range_to_atr, stress_throttle, velocity_base_multiplier,
            velocity_regime,
        };

        let ltf = match CandleRepository::get_recent(
            self.store.as_ref(),
            symbol,
            nse_core::clock::Timeframe::M1,
            cfg.range_lookback_bars,
        )
        .await
        {
            Ok(candles) if !candles.is_empty() => candles,
            _ => return Decimal::ONE,
        };

        let highs: Vec<Decimal> = ltf.iter().map(|c| c.high).collect();
        let lows: Vec<Decimal> = ltf.iter().map(|c| c.low).collect();
        let Some(range_atr) = range_to_atr(&highs, &lows, daily_atr) else {
            return Decimal::ONE;
        };
        let regime = velocity_regime(
            range_atr,
            cfg.range_atr_threshold_wide,
            cfg.range_atr_threshold_healthy,
            cfg.range_atr_threshold_tight,
        );
        let v_base = velocity_base_multiplier(
            regime,
            cfg.velocity_multiplier_wide,
            cfg.velocity_multiplier_healthy,
            cfg.velocity_multiplier_tight,
            cfg.velocity_multiplier_min,
        );

        let bodies: Vec<Decimal> = ltf.iter().map(|c| (c.close - c.open).abs()).collect();
        let body_ratio = ema(&bodies, 15)
            .map(|b| if daily_atr > Decimal::ZERO { b / daily_atr } else { Decimal::ZERO })
            .unwrap_or(Decimal::ZERO);
        let body_penalty = body_ratio_penalty(
            body_ratio,
            cfg.body_ratio_threshold_low,
            cfg.body_ratio_threshold_critical,
            cfg.body_ratio_penalty_low,
            cfg.body_ratio_penalty_critical,
        );

        let drawdown = if portfolio.peak_value > Decimal::ZERO {
            (portfolio.current_value - portfolio.peak_value) / portfolio.peak_value
        } else {
            Decimal::ZERO
        };
        let throttle = stress_throttle(drawdown, cfg.max_stress_drawdown, cfg.stress_throttle_enabled);

        final_velocity(v_base, body_penalty, throttle)
    }
}

fn rejected_intent(
    intent_id: Uuid,
    delivery: &SignalDelivery,
    reason: RejectionReason,
    now: DateTime<Utc>,
) -> TradeIntent {
    TradeIntent {
        intent_id,
        signal_id: delivery.signal_id,
        user_broker_id: delivery.user_broker_id,
        decision: IntentDecision::Rejected,
        quantity: 0,
        limiting_constraint: None,
        limit_price: None,
        product_type: ProductType::Intraday,
        errors: vec![reason],
        broker_order_id: None,
        created_at: now,
        placed_at: None,
        filled_at: None,
    }
}
