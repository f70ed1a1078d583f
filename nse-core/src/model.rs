//! Shared domain model.
//!
//! Every quantity that is a price, a ratio/log-return, a quantity or money is
//! [`rust_decimal::Decimal`], never a float: the spec requires exact decimal
//! arithmetic throughout. All timestamps are [`chrono::DateTime<Utc>`]
//! instants; session alignment lives in [`crate::clock`].

use crate::clock::Timeframe;
use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use uuid::Uuid;

/// A cheap-to-copy NSE trading symbol, e.g. `RELIANCE` or `INFY`.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, From, Serialize, Deserialize,
)]
pub struct Symbol(pub SmolStr);

impl Symbol {
    pub fn new(s: impl Into<SmolStr>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self(SmolStr::new(value))
    }
}

/// Trade direction. `SELL` is only ever an exit/short context in this
/// engine; the core does not originate short-entry signals, but the type is
/// bidirectional so exit logic can be direction-aware per the spec.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// `+1` for `Buy`, `-1` for `Sell`; used to make comparisons
    /// direction-aware without branching at every call site.
    pub fn sign(self) -> i64 {
        match self {
            Direction::Buy => 1,
            Direction::Sell => -1,
        }
    }

    pub fn is_long(self) -> bool {
        matches!(self, Direction::Buy)
    }
}

/// An immutable, ingest-validated market tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: Symbol,
    pub last_price: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub volume: Decimal,
    pub ts_ms: i64,
}

impl Tick {
    pub fn ts(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.ts_ms).expect("valid tick timestamp")
    }
}

/// Reason a tick was rejected at ingest.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum TickRejection {
    NonPositivePrice,
    NegativeVolume,
    OutsideSession,
}

/// An immutable closed candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub open_ts: DateTime<Utc>,
    pub close_ts: DateTime<Utc>,
}

impl Candle {
    /// Checks the invariants the spec requires of every closed candle (P1).
    pub fn is_valid(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.low <= self.high
            && self.close_ts - self.open_ts == chrono::Duration::minutes(self.timeframe.minutes())
    }
}

/// A mutable, single-writer-owned in-progress candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialCandle {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub open_ts: DateTime<Utc>,
    pub last_tick_ts: DateTime<Utc>,
}

impl PartialCandle {
    pub fn open_at(symbol: Symbol, timeframe: Timeframe, open_ts: DateTime<Utc>, price: Decimal, volume: Decimal, tick_ts: DateTime<Utc>) -> Self {
        Self {
            symbol,
            timeframe,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
            open_ts,
            last_tick_ts: tick_ts,
        }
    }

    pub fn apply_tick(&mut self, price: Decimal, volume: Decimal, tick_ts: DateTime<Utc>) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += volume;
        if tick_ts > self.last_tick_ts {
            self.last_tick_ts = tick_ts;
        }
    }

    /// Rolls a finer-timeframe closed candle up into this (coarser) partial.
    pub fn merge_candle(&mut self, candle: &Candle) {
        self.high = self.high.max(candle.high);
        self.low = self.low.min(candle.low);
        self.close = candle.close;
        self.volume += candle.volume;
        if candle.close_ts > self.last_tick_ts {
            self.last_tick_ts = candle.close_ts;
        }
    }

    /// Closes this partial into an immutable [`Candle`].
    pub fn close(&self, close_ts: DateTime<Utc>) -> Candle {
        Candle {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            open_ts: self.open_ts,
            close_ts,
        }
    }
}

/// A buy-zone / sell-zone derived from a timeframe's lookback candles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub low: Decimal,
    pub high: Decimal,
    pub buy_zone_top: Decimal,
    pub sell_zone_bottom: Decimal,
}

impl Zone {
    pub fn from_extrema(low: Decimal, high: Decimal, buy_zone_pct: Decimal) -> Self {
        let range = high - low;
        Self {
            low,
            high,
            buy_zone_top: low + range * buy_zone_pct,
            sell_zone_bottom: high - range * buy_zone_pct,
        }
    }

    pub fn contains_buy(&self, price: Decimal) -> bool {
        self.low <= price && price <= self.buy_zone_top
    }
}

/// Result of the zone detector: either a computed zone, or an explicit
/// "not enough history yet" outcome (never an exception).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ZoneResult {
    Zone(Zone),
    Insufficient { have: usize, need: usize },
}

/// Confluence type: how many timeframes, starting from HTF, are in their
/// buy zone simultaneously.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum ConfluenceType {
    None,
    Single,
    Double,
    Triple,
}

/// Qualitative strength bucket mapped from the composite confluence score.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum Strength {
    VeryStrong,
    Strong,
    Moderate,
    Weak,
}

impl Strength {
    /// Sizing multiplier applied during the Kelly constraint, per §4.10.
    pub fn multiplier(self) -> Decimal {
        match self {
            Strength::VeryStrong => Decimal::new(120, 2),
            Strength::Strong => Decimal::new(100, 2),
            Strength::Moderate => Decimal::new(75, 2),
            Strength::Weak => Decimal::new(50, 2),
        }
    }
}

/// The named constraint that produced the minimum quantity in the position
/// sizer, or a terminal zero-quantity reason from an upstream gate.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum ConstraintKind {
    LogSafe,
    Kelly,
    Fill,
    Capital,
    PortfolioBudget,
    SymbolBudget,
}

/// Every typed rejection reason code surfaced on an `Intent`/`ExitIntent` or
/// an emitted event, per the spec's error-handling design (§7: "every
/// rejection path emits a corresponding event with `reason` populated").
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    UtilityGateFailed,
    AveragingGateFailed,
    ExitCooldownActive,
    ValidationTimeout,
    BrokerDisabled,
    BrokerDisconnected,
    SymbolNotWatchlisted,
    ConfluenceNotMet,
    PWinTooLow,
    KellyTooLow,
    QuantityBelowMinimum,
    NotionalBelowMinimum,
    NotionalAboveUserMax,
    DailyLossLimitBreached,
    WeeklyLossLimitBreached,
    TradeNotOpen,
    BrickMovementTooSmall,
    PortfolioExposureExceeded,
}

/// Entry-signal lifecycle state.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum SignalStatus {
    Detected,
    Published,
    Expired,
    Cancelled,
    Superseded,
}

/// Per-timeframe in-zone indicator snapshot recorded on a published signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeframeIndicator {
    pub in_zone: bool,
    pub zone: Zone,
}

/// An immutable-once-published entry signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: Uuid,
    pub symbol: Symbol,
    pub direction: Direction,
    pub htf: TimeframeIndicator,
    pub itf: TimeframeIndicator,
    pub ltf: TimeframeIndicator,
    pub confluence_type: ConfluenceType,
    pub confluence_score: Decimal,
    pub strength: Strength,
    pub p_win: Decimal,
    pub p_fill: Decimal,
    pub kelly: Decimal,
    pub reference_price: Decimal,
    pub effective_floor: Decimal,
    pub effective_ceiling: Decimal,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SignalStatus,
    pub version: u32,
}

impl Signal {
    /// Dedupe tuple enforced by the store's unique index (§6).
    pub fn dedupe_key(&self) -> (Symbol, ConfluenceType, chrono::NaiveDate, Decimal, Decimal) {
        (
            self.symbol.clone(),
            self.confluence_type,
            self.generated_at.date_naive(),
            self.effective_floor,
            self.effective_ceiling,
        )
    }
}

/// Delivery lifecycle state, per user-broker.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Created,
    Delivered,
    Consumed,
    Expired,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDelivery {
    pub delivery_id: Uuid,
    pub signal_id: Uuid,
    pub user_broker_id: Uuid,
    pub user_id: Uuid,
    pub status: DeliveryStatus,
    pub intent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub user_action_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum IntentDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum ProductType {
    Intraday,
    Delivery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub intent_id: Uuid,
    pub signal_id: Uuid,
    pub user_broker_id: Uuid,
    pub decision: IntentDecision,
    pub quantity: i64,
    pub limiting_constraint: Option<ConstraintKind>,
    pub limit_price: Option<Decimal>,
    pub product_type: ProductType,
    pub errors: Vec<RejectionReason>,
    pub broker_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub placed_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: Uuid,
    pub signal_id: Uuid,
    pub user_broker_id: Uuid,
    pub portfolio_id: Uuid,
    pub symbol: Symbol,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub entry_qty: i64,
    pub entry_ts: DateTime<Utc>,
    pub entry_effective_floor: Decimal,
    pub entry_effective_ceiling: Decimal,
    pub exit_target_price: Option<Decimal>,
    /// Fraction of `entry_qty` to close when `exit_target_price` is hit;
    /// `None` means the target rung didn't survive ladder construction and
    /// a target hit should close the full remaining position.
    pub exit_target_fraction: Option<Decimal>,
    pub trailing_active: bool,
    pub trailing_highest_price: Option<Decimal>,
    pub trailing_stop_price: Option<Decimal>,
    pub status: TradeStatus,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_price: Option<Decimal>,
}

/// Detected-exit reason, in the priority order the exit monitor evaluates
/// them: `TrailingStop` > `TargetHit` > `StopLoss` > `TimeBased`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    TrailingStop,
    TargetHit,
    StopLoss,
    TimeBased,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum ExitSignalStatus {
    Detected,
    Confirmed,
    Published,
    Executed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitSignal {
    pub exit_signal_id: Uuid,
    pub trade_id: Uuid,
    pub symbol: Symbol,
    pub direction: Direction,
    pub reason: ExitReason,
    pub exit_price: Decimal,
    pub brick_movement: Decimal,
    pub favorable_movement: bool,
    pub episode_id: i64,
    pub status: ExitSignalStatus,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum ExitIntentStatus {
    Approved,
    Rejected,
    Placed,
    Filled,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitIntent {
    pub exit_intent_id: Uuid,
    pub exit_signal_id: Option<Uuid>,
    pub trade_id: Uuid,
    pub user_broker_id: Uuid,
    pub reason: ExitReason,
    pub episode_id: i64,
    pub status: ExitIntentStatus,
    pub qualification_errors: Vec<RejectionReason>,
    pub calculated_qty: i64,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub portfolio_id: Uuid,
    pub user_id: Uuid,
    pub total_capital: Decimal,
    pub available_capital: Decimal,
    pub reserved_capital: Decimal,
    pub deployed_capital: Decimal,
    pub max_symbol_weight: Decimal,
    pub max_portfolio_log_loss: Decimal,
    pub max_symbol_log_loss: Decimal,
    pub current_log_return: Decimal,
    pub peak_value: Decimal,
    pub current_value: Decimal,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum BrokerRole {
    Data,
    Exec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBroker {
    pub user_broker_id: Uuid,
    pub user_id: Uuid,
    pub role: BrokerRole,
    pub enabled: bool,
    pub connected: bool,
    pub max_per_trade: Decimal,
    pub daily_loss_limit: Decimal,
    pub weekly_loss_limit: Decimal,
    pub daily_loss_so_far: Decimal,
    pub weekly_loss_so_far: Decimal,
}

/// Tier tag accompanying a last-price lookup from the market-data cache.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum PriceTier {
    Live,
    PrevDayClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricedTier {
    pub price: Decimal,
    pub tier: PriceTier,
}
