//! Sizing Primitives (§4.9).
//!
//! Pure functions returning either a scalar constraint or a small result
//! record. Every quantity here is a [`Decimal`]; integer quantities are
//! represented as `i64` and always produced by explicit `floor`/truncation,
//! never by rounding.

use nse_core::model::Direction;
use rust_decimal::{Decimal, MathematicalOps};

const P_WIN_FLOOR: Decimal = Decimal::from_parts(10, 0, 0, false, 2); // 0.10
const P_WIN_CEIL: Decimal = Decimal::from_parts(90, 0, 0, false, 2); // 0.90

fn clamp(value: Decimal, lo: Decimal, hi: Decimal) -> Decimal {
    value.max(lo).min(hi)
}

fn decimal_from_i64(q: i64) -> Decimal {
    Decimal::from(q)
}

fn floor_to_i64(value: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;
    value.floor().to_i64().unwrap_or(0).max(0)
}

/// Zone-based `p_win`: the fraction of the combined floor/ceiling distance
/// (measured in `max_drop` units, "zones") that lies on the ceiling side.
pub fn kelly_p_win(entry: Decimal, ceiling: Decimal, floor: Decimal, max_drop: Decimal) -> Decimal {
    if max_drop <= Decimal::ZERO {
        return clamp(Decimal::new(5, 1), P_WIN_FLOOR, P_WIN_CEIL);
    }
    let zones_to_ceiling = (ceiling - entry) / max_drop;
    let zones_to_floor = (entry - floor) / max_drop;
    let denom = zones_to_ceiling + zones_to_floor;
    let raw = if denom == Decimal::ZERO {
        Decimal::new(5, 1)
    } else {
        zones_to_ceiling / denom
    };
    clamp(raw, P_WIN_FLOOR, P_WIN_CEIL)
}

/// `kelly = max(0, (p·b − (1−p)) / b)`, clamped to `[0, 1]`, with
/// `b = (ceiling − entry) / (entry − floor)`.
pub fn kelly_fraction(p_win: Decimal, entry: Decimal, ceiling: Decimal, floor: Decimal) -> Decimal {
    let denom = entry - floor;
    if denom <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let b = (ceiling - entry) / denom;
    if b <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let raw = (p_win * b - (Decimal::ONE - p_win)) / b;
    clamp(raw, Decimal::ZERO, Decimal::ONE)
}

/// Largest integer `q` such that averaging `q` more shares at `entry` into
/// an existing `(existing_qty, existing_avg)` position keeps the resulting
/// average cost within `exp(|max_position_log_loss|)` of `floor`, and such
/// that `q·entry ≤ cap_sym`. Solved by monotonic binary search over `q`, per
/// the spec.
pub fn max_log_safe_qty(
    existing_qty: i64,
    existing_avg: Decimal,
    entry: Decimal,
    floor: Decimal,
    max_position_log_loss: Decimal,
    cap_sym: Decimal,
) -> i64 {
    let Some(growth) = max_position_log_loss.abs().checked_exp() else {
        return 0;
    };
    let max_avg_cost = floor * growth;

    let q_cap = if entry > Decimal::ZERO {
        floor_to_i64(cap_sym / entry)
    } else {
        0
    };
    if q_cap == 0 {
        return 0;
    }

    let predicate = |q: i64| -> bool {
        if q == 0 {
            return true;
        }
        let q_dec = decimal_from_i64(q);
        let existing_qty_dec = decimal_from_i64(existing_qty);
        let total_qty = existing_qty_dec + q_dec;
        if total_qty == Decimal::ZERO {
            return true;
        }
        let avg = (existing_qty_dec * existing_avg + q_dec * entry) / total_qty;
        avg <= max_avg_cost
    };

    if predicate(q_cap) {
        return q_cap;
    }
    if !predicate(1) {
        return 0;
    }

    let (mut lo, mut hi) = (1i64, q_cap);
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if predicate(mid) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

/// Converts a log-loss headroom (the gap between a configured cap `l_limit`
/// and the currently consumed `r_current`, both ≤ 0, divided by the new
/// trade's incremental log-loss `ell_new`, also ≤ 0) into an integer
/// quantity at `entry`, per the portfolio/symbol headroom constraints.
pub fn log_loss_headroom_qty(
    cap: Decimal,
    l_limit: Decimal,
    r_current: Decimal,
    ell_new: Decimal,
    entry: Decimal,
) -> i64 {
    if ell_new >= Decimal::ZERO || entry <= Decimal::ZERO {
        return 0;
    }
    let headroom_exposure = (l_limit - r_current) / ell_new;
    if headroom_exposure <= Decimal::ZERO {
        return 0;
    }
    floor_to_i64(cap * headroom_exposure / entry)
}

/// One side of the averaging gate: whether `price_near` (the existing fill
/// closest to `price_market`, ties broken toward the higher price) makes
/// `price_new` eligible to average into the position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AveragingGateResult {
    pub passed: bool,
    pub price_near: Decimal,
    pub spacing: Decimal,
    pub required_spacing: Decimal,
}

/// `P_near = argmin_i |P_i − P_market|`, ties toward the higher price.
pub fn nearest_fill(fills: &[Decimal], price_market: Decimal) -> Option<Decimal> {
    fills
        .iter()
        .copied()
        .min_by(|a, b| {
            let da = (*a - price_market).abs();
            let db = (*b - price_market).abs();
            da.cmp(&db).then_with(|| b.cmp(a))
        })
}

/// Gate 1: no pyramiding — `price_new ≤ price_near`.
/// Gate 2: minimum spacing — `price_near − price_new ≥ N · ATR_daily`.
pub fn averaging_gate(
    fills: &[Decimal],
    price_market: Decimal,
    price_new: Decimal,
    atr_daily: Decimal,
    min_reentry_spacing_atr_multiplier: Decimal,
) -> AveragingGateResult {
    let price_near = nearest_fill(fills, price_market).unwrap_or(price_market);
    let required_spacing = min_reentry_spacing_atr_multiplier * atr_daily;
    let spacing = price_near - price_new;

    let passed = price_new <= price_near && spacing >= required_spacing;
    AveragingGateResult {
        passed,
        price_near,
        spacing,
        required_spacing,
    }
}

/// One OHLC bar's worth of true-range inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrueRangeInput {
    pub high: Decimal,
    pub low: Decimal,
    pub prev_close: Decimal,
}

fn true_range(bar: TrueRangeInput) -> Decimal {
    let a = bar.high - bar.low;
    let b = (bar.high - bar.prev_close).abs();
    let c = (bar.low - bar.prev_close).abs();
    a.max(b).max(c)
}

/// Wilder-smoothed ATR with period 14; falls back to a 5-period simple
/// average of true ranges when fewer than 14 days of history are
/// available. Both paths require at least one prior bar to compute the
/// first true range. `bars` must be ordered oldest-first and include the
/// bar immediately preceding the first true-range calculation as element 0.
pub fn atr(bars: &[TrueRangeInput]) -> Option<Decimal> {
    if bars.len() < 2 {
        return None;
    }
    let true_ranges: Vec<Decimal> = bars.iter().skip(1).copied().map(true_range).collect();

    if true_ranges.len() < 14 {
        let n = true_ranges.len().min(5);
        if n == 0 {
            return None;
        }
        let window = &true_ranges[true_ranges.len() - n..];
        let sum: Decimal = window.iter().copied().sum();
        return Some(sum / Decimal::from(n as i64));
    }

    let period = Decimal::from(14);
    let mut atr = true_ranges[..14].iter().copied().sum::<Decimal>() / period;
    for tr in &true_ranges[14..] {
        atr = (atr * Decimal::from(13) + tr) / period;
    }
    Some(atr)
}

/// Range-to-ATR velocity regime bucket, from the widest to tightest.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RangeRegime {
    Wide,
    Healthy,
    Tight,
    Choppy,
}

/// `Range_ATR = (max_high − min_low) / ATR` over the lookback window.
pub fn range_to_atr(highs: &[Decimal], lows: &[Decimal], atr: Decimal) -> Option<Decimal> {
    if atr <= Decimal::ZERO || highs.is_empty() || lows.is_empty() {
        return None;
    }
    let max_high = highs.iter().copied().fold(Decimal::MIN, Decimal::max);
    let min_low = lows.iter().copied().fold(Decimal::MAX, Decimal::min);
    Some((max_high - min_low) / atr)
}

pub fn velocity_regime(
    range_atr: Decimal,
    threshold_wide: Decimal,
    threshold_healthy: Decimal,
    threshold_tight: Decimal,
) -> RangeRegime {
    if range_atr >= threshold_wide {
        RangeRegime::Wide
    } else if range_atr >= threshold_healthy {
        RangeRegime::Healthy
    } else if range_atr >= threshold_tight {
        RangeRegime::Tight
    } else {
        RangeRegime::Choppy
    }
}

pub fn velocity_base_multiplier(
    regime: RangeRegime,
    multiplier_wide: Decimal,
    multiplier_healthy: Decimal,
    multiplier_tight: Decimal,
    multiplier_min: Decimal,
) -> Decimal {
    match regime {
        RangeRegime::Wide => multiplier_wide,
        RangeRegime::Healthy => multiplier_healthy,
        RangeRegime::Tight => multiplier_tight,
        RangeRegime::Choppy => multiplier_min,
    }
}

/// 15-period EMA of a series; `None` if `values` is empty.
pub fn ema(values: &[Decimal], period: usize) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let k = Decimal::TWO / Decimal::from((period + 1) as i64);
    let mut acc = values[0];
    for v in &values[1..] {
        acc = *v * k + acc * (Decimal::ONE - k);
    }
    Some(acc)
}

/// Body-ratio penalty: `EMA_15(|close − open|) / ATR`, penalising (never
/// amplifying) the velocity multiplier in choppy, small-bodied markets.
pub fn body_ratio_penalty(
    body_ratio: Decimal,
    threshold_low: Decimal,
    threshold_critical: Decimal,
    penalty_low: Decimal,
    penalty_critical: Decimal,
) -> Decimal {
    if body_ratio < threshold_low {
        penalty_low
    } else if body_ratio < threshold_critical {
        penalty_critical
    } else {
        Decimal::ONE
    }
}

/// Stress throttle from portfolio drawdown (`drawdown = (value − peak) / peak ≤ 0`).
pub fn stress_throttle(drawdown: Decimal, max_stress_drawdown: Decimal, enabled: bool) -> Decimal {
    if !enabled {
        return Decimal::ONE;
    }
    if drawdown >= Decimal::ZERO {
        return Decimal::ONE;
    }
    let max_abs = max_stress_drawdown.abs();
    let abs_drawdown = drawdown.abs();
    if max_abs == Decimal::ZERO {
        return Decimal::new(25, 2);
    }
    if abs_drawdown <= max_abs {
        let fraction = abs_drawdown / max_abs;
        Decimal::ONE - Decimal::new(50, 2) * fraction
    } else {
        Decimal::new(25, 2)
    }
}

/// `V = max(0.0625, V_base · body_penalty · stress_throttle)`.
pub fn final_velocity(v_base: Decimal, body_penalty: Decimal, stress_throttle: Decimal) -> Decimal {
    (v_base * body_penalty * stress_throttle).max(Decimal::new(625, 4))
}

/// Direction-aware "favourable movement" check: for a `Buy`, favourable
/// means price increased; for a `Sell`, favourable means it decreased.
pub fn favorable_movement(direction: Direction, from: Decimal, to: Decimal) -> bool {
    match direction {
        Direction::Buy => to > from,
        Direction::Sell => to < from,
    }
}
