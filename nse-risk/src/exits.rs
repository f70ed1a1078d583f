//! Exit ladder and trailing stop (§4.11).
//!
//! The ladder is a sequence of named price levels between entry and the
//! HTF ceiling, each carrying the fraction of the position to exit at that
//! rung. Levels that land within 0.5% of a level already in the
//! (price-sorted) ladder are merged into that level, keeping whichever of
//! the two carries the higher exit fraction, rather than kept as a
//! separate rung — two nearly-identical ceilings should not produce two
//! exit signals in the same breath. After merging, the surviving rungs'
//! fractions are renormalised so they sum back to 1.0.

use chrono::{DateTime, Utc};
use nse_core::config::MtfGlobalConfig;
use nse_core::model::{Direction, ExitReason};
use rust_decimal::Decimal;

const MERGE_THRESHOLD_PCT: Decimal = Decimal::from_parts(5, 0, 0, false, 3); // 0.005

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ExitLevelKind {
    Breakeven,
    MinProfit,
    LtfCeiling,
    Target,
    ItfCeiling,
    Stretch,
    HtfCeiling,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitLevel {
    pub kind: ExitLevelKind,
    pub price: Decimal,
    /// Fraction of the position to exit at this rung, already normalised
    /// against the full ladder (sums to 1.0 across all surviving rungs).
    pub fraction: Decimal,
}

/// The canonical, fixed exit fractions in ladder order (§4.11): `BREAKEVEN`
/// takes nothing, `MIN_PROFIT` and `LTF_CEILING` each take a flat 25% of
/// the original position, and `TARGET`/`ITF_CEILING`/`STRETCH`/`HTF_CEILING`
/// each take 50%/50%/75%/100% of whatever remains after the rungs above
/// them. These are spec-fixed weights, not tunables.
fn canonical_fractions() -> [Decimal; 7] {
    let mut remaining = Decimal::ONE;

    let breakeven = Decimal::ZERO;

    let min_profit = Decimal::new(25, 2);
    remaining -= min_profit;

    let ltf_ceiling = Decimal::new(25, 2);
    remaining -= ltf_ceiling;

    let target = Decimal::new(50, 2) * remaining;
    remaining -= target;

    let itf_ceiling = Decimal::new(50, 2) * remaining;
    remaining -= itf_ceiling;

    let stretch = Decimal::new(75, 2) * remaining;
    remaining -= stretch;

    let htf_ceiling = remaining;

    [
        breakeven,
        min_profit,
        ltf_ceiling,
        target,
        itf_ceiling,
        stretch,
        htf_ceiling,
    ]
}

/// Builds the full exit ladder for a trade, direction-aware, drops any rung
/// whose price isn't strictly favourable relative to `entry` (breakeven
/// never survives this filter), and collapses near-duplicate rungs (within
/// [`MERGE_THRESHOLD_PCT`] of each other) into whichever one carries the
/// higher exit fraction, renormalising what's left back to 1.0.
pub fn build_ladder(
    direction: Direction,
    entry: Decimal,
    risk_per_share: Decimal,
    ltf_ceiling: Decimal,
    itf_ceiling: Decimal,
    htf_ceiling: Decimal,
    cfg: &MtfGlobalConfig,
) -> Vec<ExitLevel> {
    let sign = Decimal::from(direction.sign());

    let min_profit = entry + sign * entry * cfg.min_profit_pct;
    let target = entry + sign * risk_per_share * cfg.target_r_multiple;
    let stretch = entry + sign * risk_per_share * cfg.stretch_r_multiple;

    let fractions = canonical_fractions();

    let mut levels = vec![
        ExitLevel {
            kind: ExitLevelKind::Breakeven,
            price: entry,
            fraction: fractions[0],
        },
        ExitLevel {
            kind: ExitLevelKind::MinProfit,
            price: min_profit,
            fraction: fractions[1],
        },
        ExitLevel {
            kind: ExitLevelKind::LtfCeiling,
            price: ltf_ceiling,
            fraction: fractions[2],
        },
        ExitLevel {
            kind: ExitLevelKind::Target,
            price: target,
            fraction: fractions[3],
        },
        ExitLevel {
            kind: ExitLevelKind::ItfCeiling,
            price: itf_ceiling,
            fraction: fractions[4],
        },
        ExitLevel {
            kind: ExitLevelKind::Stretch,
            price: stretch,
            fraction: fractions[5],
        },
        ExitLevel {
            kind: ExitLevelKind::HtfCeiling,
            price: htf_ceiling,
            fraction: fractions[6],
        },
    ];

    levels.retain(|level| match direction {
        Direction::Buy => level.price > entry,
        Direction::Sell => level.price < entry,
    });

    levels.sort_by(|a, b| match direction {
        Direction::Buy => a.price.cmp(&b.price),
        Direction::Sell => b.price.cmp(&a.price),
    });

    merge_near_duplicates(levels, entry)
}

fn merge_near_duplicates(levels: Vec<ExitLevel>, entry: Decimal) -> Vec<ExitLevel> {
    if entry == Decimal::ZERO {
        return levels;
    }
    let mut merged: Vec<ExitLevel> = Vec::with_capacity(levels.len());
    for level in levels {
        match merged.last_mut() {
            Some(prev) if ((level.price - prev.price) / entry).abs() < MERGE_THRESHOLD_PCT => {
                if level.fraction > prev.fraction {
                    *prev = level;
                }
            }
            _ => merged.push(level),
        }
    }
    renormalize(&mut merged);
    merged
}

/// Rescales the surviving rungs' fractions so they sum to 1.0 again after a
/// merge dropped one or more rungs' fractions entirely.
fn renormalize(levels: &mut [ExitLevel]) {
    let total: Decimal = levels.iter().map(|l| l.fraction).sum();
    if total <= Decimal::ZERO {
        return;
    }
    for level in levels.iter_mut() {
        level.fraction /= total;
    }
}

/// Trailing-stop state. `stop_price` only ever ratchets in the favourable
/// direction once activated; it is never relaxed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrailingState {
    pub active: bool,
    pub highest_favorable_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
}

/// Applies one price update to the trailing-stop state machine.
pub fn update_trailing(
    direction: Direction,
    entry: Decimal,
    current_price: Decimal,
    mut state: TrailingState,
    cfg: &MtfGlobalConfig,
) -> TrailingState {
    let sign = Decimal::from(direction.sign());
    let activation_price = entry + sign * entry * cfg.trailing_stop_activation_pct;

    let activates_now = match direction {
        Direction::Buy => current_price >= activation_price,
        Direction::Sell => current_price <= activation_price,
    };

    if !state.active {
        if !activates_now {
            return state;
        }
        state.active = true;
        state.highest_favorable_price = Some(current_price);
    } else {
        let highest = state.highest_favorable_price.unwrap_or(current_price);
        state.highest_favorable_price = Some(match direction {
            Direction::Buy => highest.max(current_price),
            Direction::Sell => highest.min(current_price),
        });
    }

    let extreme = state.highest_favorable_price.expect("set above");
    let raw_candidate_stop = extreme - sign * extreme * cfg.trailing_stop_distance_pct;
    // Never settle below breakeven, even if the distance leg overshoots past
    // entry (possible whenever trailing_stop_distance_pct exceeds
    // trailing_stop_activation_pct under a per-symbol override).
    let candidate_stop = match direction {
        Direction::Buy => raw_candidate_stop.max(entry),
        Direction::Sell => raw_candidate_stop.min(entry),
    };

    state.stop_price = Some(match (state.stop_price, direction) {
        (Some(existing), Direction::Buy) => existing.max(candidate_stop),
        (Some(existing), Direction::Sell) => existing.min(candidate_stop),
        (None, _) => candidate_stop,
    });

    state
}

/// Evaluates a single tick against the full exit condition set, in the
/// spec's fixed priority order: `TrailingStop` > `TargetHit` > `StopLoss` >
/// `TimeBased`.
pub fn check_exit(
    direction: Direction,
    current_price: Decimal,
    trailing: &TrailingState,
    target_price: Option<Decimal>,
    stop_loss_price: Decimal,
    entry_ts: DateTime<Utc>,
    now: DateTime<Utc>,
    cfg: &MtfGlobalConfig,
) -> Option<ExitReason> {
    if trailing.active {
        if let Some(stop) = trailing.stop_price {
            let hit = match direction {
                Direction::Buy => current_price <= stop,
                Direction::Sell => current_price >= stop,
            };
            if hit {
                return Some(ExitReason::TrailingStop);
            }
        }
    }

    if let Some(target) = target_price {
        let hit = match direction {
            Direction::Buy => current_price >= target,
            Direction::Sell => current_price <= target,
        };
        if hit {
            return Some(ExitReason::TargetHit);
        }
    }

    let stop_hit = match direction {
        Direction::Buy => current_price <= stop_loss_price,
        Direction::Sell => current_price >= stop_loss_price,
    };
    if stop_hit {
        return Some(ExitReason::StopLoss);
    }

    if now - entry_ts >= chrono::Duration::days(cfg.max_hold_days) {
        return Some(ExitReason::TimeBased);
    }

    None
}
