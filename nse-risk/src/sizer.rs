//! Seven-constraint position sizer (§4.10).
//!
//! The sizer never runs unless the utility asymmetry gate has already
//! passed — that gate is a hard go/no-go upstream of this module, not one
//! of the seven numeric constraints. Given a go, the final quantity is the
//! minimum across six capacity constraints (`LOG_SAFE`, `KELLY`, `FILL`,
//! `CAPITAL`, `PORTFOLIO_BUDGET`, `SYMBOL_BUDGET`); the seventh "constraint"
//! is the upstream gate itself.

use nse_core::model::{ConstraintKind, Strength};
use rust_decimal::Decimal;

use crate::sizing::{kelly_fraction, kelly_p_win, log_loss_headroom_qty, max_log_safe_qty};

fn floor_to_i64(value: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;
    value.floor().to_i64().unwrap_or(0).max(0)
}

/// Everything the sizer needs about the candidate trade and the account it
/// would be placed against. One instance is built per delivery being sized.
#[derive(Debug, Clone)]
pub struct SizingRequest {
    pub entry: Decimal,
    pub ceiling: Decimal,
    pub floor: Decimal,
    pub max_drop: Decimal,
    pub ell: Decimal,
    pub p_fill: Decimal,
    pub strength: Strength,
    /// `V`, the final velocity multiplier from §4.9 (range regime × body-ratio
    /// penalty × stress throttle, floored at `0.0625`). `1.0` is neutral.
    pub velocity: Decimal,

    pub existing_qty: i64,
    pub existing_avg: Decimal,

    pub max_per_trade: Decimal,
    pub available_capital: Decimal,

    pub kelly_fraction_cfg: Decimal,
    pub max_kelly_multiplier: Decimal,
    pub max_position_log_loss: Decimal,

    pub portfolio_log_return_current: Decimal,
    pub max_portfolio_log_loss: Decimal,
    pub symbol_log_return_current: Decimal,
    pub max_symbol_log_loss: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingOutcome {
    pub quantity: i64,
    pub limiting_constraint: Option<ConstraintKind>,
    pub p_win: Decimal,
    pub kelly: Decimal,
}

impl SizingOutcome {
    fn zero() -> Self {
        Self {
            quantity: 0,
            limiting_constraint: None,
            p_win: Decimal::ZERO,
            kelly: Decimal::ZERO,
        }
    }
}

/// Computes the six capacity constraints and returns the minimum, tagged
/// with which constraint bound it. Callers must have already evaluated the
/// utility gate and the averaging gate (if this is an add) — this function
/// assumes both already passed.
pub fn size(req: &SizingRequest) -> SizingOutcome {
    let p_win = kelly_p_win(req.entry, req.ceiling, req.floor, req.max_drop);
    let kelly_raw = kelly_fraction(p_win, req.entry, req.ceiling, req.floor);

    let kelly_final_fraction =
        kelly_raw * req.velocity * req.strength.multiplier() * req.kelly_fraction_cfg * req.max_kelly_multiplier;

    if kelly_final_fraction <= Decimal::ZERO || req.entry <= Decimal::ZERO {
        return SizingOutcome {
            quantity: 0,
            limiting_constraint: Some(ConstraintKind::Kelly),
            p_win,
            kelly: kelly_raw,
        };
    }

    let kelly_qty = floor_to_i64(kelly_final_fraction * req.available_capital / req.entry);

    let log_safe_qty = max_log_safe_qty(
        req.existing_qty,
        req.existing_avg,
        req.entry,
        req.floor,
        req.max_position_log_loss,
        req.max_per_trade.min(req.available_capital),
    );

    let fill_qty = floor_to_i64(Decimal::from(kelly_qty) * req.p_fill);

    let cap_trade = req.max_per_trade.min(req.available_capital);
    let capital_qty = floor_to_i64(cap_trade / req.entry);

    let portfolio_budget_qty = log_loss_headroom_qty(
        req.available_capital,
        -req.max_portfolio_log_loss.abs(),
        req.portfolio_log_return_current,
        req.ell,
        req.entry,
    );

    let symbol_budget_qty = log_loss_headroom_qty(
        req.available_capital,
        -req.max_symbol_log_loss.abs(),
        req.symbol_log_return_current,
        req.ell,
        req.entry,
    );

    let candidates: [(i64, ConstraintKind); 6] = [
        (log_safe_qty, ConstraintKind::LogSafe),
        (kelly_qty, ConstraintKind::Kelly),
        (fill_qty, ConstraintKind::Fill),
        (capital_qty, ConstraintKind::Capital),
        (portfolio_budget_qty, ConstraintKind::PortfolioBudget),
        (symbol_budget_qty, ConstraintKind::SymbolBudget),
    ];

    let (quantity, limiting_constraint) = candidates
        .into_iter()
        .min_by_key(|(qty, _)| *qty)
        .map(|(qty, kind)| (qty, Some(kind)))
        .unwrap_or((0, None));

    SizingOutcome {
        quantity: quantity.max(0),
        limiting_constraint,
        p_win,
        kelly: kelly_raw,
    }
}

/// The reduced-size path for averaging into an existing position: the
/// strength multiplier is held at a fixed `0.75` (regardless of the
/// signal's actual strength bucket) and `p_fill` is fixed at `0.95`,
/// reflecting that an add is a lower-conviction, higher-certainty-of-fill
/// event than a fresh entry.
pub fn calculate_add_size(req: &SizingRequest) -> SizingOutcome {
    const ADD_STRENGTH_MULTIPLIER: Decimal = Decimal::from_parts(75, 0, 0, false, 2);
    const ADD_P_FILL: Decimal = Decimal::from_parts(95, 0, 0, false, 2);

    let p_win = kelly_p_win(req.entry, req.ceiling, req.floor, req.max_drop);
    let kelly_raw = kelly_fraction(p_win, req.entry, req.ceiling, req.floor);
    let kelly_final_fraction =
        kelly_raw * req.velocity * ADD_STRENGTH_MULTIPLIER * req.kelly_fraction_cfg * req.max_kelly_multiplier;

    if kelly_final_fraction <= Decimal::ZERO || req.entry <= Decimal::ZERO {
        return SizingOutcome::zero();
    }

    let kelly_qty = floor_to_i64(kelly_final_fraction * req.available_capital / req.entry);
    let fill_qty = floor_to_i64(Decimal::from(kelly_qty) * ADD_P_FILL);

    let log_safe_qty = max_log_safe_qty(
        req.existing_qty,
        req.existing_avg,
        req.entry,
        req.floor,
        req.max_position_log_loss,
        req.max_per_trade.min(req.available_capital),
    );

    let cap_trade = req.max_per_trade.min(req.available_capital);
    let capital_qty = floor_to_i64(cap_trade / req.entry);

    let portfolio_budget_qty = log_loss_headroom_qty(
        req.available_capital,
        -req.max_portfolio_log_loss.abs(),
        req.portfolio_log_return_current,
        req.ell,
        req.entry,
    );
    let symbol_budget_qty = log_loss_headroom_qty(
        req.available_capital,
        -req.max_symbol_log_loss.abs(),
        req.symbol_log_return_current,
        req.ell,
        req.entry,
    );

    let candidates: [(i64, ConstraintKind); 6] = [
        (log_safe_qty, ConstraintKind::LogSafe),
        (kelly_qty, ConstraintKind::Kelly),
        (fill_qty, ConstraintKind::Fill),
        (capital_qty, ConstraintKind::Capital),
        (portfolio_budget_qty, ConstraintKind::PortfolioBudget),
        (symbol_budget_qty, ConstraintKind::SymbolBudget),
    ];

    let (quantity, limiting_constraint) = candidates
        .into_iter()
        .min_by_key(|(qty, _)| *qty)
        .map(|(qty, kind)| (qty, Some(kind)))
        .unwrap_or((0, None));

    SizingOutcome {
        quantity: quantity.max(0),
        limiting_constraint,
        p_win,
        kelly: kelly_raw,
    }
}
