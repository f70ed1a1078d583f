//! Utility Asymmetry Gate (§4.8).
//!
//! Piecewise power utility in log-return space. `U` is only ever evaluated
//! at `r ≥ 0` (π, the log-return to the ceiling) or `r < 0` (ℓ, the
//! log-return to the floor) by this module's callers, so the two branches
//! never need to agree at a shared boundary beyond `U(0) = 0`.
//!
//! `rust_decimal`'s `maths` feature gives us `Decimal::checked_ln`,
//! `checked_exp` and `checked_powd` directly in decimal space — no float
//! round-trip for the exponentiation itself.

use nse_core::config::MtfGlobalConfig;
use rust_decimal::{Decimal, MathematicalOps};

/// `U(r) = r^α` for `r ≥ 0`, `U(r) = -λ·(-r)^β` for `r < 0`.
///
/// Returns `None` only if the underlying decimal power/log computation is
/// undefined (should not happen for the finite, non-degenerate inputs this
/// gate is evaluated on); callers treat `None` as a conservative gate
/// failure rather than panicking.
pub fn utility(r: Decimal, alpha: Decimal, beta: Decimal, lambda: Decimal) -> Option<Decimal> {
    if r >= Decimal::ZERO {
        r.checked_powd(alpha)
    } else {
        (-r).checked_powd(beta).map(|v| -lambda * v)
    }
}

/// `π = ln(ceiling / entry)`, required `> 0`.
pub fn log_return_to_ceiling(entry: Decimal, ceiling: Decimal) -> Option<Decimal> {
    (ceiling / entry).checked_ln()
}

/// `ℓ = ln(floor / entry)`, required `< 0`.
pub fn log_return_to_floor(entry: Decimal, floor: Decimal) -> Option<Decimal> {
    (floor / entry).checked_ln()
}

/// The probability-weighted gate: `p_win · U(π) ≥ ratio · (1 − p_win) · |U(ℓ)|`.
/// This is the only place `p_win` is allowed to reject a signal by itself
/// (§4.8).
pub fn gate_passes(
    p_win: Decimal,
    pi: Decimal,
    ell: Decimal,
    cfg: &MtfGlobalConfig,
) -> Option<bool> {
    let u_pi = utility(pi, cfg.utility_alpha, cfg.utility_beta, cfg.utility_lambda)?;
    let u_ell = utility(ell, cfg.utility_alpha, cfg.utility_beta, cfg.utility_lambda)?;
    let lhs = p_win * u_pi;
    let rhs = cfg.min_advantage_ratio * (Decimal::ONE - p_win) * u_ell.abs();
    Some(lhs >= rhs)
}

/// The deterministic, probability-free form exposed for diagnostics:
/// `U(π) ≥ ratio · |U(ℓ)|`.
pub fn gate_passes_deterministic(pi: Decimal, ell: Decimal, cfg: &MtfGlobalConfig) -> Option<bool> {
    let u_pi = utility(pi, cfg.utility_alpha, cfg.utility_beta, cfg.utility_lambda)?;
    let u_ell = utility(ell, cfg.utility_alpha, cfg.utility_beta, cfg.utility_lambda)?;
    Some(u_pi >= cfg.min_advantage_ratio * u_ell.abs())
}

/// The minimum `p_win` that would pass the gate for fixed `π`, `ℓ` and
/// config, derived algebraically from `gate_passes`'s inequality.
pub fn min_p_win_required(pi: Decimal, ell: Decimal, cfg: &MtfGlobalConfig) -> Option<Decimal> {
    let u_pi = utility(pi, cfg.utility_alpha, cfg.utility_beta, cfg.utility_lambda)?;
    let u_ell = utility(ell, cfg.utility_alpha, cfg.utility_beta, cfg.utility_lambda)?.abs();
    let ratio = cfg.min_advantage_ratio;
    let denom = u_pi + ratio * u_ell;
    if denom == Decimal::ZERO {
        return None;
    }
    Some(ratio * u_ell / denom)
}

/// The realised advantage ratio at a given `p_win`, i.e. the largest
/// `min_advantage_ratio` value for which the gate would still pass.
pub fn realised_advantage_ratio(
    p_win: Decimal,
    pi: Decimal,
    ell: Decimal,
    cfg: &MtfGlobalConfig,
) -> Option<Decimal> {
    let u_pi = utility(pi, cfg.utility_alpha, cfg.utility_beta, cfg.utility_lambda)?;
    let u_ell = utility(ell, cfg.utility_alpha, cfg.utility_beta, cfg.utility_lambda)?.abs();
    let denom = (Decimal::ONE - p_win) * u_ell;
    if denom == Decimal::ZERO {
        return None;
    }
    Some(p_win * u_pi / denom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn cfg() -> MtfGlobalConfig {
        MtfGlobalConfig::default()
    }

    #[test]
    fn gate_passes_on_strong_asymmetric_payoff() {
        // Scenario 1 of §8: entry 2500, ceiling well above, floor modest.
        let pi = log_return_to_ceiling(dec!(2500), dec!(2575)).unwrap();
        let ell = log_return_to_floor(dec!(2500), dec!(2475)).unwrap();
        let passed = gate_passes(dec!(0.72), pi, ell, &cfg()).unwrap();
        assert!(passed);
    }

    #[test]
    fn gate_rejects_thin_asymmetry_with_low_p_win() {
        // Scenario 2 of §8: floor 0.99·entry, ceiling 1.005·entry, p_win 0.55.
        let entry = dec!(2500);
        let pi = log_return_to_ceiling(entry, entry * dec!(1.005)).unwrap();
        let ell = log_return_to_floor(entry, entry * dec!(0.99)).unwrap();
        let passed = gate_passes(dec!(0.55), pi, ell, &cfg()).unwrap();
        assert!(!passed);
        let advantage = realised_advantage_ratio(dec!(0.55), pi, ell, &cfg()).unwrap();
        assert!(advantage < dec!(3.0));
    }

    #[test]
    fn monotone_in_p_win() {
        // P4: if the gate passes at p, it passes at every p' > p.
        let pi = log_return_to_ceiling(dec!(100), dec!(103)).unwrap();
        let ell = log_return_to_floor(dec!(100), dec!(98)).unwrap();
        let cfg = cfg();
        let min_p = min_p_win_required(pi, ell, &cfg).unwrap();
        assert!(gate_passes(min_p, pi, ell, &cfg).unwrap());
        let higher = (min_p + dec!(0.05)).min(dec!(0.99));
        assert!(gate_passes(higher, pi, ell, &cfg).unwrap());
        let lower = (min_p - dec!(0.05)).max(dec!(0.0));
        assert!(!gate_passes(lower, pi, ell, &cfg).unwrap());
    }
}
