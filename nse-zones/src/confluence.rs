//! Confluence Calculator (§4.7).

use nse_core::model::{ConfluenceType, Strength};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfluenceInput {
    pub htf_in_zone: bool,
    pub itf_in_zone: bool,
    pub ltf_in_zone: bool,
    pub weight_htf: Decimal,
    pub weight_itf: Decimal,
    pub weight_ltf: Decimal,
    pub strength_very_strong: Decimal,
    pub strength_strong: Decimal,
    pub strength_moderate: Decimal,
    pub min_confluence_type: ConfluenceType,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfluenceOutput {
    pub score: Decimal,
    pub strength: Strength,
    /// `None` both when no timeframe lines up *and* when the actual
    /// confluence type fails to meet `min_confluence_type` — the spec
    /// requires the latter to collapse to `NONE` for screening purposes.
    pub confluence_type: ConfluenceType,
    pub passed: bool,
}

fn indicator(in_zone: bool) -> Decimal {
    if in_zone {
        Decimal::ONE
    } else {
        Decimal::ZERO
    }
}

fn strength_of(score: Decimal, input: &ConfluenceInput) -> Strength {
    if score >= input.strength_very_strong {
        Strength::VeryStrong
    } else if score >= input.strength_strong {
        Strength::Strong
    } else if score >= input.strength_moderate {
        Strength::Moderate
    } else {
        Strength::Weak
    }
}

/// HTF presence plus how many finer timeframes are also in zone determines
/// the *actual* confluence type; HTF is required for any non-`None` result.
fn actual_confluence_type(input: &ConfluenceInput) -> ConfluenceType {
    if !input.htf_in_zone {
        return ConfluenceType::None;
    }
    let finer_in_zone = [input.itf_in_zone, input.ltf_in_zone]
        .iter()
        .filter(|b| **b)
        .count();
    match finer_in_zone {
        0 => ConfluenceType::Single,
        1 => ConfluenceType::Double,
        _ => ConfluenceType::Triple,
    }
}

pub fn compute_confluence(input: ConfluenceInput) -> ConfluenceOutput {
    let score = input.weight_htf * indicator(input.htf_in_zone)
        + input.weight_itf * indicator(input.itf_in_zone)
        + input.weight_ltf * indicator(input.ltf_in_zone);
    let strength = strength_of(score, &input);
    let actual = actual_confluence_type(&input);

    if actual < input.min_confluence_type {
        ConfluenceOutput {
            score,
            strength,
            confluence_type: ConfluenceType::None,
            passed: false,
        }
    } else {
        ConfluenceOutput {
            score,
            strength,
            confluence_type: actual,
            passed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base() -> ConfluenceInput {
        ConfluenceInput {
            htf_in_zone: false,
            itf_in_zone: false,
            ltf_in_zone: false,
            weight_htf: dec!(0.5),
            weight_itf: dec!(0.3),
            weight_ltf: dec!(0.2),
            strength_very_strong: dec!(1.00),
            strength_strong: dec!(0.80),
            strength_moderate: dec!(0.50),
            min_confluence_type: ConfluenceType::Double,
        }
    }

    #[test]
    fn triple_confluence_is_very_strong() {
        let input = ConfluenceInput {
            htf_in_zone: true,
            itf_in_zone: true,
            ltf_in_zone: true,
            ..base()
        };
        let out = compute_confluence(input);
        assert_eq!(out.score, dec!(1.0));
        assert!(matches!(out.strength, Strength::VeryStrong));
        assert_eq!(out.confluence_type, ConfluenceType::Triple);
        assert!(out.passed);
    }

    #[test]
    fn htf_and_itf_only_is_strong_double() {
        // Scenario 1 of §8: HTF + ITF in zone => score 0.8 => STRONG.
        let input = ConfluenceInput {
            htf_in_zone: true,
            itf_in_zone: true,
            ltf_in_zone: false,
            ..base()
        };
        let out = compute_confluence(input);
        assert_eq!(out.score, dec!(0.8));
        assert!(matches!(out.strength, Strength::Strong));
        assert_eq!(out.confluence_type, ConfluenceType::Double);
        assert!(out.passed);
    }

    #[test]
    fn missing_htf_collapses_to_none_even_if_finer_tfs_align() {
        let input = ConfluenceInput {
            htf_in_zone: false,
            itf_in_zone: true,
            ltf_in_zone: true,
            ..base()
        };
        let out = compute_confluence(input);
        assert_eq!(out.confluence_type, ConfluenceType::None);
        assert!(!out.passed);
    }

    #[test]
    fn below_min_confluence_type_is_rejected() {
        let input = ConfluenceInput {
            htf_in_zone: true,
            itf_in_zone: false,
            ltf_in_zone: false,
            min_confluence_type: ConfluenceType::Triple,
            ..base()
        };
        let out = compute_confluence(input);
        assert_eq!(out.confluence_type, ConfluenceType::None);
        assert!(!out.passed);
    }
}
