//! `MtfGlobalConfig`: every tunable scalar referenced by the confluence,
//! utility, sizing and exit pipelines, with defaults equal to those named in
//! the spec. No runtime code path anywhere in this workspace reads a
//! tunable by string name — every read is a field access on the resolved
//! (symbol-override ∪ global) record returned by [`ResolvedConfig::resolve`].

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::model::ConfluenceType;

/// Global configuration row. A single instance of this type is loaded at
/// startup (via `config`/TOML, see [`load_from_str`]) and held behind an
/// `Arc` by every collaborator that needs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtfGlobalConfig {
    pub buy_zone_pct_htf: Decimal,
    pub buy_zone_pct_itf: Decimal,
    pub buy_zone_pct_ltf: Decimal,

    pub weight_htf: Decimal,
    pub weight_itf: Decimal,
    pub weight_ltf: Decimal,

    pub strength_very_strong: Decimal,
    pub strength_strong: Decimal,
    pub strength_moderate: Decimal,

    pub min_confluence_type: ConfluenceType,

    pub max_position_log_loss: Decimal,
    pub max_portfolio_log_loss: Decimal,
    pub max_symbol_log_loss: Decimal,

    pub kelly_fraction: Decimal,
    pub max_kelly_multiplier: Decimal,

    pub min_reentry_spacing_atr_multiplier: Decimal,

    pub range_atr_threshold_wide: Decimal,
    pub range_atr_threshold_healthy: Decimal,
    pub range_atr_threshold_tight: Decimal,

    pub velocity_multiplier_wide: Decimal,
    pub velocity_multiplier_healthy: Decimal,
    pub velocity_multiplier_tight: Decimal,
    pub velocity_multiplier_min: Decimal,

    pub body_ratio_threshold_low: Decimal,
    pub body_ratio_threshold_critical: Decimal,
    pub body_ratio_penalty_low: Decimal,
    pub body_ratio_penalty_critical: Decimal,

    pub range_lookback_bars: usize,

    pub stress_throttle_enabled: bool,
    pub max_stress_drawdown: Decimal,

    pub utility_alpha: Decimal,
    pub utility_beta: Decimal,
    pub utility_lambda: Decimal,
    pub min_advantage_ratio: Decimal,
    pub utility_gate_enabled: bool,

    pub trailing_stop_activation_pct: Decimal,
    pub trailing_stop_distance_pct: Decimal,
    pub target_r_multiple: Decimal,
    pub stretch_r_multiple: Decimal,
    pub min_profit_pct: Decimal,

    pub min_brick_pct: Decimal,
    pub max_hold_days: i64,

    pub min_p_win_orchestrator: Decimal,
    pub min_kelly_orchestrator: Decimal,
    pub min_notional: Decimal,
}

impl Default for MtfGlobalConfig {
    fn default() -> Self {
        Self {
            buy_zone_pct_htf: dec!(0.50),
            buy_zone_pct_itf: dec!(0.35),
            buy_zone_pct_ltf: dec!(0.20),

            weight_htf: dec!(0.5),
            weight_itf: dec!(0.3),
            weight_ltf: dec!(0.2),

            strength_very_strong: dec!(1.00),
            strength_strong: dec!(0.80),
            strength_moderate: dec!(0.50),

            min_confluence_type: ConfluenceType::Double,

            max_position_log_loss: dec!(0.05),
            max_portfolio_log_loss: dec!(0.15),
            max_symbol_log_loss: dec!(0.08),

            kelly_fraction: dec!(0.25),
            max_kelly_multiplier: dec!(1.0),

            min_reentry_spacing_atr_multiplier: dec!(2.0),

            range_atr_threshold_wide: dec!(8),
            range_atr_threshold_healthy: dec!(5),
            range_atr_threshold_tight: dec!(3),

            velocity_multiplier_wide: dec!(1.00),
            velocity_multiplier_healthy: dec!(0.75),
            velocity_multiplier_tight: dec!(0.50),
            velocity_multiplier_min: dec!(0.25),

            body_ratio_threshold_low: dec!(0.15),
            body_ratio_threshold_critical: dec!(0.30),
            body_ratio_penalty_low: dec!(0.75),
            body_ratio_penalty_critical: dec!(0.90),

            range_lookback_bars: 100,

            stress_throttle_enabled: true,
            max_stress_drawdown: dec!(-0.10),

            utility_alpha: dec!(0.60),
            utility_beta: dec!(1.40),
            utility_lambda: dec!(1.00),
            min_advantage_ratio: dec!(3.0),
            utility_gate_enabled: true,

            trailing_stop_activation_pct: dec!(0.01),
            trailing_stop_distance_pct: dec!(0.005),
            target_r_multiple: dec!(2.0),
            stretch_r_multiple: dec!(3.0),
            min_profit_pct: dec!(0.01),

            min_brick_pct: dec!(0.005),
            max_hold_days: 30,

            min_p_win_orchestrator: dec!(0.35),
            min_kelly_orchestrator: dec!(0.02),
            min_notional: dec!(1000),
        }
    }
}

/// Nullable per-symbol overrides of [`MtfGlobalConfig`]. Every field is
/// optional; absent fields fall back to the global row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MtfSymbolConfigOverride {
    pub buy_zone_pct_htf: Option<Decimal>,
    pub buy_zone_pct_itf: Option<Decimal>,
    pub buy_zone_pct_ltf: Option<Decimal>,
    pub min_confluence_type: Option<ConfluenceType>,
    pub max_position_log_loss: Option<Decimal>,
    pub kelly_fraction: Option<Decimal>,
    pub trailing_stop_activation_pct: Option<Decimal>,
    pub trailing_stop_distance_pct: Option<Decimal>,
    pub target_r_multiple: Option<Decimal>,
    pub min_brick_pct: Option<Decimal>,
}

/// The resolved configuration for a single symbol: `symbol-override → global`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig(MtfGlobalConfig);

impl ResolvedConfig {
    pub fn resolve(global: &MtfGlobalConfig, over: Option<&MtfSymbolConfigOverride>) -> Self {
        let mut resolved = global.clone();
        if let Some(o) = over {
            if let Some(v) = o.buy_zone_pct_htf {
                resolved.buy_zone_pct_htf = v;
            }
            if let Some(v) = o.buy_zone_pct_itf {
                resolved.buy_zone_pct_itf = v;
            }
            if let Some(v) = o.buy_zone_pct_ltf {
                resolved.buy_zone_pct_ltf = v;
            }
            if let Some(v) = o.min_confluence_type {
                resolved.min_confluence_type = v;
            }
            if let Some(v) = o.max_position_log_loss {
                resolved.max_position_log_loss = v;
            }
            if let Some(v) = o.kelly_fraction {
                resolved.kelly_fraction = v;
            }
            if let Some(v) = o.trailing_stop_activation_pct {
                resolved.trailing_stop_activation_pct = v;
            }
            if let Some(v) = o.trailing_stop_distance_pct {
                resolved.trailing_stop_distance_pct = v;
            }
            if let Some(v) = o.target_r_multiple {
                resolved.target_r_multiple = v;
            }
            if let Some(v) = o.min_brick_pct {
                resolved.min_brick_pct = v;
            }
        }
        Self(resolved)
    }
}

impl std::ops::Deref for ResolvedConfig {
    type Target = MtfGlobalConfig;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Loads a [`MtfGlobalConfig`] from a TOML document, falling back to
/// [`Default::default`] for any field the document omits.
pub fn load_from_str(toml_src: &str) -> Result<MtfGlobalConfig, crate::error::CoreError> {
    let cfg: config::Config = config::Config::builder()
        .add_source(config::File::from_str(toml_src, config::FileFormat::Toml))
        .build()
        .map_err(|e| crate::error::CoreError::InvalidConfig(e.to_string()))?;

    // Merge onto the default so a partial document is valid.
    let default = MtfGlobalConfig::default();
    let default_json = serde_json::to_value(&default)
        .map_err(|e| crate::error::CoreError::InvalidConfig(e.to_string()))?;
    let override_json: serde_json::Value = cfg
        .try_deserialize()
        .unwrap_or(serde_json::Value::Object(Default::default()));

    let mut merged = default_json;
    if let (serde_json::Value::Object(base), serde_json::Value::Object(over)) =
        (&mut merged, &override_json)
    {
        for (k, v) in over {
            base.insert(k.clone(), v.clone());
        }
    }

    serde_json::from_value(merged).map_err(|e| crate::error::CoreError::InvalidConfig(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = MtfGlobalConfig::default();
        assert_eq!(cfg.min_advantage_ratio, dec!(3.0));
        assert_eq!(cfg.min_reentry_spacing_atr_multiplier, dec!(2.0));
        assert_eq!(cfg.min_p_win_orchestrator, dec!(0.35));
        assert_eq!(cfg.min_kelly_orchestrator, dec!(0.02));
    }

    #[test]
    fn symbol_override_replaces_only_set_fields() {
        let global = MtfGlobalConfig::default();
        let over = MtfSymbolConfigOverride {
            kelly_fraction: Some(dec!(0.10)),
            ..Default::default()
        };
        let resolved = ResolvedConfig::resolve(&global, Some(&over));
        assert_eq!(resolved.kelly_fraction, dec!(0.10));
        assert_eq!(resolved.buy_zone_pct_htf, global.buy_zone_pct_htf);
    }

    #[test]
    fn load_partial_toml_falls_back_to_defaults() {
        let toml_src = "kelly_fraction = \"0.33\"\n";
        let cfg = load_from_str(toml_src).unwrap();
        assert_eq!(cfg.kelly_fraction, dec!(0.33));
        assert_eq!(cfg.min_advantage_ratio, dec!(3.0));
    }
}
