//! Zone Detector (§4.6).

use nse_core::model::{Candle, Zone, ZoneResult};
use rust_decimal::Decimal;

/// Computes `Zone{low, high, buy_zone_top, sell_zone_bottom}` from a
/// timeframe's lookback candles. Returns `Insufficient` rather than
/// panicking when `candles.len()` is shorter than `need` (the timeframe's
/// lookback floor).
pub fn detect_zone(candles: &[Candle], need: usize, buy_zone_pct: Decimal) -> ZoneResult {
    if candles.len() < need {
        return ZoneResult::Insufficient {
            have: candles.len(),
            need,
        };
    }

    let low = candles
        .iter()
        .map(|c| c.low)
        .min()
        .expect("non-empty candle slice");
    let high = candles
        .iter()
        .map(|c| c.high)
        .max()
        .expect("non-empty candle slice");

    ZoneResult::Zone(Zone::from_extrema(low, high, buy_zone_pct))
}
