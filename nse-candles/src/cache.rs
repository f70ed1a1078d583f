//! Market Data Cache (§4.2).
//!
//! Shared, process-wide `symbol → latest Tick` snapshot. Many readers, a
//! single writer per symbol (the ingest worker owning that partition).
//! Writes replace the whole `Tick` entry atomically — never a partial
//! field update — by taking the write lock once per tick.

use fnv::FnvHashMap;
use nse_core::model::{PriceTier, PricedTier, Symbol, Tick};
use nse_store::repository::CandleRepository;
use parking_lot::RwLock;
use rust_decimal::Decimal;

/// Process-wide last-tick snapshot with a three-tier last-price fallback:
/// live cache, then the store's most recent `DAILY.close`, then absent.
#[derive(Debug, Default)]
pub struct MarketDataCache {
    ticks: RwLock<FnvHashMap<Symbol, Tick>>,
}

impl MarketDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replaces the cached tick for `tick.symbol`.
    pub fn update(&self, tick: Tick) {
        self.ticks.write().insert(tick.symbol.clone(), tick);
    }

    pub fn latest(&self, symbol: &Symbol) -> Option<Tick> {
        self.ticks.read().get(symbol).cloned()
    }

    /// Resolves the last price for `symbol`: live cache first, then the
    /// store's most recent daily close, else `None`. The caller always
    /// receives an explicit tier tag alongside the price.
    pub async fn get_last_price(
        &self,
        symbol: &Symbol,
        candles: &dyn CandleRepository,
    ) -> Option<PricedTier> {
        if let Some(tick) = self.latest(symbol) {
            return Some(PricedTier {
                price: tick.last_price,
                tier: PriceTier::Live,
            });
        }

        let daily = candles
            .get_recent(symbol, nse_core::clock::Timeframe::Daily, 1)
            .await
            .ok()?;
        daily.last().map(|c| PricedTier {
            price: c.close,
            tier: PriceTier::PrevDayClose,
        })
    }
}

/// Validates a tick at ingest, per §4.3's rejection rules. Returns the
/// rejection reason rather than throwing; callers silently drop rejected
/// ticks and increment a counter.
pub fn validate_tick(tick: &Tick, within_session: bool) -> Result<(), nse_core::model::TickRejection> {
    if tick.last_price <= Decimal::ZERO {
        return Err(nse_core::model::TickRejection::NonPositivePrice);
    }
    if tick.volume < Decimal::ZERO {
        return Err(nse_core::model::TickRejection::NegativeVolume);
    }
    if !within_session {
        return Err(nse_core::model::TickRejection::OutsideSession);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tick(symbol: &str, price: Decimal) -> Tick {
        Tick {
            symbol: Symbol::from(symbol),
            last_price: price,
            bid: price - dec!(0.05),
            ask: price + dec!(0.05),
            volume: dec!(100),
            ts_ms: 0,
        }
    }

    #[test]
    fn update_replaces_whole_entry() {
        let cache = MarketDataCache::new();
        cache.update(tick("INFY", dec!(1500)));
        cache.update(tick("INFY", dec!(1501)));
        assert_eq!(cache.latest(&Symbol::from("INFY")).unwrap().last_price, dec!(1501));
    }

    #[test]
    fn rejects_non_positive_price() {
        let t = tick("INFY", dec!(0));
        assert_eq!(
            validate_tick(&t, true),
            Err(nse_core::model::TickRejection::NonPositivePrice)
        );
    }

    #[test]
    fn rejects_negative_volume() {
        let mut t = tick("INFY", dec!(100));
        t.volume = dec!(-1);
        assert_eq!(
            validate_tick(&t, true),
            Err(nse_core::model::TickRejection::NegativeVolume)
        );
    }

    #[test]
    fn rejects_outside_session() {
        let t = tick("INFY", dec!(100));
        assert_eq!(
            validate_tick(&t, false),
            Err(nse_core::model::TickRejection::OutsideSession)
        );
    }
}
