//! Candle Store (§4.5).
//!
//! A read-through cache in front of the injected [`CandleRepository`].
//! `get_recent` enforces the per-timeframe lookback floors from the data
//! model (375 M1 / 75 M25 / 175 M125 / ≥15 Daily): a short result is
//! returned as [`LookbackResult::Insufficient`], never an error, so the
//! confluence analyser can skip cleanly instead of unwinding an exception.

use nse_core::clock::Timeframe;
use nse_core::model::{Candle, Symbol};
use nse_store::repository::CandleRepository;

#[derive(Debug, Clone, PartialEq)]
pub enum LookbackResult {
    Ready(Vec<Candle>),
    Insufficient { have: usize, need: usize },
}

/// Thin façade over a [`CandleRepository`] enforcing the spec's lookback
/// floors. No extra in-process caching layer is added on top of the
/// repository here: the repository implementation is expected to be the
/// cache (e.g. an LRU in front of the database), matching the spec's
/// "cache-over-database" description of this component.
#[derive(Debug, Clone)]
pub struct CandleCache<'a> {
    repo: &'a dyn CandleRepository,
}

impl<'a> CandleCache<'a> {
    pub fn new(repo: &'a dyn CandleRepository) -> Self {
        Self { repo }
    }

    pub async fn get_recent(&self, symbol: &Symbol, tf: Timeframe) -> Result<LookbackResult, nse_store::StoreError> {
        let need = tf.lookback_floor();
        let candles = self.repo.get_recent(symbol, tf, need).await?;
        if candles.len() < need {
            Ok(LookbackResult::Insufficient {
                have: candles.len(),
                need,
            })
        } else {
            Ok(LookbackResult::Ready(candles))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nse_store::memory::InMemoryStore;
    use rust_decimal_macros::dec;

    fn candle(symbol: &str) -> Candle {
        Candle {
            symbol: Symbol::from(symbol),
            timeframe: Timeframe::M25,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100),
            volume: dec!(10),
            open_ts: Utc::now(),
            close_ts: Utc::now() + chrono::Duration::minutes(25),
        }
    }

    #[tokio::test]
    async fn short_history_is_insufficient_not_an_error() {
        let store = InMemoryStore::new();
        store.persist(candle("INFY")).await.unwrap();
        let cache = CandleCache::new(&store);
        let result = cache.get_recent(&Symbol::from("INFY"), Timeframe::M25).await.unwrap();
        assert_eq!(result, LookbackResult::Insufficient { have: 1, need: 75 });
    }
}
