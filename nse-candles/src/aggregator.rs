//! Candle Aggregator (§4.4).
//!
//! Subscribes to the builder's closed-M1 channel (never an inline callback)
//! and maintains M25/M125 partials aligned to the session start, so the
//! first 25-minute and 125-minute bars both begin at 09:15 IST. Closed
//! coarser bars are persisted via the injected [`CandleRepository`] and
//! re-published on this aggregator's own closed-candle channel.

use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use nse_core::clock::{floor_to_interval_from_session_start, Timeframe};
use nse_core::model::{Candle, PartialCandle, Symbol};
use nse_store::repository::CandleRepository;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

fn seed_partial(tf: Timeframe, bucket_start: DateTime<Utc>, m1: &Candle) -> PartialCandle {
    let mut partial = PartialCandle::open_at(
        m1.symbol.clone(),
        tf,
        bucket_start,
        m1.open,
        rust_decimal::Decimal::ZERO,
        m1.close_ts,
    );
    partial.merge_candle(m1);
    partial
}

struct AggregatorState {
    m25: FnvHashMap<Symbol, PartialCandle>,
    m125: FnvHashMap<Symbol, PartialCandle>,
}

pub struct CandleAggregator {
    state: Mutex<AggregatorState>,
    closed_tx: broadcast::Sender<Candle>,
}

impl std::fmt::Debug for CandleAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleAggregator").finish_non_exhaustive()
    }
}

impl CandleAggregator {
    pub fn new(channel_capacity: usize) -> Self {
        let (closed_tx, _rx) = broadcast::channel(channel_capacity);
        Self {
            state: Mutex::new(AggregatorState {
                m25: FnvHashMap::default(),
                m125: FnvHashMap::default(),
            }),
            closed_tx,
        }
    }

    pub fn subscribe_closed(&self) -> broadcast::Receiver<Candle> {
        self.closed_tx.subscribe()
    }

    /// Runs the aggregator's channel-consumer loop against an M1 receiver,
    /// persisting and republishing every closed M25/M125 bar. Spawned once
    /// at startup; never called inline from the tick path.
    pub async fn run(
        self: std::sync::Arc<Self>,
        mut m1_rx: broadcast::Receiver<Candle>,
        candles: std::sync::Arc<dyn CandleRepository>,
    ) {
        loop {
            match m1_rx.recv().await {
                Ok(m1) => self.on_m1_closed(m1, candles.as_ref()).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "aggregator lagged behind M1 candle stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Feeds one closed M1 candle into both the M25 and M125 aggregation
    /// ladders.
    pub async fn on_m1_closed(&self, m1: Candle, candles: &dyn CandleRepository) {
        self.roll_up(Timeframe::M25, &m1, candles).await;
        self.roll_up(Timeframe::M125, &m1, candles).await;
    }

    async fn roll_up(&self, tf: Timeframe, m1: &Candle, candles: &dyn CandleRepository) {
        let bucket_start = floor_to_interval_from_session_start(m1.open_ts, tf.minutes());

        let maybe_closed = {
            let mut state = self.state.lock();
            let map = match tf {
                Timeframe::M25 => &mut state.m25,
                Timeframe::M125 => &mut state.m125,
                _ => unreachable!("roll_up only targets M25/M125"),
            };

            match map.get_mut(&m1.symbol) {
                None => {
                    map.insert(m1.symbol.clone(), seed_partial(tf, bucket_start, m1));
                    None
                }
                Some(partial) if bucket_start > partial.open_ts => {
                    let closed = partial.close(bucket_start);
                    *partial = seed_partial(tf, bucket_start, m1);
                    Some(closed)
                }
                Some(partial) => {
                    partial.merge_candle(m1);
                    None
                }
            }
        };

        if let Some(closed) = maybe_closed {
            self.publish(closed, candles).await;
        }
    }

    /// Force-closes any M25/M125 partial whose aligned boundary has already
    /// passed as of `now`, even though no new M1 candle crossed it (e.g. a
    /// low-liquidity symbol). The bar closes using its last known close.
    pub async fn sweep_boundary(&self, now: DateTime<Utc>, candles: &dyn CandleRepository) {
        let closed: Vec<Candle> = {
            let mut state = self.state.lock();
            let mut out = Vec::new();
            for (tf, map) in [
                (Timeframe::M25, &mut state.m25),
                (Timeframe::M125, &mut state.m125),
            ] {
                let due: Vec<Symbol> = map
                    .iter()
                    .filter(|(_, p)| floor_to_interval_from_session_start(now, tf.minutes()) > p.open_ts)
                    .map(|(s, _)| s.clone())
                    .collect();
                for symbol in due {
                    if let Some(partial) = map.remove(&symbol) {
                        let close_ts = partial.open_ts + chrono::Duration::minutes(tf.minutes());
                        out.push(partial.close(close_ts));
                    }
                }
            }
            out
        };

        for candle in closed {
            self.publish(candle, candles).await;
        }
    }

    async fn publish(&self, candle: Candle, candles: &dyn CandleRepository) {
        if !candle.is_valid() {
            warn!(symbol = %candle.symbol, "refusing to publish invariant-violating aggregated candle");
            return;
        }
        if let Err(err) = candles.persist(candle.clone()).await {
            warn!(%err, symbol = %candle.symbol, "failed to persist aggregated candle");
        }
        let _ = self.closed_tx.send(candle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use nse_store::memory::InMemoryStore;
    use rust_decimal_macros::dec;

    fn m1(symbol: &str, open_ts: DateTime<Utc>, o: rust_decimal::Decimal, h: rust_decimal::Decimal, l: rust_decimal::Decimal, c: rust_decimal::Decimal, v: rust_decimal::Decimal) -> Candle {
        Candle {
            symbol: Symbol::from(symbol),
            timeframe: Timeframe::M1,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
            open_ts,
            close_ts: open_ts + Duration::minutes(1),
        }
    }

    #[tokio::test]
    async fn m25_aggregates_conservation_over_constituents() {
        // P2
        use chrono::TimeZone;
        let store = InMemoryStore::new();
        let aggregator = CandleAggregator::new(16);
        let session_start = chrono_tz::Asia::Kolkata
            .with_ymd_and_hms(2026, 7, 28, 9, 15, 0)
            .unwrap()
            .with_timezone(&Utc);

        let bars = [
            (dec!(100), dec!(105), dec!(99), dec!(104), dec!(10)),
            (dec!(104), dec!(110), dec!(103), dec!(108), dec!(20)),
            (dec!(108), dec!(109), dec!(95), dec!(96), dec!(15)),
        ];

        for (i, (o, h, l, c, v)) in bars.iter().enumerate() {
            let candle = m1("RELIANCE", session_start + Duration::minutes(i as i64), *o, *h, *l, *c, *v);
            aggregator.on_m1_closed(candle, &store).await;
        }

        // Force the boundary closed by advancing past the 25-minute mark.
        aggregator
            .sweep_boundary(session_start + Duration::minutes(26), &store)
            .await;

        let persisted = store
            .get_recent(&Symbol::from("RELIANCE"), Timeframe::M25, 10)
            .await
            .unwrap();
        assert_eq!(persisted.len(), 1);
        let bar = &persisted[0];
        assert_eq!(bar.open, dec!(100));
        assert_eq!(bar.close, dec!(96));
        assert_eq!(bar.high, dec!(110));
        assert_eq!(bar.low, dec!(95));
        assert_eq!(bar.volume, dec!(45));
    }
}
