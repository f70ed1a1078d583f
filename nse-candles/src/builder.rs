//! Tick→Candle Builder (§4.3).
//!
//! Single writer per symbol: `on_tick` must be called at most once per tick
//! per symbol, serialised by the caller (the ingest worker pool partitions
//! by symbol, see `nse-core::partition`). Closed candles are never handed
//! back to the caller inline — they are pushed onto a broadcast channel the
//! aggregator subscribes to, per the spec's "reimplement as channels" design
//! note.

use chrono::{DateTime, Duration, Utc};
use fnv::FnvHashMap;
use nse_core::clock::{floor_to_minute, is_within_session, Timeframe};
use nse_core::model::{Candle, PartialCandle, Symbol, Tick};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cache::validate_tick;

/// Owns every symbol's in-progress M1 candle. Despite the `Mutex`, normal
/// operation never contends it across symbols that matter: callers are
/// expected to route `on_tick` calls for a given symbol through a single
/// partition, so the lock is held only for the duration of one bucket
/// mutation.
pub struct CandleBuilder {
    partials: Mutex<FnvHashMap<Symbol, PartialCandle>>,
    closed_tx: broadcast::Sender<Candle>,
}

impl std::fmt::Debug for CandleBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleBuilder").finish_non_exhaustive()
    }
}

/// Watchdog staleness window: a partial older than 2x its timeframe is
/// force-closed using its current values (no backfill of missed minutes).
const STALENESS_MULTIPLE: i64 = 2;

impl CandleBuilder {
    pub fn new(channel_capacity: usize) -> Self {
        let (closed_tx, _rx) = broadcast::channel(channel_capacity);
        Self {
            partials: Mutex::new(FnvHashMap::default()),
            closed_tx,
        }
    }

    /// Subscribes to the closed-M1-candle channel. The aggregator (and any
    /// other downstream consumer) holds one of these; there is no inline
    /// callback.
    pub fn subscribe_closed(&self) -> broadcast::Receiver<Candle> {
        self.closed_tx.subscribe()
    }

    /// Accepts one tick. Rejections (bad price/volume, outside session) are
    /// silent drops with no error surfaced to the caller — per the spec,
    /// input rejection increments a counter, never raises.
    pub fn on_tick(&self, tick: Tick) {
        if validate_tick(&tick, is_within_session(tick.ts())).is_err() {
            return;
        }

        let bucket_start = floor_to_minute(tick.ts());
        let mut partials = self.partials.lock();

        match partials.get_mut(&tick.symbol) {
            None => {
                partials.insert(
                    tick.symbol.clone(),
                    PartialCandle::open_at(
                        tick.symbol.clone(),
                        Timeframe::M1,
                        bucket_start,
                        tick.last_price,
                        tick.volume,
                        tick.ts(),
                    ),
                );
            }
            Some(partial) if bucket_start > partial.open_ts => {
                let closed = partial.close(bucket_start);
                self.emit_closed(closed);
                *partial = PartialCandle::open_at(
                    tick.symbol.clone(),
                    Timeframe::M1,
                    bucket_start,
                    tick.last_price,
                    tick.volume,
                    tick.ts(),
                );
            }
            Some(partial) => {
                partial.apply_tick(tick.last_price, tick.volume, tick.ts());
            }
        }
    }

    fn emit_closed(&self, candle: Candle) {
        if !candle.is_valid() {
            warn!(symbol = %candle.symbol, ?candle.timeframe, "refusing to emit invariant-violating candle");
            return;
        }
        // A lagging/absent subscriber is not a bug in the builder; drop.
        let _ = self.closed_tx.send(candle);
    }

    /// Closes any partial whose `last_tick_ts` is more than
    /// `STALENESS_MULTIPLE * tf_minutes` old, as of `now`. Intended to be
    /// driven by a 2-second interval task (see [`CandleBuilder::spawn_watchdog`]).
    pub fn sweep_stale(&self, now: DateTime<Utc>) {
        let closed: Vec<Candle> = {
            let mut partials = self.partials.lock();
            let stale_symbols: Vec<Symbol> = partials
                .iter()
                .filter(|(_, p)| {
                    now - p.last_tick_ts
                        > Duration::minutes(STALENESS_MULTIPLE * p.timeframe.minutes())
                })
                .map(|(s, _)| s.clone())
                .collect();

            stale_symbols
                .into_iter()
                .filter_map(|symbol| {
                    let partial = partials.remove(&symbol)?;
                    debug!(%symbol, "closing stale partial candle via watchdog sweep");
                    Some(partial.close(now))
                    // Re-insert nothing: the next tick for this symbol opens
                    // a fresh partial, per §4.3 ("no backfill of missed minutes").
                })
                .collect()
        };

        for candle in closed {
            self.emit_closed(candle);
        }
    }

    /// Spawns the 2-second watchdog task on the current Tokio runtime.
    pub fn spawn_watchdog(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(2));
            loop {
                ticker.tick().await;
                self.sweep_stale(Utc::now());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nse_core::clock::SESSION_OPEN;
    use rust_decimal_macros::dec;

    fn session_tick(symbol: &str, price: rust_decimal::Decimal, minute_offset: i64) -> Tick {
        use chrono::TimeZone;
        let day = chrono_tz::Asia::Kolkata.with_ymd_and_hms(2026, 7, 28, 9, 15, 0).unwrap();
        let ts = day + Duration::minutes(minute_offset);
        Tick {
            symbol: Symbol::from(symbol),
            last_price: price,
            bid: price,
            ask: price,
            volume: dec!(10),
            ts_ms: ts.with_timezone(&Utc).timestamp_millis(),
        }
    }

    #[test]
    fn closes_candle_on_minute_boundary_crossing() {
        let _ = SESSION_OPEN;
        let builder = CandleBuilder::new(16);
        let mut rx = builder.subscribe_closed();

        builder.on_tick(session_tick("RELIANCE", dec!(2500), 0));
        builder.on_tick(session_tick("RELIANCE", dec!(2505), 0));
        builder.on_tick(session_tick("RELIANCE", dec!(2490), 1));

        let closed = rx.try_recv().expect("expected a closed candle");
        assert_eq!(closed.open, dec!(2500));
        assert_eq!(closed.high, dec!(2505));
        assert_eq!(closed.low, dec!(2500));
        assert_eq!(closed.close, dec!(2505));
        assert!(closed.is_valid());
    }

    #[tokio::test]
    async fn watchdog_closes_stale_partial_without_backfill() {
        let builder = std::sync::Arc::new(CandleBuilder::new(16));
        let mut rx = builder.subscribe_closed();
        let tick = session_tick("INFY", dec!(1500), 0);
        let base_ts = tick.ts();
        builder.on_tick(tick);

        builder.sweep_stale(base_ts + Duration::minutes(3));
        let closed = rx.try_recv().expect("stale partial should be closed");
        assert_eq!(closed.symbol, Symbol::from("INFY"));
        assert_eq!(closed.close_ts, base_ts + Duration::minutes(3));
    }
}
