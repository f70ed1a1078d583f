//! Session clock.
//!
//! Pure functions only — no state. All session-hours logic is expressed in
//! IST (UTC+05:30); the NSE cash session runs 09:15–15:30 IST, Monday to
//! Friday. `09:15` is inside the session; `15:30` is outside (the close is
//! exclusive), per the boundary properties in the spec's testable-properties
//! section.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Asia::Kolkata;

/// NSE cash-session open, in IST.
pub const SESSION_OPEN: NaiveTime = NaiveTime::from_hms_opt(9, 15, 0).unwrap();

/// NSE cash-session close, in IST. Exclusive upper bound.
pub const SESSION_CLOSE: NaiveTime = NaiveTime::from_hms_opt(15, 30, 0).unwrap();

/// Returns `true` if `ts` falls within a Monday–Friday NSE cash session.
pub fn is_within_session(ts: DateTime<Utc>) -> bool {
    let local = ts.with_timezone(&Kolkata);
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let t = local.time();
    t >= SESSION_OPEN && t < SESSION_CLOSE
}

/// Returns `true` if the session for `ts`'s calendar day closes within
/// `window` of `ts`. Used by SMS's "suppress new signals near the close"
/// guard.
pub fn market_closes_within(ts: DateTime<Utc>, window: Duration) -> bool {
    let local = ts.with_timezone(&Kolkata);
    let close_today = local
        .date_naive()
        .and_time(SESSION_CLOSE)
        .and_local_timezone(Kolkata)
        .single();
    match close_today {
        Some(close) => {
            let remaining = close.signed_duration_since(local);
            remaining >= Duration::zero() && remaining <= window
        }
        None => false,
    }
}

/// Truncates `ts` down to the start of its minute (seconds and sub-seconds
/// zeroed). The result bucket is inclusive of a tick that lands exactly on
/// the minute boundary: such a tick belongs to the *new* minute.
pub fn floor_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp() - ts.timestamp() % 60;
    Utc.timestamp_opt(secs, 0).single().expect("valid minute floor")
}

/// Aligns `ts` down to the start of its `tf_minutes` bucket, counting
/// buckets forward from the day's session open (09:15 IST) so that, for
/// example, the first 25-minute bar always begins at 09:15 IST rather than
/// at an arbitrary epoch-aligned boundary.
///
/// For timestamps before the session opens on their calendar day (e.g. a
/// staleness sweep running just after midnight), the session open for that
/// same calendar day is used as the reference point regardless.
pub fn floor_to_interval_from_session_start(ts: DateTime<Utc>, tf_minutes: i64) -> DateTime<Utc> {
    debug_assert!(tf_minutes > 0);
    let local = ts.with_timezone(&Kolkata);
    let session_start = local
        .date_naive()
        .and_time(SESSION_OPEN)
        .and_local_timezone(Kolkata)
        .single()
        .expect("valid session start");

    let elapsed_minutes = local
        .signed_duration_since(session_start)
        .num_minutes()
        .max(0);
    let bucket_index = elapsed_minutes / tf_minutes;
    let aligned = session_start + Duration::minutes(bucket_index * tf_minutes);
    aligned.with_timezone(&Utc)
}

/// A timeframe handled by the candle pipeline.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
pub enum Timeframe {
    M1,
    M25,
    M125,
    Daily,
}

impl Timeframe {
    /// Bucket width in minutes. `Daily` is a nominal 375 minutes (the length
    /// of the cash session) purely for bookkeeping; daily candles are never
    /// built by accumulating minute buckets.
    pub fn minutes(self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M25 => 25,
            Timeframe::M125 => 125,
            Timeframe::Daily => 375,
        }
    }

    /// Minimum closed-candle lookback the candle store must guarantee
    /// before the confluence analyser may run, per the spec's data model.
    pub fn lookback_floor(self) -> usize {
        match self {
            Timeframe::M1 => 375,
            Timeframe::M25 => 75,
            Timeframe::M125 => 175,
            Timeframe::Daily => 15,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ist(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Kolkata
            .with_ymd_and_hms(y, m, d, h, mi, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn session_open_is_inside_close_is_outside() {
        // B2
        assert!(is_within_session(ist(2026, 7, 28, 9, 15, 0)));
        assert!(!is_within_session(ist(2026, 7, 28, 15, 30, 0)));
        assert!(is_within_session(ist(2026, 7, 28, 15, 29, 59)));
    }

    #[test]
    fn weekends_are_outside_session() {
        // 2026-08-01 is a Saturday.
        assert!(!is_within_session(ist(2026, 8, 1, 10, 0, 0)));
    }

    #[test]
    fn tick_on_minute_boundary_belongs_to_new_bucket() {
        // B1
        let t = ist(2026, 7, 28, 9, 16, 0);
        let bucket = floor_to_minute(t);
        assert_eq!(bucket, t);
        let prev = ist(2026, 7, 28, 9, 15, 59);
        assert_eq!(floor_to_minute(prev), ist(2026, 7, 28, 9, 15, 0));
    }

    #[test]
    fn m25_buckets_align_to_session_open() {
        let first_bar_start = ist(2026, 7, 28, 9, 15, 0);
        assert_eq!(
            floor_to_interval_from_session_start(first_bar_start, 25),
            first_bar_start
        );
        let mid_bar = ist(2026, 7, 28, 9, 40, 0);
        assert_eq!(
            floor_to_interval_from_session_start(mid_bar, 25),
            first_bar_start
        );
        let next_bar = ist(2026, 7, 28, 9, 40, 1);
        assert_eq!(
            floor_to_interval_from_session_start(next_bar, 25),
            ist(2026, 7, 28, 9, 40, 0)
        );
    }
}
