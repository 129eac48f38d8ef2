//! Wall-clock helpers
//!
//! Deadlines are absolute Unix timestamps in nanoseconds.

use std::time::Duration;

use chrono::Utc;

/// Returns the current Unix timestamp in nanoseconds.
///
/// Saturates at `i64::MAX` past the year 2262.
pub fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Returns the deadline `ttl` after `now`, saturating instead of overflowing.
pub fn deadline_after(now: i64, ttl: Duration) -> i64 {
    let ttl = i64::try_from(ttl.as_nanos()).unwrap_or(i64::MAX);
    now.saturating_add(ttl)
}
