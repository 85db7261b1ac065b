use std::time::Duration;
use chrono::{Local, TimeZone, Utc};
use crate::common::types::Timestamp;

/// Returns the time duration since UNIX_EPOCH in milliseconds.
pub fn current_time_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

pub fn duration_to_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Rounds `ts` down to a multiple of `step_ms`. Non-positive steps leave `ts` as is.
pub fn truncate_millis(ts: Timestamp, step_ms: i64) -> Timestamp {
    if step_ms <= 0 {
        return ts;
    }
    ts - ts.rem_euclid(step_ms)
}

/// Formats a millisecond timestamp as local wall-clock time with second precision.
pub fn format_timestamp(ts: Timestamp) -> String {
    let secs = ts.div_euclid(1000);
    match Local.timestamp_opt(secs, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S %z").to_string(),
        None => ts.to_string(),
    }
}
