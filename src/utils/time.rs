//! Time and timestamp utilities
//!
//! All timestamps in the event log are epoch milliseconds. Timeline and
//! statistics bucketing derive from these helpers so every component
//! agrees on window boundaries.

/// Milliseconds in one hour, the timeline bucket width.
pub const HOUR_MS: i64 = 3_600_000;

/// Current Unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Floor a timestamp to the start of its hour bucket.
pub fn hour_bucket(timestamp_ms: i64) -> i64 {
    (timestamp_ms / HOUR_MS) * HOUR_MS
}

/// Calendar day key (`YYYY-MM-DD`, UTC) for the statistics cache.
pub fn day_key(timestamp_ms: i64) -> String {
    match chrono::DateTime::from_timestamp_millis(timestamp_ms) {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => "invalid".to_string(),
    }
}
