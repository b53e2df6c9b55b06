//! Utility functions for minireg

use chrono::{DateTime, Utc};

/// Layout of the human-readable timestamps stored beside the unix ones
pub const READABLE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Get current Unix timestamp (seconds)
pub fn timestamp_now() -> i64 {
    Utc::now().timestamp()
}

/// Format a unix timestamp (seconds) as a readable UTC string.
pub fn format_timestamp(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|t| t.format(READABLE_TIME_FORMAT).to_string())
        .unwrap_or_default()
}

/// Current time as (unix seconds, readable UTC string).
pub fn now_stamp() -> (i64, String) {
    let now = Utc::now();
    (now.timestamp(), now.format(READABLE_TIME_FORMAT).to_string())
}
