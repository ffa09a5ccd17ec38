//! Timestamp helpers shared by the wire format and the key schema.

use chrono::{DateTime, Utc};

/// Format used for `failed_at` / `retried_at`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Format used for daily stat keys.
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Seconds since the epoch with sub-second precision.
pub fn to_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp() as f64 + f64::from(at.timestamp_subsec_nanos()) / 1_000_000_000.0
}

pub fn now_seconds() -> f64 {
    to_seconds(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn format_day(at: DateTime<Utc>) -> String {
    at.format(DAY_FORMAT).to_string()
}
