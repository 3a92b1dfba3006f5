//! Epoch-millisecond timestamps, the only time representation stored in the
//! graph or sent over the wire.

use chrono::Utc;

/// Current time as epoch milliseconds.
#[must_use]
pub fn epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse an RFC 3339 timestamp into epoch milliseconds.
pub fn parse_rfc3339_ms(value: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.timestamp_millis())
}
