// Timestamp text formats. Fixed-width UTC strings so SQLite's lexical ordering
// is chronological ordering.

use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};

/// Capture/attempt timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
/// Aggregation keys (hour start).
pub const AGGREGATION_KEY_FORMAT: &str = "%Y-%m-%dT%H:00:00";

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Truncate to the start of the UTC hour.
pub fn hour_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_minute(0))
        .unwrap_or(ts)
}

pub fn aggregation_key(ts: DateTime<Utc>) -> String {
    hour_start(ts).format(AGGREGATION_KEY_FORMAT).to_string()
}

/// Closed `[start, end]` text bounds of the hour window identified by `window_start`.
pub fn window_bounds(window_start: DateTime<Utc>) -> (String, String) {
    let start = hour_start(window_start);
    let end = start + Duration::hours(1) - Duration::microseconds(1);
    (format_timestamp(start), format_timestamp(end))
}

/// Accepts `YYYY-MM-DDTHH:MM:SS[.ffffff]`, a space instead of `T`, or `YYYY-MM-DD HH:MM`.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = normalize_prefix(s);
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Parses an aggregation key, or anything `parse_timestamp` accepts, to its hour start.
pub fn parse_aggregation_key(s: &str) -> Option<DateTime<Utc>> {
    parse_timestamp(s).map(hour_start)
}

/// User-typed timestamp prefix to stored form: trims and replaces the date/time space with `T`.
pub fn normalize_prefix(s: &str) -> String {
    s.trim().replacen(' ', "T", 1)
}
