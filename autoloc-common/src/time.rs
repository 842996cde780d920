//! Timestamp utilities
//!
//! The engine keeps every time as `f64` seconds since the Unix epoch.
//! `chrono` is only used at the edges: wall clock and display.

use chrono::{DateTime, TimeZone, Utc};

/// Seconds since 1970-01-01T00:00:00Z
pub type Time = f64;

/// Current wall-clock time as epoch seconds
pub fn now() -> Time {
    to_epoch(&Utc::now())
}

/// Convert a chrono timestamp to epoch seconds
pub fn to_epoch(dt: &DateTime<Utc>) -> Time {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) * 1e-9
}

/// Convert epoch seconds to a chrono timestamp
///
/// Returns `None` for non-finite or out-of-range values.
pub fn to_datetime(t: Time) -> Option<DateTime<Utc>> {
    if !t.is_finite() {
        return None;
    }
    let secs = t.floor();
    let nanos = ((t - secs) * 1e9).round().min(999_999_999.0) as u32;
    Utc.timestamp_opt(secs as i64, nanos).single()
}

/// Human-readable timestamp with one decimal, e.g. `2024-03-01 12:00:03.4`
pub fn format_time(t: Time) -> String {
    match to_datetime(t) {
        Some(dt) => format!(
            "{}.{}",
            dt.format("%F %T"),
            dt.timestamp_subsec_nanos() / 100_000_000
        ),
        None => format!("{:.1}", t),
    }
}
