//! Helper functions and utilities
//!
//! This module contains common helper functions used throughout the engine.

use chrono::{DateTime, Duration, SubsecRound, TimeZone, Utc};

/// Current time truncated to microseconds.
///
/// Every persisted timestamp goes through here so that both store backends
/// keep identical precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Microseconds since the Unix epoch, used as the sortable column in SQL
pub fn to_micros(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_micros()
}

/// Inverse of [`to_micros`]
pub fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_micros(micros).single()
}

/// Cutoff instant for an age threshold measured from now.
///
/// Negative ages count as zero. Returns `None` when the cutoff would fall
/// before the earliest representable instant, so nothing can be that old.
pub fn cutoff_for_age(max_age: Duration) -> Option<DateTime<Utc>> {
    now().checked_sub_signed(max_age.max(Duration::zero()))
}

/// Format a timestamp for display
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Format a duration as a compact human-readable string
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Truncate text to a maximum length with ellipsis
pub fn truncate_text(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_length.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
