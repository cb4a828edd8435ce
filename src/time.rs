//! Conversions between `Ms` and calendar time.
//!
//! The core only ever sees Unix milliseconds. These helpers exist for the
//! layer that talks to humans: HTML `datetime-local` inputs arrive with
//! minute precision and no zone, and are treated as UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::model::Ms;

const FORM_MINUTE: &str = "%Y-%m-%dT%H:%M";
const FORM_SECOND: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse `2025-01-10T10:00` (or with seconds) as a UTC instant.
pub fn parse_form_minute(input: &str) -> Result<Ms, chrono::ParseError> {
    let input = input.trim();
    NaiveDateTime::parse_from_str(input, FORM_MINUTE)
        .or_else(|_| NaiveDateTime::parse_from_str(input, FORM_SECOND))
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Midnight UTC at the start of the given day, if the date exists.
pub fn day_start(year: i32, month: u32, day: u32) -> Option<Ms> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

pub fn to_datetime(ms: Ms) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// `HH:MM:SS`, hours unbounded. Sub-second remainders are truncated.
pub fn format_hms(duration: Ms) -> String {
    let total_secs = duration.max(0) / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
