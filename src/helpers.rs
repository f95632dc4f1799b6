//! Shared helpers for value rounding and timestamp handling.
//!
//! Reported values (forecasts, dashboard KPIs) are rounded to 2 decimal
//! places through `Decimal` so the JSON output and the console report agree.
//! Non-finite inputs have no decimal representation and stay `None`.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Timelike, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Byte order mark written at the start of collector CSV files (`utf-8-sig`).
pub(crate) const UTF8_BOM: &str = "\u{feff}";

/// Round an f64 to 2 decimal places.
pub(crate) fn round_2dp(v: f64) -> Option<Decimal> {
    if !v.is_finite() {
        tracing::warn!("round_2dp received non-finite value {}", v);
        return None;
    }
    Decimal::from_f64(v)
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

/// Round an f64 to 2 decimal places and convert back for JSON output.
pub(crate) fn round_2dp_f64(v: f64) -> Option<f64> {
    round_2dp(v).and_then(|d| d.to_f64())
}

/// Parse a timestamp as written by the collectors and the processing
/// notebooks. Values without an offset are taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%z"];
    for fmt in &OFFSET_FORMATS {
        if let Ok(dt) = DateTime::<FixedOffset>::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    for fmt in &NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Floor a datetime to the start of its hour.
pub(crate) fn floor_to_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive()
        .and_hms_opt(dt.time().hour(), 0, 0)
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(dt)
}

/// Parse a numeric CSV cell. Empty cells and `NaN` are missing values;
/// a decimal comma is accepted.
pub(crate) fn parse_cell(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let v = s
        .parse::<f64>()
        .or_else(|_| s.replace(',', ".").parse::<f64>())
        .ok()?;
    v.is_finite().then_some(v)
}

/// File-name friendly form of a city or station name.
pub(crate) fn slug(name: &str) -> String {
    name.trim().to_lowercase().replace(char::is_whitespace, "_")
}
