/// Readers for people-flow exports.
///
/// Submodules:
/// - `sensor_csv`: sensor count and sensor location CSV files.
/// - `timeline`: location-history JSON converted to GIS points.
///
/// Shared field parsers live here. Every parser returns `None` rather than
/// an error: a bad field drops its record, never the whole file.

pub mod sensor_csv;
pub mod timeline;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::model::{GeoPoint, Timestamp};

/// Naive layouts seen in sensor exports, interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

/// Parses an observation timestamp.
///
/// Accepts RFC 3339 (`2025-01-01T00:00:00+09:00`), the same with a space
/// separator, the naive layouts in `NAIVE_FORMATS`, and a bare date
/// (midnight). Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M%:z"] {
        if let Ok(ts) = DateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Parses a non-negative, finite people count.
pub fn parse_count(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Parses a finite number, treating blanks and `null`/`NaN` markers as absent.
pub fn parse_optional_number(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("nan") {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Builds a coordinate from latitude and longitude strings. Anything
/// unparseable or out of range yields `None`.
pub fn parse_point(lat: &str, lon: &str) -> Option<GeoPoint> {
    let latitude = parse_optional_number(lat)?;
    let longitude = parse_optional_number(lon)?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }
    Some(GeoPoint::new(latitude, longitude))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
