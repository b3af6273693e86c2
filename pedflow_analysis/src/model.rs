/// Core data types for the pedestrian-flow analysis.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no I/O: only types, their small invariants, and the crate-wide
/// error enum.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use thiserror::Error;

/// Observation timestamps keep the offset they were recorded with
/// (sensor exports are `+09:00`); ordering and equality are by instant.
pub type Timestamp = DateTime<FixedOffset>;

// ---------------------------------------------------------------------------
// Geography
// ---------------------------------------------------------------------------

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Arithmetic mean of a set of points. Returns `None` for an empty set.
    ///
    /// Zones and repeated sensor rows are both represented by this mean.
    pub fn mean<'a, I>(points: I) -> Option<GeoPoint>
    where
        I: IntoIterator<Item = &'a GeoPoint>,
    {
        let (n, lat, lon) = points
            .into_iter()
            .fold((0usize, 0.0, 0.0), |(n, lat, lon), p| {
                (n + 1, lat + p.latitude, lon + p.longitude)
            });
        if n == 0 {
            None
        } else {
            Some(GeoPoint::new(lat / n as f64, lon / n as f64))
        }
    }
}

/// A physical sensor position or a named place, identified by the same
/// string used as its column name in an `ObservationSeries`.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub id: String,
    pub point: GeoPoint,
}

// ---------------------------------------------------------------------------
// Reading types
// ---------------------------------------------------------------------------

/// One normalized row of a people-flow export.
///
/// Coordinates are optional: location metadata usually lives in a
/// separate sensor file and is joined on `sensor_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRecord {
    pub sensor_id: String,
    pub location_name: Option<String>,
    pub timestamp: Timestamp,
    pub people_count: f64,
    pub occupancy: Option<f64>,
    pub point: Option<GeoPoint>,
}

/// A single people count for a location or zone at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub id: String,
    pub timestamp: Timestamp,
    pub count: f64,
}

impl Observation {
    pub fn new(id: impl Into<String>, timestamp: Timestamp, count: f64) -> Self {
        Self {
            id: id.into(),
            timestamp,
            count,
        }
    }
}

/// Which field of a `SensorRecord` names its series column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKey {
    /// Sensor identifier, e.g. `jp.sendai.Blesensor.per3600.1`.
    #[serde(alias = "sensor_id")]
    Id,
    /// Human-readable location name; falls back to the sensor id when absent.
    #[default]
    Name,
}

impl SensorRecord {
    /// Column name for this record under the given key.
    pub fn key(&self, key: SeriesKey) -> &str {
        match key {
            SeriesKey::Id => &self.sensor_id,
            SeriesKey::Name => self.location_name.as_deref().unwrap_or(&self.sensor_id),
        }
    }

    pub fn observation(&self, key: SeriesKey) -> Observation {
        Observation::new(self.key(key), self.timestamp, self.people_count)
    }
}

// ---------------------------------------------------------------------------
// Edge types
// ---------------------------------------------------------------------------

/// An ordered pair of locations or zones whose interaction is scored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize, serde::Serialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Output column name: `"{source} - {target}"`.
    pub fn label(&self) -> String {
        format!("{} - {}", self.source, self.target)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.source, self.target)
    }
}

/// Great-circle length of an edge, computed once from the mean
/// coordinates of both endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeDistance {
    pub edge: Edge,
    pub meters: f64,
}

/// Why an edge produced no output column.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The endpoint has no known coordinates.
    UnknownEndpoint(String),
    /// The endpoint has coordinates but no column in the observation series.
    MissingFromSeries(String),
    /// Both endpoints resolve to the same position (or a degenerate one).
    NonPositiveDistance(f64),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnknownEndpoint(id) => write!(f, "unknown location '{}'", id),
            SkipReason::MissingFromSeries(id) => write!(f, "no observations for '{}'", id),
            SkipReason::NonPositiveDistance(d) => write!(f, "distance {:.3} m is not positive", d),
        }
    }
}

/// An edge left out of a flow table, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEdge {
    pub edge: Edge,
    pub reason: SkipReason,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that abort a batch run.
///
/// Per-record problems (bad timestamps, unparseable coordinates, unknown
/// edge endpoints) are not errors: they are skipped and counted.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required input file does not exist.
    #[error("input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    /// A required column is absent from a CSV header, after alias normalization.
    #[error("{file}: missing required column '{column}'")]
    MissingColumn { file: String, column: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;
