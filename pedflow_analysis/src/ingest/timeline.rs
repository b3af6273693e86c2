/// Location-history (timeline) JSON reader.
///
/// Converts a personal location-history export into flat GIS points so it
/// can be overlaid on sensor data. Three kinds of entries contribute:
///
/// - `visit`: the top candidate's place location, tagged with its semantic type;
/// - `activity`: the start and end positions of a movement;
/// - `timelinePath`: path samples, each offset in minutes from the entry's start.
///
/// Positions are `geo:LAT,LON` strings. An unparseable position or
/// timestamp drops that point only.

use std::fmt;
use std::path::Path;

use chrono::Duration;
use serde::Deserialize;
use serde_json::Value;

use crate::ingest::parse_timestamp;
use crate::logging::{self, Stage};
use crate::model::{FlowError, GeoPoint, Result, Timestamp};

// ============================================================================
// JSON Structures
// ============================================================================

/// Exports come either as a bare array or wrapped in `semanticSegments`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimelineFile {
    Items(Vec<TimelineItem>),
    Segments {
        #[serde(rename = "semanticSegments")]
        semantic_segments: Vec<TimelineItem>,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TimelineItem {
    #[serde(rename = "startTime")]
    start_time: Option<String>,
    #[serde(rename = "endTime")]
    end_time: Option<String>,
    visit: Option<Visit>,
    activity: Option<Activity>,
    #[serde(rename = "timelinePath")]
    timeline_path: Option<Vec<PathSample>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Visit {
    #[serde(rename = "topCandidate")]
    top_candidate: Option<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Candidate {
    #[serde(rename = "placeLocation")]
    place_location: Option<Value>,
    #[serde(rename = "semanticType")]
    semantic_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Activity {
    start: Option<Value>,
    end: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PathSample {
    point: Option<Value>,
    /// A string in most exports, occasionally a number.
    #[serde(rename = "durationMinutesOffsetFromStartTime")]
    offset_minutes: Option<Value>,
}

// ============================================================================
// Output
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointKind {
    Visit,
    ActivityStart,
    ActivityEnd,
    PathPoint,
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointKind::Visit => write!(f, "visit"),
            PointKind::ActivityStart => write!(f, "activity_start"),
            PointKind::ActivityEnd => write!(f, "activity_end"),
            PointKind::PathPoint => write!(f, "path_point"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelinePoint {
    pub timestamp: Timestamp,
    pub point: GeoPoint,
    pub kind: PointKind,
    pub semantic_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimelineStats {
    pub items: usize,
    pub points: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Timeline {
    pub points: Vec<TimelinePoint>,
    pub stats: TimelineStats,
}

// ============================================================================
// Parsing
// ============================================================================

/// Parses `geo:35.426180,140.291992`. Anything else is `None`.
pub fn parse_geo(raw: &str) -> Option<GeoPoint> {
    let coords = raw.trim().strip_prefix("geo:")?;
    let (lat, lon) = coords.split_once(',')?;
    crate::ingest::parse_point(lat, lon)
}

fn geo_value(value: Option<&Value>) -> Option<GeoPoint> {
    value.and_then(Value::as_str).and_then(parse_geo)
}

fn offset_value(value: Option<&Value>) -> Option<i64> {
    match value {
        None => Some(0),
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    }
}

pub fn read_timeline_from_path(path: impl AsRef<Path>) -> Result<Timeline> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(FlowError::MissingInput(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path)?;
    parse_timeline(&text)
}

/// Parses a location-history export into points, in file order.
pub fn parse_timeline(text: &str) -> Result<Timeline> {
    let items = match serde_json::from_str::<TimelineFile>(text)? {
        TimelineFile::Items(items) => items,
        TimelineFile::Segments { semantic_segments } => semantic_segments,
    };

    let (points, skipped) = items
        .iter()
        .map(item_points)
        .fold((Vec::new(), 0), |(mut all, skipped), (points, dropped)| {
            all.extend(points);
            (all, skipped + dropped)
        });

    let stats = TimelineStats {
        items: items.len(),
        points: points.len(),
        skipped,
    };

    logging::log_batch_summary(
        Stage::Ingest,
        "timeline points",
        stats.points + stats.skipped,
        stats.points,
        stats.skipped,
    );

    Ok(Timeline { points, stats })
}

/// Points from one entry, plus how many candidates were dropped.
fn item_points(item: &TimelineItem) -> (Vec<TimelinePoint>, usize) {
    let start = item.start_time.as_deref().and_then(parse_timestamp);
    let end = item.end_time.as_deref().and_then(parse_timestamp);

    let mut candidates: Vec<Option<TimelinePoint>> = Vec::new();

    if let Some(visit) = &item.visit {
        let candidate = visit.top_candidate.as_ref();
        let semantic_type = candidate
            .and_then(|c| c.semantic_type.clone())
            .or_else(|| Some("Unknown".to_string()));
        let point = geo_value(candidate.and_then(|c| c.place_location.as_ref()));
        candidates.push(make_point(start, point, PointKind::Visit, semantic_type));
    }

    if let Some(activity) = &item.activity {
        candidates.push(make_point(start, geo_value(activity.start.as_ref()), PointKind::ActivityStart, None));
        candidates.push(make_point(end, geo_value(activity.end.as_ref()), PointKind::ActivityEnd, None));
    }

    if let Some(path) = &item.timeline_path {
        match start {
            // Without a base time no sample can be placed.
            None => candidates.extend(path.iter().map(|_| None)),
            Some(base) => candidates.extend(path.iter().map(|sample| {
                let at = offset_value(sample.offset_minutes.as_ref())
                    .and_then(Duration::try_minutes)
                    .and_then(|offset| base.checked_add_signed(offset));
                make_point(at, geo_value(sample.point.as_ref()), PointKind::PathPoint, None)
            })),
        }
    }

    let total = candidates.len();
    let points: Vec<TimelinePoint> = candidates.into_iter().flatten().collect();
    let skipped = total - points.len();
    (points, skipped)
}

fn make_point(
    timestamp: Option<Timestamp>,
    point: Option<GeoPoint>,
    kind: PointKind,
    semantic_type: Option<String>,
) -> Option<TimelinePoint> {
    Some(TimelinePoint {
        timestamp: timestamp?,
        point: point?,
        kind,
        semantic_type,
    })
}

// ============================================================================
// Tests
// ============================================================================
