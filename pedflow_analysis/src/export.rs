/// CSV output for flow tables, GIS point layers, and timelines.
///
/// All timestamps are written as RFC 3339 with the offset they were read
/// with. Missing values are empty cells. Writers take any `Write`; jobs
/// render into memory and hand the bytes to `commit_outputs`, which
/// touches the filesystem only once every output is ready.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::analysis::gravity::FlowTable;
use crate::analysis::series::ObservationSeries;
use crate::ingest::timeline::TimelinePoint;
use crate::locations::LocationIndex;
use crate::logging::{self, Stage};
use crate::model::{FlowError, Result, Timestamp};

// ---------------------------------------------------------------------------
// Flow tables
// ---------------------------------------------------------------------------

/// Writes `timestamp,<edge label>,...` with one row per timestamp.
pub fn write_flow_table<W: Write>(writer: W, table: &FlowTable) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);

    let mut header = vec!["timestamp".to_string()];
    header.extend(table.labels());
    csv.write_record(&header)?;

    for (row, ts) in table.timestamps().iter().enumerate() {
        let mut record = Vec::with_capacity(table.columns().len() + 1);
        record.push(ts.to_rfc3339());
        record.extend(table.columns().iter().map(|col| {
            col.values
                .get(row)
                .copied()
                .flatten()
                .map(|v| v.to_string())
                .unwrap_or_default()
        }));
        csv.write_record(&record)?;
    }

    csv.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// GIS points
// ---------------------------------------------------------------------------

/// One row of the GIS point layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GisPoint {
    pub id: String,
    pub timestamp: Timestamp,
    pub latitude: f64,
    pub longitude: f64,
    pub count: f64,
    #[serde(default)]
    pub occupancy: Option<f64>,
}

/// Flattens a series into positioned points. Cells whose id has no
/// coordinates are left out and each such id is logged once.
pub fn gis_points(
    counts: &ObservationSeries,
    occupancy: Option<&ObservationSeries>,
    locations: &LocationIndex,
) -> Vec<GisPoint> {
    for id in counts.ids().filter(|id| !locations.contains(id)) {
        logging::warn(Stage::Export, Some(id), "no coordinates; left out of GIS export");
    }

    counts
        .cells()
        .filter_map(|(id, timestamp, count)| {
            let point = locations.find(id)?;
            let occupancy = occupancy.and_then(|occ| {
                occ.row_of(&timestamp).and_then(|row| occ.value(id, row))
            });
            Some(GisPoint {
                id: id.to_string(),
                timestamp,
                latitude: point.latitude,
                longitude: point.longitude,
                count,
                occupancy,
            })
        })
        .collect()
}

pub fn write_gis_points<W: Write>(writer: W, points: &[GisPoint]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for point in points {
        csv.serialize(point)?;
    }
    // An empty layer still gets a header.
    if points.is_empty() {
        csv.write_record(["id", "timestamp", "latitude", "longitude", "count", "occupancy"])?;
    }
    csv.flush()?;
    Ok(())
}

/// Reads a GIS point layer written by `write_gis_points`.
pub fn read_gis_points<R: Read>(reader: R) -> Result<Vec<GisPoint>> {
    let mut csv = csv::Reader::from_reader(reader);
    csv.deserialize()
        .map(|row| row.map_err(FlowError::from))
        .collect()
}

pub fn read_gis_points_from_path(path: impl AsRef<Path>) -> Result<Vec<GisPoint>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(FlowError::MissingInput(path.to_path_buf()));
    }
    read_gis_points(std::fs::File::open(path)?)
}

// ---------------------------------------------------------------------------
// Link volumes
// ---------------------------------------------------------------------------

/// One edge at one instant, with both endpoints, for drawing flow lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRow {
    pub timestamp: Timestamp,
    pub source: String,
    pub target: String,
    pub source_latitude: f64,
    pub source_longitude: f64,
    pub target_latitude: f64,
    pub target_longitude: f64,
    pub volume: f64,
}

/// Every scored cell of `table` whose endpoints are in `locations`, row by row.
pub fn link_rows(table: &FlowTable, locations: &LocationIndex) -> Vec<LinkRow> {
    table
        .timestamps()
        .iter()
        .enumerate()
        .flat_map(|(row, ts)| {
            table
                .link_volumes(row, locations)
                .into_iter()
                .map(move |link| LinkRow {
                    timestamp: *ts,
                    source: link.edge.source,
                    target: link.edge.target,
                    source_latitude: link.from.latitude,
                    source_longitude: link.from.longitude,
                    target_latitude: link.to.latitude,
                    target_longitude: link.to.longitude,
                    volume: link.volume,
                })
        })
        .collect()
}

pub fn write_links<W: Write>(writer: W, rows: &[LinkRow]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in rows {
        csv.serialize(row)?;
    }
    if rows.is_empty() {
        csv.write_record([
            "timestamp",
            "source",
            "target",
            "source_latitude",
            "source_longitude",
            "target_latitude",
            "target_longitude",
            "volume",
        ])?;
    }
    csv.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Timelines
// ---------------------------------------------------------------------------

/// Writes `timestamp,latitude,longitude,type,semantic_type`.
pub fn write_timeline<W: Write>(writer: W, points: &[TimelinePoint]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["timestamp", "latitude", "longitude", "type", "semantic_type"])?;
    for p in points {
        csv.write_record([
            p.timestamp.to_rfc3339(),
            p.point.latitude.to_string(),
            p.point.longitude.to_string(),
            p.kind.to_string(),
            p.semantic_type.clone().unwrap_or_default(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Committing outputs
// ---------------------------------------------------------------------------

/// A fully rendered output file waiting to be written.
#[derive(Debug, Clone)]
pub struct RenderedOutput {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    /// Short description for the log, e.g. `"24 rows x 12 edges"`.
    pub what: String,
}

impl RenderedOutput {
    /// Renders with `write` into memory.
    pub fn render<F>(path: impl Into<PathBuf>, what: impl Into<String>, write: F) -> Result<Self>
    where
        F: FnOnce(&mut Vec<u8>) -> Result<()>,
    {
        let mut bytes = Vec::new();
        write(&mut bytes)?;
        Ok(RenderedOutput {
            path: path.into(),
            bytes,
            what: what.into(),
        })
    }
}

/// Writes every output in order. If one fails, the files already written
/// by this call are removed, so a run leaves all of its outputs or none.
pub fn commit_outputs(outputs: &[RenderedOutput]) -> Result<()> {
    for (i, output) in outputs.iter().enumerate() {
        let display = output.path.display().to_string();
        if let Err(e) = std::fs::write(&output.path, &output.bytes) {
            logging::error(Stage::Export, Some(&display), &format!("write failed: {}", e));
            for written in &outputs[..i] {
                let _ = std::fs::remove_file(&written.path);
            }
            return Err(e.into());
        }
        logging::info(Stage::Export, Some(&display), &format!("wrote {}", output.what));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
