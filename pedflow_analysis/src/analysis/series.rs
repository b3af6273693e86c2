/// Time × location pivot of people counts.
///
/// An `ObservationSeries` is the in-memory table every analysis reads from:
/// one row per distinct timestamp (ascending), one column per location or
/// zone id, and `None` wherever a sensor reported nothing for that hour.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::{Observation, Timestamp};

// ---------------------------------------------------------------------------
// Aggregation mode
// ---------------------------------------------------------------------------

/// How several counts landing in the same cell are combined.
///
/// Both modes are in use: the zone interaction analysis averages sensors
/// so a zone with more sensors is not inflated, while the GIS export of
/// shopping streets reports the total footfall of each street.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    #[default]
    Mean,
    Sum,
}

impl std::str::FromStr for AggregationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" | "avg" | "average" => Ok(AggregationMode::Mean),
            "sum" | "total" => Ok(AggregationMode::Sum),
            other => Err(format!("unknown aggregation mode '{}' (expected mean or sum)", other)),
        }
    }
}

impl std::fmt::Display for AggregationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationMode::Mean => write!(f, "mean"),
            AggregationMode::Sum => write!(f, "sum"),
        }
    }
}

/// Running total for one cell.
#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    sum: f64,
    n: usize,
}

impl Accumulator {
    fn push(self, value: f64) -> Self {
        Accumulator {
            sum: self.sum + value,
            n: self.n + 1,
        }
    }

    fn finish(self, mode: AggregationMode) -> Option<f64> {
        match (self.n, mode) {
            (0, _) => None,
            (_, AggregationMode::Sum) => Some(self.sum),
            (n, AggregationMode::Mean) => Some(self.sum / n as f64),
        }
    }
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservationSeries {
    timestamps: Vec<Timestamp>,
    columns: BTreeMap<String, Vec<Option<f64>>>,
}

impl ObservationSeries {
    /// Pivots observations on timestamp × id.
    ///
    /// Duplicate `(id, timestamp)` pairs are combined with `mode`. Rows are
    /// the union of all timestamps, sorted chronologically.
    pub fn pivot<'a, I>(observations: I, mode: AggregationMode) -> Self
    where
        I: IntoIterator<Item = &'a Observation>,
    {
        let cells: BTreeMap<&str, BTreeMap<Timestamp, Accumulator>> =
            observations
                .into_iter()
                .fold(BTreeMap::new(), |mut cells, obs| {
                    let column: &mut BTreeMap<Timestamp, Accumulator> =
                        cells.entry(obs.id.as_str()).or_default();
                    let cell = column.entry(obs.timestamp).or_default();
                    *cell = cell.push(obs.count);
                    cells
                });

        let timestamps: Vec<Timestamp> = cells
            .values()
            .flat_map(|column| column.keys().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let columns = cells
            .into_iter()
            .map(|(id, column)| {
                let values = timestamps
                    .iter()
                    .map(|ts| column.get(ts).and_then(|acc| acc.finish(mode)))
                    .collect();
                (id.to_string(), values)
            })
            .collect();

        ObservationSeries { timestamps, columns }
    }

    /// Builds a series from already-shaped columns.
    ///
    /// `timestamps` must be in chronological order. Returns `None` if any
    /// column length differs from the number of timestamps.
    pub fn from_columns<I, S>(timestamps: Vec<Timestamp>, columns: I) -> Option<Self>
    where
        I: IntoIterator<Item = (S, Vec<Option<f64>>)>,
        S: Into<String>,
    {
        let columns: BTreeMap<String, Vec<Option<f64>>> = columns
            .into_iter()
            .map(|(id, values)| (id.into(), values))
            .collect();
        if columns.values().any(|v| v.len() != timestamps.len()) {
            return None;
        }
        Some(ObservationSeries { timestamps, columns })
    }

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Column ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.columns.contains_key(id)
    }

    pub fn column(&self, id: &str) -> Option<&[Option<f64>]> {
        self.columns.get(id).map(Vec::as_slice)
    }

    /// The count for `id` at row `row`, if both exist and the cell is present.
    pub fn value(&self, id: &str, row: usize) -> Option<f64> {
        self.columns.get(id).and_then(|c| c.get(row).copied().flatten())
    }

    /// Row index of an exact timestamp.
    pub fn row_of(&self, timestamp: &Timestamp) -> Option<usize> {
        self.timestamps.binary_search(timestamp).ok()
    }

    /// Every present cell as `(id, timestamp, count)`, column by column.
    pub fn cells(&self) -> impl Iterator<Item = (&str, Timestamp, f64)> + '_ {
        self.columns.iter().flat_map(move |(id, values)| {
            self.timestamps
                .iter()
                .zip(values)
                .filter_map(move |(ts, v)| v.map(|count| (id.as_str(), *ts, count)))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
