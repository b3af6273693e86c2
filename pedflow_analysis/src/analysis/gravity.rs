/// Gravity-model interaction scores between pairs of locations.
///
/// For an edge `(s, t)` whose endpoints are `d` meters apart, the score at
/// each timestamp is
///
/// ```text
/// k * (count[s] * count[t]) / (d + offset)^n
/// ```
///
/// with `n = 1` (linear decay) by default and `n = 0` for the mass-only
/// comparison model. Distances are computed once per edge; the geography
/// does not change between rows.

use serde::{Deserialize, Serialize};

use crate::analysis::distance::distance_between;
use crate::analysis::series::ObservationSeries;
use crate::locations::LocationIndex;
use crate::logging::{self, Stage};
use crate::model::{Edge, EdgeDistance, GeoPoint, SkipReason, SkippedEdge, Timestamp};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Distance term of the gravity model.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceDecay {
    /// Divide by distance: `m1 * m2 / d`.
    #[default]
    Linear,
    /// Ignore distance entirely: `m1 * m2`.
    MassOnly,
    /// Divide by `d^n` for an arbitrary exponent.
    Power(f64),
}

impl std::str::FromStr for DistanceDecay {
    type Err = String;

    /// Accepts `linear`, `mass-only` (or `mass_only`, `none`) and `power:<n>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "linear" => Ok(DistanceDecay::Linear),
            "mass-only" | "mass_only" | "mass" | "none" => Ok(DistanceDecay::MassOnly),
            _ => s
                .strip_prefix("power:")
                .and_then(|n| n.parse::<f64>().ok())
                .map(DistanceDecay::Power)
                .ok_or_else(|| {
                    format!(
                        "unknown distance decay '{}' (expected linear, mass-only or power:<n>)",
                        s
                    )
                }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GravityParams {
    pub decay: DistanceDecay,
    /// Scale factor `k`.
    pub coefficient: f64,
    /// Added to every distance before decay; damps very short segments.
    pub distance_offset_m: f64,
}

impl Default for GravityParams {
    fn default() -> Self {
        Self {
            decay: DistanceDecay::Linear,
            coefficient: 1.0,
            distance_offset_m: 0.0,
        }
    }
}

impl GravityParams {
    pub fn validate(&self) -> Result<(), String> {
        if !self.coefficient.is_finite() {
            return Err(format!("gravity coefficient must be finite, got {}", self.coefficient));
        }
        if !self.distance_offset_m.is_finite() || self.distance_offset_m < 0.0 {
            return Err(format!(
                "distance offset must be a non-negative number of meters, got {}",
                self.distance_offset_m
            ));
        }
        if let DistanceDecay::Power(n) = self.decay {
            if !n.is_finite() {
                return Err(format!("decay exponent must be finite, got {}", n));
            }
        }
        Ok(())
    }

    /// Score for one pair of counts `distance_m` apart.
    pub fn score(&self, source: f64, target: f64, distance_m: f64) -> f64 {
        let mass = self.coefficient * (source * target);
        let d = distance_m + self.distance_offset_m;
        match self.decay {
            DistanceDecay::Linear => mass / d,
            DistanceDecay::MassOnly => mass,
            DistanceDecay::Power(n) => mass / d.powf(n),
        }
    }
}

// ---------------------------------------------------------------------------
// Output table
// ---------------------------------------------------------------------------

/// Scores for one edge, aligned with `FlowTable::timestamps`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowColumn {
    pub edge: Edge,
    pub distance_m: f64,
    pub values: Vec<Option<f64>>,
}

impl FlowColumn {
    pub fn label(&self) -> String {
        self.edge.label()
    }
}

/// Edge flows per timestamp; rows mirror the input series.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlowTable {
    timestamps: Vec<Timestamp>,
    columns: Vec<FlowColumn>,
}

/// A single edge's volume at one instant, positioned for drawing on a map.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkVolume {
    pub edge: Edge,
    pub from: GeoPoint,
    pub to: GeoPoint,
    pub volume: f64,
}

impl FlowTable {
    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    pub fn columns(&self) -> &[FlowColumn] {
        &self.columns
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.columns.iter().map(FlowColumn::label).collect()
    }

    /// Column by its `"{source} - {target}"` label.
    pub fn column(&self, label: &str) -> Option<&FlowColumn> {
        self.columns.iter().find(|c| c.edge.label() == label)
    }

    /// Every edge with a score at `row`, with endpoint coordinates.
    /// Edges whose endpoints are not in `locations` are left out.
    pub fn link_volumes(&self, row: usize, locations: &LocationIndex) -> Vec<LinkVolume> {
        self.columns
            .iter()
            .filter_map(|col| {
                let volume = col.values.get(row).copied().flatten()?;
                let from = *locations.find(&col.edge.source)?;
                let to = *locations.find(&col.edge.target)?;
                Some(LinkVolume {
                    edge: col.edge.clone(),
                    from,
                    to,
                    volume,
                })
            })
            .collect()
    }
}

/// Result of a flow estimation: the table plus every edge that was left out.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlowEstimate {
    pub table: FlowTable,
    pub skipped: Vec<SkippedEdge>,
}

/// Edge distances resolved against a location registry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EdgeResolution {
    pub distances: Vec<EdgeDistance>,
    pub skipped: Vec<SkippedEdge>,
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct GravityFlowEstimator {
    params: GravityParams,
}

impl GravityFlowEstimator {
    pub fn new(params: GravityParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &GravityParams {
        &self.params
    }

    /// Distance of every edge between the representative points of its
    /// endpoints. Edges with an endpoint missing from `locations` are
    /// skipped and logged.
    pub fn edge_distances(edges: &[Edge], locations: &LocationIndex) -> EdgeResolution {
        edges
            .iter()
            .fold(EdgeResolution::default(), |mut resolution, edge| {
                let source = locations.find(&edge.source);
                let target = locations.find(&edge.target);
                match (source, target) {
                    (Some(a), Some(b)) => resolution.distances.push(EdgeDistance {
                        edge: edge.clone(),
                        meters: distance_between(a, b),
                    }),
                    (None, _) => resolution.skipped.push(skip(edge, SkipReason::UnknownEndpoint(edge.source.clone()))),
                    (_, None) => resolution.skipped.push(skip(edge, SkipReason::UnknownEndpoint(edge.target.clone()))),
                }
                resolution
            })
    }

    /// Scores every edge over every row of `series`.
    ///
    /// An edge is skipped (and logged) when its distance is not positive or
    /// either endpoint has no column in the series. A missing count for
    /// either endpoint leaves that cell missing.
    pub fn estimate(&self, series: &ObservationSeries, distances: &[EdgeDistance]) -> FlowEstimate {
        let (columns, skipped) = distances.iter().fold(
            (Vec::new(), Vec::new()),
            |(mut columns, mut skipped), distance| {
                match self.score_edge(series, distance) {
                    Ok(column) => columns.push(column),
                    Err(skipped_edge) => {
                        logging::log_skipped_edge(&skipped_edge);
                        skipped.push(skipped_edge);
                    }
                }
                (columns, skipped)
            },
        );

        logging::log_batch_summary(
            Stage::Gravity,
            "edges scored",
            distances.len(),
            columns.len(),
            skipped.len(),
        );

        FlowEstimate {
            table: FlowTable {
                timestamps: series.timestamps().to_vec(),
                columns,
            },
            skipped,
        }
    }

    /// `edge_distances` followed by `estimate`; skipped edges from both
    /// steps are reported together, in edge order of each step.
    pub fn estimate_edges(
        &self,
        series: &ObservationSeries,
        edges: &[Edge],
        locations: &LocationIndex,
    ) -> FlowEstimate {
        let resolution = Self::edge_distances(edges, locations);
        for skipped in &resolution.skipped {
            logging::log_skipped_edge(skipped);
        }

        let estimate = self.estimate(series, &resolution.distances);
        FlowEstimate {
            table: estimate.table,
            skipped: resolution.skipped.into_iter().chain(estimate.skipped).collect(),
        }
    }

    fn score_edge(
        &self,
        series: &ObservationSeries,
        distance: &EdgeDistance,
    ) -> Result<FlowColumn, SkippedEdge> {
        let edge = &distance.edge;

        // Also rejects NaN.
        if !(distance.meters > 0.0) {
            return Err(skip(edge, SkipReason::NonPositiveDistance(distance.meters)));
        }
        let source = series
            .column(&edge.source)
            .ok_or_else(|| skip(edge, SkipReason::MissingFromSeries(edge.source.clone())))?;
        let target = series
            .column(&edge.target)
            .ok_or_else(|| skip(edge, SkipReason::MissingFromSeries(edge.target.clone())))?;

        let values = source
            .iter()
            .zip(target)
            .map(|(s, t)| match (s, t) {
                (Some(s), Some(t)) => Some(self.params.score(*s, *t, distance.meters)),
                _ => None,
            })
            .collect();

        Ok(FlowColumn {
            edge: edge.clone(),
            distance_m: distance.meters,
            values,
        })
    }
}

fn skip(edge: &Edge, reason: SkipReason) -> SkippedEdge {
    SkippedEdge {
        edge: edge.clone(),
        reason,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
