/// Batch jobs wiring readers, analyses and writers together.
///
/// Each job checks that every input exists before reading anything and
/// renders all of its outputs in memory before writing any of them. A
/// failed run never leaves a partial set of output files behind.

use std::path::{Path, PathBuf};

use crate::analysis::gravity::{FlowTable, GravityFlowEstimator};
use crate::analysis::series::ObservationSeries;
use crate::analysis::zones::ZoneAggregator;
use crate::config::AnalysisConfig;
use crate::export::{self, RenderedOutput};
use crate::ingest::sensor_csv::{self, ReadStats};
use crate::ingest::timeline::{self, TimelineStats};
use crate::locations::LocationIndex;
use crate::logging::{self, Stage};
use crate::model::{FlowError, Observation, Result, SeriesKey, SkippedEdge};

// ---------------------------------------------------------------------------
// Job descriptions
// ---------------------------------------------------------------------------

/// Location-level gravity flows from a single sensor count file.
#[derive(Debug, Clone)]
pub struct FlowJob {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Per-row link volumes with endpoint coordinates.
    pub links_output: Option<PathBuf>,
}

/// Zone roll-up followed by zone-level gravity flows.
#[derive(Debug, Clone)]
pub struct ZoneJob {
    /// Sensor location file joined onto the counts on sensor id. When
    /// absent, coordinates come from the count file itself.
    pub locations: Option<PathBuf>,
    pub flow: PathBuf,
    pub output: PathBuf,
    pub gis_output: Option<PathBuf>,
    pub links_output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TimelineJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct FlowSummary {
    pub read: ReadStats,
    pub locations: usize,
    pub rows: usize,
    pub edges_scored: usize,
    pub skipped: Vec<SkippedEdge>,
    pub links: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ZoneSummary {
    pub read: ReadStats,
    pub joined: usize,
    pub zones: usize,
    pub rows: usize,
    pub unmapped_sensors: usize,
    pub edges_scored: usize,
    pub skipped: Vec<SkippedEdge>,
    pub gis_points: Option<usize>,
    pub links: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimelineSummary {
    pub stats: TimelineStats,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

fn require_inputs<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Result<()> {
    match paths.into_iter().find(|p| !p.exists()) {
        Some(missing) => {
            logging::error(
                Stage::System,
                Some(&missing.display().to_string()),
                "required input file not found",
            );
            Err(FlowError::MissingInput(missing.to_path_buf()))
        }
        None => Ok(()),
    }
}

fn render_flow_table(path: &Path, table: &FlowTable) -> Result<RenderedOutput> {
    RenderedOutput::render(
        path,
        format!("{} rows x {} edges", table.len(), table.columns().len()),
        |buf| export::write_flow_table(buf, table),
    )
}

/// Link layer for `table`, if one was requested, with its row count.
fn render_links(
    path: Option<&PathBuf>,
    table: &FlowTable,
    locations: &LocationIndex,
) -> Result<Option<(RenderedOutput, usize)>> {
    path.map(|path| {
        let rows = export::link_rows(table, locations);
        RenderedOutput::render(path, format!("{} link volumes", rows.len()), |buf| {
            export::write_links(buf, &rows)
        })
        .map(|output| (output, rows.len()))
    })
    .transpose()
}

/// Pivots counts by location and scores every configured edge.
pub fn run_location_flow(job: &FlowJob, config: &AnalysisConfig) -> Result<FlowSummary> {
    require_inputs([job.input.as_path()])?;

    let csv = sensor_csv::read_records_from_path(&job.input)?;
    let key = config.aggregation.key;

    let observations: Vec<Observation> = csv.records.iter().map(|r| r.observation(key)).collect();
    let series = ObservationSeries::pivot(&observations, config.aggregation.mode);
    let locations = LocationIndex::from_records(&csv.records, key);

    logging::info(
        Stage::Ingest,
        None,
        &format!(
            "{} locations over {} timestamps ({} located)",
            series.ids().count(),
            series.len(),
            locations.len()
        ),
    );

    let estimate = GravityFlowEstimator::new(config.gravity)
        .estimate_edges(&series, &config.edges, &locations);

    let mut outputs = vec![render_flow_table(&job.output, &estimate.table)?];
    let links = render_links(job.links_output.as_ref(), &estimate.table, &locations)?.map(
        |(output, rows)| {
            outputs.push(output);
            rows
        },
    );
    export::commit_outputs(&outputs)?;

    Ok(FlowSummary {
        read: csv.stats,
        locations: locations.len(),
        rows: estimate.table.len(),
        edges_scored: estimate.table.columns().len(),
        skipped: estimate.skipped,
        links,
    })
}

/// Rolls sensors up into the configured zones and scores zone edges.
pub fn run_zone_flow(job: &ZoneJob, config: &AnalysisConfig) -> Result<ZoneSummary> {
    require_inputs(
        job.locations
            .iter()
            .map(PathBuf::as_path)
            .chain([job.flow.as_path()]),
    )?;

    let mapping = config.zone_mapping()?;
    if mapping.is_empty() {
        return Err(FlowError::InvalidConfig(
            "zone analysis needs at least one [[zones]] entry".to_string(),
        ));
    }
    for edge in config.edges_outside_zones() {
        logging::warn(
            Stage::Zones,
            Some(&edge.label()),
            "edge endpoint is not a configured zone",
        );
    }

    let csv = sensor_csv::read_records_from_path(&job.flow)?;
    let read = csv.stats;
    let records = match &job.locations {
        Some(path) => {
            let sites = sensor_csv::read_sensor_sites_from_path(path)?;
            sensor_csv::join_sites(csv.records, &sites)
        }
        None => csv.records,
    };

    let aggregator = ZoneAggregator::new(&mapping, config.aggregation.mode);
    let rollup = aggregator.aggregate_records(&records);
    let sensor_points = LocationIndex::from_records(&records, SeriesKey::Id);
    let zone_points = aggregator.zone_locations(&sensor_points);

    logging::info(
        Stage::Zones,
        None,
        &format!(
            "{} zones ({} located) over {} timestamps, {} mode",
            rollup.counts.ids().count(),
            zone_points.len(),
            rollup.counts.len(),
            aggregator.mode()
        ),
    );

    let estimate = GravityFlowEstimator::new(config.gravity)
        .estimate_edges(&rollup.counts, &config.edges, &zone_points);

    let mut outputs = vec![render_flow_table(&job.output, &estimate.table)?];
    let gis_points = job
        .gis_output
        .as_ref()
        .map(|path| {
            let occupancy = (!rollup.occupancy.is_empty()).then_some(&rollup.occupancy);
            let points = export::gis_points(&rollup.counts, occupancy, &zone_points);
            RenderedOutput::render(path, format!("{} GIS points", points.len()), |buf| {
                export::write_gis_points(buf, &points)
            })
            .map(|output| (output, points.len()))
        })
        .transpose()?
        .map(|(output, n)| {
            outputs.push(output);
            n
        });
    let links = render_links(job.links_output.as_ref(), &estimate.table, &zone_points)?.map(
        |(output, rows)| {
            outputs.push(output);
            rows
        },
    );
    export::commit_outputs(&outputs)?;

    Ok(ZoneSummary {
        read,
        joined: records.len(),
        zones: rollup.counts.ids().count(),
        rows: estimate.table.len(),
        unmapped_sensors: rollup.unmapped.len(),
        edges_scored: estimate.table.columns().len(),
        skipped: estimate.skipped,
        gis_points,
        links,
    })
}

/// Converts a location-history export into a GIS point CSV.
pub fn run_timeline(job: &TimelineJob) -> Result<TimelineSummary> {
    require_inputs([job.input.as_path()])?;

    let timeline = timeline::read_timeline_from_path(&job.input)?;
    let output = RenderedOutput::render(
        &job.output,
        format!("{} timeline points", timeline.points.len()),
        |buf| export::write_timeline(buf, &timeline.points),
    )?;
    export::commit_outputs(&[output])?;

    Ok(TimelineSummary {
        stats: timeline.stats,
    })
}
