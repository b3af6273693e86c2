/// pedflow - gravity-model pedestrian flow from sensor counts.
///
/// Usage:
///   pedflow flow --input counts.csv --config config/sendai_arcade.toml --output flow.csv [--links-output links.csv]
///   pedflow zones --locations sensors.csv --flow counts.csv --config config/sendai_zones.toml --output zone_flow.csv
///   pedflow timeline --input Timeline.json --output timeline.csv
///
/// Path arguments may also come from `PEDFLOW_*` variables in a `.env` file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use pedflow_analysis::analysis::gravity::DistanceDecay;
use pedflow_analysis::analysis::series::AggregationMode;
use pedflow_analysis::config::AnalysisConfig;
use pedflow_analysis::logging::{self, LogLevel, Stage};
use pedflow_analysis::model::SeriesKey;
use pedflow_analysis::pipeline::{self, FlowJob, TimelineJob, ZoneJob};

#[derive(Parser, Debug)]
#[command(name = "pedflow", author, version, about, long_about = None)]
struct Cli {
    /// Minimum level written to the console and log file.
    #[arg(long, global = true, default_value = "info", env = "PEDFLOW_LOG_LEVEL")]
    log_level: LogLevel,

    /// Append log events to this file as well.
    #[arg(long, global = true, env = "PEDFLOW_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Gravity flows between individual sensor locations.
    Flow(FlowArgs),
    /// Roll sensors up into zones, then gravity flows between zones.
    Zones(ZoneArgs),
    /// Convert a location-history JSON export into GIS points.
    Timeline(TimelineArgs),
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Debug, Clone, Default)]
struct Overrides {
    /// linear, mass-only or power:<n>
    #[arg(long)]
    decay: Option<DistanceDecay>,

    /// mean or sum
    #[arg(long)]
    aggregation: Option<AggregationMode>,
}

#[derive(Args, Debug)]
struct FlowArgs {
    #[arg(long, env = "PEDFLOW_INPUT")]
    input: PathBuf,

    #[arg(long, env = "PEDFLOW_CONFIG")]
    config: PathBuf,

    #[arg(long, env = "PEDFLOW_OUTPUT")]
    output: PathBuf,

    /// Pivot on sensor `id` or location `name`.
    #[arg(long, value_parser = parse_key)]
    key: Option<SeriesKey>,

    /// Also write per-row link volumes with endpoint coordinates.
    #[arg(long, env = "PEDFLOW_LINKS_OUTPUT")]
    links_output: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Args, Debug)]
struct ZoneArgs {
    /// Sensor location CSV joined onto the counts.
    #[arg(long, env = "PEDFLOW_LOCATIONS")]
    locations: Option<PathBuf>,

    /// Sensor count CSV.
    #[arg(long, env = "PEDFLOW_FLOW")]
    flow: PathBuf,

    #[arg(long, env = "PEDFLOW_CONFIG")]
    config: PathBuf,

    #[arg(long, env = "PEDFLOW_OUTPUT")]
    output: PathBuf,

    /// Also write the zone series as GIS points.
    #[arg(long, env = "PEDFLOW_GIS_OUTPUT")]
    gis_output: Option<PathBuf>,

    #[arg(long, env = "PEDFLOW_LINKS_OUTPUT")]
    links_output: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Args, Debug)]
struct TimelineArgs {
    #[arg(long, env = "PEDFLOW_TIMELINE")]
    input: PathBuf,

    #[arg(long)]
    output: PathBuf,
}

fn parse_key(raw: &str) -> Result<SeriesKey, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "id" | "sensor_id" => Ok(SeriesKey::Id),
        "name" => Ok(SeriesKey::Name),
        other => Err(format!("unknown key '{}' (expected id or name)", other)),
    }
}

fn load_config(path: &Path, overrides: &Overrides, key: Option<SeriesKey>) -> Result<AnalysisConfig> {
    let mut config = AnalysisConfig::load(path)
        .with_context(|| format!("loading configuration {}", path.display()))?;

    if let Some(decay) = overrides.decay {
        config.gravity.decay = decay;
    }
    if let Some(mode) = overrides.aggregation {
        config.aggregation.mode = mode;
    }
    if let Some(key) = key {
        config.aggregation.key = key;
    }
    config
        .validate()
        .with_context(|| format!("validating configuration {}", path.display()))?;
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Flow(args) => {
            let config = load_config(&args.config, &args.overrides, args.key)?;
            let job = FlowJob {
                input: args.input,
                output: args.output,
                links_output: args.links_output,
            };
            let summary = pipeline::run_location_flow(&job, &config)
                .with_context(|| format!("location flow from {}", job.input.display()))?;
            logging::info(
                Stage::System,
                None,
                &format!(
                    "flow done: {} rows, {} edges scored, {} skipped, {} bad input rows",
                    summary.rows,
                    summary.edges_scored,
                    summary.skipped.len(),
                    summary.read.skipped()
                ),
            );
        }
        Command::Zones(args) => {
            let config = load_config(&args.config, &args.overrides, None)?;
            let job = ZoneJob {
                locations: args.locations,
                flow: args.flow,
                output: args.output,
                gis_output: args.gis_output,
                links_output: args.links_output,
            };
            let summary = pipeline::run_zone_flow(&job, &config)
                .with_context(|| format!("zone flow from {}", job.flow.display()))?;
            logging::info(
                Stage::System,
                None,
                &format!(
                    "zones done: {} zones, {} rows, {} edges scored, {} skipped, {} unmapped sensors",
                    summary.zones,
                    summary.rows,
                    summary.edges_scored,
                    summary.skipped.len(),
                    summary.unmapped_sensors
                ),
            );
        }
        Command::Timeline(args) => {
            let job = TimelineJob {
                input: args.input,
                output: args.output,
            };
            let summary = pipeline::run_timeline(&job)
                .with_context(|| format!("timeline conversion of {}", job.input.display()))?;
            logging::info(
                Stage::System,
                None,
                &format!(
                    "timeline done: {} points from {} entries",
                    summary.stats.points, summary.stats.items
                ),
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = logging::init_logger(cli.log_level, cli.log_file.as_deref(), true) {
        eprintln!("pedflow: cannot open log file: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logging::error(Stage::System, None, &format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}
