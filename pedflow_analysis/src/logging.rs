/// Structured logging for the pedestrian-flow analysis.
///
/// Every event carries the pipeline stage that emitted it and, where one
/// exists, the sensor/zone/edge it concerns. Console output goes to stderr
/// so CSV written to stdout stays clean; an optional append-mode log file
/// receives the same events without ANSI colouring.

use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry, fmt as tfmt};

use crate::model::SkippedEdge;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Zones,
    Gravity,
    Export,
    System,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Ingest => write!(f, "INGEST"),
            Stage::Zones => write!(f, "ZONES"),
            Stage::Gravity => write!(f, "GRAVITY"),
            Stage::Export => write!(f, "EXPORT"),
            Stage::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Install the global subscriber.
///
/// Calling this more than once is harmless: later calls keep the first
/// subscriber. Fails only if `log_file` cannot be opened for appending.
pub fn init_logger(
    min_level: LogLevel,
    log_file: Option<&Path>,
    console_timestamps: bool,
) -> std::io::Result<()> {
    let filter = LevelFilter::from(min_level);

    let console = tfmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    let console: BoxedLayer = if console_timestamps {
        console.with_filter(filter).boxed()
    } else {
        console.without_time().with_filter(filter).boxed()
    };

    let mut layers = vec![console];

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        layers.push(
            tfmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(filter)
                .boxed(),
        );
    }

    let _ = tracing_subscriber::registry().with(layers).try_init();
    Ok(())
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Log a general informational message
pub fn info(stage: Stage, record: Option<&str>, message: &str) {
    tracing::info!(stage = %stage, record = record.unwrap_or("-"), "{}", message);
}

/// Log a warning message
pub fn warn(stage: Stage, record: Option<&str>, message: &str) {
    tracing::warn!(stage = %stage, record = record.unwrap_or("-"), "{}", message);
}

/// Log an error message
pub fn error(stage: Stage, record: Option<&str>, message: &str) {
    tracing::error!(stage = %stage, record = record.unwrap_or("-"), "{}", message);
}

/// Log a debug message
pub fn debug(stage: Stage, record: Option<&str>, message: &str) {
    tracing::debug!(stage = %stage, record = record.unwrap_or("-"), "{}", message);
}

// ---------------------------------------------------------------------------
// Structured helpers
// ---------------------------------------------------------------------------

/// Report an edge that produced no flow column.
pub fn log_skipped_edge(skipped: &SkippedEdge) {
    let label = skipped.edge.label();
    warn(
        Stage::Gravity,
        Some(&label),
        &format!("edge skipped: {}", skipped.reason),
    );
}

/// Log the outcome of a batch step: info when nothing was dropped, warn
/// for partial results, error when nothing survived.
pub fn log_batch_summary(stage: Stage, what: &str, total: usize, kept: usize, skipped: usize) {
    let message = format!("{}: {}/{} kept, {} skipped", what, kept, total, skipped);

    if skipped == 0 {
        info(stage, None, &message);
    } else if kept == 0 {
        error(stage, None, &message);
    } else {
        warn(stage, None, &message);
    }
}
