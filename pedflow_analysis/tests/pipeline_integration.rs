/// End-to-end tests of the batch jobs on temporary files.
///
/// Each test writes its inputs into a fresh temporary directory, runs one
/// pipeline job, and reads the produced CSV back.
///
/// Run with: cargo test --test pipeline_integration

use std::fs;
use std::path::{Path, PathBuf};

use pedflow_analysis::analysis::distance::haversine_m;
use pedflow_analysis::analysis::series::AggregationMode;
use pedflow_analysis::config::AnalysisConfig;
use pedflow_analysis::export::read_gis_points_from_path;
use pedflow_analysis::model::{FlowError, SkipReason};
use pedflow_analysis::pipeline::{
    FlowJob, TimelineJob, ZoneJob, run_location_flow, run_timeline, run_zone_flow,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write test input");
    path
}

/// Reads a flow table back as (header, rows of cells).
fn read_table(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).expect("open output");
    let header = reader
        .headers()
        .expect("header")
        .iter()
        .map(String::from)
        .collect();
    let rows = reader
        .records()
        .map(|r| r.expect("row").iter().map(String::from).collect())
        .collect();
    (header, rows)
}

const ARCADE_COUNTS: &str = "\
locationName,dateObservedFrom,peopleCount,latitude,longitude
East,2025-01-01T10:00:00+09:00,10,38.2620,140.8802
West,2025-01-01T10:00:00+09:00,20,38.2605,140.8760
East,2025-01-01T11:00:00+09:00,4,38.2620,140.8802
West,2025-01-01T11:00:00+09:00,5,38.2605,140.8760
East,not-a-time,99,38.2620,140.8802
";

const ARCADE_CONFIG: &str = r#"
[[edges]]
source = "East"
target = "West"

[[edges]]
source = "East"
target = "Ghost"
"#;

const ZONE_COUNTS: &str = "\
identifcation,dateObservedFrom,peopleCount,peopleOccupancy
s1,2025-01-01T10:00:00+09:00,1,0.5
s2,2025-01-01T10:00:00+09:00,2,
s3,2025-01-01T10:00:00+09:00,3,
s4,2025-01-01T10:00:00+09:00,10,
s9,2025-01-01T10:00:00+09:00,7,
";

const ZONE_SITES: &str = "\
id,name,latitude,longitude
s1,Station north,38.0,140.0
s2,Station south,38.0,140.0
s3,Station east,38.0,140.0
s4,Fujisaki,38.01,140.0
s9,Park,38.5,140.5
";

fn zone_config(mode: &str) -> String {
    format!(
        r#"
[aggregation]
mode = "{mode}"
key = "id"

[[zones]]
name = "A"
sensors = ["s1", "s2", "s3"]

[[zones]]
name = "B"
sensors = ["s4"]

[[edges]]
source = "A"
target = "B"
"#
    )
}

fn zone_job(dir: &TempDir, gis: bool) -> ZoneJob {
    ZoneJob {
        locations: Some(write(dir, "sites.csv", ZONE_SITES)),
        flow: write(dir, "counts.csv", ZONE_COUNTS),
        output: dir.path().join("zone_flow.csv"),
        gis_output: gis.then(|| dir.path().join("zones_gis.csv")),
        links_output: None,
    }
}

// ---------------------------------------------------------------------------
// Location flows
// ---------------------------------------------------------------------------

#[test]
fn test_location_flow_end_to_end() {
    let dir = TempDir::new().unwrap();
    let job = FlowJob {
        input: write(&dir, "arcade.csv", ARCADE_COUNTS),
        output: dir.path().join("flow.csv"),
        links_output: None,
    };
    let config = AnalysisConfig::from_toml_str(ARCADE_CONFIG).unwrap();

    let summary = run_location_flow(&job, &config).unwrap();

    assert_eq!(summary.read.kept, 4);
    assert_eq!(summary.read.bad_timestamp, 1);
    assert_eq!(summary.edges_scored, 1);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(
        summary.skipped[0].reason,
        SkipReason::UnknownEndpoint("Ghost".to_string())
    );

    let (header, rows) = read_table(&job.output);
    assert_eq!(header, vec!["timestamp", "East - West"]);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], "2025-01-01T10:00:00+09:00");

    let d = haversine_m(38.2620, 140.8802, 38.2605, 140.8760);
    let first: f64 = rows[0][1].parse().unwrap();
    let second: f64 = rows[1][1].parse().unwrap();
    assert_eq!(first, 200.0 / d);
    assert_eq!(second, 20.0 / d);
}

#[test]
fn test_missing_input_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let job = FlowJob {
        input: dir.path().join("does_not_exist.csv"),
        output: dir.path().join("flow.csv"),
        links_output: None,
    };
    let config = AnalysisConfig::from_toml_str(ARCADE_CONFIG).unwrap();

    let result = run_location_flow(&job, &config);

    assert!(matches!(result, Err(FlowError::MissingInput(_))));
    assert!(!job.output.exists(), "no partial output on failure");
}

#[test]
fn test_count_file_without_count_column_is_rejected() {
    let dir = TempDir::new().unwrap();
    let job = FlowJob {
        input: write(&dir, "bad.csv", "name,timestamp\nEast,2025-01-01T10:00:00+09:00\n"),
        output: dir.path().join("flow.csv"),
        links_output: None,
    };
    let config = AnalysisConfig::from_toml_str(ARCADE_CONFIG).unwrap();

    match run_location_flow(&job, &config) {
        Err(FlowError::MissingColumn { column, .. }) => assert_eq!(column, "count"),
        other => panic!("expected MissingColumn, got {:?}", other),
    }
    assert!(!job.output.exists());
}

#[test]
fn test_location_flow_writes_link_volumes() {
    let dir = TempDir::new().unwrap();
    let job = FlowJob {
        input: write(&dir, "arcade.csv", ARCADE_COUNTS),
        output: dir.path().join("flow.csv"),
        links_output: Some(dir.path().join("links.csv")),
    };
    let config = AnalysisConfig::from_toml_str(ARCADE_CONFIG).unwrap();

    let summary = run_location_flow(&job, &config).unwrap();
    assert_eq!(summary.links, Some(2));

    let (header, rows) = read_table(job.links_output.as_ref().unwrap());
    assert_eq!(
        header,
        vec![
            "timestamp",
            "source",
            "target",
            "source_latitude",
            "source_longitude",
            "target_latitude",
            "target_longitude",
            "volume",
        ]
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], "2025-01-01T10:00:00+09:00");
    assert_eq!((rows[0][1].as_str(), rows[0][2].as_str()), ("East", "West"));
    assert_eq!(rows[0][3].parse::<f64>().unwrap(), 38.2620);
    assert_eq!(rows[0][6].parse::<f64>().unwrap(), 140.8760);

    let d = haversine_m(38.2620, 140.8802, 38.2605, 140.8760);
    let volume: f64 = rows[0][7].parse().unwrap();
    assert_eq!(volume, 200.0 / d);
}

// ---------------------------------------------------------------------------
// Zone flows
// ---------------------------------------------------------------------------

#[test]
fn test_zone_flow_sum_mode() {
    let dir = TempDir::new().unwrap();
    let job = zone_job(&dir, false);
    let config = AnalysisConfig::from_toml_str(&zone_config("sum")).unwrap();
    assert_eq!(config.aggregation.mode, AggregationMode::Sum);

    let summary = run_zone_flow(&job, &config).unwrap();
    assert_eq!(summary.zones, 2);
    assert_eq!(summary.unmapped_sensors, 1);
    assert_eq!(summary.gis_points, None);

    let (header, rows) = read_table(&job.output);
    assert_eq!(header, vec!["timestamp", "A - B"]);
    let d = haversine_m(38.0, 140.0, 38.01, 140.0);
    let value: f64 = rows[0][1].parse().unwrap();
    assert_eq!(value, 6.0 * 10.0 / d);
}

#[test]
fn test_zone_flow_mean_mode() {
    let dir = TempDir::new().unwrap();
    let job = zone_job(&dir, false);
    let config = AnalysisConfig::from_toml_str(&zone_config("mean")).unwrap();

    run_zone_flow(&job, &config).unwrap();

    let (_, rows) = read_table(&job.output);
    let d = haversine_m(38.0, 140.0, 38.01, 140.0);
    let value: f64 = rows[0][1].parse().unwrap();
    assert_eq!(value, 2.0 * 10.0 / d);
}

#[test]
fn test_zone_gis_export_round_trips() {
    let dir = TempDir::new().unwrap();
    let job = zone_job(&dir, true);
    let config = AnalysisConfig::from_toml_str(&zone_config("sum")).unwrap();

    let summary = run_zone_flow(&job, &config).unwrap();
    assert_eq!(summary.gis_points, Some(2));

    let gis_path = job.gis_output.as_ref().unwrap();
    let points = read_gis_points_from_path(gis_path).unwrap();
    assert_eq!(points.len(), 2);

    let a = points.iter().find(|p| p.id == "A").unwrap();
    assert_eq!(a.count, 6.0);
    assert_eq!((a.latitude, a.longitude), (38.0, 140.0));
    assert_eq!(a.occupancy, Some(0.5));
    assert_eq!(a.timestamp.to_rfc3339(), "2025-01-01T10:00:00+09:00");

    let b = points.iter().find(|p| p.id == "B").unwrap();
    assert_eq!(b.count, 10.0);
    assert_eq!(b.occupancy, None);
}

#[test]
fn test_zone_counts_include_sensors_missing_from_site_file() {
    let dir = TempDir::new().unwrap();
    let sites = "\
id,name,latitude,longitude
s1,Station north,38.0,140.0
s2,Station south,38.0,140.0
s4,Fujisaki,38.01,140.0
";
    let job = ZoneJob {
        locations: Some(write(&dir, "sites_without_s3.csv", sites)),
        ..zone_job(&dir, true)
    };
    let config = AnalysisConfig::from_toml_str(&zone_config("sum")).unwrap();

    let summary = run_zone_flow(&job, &config).unwrap();
    assert_eq!(summary.joined, 5);

    let points = read_gis_points_from_path(job.gis_output.as_ref().unwrap()).unwrap();
    let a = points.iter().find(|p| p.id == "A").unwrap();
    assert_eq!(a.count, 6.0);
    assert_eq!((a.latitude, a.longitude), (38.0, 140.0));

    let (_, rows) = read_table(&job.output);
    let d = haversine_m(38.0, 140.0, 38.01, 140.0);
    let value: f64 = rows[0][1].parse().unwrap();
    assert_eq!(value, 6.0 * 10.0 / d);
}

#[test]
fn test_failed_gis_write_leaves_no_flow_output() {
    let dir = TempDir::new().unwrap();
    let job = ZoneJob {
        gis_output: Some(dir.path().join("missing_dir").join("zones_gis.csv")),
        ..zone_job(&dir, false)
    };
    let config = AnalysisConfig::from_toml_str(&zone_config("sum")).unwrap();

    let result = run_zone_flow(&job, &config);

    assert!(matches!(result, Err(FlowError::Io(_))));
    assert!(!job.output.exists(), "flow table removed when a later output fails");
}

#[test]
fn test_zone_flow_rejects_config_without_zones() {
    let dir = TempDir::new().unwrap();
    let job = zone_job(&dir, false);
    let config = AnalysisConfig::from_toml_str(ARCADE_CONFIG).unwrap();

    assert!(matches!(
        run_zone_flow(&job, &config),
        Err(FlowError::InvalidConfig(_))
    ));
    assert!(!job.output.exists());
}

// ---------------------------------------------------------------------------
// Configuration files
// ---------------------------------------------------------------------------

#[test]
fn test_config_with_sensor_in_two_zones_fails_to_load() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "overlap.toml",
        r#"
[[zones]]
name = "A"
sensors = ["s1", "s2"]

[[zones]]
name = "B"
sensors = ["s2"]
"#,
    );
    assert!(matches!(
        AnalysisConfig::load(&path),
        Err(FlowError::InvalidConfig(_))
    ));
}

#[test]
fn test_bundled_configs_load_from_disk() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("config");
    for name in ["sendai_arcade.toml", "sendai_zones.toml", "sendai_streets.toml"] {
        let config = AnalysisConfig::load(root.join(name))
            .unwrap_or_else(|e| panic!("{} should load: {}", name, e));
        assert!(!config.edges.is_empty(), "{} has edges", name);
    }
}

// ---------------------------------------------------------------------------
// Timeline conversion
// ---------------------------------------------------------------------------

#[test]
fn test_timeline_conversion_writes_points() {
    let dir = TempDir::new().unwrap();
    let json = r#"[
        {
            "startTime": "2025-04-01T10:00:00.000+09:00",
            "endTime": "2025-04-01T10:30:00.000+09:00",
            "visit": { "topCandidate": { "placeLocation": "geo:38.261976,140.880226", "semanticType": "HOME" } }
        },
        {
            "startTime": "2025-04-01T11:00:00.000+09:00",
            "timelinePath": [
                { "point": "geo:38.2600,140.8800", "durationMinutesOffsetFromStartTime": "15" }
            ]
        }
    ]"#;
    let job = TimelineJob {
        input: write(&dir, "Timeline.json", json),
        output: dir.path().join("timeline.csv"),
    };

    let summary = run_timeline(&job).unwrap();
    assert_eq!(summary.stats.points, 2);

    let (header, rows) = read_table(&job.output);
    assert_eq!(
        header,
        vec!["timestamp", "latitude", "longitude", "type", "semantic_type"]
    );
    assert_eq!(rows[0][3], "visit");
    assert_eq!(rows[0][4], "HOME");
    assert_eq!(rows[1][0], "2025-04-01T11:15:00+09:00");
    assert_eq!(rows[1][3], "path_point");
}
