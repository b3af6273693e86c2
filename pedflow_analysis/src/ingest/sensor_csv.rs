/// People-flow sensor CSV reader.
///
/// Exports from different portals name the same fields differently
/// (`identifcation` with the portal's own typo, `LocationName`, `緯度`, ...).
/// Headers are normalized to canonical columns once, at the boundary;
/// nothing downstream sees a raw header name.
///
/// Two file shapes are read:
/// - count files: id or name, timestamp, count, and optionally occupancy
///   and coordinates on every row;
/// - sensor location files: id, coordinates, optional name, no timestamps.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::ingest::{parse_count, parse_optional_number, parse_point, parse_timestamp};
use crate::locations::LocationIndex;
use crate::logging::{self, Stage};
use crate::model::{FlowError, GeoPoint, Result, SensorRecord};

// ---------------------------------------------------------------------------
// Column normalization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id,
    Name,
    Timestamp,
    Count,
    Occupancy,
    Latitude,
    Longitude,
}

impl Column {
    pub fn canonical_name(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::Name => "name",
            Column::Timestamp => "timestamp",
            Column::Count => "count",
            Column::Occupancy => "occupancy",
            Column::Latitude => "latitude",
            Column::Longitude => "longitude",
        }
    }
}

/// Known header spellings, compared case-insensitively after trimming.
const COLUMN_ALIASES: &[(&str, Column)] = &[
    ("id", Column::Id),
    ("identifcation", Column::Id),
    ("identification", Column::Id),
    ("sensor_id", Column::Id),
    ("sensorid", Column::Id),
    ("name", Column::Name),
    ("locationname", Column::Name),
    ("location_name", Column::Name),
    ("location", Column::Name),
    ("timestamp", Column::Timestamp),
    ("dateobservedfrom", Column::Timestamp),
    ("datetime", Column::Timestamp),
    ("time", Column::Timestamp),
    ("count", Column::Count),
    ("peoplecount", Column::Count),
    ("people_count", Column::Count),
    ("occupancy", Column::Occupancy),
    ("peopleoccupancy", Column::Occupancy),
    ("people_occupancy", Column::Occupancy),
    ("latitude", Column::Latitude),
    ("lat", Column::Latitude),
    ("緯度", Column::Latitude),
    ("longitude", Column::Longitude),
    ("lon", Column::Longitude),
    ("lng", Column::Longitude),
    ("経度", Column::Longitude),
];

/// Canonical column for a raw header, if it is a known spelling.
pub fn canonical_column(header: &str) -> Option<Column> {
    let key = header.trim().trim_start_matches('\u{feff}').to_lowercase();
    COLUMN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, column)| *column)
}

/// Position of each canonical column in one file's header. The first
/// header matching a column wins.
#[derive(Debug, Default, Clone)]
struct HeaderMap {
    positions: BTreeMap<&'static str, usize>,
}

impl HeaderMap {
    fn from_headers(headers: &StringRecord) -> Self {
        let mut positions = BTreeMap::new();
        for (i, header) in headers.iter().enumerate() {
            if let Some(column) = canonical_column(header) {
                positions.entry(column.canonical_name()).or_insert(i);
            }
        }
        HeaderMap { positions }
    }

    fn position(&self, column: Column) -> Option<usize> {
        self.positions.get(column.canonical_name()).copied()
    }

    fn require(&self, column: Column, file: &str) -> Result<usize> {
        self.position(column).ok_or_else(|| FlowError::MissingColumn {
            file: file.to_string(),
            column: column.canonical_name().to_string(),
        })
    }

    fn field<'r>(&self, record: &'r StringRecord, column: Column) -> Option<&'r str> {
        self.position(column)
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn point(&self, record: &StringRecord) -> Option<GeoPoint> {
        match (
            self.field(record, Column::Latitude),
            self.field(record, Column::Longitude),
        ) {
            (Some(lat), Some(lon)) => parse_point(lat, lon),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Count files
// ---------------------------------------------------------------------------

/// What happened to the rows of one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub rows: usize,
    pub kept: usize,
    pub bad_timestamp: usize,
    pub bad_count: usize,
    pub missing_id: usize,
    pub malformed: usize,
}

impl ReadStats {
    pub fn skipped(&self) -> usize {
        self.rows - self.kept
    }
}

#[derive(Debug, Clone, Default)]
pub struct SensorCsv {
    pub records: Vec<SensorRecord>,
    pub stats: ReadStats,
}

fn open_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader)
}

fn ensure_exists(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(FlowError::MissingInput(path.to_path_buf()))
    }
}

/// Reads a count file from disk.
pub fn read_records_from_path(path: impl AsRef<Path>) -> Result<SensorCsv> {
    let path = path.as_ref();
    ensure_exists(path)?;
    let file = std::fs::File::open(path)?;
    read_records(file, &path.display().to_string())
}

/// Reads a count file. `source` names the input in errors and logs.
///
/// Requires a timestamp column, a count column, and an id or name column
/// (a name-only file uses the name as id). Rows with an unparseable
/// timestamp or count are skipped and tallied in `ReadStats`.
pub fn read_records<R: Read>(reader: R, source: &str) -> Result<SensorCsv> {
    let mut csv = open_reader(reader);
    let headers = HeaderMap::from_headers(csv.headers()?);

    if headers.position(Column::Id).is_none() && headers.position(Column::Name).is_none() {
        return Err(FlowError::MissingColumn {
            file: source.to_string(),
            column: Column::Id.canonical_name().to_string(),
        });
    }
    headers.require(Column::Timestamp, source)?;
    headers.require(Column::Count, source)?;

    let mut stats = ReadStats::default();
    let mut records = Vec::new();

    for (line, row) in csv.records().enumerate() {
        stats.rows += 1;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                stats.malformed += 1;
                logging::debug(Stage::Ingest, Some(source), &format!("row {}: {}", line + 2, e));
                continue;
            }
        };

        let name = headers.field(&row, Column::Name).map(String::from);
        let sensor_id = match headers.field(&row, Column::Id).map(String::from).or_else(|| name.clone()) {
            Some(id) => id,
            None => {
                stats.missing_id += 1;
                continue;
            }
        };
        let Some(timestamp) = headers.field(&row, Column::Timestamp).and_then(parse_timestamp) else {
            stats.bad_timestamp += 1;
            continue;
        };
        let Some(people_count) = headers.field(&row, Column::Count).and_then(parse_count) else {
            stats.bad_count += 1;
            continue;
        };

        records.push(SensorRecord {
            sensor_id,
            location_name: name,
            timestamp,
            people_count,
            occupancy: headers.field(&row, Column::Occupancy).and_then(parse_optional_number),
            point: headers.point(&row),
        });
        stats.kept += 1;
    }

    if stats.bad_timestamp > 0 {
        logging::warn(
            Stage::Ingest,
            Some(source),
            &format!("{} rows skipped: missing or malformed timestamp", stats.bad_timestamp),
        );
    }
    logging::log_batch_summary(Stage::Ingest, source, stats.rows, stats.kept, stats.skipped());

    Ok(SensorCsv { records, stats })
}

// ---------------------------------------------------------------------------
// Sensor location files
// ---------------------------------------------------------------------------

/// One row of a sensor location file.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSite {
    pub sensor_id: String,
    pub name: Option<String>,
    pub point: Option<GeoPoint>,
}

pub fn read_sensor_sites_from_path(path: impl AsRef<Path>) -> Result<Vec<SensorSite>> {
    let path = path.as_ref();
    ensure_exists(path)?;
    let file = std::fs::File::open(path)?;
    read_sensor_sites(file, &path.display().to_string())
}

/// Reads a sensor location file. Requires an id column; a site whose
/// coordinates do not parse is kept with `point: None`. Rows the CSV
/// layer cannot decode, or that carry no id, are skipped and logged the
/// same way as in count files.
pub fn read_sensor_sites<R: Read>(reader: R, source: &str) -> Result<Vec<SensorSite>> {
    let mut csv = open_reader(reader);
    let headers = HeaderMap::from_headers(csv.headers()?);
    headers.require(Column::Id, source)?;

    let mut stats = ReadStats::default();
    let mut sites = Vec::new();
    for (line, row) in csv.records().enumerate() {
        stats.rows += 1;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                stats.malformed += 1;
                logging::debug(Stage::Ingest, Some(source), &format!("row {}: {}", line + 2, e));
                continue;
            }
        };
        let Some(sensor_id) = headers.field(&row, Column::Id) else {
            stats.missing_id += 1;
            continue;
        };
        let point = headers.point(&row);
        if point.is_none() {
            logging::warn(Stage::Ingest, Some(sensor_id), "sensor has no usable coordinates");
        }
        sites.push(SensorSite {
            sensor_id: sensor_id.to_string(),
            name: headers.field(&row, Column::Name).map(String::from),
            point,
        });
        stats.kept += 1;
    }

    logging::log_batch_summary(Stage::Ingest, source, stats.rows, stats.kept, stats.skipped());
    Ok(sites)
}

/// Mean coordinate per sensor id over all located sites.
pub fn site_index(sites: &[SensorSite]) -> LocationIndex {
    let grouped: BTreeMap<&str, Vec<GeoPoint>> = sites.iter().fold(BTreeMap::new(), |mut grouped, site| {
        if let Some(point) = site.point {
            grouped.entry(site.sensor_id.as_str()).or_default().push(point);
        }
        grouped
    });
    grouped
        .into_iter()
        .filter_map(|(id, points)| GeoPoint::mean(&points).map(|p| (id.to_string(), p)))
        .collect()
}

/// Fills each record's missing name and coordinates from the sensor site
/// with the same id.
///
/// Every record is kept: a sensor absent from the site file still counts
/// toward its zone, it just contributes no coordinates.
pub fn join_sites(records: Vec<SensorRecord>, sites: &[SensorSite]) -> Vec<SensorRecord> {
    let by_id: BTreeMap<&str, &SensorSite> = sites.iter().map(|s| (s.sensor_id.as_str(), s)).collect();

    let (joined, unlisted) = records.into_iter().fold(
        (Vec::new(), BTreeMap::<String, usize>::new()),
        |(mut joined, mut unlisted), record| {
            match by_id.get(record.sensor_id.as_str()) {
                Some(site) => joined.push(SensorRecord {
                    location_name: record.location_name.or_else(|| site.name.clone()),
                    point: record.point.or(site.point),
                    ..record
                }),
                None => {
                    *unlisted.entry(record.sensor_id.clone()).or_default() += 1;
                    joined.push(record);
                }
            }
            (joined, unlisted)
        },
    );

    for (sensor, rows) in &unlisted {
        logging::warn(
            Stage::Ingest,
            Some(sensor),
            &format!("not in sensor location file; {} rows kept without site metadata", rows),
        );
    }
    joined
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const PORTAL_EXPORT: &str = "\
dateObservedFrom,peopleCount,peopleOccupancy,identifcation,locationName,latitude,longitude
2025-01-01T10:00:00+09:00,120,6.0,jp.sendai.Blesensor.per3600.1,\"ハピナ名掛丁商店街・東\",38.261976,140.880226
2025-01-01T11:00:00+09:00,135.5,6.7,jp.sendai.Blesensor.per3600.1,ハピナ名掛丁商店街・東,38.261976,140.880226
not-a-date,99,1.0,jp.sendai.Blesensor.per3600.1,ハピナ名掛丁商店街・東,38.261976,140.880226
2025-01-01T12:00:00+09:00,,1.0,jp.sendai.Blesensor.per3600.1,ハピナ名掛丁商店街・東,38.261976,140.880226
2025-01-01T12:00:00+09:00,80,,jp.sendai.Blesensor.per3600.2,ハピナ名掛丁商店街・西,geo?,140.879
";

    #[test]
    fn test_canonical_column_aliases() {
        assert_eq!(canonical_column("identifcation"), Some(Column::Id));
        assert_eq!(canonical_column(" dateObservedFrom "), Some(Column::Timestamp));
        assert_eq!(canonical_column("PeopleCount"), Some(Column::Count));
        assert_eq!(canonical_column("LocationName"), Some(Column::Name));
        assert_eq!(canonical_column("緯度"), Some(Column::Latitude));
        assert_eq!(canonical_column("経度"), Some(Column::Longitude));
        assert_eq!(canonical_column("\u{feff}Timestamp"), Some(Column::Timestamp));
        assert_eq!(canonical_column("weather"), None);
    }

    #[test]
    fn test_portal_export_skips_bad_rows_and_keeps_the_rest() {
        let parsed = read_records(PORTAL_EXPORT.as_bytes(), "people-flow-2025.csv").unwrap();

        assert_eq!(parsed.stats.rows, 5);
        assert_eq!(parsed.stats.kept, 3);
        assert_eq!(parsed.stats.bad_timestamp, 1);
        assert_eq!(parsed.stats.bad_count, 1);

        let first = &parsed.records[0];
        assert_eq!(first.sensor_id, "jp.sendai.Blesensor.per3600.1");
        assert_eq!(first.location_name.as_deref(), Some("ハピナ名掛丁商店街・東"));
        assert_eq!(first.people_count, 120.0);
        assert_eq!(first.occupancy, Some(6.0));
        assert_eq!(first.point, Some(GeoPoint::new(38.261976, 140.880226)));
    }

    #[test]
    fn test_unparseable_coordinates_become_absent() {
        let parsed = read_records(PORTAL_EXPORT.as_bytes(), "people-flow-2025.csv").unwrap();
        let west = parsed
            .records
            .iter()
            .find(|r| r.sensor_id.ends_with(".2"))
            .expect("row with bad latitude is still a valid observation");
        assert_eq!(west.point, None);
        assert_eq!(west.occupancy, None);
    }

    #[test]
    fn test_name_only_file_uses_name_as_id() {
        let csv = "Timestamp,LocationName,PeopleCount,Latitude,Longitude\n\
                   2025-02-01 10:00:00,クリスロード商店街・中央,42,38.2605,140.8780\n";
        let parsed = read_records(csv.as_bytes(), "base data.csv").unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].sensor_id, "クリスロード商店街・中央");
    }

    #[test]
    fn test_missing_count_column_is_fatal() {
        let csv = "identifcation,dateObservedFrom\ns1,2025-01-01T00:00:00+09:00\n";
        match read_records(csv.as_bytes(), "flow.csv") {
            Err(FlowError::MissingColumn { column, .. }) => assert_eq!(column, "count"),
            other => panic!("expected MissingColumn, got {:?}", other.map(|p| p.stats)),
        }
    }

    #[test]
    fn test_sensor_sites_with_japanese_headers() {
        let csv = "identifcation,名称,緯度,経度\n\
                   jp.sendai.Blesensor.per3600.1,east,38.2620,140.8802\n\
                   jp.sendai.Blesensor.per3600.2,west,,140.8790\n";
        let sites = read_sensor_sites(csv.as_bytes(), "sensor_location.csv").unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].point, Some(GeoPoint::new(38.2620, 140.8802)));
        assert_eq!(sites[1].point, None);

        let index = site_index(&sites);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_undecodable_site_row_is_skipped_not_fatal() {
        let mut bytes = b"id,latitude,longitude\ns1,38.0,140.0\n".to_vec();
        bytes.extend_from_slice(b"s2,\xff\xfe,140.0\n");
        bytes.extend_from_slice(b"s3,38.5,140.5\n");

        let sites = read_sensor_sites(bytes.as_slice(), "sensor_location.csv").unwrap();
        let ids: Vec<&str> = sites.iter().map(|s| s.sensor_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s3"]);
    }

    #[test]
    fn test_join_sites_fills_gaps_and_keeps_unlisted_sensors() {
        let csv = "identifcation,dateObservedFrom,peopleCount\n\
                   s1,2025-01-01T00:00:00+09:00,5\n\
                   s9,2025-01-01T00:00:00+09:00,7\n";
        let records = read_records(csv.as_bytes(), "flow.csv").unwrap().records;
        let sites = vec![SensorSite {
            sensor_id: "s1".to_string(),
            name: Some("East".to_string()),
            point: Some(GeoPoint::new(38.0, 140.0)),
        }];

        let joined = join_sites(records, &sites);
        assert_eq!(joined.len(), 2);
        assert_eq!(joined[0].location_name.as_deref(), Some("East"));
        assert_eq!(joined[0].point, Some(GeoPoint::new(38.0, 140.0)));

        let unlisted = &joined[1];
        assert_eq!(unlisted.sensor_id, "s9");
        assert_eq!(unlisted.people_count, 7.0);
        assert_eq!(unlisted.point, None);
    }

    #[test]
    fn test_read_missing_file_is_missing_input() {
        let result = read_records_from_path("/nonexistent/people-flow-2025.csv");
        assert!(matches!(result, Err(FlowError::MissingInput(_))));
    }
}
