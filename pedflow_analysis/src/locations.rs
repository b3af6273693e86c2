/// Location registry for the pedestrian-flow analysis.
///
/// Sensor exports repeat a location's coordinates on every row, and the
/// same physical sensor is sometimes re-surveyed with slightly different
/// values. The registry collapses all of them into one representative
/// point per id (the arithmetic mean), which is what edge distances and
/// zone centroids are computed from.

use std::collections::BTreeMap;

use crate::model::{GeoPoint, Location, SensorRecord, SeriesKey};

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Map of location/zone id to representative coordinate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationIndex {
    points: BTreeMap<String, GeoPoint>,
}

impl LocationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mean coordinate per key over every record that carries coordinates.
    /// Records without a `point` contribute nothing.
    pub fn from_records(records: &[SensorRecord], key: SeriesKey) -> Self {
        let grouped: BTreeMap<&str, Vec<GeoPoint>> =
            records
                .iter()
                .fold(BTreeMap::new(), |mut grouped, record| {
                    if let Some(point) = record.point {
                        grouped.entry(record.key(key)).or_default().push(point);
                    }
                    grouped
                });

        grouped
            .into_iter()
            .filter_map(|(id, points)| GeoPoint::mean(&points).map(|p| (id.to_string(), p)))
            .collect()
    }

    pub fn insert(&mut self, id: impl Into<String>, point: GeoPoint) {
        self.points.insert(id.into(), point);
    }

    /// Looks up a location by id. Returns `None` if not found.
    pub fn find(&self, id: &str) -> Option<&GeoPoint> {
        self.points.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.points.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.points.keys().map(String::as_str)
    }

    pub fn locations(&self) -> impl Iterator<Item = Location> + '_ {
        self.points.iter().map(|(id, point)| Location {
            id: id.clone(),
            point: *point,
        })
    }
}

impl FromIterator<(String, GeoPoint)> for LocationIndex {
    fn from_iter<T: IntoIterator<Item = (String, GeoPoint)>>(iter: T) -> Self {
        LocationIndex {
            points: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
