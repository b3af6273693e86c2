/// Roll-up of individual sensors into named zones.
///
/// A zone's position is the mean of its sensors' positions, and its count
/// at each timestamp is the mean or sum of every observation from its
/// sensors at that timestamp. Sensors that no zone claims are excluded and
/// reported once each.

use std::collections::BTreeSet;

use crate::analysis::series::{AggregationMode, ObservationSeries};
use crate::config::ZoneMapping;
use crate::locations::LocationIndex;
use crate::logging::{self, Stage};
use crate::model::{GeoPoint, Observation, SensorRecord};

/// Zone-level series produced from sensor observations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ZoneRollup {
    pub counts: ObservationSeries,
    /// Occupancy aggregated the same way; empty when no input carried it.
    pub occupancy: ObservationSeries,
    /// Sensor ids that matched no zone.
    pub unmapped: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct ZoneAggregator<'a> {
    mapping: &'a ZoneMapping,
    mode: AggregationMode,
}

impl<'a> ZoneAggregator<'a> {
    pub fn new(mapping: &'a ZoneMapping, mode: AggregationMode) -> Self {
        Self { mapping, mode }
    }

    pub fn mode(&self) -> AggregationMode {
        self.mode
    }

    /// Zone-level counts from sensor-level observations.
    pub fn aggregate(&self, observations: &[Observation]) -> ZoneRollup {
        let (zoned, unmapped) = self.relabel(observations.iter().map(|o| (o.id.as_str(), o.clone())));
        self.report_unmapped(&unmapped);

        ZoneRollup {
            counts: ObservationSeries::pivot(&zoned, self.mode),
            occupancy: ObservationSeries::default(),
            unmapped,
        }
    }

    /// Like `aggregate`, also rolling up occupancy where records carry it.
    pub fn aggregate_records(&self, records: &[SensorRecord]) -> ZoneRollup {
        let (counts, unmapped) = self.relabel(records.iter().map(|r| {
            (
                r.sensor_id.as_str(),
                Observation::new(r.sensor_id.as_str(), r.timestamp, r.people_count),
            )
        }));
        let (occupancy, _) = self.relabel(records.iter().filter_map(|r| {
            r.occupancy.map(|occ| {
                (
                    r.sensor_id.as_str(),
                    Observation::new(r.sensor_id.as_str(), r.timestamp, occ),
                )
            })
        }));
        self.report_unmapped(&unmapped);

        ZoneRollup {
            counts: ObservationSeries::pivot(&counts, self.mode),
            occupancy: ObservationSeries::pivot(&occupancy, self.mode),
            unmapped,
        }
    }

    /// Representative point per zone: the mean over its sensors that have
    /// coordinates. Zones with no located sensor are absent.
    pub fn zone_locations(&self, sensors: &LocationIndex) -> LocationIndex {
        self.mapping
            .zones()
            .iter()
            .filter_map(|zone| {
                let points: Vec<GeoPoint> = self
                    .mapping
                    .sensors_of(zone)
                    .filter_map(|s| sensors.find(s).copied())
                    .collect();
                GeoPoint::mean(&points).map(|p| (zone.clone(), p))
            })
            .collect()
    }

    /// Replaces each sensor id with its zone name, splitting off unmapped ids.
    fn relabel<'r, I>(&self, items: I) -> (Vec<Observation>, BTreeSet<String>)
    where
        I: Iterator<Item = (&'r str, Observation)>,
    {
        items.fold(
            (Vec::new(), BTreeSet::new()),
            |(mut zoned, mut unmapped), (sensor, obs)| {
                match self.mapping.zone_of(sensor) {
                    Some(zone) => zoned.push(Observation { id: zone.to_string(), ..obs }),
                    None => {
                        unmapped.insert(sensor.to_string());
                    }
                }
                (zoned, unmapped)
            },
        )
    }

    fn report_unmapped(&self, unmapped: &BTreeSet<String>) {
        for sensor in unmapped {
            logging::warn(
                Stage::Zones,
                Some(sensor),
                "sensor is not mapped to any zone; excluded",
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
