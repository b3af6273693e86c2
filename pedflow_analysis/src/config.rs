/// Analysis configuration.
///
/// Zone membership and the edge list are static data: they name the exact
/// strings used as series columns, so they are checked for consistency
/// before any input is read. A configuration is loaded from TOML:
///
/// ```toml
/// [aggregation]
/// mode = "mean"   # or "sum"
/// key = "name"    # pivot on location name, or "id" for sensor id
///
/// [gravity]
/// decay = "linear"          # "mass_only", or { power = 1.5 }
/// coefficient = 1.0
/// distance_offset_m = 0.0
///
/// [[zones]]
/// name = "Zone A"
/// sensors = ["jp.sendai.Blesensor.per3600.1", "jp.sendai.Blesensor.per3600.2"]
///
/// [[edges]]
/// source = "Zone A"
/// target = "Zone C"
/// ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::analysis::gravity::GravityParams;
use crate::analysis::series::AggregationMode;
use crate::model::{Edge, FlowError, Result, SeriesKey};

// ---------------------------------------------------------------------------
// Configuration file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub mode: AggregationMode,
    pub key: SeriesKey,
}

/// A named group of sensors.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ZoneDefinition {
    pub name: String,
    pub sensors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    pub gravity: GravityParams,

    #[serde(default)]
    pub zones: Vec<ZoneDefinition>,

    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl AnalysisConfig {
    /// Reads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FlowError::MissingInput(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AnalysisConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that need no input data: gravity parameters,
    /// zone mapping consistency, and well-formed, unique edges.
    ///
    /// Whether edge endpoints exist is only known once data is loaded;
    /// unknown endpoints are skipped with a warning at that point.
    pub fn validate(&self) -> Result<()> {
        self.gravity.validate().map_err(FlowError::InvalidConfig)?;
        ZoneMapping::new(&self.zones)?;

        let mut seen = BTreeSet::new();
        for edge in &self.edges {
            if edge.source.trim().is_empty() || edge.target.trim().is_empty() {
                return Err(FlowError::InvalidConfig(format!(
                    "edge '{}' has an empty endpoint",
                    edge
                )));
            }
            if edge.source == edge.target {
                return Err(FlowError::InvalidConfig(format!(
                    "edge '{}' connects a location to itself",
                    edge
                )));
            }
            if !seen.insert(edge) {
                return Err(FlowError::InvalidConfig(format!("duplicate edge '{}'", edge)));
            }
        }
        Ok(())
    }

    pub fn zone_mapping(&self) -> Result<ZoneMapping> {
        ZoneMapping::new(&self.zones)
    }

    /// Edges whose endpoints are not configured zones. Only meaningful for
    /// zone analyses; location analyses name raw locations instead.
    pub fn edges_outside_zones(&self) -> Vec<&Edge> {
        let names: BTreeSet<&str> = self.zones.iter().map(|z| z.name.as_str()).collect();
        self.edges
            .iter()
            .filter(|e| !names.contains(e.source.as_str()) || !names.contains(e.target.as_str()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Zone mapping
// ---------------------------------------------------------------------------

/// Validated sensor → zone lookup. Every sensor belongs to at most one zone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneMapping {
    zones: Vec<String>,
    sensor_zone: BTreeMap<String, String>,
}

impl ZoneMapping {
    pub fn new(definitions: &[ZoneDefinition]) -> Result<Self> {
        let mut zones = Vec::with_capacity(definitions.len());
        let mut sensor_zone: BTreeMap<String, String> = BTreeMap::new();

        for zone in definitions {
            let name = zone.name.trim();
            if name.is_empty() {
                return Err(FlowError::InvalidConfig("zone with an empty name".to_string()));
            }
            if zones.iter().any(|z| z == name) {
                return Err(FlowError::InvalidConfig(format!("duplicate zone '{}'", name)));
            }
            if zone.sensors.is_empty() {
                return Err(FlowError::InvalidConfig(format!("zone '{}' has no sensors", name)));
            }
            for sensor in &zone.sensors {
                if let Some(existing) = sensor_zone.insert(sensor.clone(), name.to_string()) {
                    return Err(FlowError::InvalidConfig(format!(
                        "sensor '{}' is mapped to both '{}' and '{}'",
                        sensor, existing, name
                    )));
                }
            }
            zones.push(name.to_string());
        }

        Ok(ZoneMapping { zones, sensor_zone })
    }

    /// Zone names in configuration order.
    pub fn zones(&self) -> &[String] {
        &self.zones
    }

    pub fn zone_of(&self, sensor: &str) -> Option<&str> {
        self.sensor_zone.get(sensor).map(String::as_str)
    }

    pub fn sensors_of<'a>(&'a self, zone: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.sensor_zone
            .iter()
            .filter(move |(_, z)| z.as_str() == zone)
            .map(|(s, _)| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
