//! Seismic knowledge: active faults (GeoJSON) and earthquake history (CSV).

use super::coords::{haversine_km, GeoBox};
use super::{round_to, KnowledgeBundle, KnowledgeProvider};
use crate::config::KnowledgeConfig;
use crate::error::{GeoMapError, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::Path;

pub const NO_FAULTS: &str = "No active fault within the given range.";
pub const NO_EARTHQUAKES: &str =
    "No earthquakes with a magnitude greater than 4 have occurred within the given range since 1970.";

const FAULT_PROPERTIES: [&str; 8] = [
    "slip_type",
    "name",
    "catalog_name",
    "dip_dir",
    "average_dip",
    "average_rake",
    "lower_seis_depth",
    "upper_seis_depth",
];

const EARTHQUAKE_COLUMNS: [&str; 10] = [
    "time",
    "latitude",
    "longitude",
    "place",
    "mag",
    "magType",
    "depth",
    "type",
    "updated",
    "gap",
];

type Point = (f64, f64);

struct Fault {
    properties: Map<String, Value>,
    lines: Vec<Vec<Point>>,
}

/// Active fault traces loaded from a GeoJSON feature collection
pub struct ActiveFaultDb {
    faults: Vec<Fault>,
}

fn parse_line(value: &Value) -> Option<Vec<Point>> {
    value
        .as_array()?
        .iter()
        .map(|p| {
            let p = p.as_array()?;
            Some((p.first()?.as_f64()?, p.get(1)?.as_f64()?))
        })
        .collect()
}

fn parse_geometry(geometry: &Value) -> Vec<Vec<Point>> {
    let coordinates = &geometry["coordinates"];
    match geometry["type"].as_str() {
        Some("LineString") => parse_line(coordinates).into_iter().collect(),
        Some("MultiLineString") => coordinates
            .as_array()
            .map(|lines| lines.iter().filter_map(parse_line).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Clip a segment to the box (Liang-Barsky). `None` if it misses the box.
fn clip_segment(a: Point, b: Point, area: &GeoBox) -> Option<(Point, Point)> {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let checks = [
        (-dx, a.0 - area.min_lon),
        (dx, area.max_lon - a.0),
        (-dy, a.1 - area.min_lat),
        (dy, area.max_lat - a.1),
    ];

    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in checks {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((
        (a.0 + t0 * dx, a.1 + t0 * dy),
        (a.0 + t1 * dx, a.1 + t1 * dy),
    ))
}

impl ActiveFaultDb {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GeoMapError::Knowledge(format!("Failed to read fault database {}: {}", path.display(), e))
        })?;
        Self::from_geojson(&text)
    }

    pub fn from_geojson(text: &str) -> Result<Self> {
        let collection: Value = serde_json::from_str(text)?;
        let features = collection["features"].as_array().ok_or_else(|| {
            GeoMapError::Knowledge("Fault database is not a FeatureCollection".to_string())
        })?;

        let faults: Vec<Fault> = features
            .iter()
            .filter_map(|feature| {
                let lines = parse_geometry(&feature["geometry"]);
                if lines.is_empty() {
                    return None;
                }
                let properties = feature["properties"].as_object().cloned().unwrap_or_default();
                Some(Fault { properties, lines })
            })
            .collect();
        log::info!("Loaded {} active fault traces", faults.len());
        Ok(Self { faults })
    }

    /// Faults crossing the box with their clipped length, or a "no data" string
    pub fn active_faults(&self, area: &GeoBox) -> Value {
        let mut records = Vec::new();
        for fault in &self.faults {
            let mut length = 0.0;
            let mut hit = false;
            for line in &fault.lines {
                for pair in line.windows(2) {
                    if let Some((a, b)) = clip_segment(pair[0], pair[1], area) {
                        hit = true;
                        length += haversine_km(a.0, a.1, b.0, b.1);
                    }
                }
            }
            if !hit {
                continue;
            }

            let mut record = Map::new();
            for key in FAULT_PROPERTIES {
                record.insert(
                    key.to_string(),
                    fault.properties.get(key).cloned().unwrap_or(Value::Null),
                );
            }
            record.insert("length_in_kilometers".to_string(), json!(round_to(length, 2)));
            records.push(Value::Object(record));
        }

        if records.is_empty() {
            Value::String(NO_FAULTS.to_string())
        } else {
            Value::Array(records)
        }
    }
}

struct Earthquake {
    longitude: f64,
    latitude: f64,
    record: Map<String, Value>,
}

/// Historical earthquake catalog loaded from CSV
pub struct EarthquakeCatalog {
    events: Vec<Earthquake>,
    margin: f64,
}

/// Numeric cells become JSON numbers, empty cells null.
fn cell_value(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return Value::Null;
    }
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => json!(n),
        _ => Value::String(raw.to_string()),
    }
}

impl EarthquakeCatalog {
    pub fn load(path: &Path, margin: f64) -> Result<Self> {
        let reader = csv::Reader::from_path(path).map_err(|e| {
            GeoMapError::Knowledge(format!("Failed to open earthquake catalog {}: {}", path.display(), e))
        })?;
        Self::from_reader(reader, margin)
    }

    pub fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>, margin: f64) -> Result<Self> {
        let headers = reader
            .headers()
            .map_err(|e| GeoMapError::Knowledge(format!("Invalid catalog header: {}", e)))?
            .clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| GeoMapError::Knowledge(format!("Catalog has no '{}' column", name)))
        };
        let lat_idx = column("latitude")?;
        let lon_idx = column("longitude")?;
        let selected: Vec<(&str, usize)> = EARTHQUAKE_COLUMNS
            .iter()
            .filter_map(|c| headers.iter().position(|h| h == *c).map(|i| (*c, i)))
            .collect();

        let mut events = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| GeoMapError::Knowledge(format!("Invalid catalog row: {}", e)))?;
            let coords = (
                row.get(lon_idx).and_then(|v| v.trim().parse::<f64>().ok()),
                row.get(lat_idx).and_then(|v| v.trim().parse::<f64>().ok()),
            );
            let (Some(longitude), Some(latitude)) = coords else {
                log::debug!("Skipping catalog row without coordinates");
                continue;
            };

            let record = selected
                .iter()
                .map(|(name, idx)| (name.to_string(), cell_value(row.get(*idx).unwrap_or(""))))
                .collect();
            events.push(Earthquake {
                longitude,
                latitude,
                record,
            });
        }
        log::info!("Loaded {} catalog earthquakes", events.len());
        Ok(Self { events, margin })
    }

    /// Events inside the box grown by the margin, or a "no data" string
    pub fn earthquake_history(&self, area: &GeoBox) -> Value {
        let search = area.expand(self.margin);
        let records: Vec<Value> = self
            .events
            .iter()
            .filter(|e| search.contains(e.longitude, e.latitude))
            .map(|e| Value::Object(e.record.clone()))
            .collect();

        if records.is_empty() {
            Value::String(NO_EARTHQUAKES.to_string())
        } else {
            Value::Array(records)
        }
    }
}

/// Active faults and earthquake history for a box
pub struct SeismicProvider {
    faults: ActiveFaultDb,
    earthquakes: EarthquakeCatalog,
}

impl SeismicProvider {
    pub fn new(faults: ActiveFaultDb, earthquakes: EarthquakeCatalog) -> Self {
        Self {
            faults,
            earthquakes,
        }
    }

    pub fn from_config(config: &KnowledgeConfig) -> Result<Self> {
        Ok(Self::new(
            ActiveFaultDb::load(&config.active_faults_path)?,
            EarthquakeCatalog::load(&config.earthquake_catalog_path, config.earthquake_margin_deg)?,
        ))
    }
}

#[async_trait]
impl KnowledgeProvider for SeismicProvider {
    fn name(&self) -> &str {
        "seismic"
    }

    async fn query(&self, area: &GeoBox) -> Result<KnowledgeBundle> {
        let mut bundle = KnowledgeBundle::new();
        bundle.insert("active_faults".to_string(), self.faults.active_faults(area));
        bundle.insert(
            "earthquake_history".to_string(),
            self.earthquakes.earthquake_history(area),
        );
        Ok(bundle)
    }
}
