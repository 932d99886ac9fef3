//! Persistence of stitched layers.
//!
//! A [`FeatureSink`] receives one finished layer at a time and writes
//! it somewhere durable. The stock implementation emits one GeoJSON
//! FeatureCollection per layer; [`MemorySink`] keeps everything in
//! memory for tests.

use crate::feature::{PropertyValue, StitchGroup};
use geo_types::{Geometry, LineString, Polygon};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

/// Errors raised while persisting a layer.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: io::Error,
    },

    #[error("failed to encode layer output: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for stitched layers.
pub trait FeatureSink: Send + Sync {
    /// Writes one layer's groups, replacing any previous output for
    /// that layer.
    fn persist(&self, layer: &str, groups: &[StitchGroup]) -> Result<(), SinkError>;
}

/// Writes each layer as `<layer>.geojson` under one directory.
pub struct GeoJsonSink {
    directory: PathBuf,
}

impl GeoJsonSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

impl FeatureSink for GeoJsonSink {
    fn persist(&self, layer: &str, groups: &[StitchGroup]) -> Result<(), SinkError> {
        std::fs::create_dir_all(&self.directory).map_err(|source| SinkError::Create {
            path: self.directory.clone(),
            source,
        })?;

        let features: Vec<Value> = groups.iter().map(feature_value).collect();
        let collection = json!({
            "type": "FeatureCollection",
            "features": features,
        });

        let path = self.directory.join(format!("{}.geojson", layer));

        // Write to temp file first, then rename for atomicity
        let temp_path = path.with_extension("geojson.tmp");
        let file = File::create(&temp_path).map_err(|source| SinkError::Create {
            path: temp_path.clone(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &collection)?;
        writer.flush().map_err(|source| SinkError::Write {
            path: temp_path.clone(),
            source,
        })?;
        std::fs::rename(&temp_path, &path).map_err(|source| SinkError::Write {
            path: path.clone(),
            source,
        })?;

        info!(
            layer,
            path = %path.display(),
            features = groups.len(),
            "layer written"
        );
        Ok(())
    }
}

/// Collects stitched layers in memory instead of touching the
/// filesystem. Intended for tests.
#[derive(Default)]
pub struct MemorySink {
    layers: Mutex<HashMap<String, Vec<StitchGroup>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last groups persisted for `layer`, if any.
    pub fn layer(&self, layer: &str) -> Option<Vec<StitchGroup>> {
        self.layers.lock().get(layer).cloned()
    }

    /// Names of all layers persisted so far, sorted.
    pub fn layer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.layers.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl FeatureSink for MemorySink {
    fn persist(&self, layer: &str, groups: &[StitchGroup]) -> Result<(), SinkError> {
        self.layers.lock().insert(layer.to_string(), groups.to_vec());
        Ok(())
    }
}

fn feature_value(group: &StitchGroup) -> Value {
    let mut properties = serde_json::Map::with_capacity(group.properties.len());
    for (column, value) in &group.properties {
        properties.insert(column.clone(), property_value(value));
    }
    json!({
        "type": "Feature",
        "properties": properties,
        "geometry": geometry_value(&group.geometry),
    })
}

fn property_value(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Int(v) => Value::from(*v),
        // JSON has no NaN or infinity; those become null.
        PropertyValue::Float(v) => serde_json::Number::from_f64(*v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        PropertyValue::Str(v) => Value::from(v.as_str()),
        PropertyValue::Bool(v) => Value::from(*v),
        PropertyValue::Null => Value::Null,
    }
}

fn geometry_value(geometry: &Geometry<f64>) -> Value {
    match geometry {
        Geometry::Point(p) => json!({
            "type": "Point",
            "coordinates": [p.x(), p.y()],
        }),
        Geometry::MultiPoint(mp) => json!({
            "type": "MultiPoint",
            "coordinates": mp.iter().map(|p| json!([p.x(), p.y()])).collect::<Vec<_>>(),
        }),
        Geometry::LineString(line) => json!({
            "type": "LineString",
            "coordinates": positions(line),
        }),
        Geometry::MultiLineString(ml) => json!({
            "type": "MultiLineString",
            "coordinates": ml.iter().map(positions).collect::<Vec<_>>(),
        }),
        Geometry::Polygon(p) => json!({
            "type": "Polygon",
            "coordinates": rings(p),
        }),
        Geometry::MultiPolygon(mp) => json!({
            "type": "MultiPolygon",
            "coordinates": mp.iter().map(rings).collect::<Vec<_>>(),
        }),
        // The stitcher only emits the six shapes above.
        _ => Value::Null,
    }
}

fn positions(line: &LineString<f64>) -> Value {
    Value::Array(line.coords().map(|c| json!([c.x, c.y])).collect())
}

fn rings(polygon: &Polygon<f64>) -> Value {
    let mut rings = vec![positions(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(positions));
    Value::Array(rings)
}
