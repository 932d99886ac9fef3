//! Core data model for decoded map features.
//!
//! Everything between the decoder and the sink speaks these types: a
//! [`FeatureRecord`] is one decoded feature in geographic coordinates, a
//! [`LayerBatch`] is one tile's worth of records for one layer, and a
//! [`StitchGroup`] is the terminal artifact: one merged feature per
//! identifier value.

use crate::coord::TileCoord;
use geo_types::Geometry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Expected geometry class of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryClass {
    Point,
    Line,
    Polygon,
}

impl GeometryClass {
    /// Whether a concrete geometry belongs to this class.
    pub fn matches(&self, geometry: &Geometry<f64>) -> bool {
        matches!(
            (self, geometry),
            (GeometryClass::Point, Geometry::Point(_))
                | (GeometryClass::Point, Geometry::MultiPoint(_))
                | (GeometryClass::Line, Geometry::LineString(_))
                | (GeometryClass::Line, Geometry::MultiLineString(_))
                | (GeometryClass::Polygon, Geometry::Polygon(_))
                | (GeometryClass::Polygon, Geometry::MultiPolygon(_))
        )
    }
}

impl fmt::Display for GeometryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryClass::Point => write!(f, "point"),
            GeometryClass::Line => write!(f, "line"),
            GeometryClass::Polygon => write!(f, "polygon"),
        }
    }
}

impl std::str::FromStr for GeometryClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "point" => Ok(GeometryClass::Point),
            "line" | "linestring" => Ok(GeometryClass::Line),
            "polygon" => Ok(GeometryClass::Polygon),
            other => Err(format!("unknown geometry class '{}'", other)),
        }
    }
}

/// One property value from a feature's attribute bag.
///
/// Upstream schemas are untyped, so every value arrives as one of these
/// explicit variants and normalization can be checked exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl PropertyValue {
    /// Returns the integer value, if this is an integer.
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns a numeric view of the value for sum/mean aggregation.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    /// Canonical, hashable key for grouping features by this value.
    ///
    /// Floats are keyed by bit pattern so grouping stays exact rather than
    /// subject to formatting precision.
    pub fn group_key(&self) -> String {
        match self {
            PropertyValue::Int(v) => format!("i:{}", v),
            PropertyValue::Float(v) => format!("f:{:016x}", v.to_bits()),
            PropertyValue::Str(v) => format!("s:{}", v),
            PropertyValue::Bool(v) => format!("b:{}", v),
            PropertyValue::Null => "null".to_string(),
        }
    }

    /// Converts to a plain JSON value for output serialization.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PropertyValue::Int(v) => serde_json::Value::from(*v),
            PropertyValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            PropertyValue::Str(v) => serde_json::Value::from(v.clone()),
            PropertyValue::Bool(v) => serde_json::Value::from(*v),
            PropertyValue::Null => serde_json::Value::Null,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::Str(v) => write!(f, "{}", v),
            PropertyValue::Bool(v) => write!(f, "{}", v),
            PropertyValue::Null => write!(f, "null"),
        }
    }
}

/// One decoded feature in WGS84 longitude/latitude.
///
/// `tile` and `sequence` record where the feature came from: the source
/// tile and the feature's index within that tile. Together they form the
/// stable sort key that makes "first observed" aggregation deterministic
/// regardless of fetch completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Name of the layer this feature belongs to
    pub layer: String,
    /// Geometry in geographic coordinates (WGS84 lon/lat)
    pub geometry: Geometry<f64>,
    /// Attribute bag in decode order
    pub properties: IndexMap<String, PropertyValue>,
    /// Tile the feature was decoded from
    pub tile: TileCoord,
    /// Index of the feature within its tile
    pub sequence: u32,
}

impl FeatureRecord {
    /// Stable ordering key: (zoom, x, y, sequence).
    #[inline]
    pub fn sort_key(&self) -> (u8, u32, u32, u32) {
        (self.tile.zoom, self.tile.x, self.tile.y, self.sequence)
    }

    /// Looks up a property value.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }
}

/// One tile's decoded output for one layer.
#[derive(Debug, Clone, Default)]
pub struct LayerBatch {
    /// Layer name as it appears in the tile
    pub layer: String,
    /// Decoded records, in tile order
    pub records: Vec<FeatureRecord>,
}

impl LayerBatch {
    pub fn new(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One stitched output row: all fragments sharing an identifier value,
/// merged into a single geometry with aggregated attributes.
#[derive(Debug, Clone)]
pub struct StitchGroup {
    /// Value of the identifier column, or null for a layer-wide group
    pub identifier: PropertyValue,
    /// Merged geometry, topologically valid, matching the layer's class
    pub geometry: Geometry<f64>,
    /// Aggregated attributes per the layer's rules
    pub properties: IndexMap<String, PropertyValue>,
    /// Number of fragments merged into this group
    pub fragment_count: usize,
}
