//! Vector tile protobuf wire format.
//!
//! Hand-written prost messages for the Mapbox Vector Tile 2.1 schema.
//! The schema is four small messages and has not changed in years, so the
//! derive structs live here directly instead of going through a protoc
//! build step.

/// Top-level tile message. Layers sit at field 3.
#[derive(Clone, PartialEq, prost::Message)]
pub struct VectorTile {
    #[prost(message, repeated, tag = "3")]
    pub layers: Vec<TileLayer>,
}

/// One named layer: features plus the shared key/value tables their
/// properties index into.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TileLayer {
    #[prost(string, required, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub features: Vec<TileFeature>,
    #[prost(string, repeated, tag = "3")]
    pub keys: Vec<String>,
    #[prost(message, repeated, tag = "4")]
    pub values: Vec<TileValue>,
    #[prost(uint32, optional, tag = "5")]
    pub extent: Option<u32>,
    #[prost(uint32, required, tag = "15")]
    pub version: u32,
}

/// One feature: tag pairs into the layer tables plus an encoded geometry
/// command stream.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TileFeature {
    #[prost(uint64, optional, tag = "1")]
    pub id: Option<u64>,
    #[prost(uint32, repeated, tag = "2")]
    pub tags: Vec<u32>,
    #[prost(enumeration = "GeomType", optional, tag = "3")]
    pub geom_type: Option<i32>,
    #[prost(uint32, repeated, tag = "4")]
    pub geometry: Vec<u32>,
}

/// A property value. Exactly one of the fields is set in a valid tile.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TileValue {
    #[prost(string, optional, tag = "1")]
    pub string_value: Option<String>,
    #[prost(float, optional, tag = "2")]
    pub float_value: Option<f32>,
    #[prost(double, optional, tag = "3")]
    pub double_value: Option<f64>,
    #[prost(int64, optional, tag = "4")]
    pub int_value: Option<i64>,
    #[prost(uint64, optional, tag = "5")]
    pub uint_value: Option<u64>,
    #[prost(sint64, optional, tag = "6")]
    pub sint_value: Option<i64>,
    #[prost(bool, optional, tag = "7")]
    pub bool_value: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum GeomType {
    Unknown = 0,
    Point = 1,
    LineString = 2,
    Polygon = 3,
}

impl TileValue {
    pub fn string(v: impl Into<String>) -> Self {
        Self {
            string_value: Some(v.into()),
            ..Default::default()
        }
    }

    pub fn int(v: i64) -> Self {
        Self {
            int_value: Some(v),
            ..Default::default()
        }
    }

    pub fn double(v: f64) -> Self {
        Self {
            double_value: Some(v),
            ..Default::default()
        }
    }

    pub fn boolean(v: bool) -> Self {
        Self {
            bool_value: Some(v),
            ..Default::default()
        }
    }
}
