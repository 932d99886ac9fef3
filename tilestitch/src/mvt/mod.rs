//! Vector tile decoding.
//!
//! Turns raw tile bytes into per-layer batches of feature records in
//! WGS84. Decoding is strict about structure and lenient about content:
//! a payload that is not a binary tile, or a geometry stream that cannot
//! be walked, fails the whole tile so the caller can quarantine it;
//! individual features with nothing usable in them are skipped quietly.
//!
//! Sources under load like to answer with gzipped bodies, HTML error
//! pages, or JSON error envelopes. The decoder sniffs for all three
//! before handing anything to the protobuf parser, so the quarantine
//! reason names the real problem instead of a baffling protobuf offset.

mod geometry;
mod props;
mod wire;

pub use geometry::{GeometryError, TileTransform};
pub use wire::{GeomType, TileFeature, TileLayer, TileValue, VectorTile};

use crate::coord::TileCoord;
use crate::feature::{FeatureRecord, LayerBatch};
use crate::layer::LayerPlan;
use geometry::decode_geometry;
use prost::Message;
use props::decode_properties;
use std::borrow::Cow;
use std::io::Read;
use thiserror::Error;
use tracing::{trace, warn};

/// Tile-local coordinate range when the layer does not declare one.
pub const DEFAULT_EXTENT: u32 = 4096;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Why a tile payload could not be decoded.
///
/// Every variant condemns the whole tile; the display string becomes the
/// quarantine reason.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload opens like text, not protobuf
    #[error("payload is not a binary tile, starts with: {head}")]
    NotBinary { head: String },

    /// Gzip wrapper present but broken
    #[error("gzip decompression failed: {0}")]
    Gzip(std::io::Error),

    /// Protobuf structure unparseable
    #[error("protobuf decode failed: {0}")]
    Protobuf(#[from] prost::DecodeError),

    /// A feature's geometry command stream is structurally invalid
    #[error("layer '{layer}' feature {sequence}: {source}")]
    Geometry {
        layer: String,
        sequence: u32,
        #[source]
        source: GeometryError,
    },
}

/// Everything one tile decoded into.
#[derive(Debug)]
pub struct DecodedTile {
    /// One batch per requested layer present in the tile
    pub batches: Vec<LayerBatch>,
    /// Identifier values nulled during property normalization
    pub nulled: u64,
}

impl DecodedTile {
    pub fn record_count(&self) -> usize {
        self.batches.iter().map(|b| b.len()).sum()
    }
}

/// Decodes one tile into feature records for the requested layers.
///
/// Layers in `plans` that the tile does not carry simply produce no
/// batch. Empty input decodes to an empty result.
pub fn decode_tile(
    coord: TileCoord,
    bytes: &[u8],
    plans: &[LayerPlan],
) -> Result<DecodedTile, DecodeError> {
    if bytes.is_empty() {
        return Ok(DecodedTile {
            batches: Vec::new(),
            nulled: 0,
        });
    }

    let raw = decompress_if_gzip(bytes)?;
    reject_text_payload(&raw)?;

    let tile = VectorTile::decode(raw.as_ref())?;

    let mut batches = Vec::new();
    let mut nulled = 0u64;

    for plan in plans {
        let Some(layer) = tile.layers.iter().find(|l| l.name == plan.name) else {
            continue;
        };
        if layer.version > 2 {
            warn!(
                tile = %coord,
                layer = %layer.name,
                version = layer.version,
                "layer declares an unknown schema version, decoding anyway"
            );
        }

        let extent = layer.extent.unwrap_or(DEFAULT_EXTENT);
        // One transform per tile and layer; every vertex goes through it.
        let transform = TileTransform::new(coord, extent);

        let mut records = Vec::with_capacity(layer.features.len());
        for (sequence, feature) in layer.features.iter().enumerate() {
            let sequence = sequence as u32;
            let geom_type = feature
                .geom_type
                .and_then(|v| GeomType::try_from(v).ok())
                .unwrap_or(GeomType::Unknown);

            let geometry = decode_geometry(geom_type, &feature.geometry, &transform).map_err(
                |source| DecodeError::Geometry {
                    layer: plan.name.clone(),
                    sequence,
                    source,
                },
            )?;

            let Some(geometry) = geometry else {
                trace!(
                    tile = %coord,
                    layer = %plan.name,
                    sequence = sequence,
                    "feature carries no usable geometry, skipped"
                );
                continue;
            };

            let decoded = decode_properties(&feature.tags, layer, plan, coord);
            nulled += decoded.nulled;

            records.push(FeatureRecord {
                layer: plan.name.clone(),
                geometry,
                properties: decoded.properties,
                tile: coord,
                sequence,
            });
        }

        batches.push(LayerBatch {
            layer: plan.name.clone(),
            records,
        });
    }

    Ok(DecodedTile { batches, nulled })
}

fn decompress_if_gzip(bytes: &[u8]) -> Result<Cow<'_, [u8]>, DecodeError> {
    if bytes.len() < 2 || bytes[..2] != GZIP_MAGIC {
        return Ok(Cow::Borrowed(bytes));
    }
    let mut decoder = flate2::read::GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(DecodeError::Gzip)?;
    Ok(Cow::Owned(out))
}

/// Cheap prefix check before the protobuf parser sees anything.
///
/// A valid tile can only open with the layers field key; a payload whose
/// first non-whitespace byte opens HTML or JSON is an error page.
fn reject_text_payload(bytes: &[u8]) -> Result<(), DecodeError> {
    let first = bytes.iter().find(|b| !b.is_ascii_whitespace());
    if matches!(first, Some(b'<') | Some(b'{') | Some(b'[')) {
        let head: String = String::from_utf8_lossy(&bytes[..bytes.len().min(48)])
            .chars()
            .filter(|c| !c.is_control())
            .collect();
        return Err(DecodeError::NotBinary { head });
    }
    Ok(())
}
