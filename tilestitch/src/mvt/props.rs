//! Property decoding and type normalization.
//!
//! Feature tags are index pairs into the layer's key and value tables.
//! After raw decoding, fields the layer plan marks as integer identifiers
//! are forced to clean `i64` values or nulled, string fields are coerced
//! unconditionally, and identifier remap tables are applied. Everything
//! else passes through as decoded.
//!
//! Nulling is deliberate: a fabricated identifier would silently merge
//! unrelated entities downstream, a null merely leaves one ungrouped.

use crate::coord::TileCoord;
use crate::feature::PropertyValue;
use crate::layer::LayerPlan;
use crate::mvt::wire::{TileLayer, TileValue};
use indexmap::IndexMap;
use tracing::{trace, warn};

/// Properties for one feature plus how many values normalization nulled.
pub struct DecodedProperties {
    pub properties: IndexMap<String, PropertyValue>,
    pub nulled: u64,
}

/// Decodes a feature's tag pairs against the layer tables and applies the
/// plan's normalization rules.
pub fn decode_properties(
    tags: &[u32],
    layer: &TileLayer,
    plan: &LayerPlan,
    tile: TileCoord,
) -> DecodedProperties {
    let mut properties = IndexMap::new();
    let mut nulled = 0u64;

    for pair in tags.chunks_exact(2) {
        let (key_idx, value_idx) = (pair[0] as usize, pair[1] as usize);
        let (Some(key), Some(value)) = (layer.keys.get(key_idx), layer.values.get(value_idx))
        else {
            trace!(
                tile = %tile,
                layer = %plan.name,
                key_idx = key_idx,
                value_idx = value_idx,
                "tag pair indexes outside layer tables, skipped"
            );
            continue;
        };

        let raw = raw_value(value);
        let normalized = if plan.integer_fields.iter().any(|f| f == key) {
            match normalize_integer(&raw) {
                Some(v) => PropertyValue::Int(plan.remap_value(key, v).unwrap_or(v)),
                None if raw.is_null() => PropertyValue::Null,
                None => {
                    warn!(
                        tile = %tile,
                        layer = %plan.name,
                        field = %key,
                        value = %raw,
                        "identifier value is not a clean integer, nulled"
                    );
                    nulled += 1;
                    PropertyValue::Null
                }
            }
        } else if plan.string_fields.iter().any(|f| f == key) {
            coerce_string(raw)
        } else {
            raw
        };

        properties.insert(key.clone(), normalized);
    }

    DecodedProperties { properties, nulled }
}

/// Raw protobuf value to a property value, no plan rules applied.
fn raw_value(value: &TileValue) -> PropertyValue {
    if let Some(s) = &value.string_value {
        PropertyValue::Str(s.clone())
    } else if let Some(f) = value.float_value {
        PropertyValue::Float(f as f64)
    } else if let Some(d) = value.double_value {
        PropertyValue::Float(d)
    } else if let Some(i) = value.int_value {
        PropertyValue::Int(i)
    } else if let Some(u) = value.uint_value {
        if u <= i64::MAX as u64 {
            PropertyValue::Int(u as i64)
        } else {
            warn!(value = u, "uint64 property exceeds i64 range, nulled");
            PropertyValue::Null
        }
    } else if let Some(s) = value.sint_value {
        PropertyValue::Int(s)
    } else if let Some(b) = value.bool_value {
        PropertyValue::Bool(b)
    } else {
        PropertyValue::Null
    }
}

/// Extracts a clean integer, or `None` when the value cannot honestly be
/// one. Floats and strings qualify only when they carry a whole number.
fn normalize_integer(value: &PropertyValue) -> Option<i64> {
    match value {
        PropertyValue::Int(v) => Some(*v),
        PropertyValue::Float(f) => whole_float(*f),
        PropertyValue::Str(s) => {
            let trimmed = s.trim();
            if let Ok(v) = trimmed.parse::<i64>() {
                Some(v)
            } else {
                trimmed.parse::<f64>().ok().and_then(whole_float)
            }
        }
        PropertyValue::Bool(_) | PropertyValue::Null => None,
    }
}

fn whole_float(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Coerces any non-null value to its string form.
fn coerce_string(value: PropertyValue) -> PropertyValue {
    match value {
        PropertyValue::Str(_) | PropertyValue::Null => value,
        PropertyValue::Int(v) => PropertyValue::Str(v.to_string()),
        PropertyValue::Float(f) => PropertyValue::Str(f.to_string()),
        PropertyValue::Bool(b) => PropertyValue::Str(b.to_string()),
    }
}
