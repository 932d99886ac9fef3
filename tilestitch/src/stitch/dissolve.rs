//! Group merge and attribute aggregation.
//!
//! A dissolve group is every staged fragment sharing one identifier
//! value. [`dissolve_group`] merges the fragments into a single
//! geometry of the layer's class and resolves each output column per
//! its aggregation rule. Polygons merge through a union fold; points
//! and lines collect parts with exact duplicates removed, which covers
//! features that were copied whole into more than one tile.
//!
//! "First observed" resolution sorts on the (zoom, x, y, sequence) key
//! before reading, so results do not depend on fetch completion order.

use crate::feature::{FeatureRecord, GeometryClass, PropertyValue, StitchGroup};
use crate::layer::{AggregateRule, LayerPlan};
use geo::BooleanOps;
use geo_types::{Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{trace, warn};

/// Merges one group of fragments into a [`StitchGroup`].
///
/// `columns` is the resolved output schema, in order. Returns `None`
/// for an empty group, a group whose merge yields no geometry of the
/// layer's class, or a group whose union aborts.
pub fn dissolve_group(
    plan: &LayerPlan,
    columns: &[String],
    mut records: Vec<FeatureRecord>,
) -> Option<StitchGroup> {
    if records.is_empty() {
        return None;
    }

    // Stable order before anything reads the records.
    records.sort_by_key(|r| r.sort_key());

    let identifier = match &plan.identifier_column {
        Some(column) => records[0]
            .property(column)
            .cloned()
            .unwrap_or(PropertyValue::Null),
        None => PropertyValue::Null,
    };

    let merged = catch_unwind(AssertUnwindSafe(|| {
        merge_geometries(plan.geometry, &records)
    }));
    let geometry = match merged {
        Ok(Some(geometry)) => geometry,
        Ok(None) => {
            warn!(
                layer = %plan.name,
                identifier = %identifier,
                "group merged to empty geometry, dropping"
            );
            return None;
        }
        Err(_) => {
            warn!(
                layer = %plan.name,
                identifier = %identifier,
                fragments = records.len(),
                "geometry union aborted, dropping group"
            );
            return None;
        }
    };

    let mut properties = IndexMap::with_capacity(columns.len());
    for column in columns {
        properties.insert(
            column.clone(),
            resolve_column(column, plan.rule_for(column), &records),
        );
    }

    Some(StitchGroup {
        identifier,
        geometry,
        properties,
        fragment_count: records.len(),
    })
}

/// Merges fragment geometries, keeping only parts of the layer's class.
fn merge_geometries(class: GeometryClass, records: &[FeatureRecord]) -> Option<Geometry<f64>> {
    match class {
        GeometryClass::Point => merge_points(records),
        GeometryClass::Line => merge_lines(records),
        GeometryClass::Polygon => merge_polygons(records),
    }
}

fn merge_points(records: &[FeatureRecord]) -> Option<Geometry<f64>> {
    let mut seen = HashSet::new();
    let mut points = Vec::new();
    for record in records {
        match &record.geometry {
            Geometry::Point(p) => {
                if seen.insert((p.x().to_bits(), p.y().to_bits())) {
                    points.push(*p);
                }
            }
            other => trace!(kind = kind_of(other), "skipping non-point part in point merge"),
        }
    }

    match points.len() {
        0 => None,
        1 => Some(Geometry::Point(points.remove(0))),
        _ => Some(Geometry::MultiPoint(MultiPoint::new(points))),
    }
}

fn merge_lines(records: &[FeatureRecord]) -> Option<Geometry<f64>> {
    let mut seen: HashSet<Vec<(u64, u64)>> = HashSet::new();
    let mut parts: Vec<LineString<f64>> = Vec::new();

    for record in records {
        let candidates: &[LineString<f64>] = match &record.geometry {
            Geometry::LineString(line) => std::slice::from_ref(line),
            Geometry::MultiLineString(lines) => &lines.0,
            other => {
                trace!(kind = kind_of(other), "skipping non-line part in line merge");
                &[]
            }
        };
        for part in candidates {
            let bits: Vec<(u64, u64)> =
                part.0.iter().map(|c| (c.x.to_bits(), c.y.to_bits())).collect();
            if seen.insert(bits) {
                parts.push(part.clone());
            }
        }
    }

    match parts.len() {
        0 => None,
        1 => Some(Geometry::LineString(parts.remove(0))),
        _ => Some(Geometry::MultiLineString(MultiLineString::new(parts))),
    }
}

/// Union fold over the polygonal fragments.
///
/// A single fragment passes through untouched, so a feature wholly
/// within one tile survives stitching byte-identical.
fn merge_polygons(records: &[FeatureRecord]) -> Option<Geometry<f64>> {
    let mut pieces: Vec<MultiPolygon<f64>> = Vec::new();
    for record in records {
        match &record.geometry {
            Geometry::Polygon(p) => pieces.push(MultiPolygon::new(vec![p.clone()])),
            Geometry::MultiPolygon(mp) => pieces.push(mp.clone()),
            other => trace!(kind = kind_of(other), "skipping non-polygon part in polygon merge"),
        }
    }
    if pieces.is_empty() {
        return None;
    }

    let mut result = pieces.remove(0);
    for piece in &pieces {
        result = result.union(piece);
    }
    if result.0.is_empty() {
        return None;
    }
    Some(collapse_polygonal(result))
}

/// A single-part union result stays a plain polygon.
fn collapse_polygonal(mut shape: MultiPolygon<f64>) -> Geometry<f64> {
    if shape.0.len() == 1 {
        Geometry::Polygon(shape.0.remove(0))
    } else {
        Geometry::MultiPolygon(shape)
    }
}

fn kind_of(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "point",
        Geometry::MultiPoint(_) => "multipoint",
        Geometry::LineString(_) => "linestring",
        Geometry::MultiLineString(_) => "multilinestring",
        Geometry::Polygon(_) => "polygon",
        Geometry::MultiPolygon(_) => "multipolygon",
        _ => "other",
    }
}

/// Resolves one output column over the sorted group records.
fn resolve_column(column: &str, rule: AggregateRule, records: &[FeatureRecord]) -> PropertyValue {
    match rule {
        AggregateRule::First => records
            .first()
            .and_then(|r| r.property(column))
            .cloned()
            .unwrap_or(PropertyValue::Null),

        AggregateRule::Sum => {
            let mut int_sum: i64 = 0;
            let mut float_sum = 0.0;
            let mut saw_numeric = false;
            let mut ints_only = true;
            for record in records {
                match record.property(column) {
                    Some(PropertyValue::Int(v)) => {
                        saw_numeric = true;
                        float_sum += *v as f64;
                        match int_sum.checked_add(*v) {
                            Some(sum) => int_sum = sum,
                            None => ints_only = false,
                        }
                    }
                    Some(PropertyValue::Float(v)) => {
                        saw_numeric = true;
                        ints_only = false;
                        float_sum += *v;
                    }
                    _ => {}
                }
            }
            if !saw_numeric {
                PropertyValue::Null
            } else if ints_only {
                PropertyValue::Int(int_sum)
            } else {
                PropertyValue::Float(float_sum)
            }
        }

        AggregateRule::Mean => {
            let mut sum = 0.0;
            let mut count = 0u64;
            for record in records {
                if let Some(value) = record.property(column).and_then(|v| v.as_f64()) {
                    sum += value;
                    count += 1;
                }
            }
            if count == 0 {
                PropertyValue::Null
            } else {
                PropertyValue::Float(sum / count as f64)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TileCoord;
    use geo::Area;
    use geo_types::{line_string, point, polygon};

    fn parcel_plan() -> LayerPlan {
        let mut plan = LayerPlan::new("parcels", GeometryClass::Polygon);
        plan.identifier_column = Some("parcel_id".to_string());
        plan.known_columns = vec!["parcel_id".to_string(), "area_sqm".to_string()];
        plan.aggregates = vec![("area_sqm".to_string(), AggregateRule::Sum)];
        plan
    }

    fn columns() -> Vec<String> {
        vec!["parcel_id".to_string(), "area_sqm".to_string()]
    }

    fn record(
        tile: TileCoord,
        sequence: u32,
        geometry: Geometry<f64>,
        props: &[(&str, PropertyValue)],
    ) -> FeatureRecord {
        FeatureRecord {
            layer: "parcels".to_string(),
            geometry,
            properties: props
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            tile,
            sequence,
        }
    }

    fn half_rect(x_min: f64, x_max: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: x_min, y: 0.0),
            (x: x_max, y: 0.0),
            (x: x_max, y: 1.0),
            (x: x_min, y: 1.0),
        ])
    }

    #[test]
    fn test_two_half_rectangles_dissolve_into_one() {
        let left = record(
            TileCoord::new(15, 100, 200),
            0,
            half_rect(0.0, 0.5),
            &[("parcel_id", PropertyValue::Int(42))],
        );
        let right = record(
            TileCoord::new(15, 101, 200),
            0,
            half_rect(0.5, 1.0),
            &[("parcel_id", PropertyValue::Int(42))],
        );

        let group = dissolve_group(&parcel_plan(), &columns(), vec![left, right]).unwrap();

        assert_eq!(group.identifier, PropertyValue::Int(42));
        assert_eq!(group.fragment_count, 2);
        assert!(matches!(group.geometry, Geometry::Polygon(_)));
        assert!((group.geometry.unsigned_area() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_fragment_round_trips_unchanged() {
        let lone = record(
            TileCoord::new(15, 100, 200),
            3,
            half_rect(0.0, 1.0),
            &[("parcel_id", PropertyValue::Int(7))],
        );

        let group = dissolve_group(&parcel_plan(), &columns(), vec![lone]).unwrap();

        // No union ran, so the coordinates are exactly the input's.
        assert_eq!(group.geometry, half_rect(0.0, 1.0));
        assert_eq!(group.fragment_count, 1);
    }

    #[test]
    fn test_first_rule_resolves_under_sort_key_not_input_order() {
        let mut plan = parcel_plan();
        plan.known_columns.push("name".to_string());
        let columns = vec!["parcel_id".to_string(), "name".to_string()];

        let later_tile = record(
            TileCoord::new(15, 101, 200),
            0,
            half_rect(0.5, 1.0),
            &[
                ("parcel_id", PropertyValue::Int(42)),
                ("name", PropertyValue::Str("late".to_string())),
            ],
        );
        let earlier_tile = record(
            TileCoord::new(15, 100, 200),
            0,
            half_rect(0.0, 0.5),
            &[
                ("parcel_id", PropertyValue::Int(42)),
                ("name", PropertyValue::Str("early".to_string())),
            ],
        );

        // Input order is reversed relative to the sort key.
        let group = dissolve_group(&plan, &columns, vec![later_tile, earlier_tile]).unwrap();

        assert_eq!(
            group.properties.get("name"),
            Some(&PropertyValue::Str("early".to_string()))
        );
    }

    #[test]
    fn test_sum_of_ints_stays_int() {
        let a = record(
            TileCoord::new(15, 100, 200),
            0,
            half_rect(0.0, 0.5),
            &[
                ("parcel_id", PropertyValue::Int(42)),
                ("area_sqm", PropertyValue::Int(3)),
            ],
        );
        let b = record(
            TileCoord::new(15, 101, 200),
            0,
            half_rect(0.5, 1.0),
            &[
                ("parcel_id", PropertyValue::Int(42)),
                ("area_sqm", PropertyValue::Int(4)),
            ],
        );

        let group = dissolve_group(&parcel_plan(), &columns(), vec![a, b]).unwrap();
        assert_eq!(group.properties.get("area_sqm"), Some(&PropertyValue::Int(7)));
    }

    #[test]
    fn test_sum_with_float_contribution_becomes_float() {
        let a = record(
            TileCoord::new(15, 100, 200),
            0,
            half_rect(0.0, 0.5),
            &[("area_sqm", PropertyValue::Int(3))],
        );
        let b = record(
            TileCoord::new(15, 101, 200),
            0,
            half_rect(0.5, 1.0),
            &[("area_sqm", PropertyValue::Float(1.5))],
        );

        let group = dissolve_group(&parcel_plan(), &columns(), vec![a, b]).unwrap();
        assert_eq!(
            group.properties.get("area_sqm"),
            Some(&PropertyValue::Float(4.5))
        );
    }

    #[test]
    fn test_sum_without_numeric_values_is_null() {
        let a = record(
            TileCoord::new(15, 100, 200),
            0,
            half_rect(0.0, 1.0),
            &[("area_sqm", PropertyValue::Str("n/a".to_string()))],
        );

        let group = dissolve_group(&parcel_plan(), &columns(), vec![a]).unwrap();
        assert_eq!(group.properties.get("area_sqm"), Some(&PropertyValue::Null));
    }

    #[test]
    fn test_mean_resolves_to_float() {
        let mut plan = parcel_plan();
        plan.aggregates = vec![("area_sqm".to_string(), AggregateRule::Mean)];

        let a = record(
            TileCoord::new(15, 100, 200),
            0,
            half_rect(0.0, 0.5),
            &[("area_sqm", PropertyValue::Int(3))],
        );
        let b = record(
            TileCoord::new(15, 101, 200),
            0,
            half_rect(0.5, 1.0),
            &[("area_sqm", PropertyValue::Int(5))],
        );

        let group = dissolve_group(&plan, &columns(), vec![a, b]).unwrap();
        assert_eq!(
            group.properties.get("area_sqm"),
            Some(&PropertyValue::Float(4.0))
        );
    }

    #[test]
    fn test_missing_known_column_resolves_null() {
        let bare = record(TileCoord::new(15, 100, 200), 0, half_rect(0.0, 1.0), &[]);

        let group = dissolve_group(&parcel_plan(), &columns(), vec![bare]).unwrap();

        assert_eq!(group.identifier, PropertyValue::Null);
        assert_eq!(group.properties.get("parcel_id"), Some(&PropertyValue::Null));
        assert_eq!(group.properties.get("area_sqm"), Some(&PropertyValue::Null));
    }

    #[test]
    fn test_point_group_dedups_exact_duplicates() {
        let mut plan = LayerPlan::new("markers", GeometryClass::Point);
        plan.identifier_column = Some("marker_id".to_string());

        let make_point = |tile: TileCoord, x: f64| {
            record(
                tile,
                0,
                Geometry::Point(point!(x: x, y: 5.0)),
                &[("marker_id", PropertyValue::Int(1))],
            )
        };
        // The same marker copied into two tiles, plus a genuinely
        // distinct position under the same identifier.
        let records = vec![
            make_point(TileCoord::new(15, 100, 200), 2.0),
            make_point(TileCoord::new(15, 101, 200), 2.0),
            make_point(TileCoord::new(15, 102, 200), 3.0),
        ];

        let group = dissolve_group(&plan, &["marker_id".to_string()], records).unwrap();

        assert_eq!(group.fragment_count, 3);
        match &group.geometry {
            Geometry::MultiPoint(mp) => assert_eq!(mp.0.len(), 2),
            other => panic!("expected multipoint, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_line_collapses_to_single_part() {
        let mut plan = LayerPlan::new("roads", GeometryClass::Line);
        plan.identifier_column = Some("road_id".to_string());

        let road = || {
            Geometry::LineString(line_string![
                (x: 0.0, y: 0.0),
                (x: 1.0, y: 1.0),
            ])
        };
        let records = vec![
            record(
                TileCoord::new(15, 100, 200),
                0,
                road(),
                &[("road_id", PropertyValue::Int(9))],
            ),
            record(
                TileCoord::new(15, 101, 200),
                0,
                road(),
                &[("road_id", PropertyValue::Int(9))],
            ),
        ];

        let group = dissolve_group(&plan, &["road_id".to_string()], records).unwrap();

        assert!(matches!(group.geometry, Geometry::LineString(_)));
        assert_eq!(group.fragment_count, 2);
    }

    #[test]
    fn test_no_identifier_column_yields_null_identifier() {
        let plan = LayerPlan::new("parcels", GeometryClass::Polygon);
        let lone = record(
            TileCoord::new(15, 100, 200),
            0,
            half_rect(0.0, 1.0),
            &[("parcel_id", PropertyValue::Int(42))],
        );

        let group = dissolve_group(&plan, &[], vec![lone]).unwrap();

        assert_eq!(group.identifier, PropertyValue::Null);
        assert!(group.properties.is_empty());
    }

    #[test]
    fn test_empty_group_is_none() {
        assert!(dissolve_group(&parcel_plan(), &columns(), Vec::new()).is_none());
    }

    #[test]
    fn test_wrong_class_records_contribute_nothing() {
        let poly = record(
            TileCoord::new(15, 100, 200),
            0,
            half_rect(0.0, 1.0),
            &[("parcel_id", PropertyValue::Int(42))],
        );
        let stray_point = record(
            TileCoord::new(15, 101, 200),
            0,
            Geometry::Point(point!(x: 0.5, y: 0.5)),
            &[("parcel_id", PropertyValue::Int(42))],
        );

        let group = dissolve_group(&parcel_plan(), &columns(), vec![poly, stray_point]).unwrap();

        assert!(matches!(group.geometry, Geometry::Polygon(_)));
        assert!((group.geometry.unsigned_area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_only_wrong_class_records_is_none() {
        let stray = record(
            TileCoord::new(15, 100, 200),
            0,
            Geometry::Point(point!(x: 0.5, y: 0.5)),
            &[("parcel_id", PropertyValue::Int(42))],
        );

        assert!(dissolve_group(&parcel_plan(), &columns(), vec![stray]).is_none());
    }
}
