//! Geometry repair between decode and stitch.
//!
//! Tile clipping and integer quantization leave artifacts the set
//! operations downstream cannot tolerate: near-duplicate vertices from
//! coordinate rounding, and self-intersecting rings from aggressive
//! simplification at low zooms. [`repair_batch`] runs every record
//! through a snap pass that collapses vertices closer than the
//! configured tolerance, then rebuilds polygonal shapes with a
//! self-union, the planar-sweep equivalent of a zero-distance buffer.
//! Rings that cross themselves come back as separate valid parts.
//!
//! Records that end up with no geometry are dropped. Nothing here is
//! ever fatal: each record is repaired in isolation, and the worst case
//! for any single record is its removal from the batch.

use crate::feature::{FeatureRecord, LayerBatch};
use geo::BooleanOps;
use geo_types::{Coord, Geometry, LineString, MultiLineString, MultiPolygon, Polygon};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// Result of repairing one batch.
#[derive(Debug)]
pub struct RepairOutcome {
    /// Surviving records, in input order
    pub batch: LayerBatch,
    /// Records whose geometry was altered by snapping or a ring rebuild
    pub repaired: u64,
    /// Records removed: empty after repair, or the repair itself failed
    pub dropped: u64,
}

/// What the repair of a single geometry concluded.
enum Repair {
    /// Geometry was already clean; the original is kept untouched
    Unchanged,
    /// Geometry was altered and the record should carry this one instead
    Rebuilt(Geometry<f64>),
    /// Nothing usable remained
    Empty,
}

/// Repairs every record in a batch, dropping those beyond saving.
///
/// `tolerance` is the snap distance in degrees. Consecutive vertices
/// closer than this collapse into one; zero still removes exact
/// duplicates. Polygonal records are additionally rebuilt through a
/// self-union so self-intersections cannot reach the stitcher.
pub fn repair_batch(batch: LayerBatch, tolerance: f64) -> RepairOutcome {
    let layer = batch.layer;
    let mut records: Vec<FeatureRecord> = Vec::with_capacity(batch.records.len());
    let mut repaired = 0u64;
    let mut dropped = 0u64;

    for mut record in batch.records {
        // The union sweep aborts on inputs it cannot order. Contain it
        // so one degenerate shape costs one record, not the layer.
        let outcome =
            catch_unwind(AssertUnwindSafe(|| repair_geometry(&record.geometry, tolerance)));

        match outcome {
            Ok(Repair::Unchanged) => records.push(record),
            Ok(Repair::Rebuilt(geometry)) => {
                repaired += 1;
                record.geometry = geometry;
                records.push(record);
            }
            Ok(Repair::Empty) => {
                dropped += 1;
                warn!(
                    layer = %layer,
                    tile = %record.tile,
                    sequence = record.sequence,
                    "geometry empty after repair, dropping record"
                );
            }
            Err(_) => {
                dropped += 1;
                warn!(
                    layer = %layer,
                    tile = %record.tile,
                    sequence = record.sequence,
                    "geometry repair aborted, dropping record"
                );
            }
        }
    }

    RepairOutcome {
        batch: LayerBatch { layer, records },
        repaired,
        dropped,
    }
}

fn repair_geometry(geometry: &Geometry<f64>, tolerance: f64) -> Repair {
    match geometry {
        // Points carry no topology to break.
        Geometry::Point(_) | Geometry::MultiPoint(_) => Repair::Unchanged,

        Geometry::LineString(line) => {
            let snapped = snap_run(&line.0, tolerance);
            if snapped.len() < 2 {
                return Repair::Empty;
            }
            if snapped.len() == line.0.len() {
                return Repair::Unchanged;
            }
            Repair::Rebuilt(Geometry::LineString(LineString::from(snapped)))
        }

        Geometry::MultiLineString(lines) => {
            let mut parts = Vec::with_capacity(lines.0.len());
            let mut changed = false;
            for line in &lines.0 {
                let snapped = snap_run(&line.0, tolerance);
                if snapped.len() < 2 {
                    changed = true;
                    continue;
                }
                if snapped.len() != line.0.len() {
                    changed = true;
                }
                parts.push(LineString::from(snapped));
            }
            if parts.is_empty() {
                return Repair::Empty;
            }
            if !changed {
                return Repair::Unchanged;
            }
            Repair::Rebuilt(Geometry::MultiLineString(MultiLineString::new(parts)))
        }

        Geometry::Polygon(polygon) => {
            let Some((snapped, snap_changed)) = snap_polygon(polygon, tolerance) else {
                return Repair::Empty;
            };
            let subject = MultiPolygon::new(vec![snapped]);
            let rebuilt = self_union(&subject);
            if rebuilt.0.is_empty() {
                return Repair::Empty;
            }
            if signature(&rebuilt) == signature(&subject) {
                // Structurally a no-op. Prefer the pre-union coordinates,
                // which the sweep's integer grid may have perturbed.
                if snap_changed {
                    let mut parts = subject.0;
                    return Repair::Rebuilt(Geometry::Polygon(parts.remove(0)));
                }
                return Repair::Unchanged;
            }
            Repair::Rebuilt(unwrap_polygonal(rebuilt))
        }

        Geometry::MultiPolygon(shape) => {
            let mut parts = Vec::with_capacity(shape.0.len());
            let mut snap_changed = false;
            for polygon in &shape.0 {
                match snap_polygon(polygon, tolerance) {
                    Some((snapped, changed)) => {
                        snap_changed |= changed;
                        parts.push(snapped);
                    }
                    None => snap_changed = true,
                }
            }
            if parts.is_empty() {
                return Repair::Empty;
            }
            let subject = MultiPolygon::new(parts);
            let rebuilt = self_union(&subject);
            if rebuilt.0.is_empty() {
                return Repair::Empty;
            }
            if signature(&rebuilt) == signature(&subject) {
                if snap_changed {
                    return Repair::Rebuilt(Geometry::MultiPolygon(subject));
                }
                return Repair::Unchanged;
            }
            Repair::Rebuilt(Geometry::MultiPolygon(rebuilt))
        }

        // The decoder only emits the six shapes above.
        _ => Repair::Unchanged,
    }
}

/// Unions a polygonal shape with itself.
///
/// The overlay sweep re-derives the filled region from the ring
/// arrangement, so self-intersections, duplicate rings and zero-width
/// spikes come out resolved into plain valid parts.
fn self_union(shape: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    shape.union(shape)
}

/// A single-part result stays a plain polygon; anything else is multi.
fn unwrap_polygonal(mut shape: MultiPolygon<f64>) -> Geometry<f64> {
    if shape.0.len() == 1 {
        Geometry::Polygon(shape.0.remove(0))
    } else {
        Geometry::MultiPolygon(shape)
    }
}

/// Part, ring and vertex totals, used to tell a structural rebuild from
/// a mere start-vertex rotation in the union output.
fn signature(shape: &MultiPolygon<f64>) -> (usize, usize, usize) {
    let mut rings = 0usize;
    let mut vertices = 0usize;
    for polygon in &shape.0 {
        rings += 1 + polygon.interiors().len();
        vertices += ring_vertices(polygon.exterior());
        for interior in polygon.interiors() {
            vertices += ring_vertices(interior);
        }
    }
    (shape.0.len(), rings, vertices)
}

/// Distinct vertices in a ring, ignoring the closing repeat.
fn ring_vertices(ring: &LineString<f64>) -> usize {
    match ring.0.split_last() {
        Some((last, rest)) if !rest.is_empty() && *last == rest[0] => rest.len(),
        _ => ring.0.len(),
    }
}

/// Snaps all rings of a polygon. Collapsed holes disappear; a collapsed
/// exterior takes the whole polygon with it.
fn snap_polygon(polygon: &Polygon<f64>, tolerance: f64) -> Option<(Polygon<f64>, bool)> {
    let mut changed = false;

    let exterior = match snap_ring(polygon.exterior(), tolerance) {
        Some((ring, ring_changed)) => {
            changed |= ring_changed;
            ring
        }
        None => return None,
    };

    let mut interiors = Vec::with_capacity(polygon.interiors().len());
    for ring in polygon.interiors() {
        match snap_ring(ring, tolerance) {
            Some((ring, ring_changed)) => {
                changed |= ring_changed;
                interiors.push(ring);
            }
            None => changed = true,
        }
    }

    Some((Polygon::new(exterior, interiors), changed))
}

/// Snaps a closed ring, dropping it entirely when fewer than three
/// distinct vertices remain.
fn snap_ring(ring: &LineString<f64>, tolerance: f64) -> Option<(LineString<f64>, bool)> {
    // Rings arrive closed; work on the open run of vertices.
    let open = match ring.0.split_last() {
        Some((last, rest)) if !rest.is_empty() && *last == rest[0] => rest,
        _ => &ring.0[..],
    };

    let mut kept = snap_run(open, tolerance);
    // The tail of the run can land on top of the ring start.
    while kept.len() > 1 && close_enough(kept[kept.len() - 1], kept[0], tolerance) {
        kept.pop();
    }
    if kept.len() < 3 {
        return None;
    }

    let changed = kept.len() != open.len();
    // Polygon construction re-closes the ring.
    Some((LineString::from(kept), changed))
}

/// Removes each vertex that sits within the snap distance of the last
/// kept one.
fn snap_run(coords: &[Coord<f64>], tolerance: f64) -> Vec<Coord<f64>> {
    let mut kept: Vec<Coord<f64>> = Vec::with_capacity(coords.len());
    for &coord in coords {
        match kept.last() {
            Some(&prev) if close_enough(prev, coord, tolerance) => {}
            _ => kept.push(coord),
        }
    }
    kept
}

/// Vertices within the snap distance collapse. A zero tolerance still
/// merges exact duplicates.
#[inline]
fn close_enough(a: Coord<f64>, b: Coord<f64>, tolerance: f64) -> bool {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy <= tolerance * tolerance
}
