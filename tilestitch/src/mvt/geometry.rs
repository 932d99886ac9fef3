//! Geometry command-stream decoding and reprojection.
//!
//! MVT geometry is a flat stream of u32 commands in tile-local integer
//! coordinates: MoveTo and LineTo carry zigzag-encoded deltas, ClosePath
//! terminates a polygon ring. Decoding walks the stream once, then the
//! per-tile transform projects every vertex from tile space through Web
//! Mercator into WGS84 longitude/latitude.
//!
//! Ring nesting for polygons follows the winding rule: in the tile's
//! y-down coordinate system an exterior ring has positive signed area,
//! an interior ring negative. The projection flips the y axis, which
//! would leave exteriors clockwise in lon/lat, so polygon rings are
//! reversed during projection to keep exteriors counter-clockwise.

use crate::coord::TileCoord;
use crate::mvt::wire::GeomType;
use geo_types::{
    Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon,
};
use std::f64::consts::PI;
use thiserror::Error;

const MOVE_TO: u32 = 1;
const LINE_TO: u32 = 2;
const CLOSE_PATH: u32 = 7;

/// Structural defects in a geometry command stream.
///
/// Any of these condemns the whole tile: a stream that cannot be walked
/// is corruption, not data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("geometry stream truncated mid-command")]
    Truncated,
    #[error("unknown geometry command {command}")]
    UnknownCommand { command: u32 },
    #[error("LineTo before any MoveTo")]
    LineBeforeMove,
}

/// Projects tile-local integer coordinates to WGS84 degrees.
///
/// All the zoom- and extent-dependent arithmetic is folded into three
/// constants at construction, so per-vertex work is two multiply-adds
/// plus the Mercator latitude inverse.
#[derive(Debug, Clone, Copy)]
pub struct TileTransform {
    origin_x: f64,
    origin_y: f64,
    inv_scale: f64,
}

impl TileTransform {
    pub fn new(coord: TileCoord, extent: u32) -> Self {
        let n = (1u64 << coord.zoom) as f64;
        Self {
            origin_x: coord.x as f64 / n,
            origin_y: coord.y as f64 / n,
            inv_scale: 1.0 / (extent as f64 * n),
        }
    }

    /// Projects one vertex to (lon, lat) degrees.
    #[inline]
    pub fn apply(&self, px: i64, py: i64) -> Coord<f64> {
        let merc_x = self.origin_x + px as f64 * self.inv_scale;
        let merc_y = self.origin_y + py as f64 * self.inv_scale;
        Coord {
            x: merc_x * 360.0 - 180.0,
            y: (PI * (1.0 - 2.0 * merc_y)).sinh().atan().to_degrees(),
        }
    }
}

#[inline]
fn zigzag(value: u32) -> i64 {
    (((value >> 1) as i32) ^ -((value & 1) as i32)) as i64
}

fn read_delta(stream: &[u32], cursor: &mut usize) -> Result<(i64, i64), GeometryError> {
    let dx = *stream.get(*cursor).ok_or(GeometryError::Truncated)?;
    let dy = *stream.get(*cursor + 1).ok_or(GeometryError::Truncated)?;
    *cursor += 2;
    Ok((zigzag(dx), zigzag(dy)))
}

/// Walks the command stream into paths of absolute tile coordinates.
///
/// Each MoveTo begins a new path; for polygons the paths are rings.
/// ClosePath is a terminator only, ring closure happens during geometry
/// construction.
fn decode_paths(stream: &[u32]) -> Result<Vec<Vec<(i64, i64)>>, GeometryError> {
    let mut paths: Vec<Vec<(i64, i64)>> = Vec::new();
    let mut path: Vec<(i64, i64)> = Vec::new();
    let mut cursor = 0usize;
    let (mut x, mut y) = (0i64, 0i64);

    while cursor < stream.len() {
        let command = stream[cursor];
        cursor += 1;
        let id = command & 0x7;
        let count = command >> 3;

        match id {
            MOVE_TO => {
                for _ in 0..count {
                    let (dx, dy) = read_delta(stream, &mut cursor)?;
                    x += dx;
                    y += dy;
                    if !path.is_empty() {
                        paths.push(std::mem::take(&mut path));
                    }
                    path.push((x, y));
                }
            }
            LINE_TO => {
                if path.is_empty() {
                    return Err(GeometryError::LineBeforeMove);
                }
                for _ in 0..count {
                    let (dx, dy) = read_delta(stream, &mut cursor)?;
                    x += dx;
                    y += dy;
                    path.push((x, y));
                }
            }
            CLOSE_PATH => {}
            other => return Err(GeometryError::UnknownCommand { command: other }),
        }
    }

    if !path.is_empty() {
        paths.push(path);
    }
    Ok(paths)
}

/// Shoelace signed area in tile space. Positive means exterior ring
/// under the y-down winding convention.
fn signed_area(ring: &[(i64, i64)]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..ring.len() {
        let (x1, y1) = ring[i];
        let (x2, y2) = ring[(i + 1) % ring.len()];
        sum += x1 as f64 * y2 as f64 - x2 as f64 * y1 as f64;
    }
    sum / 2.0
}

fn project_ring(ring: &[(i64, i64)], transform: &TileTransform) -> LineString<f64> {
    LineString::new(
        ring.iter()
            .map(|&(px, py)| transform.apply(px, py))
            .collect(),
    )
}

/// Projects a polygon ring with its vertex order reversed, undoing the
/// orientation flip the y-axis inversion introduces.
fn project_ring_reversed(ring: &[(i64, i64)], transform: &TileTransform) -> LineString<f64> {
    LineString::new(
        ring.iter()
            .rev()
            .map(|&(px, py)| transform.apply(px, py))
            .collect(),
    )
}

/// Decodes one feature's command stream into a projected geometry.
///
/// Returns `Ok(None)` when the stream holds nothing usable (empty, or
/// only degenerate paths). Structural defects are errors.
pub fn decode_geometry(
    geom_type: GeomType,
    stream: &[u32],
    transform: &TileTransform,
) -> Result<Option<Geometry<f64>>, GeometryError> {
    let paths = decode_paths(stream)?;
    if paths.is_empty() {
        return Ok(None);
    }

    let geometry = match geom_type {
        GeomType::Unknown => None,
        GeomType::Point => {
            let points: Vec<Point<f64>> = paths
                .iter()
                .flat_map(|path| path.iter())
                .map(|&(px, py)| Point::from(transform.apply(px, py)))
                .collect();
            match points.len() {
                0 => None,
                1 => Some(Geometry::Point(points.into_iter().next().unwrap())),
                _ => Some(Geometry::MultiPoint(MultiPoint::new(points))),
            }
        }
        GeomType::LineString => {
            let mut lines: Vec<LineString<f64>> = paths
                .iter()
                .filter(|path| path.len() >= 2)
                .map(|path| project_ring(path, transform))
                .collect();
            match lines.len() {
                0 => None,
                1 => Some(Geometry::LineString(lines.remove(0))),
                _ => Some(Geometry::MultiLineString(MultiLineString::new(lines))),
            }
        }
        GeomType::Polygon => {
            let mut polygons: Vec<Polygon<f64>> = Vec::new();
            let mut current: Option<(LineString<f64>, Vec<LineString<f64>>)> = None;

            for ring in &paths {
                if ring.len() < 3 {
                    continue;
                }
                let area = signed_area(ring);
                if area == 0.0 {
                    continue;
                }
                let projected = project_ring_reversed(ring, transform);
                if area > 0.0 {
                    if let Some((exterior, interiors)) = current.take() {
                        polygons.push(Polygon::new(exterior, interiors));
                    }
                    current = Some((projected, Vec::new()));
                } else if let Some((_, ref mut interiors)) = current {
                    interiors.push(projected);
                }
                // An interior ring before any exterior has no home; the
                // winding rule says skip it.
            }
            if let Some((exterior, interiors)) = current.take() {
                polygons.push(Polygon::new(exterior, interiors));
            }

            match polygons.len() {
                0 => None,
                1 => Some(Geometry::Polygon(polygons.remove(0))),
                _ => Some(Geometry::MultiPolygon(MultiPolygon::new(polygons))),
            }
        }
    };

    Ok(geometry)
}
