//! Tile coordinate planner
//!
//! Converts an area description and a zoom level into the deduplicated list
//! of tile coordinates the fetcher must acquire. Pure computation: no I/O,
//! no clock, no configuration lookups. Invalid, empty or inverted bounds
//! produce an empty plan rather than an error so callers can treat "nothing
//! to do" uniformly.

use crate::coord::{to_tile_coords, TileCoord, MAX_ZOOM};
use std::collections::HashSet;

/// Describes the ground area a run should cover.
///
/// Three forms, matching how coverage is usually specified upstream: a
/// geographic bounding box, a precomputed tile-index box for a named
/// region, or a grid of tiles around a center point.
#[derive(Debug, Clone, PartialEq)]
pub enum AreaDescriptor {
    /// Geographic bounding box in WGS84 degrees.
    Bbox {
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    },
    /// Tile-index bounds at the target zoom, inclusive on both ends.
    TileBounds {
        min_x: u32,
        min_y: u32,
        max_x: u32,
        max_y: u32,
    },
    /// A width × height tile grid centered on a geographic point.
    CenterGrid {
        lat: f64,
        lon: f64,
        width: u32,
        height: u32,
    },
}

/// Computes the tile coordinates covering `area` at `zoom`.
///
/// # Arguments
///
/// * `area` - The area to cover
/// * `zoom` - Target zoom level (0 to 22)
///
/// # Returns
///
/// Deduplicated tile coordinates in row-major order (north to south, west
/// to east). Empty when the descriptor is invalid, empty or inverted.
pub fn plan(area: &AreaDescriptor, zoom: u8) -> Vec<TileCoord> {
    if zoom > MAX_ZOOM {
        return Vec::new();
    }

    match *area {
        AreaDescriptor::Bbox {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        } => {
            // NaN fails both comparisons, so this also rejects non-finite input
            if !(min_lon <= max_lon) || !(min_lat <= max_lat) {
                return Vec::new();
            }

            // Northwest corner gives the smallest x and y, southeast the largest
            let nw = to_tile_coords(max_lat, min_lon, zoom);
            let se = to_tile_coords(min_lat, max_lon, zoom);
            match (nw, se) {
                (Ok(nw), Ok(se)) => grid(zoom, nw.x, nw.y, se.x, se.y),
                _ => Vec::new(),
            }
        }
        AreaDescriptor::TileBounds {
            min_x,
            min_y,
            max_x,
            max_y,
        } => {
            let max_index = (1u32 << zoom) - 1;
            if min_x > max_x || min_y > max_y || min_x > max_index || min_y > max_index {
                return Vec::new();
            }
            grid(
                zoom,
                min_x,
                min_y,
                max_x.min(max_index),
                max_y.min(max_index),
            )
        }
        AreaDescriptor::CenterGrid {
            lat,
            lon,
            width,
            height,
        } => {
            if width == 0 || height == 0 {
                return Vec::new();
            }
            let center = match to_tile_coords(lat, lon, zoom) {
                Ok(tile) => tile,
                Err(_) => return Vec::new(),
            };

            let max_index = ((1u32 << zoom) - 1) as i64;
            // Even spans put the extra tile east/south of center
            let min_x = (center.x as i64 - ((width as i64 - 1) / 2)).clamp(0, max_index);
            let max_x = (center.x as i64 + (width as i64 / 2)).clamp(0, max_index);
            let min_y = (center.y as i64 - ((height as i64 - 1) / 2)).clamp(0, max_index);
            let max_y = (center.y as i64 + (height as i64 / 2)).clamp(0, max_index);

            grid(zoom, min_x as u32, min_y as u32, max_x as u32, max_y as u32)
        }
    }
}

/// Expands an inclusive tile-index box into row-major coordinates.
fn grid(zoom: u8, min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Vec<TileCoord> {
    let mut seen = HashSet::new();
    let mut tiles = Vec::with_capacity(
        ((max_x - min_x + 1) as usize).saturating_mul((max_y - min_y + 1) as usize),
    );
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let tile = TileCoord { zoom, x, y };
            if seen.insert(tile) {
                tiles.push(tile);
            }
        }
    }
    tiles
}
