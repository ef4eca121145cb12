use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One slippy-map tile at a fixed zoom level.
///
/// `x` and `y` are always within `[0, 2^zoom)`; the conversion from
/// coordinates clamps, so no wraparound or negative indices can occur.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    /// Filesystem-safe form used for fragment file names.
    pub fn slug(&self) -> String {
        format!("{}_{}_{}", self.zoom, self.x, self.y)
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        let mut parts = slug.split('_');
        let zoom = parts.next()?.parse().ok()?;
        let x = parts.next()?.parse().ok()?;
        let y = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { zoom, x, y })
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

// Standard Web Mercator tile indices for a point.
// https://wiki.openstreetmap.org/wiki/Slippy_map_tilenames#Implementations
fn tile_indices(zoom: u8, lon: f64, lat: f64) -> (u32, u32) {
    let n = 2f64.powi(zoom as i32);
    let max_index = n - 1.0;
    let x = ((lon + 180.0) / 360.0 * n).floor().clamp(0.0, max_index);
    let y = ((1.0 - lat.to_radians().tan().asinh() / std::f64::consts::PI) / 2.0 * n)
        .floor()
        .clamp(0.0, max_index);
    (x as u32, y as u32)
}

/// All tiles at `zoom` whose footprint intersects the bounding box.
///
/// Accepts degenerate point-like boxes. A box with `west > east` is taken to
/// cross the antimeridian and is split into two boxes at ±180 before
/// coverage is computed.
pub fn tiles_for_bounds(west: f64, south: f64, east: f64, north: f64, zoom: u8) -> HashSet<TileKey> {
    if west > east {
        let mut keys = tiles_for_bounds(west, south, 180.0, north, zoom);
        keys.extend(tiles_for_bounds(-180.0, south, east, north, zoom));
        return keys;
    }

    let (south, north) = if south <= north {
        (south, north)
    } else {
        (north, south)
    };

    // Tile y grows southward, so the north edge gives the smaller index.
    let (min_x, min_y) = tile_indices(zoom, west, north);
    let (max_x, max_y) = tile_indices(zoom, east, south);

    let mut keys = HashSet::new();
    for x in min_x..=max_x {
        for y in min_y.min(max_y)..=min_y.max(max_y) {
            keys.insert(TileKey { zoom, x, y });
        }
    }
    keys
}
