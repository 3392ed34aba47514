//! Tile pyramid math.
//!
//! Maps between `(x, y, zoom)` tiles and the dense per-zoom local id used to
//! address tiles in grids and on disk, plus parent/child/neighbour geometry
//! and the slippy-map (Web Mercator) projection used to place tiles on the
//! globe. Everything here is pure.
//!
//! The local id is row-major, `id = y * 2^zoom + x`. On-disk block addressing
//! depends on this encoding, so it must not change.

use crate::TileCoord;
use geo::Coord;
use std::f64::consts::PI;

/// Largest zoom whose local ids fit in a `u32`.
pub const MAX_ZOOM: i32 = 16;

/// Tiles along one axis at `zoom`.
#[inline]
pub fn tiles_per_axis(zoom: i32) -> u64 {
    heattile_types::coord::tiles_per_axis(zoom)
}

/// Total number of tiles at `zoom`, `4^zoom`.
#[inline]
pub fn tile_count(zoom: i32) -> u64 {
    let n = tiles_per_axis(zoom);
    n * n
}

/// Encodes a tile as its local id at `zoom`.
#[inline]
pub fn to_local_id(x: u32, y: u32, zoom: i32) -> u32 {
    (y as u64 * tiles_per_axis(zoom) + x as u64) as u32
}

/// Local id of a tile coordinate.
#[inline]
pub fn local_id_of(tile: TileCoord) -> u32 {
    to_local_id(tile.x, tile.y, tile.zoom)
}

/// Decodes a local id at `zoom` back into `(x, y)`.
#[inline]
pub fn to_tile(zoom: i32, id: u32) -> (u32, u32) {
    let n = tiles_per_axis(zoom);
    let id = id as u64;
    ((id % n) as u32, (id / n) as u32)
}

/// Decodes a local id into a full tile coordinate.
#[inline]
pub fn tile_coord(zoom: i32, id: u32) -> TileCoord {
    let (x, y) = to_tile(zoom, id);
    TileCoord::new(x, y, zoom)
}

/// Returns the ancestor of `tile` at `target_zoom`.
///
/// # Panics
///
/// Panics if `target_zoom` is finer than the tile's zoom.
pub fn parent_tile_for(tile: TileCoord, target_zoom: i32) -> TileCoord {
    assert!(
        target_zoom <= tile.zoom,
        "parent zoom {} is finer than tile zoom {}",
        target_zoom,
        tile.zoom
    );
    let shift = (tile.zoom - target_zoom) as u32;
    TileCoord::new(tile.x >> shift, tile.y >> shift, target_zoom)
}

/// Iterates over all descendants of `tile` at `target_zoom`.
///
/// # Panics
///
/// Panics if `target_zoom` is coarser than the tile's zoom.
pub fn sub_tiles_for(tile: TileCoord, target_zoom: i32) -> SubTiles {
    assert!(
        target_zoom >= tile.zoom,
        "sub tile zoom {} is coarser than tile zoom {}",
        target_zoom,
        tile.zoom
    );
    let factor = 1u32 << (target_zoom - tile.zoom);
    SubTiles {
        zoom: target_zoom,
        x_start: tile.x * factor,
        y_start: tile.y * factor,
        factor,
        next: 0,
    }
}

/// Descendant tiles in the rectangle `[x*f, (x+1)*f) × [y*f, (y+1)*f)`, row by row.
#[derive(Debug, Clone)]
pub struct SubTiles {
    zoom: i32,
    x_start: u32,
    y_start: u32,
    factor: u32,
    next: u64,
}

impl Iterator for SubTiles {
    type Item = TileCoord;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.factor as u64 * self.factor as u64;
        if self.next >= total {
            return None;
        }
        let dx = (self.next % self.factor as u64) as u32;
        let dy = (self.next / self.factor as u64) as u32;
        self.next += 1;
        Some(TileCoord::new(self.x_start + dx, self.y_start + dy, self.zoom))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let total = self.factor as u64 * self.factor as u64;
        let remaining = (total - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SubTiles {}

/// True when the two tiles touch, including diagonally (8-connectivity).
pub fn is_direct_neighbour(zoom: i32, a: u32, b: u32) -> bool {
    let (ax, ay) = to_tile(zoom, a);
    let (bx, by) = to_tile(zoom, b);
    ax.abs_diff(bx) <= 1 && ay.abs_diff(by) <= 1
}

/// Whether a tile at `coarse` resolution can be summed from its four children
/// at `fine` resolution. The coarse resolution must divide `2 * fine` and,
/// unless it is a single pixel, split evenly into quadrants.
pub fn can_derive_resolution(fine: u32, coarse: u32) -> bool {
    coarse != 0 && (fine * 2) % coarse == 0 && (coarse == 1 || coarse % 2 == 0)
}

fn tile_x_to_lon(x: f64, n: f64) -> f64 {
    x / n * 360.0 - 180.0
}

fn tile_y_to_lat(y: f64, n: f64) -> f64 {
    (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees()
}

/// Top-left and bottom-right corners of a tile as `(longitude, latitude)`.
pub fn bounding_box(zoom: i32, id: u32) -> (Coord<f64>, Coord<f64>) {
    let (x, y) = to_tile(zoom, id);
    let n = tiles_per_axis(zoom) as f64;
    let top_left = Coord {
        x: tile_x_to_lon(x as f64, n),
        y: tile_y_to_lat(y as f64, n),
    };
    let bottom_right = Coord {
        x: tile_x_to_lon(x as f64 + 1.0, n),
        y: tile_y_to_lat(y as f64 + 1.0, n),
    };
    (top_left, bottom_right)
}

/// Fractional tile position of a geographic coordinate at `zoom`.
pub fn world_to_tile_fraction(lon: f64, lat: f64, zoom: i32) -> (f64, f64) {
    let n = tiles_per_axis(zoom) as f64;
    let x = (lon + 180.0) / 360.0 * n;
    let lat_rad = lat.to_radians();
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n;
    (x, y)
}

/// Tile containing a geographic coordinate, clamped into the pyramid.
pub fn world_to_tile(lon: f64, lat: f64, zoom: i32) -> (u32, u32) {
    let (x, y) = world_to_tile_fraction(lon, lat, zoom);
    let max = (tiles_per_axis(zoom) - 1) as f64;
    let clamp = |v: f64| {
        if v.is_nan() {
            0.0
        } else {
            v.floor().clamp(0.0, max)
        }
    };
    (clamp(x) as u32, clamp(y) as u32)
}

/// Local id of the tile containing a geographic coordinate.
pub fn world_tile_local_id(lon: f64, lat: f64, zoom: i32) -> u32 {
    let (x, y) = world_to_tile(lon, lat, zoom);
    to_local_id(x, y, zoom)
}

/// Locates a geographic coordinate as `(tile_id, x_in_tile, y_in_tile)` for
/// tiles of `resolution` pixels per side.
pub fn world_to_local(zoom: i32, lon: f64, lat: f64, resolution: u32) -> (u32, u32, u32) {
    let tile_id = world_tile_local_id(lon, lat, zoom);
    let transform = TileTransform::new(zoom, tile_id, resolution);
    let (x, y) = transform.to_pixel(lon, lat);
    let max = resolution as i64 - 1;
    (tile_id, x.clamp(0, max) as u32, y.clamp(0, max) as u32)
}

/// Linear mapping between a tile's geographic extent and its pixel grid.
///
/// Pixel `(0, 0)` is the top-left corner of the tile; `x` grows east and `y`
/// grows south.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileTransform {
    top: f64,
    left: f64,
    latitude_step: f64,
    longitude_step: f64,
}

impl TileTransform {
    pub fn new(zoom: i32, tile_id: u32, resolution: u32) -> Self {
        let (top_left, bottom_right) = bounding_box(zoom, tile_id);
        Self {
            top: top_left.y,
            left: top_left.x,
            latitude_step: (top_left.y - bottom_right.y) / resolution as f64,
            longitude_step: (bottom_right.x - top_left.x) / resolution as f64,
        }
    }

    pub fn for_tile(tile: TileCoord, resolution: u32) -> Self {
        Self::new(tile.zoom, local_id_of(tile), resolution)
    }

    /// Pixel containing the coordinate, relative to this tile. May fall
    /// outside `[0, resolution)` for coordinates outside the tile.
    pub fn to_pixel(&self, lon: f64, lat: f64) -> (i64, i64) {
        let x = ((lon - self.left) / self.longitude_step).floor();
        let y = ((self.top - lat) / self.latitude_step).floor();
        (x as i64, y as i64)
    }

    /// Geographic position of the top-left corner of a pixel.
    pub fn transform_to(&self, x: i64, y: i64) -> (f64, f64) {
        (
            self.left + self.longitude_step * x as f64,
            self.top - self.latitude_step * y as f64,
        )
    }

    pub fn top(&self) -> f64 {
        self.top
    }

    pub fn left(&self) -> f64 {
        self.left
    }
}
