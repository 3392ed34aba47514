//! Drawing line geometries into sparse grids.
//!
//! Two modes are supported. Point mode converts every vertex to a global
//! pixel of the grid and steps between them with Bresenham. Tile mode works
//! on one tile at a time: the line is optionally clipped to the tile polygon
//! first and only pixels inside the tile are written. Every stepped pixel
//! receives the full cost, so values count crossings rather than length.

pub mod bresenham;

pub use bresenham::Bresenham;

use crate::error::{HeatTileError, Result};
use crate::grid::SparseGrid;
use crate::tile_index::{self, TileTransform};
use geo::{BooleanOps, Coord, Geometry, LineString, MultiLineString, Polygon, Rect};
use rustc_hash::FxHashSet;

/// Sub-pixels per tile side used when walking between distant tiles.
const TILE_WALK_RESOLUTION: f64 = 256.0;

/// Draws a line string into `grid`, adding `cost` to every stepped pixel.
pub fn rasterize_linestring(grid: &mut SparseGrid, line: &LineString<f64>, cost: u32) {
    draw_points(grid, line, cost, |_| true);
}

/// Like [`rasterize_linestring`], but vertices in tiles rejected by
/// `include_tile` are skipped.
pub fn rasterize_linestring_filtered<F>(
    grid: &mut SparseGrid,
    line: &LineString<f64>,
    cost: u32,
    include_tile: F,
) where
    F: Fn(u32) -> bool,
{
    draw_points(grid, line, cost, include_tile);
}

/// Draws many line strings, returning how many had at least one segment.
pub fn rasterize_all<'a, I>(grid: &mut SparseGrid, lines: I, cost: u32) -> usize
where
    I: IntoIterator<Item = &'a LineString<f64>>,
{
    let mut drawn = 0;
    for line in lines {
        if line.0.len() >= 2 {
            rasterize_linestring(grid, line, cost);
            drawn += 1;
        }
    }
    drawn
}

fn draw_points<F>(grid: &mut SparseGrid, line: &LineString<f64>, cost: u32, include_tile: F)
where
    F: Fn(u32) -> bool,
{
    let mut previous: Option<(i64, i64)> = None;
    for coord in line.coords() {
        let Some(current) = to_grid_pixel(grid, *coord, &include_tile) else {
            continue;
        };
        if let Some((x0, y0)) = previous {
            for (x, y) in Bresenham::new(x0, y0, current.0, current.1) {
                grid.add_assign(x, y, cost);
            }
        }
        previous = Some(current);
    }
}

fn to_grid_pixel<F>(grid: &SparseGrid, coord: Coord<f64>, include_tile: &F) -> Option<(i64, i64)>
where
    F: Fn(u32) -> bool,
{
    if !coord.x.is_finite() || !coord.y.is_finite() {
        return None;
    }
    let (tile_id, x, y) =
        tile_index::world_to_local(grid.zoom(), coord.x, coord.y, grid.resolution());
    if !include_tile(tile_id) {
        return None;
    }
    let (origin_x, origin_y) = grid.tile_origin(tile_id);
    Some((origin_x + x as i64, origin_y + y as i64))
}

/// Draws a line string into one tile of `grid`, dropping every pixel outside
/// `[0, resolution)`. Returns whether anything was written.
pub fn rasterize_tile(grid: &mut SparseGrid, tile_id: u32, line: &LineString<f64>, cost: u32) -> bool {
    let resolution = grid.resolution() as i64;
    let transform = TileTransform::new(grid.zoom(), tile_id, grid.resolution());
    let mut written = false;
    let mut previous: Option<(i64, i64)> = None;
    for coord in line.coords() {
        let current = transform.to_pixel(coord.x, coord.y);
        if let Some((x0, y0)) = previous {
            for (x, y) in Bresenham::new(x0, y0, current.0, current.1) {
                if (0..resolution).contains(&x) && (0..resolution).contains(&y) {
                    grid.add_in_tile(tile_id, x as u32, y as u32, cost);
                    written = true;
                }
            }
        }
        previous = Some(current);
    }
    written
}

/// Clips `line` to the tile polygon and draws the pieces into that tile.
pub fn rasterize_tile_clipped(
    grid: &mut SparseGrid,
    tile_id: u32,
    line: &LineString<f64>,
    cost: u32,
) -> Result<bool> {
    let mut written = false;
    for piece in clip_to_tile(grid.zoom(), tile_id, line)? {
        written |= rasterize_tile(grid, tile_id, &piece, cost);
    }
    Ok(written)
}

/// Draws every line into every tile it may cross, clipping per tile. Lines
/// whose clip result can't be drawn are logged and skipped.
///
/// Returns the ids of the tiles that received data.
pub fn rasterize_tiled<'a, I>(grid: &mut SparseGrid, lines: I, cost: u32) -> Result<Vec<u32>>
where
    I: IntoIterator<Item = &'a LineString<f64>>,
{
    let mut touched = FxHashSet::default();
    for line in lines {
        if line.0.len() < 2 {
            continue;
        }
        for tile_id in tiles_for_linestring(line, grid.zoom()) {
            match rasterize_tile_clipped(grid, tile_id, line, cost) {
                Ok(true) => {
                    touched.insert(tile_id);
                }
                Ok(false) => {}
                Err(err) if err.is_per_feature() => {
                    log::warn!("Skipping line in tile {}: {}", tile_id, err);
                }
                Err(err) => return Err(err),
            }
        }
    }
    let mut touched: Vec<u32> = touched.into_iter().collect();
    touched.sort_unstable();
    Ok(touched)
}

/// Polygon covering a tile in geographic coordinates.
pub fn tile_polygon(zoom: i32, tile_id: u32) -> Polygon<f64> {
    let (top_left, bottom_right) = tile_index::bounding_box(zoom, tile_id);
    Rect::new(top_left, bottom_right).to_polygon()
}

/// Parts of `line` inside the tile. Single touching points are dropped.
pub fn clip_to_tile(zoom: i32, tile_id: u32, line: &LineString<f64>) -> Result<Vec<LineString<f64>>> {
    let polygon = tile_polygon(zoom, tile_id);
    let clipped = polygon.clip(&MultiLineString::new(vec![line.clone()]), false);
    collect_lines(Geometry::MultiLineString(clipped))
}

/// Flattens an intersection result into its line strings. Points are dropped;
/// any areal geometry is rejected.
pub fn collect_lines(geometry: Geometry<f64>) -> Result<Vec<LineString<f64>>> {
    let mut lines = Vec::new();
    collect_into(geometry, &mut lines)?;
    lines.retain(|line| line.0.len() >= 2);
    Ok(lines)
}

fn collect_into(geometry: Geometry<f64>, lines: &mut Vec<LineString<f64>>) -> Result<()> {
    match geometry {
        Geometry::LineString(line) => lines.push(line),
        Geometry::Line(line) => lines.push(LineString::from(vec![line.start, line.end])),
        Geometry::MultiLineString(multi) => lines.extend(multi.0),
        Geometry::GeometryCollection(collection) => {
            for geometry in collection.0 {
                collect_into(geometry, lines)?;
            }
        }
        Geometry::Point(_) | Geometry::MultiPoint(_) => {}
        other => {
            return Err(HeatTileError::UnexpectedGeometry(
                geometry_name(&other).to_string(),
            ));
        }
    }
    Ok(())
}

fn geometry_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// Tiles a line string may cross at `zoom`, in discovery order.
///
/// Always contains the tile of every vertex. When consecutive vertices sit
/// in tiles that don't touch, the tiles along the straight line between
/// them are added too. The result may include tiles the line only passes
/// close to; clipping decides what is drawn.
pub fn tiles_for_linestring(line: &LineString<f64>, zoom: i32) -> Vec<u32> {
    let mut coords = line.coords().filter(|c| c.x.is_finite() && c.y.is_finite());
    let Some(first) = coords.next() else {
        return Vec::new();
    };

    let mut previous_coord = *first;
    let mut previous_tile = tile_index::world_tile_local_id(first.x, first.y, zoom);
    let mut seen = FxHashSet::default();
    seen.insert(previous_tile);
    let mut tiles = vec![previous_tile];

    for coord in coords {
        let tile_id = tile_index::world_tile_local_id(coord.x, coord.y, zoom);
        if tile_id == previous_tile {
            previous_coord = *coord;
            continue;
        }
        if tile_index::is_direct_neighbour(zoom, tile_id, previous_tile) {
            if seen.insert(tile_id) {
                tiles.push(tile_id);
            }
        } else {
            let (x0, y0) = tile_walk_position(previous_coord, zoom);
            let (x1, y1) = tile_walk_position(*coord, zoom);
            let max = tile_index::tiles_per_axis(zoom) as i64 - 1;
            for (x, y) in Bresenham::new(x0, y0, x1, y1) {
                let tile_x = (x / TILE_WALK_RESOLUTION as i64).clamp(0, max) as u32;
                let tile_y = (y / TILE_WALK_RESOLUTION as i64).clamp(0, max) as u32;
                let between = tile_index::to_local_id(tile_x, tile_y, zoom);
                if seen.insert(between) {
                    tiles.push(between);
                }
            }
            if seen.insert(tile_id) {
                tiles.push(tile_id);
            }
        }
        previous_tile = tile_id;
        previous_coord = *coord;
    }
    tiles
}

fn tile_walk_position(coord: Coord<f64>, zoom: i32) -> (i64, i64) {
    let (x, y) = tile_index::world_to_tile_fraction(coord.x, coord.y, zoom);
    let max = tile_index::tiles_per_axis(zoom) as f64 * TILE_WALK_RESOLUTION - 1.0;
    let scale = |v: f64| (v * TILE_WALK_RESOLUTION).floor().clamp(0.0, max) as i64;
    (scale(x), scale(y))
}
