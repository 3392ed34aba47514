//! Sparse accumulation grid for one zoom level.
//!
//! A [`SparseGrid`] covers the whole raster of a zoom level, `2^zoom *
//! resolution` pixels per side, but only materializes the tiles that received
//! a non-zero value. Tiles are `resolution²` counters appended to one arena
//! and addressed by slot; the tile index maps local tile ids to slots.
//!
//! Grids are the "diffs" of the engine: rasterization writes into one, the
//! applier merges it into a [`HeatMap`](crate::HeatMap) and cascades it to
//! coarser zooms through a memoized companion grid.

use crate::TileCoord;
use crate::tile_index::{self, tiles_per_axis};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

const NO_TILE: u32 = u32::MAX;

#[derive(Debug, Clone)]
pub struct SparseGrid {
    zoom: i32,
    resolution: u32,
    tiles: FxHashMap<u32, u32>,
    data: Vec<u32>,
    next: Option<Box<SparseGrid>>,
}

impl SparseGrid {
    /// # Panics
    ///
    /// Panics if `resolution` is zero or `zoom` is outside `[0, MAX_ZOOM]`.
    pub fn new(zoom: i32, resolution: u32) -> Self {
        assert!(resolution > 0, "Grid resolution must be greater than zero");
        assert!(
            (0..=tile_index::MAX_ZOOM).contains(&zoom),
            "Grid zoom {} outside [0, {}]",
            zoom,
            tile_index::MAX_ZOOM
        );
        Self {
            zoom,
            resolution,
            tiles: FxHashMap::default(),
            data: Vec::new(),
            next: None,
        }
    }

    pub fn zoom(&self) -> i32 {
        self.zoom
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Pixels along one axis of the whole zoom level.
    pub fn size(&self) -> u64 {
        tiles_per_axis(self.zoom) * self.resolution as u64
    }

    /// Number of materialized tiles.
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    fn tile_cells(&self) -> usize {
        self.resolution as usize * self.resolution as usize
    }

    /// Splits a global pixel into `(tile_id, offset_in_tile)`. Pixels outside
    /// the raster, negative ones included, yield `None`.
    fn locate(&self, x: i64, y: i64) -> Option<(u32, usize)> {
        let size = self.size() as i64;
        if x < 0 || y < 0 || x >= size || y >= size {
            return None;
        }
        let resolution = self.resolution as i64;
        let tile_id = tile_index::to_local_id(
            (x / resolution) as u32,
            (y / resolution) as u32,
            self.zoom,
        );
        let offset = (y % resolution) * resolution + (x % resolution);
        Some((tile_id, offset as usize))
    }

    fn slot_start(&self, tile_id: u32) -> Option<usize> {
        match self.tiles.get(&tile_id).copied().unwrap_or(NO_TILE) {
            NO_TILE => None,
            slot => Some(slot as usize * self.tile_cells()),
        }
    }

    fn allocate(&mut self, tile_id: u32) -> usize {
        if let Some(start) = self.slot_start(tile_id) {
            return start;
        }
        let cells = self.tile_cells();
        let slot = (self.data.len() / cells) as u32;
        self.data.resize(self.data.len() + cells, 0);
        self.tiles.insert(tile_id, slot);
        slot as usize * cells
    }

    /// Value at a global pixel; zero outside materialized tiles.
    pub fn get(&self, x: i64, y: i64) -> u32 {
        self.locate(x, y)
            .and_then(|(tile_id, offset)| {
                self.slot_start(tile_id).map(|start| self.data[start + offset])
            })
            .unwrap_or(0)
    }

    /// Writes a global pixel. Zero writes never materialize a tile and pixels
    /// outside the raster are dropped.
    pub fn set(&mut self, x: i64, y: i64, value: u32) {
        let Some((tile_id, offset)) = self.locate(x, y) else {
            return;
        };
        let start = match self.slot_start(tile_id) {
            Some(start) => start,
            None if value == 0 => return,
            None => self.allocate(tile_id),
        };
        self.data[start + offset] = value;
    }

    /// Adds to a global pixel, saturating at `u32::MAX`.
    pub fn add_assign(&mut self, x: i64, y: i64, delta: u32) {
        if delta == 0 {
            return;
        }
        let current = self.get(x, y);
        self.set(x, y, current.saturating_add(delta));
    }

    /// Value of a pixel addressed relative to a tile.
    pub fn get_in_tile(&self, tile_id: u32, x: u32, y: u32) -> u32 {
        let (origin_x, origin_y) = self.tile_origin(tile_id);
        self.get(origin_x + x as i64, origin_y + y as i64)
    }

    /// Adds to a pixel addressed relative to a tile.
    pub fn add_in_tile(&mut self, tile_id: u32, x: u32, y: u32, delta: u32) {
        let (origin_x, origin_y) = self.tile_origin(tile_id);
        self.add_assign(origin_x + x as i64, origin_y + y as i64, delta);
    }

    /// Global pixel of a tile's top-left corner.
    pub fn tile_origin(&self, tile_id: u32) -> (i64, i64) {
        let (x, y) = tile_index::to_tile(self.zoom, tile_id);
        let resolution = self.resolution as i64;
        (x as i64 * resolution, y as i64 * resolution)
    }

    /// Saturating sum of the `step × step` square whose top-left pixel is
    /// `(x, y)`. Squares crossing a tile edge are split along it.
    pub fn sum_range(&self, x: i64, y: i64, step: u32) -> u32 {
        self.sum_rect(x, y, step as i64, step as i64)
    }

    fn sum_rect(&self, x: i64, y: i64, width: i64, height: i64) -> u32 {
        if width <= 0 || height <= 0 {
            return 0;
        }
        let resolution = self.resolution as i64;
        let edge_x = (x.div_euclid(resolution) + 1) * resolution;
        let edge_y = (y.div_euclid(resolution) + 1) * resolution;
        if x + width > edge_x || y + height > edge_y {
            let split_x = (edge_x - x).min(width);
            let split_y = (edge_y - y).min(height);
            return self
                .sum_rect(x, y, split_x, split_y)
                .saturating_add(self.sum_rect(x + split_x, y, width - split_x, split_y))
                .saturating_add(self.sum_rect(x, y + split_y, split_x, height - split_y))
                .saturating_add(self.sum_rect(
                    x + split_x,
                    y + split_y,
                    width - split_x,
                    height - split_y,
                ));
        }

        let Some((tile_id, _)) = self.locate(x, y) else {
            return 0;
        };
        let Some(start) = self.slot_start(tile_id) else {
            return 0;
        };
        let local_x = x.rem_euclid(resolution) as usize;
        let local_y = y.rem_euclid(resolution) as usize;
        let mut sum = 0u32;
        for row in local_y..local_y + height as usize {
            let row_start = start + row * resolution as usize + local_x;
            for value in &self.data[row_start..row_start + width as usize] {
                sum = sum.saturating_add(*value);
            }
        }
        sum
    }

    /// Empties the grid, keeping the arena allocation for the next batch.
    pub fn clear(&mut self) {
        self.tiles.clear();
        self.data.clear();
    }

    /// Ids of all materialized tiles in ascending order.
    pub fn dirty_tiles(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.tiles.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Coordinates of all materialized tiles, ascending by local id.
    pub fn dirty_tile_coords(&self) -> Vec<TileCoord> {
        self.dirty_tiles()
            .into_iter()
            .map(|id| tile_index::tile_coord(self.zoom, id))
            .collect()
    }

    pub fn contains_tile(&self, tile_id: u32) -> bool {
        self.tiles.contains_key(&tile_id)
    }

    /// Non-zero cells of one tile as `(x_in_tile, y_in_tile, value)`.
    pub fn tile_cells_nonzero(&self, tile_id: u32) -> impl Iterator<Item = (u32, u32, u32)> + '_ {
        let resolution = self.resolution as usize;
        let cells = match self.slot_start(tile_id) {
            Some(start) => &self.data[start..start + self.tile_cells()],
            None => &[][..],
        };
        cells
            .iter()
            .enumerate()
            .filter(|(_, value)| **value != 0)
            .map(move |(offset, value)| {
                ((offset % resolution) as u32, (offset / resolution) as u32, *value)
            })
    }

    /// Drops every tile matching `predicate`. The arena is not compacted.
    pub fn remove_all<F>(&mut self, mut predicate: F)
    where
        F: FnMut(u32) -> bool,
    {
        self.tiles.retain(|tile_id, _| !predicate(*tile_id));
    }

    /// Materialized tiles projected to `zoom`: deduplicated parents when
    /// coarser, every sub-tile when finer. Sorted ascending.
    pub fn tiles_at(&self, zoom: i32) -> Vec<TileCoord> {
        let mut tiles = BTreeSet::new();
        for tile in self.dirty_tile_coords() {
            if zoom <= self.zoom {
                tiles.insert(tile_index::parent_tile_for(tile, zoom));
            } else {
                tiles.extend(tile_index::sub_tiles_for(tile, zoom));
            }
        }
        let mut tiles: Vec<TileCoord> = tiles.into_iter().collect();
        tiles.sort_by_key(|tile| tile_index::local_id_of(*tile));
        tiles
    }

    /// Companion grid one zoom up. It is created on first use and cleared
    /// for reuse afterwards; a different resolution replaces it.
    ///
    /// # Panics
    ///
    /// Panics on a zoom 0 grid.
    pub fn create_one_level_up(&mut self, resolution: u32) -> &mut SparseGrid {
        let next = self.take_one_level_up(resolution);
        self.next.insert(next)
    }

    /// The companion grid, if one was created.
    pub fn one_level_up(&self) -> Option<&SparseGrid> {
        self.next.as_deref()
    }

    pub(crate) fn one_level_up_mut(&mut self) -> Option<&mut SparseGrid> {
        self.next.as_deref_mut()
    }

    /// Detaches the companion grid (cleared or fresh) so it can be filled
    /// while this grid is read.
    pub(crate) fn take_one_level_up(&mut self, resolution: u32) -> Box<SparseGrid> {
        assert!(self.zoom > 0, "Zoom 0 grid has no coarser level");
        match self.next.take() {
            Some(mut next) if next.resolution == resolution => {
                next.clear();
                next
            }
            _ => Box::new(SparseGrid::new(self.zoom - 1, resolution)),
        }
    }

    pub(crate) fn restore_one_level_up(&mut self, next: Box<SparseGrid>) {
        debug_assert_eq!(next.zoom, self.zoom - 1);
        self.next = Some(next);
    }
}
