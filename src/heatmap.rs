//! Persistent tile store.
//!
//! A [`HeatMap`] keeps heat map tiles keyed by `(x, y, zoom)` on top of a
//! [`TileBackend`]. Tiles are decoded lazily on first access and cached until
//! [`HeatMap::flush_and_unload`] writes them back and evicts them, which is
//! how long apply passes keep memory bounded.

pub mod cell;
pub mod tile;

use crate::TileCoord;
use crate::error::{HeatTileError, Result};
use crate::storage::{BackendStats, MemoryBackend, TileBackend};
use heattile_types::resolution::ZoomResolutions;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;

pub use cell::CellValue;
pub use tile::{DEFAULT_BLOCK_SIZE, HeatMapTile};

/// Persistent, lazily loaded collection of heat map tiles.
///
/// The cell type `T` is `u32` for plain counters, `u64` for packed
/// user/trip counters and `u8` for masks.
///
/// # Examples
///
/// ```rust
/// use heattile::{HeatMap, MemoryBackend, TileCoord};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut heatmap: HeatMap<u32> = HeatMap::new(MemoryBackend::new(), 256);
/// let tile = TileCoord::new(8390, 5496, 14);
///
/// heatmap.get_or_create(tile)?.add_assign(10, 20, 3);
/// heatmap.flush_and_unload()?;
///
/// let stored = heatmap.try_get(tile)?.expect("tile was written");
/// assert_eq!(stored.get(10, 20), 3);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HeatMap<T: CellValue, B: TileBackend = MemoryBackend> {
    backend: B,
    resolutions: ZoomResolutions,
    block_size: u32,
    max_zoom: Option<i32>,
    tiles: FxHashMap<TileCoord, HeatMapTile<T>>,
}

impl<T: CellValue, B: TileBackend> HeatMap<T, B> {
    /// Creates a store whose tiles all have `resolution` pixels per side.
    pub fn new(backend: B, resolution: u32) -> Self {
        Self::with_resolutions(backend, ZoomResolutions::uniform(resolution))
    }

    /// Creates a store with a per-zoom tile resolution.
    pub fn with_resolutions(backend: B, resolutions: ZoomResolutions) -> Self {
        Self {
            backend,
            resolutions,
            block_size: DEFAULT_BLOCK_SIZE,
            max_zoom: None,
            tiles: FxHashMap::default(),
        }
    }

    /// Cells per allocation block for newly created tiles.
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Refuse to read or create tiles finer than `max_zoom`.
    pub fn with_max_zoom(mut self, max_zoom: i32) -> Self {
        self.max_zoom = Some(max_zoom);
        self
    }

    pub fn resolution_for(&self, zoom: i32) -> u32 {
        self.resolutions.for_zoom(zoom)
    }

    pub fn resolutions(&self) -> &ZoomResolutions {
        &self.resolutions
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn max_zoom(&self) -> Option<i32> {
        self.max_zoom
    }

    fn check_zoom(&self, zoom: i32) -> Result<()> {
        match self.max_zoom {
            Some(max_zoom) if zoom > max_zoom => {
                Err(HeatTileError::UnsupportedZoom { zoom, max_zoom })
            }
            _ => Ok(()),
        }
    }

    /// Returns the tile, loading it from the backend or creating an empty one.
    pub fn get_or_create(&mut self, tile: TileCoord) -> Result<&mut HeatMapTile<T>> {
        self.check_zoom(tile.zoom)?;
        let resolution = self.resolution_for(tile.zoom);
        let block_size = self.block_size;
        match self.tiles.entry(tile) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let loaded = load_tile::<T, B>(&self.backend, tile, resolution)?;
                let tile = match loaded {
                    Some(tile) => tile,
                    None => HeatMapTile::with_block_size(resolution, block_size),
                };
                Ok(entry.insert(tile))
            }
        }
    }

    /// Shorthand for [`HeatMap::get_or_create`] with loose coordinates.
    pub fn tile_mut(&mut self, x: u32, y: u32, zoom: i32) -> Result<&mut HeatMapTile<T>> {
        self.get_or_create(TileCoord::new(x, y, zoom))
    }

    /// Looks a tile up without creating it.
    pub fn try_get(&mut self, tile: TileCoord) -> Result<Option<&HeatMapTile<T>>> {
        Ok(self.try_get_mut(tile)?.map(|tile| &*tile))
    }

    /// Mutable variant of [`HeatMap::try_get`].
    pub fn try_get_mut(&mut self, tile: TileCoord) -> Result<Option<&mut HeatMapTile<T>>> {
        if !self.tiles.contains_key(&tile) {
            self.check_zoom(tile.zoom)?;
            let resolution = self.resolution_for(tile.zoom);
            match load_tile::<T, B>(&self.backend, tile, resolution)? {
                Some(loaded) => {
                    self.tiles.insert(tile, loaded);
                }
                None => return Ok(None),
            }
        }
        Ok(self.tiles.get_mut(&tile))
    }

    /// Drops a tile from the cache and the backend. Returns whether it existed
    /// in either.
    pub fn try_remove(&mut self, tile: TileCoord) -> Result<bool> {
        let cached = self
            .tiles
            .remove(&tile)
            .is_some_and(|tile| !tile.is_empty());
        let stored = self.backend.remove(tile)?;
        Ok(cached || stored)
    }

    /// True when the tile holds data in the cache or the backend.
    pub fn contains(&self, tile: TileCoord) -> Result<bool> {
        match self.tiles.get(&tile) {
            Some(cached) if cached.is_dirty() => Ok(!cached.is_empty()),
            _ => self.backend.contains(tile),
        }
    }

    /// Number of tiles currently held in memory.
    pub fn cached_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Writes every changed tile to the backend. Tiles that ended up empty are
    /// deleted instead of stored, so absence keeps meaning "no data".
    pub fn flush(&mut self) -> Result<()> {
        let mut written = 0usize;
        for (coord, tile) in self.tiles.iter_mut() {
            if !tile.is_dirty() {
                continue;
            }
            if tile.is_empty() {
                self.backend.remove(*coord)?;
            } else {
                self.backend.put(*coord, &tile.encode())?;
            }
            tile.mark_clean();
            written += 1;
        }
        if written > 0 {
            log::trace!("Flushed {} tiles", written);
        }
        self.backend.sync()
    }

    /// Flushes and then evicts every cached tile.
    pub fn flush_and_unload(&mut self) -> Result<()> {
        self.flush()?;
        self.tiles.clear();
        Ok(())
    }

    /// All tiles holding data, sorted by zoom then row-major position.
    pub fn tiles(&self) -> Result<Vec<TileCoord>> {
        let mut tiles = self.backend.tiles()?;
        tiles.retain(|coord| match self.tiles.get(coord) {
            Some(cached) if cached.is_dirty() => !cached.is_empty(),
            _ => true,
        });
        tiles.extend(
            self.tiles
                .iter()
                .filter(|(_, tile)| tile.is_dirty() && !tile.is_empty())
                .map(|(coord, _)| *coord),
        );
        tiles.sort_by_key(|tile| (tile.zoom, tile.y, tile.x));
        tiles.dedup();
        Ok(tiles)
    }

    /// Tiles holding data at one zoom.
    pub fn tiles_at(&self, zoom: i32) -> Result<Vec<TileCoord>> {
        let mut tiles = self.tiles()?;
        tiles.retain(|tile| tile.zoom == zoom);
        Ok(tiles)
    }

    pub fn stats(&self) -> Result<BackendStats> {
        self.backend.stats()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Flushes pending tiles and hands back the backend.
    pub fn into_backend(mut self) -> Result<B> {
        self.flush()?;
        Ok(self.backend)
    }
}

fn load_tile<T: CellValue, B: TileBackend>(
    backend: &B,
    tile: TileCoord,
    resolution: u32,
) -> Result<Option<HeatMapTile<T>>> {
    let Some(payload) = backend.get(tile)? else {
        return Ok(None);
    };
    match HeatMapTile::<T>::peek_resolution(&payload) {
        Some(actual) if actual != resolution => {
            return Err(HeatTileError::ResolutionMismatch {
                expected: resolution,
                actual,
            });
        }
        Some(_) => {}
        None => {
            return Err(HeatTileError::InvalidFormat(format!(
                "tile {} has an empty payload",
                tile
            )));
        }
    }
    HeatMapTile::decode(&payload).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> HeatMap<u32> {
        HeatMap::new(MemoryBackend::new(), 16)
    }

    #[test]
    fn test_fresh_store_is_sparse() {
        let mut heatmap = store();
        let tile = TileCoord::new(1, 1, 1);
        assert!(heatmap.try_get(tile).unwrap().is_none());
        assert!(!heatmap.contains(tile).unwrap());

        let created = heatmap.get_or_create(tile).unwrap();
        assert!(created.is_empty());
        assert_eq!(created.get(3, 4), 0);

        heatmap.flush_and_unload().unwrap();
        assert!(heatmap.tiles().unwrap().is_empty());
        assert_eq!(heatmap.stats().unwrap().tile_count, 0);
    }

    #[test]
    fn test_flush_and_reload() {
        let mut heatmap = store();
        let tile = TileCoord::new(2, 3, 2);
        heatmap.tile_mut(2, 3, 2).unwrap().set(5, 6, 42);
        assert!(heatmap.contains(tile).unwrap());

        heatmap.flush_and_unload().unwrap();
        assert_eq!(heatmap.cached_tiles(), 0);
        assert_eq!(heatmap.try_get(tile).unwrap().unwrap().get(5, 6), 42);
        assert_eq!(heatmap.tiles().unwrap(), vec![tile]);
    }

    #[test]
    fn test_try_remove() {
        let mut heatmap = store();
        let tile = TileCoord::new(0, 0, 0);
        assert!(!heatmap.try_remove(tile).unwrap());

        heatmap.get_or_create(tile).unwrap().set(1, 1, 1);
        heatmap.flush().unwrap();
        assert!(heatmap.try_remove(tile).unwrap());
        assert!(heatmap.try_get(tile).unwrap().is_none());
    }

    #[test]
    fn test_cleared_tile_is_deleted_on_flush() {
        let mut heatmap = store();
        let tile = TileCoord::new(0, 0, 0);
        heatmap.get_or_create(tile).unwrap().set(1, 1, 1);
        heatmap.flush_and_unload().unwrap();

        heatmap.get_or_create(tile).unwrap().clear();
        heatmap.flush_and_unload().unwrap();
        assert!(!heatmap.contains(tile).unwrap());
    }

    #[test]
    fn test_resolution_mismatch_is_fatal() {
        let mut backend = MemoryBackend::new();
        let tile = TileCoord::new(0, 0, 0);
        let mut other = HeatMapTile::<u32>::new(32);
        other.set(0, 0, 1);
        backend.put(tile, &other.encode()).unwrap();

        let mut heatmap: HeatMap<u32> = HeatMap::new(backend, 16);
        assert!(matches!(
            heatmap.get_or_create(tile),
            Err(HeatTileError::ResolutionMismatch {
                expected: 16,
                actual: 32
            })
        ));
    }

    #[test]
    fn test_value_width_mismatch() {
        let mut backend = MemoryBackend::new();
        let tile = TileCoord::new(0, 0, 0);
        let mut mask = HeatMapTile::<u8>::new(16);
        mask.set(0, 0, 1);
        backend.put(tile, &mask.encode()).unwrap();

        let mut heatmap: HeatMap<u32> = HeatMap::new(backend, 16);
        assert!(matches!(
            heatmap.try_get(tile),
            Err(HeatTileError::ValueWidthMismatch { .. })
        ));
    }

    #[test]
    fn test_max_zoom_rejects_upscaling() {
        let mut heatmap = store().with_max_zoom(10);
        assert!(matches!(
            heatmap.get_or_create(TileCoord::new(0, 0, 11)),
            Err(HeatTileError::UnsupportedZoom {
                zoom: 11,
                max_zoom: 10
            })
        ));
        assert!(heatmap.get_or_create(TileCoord::new(0, 0, 10)).is_ok());
    }

    #[test]
    fn test_per_zoom_resolution() {
        let resolutions = ZoomResolutions::uniform(64).with_override(3, 8);
        let mut heatmap: HeatMap<u64> = HeatMap::with_resolutions(MemoryBackend::new(), resolutions);
        assert_eq!(heatmap.get_or_create(TileCoord::new(0, 0, 3)).unwrap().resolution(), 8);
        assert_eq!(heatmap.get_or_create(TileCoord::new(0, 0, 4)).unwrap().resolution(), 64);
    }
}
