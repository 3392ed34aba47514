//! Thread-safe wrapper for sharing a heat map store.
//!
//! Enable the `sync` feature to use this module:
//!
//! ```toml
//! [dependencies]
//! heattile = { version = "0.1", features = ["sync"] }
//! ```
//!
//! # Examples
//!
//! ```rust
//! use heattile::{HeatMap, MemoryBackend, SparseGrid, SyncHeatMap, TileCoord};
//! use std::thread;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SyncHeatMap::new(HeatMap::<u32>::new(MemoryBackend::new(), 4));
//!
//! let writer = store.clone();
//! let handle = thread::spawn(move || {
//!     let mut diff = SparseGrid::new(1, 4);
//!     diff.add_assign(1, 1, 2);
//!     writer.apply_diff(&mut diff, 0).unwrap();
//! });
//! handle.join().unwrap();
//!
//! assert!(store.contains(TileCoord::root())?);
//! # Ok(())
//! # }
//! ```

use crate::TileCoord;
use crate::apply;
use crate::error::Result;
use crate::grid::SparseGrid;
use crate::heatmap::{CellValue, HeatMap, HeatMapTile};
use crate::rebuild;
use crate::storage::{BackendStats, MemoryBackend, TileBackend};
use parking_lot::RwLock;
use std::sync::Arc;

/// Thread-safe wrapper around [`HeatMap`] using `Arc<RwLock<HeatMap>>`.
///
/// Tile lookups go through the store's cache and therefore take the write
/// lock. Only `contains`, `tiles` and `stats` run under the read lock.
pub struct SyncHeatMap<T: CellValue, B: TileBackend = MemoryBackend> {
    inner: Arc<RwLock<HeatMap<T, B>>>,
}

impl<T: CellValue, B: TileBackend> Clone for SyncHeatMap<T, B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: CellValue, B: TileBackend> SyncHeatMap<T, B> {
    pub fn new(store: HeatMap<T, B>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    /// Applies a diff using the store's own resolutions for coarser zooms.
    pub fn apply_diff(&self, diff: &mut SparseGrid, min_zoom: i32) -> Result<Vec<TileCoord>> {
        let mut store = self.inner.write();
        let resolutions = store.resolutions().clone();
        apply::apply_diff(&mut *store, diff, min_zoom, |zoom| resolutions.for_zoom(zoom))
    }

    pub fn rebuild_parent_tile_tree(
        &self,
        seeds: impl IntoIterator<Item = TileCoord>,
    ) -> Result<Vec<TileCoord>> {
        rebuild::rebuild_parent_tile_tree(&mut *self.inner.write(), seeds)
    }

    /// Copy of a tile, if it exists.
    pub fn get(&self, tile: TileCoord) -> Result<Option<HeatMapTile<T>>> {
        let mut store = self.inner.write();
        let copy = store.try_get(tile)?.cloned();
        Ok(copy)
    }

    /// Runs `f` on the tile, creating it if needed.
    pub fn update<R, F>(&self, tile: TileCoord, f: F) -> Result<R>
    where
        F: FnOnce(&mut HeatMapTile<T>) -> R,
    {
        let mut store = self.inner.write();
        Ok(f(store.get_or_create(tile)?))
    }

    pub fn remove(&self, tile: TileCoord) -> Result<bool> {
        self.inner.write().try_remove(tile)
    }

    pub fn contains(&self, tile: TileCoord) -> Result<bool> {
        self.inner.read().contains(tile)
    }

    pub fn tiles(&self) -> Result<Vec<TileCoord>> {
        self.inner.read().tiles()
    }

    pub fn stats(&self) -> Result<BackendStats> {
        self.inner.read().stats()
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.write().flush()
    }

    /// Acquire a read lock for several operations at once.
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, HeatMap<T, B>> {
        self.inner.read()
    }

    /// Acquire a write lock for several operations at once.
    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, HeatMap<T, B>> {
        self.inner.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const fn assert_send_sync<T: Send + Sync>() {}
    const _: () = assert_send_sync::<SyncHeatMap<u32>>();

    #[test]
    fn test_concurrent_updates() {
        let store = SyncHeatMap::new(HeatMap::<u32>::new(MemoryBackend::new(), 4));
        let tile = TileCoord::new(0, 0, 1);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        store.update(tile, |t| t.add_assign(2, 3, 1)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get(tile).unwrap().unwrap().get(2, 3), 100);
    }

    #[test]
    fn test_clone_shares_state() {
        let store = SyncHeatMap::new(HeatMap::<u32>::new(MemoryBackend::new(), 4));
        let other = store.clone();
        other.update(TileCoord::root(), |t| t.set(0, 0, 5)).unwrap();
        assert!(store.contains(TileCoord::root()).unwrap());
        assert!(store.remove(TileCoord::root()).unwrap());
        assert!(other.tiles().unwrap().is_empty());
    }
}
