//! Storage backend abstraction for heat map tiles
//!
//! A backend persists encoded tile payloads keyed by tile coordinate. The
//! heat map decodes payloads into in-memory tiles, caches them, and writes
//! them back on flush, so backends never see partially updated tiles.

pub mod backends;

use crate::TileCoord;
use crate::error::Result;
use bytes::Bytes;

pub use backends::{DirectoryBackend, MemoryBackend, SingleFileBackend};

/// Trait for tile storage backends
pub trait TileBackend: Send {
    /// Get the encoded payload of a tile
    fn get(&self, tile: TileCoord) -> Result<Option<Bytes>>;

    /// Insert or replace the encoded payload of a tile
    fn put(&mut self, tile: TileCoord, payload: &[u8]) -> Result<()>;

    /// Delete a tile, returning whether it existed
    fn remove(&mut self, tile: TileCoord) -> Result<bool>;

    /// Check if a tile exists
    fn contains(&self, tile: TileCoord) -> Result<bool>;

    /// All stored tiles, in no particular order
    fn tiles(&self) -> Result<Vec<TileCoord>>;

    /// Flush pending writes to durable storage
    fn sync(&mut self) -> Result<()>;

    /// Get storage statistics
    fn stats(&self) -> Result<BackendStats>;
}

/// Storage backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Number of stored tiles
    pub tile_count: usize,
    /// Storage size in bytes (approximate)
    pub size_bytes: u64,
    /// Number of write and delete operations performed
    pub operations_count: u64,
}

impl<B: TileBackend + ?Sized> TileBackend for Box<B> {
    fn get(&self, tile: TileCoord) -> Result<Option<Bytes>> {
        (**self).get(tile)
    }

    fn put(&mut self, tile: TileCoord, payload: &[u8]) -> Result<()> {
        (**self).put(tile, payload)
    }

    fn remove(&mut self, tile: TileCoord) -> Result<bool> {
        (**self).remove(tile)
    }

    fn contains(&self, tile: TileCoord) -> Result<bool> {
        (**self).contains(tile)
    }

    fn tiles(&self) -> Result<Vec<TileCoord>> {
        (**self).tiles()
    }

    fn sync(&mut self) -> Result<()> {
        (**self).sync()
    }

    fn stats(&self) -> Result<BackendStats> {
        (**self).stats()
    }
}
