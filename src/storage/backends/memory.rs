use crate::TileCoord;
use crate::error::Result;
use crate::storage::{BackendStats, TileBackend};
use bytes::Bytes;
use rustc_hash::FxHashMap;

/// In-memory tile storage backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tiles: FxHashMap<TileCoord, Bytes>,
    operations_count: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TileBackend for MemoryBackend {
    fn get(&self, tile: TileCoord) -> Result<Option<Bytes>> {
        Ok(self.tiles.get(&tile).cloned())
    }

    fn put(&mut self, tile: TileCoord, payload: &[u8]) -> Result<()> {
        self.tiles.insert(tile, Bytes::copy_from_slice(payload));
        self.operations_count += 1;
        Ok(())
    }

    fn remove(&mut self, tile: TileCoord) -> Result<bool> {
        self.operations_count += 1;
        Ok(self.tiles.remove(&tile).is_some())
    }

    fn contains(&self, tile: TileCoord) -> Result<bool> {
        Ok(self.tiles.contains_key(&tile))
    }

    fn tiles(&self) -> Result<Vec<TileCoord>> {
        Ok(self.tiles.keys().copied().collect())
    }

    fn sync(&mut self) -> Result<()> {
        // No-op for in-memory storage
        Ok(())
    }

    fn stats(&self) -> Result<BackendStats> {
        Ok(BackendStats {
            tile_count: self.tiles.len(),
            size_bytes: self.tiles.values().map(|payload| payload.len() as u64).sum(),
            operations_count: self.operations_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_basic_ops() {
        let mut backend = MemoryBackend::new();
        let tile = TileCoord::new(1, 2, 3);

        assert!(backend.get(tile).unwrap().is_none());
        backend.put(tile, b"payload").unwrap();
        assert_eq!(backend.get(tile).unwrap().unwrap().as_ref(), b"payload");
        assert!(backend.contains(tile).unwrap());
        assert_eq!(backend.tiles().unwrap(), vec![tile]);

        assert!(backend.remove(tile).unwrap());
        assert!(!backend.remove(tile).unwrap());
        assert!(!backend.contains(tile).unwrap());
    }

    #[test]
    fn test_memory_backend_stats() {
        let mut backend = MemoryBackend::new();
        backend.put(TileCoord::new(0, 0, 1), b"abc").unwrap();
        backend.put(TileCoord::new(1, 0, 1), b"de").unwrap();
        let stats = backend.stats().unwrap();
        assert_eq!(stats.tile_count, 2);
        assert_eq!(stats.size_bytes, 5);
        assert_eq!(stats.operations_count, 2);
    }
}
