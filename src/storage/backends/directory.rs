use crate::TileCoord;
use crate::error::Result;
use crate::storage::{BackendStats, TileBackend};
use bytes::Bytes;
use memmap2::Mmap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const TILE_EXTENSION: &str = "heatmap";

/// One file per non-empty tile, laid out as `{root}/{zoom}/{x}/{y}.heatmap`.
///
/// Payloads are memory-mapped on read and handed out without copying. Writes
/// go through a temporary file that is renamed over the target, so a crash
/// never leaves a torn tile and a mapped payload never changes under a reader.
#[derive(Debug)]
pub struct DirectoryBackend {
    root: PathBuf,
    durable: bool,
    operations_count: u64,
}

impl DirectoryBackend {
    /// Opens (and creates if needed) a tile directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            durable: true,
            operations_count: 0,
        })
    }

    /// Skip `fsync` on every write. Faster, but a crash may lose recent tiles.
    pub fn without_fsync(mut self) -> Self {
        self.durable = false;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing a tile.
    pub fn tile_path(&self, tile: TileCoord) -> PathBuf {
        self.root
            .join(tile.zoom.to_string())
            .join(tile.x.to_string())
            .join(format!("{}.{}", tile.y, TILE_EXTENSION))
    }

    /// Subdirectories of `dir` whose names parse as `N`, skipping the rest.
    fn numeric_dirs<N: FromStr>(dir: &Path) -> io::Result<Vec<(N, PathBuf)>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(value) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                entries.push((value, entry.path()));
            }
        }
        Ok(entries)
    }

    /// `y` values of the `{y}.heatmap` files in `dir`.
    fn tile_rows(dir: &Path) -> io::Result<Vec<u32>> {
        let mut rows = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(stem) = name
                .to_str()
                .and_then(|n| n.strip_suffix(TILE_EXTENSION))
                .and_then(|n| n.strip_suffix('.'))
            else {
                continue;
            };
            if let Ok(y) = stem.parse() {
                rows.push(y);
            }
        }
        Ok(rows)
    }
}

impl TileBackend for DirectoryBackend {
    fn get(&self, tile: TileCoord) -> Result<Option<Bytes>> {
        let path = self.tile_path(tile);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if file.metadata()?.len() == 0 {
            return Ok(Some(Bytes::new()));
        }
        // SAFETY: tile files are only replaced through rename, never modified in
        // place, so the mapped inode stays unchanged while the payload lives.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Some(Bytes::from_owner(map)))
    }

    fn put(&mut self, tile: TileCoord, payload: &[u8]) -> Result<()> {
        let path = self.tile_path(tile);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension(format!("{}.tmp", TILE_EXTENSION));
        {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(payload)?;
            writer.flush()?;
            if self.durable {
                writer.get_ref().sync_data()?;
            }
        }
        fs::rename(&temp_path, &path)?;
        self.operations_count += 1;
        Ok(())
    }

    fn remove(&mut self, tile: TileCoord) -> Result<bool> {
        self.operations_count += 1;
        match fs::remove_file(self.tile_path(tile)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn contains(&self, tile: TileCoord) -> Result<bool> {
        Ok(self.tile_path(tile).is_file())
    }

    fn tiles(&self) -> Result<Vec<TileCoord>> {
        let mut tiles = Vec::new();
        for (zoom, zoom_path) in Self::numeric_dirs::<i32>(&self.root)? {
            for (x, x_path) in Self::numeric_dirs::<u32>(&zoom_path)? {
                for y in Self::tile_rows(&x_path)? {
                    tiles.push(TileCoord::new(x, y, zoom));
                }
            }
        }
        Ok(tiles)
    }

    fn sync(&mut self) -> Result<()> {
        // Every put already lands in its own file.
        Ok(())
    }

    fn stats(&self) -> Result<BackendStats> {
        let tiles = self.tiles()?;
        let mut size_bytes = 0;
        for tile in &tiles {
            size_bytes += fs::metadata(self.tile_path(*tile))?.len();
        }
        Ok(BackendStats {
            tile_count: tiles.len(),
            size_bytes,
            operations_count: self.operations_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_layout() {
        let dir = TempDir::new().unwrap();
        let mut backend = DirectoryBackend::open(dir.path()).unwrap();
        let tile = TileCoord::new(8390, 5496, 14);

        backend.put(tile, b"data").unwrap();
        let expected = dir.path().join("14").join("8390").join("5496.heatmap");
        assert!(expected.is_file());
        assert_eq!(backend.tile_path(tile), expected);
        assert_eq!(backend.get(tile).unwrap().unwrap().as_ref(), b"data");
    }

    #[test]
    fn test_directory_remove_and_list() {
        let dir = TempDir::new().unwrap();
        let mut backend = DirectoryBackend::open(dir.path()).unwrap().without_fsync();
        let a = TileCoord::new(1, 1, 2);
        let b = TileCoord::new(0, 0, 1);
        backend.put(a, b"a").unwrap();
        backend.put(b, b"bb").unwrap();

        let mut tiles = backend.tiles().unwrap();
        tiles.sort();
        assert_eq!(tiles, vec![b, a]);
        assert_eq!(backend.stats().unwrap().size_bytes, 3);

        assert!(backend.remove(a).unwrap());
        assert!(!backend.remove(a).unwrap());
        assert!(backend.get(a).unwrap().is_none());
        assert_eq!(backend.tiles().unwrap(), vec![b]);
    }

    #[test]
    fn test_directory_listing_skips_foreign_entries() {
        let dir = TempDir::new().unwrap();
        let mut backend = DirectoryBackend::open(dir.path()).unwrap().without_fsync();
        let tile = TileCoord::new(2, 3, 4);
        backend.put(tile, b"x").unwrap();

        fs::write(dir.path().join("README"), b"notes").unwrap();
        fs::create_dir_all(dir.path().join("tmp").join("1")).unwrap();
        fs::write(dir.path().join("4").join("notes.txt"), b"").unwrap();
        fs::write(dir.path().join("4").join("2").join("9.heatmap.tmp"), b"").unwrap();
        fs::write(dir.path().join("4").join("2").join("x.heatmap"), b"").unwrap();

        assert_eq!(backend.tiles().unwrap(), vec![tile]);
    }

    #[test]
    fn test_read_payload_survives_overwrite() {
        let dir = TempDir::new().unwrap();
        let mut backend = DirectoryBackend::open(dir.path()).unwrap();
        let tile = TileCoord::new(0, 0, 0);
        backend.put(tile, b"first").unwrap();
        let before = backend.get(tile).unwrap().unwrap();
        backend.put(tile, b"second").unwrap();
        assert_eq!(before.as_ref(), b"first");
    }

    #[test]
    fn test_directory_overwrite() {
        let dir = TempDir::new().unwrap();
        let mut backend = DirectoryBackend::open(dir.path()).unwrap();
        let tile = TileCoord::new(0, 0, 0);
        backend.put(tile, b"first").unwrap();
        backend.put(tile, b"second").unwrap();
        assert_eq!(backend.get(tile).unwrap().unwrap().as_ref(), b"second");
    }
}
