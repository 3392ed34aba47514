//! All tiles of one zoom level in a single seekable file.
//!
//! Layout, little-endian:
//!
//! ```text
//! u32 version (1) | u32 zoom | u32 resolution
//! i64 group pointer x ceil(4^zoom / 1024)         (0 = group absent)
//! ... appended groups: i64 tile pointer x 1024     (0 = tile absent)
//! ... appended records: u32 length | payload
//! ```
//!
//! Rewriting a tile appends a new record and swings its pointer; the old
//! record is never reclaimed.

use crate::TileCoord;
use crate::error::{HeatTileError, Result};
use crate::storage::{BackendStats, TileBackend};
use crate::tile_index::{self, MAX_ZOOM};
use bytes::Bytes;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;
pub const TILES_PER_GROUP: u64 = 1024;

const HEADER_LEN: u64 = 12;
const ABSENT: i64 = 0;

#[derive(Debug)]
pub struct SingleFileBackend {
    path: PathBuf,
    file: File,
    zoom: i32,
    resolution: u32,
    end: u64,
    operations_count: u64,
}

impl SingleFileBackend {
    /// Opens the file at `path`, creating it for `zoom` and `resolution` when
    /// it does not exist yet. An existing file must match both.
    pub fn open<P: AsRef<Path>>(path: P, zoom: i32, resolution: u32) -> Result<Self> {
        if !(0..=MAX_ZOOM).contains(&zoom) {
            return Err(HeatTileError::UnsupportedZoom {
                zoom,
                max_zoom: MAX_ZOOM,
            });
        }
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let len = file.metadata()?.len();

        if len == 0 {
            let mut header = Vec::with_capacity(HEADER_LEN as usize);
            header.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
            header.extend_from_slice(&(zoom as u32).to_le_bytes());
            header.extend_from_slice(&resolution.to_le_bytes());
            file.write_all(&header)?;
            // The group directory starts zeroed, i.e. every group absent.
            file.set_len(HEADER_LEN + group_count(zoom) * 8)?;
        } else {
            let mut header = [0u8; HEADER_LEN as usize];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut header).map_err(|_| {
                HeatTileError::InvalidFormat(format!("{} has a truncated header", path.display()))
            })?;
            let version = le_u32(&header[0..4]);
            let stored_zoom = le_u32(&header[4..8]) as i32;
            let stored_resolution = le_u32(&header[8..12]);
            if version != FORMAT_VERSION {
                return Err(HeatTileError::UnsupportedVersion(version));
            }
            if stored_zoom != zoom {
                return Err(HeatTileError::ZoomMismatch {
                    expected: stored_zoom,
                    actual: zoom,
                });
            }
            if stored_resolution != resolution {
                return Err(HeatTileError::ResolutionMismatch {
                    expected: stored_resolution,
                    actual: resolution,
                });
            }
            if len < HEADER_LEN + group_count(zoom) * 8 {
                return Err(HeatTileError::InvalidFormat(format!(
                    "{} is shorter than its group directory",
                    path.display()
                )));
            }
        }

        let end = file.metadata()?.len();
        log::debug!(
            "Opened single-file tile store {} (zoom {}, resolution {})",
            path.display(),
            zoom,
            resolution
        );
        Ok(Self {
            path,
            file,
            zoom,
            resolution,
            end,
            operations_count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn zoom(&self) -> i32 {
        self.zoom
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    fn check_zoom(&self, tile: TileCoord) -> Result<()> {
        if tile.zoom != self.zoom {
            return Err(HeatTileError::ZoomMismatch {
                expected: self.zoom,
                actual: tile.zoom,
            });
        }
        Ok(())
    }

    fn read_i64_at(&self, offset: u64) -> Result<i64> {
        let mut buf = [0u8; 8];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.end;
        self.write_at(offset, bytes)?;
        self.end += bytes.len() as u64;
        Ok(offset)
    }

    fn group_slot(id: u32) -> (u64, u64) {
        let id = id as u64;
        (
            HEADER_LEN + (id / TILES_PER_GROUP) * 8,
            (id % TILES_PER_GROUP) * 8,
        )
    }

    /// File offset of the tile's pointer slot, if its group exists.
    fn tile_slot(&self, tile: TileCoord) -> Result<Option<u64>> {
        let (group_slot, within) = Self::group_slot(tile_index::local_id_of(tile));
        match self.read_i64_at(group_slot)? {
            ABSENT => Ok(None),
            group => Ok(Some(self.checked_offset(group)? + within)),
        }
    }

    fn checked_offset(&self, pointer: i64) -> Result<u64> {
        if pointer < 0 || pointer as u64 >= self.end {
            return Err(HeatTileError::InvalidFormat(format!(
                "pointer {} outside of {} ({} bytes)",
                pointer,
                self.path.display(),
                self.end
            )));
        }
        Ok(pointer as u64)
    }

    fn record_offset(&self, tile: TileCoord) -> Result<Option<u64>> {
        let Some(slot) = self.tile_slot(tile)? else {
            return Ok(None);
        };
        match self.read_i64_at(slot)? {
            ABSENT => Ok(None),
            record => Ok(Some(self.checked_offset(record)?)),
        }
    }
}

impl TileBackend for SingleFileBackend {
    fn get(&self, tile: TileCoord) -> Result<Option<Bytes>> {
        self.check_zoom(tile)?;
        let Some(offset) = self.record_offset(tile)? else {
            return Ok(None);
        };
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        let mut len = [0u8; 4];
        file.read_exact(&mut len)?;
        let len = u32::from_le_bytes(len) as u64;
        if offset + 4 + len > self.end {
            return Err(HeatTileError::InvalidFormat(format!(
                "record for tile {} runs past the end of {}",
                tile,
                self.path.display()
            )));
        }
        let mut payload = vec![0u8; len as usize];
        file.read_exact(&mut payload)?;
        Ok(Some(Bytes::from(payload)))
    }

    fn put(&mut self, tile: TileCoord, payload: &[u8]) -> Result<()> {
        self.check_zoom(tile)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            HeatTileError::InvalidInput(format!(
                "tile payload of {} bytes is too large",
                payload.len()
            ))
        })?;

        let slot = match self.tile_slot(tile)? {
            Some(slot) => slot,
            None => {
                let group = self.append(&vec![0u8; (TILES_PER_GROUP * 8) as usize])?;
                let (group_slot, within) = Self::group_slot(tile_index::local_id_of(tile));
                self.write_at(group_slot, &(group as i64).to_le_bytes())?;
                group + within
            }
        };

        let mut record = Vec::with_capacity(4 + payload.len());
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(payload);
        let offset = self.append(&record)?;
        self.write_at(slot, &(offset as i64).to_le_bytes())?;
        self.operations_count += 1;
        Ok(())
    }

    fn remove(&mut self, tile: TileCoord) -> Result<bool> {
        self.check_zoom(tile)?;
        let Some(slot) = self.tile_slot(tile)? else {
            return Ok(false);
        };
        if self.read_i64_at(slot)? == ABSENT {
            return Ok(false);
        }
        self.write_at(slot, &ABSENT.to_le_bytes())?;
        self.operations_count += 1;
        Ok(true)
    }

    fn contains(&self, tile: TileCoord) -> Result<bool> {
        if tile.zoom != self.zoom {
            return Ok(false);
        }
        Ok(self.record_offset(tile)?.is_some())
    }

    fn tiles(&self) -> Result<Vec<TileCoord>> {
        let mut tiles = Vec::new();
        let mut directory = vec![0u8; (group_count(self.zoom) * 8) as usize];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(HEADER_LEN))?;
        file.read_exact(&mut directory)?;

        let mut group = vec![0u8; (TILES_PER_GROUP * 8) as usize];
        for (group_index, pointer) in directory.chunks_exact(8).enumerate() {
            let pointer = le_i64(pointer);
            if pointer == ABSENT {
                continue;
            }
            file.seek(SeekFrom::Start(self.checked_offset(pointer)?))?;
            file.read_exact(&mut group)?;
            for (within, record) in group.chunks_exact(8).enumerate() {
                if le_i64(record) == ABSENT {
                    continue;
                }
                let id = group_index as u64 * TILES_PER_GROUP + within as u64;
                tiles.push(tile_index::tile_coord(self.zoom, id as u32));
            }
        }
        Ok(tiles)
    }

    fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    fn stats(&self) -> Result<BackendStats> {
        Ok(BackendStats {
            tile_count: self.tiles()?.len(),
            size_bytes: self.end,
            operations_count: self.operations_count,
        })
    }
}

fn group_count(zoom: i32) -> u64 {
    tile_index::tile_count(zoom).div_ceil(TILES_PER_GROUP)
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn le_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    i64::from_le_bytes(buf)
}
