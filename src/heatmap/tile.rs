//! A single heat map tile backed by a block-sparse array.
//!
//! Cells are grouped into fixed-size blocks. A block is appended to the
//! tile's arena on the first non-zero write into its range and is never
//! released; unallocated blocks read as zero. Cell `(x, y)` lives at index
//! `x * resolution + y`.

use super::cell::CellValue;
use crate::error::{HeatTileError, Result};

/// Default number of cells per allocation block.
pub const DEFAULT_BLOCK_SIZE: u32 = 64;

const NO_BLOCK: u32 = u32::MAX;
const NO_BLOCK_ON_DISK: i64 = i64::MAX;
const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct HeatMapTile<T: CellValue> {
    resolution: u32,
    block_size: u32,
    block_pointers: Vec<u32>,
    data: Vec<T>,
    dirty: bool,
}

impl<T: CellValue> HeatMapTile<T> {
    /// Creates an empty tile with the default block size.
    pub fn new(resolution: u32) -> Self {
        Self::with_block_size(resolution, DEFAULT_BLOCK_SIZE)
    }

    /// # Panics
    ///
    /// Panics if `resolution` or `block_size` is zero.
    pub fn with_block_size(resolution: u32, block_size: u32) -> Self {
        assert!(resolution > 0, "Tile resolution must be greater than zero");
        assert!(block_size > 0, "Block size must be greater than zero");
        let cells = resolution as u64 * resolution as u64;
        let block_count = cells.div_ceil(block_size as u64) as usize;
        Self {
            resolution,
            block_size,
            block_pointers: vec![NO_BLOCK; block_count],
            data: Vec::new(),
            dirty: false,
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Number of blocks materialized in the arena.
    pub fn allocated_blocks(&self) -> usize {
        self.data.len() / self.block_size as usize
    }

    /// True when every cell is zero. Blocks zeroed after allocation count as
    /// empty too.
    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|value| value.is_zero())
    }

    /// True when the tile changed since it was loaded or last persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    #[inline]
    fn locate(&self, x: u32, y: u32) -> (usize, usize) {
        assert!(
            x < self.resolution && y < self.resolution,
            "cell ({}, {}) outside tile of resolution {}",
            x,
            y,
            self.resolution
        );
        let index = x as usize * self.resolution as usize + y as usize;
        let block_size = self.block_size as usize;
        (index / block_size, index % block_size)
    }

    pub fn get(&self, x: u32, y: u32) -> T {
        let (block, offset) = self.locate(x, y);
        match self.block_pointers[block] {
            NO_BLOCK => T::default(),
            pointer => self.data[pointer as usize * self.block_size as usize + offset],
        }
    }

    pub fn set(&mut self, x: u32, y: u32, value: T) {
        let (block, offset) = self.locate(x, y);
        let pointer = match self.block_pointers[block] {
            NO_BLOCK if value.is_zero() => return,
            NO_BLOCK => self.allocate_block(block),
            pointer => pointer,
        };
        self.data[pointer as usize * self.block_size as usize + offset] = value;
        self.dirty = true;
    }

    /// Adds `delta`, saturating at `T::MAX`.
    pub fn add_assign(&mut self, x: u32, y: u32, delta: T) {
        if delta.is_zero() {
            return;
        }
        let current = self.get(x, y);
        self.set(x, y, current.saturating_add(delta));
    }

    fn allocate_block(&mut self, block: usize) -> u32 {
        let pointer = self.allocated_blocks() as u32;
        self.data
            .resize(self.data.len() + self.block_size as usize, T::default());
        self.block_pointers[block] = pointer;
        pointer
    }

    /// Iterates over all non-zero cells as `(x, y, value)`.
    pub fn iter_nonzero(&self) -> impl Iterator<Item = (u32, u32, T)> + '_ {
        let block_size = self.block_size as usize;
        let cells = self.resolution as usize * self.resolution as usize;
        self.block_pointers
            .iter()
            .enumerate()
            .filter(|(_, pointer)| **pointer != NO_BLOCK)
            .flat_map(move |(block, pointer)| {
                let start = *pointer as usize * block_size;
                let first = block * block_size;
                let len = block_size.min(cells - first);
                self.data[start..start + len]
                    .iter()
                    .enumerate()
                    .filter(|(_, value)| !value.is_zero())
                    .map(move |(offset, value)| {
                        let index = first + offset;
                        let x = (index / self.resolution as usize) as u32;
                        let y = (index % self.resolution as usize) as u32;
                        (x, y, *value)
                    })
            })
    }

    /// Rewrites every non-zero cell with `f(x, y, value)`.
    pub fn update_in_place<F>(&mut self, mut f: F)
    where
        F: FnMut(u32, u32, T) -> T,
    {
        let cells: Vec<_> = self.iter_nonzero().collect();
        for (x, y, value) in cells {
            let updated = f(x, y, value);
            if updated != value {
                self.set(x, y, updated);
            }
        }
    }

    /// Saturating sum of the `step × step` square starting at `(x, y)`.
    pub fn sum_range(&self, x: u32, y: u32, step: u32) -> T {
        let mut sum = T::default();
        for i in x..(x + step).min(self.resolution) {
            for j in y..(y + step).min(self.resolution) {
                sum = sum.saturating_add(self.get(i, j));
            }
        }
        sum
    }

    /// Drops all content, keeping the arena allocation for reuse.
    pub fn clear(&mut self) {
        if self.data.is_empty() {
            return;
        }
        self.block_pointers.fill(NO_BLOCK);
        self.data.clear();
        self.dirty = true;
    }

    /// Serializes the tile payload.
    ///
    /// Layout, all little-endian: `u32 resolution`, `u32 block_size`,
    /// `u32 value_width`, `u32 allocated_blocks`, one `i64` block pointer per
    /// block (`i64::MAX` = none), then the arena cells.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            HEADER_LEN + self.block_pointers.len() * 8 + self.data.len() * T::WIDTH,
        );
        out.extend_from_slice(&self.resolution.to_le_bytes());
        out.extend_from_slice(&self.block_size.to_le_bytes());
        out.extend_from_slice(&(T::WIDTH as u32).to_le_bytes());
        out.extend_from_slice(&(self.allocated_blocks() as u32).to_le_bytes());
        for &pointer in &self.block_pointers {
            let on_disk = match pointer {
                NO_BLOCK => NO_BLOCK_ON_DISK,
                pointer => pointer as i64,
            };
            out.extend_from_slice(&on_disk.to_le_bytes());
        }
        for value in &self.data {
            value.write_le(&mut out);
        }
        out
    }

    /// Parses a tile payload written by [`HeatMapTile::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(HeatTileError::InvalidFormat(format!(
                "tile payload of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        let resolution = read_u32(bytes, 0);
        let block_size = read_u32(bytes, 4);
        let value_width = read_u32(bytes, 8);
        let allocated = read_u32(bytes, 12) as usize;

        if value_width as usize != T::WIDTH {
            return Err(HeatTileError::ValueWidthMismatch {
                expected: T::WIDTH as u32,
                actual: value_width,
            });
        }
        if resolution == 0 || block_size == 0 {
            return Err(HeatTileError::InvalidFormat(
                "tile payload declares zero resolution or block size".into(),
            ));
        }

        let mut tile = Self::with_block_size(resolution, block_size);
        let pointers_len = tile.block_pointers.len() * 8;
        let data_len = allocated * block_size as usize * T::WIDTH;
        let expected = HEADER_LEN + pointers_len + data_len;
        if bytes.len() != expected {
            return Err(HeatTileError::InvalidFormat(format!(
                "tile payload is {} bytes, expected {}",
                bytes.len(),
                expected
            )));
        }

        for (block, chunk) in bytes[HEADER_LEN..HEADER_LEN + pointers_len]
            .chunks_exact(8)
            .enumerate()
        {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            let pointer = i64::from_le_bytes(buf);
            if pointer == NO_BLOCK_ON_DISK {
                continue;
            }
            if pointer < 0 || pointer as usize >= allocated {
                return Err(HeatTileError::InvalidFormat(format!(
                    "block pointer {} out of range for {} blocks",
                    pointer, allocated
                )));
            }
            tile.block_pointers[block] = pointer as u32;
        }

        tile.data = bytes[HEADER_LEN + pointers_len..]
            .chunks_exact(T::WIDTH)
            .map(T::read_le)
            .collect();
        Ok(tile)
    }

    /// Reads the declared resolution of an encoded payload without decoding it.
    pub fn peek_resolution(bytes: &[u8]) -> Option<u32> {
        (bytes.len() >= 4).then(|| read_u32(bytes, 0))
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}
