use serde::{Deserialize, Serialize};
use std::fmt;

/// A tile in the slippy-map tile pyramid.
///
/// Valid tiles satisfy `0 <= x, y < 2^zoom`. Zoom 0 is the single root tile
/// covering the whole world.
///
/// # Examples
///
/// ```
/// use heattile_types::coord::TileCoord;
///
/// let tile = TileCoord::new(1, 2, 2);
/// assert!(tile.is_valid());
/// assert!(!TileCoord::new(4, 0, 2).is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub zoom: i32,
}

impl TileCoord {
    pub const fn new(x: u32, y: u32, zoom: i32) -> Self {
        Self { x, y, zoom }
    }

    /// The root tile at zoom 0.
    pub const fn root() -> Self {
        Self::new(0, 0, 0)
    }

    /// Number of tiles along one axis at this tile's zoom.
    pub fn tiles_per_axis(&self) -> u64 {
        tiles_per_axis(self.zoom)
    }

    /// Whether the coordinates are inside the pyramid at this zoom.
    pub fn is_valid(&self) -> bool {
        if !(0..=31).contains(&self.zoom) {
            return false;
        }
        let n = self.tiles_per_axis();
        (self.x as u64) < n && (self.y as u64) < n
    }
}

impl From<(u32, u32, i32)> for TileCoord {
    fn from((x, y, zoom): (u32, u32, i32)) -> Self {
        Self::new(x, y, zoom)
    }
}

impl From<TileCoord> for (u32, u32, i32) {
    fn from(tile: TileCoord) -> Self {
        (tile.x, tile.y, tile.zoom)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Number of tiles along one axis at `zoom`, `2^zoom`.
pub fn tiles_per_axis(zoom: i32) -> u64 {
    1u64 << zoom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_valid() {
        let root = TileCoord::root();
        assert!(root.is_valid());
        assert_eq!(root.tiles_per_axis(), 1);
        assert!(!TileCoord::new(1, 0, 0).is_valid());
    }

    #[test]
    fn test_validity_bounds() {
        assert!(TileCoord::new(16383, 16383, 14).is_valid());
        assert!(!TileCoord::new(16384, 0, 14).is_valid());
        assert!(!TileCoord::new(0, 0, -1).is_valid());
    }

    #[test]
    fn test_display_and_tuple_conversion() {
        let tile: TileCoord = (3, 5, 4).into();
        assert_eq!(tile.to_string(), "4/3/5");
        let (x, y, z): (u32, u32, i32) = tile.into();
        assert_eq!((x, y, z), (3, 5, 4));
    }
}
