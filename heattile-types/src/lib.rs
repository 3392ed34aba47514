//! # heattile-types
//!
//! Core types shared by the heattile storage engine and its consumers:
//!
//! - **Tile coordinates**: `TileCoord`, a slippy-map `(x, y, zoom)` triple
//! - **Packed cells**: `PackedCount`, two 32-bit counters in one `u64`
//! - **Resolution policy**: `ZoomResolutions`, pixels per tile side per zoom
//!
//! All types are serializable with Serde.
//!
//! ## Examples
//!
//! ```rust
//! use heattile_types::coord::TileCoord;
//! use heattile_types::packed::PackedCount;
//!
//! let tile = TileCoord::new(8424, 5497, 14);
//! assert_eq!(tile.to_string(), "14/8424/5497");
//!
//! let cell = PackedCount::new(3, 17);
//! assert_eq!(PackedCount::from_raw(cell.raw()), cell);
//! ```

pub mod coord;
pub mod packed;
pub mod resolution;
