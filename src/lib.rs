//! Sparse multi-resolution tile storage for incremental GPS heat maps.
//!
//! Tracks are rasterized into an in-memory [`SparseGrid`] at one zoom, then
//! merged into a persistent [`HeatMap`] at that zoom and every coarser one.
//!
//! ```rust
//! use geo::line_string;
//! use heattile::{HeatMap, MemoryBackend, SparseGrid, TileCoord, apply_diff, rasterize_linestring};
//!
//! let mut store: HeatMap<u32> = HeatMap::new(MemoryBackend::new(), 256);
//! let mut diff = SparseGrid::new(12, 256);
//! rasterize_linestring(
//!     &mut diff,
//!     &line_string![(x: 4.35, y: 50.85), (x: 4.40, y: 50.87)],
//!     1,
//! );
//!
//! let written = apply_diff(&mut store, &mut diff, 0, |_| 256)?;
//! assert!(written.contains(&TileCoord::root()));
//! # Ok::<(), heattile::HeatTileError>(())
//! ```

pub mod apply;
pub mod builder;
pub mod config;
pub mod error;
pub mod grid;
pub mod heatmap;
pub mod pipeline;
pub mod raster;
pub mod rebuild;
pub mod source;
pub mod storage;
pub mod tile_index;
pub mod vector_tile;
pub mod watermark;

#[cfg(feature = "sync")]
pub mod sync;

pub use heattile_types::coord::TileCoord;
pub use heattile_types::packed::PackedCount;
pub use heattile_types::resolution::ZoomResolutions;

pub use apply::{add_tiles_to, apply_diff};
pub use builder::HeatMapBuilder;
pub use config::Config;
pub use error::{HeatTileError, Result};
pub use grid::SparseGrid;
pub use heatmap::{CellValue, HeatMap, HeatMapTile};
pub use pipeline::{BatchOutcome, HeatMapUpdater, UserIndex};
pub use raster::{rasterize_linestring, rasterize_tile, rasterize_tiled};
pub use rebuild::{rebuild_parent_tile_tree, rebuild_tile};
pub use source::{Contribution, ContributionSource, SequenceKey, VecSource};
pub use storage::{
    BackendStats, DirectoryBackend, MemoryBackend, SingleFileBackend, TileBackend,
};
pub use tile_index::{MAX_ZOOM, TileTransform};
pub use vector_tile::{VectorTileOptions, encode_vector_tile, write_vector_tiles};
pub use watermark::Watermark;

#[cfg(feature = "sync")]
pub use sync::SyncHeatMap;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {
    pub use crate::{Config, HeatMap, HeatMapBuilder, HeatTileError, Result, SparseGrid, TileCoord};

    pub use crate::{apply_diff, rebuild_parent_tile_tree};

    pub use crate::{DirectoryBackend, MemoryBackend, SingleFileBackend, TileBackend};

    pub use crate::{Contribution, ContributionSource, HeatMapUpdater, SequenceKey};

    #[cfg(feature = "sync")]
    pub use crate::SyncHeatMap;

    pub use geo::{LineString, coord, line_string};
}
