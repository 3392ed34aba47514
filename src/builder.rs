//! Builder for heat map stores.
//!
//! Collects resolutions, block size and zoom limits once and then opens a
//! [`HeatMap`] over any of the bundled backends.

use crate::config::Config;
use crate::error::Result;
use crate::heatmap::{CellValue, HeatMap};
use crate::storage::{DirectoryBackend, MemoryBackend, SingleFileBackend, TileBackend};
use heattile_types::resolution::ZoomResolutions;
use std::path::Path;

/// Builder for heat map stores with shared settings.
#[derive(Debug, Clone)]
pub struct HeatMapBuilder {
    config: Config,
    max_zoom: Option<i32>,
}

impl HeatMapBuilder {
    /// Create a new builder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            max_zoom: None,
        }
    }

    /// Take resolutions and block size from a configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Same resolution at every zoom.
    pub fn resolution(mut self, resolution: u32) -> Self {
        self.config = self.config.with_resolution(resolution);
        self
    }

    pub fn resolutions(mut self, resolutions: ZoomResolutions) -> Self {
        self.config = self.config.with_resolutions(resolutions);
        self
    }

    pub fn block_size(mut self, block_size: u32) -> Self {
        self.config = self.config.with_block_size(block_size);
        self
    }

    /// Reject tiles finer than `max_zoom`.
    pub fn max_zoom(mut self, max_zoom: i32) -> Self {
        self.max_zoom = Some(max_zoom);
        self
    }

    /// Store kept entirely in memory.
    pub fn memory<T: CellValue>(&self) -> Result<HeatMap<T, MemoryBackend>> {
        self.build(MemoryBackend::new())
    }

    /// Store with one file per tile below `root`.
    pub fn directory<T: CellValue>(&self, root: impl AsRef<Path>) -> Result<HeatMap<T, DirectoryBackend>> {
        self.build(DirectoryBackend::open(root)?)
    }

    /// Store of a single zoom in one file. The zoom also becomes the maximum
    /// zoom of the store.
    pub fn single_file<T: CellValue>(
        &self,
        path: impl AsRef<Path>,
        zoom: i32,
    ) -> Result<HeatMap<T, SingleFileBackend>> {
        let backend = SingleFileBackend::open(path, zoom, self.config.resolution_for(zoom))?;
        let store = self.build(backend)?;
        Ok(store.with_max_zoom(zoom))
    }

    /// Store over any backend.
    pub fn build<T: CellValue, B: TileBackend>(&self, backend: B) -> Result<HeatMap<T, B>> {
        self.config.validate()?;
        let store = HeatMap::with_resolutions(backend, self.config.resolutions.clone())
            .with_block_size(self.config.block_size);
        Ok(match self.max_zoom {
            Some(max_zoom) => store.with_max_zoom(max_zoom),
            None => store,
        })
    }
}

impl Default for HeatMapBuilder {
    fn default() -> Self {
        Self::new()
    }
}
