use crate::error::{HeatTileError, Result};
use crate::tile_index::{self, MAX_ZOOM};
use crate::vector_tile::{DEFAULT_EXTENT, DEFAULT_LAYER_NAME, VectorTileOptions};
use heattile_types::resolution::ZoomResolutions;
use serde::{Deserialize, Serialize};

/// Heat map configuration.
///
/// # Examples
///
/// ```rust
/// use heattile::Config;
///
/// let config = Config::default()
///     .with_zoom(12)
///     .with_user_threshold(3);
/// assert!(config.validate().is_ok());
///
/// let json = r#"{ "zoom": 10, "resolutions": { "default": 256 } }"#;
/// let config = Config::from_json_str(json).unwrap();
/// assert_eq!(config.resolution_for(10), 256);
/// assert_eq!(config.min_zoom, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Zoom level contributions are rasterized at
    #[serde(default = "Config::default_zoom")]
    pub zoom: i32,

    /// Coarsest zoom kept up to date
    #[serde(default)]
    pub min_zoom: i32,

    /// Pixels per tile side, per zoom
    #[serde(default)]
    pub resolutions: ZoomResolutions,

    /// Cells per allocation block inside a tile
    #[serde(default = "Config::default_block_size")]
    pub block_size: u32,

    /// Minimum number of distinct users before a pixel is published
    #[serde(default = "Config::default_user_threshold")]
    pub user_threshold: u32,

    /// Maximum contributions taken from the source per batch
    #[serde(default = "Config::default_max_contributions")]
    pub max_contributions: usize,

    /// Vector tile layer name
    #[serde(default = "Config::default_layer_name")]
    pub layer_name: String,

    /// Vector tile extent
    #[serde(default = "Config::default_extent")]
    pub extent: u32,
}

impl Config {
    const fn default_zoom() -> i32 {
        14
    }

    const fn default_block_size() -> u32 {
        64
    }

    const fn default_user_threshold() -> u32 {
        1
    }

    const fn default_max_contributions() -> usize {
        10_000
    }

    fn default_layer_name() -> String {
        DEFAULT_LAYER_NAME.to_string()
    }

    const fn default_extent() -> u32 {
        DEFAULT_EXTENT
    }

    pub fn with_zoom(mut self, zoom: i32) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_min_zoom(mut self, min_zoom: i32) -> Self {
        self.min_zoom = min_zoom;
        self
    }

    pub fn with_resolutions(mut self, resolutions: ZoomResolutions) -> Self {
        self.resolutions = resolutions;
        self
    }

    /// Same tile resolution at every zoom.
    pub fn with_resolution(self, resolution: u32) -> Self {
        self.with_resolutions(ZoomResolutions::uniform(resolution))
    }

    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_user_threshold(mut self, threshold: u32) -> Self {
        self.user_threshold = threshold;
        self
    }

    pub fn with_max_contributions(mut self, max: usize) -> Self {
        self.max_contributions = max;
        self
    }

    pub fn with_layer_name(mut self, name: impl Into<String>) -> Self {
        self.layer_name = name.into();
        self
    }

    pub fn with_extent(mut self, extent: u32) -> Self {
        self.extent = extent;
        self
    }

    pub fn resolution_for(&self, zoom: i32) -> u32 {
        self.resolutions.for_zoom(zoom)
    }

    pub fn vector_tile_options(&self) -> VectorTileOptions {
        VectorTileOptions {
            layer_name: self.layer_name.clone(),
            extent: self.extent,
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !(0..=MAX_ZOOM).contains(&self.zoom) {
            return Err(HeatTileError::Config(format!(
                "Zoom must be between 0 and {}",
                MAX_ZOOM
            )));
        }
        if self.min_zoom < 0 || self.min_zoom > self.zoom {
            return Err(HeatTileError::Config(
                "Minimum zoom must be between 0 and the zoom".to_string(),
            ));
        }
        if self.resolutions.all().any(|resolution| resolution == 0) {
            return Err(HeatTileError::Config(
                "Resolutions must be greater than zero".to_string(),
            ));
        }
        for zoom in (self.min_zoom + 1)..=self.zoom {
            let fine = self.resolution_for(zoom);
            let coarse = self.resolution_for(zoom - 1);
            if !tile_index::can_derive_resolution(fine, coarse) {
                return Err(HeatTileError::Config(format!(
                    "Resolution {} at zoom {} can't be derived from resolution {} at zoom {}",
                    coarse,
                    zoom - 1,
                    fine,
                    zoom
                )));
            }
        }
        if self.block_size == 0 {
            return Err(HeatTileError::Config(
                "Block size must be greater than zero".to_string(),
            ));
        }
        if self.user_threshold > u8::MAX as u32 {
            return Err(HeatTileError::Config(format!(
                "User threshold can't exceed {}, the user mask saturates there",
                u8::MAX
            )));
        }
        if self.max_contributions == 0 {
            return Err(HeatTileError::Config(
                "Maximum contributions must be greater than zero".to_string(),
            ));
        }
        if self.extent == 0 {
            return Err(HeatTileError::Config(
                "Vector tile extent must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as JSON string
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load configuration from TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(toml_str).map_err(|e| HeatTileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            zoom: Self::default_zoom(),
            min_zoom: 0,
            resolutions: ZoomResolutions::default(),
            block_size: Self::default_block_size(),
            user_threshold: Self::default_user_threshold(),
            max_contributions: Self::default_max_contributions(),
            layer_name: Self::default_layer_name(),
            extent: Self::default_extent(),
        }
    }
}
