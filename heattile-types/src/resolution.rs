use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pixels per tile side, per zoom level.
///
/// Zooms without an override use `default`. The finest zoom of a heat map
/// usually runs at full resolution while coarser zooms use half of it.
///
/// # Examples
///
/// ```
/// use heattile_types::resolution::ZoomResolutions;
///
/// let resolutions = ZoomResolutions::uniform(256).with_override(14, 512);
/// assert_eq!(resolutions.for_zoom(14), 512);
/// assert_eq!(resolutions.for_zoom(13), 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoomResolutions {
    pub default: u32,
    #[serde(default)]
    pub overrides: BTreeMap<i32, u32>,
}

impl ZoomResolutions {
    /// Same resolution at every zoom.
    pub fn uniform(resolution: u32) -> Self {
        Self {
            default: resolution,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, zoom: i32, resolution: u32) -> Self {
        self.overrides.insert(zoom, resolution);
        self
    }

    pub fn for_zoom(&self, zoom: i32) -> u32 {
        self.overrides.get(&zoom).copied().unwrap_or(self.default)
    }

    /// Iterates over every configured resolution, default first.
    pub fn all(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::once(self.default).chain(self.overrides.values().copied())
    }
}

impl Default for ZoomResolutions {
    fn default() -> Self {
        Self::uniform(512)
    }
}
