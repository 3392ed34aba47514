//! Rendering stored tiles as Mapbox vector tiles.
//!
//! Every non-zero cell becomes one point feature placed at the top-left
//! corner of its pixel. An attribute closure decides which cells are kept and
//! which tags they carry.

use crate::TileCoord;
use crate::error::Result;
use crate::heatmap::{CellValue, HeatMap};
use crate::storage::TileBackend;
use crate::tile_index::TileTransform;
use heattile_types::packed::PackedCount;
use mvt::{GeomEncoder, GeomType, Tile};
use smallvec::{SmallVec, smallvec};
use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_LAYER_NAME: &str = "heatmap";
pub const DEFAULT_EXTENT: u32 = 4096;

/// Tag value attached to a point feature.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Uint(u64),
    Double(f64),
    Text(String),
}

pub type Attributes = SmallVec<[(&'static str, Attribute); 2]>;

/// One non-zero cell ready to be encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct PointFeature {
    pub x: u32,
    pub y: u32,
    pub longitude: f64,
    pub latitude: f64,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorTileOptions {
    pub layer_name: String,
    pub extent: u32,
}

impl Default for VectorTileOptions {
    fn default() -> Self {
        Self {
            layer_name: DEFAULT_LAYER_NAME.to_string(),
            extent: DEFAULT_EXTENT,
        }
    }
}

/// Tags a plain counter with its value under `cost`.
pub fn cost_attributes<T: CellValue>(value: T) -> Option<Attributes> {
    Some(smallvec![("cost", Attribute::Uint(value.to_u64()))])
}

/// Tags a packed counter with its decoded `users` and `trips`.
pub fn packed_attributes(value: u64) -> Option<Attributes> {
    let count = PackedCount::from_raw(value);
    Some(smallvec![
        ("users", Attribute::Uint(count.users as u64)),
        ("trips", Attribute::Uint(count.trips as u64)),
    ])
}

/// Collects the point features of one stored tile. Returns an empty list when
/// the tile doesn't exist. The store is flushed and unloaded afterwards.
pub fn tile_features<T, B, F>(
    store: &mut HeatMap<T, B>,
    tile: TileCoord,
    mut attributes: F,
) -> Result<Vec<PointFeature>>
where
    T: CellValue,
    B: TileBackend,
    F: FnMut(TileCoord, T) -> Option<Attributes>,
{
    let Some(stored) = store.try_get(tile)? else {
        return Ok(Vec::new());
    };
    let transform = TileTransform::for_tile(tile, stored.resolution());
    let features = stored
        .iter_nonzero()
        .filter_map(|(x, y, value)| {
            let attributes = attributes(tile, value)?;
            let (longitude, latitude) = transform.transform_to(x as i64, y as i64);
            Some(PointFeature {
                x,
                y,
                longitude,
                latitude,
                attributes,
            })
        })
        .collect();
    store.flush_and_unload()?;
    Ok(features)
}

/// Web Mercator position of a coordinate inside `tile`, scaled to `extent`.
/// Coordinates outside the tile fall outside `[0, extent]`.
pub fn project_to_extent(tile: TileCoord, longitude: f64, latitude: f64, extent: u32) -> (f64, f64) {
    let n = (1u64 << tile.zoom) as f64;
    let merc_x = (longitude + 180.0) / 360.0;
    let lat = latitude.to_radians();
    let merc_y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0;
    let extent = extent as f64;
    (
        (merc_x * n - tile.x as f64) * extent,
        (merc_y * n - tile.y as f64) * extent,
    )
}

/// Encodes point features as a single-layer vector tile. Returns `None` when
/// there is nothing to encode.
pub fn encode_vector_tile(
    tile: TileCoord,
    features: &[PointFeature],
    options: &VectorTileOptions,
) -> Result<Option<Vec<u8>>> {
    if features.is_empty() {
        return Ok(None);
    }
    let mut vector_tile = Tile::new(options.extent);
    let mut layer = vector_tile.create_layer(&options.layer_name);
    for feature in features {
        let (x, y) = project_to_extent(tile, feature.longitude, feature.latitude, options.extent);
        let geometry = GeomEncoder::new(GeomType::Point)
            .point(x.round(), y.round())?
            .encode()?;
        let mut encoded = layer.into_feature(geometry);
        for (key, value) in &feature.attributes {
            match value {
                Attribute::Uint(v) => encoded.add_tag_uint(key, *v),
                Attribute::Double(v) => encoded.add_tag_double(key, *v),
                Attribute::Text(v) => encoded.add_tag_string(key, v),
            }
        }
        layer = encoded.into_layer();
    }
    vector_tile.add_layer(layer)?;
    Ok(Some(vector_tile.to_bytes()?))
}

/// Path of a vector tile below `root`: `{root}/{z}/{x}/{y}.mvt`.
pub fn vector_tile_path(root: &Path, tile: TileCoord) -> PathBuf {
    root.join(tile.zoom.to_string())
        .join(tile.x.to_string())
        .join(format!("{}.mvt", tile.y))
}

/// Writes one vector tile per stored tile that yields features. Tiles
/// without features get no file, and a stale file is removed.
///
/// Returns the tiles that were written.
pub fn write_vector_tiles<T, B, F>(
    store: &mut HeatMap<T, B>,
    tiles: impl IntoIterator<Item = TileCoord>,
    root: &Path,
    options: &VectorTileOptions,
    mut attributes: F,
) -> Result<Vec<TileCoord>>
where
    T: CellValue,
    B: TileBackend,
    F: FnMut(TileCoord, T) -> Option<Attributes>,
{
    let mut written = Vec::new();
    for tile in tiles {
        let features = tile_features(store, tile, &mut attributes)?;
        let path = vector_tile_path(root, tile);
        match encode_vector_tile(tile, &features, options)? {
            Some(bytes) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, bytes)?;
                written.push(tile);
            }
            None => {
                if path.exists() {
                    fs::remove_file(&path)?;
                }
            }
        }
    }
    log::debug!("Wrote {} vector tiles to {}", written.len(), root.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use tempfile::TempDir;

    fn store_with_cells() -> (HeatMap<u32>, TileCoord) {
        let mut store: HeatMap<u32> = HeatMap::new(MemoryBackend::new(), 8);
        let tile = TileCoord::new(8390, 5496, 14);
        let stored = store.get_or_create(tile).unwrap();
        stored.set(1, 2, 3);
        stored.set(7, 7, 1);
        store.flush_and_unload().unwrap();
        (store, tile)
    }

    #[test]
    fn test_tile_features_positions() {
        let (mut store, tile) = store_with_cells();
        let features = tile_features(&mut store, tile, |_, v| cost_attributes(v)).unwrap();
        assert_eq!(features.len(), 2);

        let transform = TileTransform::for_tile(tile, 8);
        let first = &features[0];
        assert_eq!((first.x, first.y), (1, 2));
        assert_eq!((first.longitude, first.latitude), transform.transform_to(1, 2));
        assert_eq!(first.attributes[0], ("cost", Attribute::Uint(3)));
        assert_eq!(store.cached_tiles(), 0);
    }

    #[test]
    fn test_attribute_filter() {
        let (mut store, tile) = store_with_cells();
        let features =
            tile_features(&mut store, tile, |_, v| (v > 1).then(|| cost_attributes(v)).flatten())
                .unwrap();
        assert_eq!(features.len(), 1);
    }

    #[test]
    fn test_packed_attributes() {
        let attributes = packed_attributes(heattile_types::packed::encode(3, 11)).unwrap();
        assert_eq!(attributes[0], ("users", Attribute::Uint(3)));
        assert_eq!(attributes[1], ("trips", Attribute::Uint(11)));
    }

    #[test]
    fn test_project_to_extent_corners() {
        let tile = TileCoord::new(1, 1, 1);
        let (x, y) = project_to_extent(tile, 0.0, 0.0, 4096);
        assert!(x.abs() < 1e-6);
        assert!(y.abs() < 1e-6);
        let (x, _) = project_to_extent(tile, 180.0, -10.0, 4096);
        assert!((x - 4096.0).abs() < 1e-6);
    }

    #[test]
    fn test_encode_empty_is_none() {
        let tile = TileCoord::root();
        assert!(encode_vector_tile(tile, &[], &VectorTileOptions::default()).unwrap().is_none());
    }

    #[test]
    fn test_write_vector_tiles() {
        let (mut store, tile) = store_with_cells();
        let dir = TempDir::new().unwrap();
        let missing = TileCoord::new(0, 0, 14);

        let written = write_vector_tiles(
            &mut store,
            [tile, missing],
            dir.path(),
            &VectorTileOptions::default(),
            |_, v| cost_attributes(v),
        )
        .unwrap();

        assert_eq!(written, vec![tile]);
        let path = dir.path().join("14").join("8390").join("5496.mvt");
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
        assert!(!vector_tile_path(dir.path(), missing).exists());
    }
}
