//! Rebuilding coarse tiles from the finer tiles already in a store.
//!
//! Used after finer tiles were changed by something other than the diff
//! cascade (privacy masking for instance), so ancestors have to be derived
//! from the corrected data instead of the original diff.

use crate::TileCoord;
use crate::error::{HeatTileError, Result};
use crate::heatmap::{CellValue, HeatMap};
use crate::storage::TileBackend;
use crate::tile_index;
use std::collections::{BTreeMap, BTreeSet};

/// Replaces `tile` with the sum of its up to four children one zoom finer.
///
/// When no child holds data the tile is left absent rather than stored as an
/// empty tile. Returns whether the tile exists afterwards.
pub fn rebuild_tile<T, B>(store: &mut HeatMap<T, B>, tile: TileCoord) -> Result<bool>
where
    T: CellValue,
    B: TileBackend,
{
    let child_zoom = tile.zoom + 1;
    let parent_resolution = store.resolution_for(tile.zoom);
    let child_resolution = store.resolution_for(child_zoom);
    if !tile_index::can_derive_resolution(child_resolution, parent_resolution) {
        return Err(HeatTileError::Config(format!(
            "resolution {} at zoom {} can't be derived from resolution {} at zoom {}",
            parent_resolution, tile.zoom, child_resolution, child_zoom
        )));
    }
    let scale = child_resolution * 2 / parent_resolution;
    let quadrant = parent_resolution / 2;

    store.try_remove(tile)?;

    let mut cells: Vec<(u32, u32, T)> = Vec::new();
    for child in tile_index::sub_tiles_for(tile, child_zoom) {
        let Some(child_tile) = store.try_get(child)? else {
            continue;
        };
        let offset_x = (child.x - tile.x * 2) * quadrant;
        let offset_y = (child.y - tile.y * 2) * quadrant;
        cells.extend(
            child_tile
                .iter_nonzero()
                .map(|(x, y, value)| (offset_x + x / scale, offset_y + y / scale, value)),
        );
    }

    if cells.is_empty() {
        store.flush_and_unload()?;
        return Ok(false);
    }

    let parent = store.get_or_create(tile)?;
    for (x, y, value) in cells {
        parent.add_assign(x, y, value);
    }
    store.flush_and_unload()?;
    Ok(true)
}

/// Rebuilds every ancestor of `seeds`, level by level from the finest zoom up
/// to the root. Each ancestor is rebuilt once, after all of its rebuilt
/// descendants.
///
/// Returns the rebuilt tiles in processing order.
pub fn rebuild_parent_tile_tree<T, B>(
    store: &mut HeatMap<T, B>,
    seeds: impl IntoIterator<Item = TileCoord>,
) -> Result<Vec<TileCoord>>
where
    T: CellValue,
    B: TileBackend,
{
    rebuild_parent_tile_tree_to(store, seeds, 0)
}

/// Like [`rebuild_parent_tile_tree`], but stops after `min_zoom`.
pub fn rebuild_parent_tile_tree_to<T, B>(
    store: &mut HeatMap<T, B>,
    seeds: impl IntoIterator<Item = TileCoord>,
    min_zoom: i32,
) -> Result<Vec<TileCoord>>
where
    T: CellValue,
    B: TileBackend,
{
    let mut pending: BTreeMap<i32, BTreeSet<TileCoord>> = BTreeMap::new();
    for seed in seeds {
        if seed.zoom > min_zoom {
            let parent = tile_index::parent_tile_for(seed, seed.zoom - 1);
            pending.entry(parent.zoom).or_default().insert(parent);
        }
    }

    let mut rebuilt = Vec::new();
    while let Some((zoom, level)) = pending.pop_last() {
        log::debug!("Rebuilding {} tiles at zoom {}", level.len(), zoom);
        for tile in level {
            rebuild_tile(store, tile)?;
            rebuilt.push(tile);
            if zoom > min_zoom {
                pending
                    .entry(zoom - 1)
                    .or_default()
                    .insert(tile_index::parent_tile_for(tile, zoom - 1));
            }
        }
    }
    Ok(rebuilt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use heattile_types::resolution::ZoomResolutions;

    fn store() -> HeatMap<u32> {
        HeatMap::new(MemoryBackend::new(), 4)
    }

    #[test]
    fn test_rebuild_sums_children() {
        let mut heatmap = store();
        let parent = TileCoord::new(0, 0, 1);
        for (i, child) in tile_index::sub_tiles_for(parent, 2).enumerate() {
            let tile = heatmap.get_or_create(child).unwrap();
            tile.set(0, 0, 1 + i as u32);
            tile.set(1, 1, 10);
            tile.set(3, 2, 100);
        }
        heatmap.flush_and_unload().unwrap();

        assert!(rebuild_tile(&mut heatmap, parent).unwrap());
        let rebuilt = heatmap.try_get(parent).unwrap().unwrap();
        // children order: (0,0), (1,0), (0,1), (1,1)
        assert_eq!(rebuilt.get(0, 0), 1 + 10);
        assert_eq!(rebuilt.get(2, 0), 2 + 10);
        assert_eq!(rebuilt.get(0, 2), 3 + 10);
        assert_eq!(rebuilt.get(2, 2), 4 + 10);
        assert_eq!(rebuilt.get(1, 1), 100);
        assert_eq!(rebuilt.get(3, 3), 100);
        assert_eq!(rebuilt.iter_nonzero().count(), 8);
    }

    #[test]
    fn test_rebuild_without_children_leaves_absent() {
        let mut heatmap = store();
        let parent = TileCoord::new(1, 0, 1);
        heatmap.get_or_create(parent).unwrap().set(2, 2, 9);
        heatmap.flush_and_unload().unwrap();

        assert!(!rebuild_tile(&mut heatmap, parent).unwrap());
        assert!(!heatmap.contains(parent).unwrap());
        assert!(heatmap.tiles().unwrap().is_empty());
    }

    #[test]
    fn test_rebuild_tree_reaches_root() {
        let mut heatmap = store();
        let seed = TileCoord::new(5, 6, 3);
        heatmap.get_or_create(seed).unwrap().set(3, 3, 7);
        heatmap.flush_and_unload().unwrap();

        let rebuilt = rebuild_parent_tile_tree(&mut heatmap, [seed, seed]).unwrap();
        assert_eq!(
            rebuilt,
            vec![
                TileCoord::new(2, 3, 2),
                TileCoord::new(1, 1, 1),
                TileCoord::root()
            ]
        );
        let root = heatmap.try_get(TileCoord::root()).unwrap().unwrap();
        assert_eq!(root.iter_nonzero().map(|(_, _, v)| v).sum::<u32>(), 7);
    }

    #[test]
    fn test_rebuild_with_bad_resolution_keeps_tile() {
        let resolutions = ZoomResolutions::uniform(64).with_override(0, 100);
        let mut heatmap: HeatMap<u32> =
            HeatMap::with_resolutions(MemoryBackend::new(), resolutions);
        let root = TileCoord::root();
        heatmap.get_or_create(root).unwrap().set(5, 5, 42);
        heatmap.flush().unwrap();

        assert!(matches!(
            rebuild_tile(&mut heatmap, root),
            Err(HeatTileError::Config(_))
        ));
        assert_eq!(heatmap.try_get(root).unwrap().unwrap().get(5, 5), 42);
    }

    #[test]
    fn test_rebuild_tree_stops_at_min_zoom() {
        let mut heatmap = store();
        let seed = TileCoord::new(5, 6, 3);
        heatmap.get_or_create(seed).unwrap().set(0, 0, 1);
        heatmap.flush_and_unload().unwrap();

        let rebuilt = rebuild_parent_tile_tree_to(&mut heatmap, [seed], 2).unwrap();
        assert_eq!(rebuilt, vec![TileCoord::new(2, 3, 2)]);
        assert!(!heatmap.contains(TileCoord::new(1, 1, 1)).unwrap());
    }
}
