//! Merging diffs into persistent stores.
//!
//! [`apply_diff`] streams every materialized tile of a [`SparseGrid`] into a
//! [`HeatMap`] and at the same time sums the values into the grid's companion
//! one zoom up, then repeats with that companion until `min_zoom` is written.
//! Coarse pixels are sums of the fine pixels beneath them, never averages.

use crate::TileCoord;
use crate::error::{HeatTileError, Result};
use crate::grid::SparseGrid;
use crate::heatmap::{CellValue, HeatMap};
use crate::storage::TileBackend;
use crate::tile_index;

/// Applies `diff` to `store` at the diff's zoom and every coarser zoom down to
/// `min_zoom`. `resolution_for` gives the companion grid resolution per zoom.
///
/// Returns the store tiles that were written, finest zoom first.
///
/// A store tile whose resolution differs from the grid's at the same zoom is
/// a fatal configuration error; tiles already written stay written.
pub fn apply_diff<T, B, F>(
    store: &mut HeatMap<T, B>,
    diff: &mut SparseGrid,
    min_zoom: i32,
    resolution_for: F,
) -> Result<Vec<TileCoord>>
where
    T: CellValue,
    B: TileBackend,
    F: Fn(i32) -> u32,
{
    let mut modified = Vec::new();
    let mut current = diff;
    while current.zoom() >= min_zoom {
        let mut next = if current.zoom() > min_zoom {
            let next_resolution = resolution_for(current.zoom() - 1);
            check_scale(current.resolution(), next_resolution)?;
            Some(current.take_one_level_up(next_resolution))
        } else {
            None
        };

        let level = apply_level(store, current, next.as_deref_mut());
        let Some(next) = next else {
            modified.extend(level?);
            break;
        };
        // Put the companion back before surfacing errors so it stays memoized.
        let level_current = current;
        level_current.restore_one_level_up(next);
        modified.extend(level?);
        current = match level_current.one_level_up_mut() {
            Some(next) => next,
            None => break,
        };
    }
    Ok(modified)
}

/// Applies a single zoom level, optionally summing into `next`.
fn apply_level<T, B>(
    store: &mut HeatMap<T, B>,
    diff: &SparseGrid,
    mut next: Option<&mut SparseGrid>,
) -> Result<Vec<TileCoord>>
where
    T: CellValue,
    B: TileBackend,
{
    let zoom = diff.zoom();
    let resolution = diff.resolution();
    let expected = store.resolution_for(zoom);
    if expected != resolution {
        return Err(HeatTileError::ResolutionMismatch {
            expected,
            actual: resolution,
        });
    }

    let tile_ids = diff.dirty_tiles();
    log::debug!(
        "Applying {} tiles at zoom {} (resolution {})",
        tile_ids.len(),
        zoom,
        resolution
    );

    let scale = next
        .as_deref()
        .map(|next| (resolution * 2 / next.resolution()) as i64);

    let mut modified = Vec::with_capacity(tile_ids.len());
    for tile_id in tile_ids {
        let coord = tile_index::tile_coord(zoom, tile_id);
        let (origin_x, origin_y) = diff.tile_origin(tile_id);
        let tile = store.get_or_create(coord)?;
        if tile.resolution() != resolution {
            return Err(HeatTileError::ResolutionMismatch {
                expected: tile.resolution(),
                actual: resolution,
            });
        }

        for (x, y, value) in diff.tile_cells_nonzero(tile_id) {
            tile.add_assign(x, y, T::from_count(value));
            if let (Some(next), Some(scale)) = (next.as_deref_mut(), scale) {
                next.add_assign(
                    (origin_x + x as i64) / scale,
                    (origin_y + y as i64) / scale,
                    value,
                );
            }
        }

        store.flush_and_unload()?;
        log::trace!("Applied tile {}", coord);
        modified.push(coord);
    }
    Ok(modified)
}

/// A coarse tile covers 2x2 fine tiles, so its resolution must be derivable
/// from the fine one.
fn check_scale(resolution: u32, next_resolution: u32) -> Result<()> {
    if !tile_index::can_derive_resolution(resolution, next_resolution) {
        return Err(HeatTileError::Config(format!(
            "resolution {} at the coarser zoom can't be derived from resolution {}",
            next_resolution, resolution
        )));
    }
    Ok(())
}

/// Copies `tiles` from `source` into `target`, combining every non-zero source
/// cell with the current target cell through `translate(tile, (x, y), target,
/// source)`. Both stores must share the resolution of each tile.
///
/// Returns the tiles that exist in `source` and were visited.
pub fn add_tiles_to<S, SB, T, TB, F>(
    source: &mut HeatMap<S, SB>,
    target: &mut HeatMap<T, TB>,
    tiles: impl IntoIterator<Item = TileCoord>,
    mut translate: F,
) -> Result<Vec<TileCoord>>
where
    S: CellValue,
    SB: TileBackend,
    T: CellValue,
    TB: TileBackend,
    F: FnMut(TileCoord, (u32, u32), T, S) -> T,
{
    let mut visited = Vec::new();
    for coord in tiles {
        let Some(source_tile) = source.try_get(coord)? else {
            continue;
        };
        let resolution = source_tile.resolution();
        let cells: Vec<(u32, u32, S)> = source_tile.iter_nonzero().collect();
        source.flush_and_unload()?;

        let target_tile = target.get_or_create(coord)?;
        if target_tile.resolution() != resolution {
            return Err(HeatTileError::ResolutionMismatch {
                expected: target_tile.resolution(),
                actual: resolution,
            });
        }
        for (x, y, value) in cells {
            let current = target_tile.get(x, y);
            target_tile.set(x, y, translate(coord, (x, y), current, value));
        }
        target.flush_and_unload()?;
        visited.push(coord);
    }
    Ok(visited)
}
