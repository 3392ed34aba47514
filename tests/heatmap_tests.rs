use geo::LineString;
use heattile::raster::Bresenham;
use heattile::tile_index::{self, TileTransform};
use heattile::{
    DirectoryBackend, HeatMap, HeatMapBuilder, HeatTileError, MemoryBackend, SingleFileBackend,
    SparseGrid, TileBackend, TileCoord, apply_diff, rasterize_linestring, rebuild_parent_tile_tree,
};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Geographic centre of a pixel, so rounding never moves it to a neighbour.
fn pixel_centre(transform: &TileTransform, x: i64, y: i64) -> (f64, f64) {
    let (left, top) = transform.transform_to(x, y);
    let (right, bottom) = transform.transform_to(x + 1, y + 1);
    ((left + right) / 2.0, (top + bottom) / 2.0)
}

#[test]
fn test_diagonal_track_end_to_end() {
    init_logging();
    let zoom = 14;
    let resolution = 64;
    let tile = TileCoord::new(8424, 5497, zoom);
    let transform = TileTransform::for_tile(tile, resolution);

    let start = pixel_centre(&transform, 0, 0);
    let end = pixel_centre(&transform, 3, 3);
    let line = LineString::from(vec![start, end]);

    let mut diff = SparseGrid::new(zoom, resolution);
    rasterize_linestring(&mut diff, &line, 1);

    let tile_id = tile_index::local_id_of(tile);
    let mut cells: Vec<_> = diff.tile_cells_nonzero(tile_id).collect();
    cells.sort_unstable();
    assert_eq!(cells, vec![(0, 0, 1), (1, 1, 1), (2, 2, 1), (3, 3, 1)]);

    let mut store: HeatMap<u32> = HeatMap::new(MemoryBackend::new(), resolution);
    let written = apply_diff(&mut store, &mut diff, zoom - 2, |_| resolution).unwrap();
    let parent = TileCoord::new(8424 / 2, 5497 / 2, zoom - 1);
    let grandparent = TileCoord::new(8424 / 4, 5497 / 4, zoom - 2);
    assert_eq!(written, vec![tile, parent, grandparent]);

    let stored = store.try_get(tile).unwrap().unwrap();
    let mut stored_cells: Vec<_> = stored.iter_nonzero().collect();
    stored_cells.sort_unstable();
    assert_eq!(stored_cells, cells);

    // 8424 is even and 5497 odd: the tile is the bottom-left quadrant of its
    // parent, so the diagonal starts at (0, 32) and folds 2x2 pixels into one
    let parent_tile = store.try_get(parent).unwrap().unwrap();
    let mut parent_cells: Vec<_> = parent_tile.iter_nonzero().collect();
    parent_cells.sort_unstable();
    assert_eq!(parent_cells, vec![(0, 32, 2), (1, 33, 2)]);

    let top = store.try_get(grandparent).unwrap().unwrap();
    assert_eq!(top.iter_nonzero().map(|(_, _, v)| v).sum::<u32>(), 4);
}

#[test]
fn test_sequential_diffs_accumulate() {
    init_logging();
    let mut store: HeatMap<u32> = HeatMap::new(MemoryBackend::new(), 16);

    let mut first = SparseGrid::new(3, 16);
    first.add_assign(5, 5, 3);
    apply_diff(&mut store, &mut first, 3, |_| 16).unwrap();

    let mut second = SparseGrid::new(3, 16);
    second.add_assign(5, 5, 4);
    apply_diff(&mut store, &mut second, 3, |_| 16).unwrap();

    let tile = store.try_get(TileCoord::new(0, 0, 3)).unwrap().unwrap();
    assert_eq!(tile.get(5, 5), 7);
}

#[test]
fn test_cascade_matches_fine_sums() {
    init_logging();
    let zoom = 5;
    let resolution = 8;
    let mut diff = SparseGrid::new(zoom, resolution);
    let mut total = 0u64;
    for (i, (x, y)) in [(0, 0), (1, 0), (9, 3), (17, 40), (100, 200), (255, 255)]
        .into_iter()
        .enumerate()
    {
        diff.add_assign(x, y, i as u32 + 1);
        total += i as u64 + 1;
    }

    let mut store: HeatMap<u32> = HeatMap::new(MemoryBackend::new(), resolution);
    apply_diff(&mut store, &mut diff, 0, |_| resolution).unwrap();

    for level in 0..=zoom {
        let sum: u64 = store
            .tiles_at(level)
            .unwrap()
            .into_iter()
            .map(|tile| {
                let stored = store.try_get(tile).unwrap().unwrap();
                stored.iter_nonzero().map(|(_, _, v)| v as u64).sum::<u64>()
            })
            .sum();
        assert_eq!(sum, total, "zoom {}", level);
    }

    // pixels (0,0) and (1,0) at zoom 5 land in the same pixel one zoom up
    let parent = store.try_get(TileCoord::new(0, 0, 4)).unwrap().unwrap();
    assert_eq!(parent.get(0, 0), 3);
}

#[test]
fn test_coarser_resolution_cascade() {
    init_logging();
    let resolutions = heattile::ZoomResolutions::uniform(4).with_override(2, 8);
    let mut store: HeatMap<u32> = HeatMap::with_resolutions(MemoryBackend::new(), resolutions.clone());

    let mut diff = SparseGrid::new(2, 8);
    diff.add_assign(0, 0, 1);
    diff.add_assign(3, 3, 1);
    diff.add_assign(4, 4, 1);
    apply_diff(&mut store, &mut diff, 1, |z| resolutions.for_zoom(z)).unwrap();

    // 8 px at zoom 2 to 4 px at zoom 1: one coarse pixel per 4x4 fine block
    let parent = store.try_get(TileCoord::new(0, 0, 1)).unwrap().unwrap();
    assert_eq!(parent.get(0, 0), 2);
    assert_eq!(parent.get(1, 1), 1);
}

#[test]
fn test_saturating_cells() {
    let mut store: HeatMap<u8> = HeatMap::new(MemoryBackend::new(), 4);
    let mut diff = SparseGrid::new(0, 4);
    diff.add_assign(1, 1, 300);
    apply_diff(&mut store, &mut diff, 0, |_| 4).unwrap();
    let tile = store.try_get(TileCoord::root()).unwrap().unwrap();
    assert_eq!(tile.get(1, 1), u8::MAX);
}

#[test]
fn test_resolution_mismatch_is_fatal() {
    init_logging();
    let mut store: HeatMap<u32> = HeatMap::new(MemoryBackend::new(), 16);
    let mut diff = SparseGrid::new(3, 8);
    diff.add_assign(1, 1, 1);
    let result = apply_diff(&mut store, &mut diff, 3, |_| 8);
    assert!(matches!(result, Err(HeatTileError::ResolutionMismatch { .. })));
}

#[test]
fn test_directory_store_persists() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let tile = TileCoord::new(3, 5, 4);
    {
        let mut store: HeatMap<u32, DirectoryBackend> =
            HeatMap::new(DirectoryBackend::open(dir.path()).unwrap(), 32);
        let mut diff = SparseGrid::new(4, 32);
        diff.add_assign(3 * 32 + 10, 5 * 32 + 20, 6);
        apply_diff(&mut store, &mut diff, 2, |_| 32).unwrap();
    }

    assert!(dir.path().join("4").join("3").join("5.heatmap").exists());
    let mut reopened: HeatMap<u32, DirectoryBackend> =
        HeatMap::new(DirectoryBackend::open(dir.path()).unwrap(), 32);
    assert_eq!(reopened.try_get(tile).unwrap().unwrap().get(10, 20), 6);
    assert_eq!(reopened.tiles_at(2).unwrap(), vec![TileCoord::new(0, 1, 2)]);

    assert!(reopened.try_remove(tile).unwrap());
    assert!(!dir.path().join("4").join("3").join("5.heatmap").exists());
    assert!(!reopened.try_remove(tile).unwrap());
}

#[test]
fn test_directory_store_rejects_other_resolution() {
    let dir = TempDir::new().unwrap();
    let tile = TileCoord::new(0, 0, 1);
    {
        let mut store: HeatMap<u32, DirectoryBackend> =
            HeatMap::new(DirectoryBackend::open(dir.path()).unwrap(), 8);
        store.get_or_create(tile).unwrap().set(1, 1, 1);
        store.flush().unwrap();
    }
    let mut other: HeatMap<u32, DirectoryBackend> =
        HeatMap::new(DirectoryBackend::open(dir.path()).unwrap(), 16);
    assert!(matches!(
        other.try_get(tile),
        Err(HeatTileError::ResolutionMismatch { expected: 16, actual: 8 })
    ));
}

#[test]
fn test_single_file_store_persists() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("zoom6.tiles");
    let builder = HeatMapBuilder::new().resolution(16);
    {
        let mut store = builder.single_file::<u64>(&path, 6).unwrap();
        let mut diff = SparseGrid::new(6, 16);
        diff.add_assign(40, 40, 2);
        diff.add_assign(1000, 10, 5);
        apply_diff(&mut store, &mut diff, 6, |_| 16).unwrap();
    }

    let mut store = builder.single_file::<u64>(&path, 6).unwrap();
    assert_eq!(
        store.tiles().unwrap(),
        vec![TileCoord::new(62, 0, 6), TileCoord::new(2, 2, 6)]
    );
    assert_eq!(store.try_get(TileCoord::new(2, 2, 6)).unwrap().unwrap().get(8, 8), 2);
    assert_eq!(store.try_get(TileCoord::new(62, 0, 6)).unwrap().unwrap().get(8, 10), 5);

    assert!(matches!(
        SingleFileBackend::open(&path, 7, 16),
        Err(HeatTileError::ZoomMismatch { expected: 6, actual: 7 })
    ));
}

#[test]
fn test_rebuild_after_masking() {
    init_logging();
    let mut store: HeatMap<u32> = HeatMap::new(MemoryBackend::new(), 8);
    let mut diff = SparseGrid::new(3, 8);
    diff.add_assign(2, 2, 5);
    diff.add_assign(60, 60, 1);
    apply_diff(&mut store, &mut diff, 0, |_| 8).unwrap();

    // drop single crossings in the finest tiles, then re-derive the pyramid
    let fine = store.tiles_at(3).unwrap();
    for &tile in &fine {
        let stored = store.get_or_create(tile).unwrap();
        stored.update_in_place(|_, _, v| if v < 2 { 0 } else { v });
    }
    store.flush_and_unload().unwrap();
    assert_eq!(store.tiles_at(3).unwrap(), vec![TileCoord::new(0, 0, 3)]);

    let rebuilt = rebuild_parent_tile_tree(&mut store, fine).unwrap();
    assert_eq!(rebuilt.last(), Some(&TileCoord::root()));
    assert_eq!(store.tiles_at(2).unwrap(), vec![TileCoord::new(0, 0, 2)]);
    assert!(!store.contains(TileCoord::new(3, 3, 2)).unwrap());
    let root = store.try_get(TileCoord::root()).unwrap().unwrap();
    assert_eq!(root.iter_nonzero().map(|(_, _, v)| v).sum::<u32>(), 5);
}

#[test]
fn test_bresenham_includes_endpoints() {
    let points: Vec<_> = Bresenham::new(0, 0, 5, 2).collect();
    assert_eq!(points.first(), Some(&(0, 0)));
    assert_eq!(points.last(), Some(&(5, 2)));
    assert_eq!(points.len(), 6);
}

#[test]
fn test_backend_stats() {
    let mut store: HeatMap<u32> = HeatMap::new(MemoryBackend::new(), 4);
    store.tile_mut(0, 0, 1).unwrap().set(0, 0, 1);
    store.tile_mut(1, 0, 1).unwrap().set(0, 0, 1);
    store.flush().unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.tile_count, 2);
    assert!(store.backend().contains(TileCoord::new(1, 0, 1)).unwrap());
}
