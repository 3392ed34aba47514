//! Multi-user heat map updates with a privacy threshold.
//!
//! Every user gets a private store of raw crossings. A pixel only shows up in
//! the public heat map once at least `user_threshold` distinct users crossed
//! it. Layout below the data directory:
//!
//! ```text
//! {data}/state.json                 watermark
//! {data}/users/{user}/{z}/{x}/{y}.heatmap
//! {data}/tiles/{z}/{x}/{y}.users    users per tile, one per line
//! {data}/heatmap-mask/...           distinct users per pixel (u8)
//! {data}/heatmap-cache/...          public heat map (u32)
//! ```

use crate::TileCoord;
use crate::apply::{add_tiles_to, apply_diff};
use crate::config::Config;
use crate::error::{HeatTileError, Result};
use crate::grid::SparseGrid;
use crate::heatmap::HeatMap;
use crate::raster::rasterize_all;
use crate::rebuild::rebuild_parent_tile_tree_to;
use crate::source::{Contribution, ContributionSource, SequenceKey};
use crate::storage::DirectoryBackend;
use crate::vector_tile::{cost_attributes, write_vector_tiles};
use crate::watermark::{STATE_FILE_NAME, Watermark};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const USERS_DIR: &str = "users";
const USER_INDEX_DIR: &str = "tiles";
const MASK_DIR: &str = "heatmap-mask";
const HEATMAP_DIR: &str = "heatmap-cache";

/// Which users touched which tile.
#[derive(Debug, Clone)]
pub struct UserIndex {
    root: PathBuf,
}

impl UserIndex {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path(&self, tile: TileCoord) -> PathBuf {
        self.root
            .join(tile.zoom.to_string())
            .join(tile.x.to_string())
            .join(format!("{}.users", tile.y))
    }

    /// Users recorded for `tile`, in insertion order.
    pub fn users(&self, tile: TileCoord) -> Result<Vec<String>> {
        match fs::read_to_string(self.path(tile)) {
            Ok(content) => Ok(content
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Records `user` for `tile`. Returns false if it was already there.
    pub fn add(&self, tile: TileCoord, user: &str) -> Result<bool> {
        validate_user_id(user)?;
        let mut users = self.users(tile)?;
        if users.iter().any(|known| known == user) {
            return Ok(false);
        }
        users.push(user.to_string());

        let path = self.path(tile);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("users.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            for known in &users {
                writeln!(file, "{}", known)?;
            }
            file.sync_data()?;
        }
        fs::rename(&temp_path, &path)?;
        Ok(true)
    }
}

/// User ids end up in paths and in line-based index files.
fn validate_user_id(user: &str) -> Result<()> {
    let invalid = user.is_empty()
        || user == "."
        || user == ".."
        || user.contains(['/', '\\', '\0', '\n', '\r']);
    if invalid {
        return Err(HeatTileError::InvalidInput(format!(
            "invalid user id {:?}",
            user
        )));
    }
    Ok(())
}

/// Summary of one processed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub contributions: usize,
    pub users: usize,
    /// Watermark after the batch
    pub watermark: Option<SequenceKey>,
    /// Public heat map tiles that were rebuilt, sorted
    pub updated_tiles: Vec<TileCoord>,
}

/// Keeps the per-user stores, the mask and the public heat map in step.
pub struct HeatMapUpdater {
    config: Config,
    data_dir: PathBuf,
    index: UserIndex,
    mask: HeatMap<u8, DirectoryBackend>,
    heatmap: HeatMap<u32, DirectoryBackend>,
}

impl HeatMapUpdater {
    /// Opens the data directory, creating it when missing.
    pub fn open<P: AsRef<Path>>(data_dir: P, config: Config) -> Result<Self> {
        config.validate()?;
        let data_dir = data_dir.as_ref().to_path_buf();
        let index = UserIndex::open(data_dir.join(USER_INDEX_DIR))?;
        let mask = HeatMap::with_resolutions(
            DirectoryBackend::open(data_dir.join(MASK_DIR))?,
            config.resolutions.clone(),
        )
        .with_block_size(config.block_size)
        .with_max_zoom(config.zoom);
        let heatmap = HeatMap::with_resolutions(
            DirectoryBackend::open(data_dir.join(HEATMAP_DIR))?,
            config.resolutions.clone(),
        )
        .with_block_size(config.block_size)
        .with_max_zoom(config.zoom);

        log::info!(
            "Opened heat map data at {} (zoom {}, user threshold {})",
            data_dir.display(),
            config.zoom,
            config.user_threshold
        );
        Ok(Self {
            config,
            data_dir,
            index,
            mask,
            heatmap,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join(STATE_FILE_NAME)
    }

    pub fn watermark(&self) -> Result<Watermark> {
        Watermark::load(&self.state_path())
    }

    pub fn user_index(&self) -> &UserIndex {
        &self.index
    }

    /// The public heat map.
    pub fn heatmap(&mut self) -> &mut HeatMap<u32, DirectoryBackend> {
        &mut self.heatmap
    }

    /// Distinct users per pixel at the configured zoom.
    pub fn mask(&mut self) -> &mut HeatMap<u8, DirectoryBackend> {
        &mut self.mask
    }

    /// Opens the private store of one user.
    pub fn user_heatmap(&self, user: &str) -> Result<HeatMap<u32, DirectoryBackend>> {
        validate_user_id(user)?;
        let backend = DirectoryBackend::open(self.data_dir.join(USERS_DIR).join(user))?;
        Ok(HeatMap::with_resolutions(backend, self.config.resolutions.clone())
            .with_block_size(self.config.block_size)
            .with_max_zoom(self.config.zoom))
    }

    /// Processes the next batch from `source` and advances the watermark once
    /// everything is flushed. On error the watermark is left untouched.
    pub fn process<S: ContributionSource>(&mut self, mut source: S) -> Result<BatchOutcome> {
        let watermark = self.watermark()?;
        let contributions =
            source.contributions_after(watermark.last, self.config.max_contributions)?;
        let Some(last) = contributions.last().map(|c| c.key) else {
            log::debug!("No contributions after {:?}", watermark.last);
            return Ok(BatchOutcome {
                contributions: 0,
                users: 0,
                watermark: watermark.last,
                updated_tiles: Vec::new(),
            });
        };

        let mut per_user: BTreeMap<&str, Vec<&Contribution>> = BTreeMap::new();
        for contribution in &contributions {
            validate_user_id(&contribution.user_id)?;
            per_user
                .entry(contribution.user_id.as_str())
                .or_default()
                .push(contribution);
        }

        let mut modified = BTreeSet::new();
        for (user, user_contributions) in &per_user {
            modified.extend(self.apply_user_contributions(user, user_contributions)?);
        }
        let updated_tiles = self.update_tiles(modified)?;

        Watermark::new(last).save(&self.state_path())?;
        log::info!(
            "Processed {} contributions from {} users, {} tiles updated",
            contributions.len(),
            per_user.len(),
            updated_tiles.len()
        );
        Ok(BatchOutcome {
            contributions: contributions.len(),
            users: per_user.len(),
            watermark: Some(last),
            updated_tiles,
        })
    }

    /// Draws one user's tracks into their private store and records the user
    /// on every touched tile. Returns the touched tiles at the configured zoom.
    pub fn apply_user_contributions(
        &self,
        user: &str,
        contributions: &[&Contribution],
    ) -> Result<Vec<TileCoord>> {
        let zoom = self.config.zoom;
        let mut diff = SparseGrid::new(zoom, self.config.resolution_for(zoom));
        let drawn = rasterize_all(&mut diff, contributions.iter().map(|c| &c.geometry), 1);
        if drawn < contributions.len() {
            log::warn!(
                "Skipped {} contributions of {} without a segment",
                contributions.len() - drawn,
                user
            );
        }

        let mut store = self.user_heatmap(user)?;
        let modified = apply_diff(&mut store, &mut diff, zoom, |z| self.config.resolution_for(z))?;
        for tile in &modified {
            self.index.add(*tile, user)?;
        }
        log::debug!("User {} touched {} tiles", user, modified.len());
        Ok(modified)
    }

    /// Rebuilds mask and public tiles for `tiles` at the configured zoom and
    /// then every ancestor down to `min_zoom`. Returns the updated public
    /// tiles, sorted.
    pub fn update_tiles(
        &mut self,
        tiles: impl IntoIterator<Item = TileCoord>,
    ) -> Result<Vec<TileCoord>> {
        let tiles: BTreeSet<TileCoord> = tiles.into_iter().collect();
        let threshold = self.config.user_threshold;

        for &tile in &tiles {
            self.update_mask_tile(tile, threshold)?;
        }

        let mut updated = BTreeSet::new();
        for &tile in &tiles {
            self.update_heatmap_tile(tile, threshold)?;
            updated.insert(tile);
        }

        let parents = rebuild_parent_tile_tree_to(
            &mut self.heatmap,
            tiles.iter().copied(),
            self.config.min_zoom,
        )?;
        updated.extend(parents);
        Ok(updated.into_iter().collect())
    }

    fn update_mask_tile(&mut self, tile: TileCoord, threshold: u32) -> Result<()> {
        self.mask.try_remove(tile)?;
        let users = self.index.users(tile)?;
        if (users.len() as u32) < threshold {
            log::trace!("Tile {} has {} users, below threshold", tile, users.len());
            return Ok(());
        }
        for user in &users {
            let mut store = self.user_heatmap(user)?;
            add_tiles_to(&mut store, &mut self.mask, [tile], |_, _, current: u8, _| {
                current.saturating_add(1)
            })?;
        }
        Ok(())
    }

    fn update_heatmap_tile(&mut self, tile: TileCoord, threshold: u32) -> Result<()> {
        self.heatmap.try_remove(tile)?;
        let Some(mask) = self.mask.try_get(tile)?.cloned() else {
            return Ok(());
        };
        self.mask.flush_and_unload()?;

        for user in self.index.users(tile)? {
            let mut store = self.user_heatmap(&user)?;
            add_tiles_to(
                &mut store,
                &mut self.heatmap,
                [tile],
                |_, (x, y), current: u32, value: u32| {
                    if (mask.get(x, y) as u32) < threshold.max(1) {
                        current
                    } else {
                        current.saturating_add(value)
                    }
                },
            )?;
        }
        Ok(())
    }

    /// Writes `{output}/{z}/{x}/{y}.mvt` for `tiles` of the public heat map,
    /// and the mask tiles among them below `{output}/mask`.
    pub fn write_vector_tiles(
        &mut self,
        tiles: &[TileCoord],
        output: &Path,
    ) -> Result<Vec<TileCoord>> {
        let options = self.config.vector_tile_options();
        let written = write_vector_tiles(
            &mut self.heatmap,
            tiles.iter().copied(),
            output,
            &options,
            |_, value| cost_attributes(value),
        )?;
        let zoom = self.config.zoom;
        write_vector_tiles(
            &mut self.mask,
            tiles.iter().copied().filter(|tile| tile.zoom == zoom),
            &output.join("mask"),
            &options,
            |_, users| cost_attributes(users),
        )?;
        Ok(written)
    }
}
