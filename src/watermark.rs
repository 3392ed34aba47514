//! Resumption state between batches.
//!
//! The watermark records the last contribution whose effects are fully
//! applied and flushed. It is only advanced after a successful batch, so a
//! failure replays exactly the same window on the next run.

use crate::error::Result;
use crate::source::SequenceKey;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

pub const STATE_FILE_NAME: &str = "state.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Last processed contribution, `None` before the first batch
    #[serde(default)]
    pub last: Option<SequenceKey>,
}

impl Watermark {
    pub fn new(last: SequenceKey) -> Self {
        Self { last: Some(last) }
    }

    /// Reads the watermark, falling back to the initial one when the file
    /// doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes the watermark through a temporary file and a rename, so readers
    /// see either the previous or the new state.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let temp_path = path.with_extension("json.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
            file.sync_data()?;
        }
        fs::rename(&temp_path, path)?;
        log::debug!("Watermark advanced to {:?}", self.last);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_watermark_is_initial() {
        let dir = TempDir::new().unwrap();
        let watermark = Watermark::load(&dir.path().join(STATE_FILE_NAME)).unwrap();
        assert_eq!(watermark.last, None);
    }

    #[test]
    fn test_watermark_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(STATE_FILE_NAME);
        Watermark::new(SequenceKey::Id(1234)).save(&path).unwrap();

        assert_eq!(
            Watermark::load(&path).unwrap(),
            Watermark::new(SequenceKey::Id(1234))
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_watermark_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STATE_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Watermark::load(&path).is_err());
    }
}
