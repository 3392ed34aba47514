//! Error types for the heattile engine.
//!
//! Configuration and format errors are fatal for the running apply pass;
//! callers are expected to stop and resume from the last watermark.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HeatTileError>;

#[derive(Debug, Error)]
pub enum HeatTileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Resolutions don't match: expected {expected}, found {actual}")]
    ResolutionMismatch { expected: u32, actual: u32 },

    #[error("Cell width doesn't match: expected {expected} bytes, found {actual}")]
    ValueWidthMismatch { expected: u32, actual: u32 },

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Zoom {zoom} is finer than the maximum zoom {max_zoom} of this store")]
    UnsupportedZoom { zoom: i32, max_zoom: i32 },

    #[error("Store holds zoom {expected}, requested zoom {actual}")]
    ZoomMismatch { expected: i32, actual: i32 },

    #[error("Unexpected geometry in clip result: {0}")]
    UnexpectedGeometry(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Vector tile error: {0}")]
    VectorTile(#[from] mvt::Error),
}

impl HeatTileError {
    /// Whether this error only concerns a single input feature and the batch may continue.
    pub fn is_per_feature(&self) -> bool {
        matches!(self, HeatTileError::UnexpectedGeometry(_))
    }
}
