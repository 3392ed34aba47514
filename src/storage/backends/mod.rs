//! Storage backend implementations.
//!
//! - `MemoryBackend`: in-memory map of payloads, for tests and transient stores
//! - `DirectoryBackend`: one file per tile under `{root}/{zoom}/{x}/{y}.heatmap`
//! - `SingleFileBackend`: all tiles of one zoom in a single seekable file

mod directory;
mod memory;
mod single_file;

pub use directory::DirectoryBackend;
pub use memory::MemoryBackend;
pub use single_file::SingleFileBackend;
