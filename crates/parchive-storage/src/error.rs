//! Storage Error Types
//!
//! Errors raised by the realtime filler, its queues, the write-back
//! dispatcher and the object store archive.
//!
//! ## Error Categories
//!
//! ### Queue Errors
//! - `QueueEmpty`: `start()` was asked of a queue without live segments
//!
//! ### Ingestion Errors
//! - `GroupResolution`: the group registry could not map a parameter set
//! - `ShuttingDown`: the filler no longer accepts batches
//!
//! ### Archive Errors
//! - `ArchiveWrite`: a segment could not be persisted
//! - `ObjectStoreError`: low-level object store operation failed
//! - `SegmentError`: encoding, decoding or integrity check failed
//!
//! ### Configuration Errors
//! - `Config`: a configuration file was unreadable or invalid
//!
//! ## Usage
//!
//! All storage operations return `Result<T>` which is aliased to
//! `Result<T, Error>`. This allows clean error propagation with `?`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Segment queue is empty")]
    QueueEmpty,

    #[error("Group id resolution failed: {0}")]
    GroupResolution(#[from] parchive_metadata::MetadataError),

    #[error("Filler is shutting down")]
    ShuttingDown,

    #[error("Archive write failed: {0}")]
    ArchiveWrite(String),

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),

    #[error("Segment error: {0}")]
    SegmentError(#[from] parchive_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
