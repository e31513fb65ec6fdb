//! Error Types for parchive-core
//!
//! ## Error Categories
//!
//! ### Data Integrity Errors
//! - `InvalidMagic`: Segment blob doesn't start/end with "PARC"
//! - `CrcMismatch`: Data corruption detected via checksum
//! - `InvalidSegment`: Malformed or truncated segment data
//!
//! ### Version/Compatibility Errors
//! - `UnsupportedVersion`: Segment was written by a newer codec
//! - `InvalidCompression`: Unknown compression type id
//! - `UnknownValueType`: Unknown value tag inside a column
//!
//! ### Compression Errors
//! - `CompressionError` / `Decompression`
//!
//! ### Shape Errors
//! - `ColumnMismatch`: A sample carries a different number of values than the group has parameters

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    #[error("Invalid compression type: {0}")]
    InvalidCompression(u16),

    #[error("CRC mismatch")]
    CrcMismatch,

    #[error("Invalid segment: {0}")]
    InvalidSegment(String),

    #[error("Unknown value type tag: {0}")]
    UnknownValueType(u8),

    #[error("Column mismatch: group has {expected} parameters, sample has {actual} values")]
    ColumnMismatch { expected: usize, actual: usize },

    #[error("Compression error: {0}")]
    CompressionError(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;
