//! Registry Error Types
//!
//! All registry operations return `Result<T>`, aliased to
//! `Result<T, MetadataError>`, so sqlx and migration failures propagate with `?`.
//!
//! ## Error Categories
//!
//! - `EmptyParameterSet`: a batch without parameters has no group
//! - `DatabaseError`: SQLite operation failed (connection, query, etc.)
//! - `MigrationError`: schema setup failed on startup
//! - `CorruptGroup`: a stored row could not be decoded back into ids

use parchive_core::GroupId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetadataError>;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Parameter set is empty")]
    EmptyParameterSet,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Group {group_id} is corrupt: {reason}")]
    CorruptGroup { group_id: i64, reason: String },

    #[error("Group id {0} out of range")]
    GroupIdOutOfRange(i64),
}

impl From<sqlx::migrate::MigrateError> for MetadataError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        MetadataError::MigrationError(e.to_string())
    }
}

impl MetadataError {
    pub(crate) fn corrupt(group_id: GroupId, reason: impl Into<String>) -> Self {
        MetadataError::CorruptGroup {
            group_id: group_id as i64,
            reason: reason.into(),
        }
    }
}
