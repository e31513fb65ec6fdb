//! Parchive Parameter Group Registry
//!
//! The realtime filler keeps one segment queue per *parameter group*: the set
//! of parameter ids that arrive together in a batch. This crate maps each
//! distinct set to a stable numeric group id and remembers the mapping across
//! restarts, so data archived yesterday and data archived today for the same
//! set end up under the same group.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐  resolve_group_id(&[1, 4, 9])  ┌─────────────────────┐
//! │ RealtimeFiller │ ─────────────────────────────▶ │ CachedGroupIdStore  │
//! └────────────────┘                                │  (LRU, hot path)    │
//!                                                   └──────────┬──────────┘
//!                                                              │ miss
//!                                                   ┌──────────▼──────────┐
//!                                                   │ SqliteGroupIdStore  │
//!                                                   │  (parameter_groups) │
//!                                                   └─────────────────────┘
//! ```
//!
//! ## Usage Example
//!
//! ```ignore
//! use parchive_metadata::{CachedGroupIdStore, GroupIdStore, SqliteGroupIdStore};
//!
//! let store = CachedGroupIdStore::new(SqliteGroupIdStore::new("groups.db").await?);
//!
//! let a = store.resolve_group_id(&[1, 4, 9]).await?;
//! let b = store.resolve_group_id(&[1, 4, 9]).await?;
//! assert_eq!(a, b);
//!
//! assert_eq!(store.get_parameter_ids(a).await?, Some(vec![1, 4, 9]));
//! ```
//!
//! ## Group Ids
//!
//! - Ids are allocated on first sight of a set and never reused
//! - The store canonicalises its input: `[9, 1, 4]` and `[1, 4, 9]` resolve to
//!   the same group
//! - An empty set has no group and is rejected

pub mod cached_store;
pub mod error;
pub mod store;
pub mod types;

pub use cached_store::{CacheConfig, CacheMetrics, CachedGroupIdStore};
pub use error::{MetadataError, Result};
pub use store::SqliteGroupIdStore;
pub use types::ParameterGroup;

use async_trait::async_trait;
use parchive_core::{GroupId, ParameterId};

/// Registry of parameter groups.
///
/// Implementations must be safe to call from many tasks at once and must hand
/// out the same id for the same set no matter which caller asks first.
#[async_trait]
pub trait GroupIdStore: Send + Sync {
    /// Return the group id of a parameter set, creating the group if needed.
    ///
    /// # Errors
    ///
    /// - `EmptyParameterSet`: `parameter_ids` is empty
    /// - `DatabaseError`: the backing store failed
    async fn resolve_group_id(&self, parameter_ids: &[ParameterId]) -> Result<GroupId>;

    /// Sorted parameter ids of a group, or `None` for an unknown group.
    async fn get_parameter_ids(&self, group_id: GroupId) -> Result<Option<Vec<ParameterId>>>;

    /// All known groups in allocation order.
    async fn list_groups(&self) -> Result<Vec<ParameterGroup>>;
}

/// Sort and deduplicate a parameter set.
pub(crate) fn canonical_ids(parameter_ids: &[ParameterId]) -> Result<Vec<ParameterId>> {
    if parameter_ids.is_empty() {
        return Err(MetadataError::EmptyParameterSet);
    }

    let mut ids = parameter_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}
