//! Cached Group Registry
//!
//! Every batch the filler receives needs its group id, so the registry lookup
//! sits on the hot ingestion path. This wrapper keeps recently used mappings in
//! two LRU caches, one per direction:
//!
//! - parameter set → group id (what `resolve_group_id` needs)
//! - group id → parameter set (what readers need)
//!
//! Mappings never change once allocated, so entries have no TTL and nothing is
//! ever invalidated; the LRU bound only limits memory.
//!
//! ## Usage
//!
//! ```ignore
//! let sqlite = SqliteGroupIdStore::new("groups.db").await?;
//! let store = CachedGroupIdStore::with_config(sqlite, CacheConfig { capacity: 50_000 });
//!
//! store.resolve_group_id(&[1, 2]).await?; // miss, hits SQLite
//! store.resolve_group_id(&[1, 2]).await?; // hit
//! assert_eq!(store.metrics().hit_rate(), 0.5);
//! ```

use crate::{canonical_ids, GroupIdStore, ParameterGroup, Result};
use async_trait::async_trait;
use lru::LruCache;
use parchive_core::{GroupId, ParameterId};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Configuration for the caching layer
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of groups kept in each direction
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

/// Cache performance metrics
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    pub hits: Arc<AtomicU64>,
    pub misses: Arc<AtomicU64>,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

type IdsCache = Arc<RwLock<LruCache<Vec<ParameterId>, GroupId>>>;
type GroupCache = Arc<RwLock<LruCache<GroupId, Vec<ParameterId>>>>;

/// Group registry with an LRU caching layer
pub struct CachedGroupIdStore<S: GroupIdStore> {
    inner: Arc<S>,

    /// sorted parameter ids → group id
    by_ids: IdsCache,

    /// group id → sorted parameter ids
    by_group: GroupCache,

    metrics: CacheMetrics,
}

impl<S: GroupIdStore> CachedGroupIdStore<S> {
    /// Create a cached store with default configuration
    pub fn new(inner: S) -> Self {
        Self::with_config(inner, CacheConfig::default())
    }

    pub fn with_config(inner: S, config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            inner: Arc::new(inner),
            by_ids: Arc::new(RwLock::new(LruCache::new(capacity))),
            by_group: Arc::new(RwLock::new(LruCache::new(capacity))),
            metrics: CacheMetrics::new(),
        }
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Clear both caches (useful for testing)
    pub async fn clear_cache(&self) {
        self.by_ids.write().await.clear();
        self.by_group.write().await.clear();
    }

    fn hit(&self) {
        self.metrics.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl<S: GroupIdStore> GroupIdStore for CachedGroupIdStore<S> {
    async fn resolve_group_id(&self, parameter_ids: &[ParameterId]) -> Result<GroupId> {
        let ids = canonical_ids(parameter_ids)?;

        // LruCache::get updates recency, so it needs the write lock
        if let Some(&group_id) = self.by_ids.write().await.get(&ids) {
            self.hit();
            return Ok(group_id);
        }
        self.miss();

        let group_id = self.inner.resolve_group_id(&ids).await?;

        self.by_group.write().await.put(group_id, ids.clone());
        self.by_ids.write().await.put(ids, group_id);

        Ok(group_id)
    }

    async fn get_parameter_ids(&self, group_id: GroupId) -> Result<Option<Vec<ParameterId>>> {
        if let Some(ids) = self.by_group.write().await.get(&group_id) {
            self.hit();
            return Ok(Some(ids.clone()));
        }
        self.miss();

        let ids = self.inner.get_parameter_ids(group_id).await?;
        if let Some(ids) = &ids {
            self.by_group.write().await.put(group_id, ids.clone());
        }

        Ok(ids)
    }

    async fn list_groups(&self) -> Result<Vec<ParameterGroup>> {
        self.inner.list_groups().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteGroupIdStore;

    async fn store() -> CachedGroupIdStore<SqliteGroupIdStore> {
        CachedGroupIdStore::new(SqliteGroupIdStore::new_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_second_resolve_is_a_hit() {
        let store = store().await;

        let a = store.resolve_group_id(&[5, 6]).await.unwrap();
        let b = store.resolve_group_id(&[6, 5]).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(store.metrics().hits.load(Ordering::Relaxed), 1);
        assert_eq!(store.metrics().misses.load(Ordering::Relaxed), 1);
        assert_eq!(store.metrics().hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_resolve_warms_reverse_lookup() {
        let store = store().await;

        let group = store.resolve_group_id(&[1, 2, 3]).await.unwrap();
        store.metrics().reset();

        assert_eq!(
            store.get_parameter_ids(group).await.unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(store.metrics().hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_cleared_cache_falls_through() {
        let store = store().await;

        let before = store.resolve_group_id(&[9]).await.unwrap();
        store.clear_cache().await;
        let after = store.resolve_group_id(&[9]).await.unwrap();

        assert_eq!(before, after);
        assert_eq!(store.metrics().misses.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_capacity_one_still_correct() {
        let sqlite = SqliteGroupIdStore::new_in_memory().await.unwrap();
        let store = CachedGroupIdStore::with_config(sqlite, CacheConfig { capacity: 0 });

        let a = store.resolve_group_id(&[1]).await.unwrap();
        let b = store.resolve_group_id(&[2]).await.unwrap();
        assert_eq!(store.resolve_group_id(&[1]).await.unwrap(), a);
        assert_eq!(store.resolve_group_id(&[2]).await.unwrap(), b);
    }

    #[tokio::test]
    async fn test_unknown_group_not_cached() {
        let store = store().await;
        assert_eq!(store.get_parameter_ids(77).await.unwrap(), None);
        assert_eq!(store.get_parameter_ids(77).await.unwrap(), None);
        assert_eq!(store.metrics().misses.load(Ordering::Relaxed), 2);
    }
}
