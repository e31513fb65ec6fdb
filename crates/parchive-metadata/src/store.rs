//! SQLite Group Registry
//!
//! Persists the parameter-set to group-id mapping in a single
//! `parameter_groups` table. The sorted ids are stored joined by `,` under a
//! UNIQUE constraint, which doubles as the lookup index and makes concurrent
//! first registrations of the same set converge on one row.
//!
//! ## Usage
//!
//! ### File-Based (Production)
//! ```ignore
//! let store = SqliteGroupIdStore::new("groups.db").await?;
//! ```
//!
//! ### In-Memory (Testing)
//! ```ignore
//! let store = SqliteGroupIdStore::new_in_memory().await?;
//! ```
//!
//! ## Implementation Details
//!
//! - Migrations run on startup via `sqlx::migrate!`
//! - Registration is `INSERT .. ON CONFLICT DO NOTHING` followed by a lookup,
//!   so a racing registration from another task simply finds the winner's row
//! - The in-memory database lives in one connection; the pool is pinned to it

use crate::{canonical_ids, GroupIdStore, MetadataError, ParameterGroup, Result};
use async_trait::async_trait;
use parchive_core::{GroupId, ParameterId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

/// SQLite-backed [`GroupIdStore`]
pub struct SqliteGroupIdStore {
    pool: SqlitePool,
}

impl SqliteGroupIdStore {
    /// Open (or create) a registry database file
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))?
                .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!(path = %path.as_ref().display(), "Opened parameter group registry");

        Ok(Self { pool })
    }

    /// Create in-memory database (for testing)
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn lookup(&self, key: &str) -> Result<Option<GroupId>> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT group_id FROM parameter_groups WHERE parameter_ids = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        id.map(to_group_id).transpose()
    }
}

#[async_trait]
impl GroupIdStore for SqliteGroupIdStore {
    async fn resolve_group_id(&self, parameter_ids: &[ParameterId]) -> Result<GroupId> {
        let ids = canonical_ids(parameter_ids)?;
        let key = encode_key(&ids);

        if let Some(group_id) = self.lookup(&key).await? {
            return Ok(group_id);
        }

        sqlx::query(
            r#"
            INSERT INTO parameter_groups (parameter_ids, parameter_count, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(parameter_ids) DO NOTHING
            "#,
        )
        .bind(&key)
        .bind(ids.len() as i64)
        .bind(Self::now_ms())
        .execute(&self.pool)
        .await?;

        let group_id = self
            .lookup(&key)
            .await?
            .ok_or_else(|| sqlx::Error::RowNotFound)?;

        tracing::debug!(group_id, parameters = ids.len(), "Registered parameter group");

        Ok(group_id)
    }

    async fn get_parameter_ids(&self, group_id: GroupId) -> Result<Option<Vec<ParameterId>>> {
        let key: Option<String> =
            sqlx::query_scalar("SELECT parameter_ids FROM parameter_groups WHERE group_id = ?")
                .bind(group_id as i64)
                .fetch_optional(&self.pool)
                .await?;

        key.map(|key| decode_key(group_id, &key)).transpose()
    }

    async fn list_groups(&self) -> Result<Vec<ParameterGroup>> {
        let rows = sqlx::query(
            "SELECT group_id, parameter_ids, created_at FROM parameter_groups ORDER BY group_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<ParameterGroup> {
                let group_id = to_group_id(row.try_get("group_id")?)?;
                let key: String = row.try_get("parameter_ids")?;
                Ok(ParameterGroup {
                    group_id,
                    parameter_ids: decode_key(group_id, &key)?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

fn to_group_id(id: i64) -> Result<GroupId> {
    GroupId::try_from(id).map_err(|_| MetadataError::GroupIdOutOfRange(id))
}

fn encode_key(ids: &[ParameterId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn decode_key(group_id: GroupId, key: &str) -> Result<Vec<ParameterId>> {
    key.split(',')
        .map(|part| {
            part.parse::<ParameterId>()
                .map_err(|e| MetadataError::corrupt(group_id, format!("bad id {part:?}: {e}")))
        })
        .collect()
}
