//! Store Gateway: row-level access to the queue and entity tables.
//!
//! Every mutation is a single statement against persistent state; nothing is
//! cached between calls. Time-dependent operations take `now` explicitly.

pub mod memory;
pub mod postgres;
pub mod sqlite;
mod test_support;

use crate::config::StoreConfig;
use crate::models::{PokemonRecord, QueueItem, QueueStats};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Up to `limit` claimable items, oldest `last_attempt` first (never-attempted first).
    async fn select_claimable(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<QueueItem>>;

    /// Lock `ids` until `lease_until` and stamp `last_attempt = now`, in one statement.
    ///
    /// Only rows still claimable at `now` are touched; the ids actually locked
    /// are returned. `status` is never changed.
    async fn claim(
        &self,
        ids: &[i64],
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>>;

    /// `status = completed`, `completed_at = now`, `locked_until = NULL`.
    async fn finalize_success(&self, id: i64, now: DateTime<Utc>) -> Result<()>;

    /// `status = pending`, `locked_until = NULL`, `error_count + 1` as one store-side
    /// increment. Returns the new count.
    async fn finalize_failure(&self, id: i64) -> Result<i64>;

    /// Insert or replace the entity row keyed by `record.id`.
    async fn upsert_entity(&self, record: &PokemonRecord) -> Result<()>;

    /// Create pending queue rows for `ids`, leaving existing rows untouched.
    /// Returns how many rows were inserted.
    async fn enqueue(&self, ids: &[i64]) -> Result<u64>;

    async fn get_queue_item(&self, id: i64) -> Result<Option<QueueItem>>;

    async fn get_entity(&self, id: i64) -> Result<Option<PokemonRecord>>;

    async fn queue_stats(&self, now: DateTime<Utc>) -> Result<QueueStats>;

    /// Create tables and indexes if missing.
    async fn migrate(&self) -> Result<()>;
}

/// Open the gateway selected by `cfg` and apply migrations.
#[tracing::instrument(level = "info", skip_all)]
pub async fn connect(cfg: &StoreConfig) -> Result<Arc<dyn StoreGateway>> {
    cfg.validate()?;
    let store: Arc<dyn StoreGateway> = match cfg {
        StoreConfig::Postgres {
            url,
            max_connections,
            acquire_timeout,
        } => Arc::new(PostgresStore::connect(url, *max_connections, *acquire_timeout).await?),
        StoreConfig::Sqlite { path } => Arc::new(SqliteStore::new(path).await?),
    };
    store.migrate().await?;
    Ok(store)
}
