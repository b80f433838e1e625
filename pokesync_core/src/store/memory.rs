use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::StoreGateway;
use crate::models::{PokemonRecord, QueueItem, QueueStatus, QueueStats};
use crate::{Error, Result};

#[derive(Default)]
struct Tables {
    queue: BTreeMap<i64, QueueItem>,
    entities: BTreeMap<i64, PokemonRecord>,
}

/// In-memory gateway for local development and unit tests.
///
/// One mutex guards both tables, so each operation is atomic like a single
/// SQL statement would be.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a queue row as-is (primarily for tests).
    pub async fn put_queue_item(&self, item: QueueItem) {
        self.tables.lock().await.queue.insert(item.entity_id, item);
    }

    /// Snapshot of all entity rows (primarily for tests).
    pub async fn entities(&self) -> Vec<PokemonRecord> {
        self.tables.lock().await.entities.values().cloned().collect()
    }
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn select_claimable(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        let tables = self.tables.lock().await;
        let mut out: Vec<QueueItem> = tables
            .queue
            .values()
            .filter(|item| item.is_claimable(now))
            .cloned()
            .collect();
        // `None < Some(_)`, so never-attempted rows sort first; ties break on id.
        out.sort_by_key(|item| (item.last_attempt, item.entity_id));
        out.truncate(limit);
        Ok(out)
    }

    async fn claim(
        &self,
        ids: &[i64],
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        let mut tables = self.tables.lock().await;
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(item) = tables.queue.get_mut(id) else {
                continue;
            };
            if !item.is_claimable(now) {
                continue;
            }
            item.locked_until = Some(lease_until);
            item.last_attempt = Some(now);
            claimed.push(*id);
        }
        Ok(claimed)
    }

    async fn finalize_success(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let item = tables
            .queue
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("queue item {id}")))?;
        item.status = QueueStatus::Completed;
        item.completed_at = Some(now);
        item.locked_until = None;
        Ok(())
    }

    async fn finalize_failure(&self, id: i64) -> Result<i64> {
        let mut tables = self.tables.lock().await;
        let item = tables
            .queue
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("queue item {id}")))?;
        item.status = QueueStatus::Pending;
        item.locked_until = None;
        item.error_count += 1;
        Ok(item.error_count)
    }

    async fn upsert_entity(&self, record: &PokemonRecord) -> Result<()> {
        self.tables
            .lock()
            .await
            .entities
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn enqueue(&self, ids: &[i64]) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut inserted = 0;
        for id in ids {
            if !tables.queue.contains_key(id) {
                tables.queue.insert(*id, QueueItem::pending(*id));
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn get_queue_item(&self, id: i64) -> Result<Option<QueueItem>> {
        Ok(self.tables.lock().await.queue.get(&id).cloned())
    }

    async fn get_entity(&self, id: i64) -> Result<Option<PokemonRecord>> {
        Ok(self.tables.lock().await.entities.get(&id).cloned())
    }

    async fn queue_stats(&self, now: DateTime<Utc>) -> Result<QueueStats> {
        let tables = self.tables.lock().await;
        let mut stats = QueueStats::default();
        for item in tables.queue.values() {
            match item.status {
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Pending if item.is_claimable(now) => stats.pending += 1,
                QueueStatus::Pending => stats.locked += 1,
            }
            stats.total_errors += item.error_count.max(0) as u64;
        }
        Ok(stats)
    }

    async fn migrate(&self) -> Result<()> {
        Ok(())
    }
}
