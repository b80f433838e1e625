//! Lease Manager: claim a batch under a time-bounded lock, then finalize each item.
//!
//! The claim is a conditional update that only locks rows still claimable at
//! `now`, so two overlapping runs never both hold the same item. Leases are
//! never released explicitly on crash; they simply expire.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::QueueItem;
use crate::store::StoreGateway;
use crate::{Error, Result};

#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn StoreGateway>,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn StoreGateway>) -> Self {
        Self { store }
    }

    /// Select up to `limit` claimable items and lock them until `now + lease`.
    ///
    /// Returns only the items this call actually locked, in selection order.
    /// Items taken by a concurrent claim between select and lock are dropped.
    #[tracing::instrument(level = "info", skip(self), fields(claimed = tracing::field::Empty))]
    pub async fn claim_batch(
        &self,
        limit: usize,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| Error::InvalidInput(format!("lease duration: {e}")))?;
        let lease_until = now + lease;

        let selected = self.store.select_claimable(limit, now).await?;
        if selected.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = selected.iter().map(|i| i.entity_id).collect();
        let locked: HashSet<i64> = self
            .store
            .claim(&ids, lease_until, now)
            .await?
            .into_iter()
            .collect();

        if locked.len() < ids.len() {
            tracing::warn!(
                selected = ids.len(),
                locked = locked.len(),
                "some selected items were claimed concurrently"
            );
        }

        let claimed: Vec<QueueItem> = selected
            .into_iter()
            .filter(|item| locked.contains(&item.entity_id))
            .map(|mut item| {
                item.locked_until = Some(lease_until);
                item.last_attempt = Some(now);
                item
            })
            .collect();
        tracing::Span::current().record("claimed", claimed.len() as u64);
        Ok(claimed)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn finalize_success(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        self.store.finalize_success(id, now).await?;
        tracing::debug!(id, "item completed");
        Ok(())
    }

    /// Release the lease and count the failure. Returns the new `error_count`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn finalize_failure(&self, id: i64) -> Result<i64> {
        let error_count = self.store.finalize_failure(id).await?;
        tracing::debug!(id, error_count, "item returned to queue");
        Ok(error_count)
    }
}
