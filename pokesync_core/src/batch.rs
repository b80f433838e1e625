//! Batch Processor: one invocation of the updater.
//!
//! Auth, then claim, then fetch/upsert/finalize per item. A failure on one item
//! only touches that item's queue row; only claim failures and the deadline
//! surface as a top-level error.

use std::sync::Arc;

use chrono::Utc;

use crate::auth::verify_bearer;
use crate::config::UpdaterConfig;
use crate::enricher::Enricher;
use crate::error::FetchError;
use crate::lease::LeaseManager;
use crate::models::{BatchReport, ItemResult};
use crate::store::StoreGateway;
use crate::{Error, Result};

#[derive(Clone)]
pub struct BatchProcessor {
    config: UpdaterConfig,
    leases: LeaseManager,
    store: Arc<dyn StoreGateway>,
    enricher: Arc<dyn Enricher>,
}

impl BatchProcessor {
    pub fn new(
        config: UpdaterConfig,
        store: Arc<dyn StoreGateway>,
        enricher: Arc<dyn Enricher>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            leases: LeaseManager::new(store.clone()),
            store,
            enricher,
        })
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Authenticated entry point used by the trigger surface.
    ///
    /// The credential is checked before the store or enricher is touched. The
    /// whole run is bounded by `invocation_deadline`; on expiry in-flight work
    /// is dropped and its leases are left to expire.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn invoke(&self, authorization: Option<&str>) -> Result<BatchReport> {
        verify_bearer(authorization, &self.config.auth_secret)?;
        self.run_with_deadline().await
    }

    /// `run` bounded by `invocation_deadline`, without the credential check.
    pub async fn run_with_deadline(&self) -> Result<BatchReport> {
        let deadline = self.config.invocation_deadline;
        match tokio::time::timeout(deadline, self.run()).await {
            Ok(report) => report,
            Err(_) => {
                tracing::error!(deadline_secs = deadline.as_secs(), "batch exceeded deadline");
                Err(Error::DeadlineExceeded {
                    seconds: deadline.as_secs(),
                })
            }
        }
    }

    /// Process one batch without the credential check or deadline.
    #[tracing::instrument(level = "info", skip_all, fields(batch_size = self.config.batch_size))]
    pub async fn run(&self) -> Result<BatchReport> {
        let claimed = self
            .leases
            .claim_batch(self.config.batch_size, self.config.lease_duration, Utc::now())
            .await?;
        if claimed.is_empty() {
            tracing::info!("nothing pending");
            return Ok(BatchReport::nothing_pending());
        }

        let mut results = Vec::with_capacity(claimed.len());
        for item in &claimed {
            results.push(self.process_item(item.entity_id).await);
        }

        let report = BatchReport::complete(results);
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "batch complete"
        );
        Ok(report)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn process_item(&self, id: i64) -> ItemResult {
        match self.update_item(id).await {
            Ok(()) => ItemResult::success(id),
            Err(err) => {
                tracing::warn!(id, error = %err, "item update failed");
                if let Err(finalize_err) = self.leases.finalize_failure(id).await {
                    // Lease expiry will release the row.
                    tracing::error!(id, error = %finalize_err, "failed to return item to queue");
                }
                ItemResult::error(id, err.to_string())
            }
        }
    }

    async fn update_item(&self, id: i64) -> Result<()> {
        let record = self.enricher.fetch(id).await?;
        if record.id != id {
            return Err(FetchError::malformed(format!(
                "requested id {id}, remote returned id {}",
                record.id
            ))
            .into());
        }
        self.store.upsert_entity(&record).await?;
        self.leases.finalize_success(id, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ItemOutcome, PokemonRecord, QueueItem, QueueStats, QueueStatus,
    };
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const SECRET: &str = "s3cret";
    const AUTH: Option<&str> = Some("Bearer s3cret");

    fn record(id: i64) -> PokemonRecord {
        PokemonRecord {
            id,
            name: format!("mon-{id}"),
            pokedex_number: id,
            types: vec!["normal".into()],
            weight: 10,
            height: 5,
            abilities: vec!["run-away".into()],
            stats: BTreeMap::from([("hp".to_string(), 40)]),
            image_url: None,
            color: None,
            generation: None,
            capture_rate: None,
            updated_at: Utc::now(),
        }
    }

    #[derive(Default)]
    struct FakeEnricher {
        calls: AtomicUsize,
        missing: HashSet<i64>,
        wrong_id: HashSet<i64>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Enricher for FakeEnricher {
        async fn fetch(&self, id: i64) -> std::result::Result<PokemonRecord, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.missing.contains(&id) {
                return Err(FetchError::PrimaryNotFound { id });
            }
            if self.wrong_id.contains(&id) {
                return Ok(record(id + 1000));
            }
            Ok(record(id))
        }
    }

    /// Delegates to a `MemoryStore`, counting calls and injecting failures.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        calls: AtomicUsize,
        fail_select: bool,
        fail_upsert_for: HashSet<i64>,
    }

    impl CountingStore {
        fn hit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StoreGateway for CountingStore {
        async fn select_claimable(
            &self,
            limit: usize,
            now: DateTime<Utc>,
        ) -> Result<Vec<QueueItem>> {
            self.hit();
            if self.fail_select {
                return Err(Error::store(
                    "select claimable",
                    std::io::Error::other("connection refused"),
                ));
            }
            self.inner.select_claimable(limit, now).await
        }

        async fn claim(
            &self,
            ids: &[i64],
            lease_until: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> Result<Vec<i64>> {
            self.hit();
            self.inner.claim(ids, lease_until, now).await
        }

        async fn finalize_success(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
            self.hit();
            self.inner.finalize_success(id, now).await
        }

        async fn finalize_failure(&self, id: i64) -> Result<i64> {
            self.hit();
            self.inner.finalize_failure(id).await
        }

        async fn upsert_entity(&self, record: &PokemonRecord) -> Result<()> {
            self.hit();
            if self.fail_upsert_for.contains(&record.id) {
                return Err(Error::store(
                    "upsert entity",
                    std::io::Error::other("constraint violation"),
                ));
            }
            self.inner.upsert_entity(record).await
        }

        async fn enqueue(&self, ids: &[i64]) -> Result<u64> {
            self.inner.enqueue(ids).await
        }

        async fn get_queue_item(&self, id: i64) -> Result<Option<QueueItem>> {
            self.inner.get_queue_item(id).await
        }

        async fn get_entity(&self, id: i64) -> Result<Option<PokemonRecord>> {
            self.inner.get_entity(id).await
        }

        async fn queue_stats(&self, now: DateTime<Utc>) -> Result<QueueStats> {
            self.inner.queue_stats(now).await
        }

        async fn migrate(&self) -> Result<()> {
            Ok(())
        }
    }

    fn processor(store: Arc<CountingStore>, enricher: Arc<FakeEnricher>) -> BatchProcessor {
        BatchProcessor::new(UpdaterConfig::new(SECRET), store, enricher).unwrap()
    }

    async fn item(store: &CountingStore, id: i64) -> QueueItem {
        store.get_queue_item(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn bad_credential_touches_nothing() {
        let store = Arc::new(CountingStore::default());
        store.enqueue(&[1, 2]).await.unwrap();
        let enricher = Arc::new(FakeEnricher::default());
        let p = processor(store.clone(), enricher.clone());

        for header in [None, Some("Bearer wrong"), Some("s3cret")] {
            let err = p.invoke(header).await.unwrap_err();
            assert!(matches!(err, Error::Unauthorized(_)), "{header:?}");
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 0);
        assert!(item(&store, 1).await.locked_until.is_none());
    }

    #[tokio::test]
    async fn empty_queue_reports_nothing_pending() {
        let store = Arc::new(CountingStore::default());
        let enricher = Arc::new(FakeEnricher::default());
        let p = processor(store.clone(), enricher.clone());

        let report = p.invoke(AUTH).await.unwrap();
        assert_eq!(report, BatchReport::nothing_pending());
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_the_rest() {
        let store = Arc::new(CountingStore::default());
        store.enqueue(&[1, 2, 3]).await.unwrap();
        let enricher = Arc::new(FakeEnricher {
            missing: HashSet::from([2]),
            ..Default::default()
        });
        let p = processor(store.clone(), enricher);

        let report = p.invoke(AUTH).await.unwrap();
        let results = report.results.clone().unwrap();
        let outcomes: Vec<(i64, ItemOutcome)> = results.iter().map(|r| (r.id, r.status)).collect();
        assert_eq!(
            outcomes,
            vec![
                (1, ItemOutcome::Success),
                (2, ItemOutcome::Error),
                (3, ItemOutcome::Success),
            ]
        );
        assert_eq!(report.message, BatchReport::BATCH_COMPLETE);

        for id in [1, 3] {
            let it = item(&store, id).await;
            assert_eq!(it.status, QueueStatus::Completed);
            assert!(it.completed_at.is_some());
            assert!(store.get_entity(id).await.unwrap().is_some());
        }
        let failed = item(&store, 2).await;
        assert_eq!(failed.status, QueueStatus::Pending);
        assert_eq!(failed.locked_until, None);
        assert_eq!(failed.error_count, 1);
        assert!(store.get_entity(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_failure_is_local_to_its_item() {
        let store = Arc::new(CountingStore {
            fail_upsert_for: HashSet::from([5]),
            ..Default::default()
        });
        store.enqueue(&[4, 5]).await.unwrap();
        let p = processor(store.clone(), Arc::new(FakeEnricher::default()));

        let report = p.invoke(AUTH).await.unwrap();
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(item(&store, 5).await.error_count, 1);
        assert_eq!(item(&store, 4).await.status, QueueStatus::Completed);
    }

    #[tokio::test]
    async fn mismatched_record_id_is_a_failure() {
        let store = Arc::new(CountingStore::default());
        store.enqueue(&[8]).await.unwrap();
        let enricher = Arc::new(FakeEnricher {
            wrong_id: HashSet::from([8]),
            ..Default::default()
        });
        let p = processor(store.clone(), enricher);

        let report = p.invoke(AUTH).await.unwrap();
        let result = &report.results.unwrap()[0];
        assert_eq!(result.status, ItemOutcome::Error);
        assert!(result.error.as_deref().unwrap().contains("malformed"));
        assert!(store.inner.entities().await.is_empty());
    }

    #[tokio::test]
    async fn claim_failure_aborts_the_batch() {
        let store = Arc::new(CountingStore {
            fail_select: true,
            ..Default::default()
        });
        let enricher = Arc::new(FakeEnricher::default());
        let p = processor(store, enricher.clone());

        let err = p.invoke(AUTH).await.unwrap_err();
        assert!(matches!(err, Error::Store { .. }));
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batch_size_caps_the_claim() {
        let store = Arc::new(CountingStore::default());
        store.enqueue(&(1..=8).collect::<Vec<_>>()).await.unwrap();
        let p = processor(store.clone(), Arc::new(FakeEnricher::default()));

        let report = p.invoke(AUTH).await.unwrap();
        assert_eq!(report.results.unwrap().len(), 5);
        let stats = store.queue_stats(Utc::now()).await.unwrap();
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.pending, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_abandons_the_run_and_keeps_leases() {
        let store = Arc::new(CountingStore::default());
        store.enqueue(&[1]).await.unwrap();
        let enricher = Arc::new(FakeEnricher {
            delay: Some(Duration::from_secs(120)),
            ..Default::default()
        });
        let p = processor(store.clone(), enricher);

        let err = p.invoke(AUTH).await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded { seconds: 60 }));

        let abandoned = item(&store, 1).await;
        assert_eq!(abandoned.status, QueueStatus::Pending);
        assert!(abandoned.locked_until.is_some());
        assert_eq!(abandoned.error_count, 0);
    }
}
