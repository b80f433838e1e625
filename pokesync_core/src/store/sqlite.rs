//! SQLite-backed Store Gateway.
//!
//! For single-node deployments and local development. Timestamps are stored as
//! fixed-width RFC3339 text (microseconds, `Z`), so string comparison orders them.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use super::StoreGateway;
use crate::models::{PokemonRecord, QueueItem, QueueStatus, QueueStats};
use crate::{Error, Result};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::store("sqlite_store mkdir", e))?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|e| Error::store("sqlite_store connect", e))?;

        Ok(Self { pool })
    }

    /// Private in-memory database. Pinned to a single connection that is never
    /// recycled, since each SQLite memory connection is its own database.
    #[tracing::instrument(level = "debug")]
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::store("sqlite_store connect options", e))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(|e| Error::store("sqlite_store connect", e))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pokemon_update_queue (
  pokemon_id INTEGER PRIMARY KEY,
  status TEXT NOT NULL DEFAULT 'pending',
  last_attempt TEXT NULL,
  locked_until TEXT NULL,
  error_count INTEGER NOT NULL DEFAULT 0,
  completed_at TEXT NULL
);
CREATE INDEX IF NOT EXISTS puq_status_last_attempt_idx
  ON pokemon_update_queue(status, last_attempt);

CREATE TABLE IF NOT EXISTS pokemon (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  pokedex_number INTEGER NOT NULL,
  types_json TEXT NOT NULL,
  weight INTEGER NOT NULL,
  height INTEGER NOT NULL,
  abilities_json TEXT NOT NULL,
  stats_json TEXT NOT NULL,
  image_url TEXT NULL,
  color TEXT NULL,
  generation TEXT NULL,
  capture_rate INTEGER NULL,
  updated_at TEXT NOT NULL
);
"#;

#[async_trait]
impl StoreGateway for SqliteStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn select_claimable(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query(
            r#"
SELECT pokemon_id, status, last_attempt, locked_until, error_count, completed_at
FROM pokemon_update_queue
WHERE status = 'pending'
  AND (locked_until IS NULL OR locked_until <= ?1)
ORDER BY last_attempt ASC NULLS FIRST, pokemon_id ASC
LIMIT ?2
"#,
        )
        .bind(fmt_dt(now))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::store("select claimable", e))?;

        rows.iter().map(row_to_item).collect()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn claim(
        &self,
        ids: &[i64],
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let now = fmt_dt(now);

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE pokemon_update_queue SET locked_until = ");
        qb.push_bind(fmt_dt(lease_until));
        qb.push(", last_attempt = ");
        qb.push_bind(now.clone());
        qb.push(" WHERE status = 'pending' AND (locked_until IS NULL OR locked_until <= ");
        qb.push_bind(now);
        qb.push(") AND pokemon_id IN (");
        let mut in_list = qb.separated(", ");
        for id in ids {
            in_list.push_bind(*id);
        }
        in_list.push_unseparated(") RETURNING pokemon_id");

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::store("claim", e))?;
        Ok(rows.iter().map(|r| r.get::<i64, _>("pokemon_id")).collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn finalize_success(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        let res = sqlx::query(
            r#"
UPDATE pokemon_update_queue
SET status = 'completed', completed_at = ?2, locked_until = NULL
WHERE pokemon_id = ?1
"#,
        )
        .bind(id)
        .bind(fmt_dt(now))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::store("finalize success", e))?;
        if res.rows_affected() == 0 {
            return Err(Error::NotFound(format!("queue item {id}")));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn finalize_failure(&self, id: i64) -> Result<i64> {
        let row = sqlx::query(
            r#"
UPDATE pokemon_update_queue
SET status = 'pending', locked_until = NULL, error_count = error_count + 1
WHERE pokemon_id = ?1
RETURNING error_count
"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::store("finalize failure", e))?;
        row.map(|r| r.get::<i64, _>("error_count"))
            .ok_or_else(|| Error::NotFound(format!("queue item {id}")))
    }

    #[tracing::instrument(level = "debug", skip(self, record), fields(id = record.id))]
    async fn upsert_entity(&self, record: &PokemonRecord) -> Result<()> {
        let types_json = serde_json::to_string(&record.types)
            .map_err(|e| Error::store("serialize types", e))?;
        let abilities_json = serde_json::to_string(&record.abilities)
            .map_err(|e| Error::store("serialize abilities", e))?;
        let stats_json = serde_json::to_string(&record.stats)
            .map_err(|e| Error::store("serialize stats", e))?;

        sqlx::query(
            r#"
INSERT INTO pokemon
  (id, name, pokedex_number, types_json, weight, height, abilities_json, stats_json,
   image_url, color, generation, capture_rate, updated_at)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
ON CONFLICT(id) DO UPDATE SET
  name = excluded.name,
  pokedex_number = excluded.pokedex_number,
  types_json = excluded.types_json,
  weight = excluded.weight,
  height = excluded.height,
  abilities_json = excluded.abilities_json,
  stats_json = excluded.stats_json,
  image_url = excluded.image_url,
  color = excluded.color,
  generation = excluded.generation,
  capture_rate = excluded.capture_rate,
  updated_at = excluded.updated_at
"#,
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(record.pokedex_number)
        .bind(types_json)
        .bind(record.weight)
        .bind(record.height)
        .bind(abilities_json)
        .bind(stats_json)
        .bind(&record.image_url)
        .bind(&record.color)
        .bind(&record.generation)
        .bind(record.capture_rate)
        .bind(fmt_dt(record.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::store("upsert entity", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, ids), fields(count = ids.len()))]
    async fn enqueue(&self, ids: &[i64]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for id in ids {
            let res = sqlx::query(
                r#"
INSERT INTO pokemon_update_queue (pokemon_id, status, error_count)
VALUES (?1, 'pending', 0)
ON CONFLICT(pokemon_id) DO NOTHING
"#,
            )
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::store("enqueue", e))?;
            inserted += res.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn get_queue_item(&self, id: i64) -> Result<Option<QueueItem>> {
        let row = sqlx::query(
            r#"
SELECT pokemon_id, status, last_attempt, locked_until, error_count, completed_at
FROM pokemon_update_queue
WHERE pokemon_id = ?1
"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn get_entity(&self, id: i64) -> Result<Option<PokemonRecord>> {
        let row = sqlx::query(
            r#"
SELECT id, name, pokedex_number, types_json, weight, height, abilities_json, stats_json,
       image_url, color, generation, capture_rate, updated_at
FROM pokemon
WHERE id = ?1
"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn queue_stats(&self, now: DateTime<Utc>) -> Result<QueueStats> {
        let row = sqlx::query(
            r#"
SELECT
  COALESCE(SUM(CASE WHEN status = 'pending'
                     AND (locked_until IS NULL OR locked_until <= ?1) THEN 1 ELSE 0 END), 0) AS pending,
  COALESCE(SUM(CASE WHEN status = 'pending' AND locked_until > ?1 THEN 1 ELSE 0 END), 0) AS locked,
  COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
  COALESCE(SUM(error_count), 0) AS total_errors
FROM pokemon_update_queue
"#,
        )
        .bind(fmt_dt(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(QueueStats {
            pending: row.get::<i64, _>("pending").max(0) as u64,
            locked: row.get::<i64, _>("locked").max(0) as u64,
            completed: row.get::<i64, _>("completed").max(0) as u64,
            total_errors: row.get::<i64, _>("total_errors").max(0) as u64,
        })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn migrate(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::store("sqlite_store schema", e))?;
        Ok(())
    }
}

fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<QueueItem> {
    let status: String = row.get("status");
    let last_attempt: Option<String> = row.get("last_attempt");
    let locked_until: Option<String> = row.get("locked_until");
    let completed_at: Option<String> = row.get("completed_at");
    Ok(QueueItem {
        entity_id: row.get("pokemon_id"),
        status: QueueStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("unknown queue status: {status}")))?,
        last_attempt: last_attempt.as_deref().map(parse_dt).transpose()?,
        locked_until: locked_until.as_deref().map(parse_dt).transpose()?,
        error_count: row.get("error_count"),
        completed_at: completed_at.as_deref().map(parse_dt).transpose()?,
    })
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<PokemonRecord> {
    let types_json: String = row.get("types_json");
    let abilities_json: String = row.get("abilities_json");
    let stats_json: String = row.get("stats_json");
    Ok(PokemonRecord {
        id: row.get("id"),
        name: row.get("name"),
        pokedex_number: row.get("pokedex_number"),
        types: serde_json::from_str(&types_json).map_err(|e| Error::store("decode types", e))?,
        weight: row.get("weight"),
        height: row.get("height"),
        abilities: serde_json::from_str(&abilities_json)
            .map_err(|e| Error::store("decode abilities", e))?,
        stats: serde_json::from_str(&stats_json).map_err(|e| Error::store("decode stats", e))?,
        image_url: row.get("image_url"),
        color: row.get("color"),
        generation: row.get("generation"),
        capture_rate: row.get("capture_rate"),
        updated_at: parse_dt(row.get::<String, _>("updated_at").as_str())?,
    })
}

fn fmt_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::store("parse datetime", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    async fn store_with(ids: &[i64]) -> SqliteStore {
        let store = SqliteStore::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.enqueue(ids).await.unwrap();
        store
    }

    fn bulbasaur(updated_at: DateTime<Utc>) -> PokemonRecord {
        PokemonRecord {
            id: 1,
            name: "bulbasaur".into(),
            pokedex_number: 1,
            types: vec!["grass".into(), "poison".into()],
            weight: 69,
            height: 7,
            abilities: vec!["overgrow".into(), "chlorophyll".into()],
            stats: BTreeMap::from([("hp".to_string(), 45), ("speed".to_string(), 45)]),
            image_url: Some("https://img.example/1.png".into()),
            color: Some("green".into()),
            generation: None,
            capture_rate: Some(45),
            updated_at,
        }
    }

    #[tokio::test]
    async fn enqueue_is_idempotent() {
        let store = store_with(&[1, 2]).await;
        assert_eq!(store.enqueue(&[2, 3]).await.unwrap(), 1);
        let item = store.get_queue_item(3).await.unwrap().unwrap();
        assert_eq!(item, QueueItem::pending(3));
    }

    #[tokio::test]
    async fn select_orders_nulls_first_then_oldest_attempt() {
        let store = store_with(&[1, 2, 3]).await;
        let now = t0();
        // Attempt 2 earlier than 1, then release both.
        store.claim(&[2], now, now - Duration::hours(2)).await.unwrap();
        store.claim(&[1], now, now - Duration::hours(1)).await.unwrap();
        store.finalize_failure(1).await.unwrap();
        store.finalize_failure(2).await.unwrap();

        let ids: Vec<i64> = store
            .select_claimable(10, now)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.entity_id)
            .collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(store.select_claimable(1, now).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn claim_locks_once_and_keeps_status_pending() {
        let store = store_with(&[1, 2]).await;
        let now = t0();
        let until = now + Duration::minutes(10);

        let mut first = store.claim(&[1, 2], until, now).await.unwrap();
        first.sort();
        assert_eq!(first, vec![1, 2]);
        assert!(store.claim(&[1, 2], until, now).await.unwrap().is_empty());
        assert!(store.select_claimable(10, now).await.unwrap().is_empty());

        let item = store.get_queue_item(1).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.locked_until, Some(until));
        assert_eq!(item.last_attempt, Some(now));
    }

    #[tokio::test]
    async fn expired_lease_becomes_claimable_without_finalize() {
        let store = store_with(&[5]).await;
        let now = t0();
        let lease = Duration::minutes(10);
        store.claim(&[5], now + lease, now).await.unwrap();

        let almost = now + lease - Duration::seconds(1);
        assert!(store.select_claimable(10, almost).await.unwrap().is_empty());

        let after = now + lease;
        let items = store.select_claimable(10, after).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(store.claim(&[5], after + lease, after).await.unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn finalize_success_twice_stays_completed() {
        let store = store_with(&[9]).await;
        let now = t0();
        store.claim(&[9], now + Duration::minutes(10), now).await.unwrap();
        store.finalize_success(9, now).await.unwrap();
        store
            .finalize_success(9, now + Duration::seconds(5))
            .await
            .unwrap();

        let item = store.get_queue_item(9).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Completed);
        assert_eq!(item.locked_until, None);
        assert_eq!(item.completed_at, Some(now + Duration::seconds(5)));
        assert!(store.select_claimable(10, now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_increments_error_count_each_time() {
        let store = store_with(&[4]).await;
        let now = t0();
        for k in 1..=3 {
            store.claim(&[4], now + Duration::minutes(10), now).await.unwrap();
            assert_eq!(store.finalize_failure(4).await.unwrap(), k);
        }
        let item = store.get_queue_item(4).await.unwrap().unwrap();
        assert_eq!(item.error_count, 3);
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.locked_until, None);
    }

    #[tokio::test]
    async fn finalize_unknown_id_is_not_found() {
        let store = store_with(&[]).await;
        assert!(matches!(
            store.finalize_failure(1).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.finalize_success(1, t0()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_entity() {
        let store = store_with(&[]).await;
        let rec = bulbasaur(t0());
        store.upsert_entity(&rec).await.unwrap();
        assert_eq!(store.get_entity(1).await.unwrap(), Some(rec.clone()));

        let mut newer = rec;
        newer.weight = 70;
        newer.color = None;
        newer.updated_at = t0() + Duration::days(1);
        store.upsert_entity(&newer).await.unwrap();
        assert_eq!(store.get_entity(1).await.unwrap(), Some(newer));
    }

    #[tokio::test]
    async fn stats_reflect_queue_state() {
        let store = store_with(&[1, 2, 3]).await;
        let now = t0();
        store
            .claim(&[1, 2], now + Duration::minutes(5), now)
            .await
            .unwrap();
        store.finalize_success(1, now).await.unwrap();

        let stats = store.queue_stats(now).await.unwrap();
        assert_eq!(
            stats,
            QueueStats {
                pending: 1,
                locked: 1,
                completed: 1,
                total_errors: 0,
            }
        );
    }
}
