use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use super::StoreGateway;
use crate::models::{PokemonRecord, QueueItem, QueueStatus, QueueStats};
use crate::{Error, Result};

/// Postgres-backed Store Gateway. The production backend; several updater
/// processes may share one database.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn connect(
        postgres_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(postgres_url)
            .await
            .map_err(|e| Error::store("postgres connect", e))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StoreGateway for PostgresStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn select_claimable(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query(
            r#"
            SELECT pokemon_id, status, last_attempt, locked_until, error_count, completed_at
            FROM pokemon_update_queue
            WHERE status = 'pending'
              AND (locked_until IS NULL OR locked_until <= $1)
            ORDER BY last_attempt ASC NULLS FIRST, pokemon_id ASC
            LIMIT $2
            "#,
        )
        .bind(now)
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
        let rows = sqlx::query(
            r#"
            UPDATE pokemon_update_queue
            SET locked_until = $2, last_attempt = $3
            WHERE pokemon_id = ANY($1)
              AND status = 'pending'
              AND (locked_until IS NULL OR locked_until <= $3)
            RETURNING pokemon_id
            "#,
        )
        .bind(ids)
        .bind(lease_until)
        .bind(now)
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
            SET status = 'completed', completed_at = $2, locked_until = NULL
            WHERE pokemon_id = $1
            "#,
        )
        .bind(id)
        .bind(now)
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
            WHERE pokemon_id = $1
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
        let stats = serde_json::to_value(&record.stats)
            .map_err(|e| Error::store("serialize stats", e))?;
        sqlx::query(
            r#"
            INSERT INTO pokemon
              (id, name, pokedex_number, types, weight, height, abilities, stats,
               image_url, color, generation, capture_rate, updated_at)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
              name = EXCLUDED.name,
              pokedex_number = EXCLUDED.pokedex_number,
              types = EXCLUDED.types,
              weight = EXCLUDED.weight,
              height = EXCLUDED.height,
              abilities = EXCLUDED.abilities,
              stats = EXCLUDED.stats,
              image_url = EXCLUDED.image_url,
              color = EXCLUDED.color,
              generation = EXCLUDED.generation,
              capture_rate = EXCLUDED.capture_rate,
              updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(record.pokedex_number)
        .bind(&record.types)
        .bind(record.weight)
        .bind(record.height)
        .bind(&record.abilities)
        .bind(stats)
        .bind(&record.image_url)
        .bind(&record.color)
        .bind(&record.generation)
        .bind(record.capture_rate)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::store("upsert entity", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, ids), fields(count = ids.len()))]
    async fn enqueue(&self, ids: &[i64]) -> Result<u64> {
        let res = sqlx::query(
            r#"
            INSERT INTO pokemon_update_queue (pokemon_id, status, error_count)
            SELECT id, 'pending', 0 FROM UNNEST($1::BIGINT[]) AS t(id)
            ON CONFLICT (pokemon_id) DO NOTHING
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::store("enqueue", e))?;
        Ok(res.rows_affected())
    }

    async fn get_queue_item(&self, id: i64) -> Result<Option<QueueItem>> {
        let row = sqlx::query(
            r#"
            SELECT pokemon_id, status, last_attempt, locked_until, error_count, completed_at
            FROM pokemon_update_queue
            WHERE pokemon_id = $1
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
            SELECT id, name, pokedex_number, types, weight, height, abilities, stats,
                   image_url, color, generation, capture_rate, updated_at
            FROM pokemon
            WHERE id = $1
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
              COUNT(*) FILTER (WHERE status = 'pending'
                               AND (locked_until IS NULL OR locked_until <= $1)) AS pending,
              COUNT(*) FILTER (WHERE status = 'pending' AND locked_until > $1) AS locked,
              COUNT(*) FILTER (WHERE status = 'completed') AS completed,
              COALESCE(SUM(error_count), 0)::BIGINT AS total_errors
            FROM pokemon_update_queue
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(QueueStats {
            pending: row.get::<i64, _>("pending").max(0) as u64,
            locked: row.get::<i64, _>("locked").max(0) as u64,
            completed: row.get::<i64, _>("completed").max(0) as u64,
            total_errors: row.get::<i64, _>("total_errors").max(0) as u64,
        })
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pokemon_update_queue (
                pokemon_id   BIGINT PRIMARY KEY,
                status       TEXT NOT NULL DEFAULT 'pending',
                last_attempt TIMESTAMPTZ NULL,
                locked_until TIMESTAMPTZ NULL,
                error_count  BIGINT NOT NULL DEFAULT 0,
                completed_at TIMESTAMPTZ NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Selection scans pending rows by last_attempt.
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS pokemon_update_queue_status_attempt_idx
              ON pokemon_update_queue (status, last_attempt NULLS FIRST);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pokemon (
                id             BIGINT PRIMARY KEY,
                name           TEXT NOT NULL,
                pokedex_number BIGINT NOT NULL,
                types          TEXT[] NOT NULL,
                weight         BIGINT NOT NULL,
                height         BIGINT NOT NULL,
                abilities      TEXT[] NOT NULL,
                stats          JSONB NOT NULL,
                image_url      TEXT NULL,
                color          TEXT NULL,
                generation     TEXT NULL,
                capture_rate   BIGINT NULL,
                updated_at     TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_item(row: &PgRow) -> Result<QueueItem> {
    let status: String = row.get("status");
    Ok(QueueItem {
        entity_id: row.get("pokemon_id"),
        status: QueueStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("unknown queue status: {status}")))?,
        last_attempt: row.get("last_attempt"),
        locked_until: row.get("locked_until"),
        error_count: row.get("error_count"),
        completed_at: row.get("completed_at"),
    })
}

fn row_to_record(row: &PgRow) -> Result<PokemonRecord> {
    let stats: serde_json::Value = row.get("stats");
    Ok(PokemonRecord {
        id: row.get("id"),
        name: row.get("name"),
        pokedex_number: row.get("pokedex_number"),
        types: row.get("types"),
        weight: row.get("weight"),
        height: row.get("height"),
        abilities: row.get("abilities"),
        stats: serde_json::from_value(stats).map_err(|e| Error::store("decode stats", e))?,
        image_url: row.get("image_url"),
        color: row.get("color"),
        generation: row.get("generation"),
        capture_rate: row.get("capture_rate"),
        updated_at: row.get("updated_at"),
    })
}
