use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Queue state persisted in `pokemon_update_queue.status`.
///
/// A locked item is still `Pending`; the lock lives in `locked_until`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Completed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "completed" => Some(QueueStatus::Completed),
            _ => None,
        }
    }
}

/// One row of the update queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub entity_id: i64,
    pub status: QueueStatus,
    pub last_attempt: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
    pub error_count: i64,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn pending(entity_id: i64) -> Self {
        Self {
            entity_id,
            status: QueueStatus::Pending,
            last_attempt: None,
            locked_until: None,
            error_count: 0,
            completed_at: None,
        }
    }

    /// Pending and either unleased or holding a lease that ran out at or before `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.locked_until.is_none_or(|until| until <= now)
    }
}

/// Enriched entity persisted in the `pokemon` table, keyed by the queue's `entity_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PokemonRecord {
    pub id: i64,
    pub name: String,
    pub pokedex_number: i64,
    pub types: Vec<String>,
    pub weight: i64,
    pub height: i64,
    pub abilities: Vec<String>,
    pub stats: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_rate: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Success,
    Error,
}

/// Per-item line of a batch report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub id: i64,
    pub status: ItemOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemResult {
    pub fn success(id: i64) -> Self {
        Self {
            id,
            status: ItemOutcome::Success,
            error: None,
        }
    }

    pub fn error(id: i64, error: impl Into<String>) -> Self {
        Self {
            id,
            status: ItemOutcome::Error,
            error: Some(error.into()),
        }
    }
}

/// Body returned by one invocation.
///
/// Serializes to `{"message":"nothing pending"}` or
/// `{"message":"batch complete","results":[...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<ItemResult>>,
}

impl BatchReport {
    pub const NOTHING_PENDING: &'static str = "nothing pending";
    pub const BATCH_COMPLETE: &'static str = "batch complete";

    pub fn nothing_pending() -> Self {
        Self {
            message: Self::NOTHING_PENDING.to_string(),
            results: None,
        }
    }

    pub fn complete(results: Vec<ItemResult>) -> Self {
        Self {
            message: Self::BATCH_COMPLETE.to_string(),
            results: Some(results),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.count(ItemOutcome::Success)
    }

    pub fn failed(&self) -> usize {
        self.count(ItemOutcome::Error)
    }

    fn count(&self, outcome: ItemOutcome) -> usize {
        self.results
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter(|r| r.status == outcome)
            .count()
    }
}

/// Queue snapshot used by the CLI `stats` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Claimable right now.
    pub pending: u64,
    /// Pending with a live lease.
    pub locked: u64,
    pub completed: u64,
    pub total_errors: u64,
}
