use async_trait::async_trait;

use crate::error::FetchError;
use crate::models::PokemonRecord;

/// Remote source that turns a queue item's id into a full entity record.
///
/// Implementations do not retry; retries happen on later invocations via the queue.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn fetch(&self, id: i64) -> Result<PokemonRecord, FetchError>;
}
