//! Pokesync core library: queue leasing, the batch update loop and store backends.

pub mod auth;
pub mod batch;
pub mod config;
pub mod enricher;
pub mod error;
pub mod lease;
pub mod models;
pub mod o11y;
pub mod store;

pub use batch::BatchProcessor;
pub use config::{PokeApiConfig, StoreConfig, UpdaterConfig};
pub use enricher::Enricher;
pub use error::{Error, FetchError, Result};
pub use lease::LeaseManager;
pub use models::{
    BatchReport, ItemOutcome, ItemResult, PokemonRecord, QueueItem, QueueStats, QueueStatus,
};
pub use store::{MemoryStore, PostgresStore, SqliteStore, StoreGateway};
