//! Remote source integrations for pokesync.

pub mod pokeapi;

pub use pokeapi::PokeApiEnricher;
