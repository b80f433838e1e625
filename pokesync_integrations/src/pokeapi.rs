//! PokéAPI enricher.
//!
//! Two GETs per item: `/pokemon/{id}`, then the species document it links to.
//! The response documents are parsed into typed schemas; a missing required
//! field is a malformed response, never a half-filled record.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pokesync_core::config::PokeApiConfig;
use pokesync_core::{Enricher, Error, FetchError, PokemonRecord, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TypeSlot {
    #[serde(rename = "type")]
    kind: Named,
}

#[derive(Debug, Deserialize)]
struct AbilitySlot {
    ability: Named,
}

#[derive(Debug, Deserialize)]
struct StatEntry {
    base_stat: i64,
    stat: Named,
}

#[derive(Debug, Deserialize)]
struct Artwork {
    #[serde(default)]
    front_default: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OtherSprites {
    #[serde(rename = "official-artwork", default)]
    official_artwork: Option<Artwork>,
}

#[derive(Debug, Deserialize)]
struct Sprites {
    #[serde(default)]
    other: Option<OtherSprites>,
}

#[derive(Debug, Deserialize)]
struct SpeciesRef {
    url: String,
}

#[derive(Debug, Deserialize)]
struct PokemonDoc {
    id: i64,
    name: String,
    types: Vec<TypeSlot>,
    weight: i64,
    height: i64,
    abilities: Vec<AbilitySlot>,
    stats: Vec<StatEntry>,
    sprites: Sprites,
    species: SpeciesRef,
}

#[derive(Debug, Default, Deserialize)]
struct SpeciesDoc {
    #[serde(default)]
    color: Option<Named>,
    #[serde(default)]
    generation: Option<Named>,
    #[serde(default)]
    capture_rate: Option<i64>,
}

#[derive(Clone)]
pub struct PokeApiEnricher {
    client: Client,
    api_base: String,
}

impl PokeApiEnricher {
    pub fn new(cfg: &PokeApiConfig) -> Result<Self> {
        cfg.validate()?;
        let client = Client::builder()
            .timeout(cfg.request_timeout)
            .user_agent(concat!("pokesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("reqwest client: {e}")))?;
        Ok(Self {
            client,
            api_base: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> std::result::Result<Option<T>, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::transport(format!("GET {url}"), e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| FetchError::transport(format!("GET {url}"), e))?;
        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::transport(format!("read body {url}"), e))?;
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| FetchError::malformed(format!("{url}: {e}")))
    }
}

#[async_trait]
impl Enricher for PokeApiEnricher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, id: i64) -> std::result::Result<PokemonRecord, FetchError> {
        let url = format!("{}/pokemon/{id}", self.api_base);
        let primary: PokemonDoc = self
            .get_json(&url)
            .await?
            .ok_or(FetchError::PrimaryNotFound { id })?;

        let species_url = primary.species.url.clone();
        let species: SpeciesDoc = self
            .get_json(&species_url)
            .await?
            .ok_or_else(|| FetchError::SecondaryNotFound {
                reference: species_url.clone(),
            })?;

        normalize(primary, species, Utc::now())
    }
}

fn normalize(
    primary: PokemonDoc,
    species: SpeciesDoc,
    now: DateTime<Utc>,
) -> std::result::Result<PokemonRecord, FetchError> {
    if primary.name.trim().is_empty() {
        return Err(FetchError::malformed("empty name"));
    }

    let mut stats = BTreeMap::new();
    for s in primary.stats {
        stats.insert(s.stat.name, s.base_stat);
    }

    let image_url = primary
        .sprites
        .other
        .and_then(|o| o.official_artwork)
        .and_then(|a| a.front_default);

    Ok(PokemonRecord {
        id: primary.id,
        name: primary.name,
        pokedex_number: primary.id,
        types: primary.types.into_iter().map(|t| t.kind.name).collect(),
        weight: primary.weight,
        height: primary.height,
        abilities: primary.abilities.into_iter().map(|a| a.ability.name).collect(),
        stats,
        image_url,
        color: species.color.map(|c| c.name),
        generation: species.generation.map(|g| g.name),
        capture_rate: species.capture_rate,
        updated_at: now,
    })
}
