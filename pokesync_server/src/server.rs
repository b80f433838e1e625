use crate::routes;
use axum::http::HeaderName;
use axum::{Extension, Router};
use pokesync_core::config::{PokeApiConfig, StoreConfig, UpdaterConfig};
use pokesync_core::{BatchProcessor, Enricher, StoreGateway};
use pokesync_integrations::PokeApiEnricher;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<BatchProcessor>,
    pub store: Arc<dyn StoreGateway>,
    pub started_at: Instant,
}

impl AppState {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(processor: BatchProcessor, store: Arc<dyn StoreGateway>) -> Self {
        Self {
            processor: Arc::new(processor),
            store,
            started_at: Instant::now(),
        }
    }
}

/// Everything needed to build an `AppState`, read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub updater: UpdaterConfig,
    pub store: StoreConfig,
    pub pokeapi: PokeApiConfig,
}

impl Settings {
    #[tracing::instrument(level = "debug")]
    pub fn from_env(data_dir: PathBuf) -> pokesync_core::Result<Self> {
        Ok(Self {
            updater: UpdaterConfig::from_env()?,
            store: StoreConfig::from_env(data_dir)?,
            pokeapi: PokeApiConfig::from_env()?,
        })
    }
}

/// Connect the store (applying migrations) and wire the PokéAPI enricher.
#[tracing::instrument(level = "info", skip_all)]
pub async fn build_state(settings: Settings) -> pokesync_core::Result<AppState> {
    let store = pokesync_core::store::connect(&settings.store).await?;
    let enricher: Arc<dyn Enricher> = Arc::new(PokeApiEnricher::new(&settings.pokeapi)?);
    let processor = BatchProcessor::new(settings.updater, store.clone(), enricher)?;
    Ok(AppState::new(processor, store))
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    Router::new()
        .merge(routes::router())
        .layer(Extension(Arc::new(state)))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "pokesync listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
