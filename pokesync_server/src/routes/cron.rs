//! Scheduler trigger for the update batch.

use crate::error::ApiError;
use crate::server::AppState;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::routing::get;
use axum::{Extension, Json, Router};
use pokesync_core::BatchReport;
use std::sync::Arc;

pub const UPDATE_POKEMON_PATH: &str = "/api/cron/update-pokemon";

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> Router {
    Router::new().route(UPDATE_POKEMON_PATH, get(update_pokemon))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn update_pokemon(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BatchReport>, ApiError> {
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let report = state.processor.invoke(authorization).await?;
    Ok(Json(report))
}
