use axum::Router;
use axum::routing::get;

pub mod cron;
pub mod health;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> Router {
    Router::new()
        .route("/health", get(health::get_health))
        .merge(cron::router())
}
