use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use pokesync_core::config::PokeApiConfig;
use pokesync_core::{Enricher, FetchError};
use pokesync_integrations::PokeApiEnricher;
use serde_json::json;

/// Fake PokéAPI. Ids select the scenario:
/// 1 ok, 2 species missing, 3 malformed, 4 server error, 5 slow, anything else 404.
async fn pokemon(State(base): State<String>, Path(id): Path<i64>) -> Response {
    match id {
        1 | 2 | 5 => {
            if id == 5 {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            let species_id = if id == 2 { 404 } else { id };
            Json(json!({
                "id": id,
                "name": format!("mon-{id}"),
                "weight": 69,
                "height": 7,
                "types": [{"slot": 1, "type": {"name": "grass"}}],
                "abilities": [{"ability": {"name": "overgrow"}}],
                "stats": [{"base_stat": 45, "stat": {"name": "hp"}}],
                "sprites": {"other": {"official-artwork": {"front_default": "https://img/1.png"}}},
                "species": {"name": "mon", "url": format!("{base}/pokemon-species/{species_id}/")}
            }))
            .into_response()
        }
        3 => Json(json!({"id": 3, "name": "missingno"})).into_response(),
        4 => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        _ => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

async fn species(Path(id): Path<i64>) -> Response {
    if id == 404 {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    }
    Json(json!({
        "color": {"name": "green"},
        "generation": {"name": "generation-i"},
        "capture_rate": 45
    }))
    .into_response()
}

async fn spawn_fake_api() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/api/v2", listener.local_addr().unwrap());
    let app = Router::new()
        .route("/api/v2/pokemon/{id}", get(pokemon))
        .route("/api/v2/pokemon-species/{id}/", get(species))
        .with_state(base.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

async fn enricher(timeout: Duration) -> PokeApiEnricher {
    let base_url = spawn_fake_api().await;
    PokeApiEnricher::new(&PokeApiConfig {
        base_url,
        request_timeout: timeout,
    })
    .unwrap()
}

#[tokio::test]
async fn fetches_and_merges_species() {
    let e = enricher(Duration::from_secs(5)).await;
    let rec = e.fetch(1).await.unwrap();
    assert_eq!(rec.id, 1);
    assert_eq!(rec.name, "mon-1");
    assert_eq!(rec.types, vec!["grass"]);
    assert_eq!(rec.stats.get("hp"), Some(&45));
    assert_eq!(rec.color.as_deref(), Some("green"));
    assert_eq!(rec.capture_rate, Some(45));
}

#[tokio::test]
async fn maps_remote_failures_to_fetch_errors() {
    let e = enricher(Duration::from_secs(5)).await;

    assert!(matches!(
        e.fetch(999).await,
        Err(FetchError::PrimaryNotFound { id: 999 })
    ));
    match e.fetch(2).await {
        Err(FetchError::SecondaryNotFound { reference }) => {
            assert!(reference.ends_with("/pokemon-species/404/"))
        }
        other => panic!("expected SecondaryNotFound, got {other:?}"),
    }
    assert!(matches!(
        e.fetch(3).await,
        Err(FetchError::MalformedResponse(_))
    ));
    assert!(matches!(e.fetch(4).await, Err(FetchError::Transport { .. })));
}

#[tokio::test]
async fn slow_responses_time_out_as_transport_errors() {
    let e = enricher(Duration::from_millis(200)).await;
    assert!(matches!(e.fetch(5).await, Err(FetchError::Transport { .. })));
}
