use crate::server::state::AppState;
use axum::{
    Json,
    extract::State,
    http::header,
    response::IntoResponse,
};
use serde_json::{Value, json};

/// Liveness plus a few cheap counters
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "cache_entries": state.cache.len(),
        "rendered_entries": state.output.len(),
        "songs_in_flight": state.songs.in_flight(),
    }))
}

/// Prometheus text exposition
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
