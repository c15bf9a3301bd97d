//! Diagnostic and manual-clearing endpoints over the date-based store.

use crate::cache::{CacheKey, KeyKind};
use crate::error::{RelayError, Result};
use crate::server::state::AppState;
use crate::server::url_validation::validate_refresh_url;
use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{header_secret, no_store};

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    secret: Option<String>,
    detailed: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearQuery {
    secret: Option<String>,
    action: Option<String>,
    pattern: Option<String>,
    song_id: Option<String>,
    url: Option<String>,
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("true" | "1"))
}

fn required<'a>(value: &'a Option<String>, name: &str, action: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            RelayError::bad_request_with_usage(
                format!("Missing parameter '{}' for action '{}'", name, action),
                clear_examples(),
            )
        })
}

fn clear_examples() -> Value {
    json!({
        "all": "DELETE /api/cache-clear?action=all",
        "pattern": "DELETE /api/cache-clear?action=pattern&pattern=*ravana*",
        "song": "DELETE /api/cache-clear?action=song&songId=<entry id>",
        "songs": "DELETE /api/cache-clear?action=songs",
        "url": "DELETE /api/cache-clear?action=url&url=<upstream feed URL>"
    })
}

/// `GET /api/cache-stats[?detailed=true]`
pub async fn cache_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StatsQuery>,
) -> Result<Response> {
    state
        .gateway
        .authorize(header_secret(&headers).or(query.secret.as_deref()))?;

    let mut body = json!({
        "cache": state.cache.stats(),
        "songList": state.song_list.stats(),
        "outputCache": { "entries": state.output.len() },
        "inFlight": state.songs.in_flight(),
        "timestamp": Utc::now().to_rfc3339(),
    });
    if is_truthy(query.detailed.as_deref()) {
        body["entries"] = json!(state.cache.detailed());
    }

    Ok(no_store(Json(body).into_response()))
}

/// `DELETE /api/cache-clear?action=...`
pub async fn cache_clear(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ClearQuery>,
) -> Result<Response> {
    state
        .gateway
        .authorize(header_secret(&headers).or(query.secret.as_deref()))?;

    let action = query.action.as_deref().map(str::trim).unwrap_or_default();
    let mut body = match action {
        "all" => {
            let cleared = state.cache.len();
            state.cache.clear();
            state.song_list.clear();
            let rendered = state.output.clear();
            info!(
                "Manual clear: {} store entries, {} rendered outputs, song list",
                cleared, rendered
            );
            json!({ "cleared": cleared, "renderedCleared": rendered })
        }
        "pattern" => {
            let pattern = required(&query.pattern, "pattern", action)?;
            let cleared = state.cache.clear_by_pattern(pattern);
            json!({ "pattern": pattern, "cleared": cleared })
        }
        "song" => {
            let song_id = required(&query.song_id, "songId", action)?;
            let mut cleared = usize::from(state.cache.remove(&CacheKey::entry(song_id)));
            cleared += state.cache.clear_matching(None, song_id);
            cleared += usize::from(state.cache.remove(&CacheKey::latest_songs()));
            info!("Manual clear for song {}: {} entries", song_id, cleared);
            json!({ "songId": song_id, "cleared": cleared })
        }
        "songs" => {
            let cleared = state.cache.clear_kind(KeyKind::Entry)
                + state.cache.clear_kind(KeyKind::SongList)
                + state.cache.clear_kind(KeyKind::Feed);
            json!({ "cleared": cleared })
        }
        "url" => {
            let raw = required(&query.url, "url", action)?;
            let url = validate_refresh_url(raw, state.upstream.base_url())?;
            let feed = state.upstream.refresh(url.as_str()).await?;
            info!("Force-refreshed {} ({} entries)", url, feed.entry.len());
            json!({ "url": url.as_str(), "entries": feed.entry.len() })
        }
        other => {
            return Err(RelayError::bad_request_with_usage(
                if other.is_empty() {
                    "Missing parameter 'action'".to_string()
                } else {
                    format!("Unknown action: {}", other)
                },
                clear_examples(),
            ));
        }
    };

    body["success"] = json!(true);
    body["action"] = json!(action);
    body["timestamp"] = json!(Utc::now().to_rfc3339());
    Ok(no_store(Json(body).into_response()))
}
