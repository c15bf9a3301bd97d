use crate::content::{RelatedSong, normalize_slug};
use crate::error::{RelayError, Result};
use crate::revalidate::PathScope;
use crate::server::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use tracing::info;

use super::{from_output, rendered};

const JSON: &str = "application/json";

/// Browsers revalidate; shared caches hold until revalidated
const SONG_CACHE_CONTROL: &str = "public, max-age=0, s-maxage=2592000";
const LATEST_CACHE_CONTROL: &str = "public, max-age=0, s-maxage=300";

/// Output-cache path and tags for the latest-songs list
const LATEST_PATH: &str = "/api/songs";
const LATEST_TAGS: [&str; 2] = ["songs-latest", "homepage"];

/// Serve one fully-shaped song as JSON
pub async fn get_song(Path(raw_slug): Path<String>, State(state): State<AppState>) -> Result<Response> {
    let slug = normalize_slug(&raw_slug);
    if slug.is_empty() {
        return Err(RelayError::NotFound("Song slug is empty".to_string()));
    }

    let path = PathScope::Api.path(&slug);
    if let Some(cached) = state.output.get(&path) {
        return Ok(from_output(cached, SONG_CACHE_CONTROL));
    }

    let generation = state.output.generation();
    let Some(song) = state.songs.get(&slug).await else {
        info!("Song not found: {}", slug);
        return Err(RelayError::NotFound(format!("Song not found: {}", slug)));
    };

    let body = serde_json::to_string(song.as_ref())
        .map_err(|e| RelayError::Internal(format!("Failed to serialize song {}: {}", slug, e)))?;
    state.output.put_if_current(
        generation,
        path,
        body.clone(),
        JSON,
        vec![PathScope::Page.tag(&slug), PathScope::Api.tag(&slug)],
    );

    Ok(rendered(StatusCode::OK, JSON, SONG_CACHE_CONTROL, body, false))
}

/// Serve the newest songs from the upstream feed
pub async fn latest_songs(State(state): State<AppState>) -> Result<Response> {
    if let Some(cached) = state.output.get(LATEST_PATH) {
        return Ok(from_output(cached, LATEST_CACHE_CONTROL));
    }

    let generation = state.output.generation();
    let feed = state.upstream.latest().await?;
    let songs: Vec<RelatedSong> = feed
        .entry
        .iter()
        .filter(|e| e.is_song())
        .map(RelatedSong::from_entry)
        .collect();

    let body = serde_json::to_string(&songs)
        .map_err(|e| RelayError::Internal(format!("Failed to serialize latest songs: {}", e)))?;
    state.output.put_if_current(
        generation,
        LATEST_PATH,
        body.clone(),
        JSON,
        LATEST_TAGS.iter().map(|t| t.to_string()).collect(),
    );

    Ok(rendered(StatusCode::OK, JSON, LATEST_CACHE_CONTROL, body, false))
}
