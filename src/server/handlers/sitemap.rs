use crate::error::{RelayError, Result};
use crate::revalidate::SITEMAP_TAG;
use crate::server::state::AppState;
use crate::sitemap;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use chrono::Utc;
use tracing::{info, warn};

use super::{from_output, rendered};

const XML: &str = "application/xml";
const SITEMAP_CACHE_CONTROL: &str = "public, max-age=86400, s-maxage=86400";
const NO_CACHE: &str = "no-store";

/// Sitemap index: one entry per page of songs
pub async fn sitemap_index(State(state): State<AppState>) -> Result<Response> {
    const PATH: &str = "/sitemap.xml";
    if let Some(cached) = state.output.get(PATH) {
        return Ok(from_output(cached, SITEMAP_CACHE_CONTROL));
    }

    let now = Utc::now();
    let generation = state.output.generation();
    match state.song_list.get_all().await {
        Ok(songs) => {
            let xml = sitemap::render_index(&state.config.base_url, songs.len(), now)?;
            state
                .output
                .put_if_current(generation, PATH, xml.clone(), XML, vec![SITEMAP_TAG.to_string()]);
            info!("Rendered sitemap index for {} songs", songs.len());
            Ok(rendered(StatusCode::OK, XML, SITEMAP_CACHE_CONTROL, xml, false))
        }
        Err(e) => {
            warn!("Sitemap index falling back to a single page: {}", e);
            let xml = sitemap::render_index(&state.config.base_url, 0, now)?;
            Ok(rendered(StatusCode::SERVICE_UNAVAILABLE, XML, NO_CACHE, xml, false))
        }
    }
}

/// One urlset page (`/sitemap/{n}.xml`). Pages past the last one are 404
/// and never stored.
pub async fn sitemap_page(Path(raw): Path<String>, State(state): State<AppState>) -> Result<Response> {
    let page = sitemap::parse_page(&raw)
        .ok_or_else(|| RelayError::bad_request(format!("Invalid page number: {}", raw)))?;

    let path = format!("/sitemap/{}.xml", page);
    if let Some(cached) = state.output.get(&path) {
        return Ok(from_output(cached, SITEMAP_CACHE_CONTROL));
    }

    let generation = state.output.generation();
    match state.song_list.get_all().await {
        Ok(songs) => {
            let pages = sitemap::page_count(songs.len());
            if page >= pages {
                return Err(RelayError::NotFound(format!(
                    "Sitemap page {} out of range ({} pages)",
                    page, pages
                )));
            }
            let urls = sitemap::page_urls(&state.config.base_url, &songs, page, Utc::now());
            let xml = sitemap::render_urlset(&urls)?;
            state
                .output
                .put_if_current(generation, path, xml.clone(), XML, vec![SITEMAP_TAG.to_string()]);
            info!("Rendered sitemap page {} with {} URLs", page, urls.len());
            Ok(rendered(StatusCode::OK, XML, SITEMAP_CACHE_CONTROL, xml, false))
        }
        Err(e) => {
            warn!("Serving empty sitemap page {}: {}", page, e);
            let xml = sitemap::empty_urlset()?;
            Ok(rendered(StatusCode::SERVICE_UNAVAILABLE, XML, NO_CACHE, xml, false))
        }
    }
}
