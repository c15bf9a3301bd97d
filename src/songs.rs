//! Song resolution.
//!
//! Lookup order for a slug:
//! 1. the date-based store (`lookup:<slug>`)
//! 2. an in-flight resolution for the same slug, if any
//! 3. the snapshot tiers
//! 4. an upstream feed search, shaped into a snapshot
//!
//! Resolved songs are stored with a TTL derived from their publish date.
//! Absence is never stored: the next request for a missing slug tries
//! again.

use crate::cache::CacheKey;
use crate::content::slug::search_terms;
use crate::content::{RelatedSong, SongSnapshot, normalize_slug};
use crate::error::Result;
use crate::fallback::HybridFetcher;
use crate::singleflight::SingleFlight;
use crate::upstream::{CachedPayload, RELATED_PAGE_SIZE, RelayCache, UpstreamClient};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Search results requested when falling back to the upstream feed
pub const SEARCH_RESULTS: usize = 10;

pub struct SongService {
    cache: Arc<RelayCache>,
    fetcher: HybridFetcher,
    upstream: Arc<UpstreamClient>,
    inflight: SingleFlight<String, Option<Arc<SongSnapshot>>>,
}

impl SongService {
    pub fn new(cache: Arc<RelayCache>, fetcher: HybridFetcher, upstream: Arc<UpstreamClient>) -> Self {
        Self {
            cache,
            fetcher,
            upstream,
            inflight: SingleFlight::new(),
        }
    }

    /// Resolve a requested slug (`.html` optional) to a song.
    pub async fn get(&self, raw_slug: &str) -> Option<Arc<SongSnapshot>> {
        let slug = normalize_slug(raw_slug);
        if slug.is_empty() {
            return None;
        }

        if let Some(CachedPayload::Song(item)) = self.cache.get(&CacheKey::lookup(&slug)) {
            debug!("Store hit for song {}", slug);
            return Some(item);
        }

        self.inflight
            .run(slug.clone(), || self.resolve(slug))
            .await
    }

    /// Number of slugs currently being resolved.
    pub fn in_flight(&self) -> usize {
        self.inflight.in_flight()
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.fetcher.tier_names()
    }

    async fn resolve(&self, slug: String) -> Option<Arc<SongSnapshot>> {
        let item = match self.fetcher.fetch(&slug).await {
            Some(item) => item,
            None => match self.from_upstream(&slug).await {
                Ok(Some(item)) => {
                    info!("Resolved {} from upstream search", slug);
                    item
                }
                Ok(None) => {
                    info!("Song not found anywhere: {}", slug);
                    return None;
                }
                Err(e) => {
                    warn!("Upstream fallback failed for {}: {}", slug, e);
                    return None;
                }
            },
        };

        let item = Arc::new(item);
        self.cache.set(
            CacheKey::lookup(&slug),
            CachedPayload::Song(Arc::clone(&item)),
            item.published_at(),
        );
        Some(item)
    }

    async fn from_upstream(&self, slug: &str) -> Result<Option<SongSnapshot>> {
        let feed = self.upstream.search(&search_terms(slug), SEARCH_RESULTS).await?;
        let Some(entry) = feed.entry.iter().find(|e| e.matches_slug(slug)) else {
            debug!("Upstream search returned {} entries, none match {}", feed.entry.len(), slug);
            return Ok(None);
        };

        let related = match entry.movie_name() {
            Some(movie) => self.related(movie).await,
            None => Vec::new(),
        };
        Ok(Some(SongSnapshot::from_entry(entry, related)))
    }

    /// Songs from the same movie. Failure here only costs the related list.
    async fn related(&self, movie: &str) -> Vec<RelatedSong> {
        match self
            .upstream
            .by_label(&format!("Movie:{}", movie), RELATED_PAGE_SIZE)
            .await
        {
            Ok(feed) => feed.entry.iter().map(RelatedSong::from_entry).collect(),
            Err(e) => {
                warn!("Failed to fetch related songs for movie {}: {}", movie, e);
                Vec::new()
            }
        }
    }
}
