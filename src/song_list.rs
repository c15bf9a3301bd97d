//! Full song listing for sitemap generation.
//!
//! The upstream API returns at most one page of rows per request, so the
//! listing is assembled by walking `start-index` until a short or empty
//! page. The assembled list is kept for a fixed TTL so every sitemap page
//! rendered in that window shares one traversal.

use crate::content::Entry;
use crate::error::Result;
use crate::upstream::UpstreamClient;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Default listing lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Upstream page size limit.
pub const DEFAULT_PAGE_SIZE: usize = 150;

struct Listing {
    songs: Arc<Vec<Entry>>,
    fetched_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SongListStats {
    pub is_cached: bool,
    pub song_count: usize,
    pub cache_age: u64,
    pub ttl: u64,
    pub expires_in: u64,
}

pub struct SongListCache {
    upstream: Arc<UpstreamClient>,
    ttl: Duration,
    page_size: usize,
    listing: Mutex<Option<Listing>>,
    /// Serializes traversals; waiters reuse the leader's result
    fill: tokio::sync::Mutex<()>,
    generation: AtomicU64,
}

impl SongListCache {
    pub fn new(upstream: Arc<UpstreamClient>, ttl: Duration, page_size: usize) -> Self {
        Self {
            upstream,
            ttl,
            page_size: page_size.max(1),
            listing: Mutex::new(None),
            fill: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    fn fresh(&self) -> Option<Arc<Vec<Entry>>> {
        let listing = self.listing.lock().unwrap_or_else(|e| e.into_inner());
        listing
            .as_ref()
            .filter(|l| l.fetched_at.elapsed() < self.ttl)
            .map(|l| Arc::clone(&l.songs))
    }

    /// Every song entry, newest first as served by upstream.
    ///
    /// # Errors
    ///
    /// Any failed page aborts the traversal; nothing partial is cached.
    pub async fn get_all(&self) -> Result<Arc<Vec<Entry>>> {
        if let Some(songs) = self.fresh() {
            info!("Using cached song list ({} songs)", songs.len());
            return Ok(songs);
        }

        let _fill = self.fill.lock().await;
        if let Some(songs) = self.fresh() {
            return Ok(songs);
        }

        let generation = self.generation.load(Ordering::Acquire);
        let songs = Arc::new(self.traverse().await?);

        if self.generation.load(Ordering::Acquire) == generation {
            let mut listing = self.listing.lock().unwrap_or_else(|e| e.into_inner());
            *listing = Some(Listing {
                songs: Arc::clone(&songs),
                fetched_at: Instant::now(),
            });
        } else {
            info!("Song list cleared during traversal, result not cached");
        }

        Ok(songs)
    }

    async fn traverse(&self) -> Result<Vec<Entry>> {
        info!("Fetching all songs from upstream with pagination");
        let mut all = Vec::new();
        let mut start_index = 1;

        loop {
            let page = self
                .upstream
                .page(start_index, self.page_size)
                .await
                .inspect_err(|e| warn!("Song list traversal failed at start-index {}: {}", start_index, e))?;

            let rows = page.entry.len();
            if rows == 0 {
                break;
            }
            all.extend(page.entry);
            info!("Fetched {} entries (total: {})", rows, all.len());

            if rows < self.page_size {
                break;
            }
            start_index += self.page_size;
        }

        let total = all.len();
        let songs: Vec<Entry> = all.into_iter().filter(Entry::is_song).collect();
        info!("Fetched {} songs (filtered from {} entries)", songs.len(), total);
        Ok(songs)
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let mut listing = self.listing.lock().unwrap_or_else(|e| e.into_inner());
        *listing = None;
        info!("Song list cache cleared");
    }

    pub fn stats(&self) -> SongListStats {
        let listing = self.listing.lock().unwrap_or_else(|e| e.into_inner());
        let ttl = self.ttl.as_secs();
        match listing.as_ref() {
            Some(l) => {
                let age = l.fetched_at.elapsed();
                SongListStats {
                    is_cached: true,
                    song_count: l.songs.len(),
                    cache_age: age.as_secs(),
                    ttl,
                    expires_in: self.ttl.saturating_sub(age).as_secs(),
                }
            }
            None => SongListStats {
                is_cached: false,
                song_count: 0,
                cache_age: 0,
                ttl,
                expires_in: 0,
            },
        }
    }
}
