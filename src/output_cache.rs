//! Rendered-response cache.
//!
//! Responses are keyed by request path and labelled with tags so a single
//! revalidation can drop every rendering of one song (`song-<slug>`) or
//! one page family without knowing the individual paths.
//!
//! Every invalidation bumps a generation counter. A handler that renders
//! across an `await` reads the generation first and stores with
//! [`OutputCache::put_if_current`], so a revalidation that lands mid-render
//! is not undone by the stale body.

use crate::metrics;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CachedOutput {
    pub body: String,
    pub content_type: String,
    pub tags: Vec<String>,
    stored_at: Instant,
}

impl CachedOutput {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() > ttl
    }

    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }
}

pub struct OutputCache {
    entries: DashMap<String, CachedOutput>,
    ttl: Duration,
    generation: AtomicU64,
}

impl OutputCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            generation: AtomicU64::new(0),
        }
    }

    /// Current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self, path: &str) -> Option<CachedOutput> {
        if let Some(entry) = self.entries.get(path)
            && !entry.is_expired(self.ttl)
        {
            return Some(entry.clone());
        }
        self.entries.remove_if(path, |_, v| v.is_expired(self.ttl));
        None
    }

    pub fn put(
        &self,
        path: impl Into<String>,
        body: impl Into<String>,
        content_type: impl Into<String>,
        tags: Vec<String>,
    ) {
        self.entries.insert(
            path.into(),
            CachedOutput {
                body: body.into(),
                content_type: content_type.into(),
                tags,
                stored_at: Instant::now(),
            },
        );
    }

    /// Store a body rendered since `generation` was read.
    ///
    /// Returns false, leaving nothing behind, when an invalidation ran in
    /// between.
    pub fn put_if_current(
        &self,
        generation: u64,
        path: impl Into<String>,
        body: impl Into<String>,
        content_type: impl Into<String>,
        tags: Vec<String>,
    ) -> bool {
        if self.generation() != generation {
            return false;
        }
        let path = path.into();
        let stored_at = Instant::now();
        self.entries.insert(
            path.clone(),
            CachedOutput {
                body: body.into(),
                content_type: content_type.into(),
                tags,
                stored_at,
            },
        );
        // An invalidation that scanned before the insert bumped first
        if self.generation() != generation {
            self.entries.remove_if(&path, |_, v| v.stored_at == stored_at);
            debug!("Output cache: discarded stale render of {}", path);
            return false;
        }
        true
    }

    /// Drop every entry labelled with `tag`. Returns the number removed.
    pub fn revalidate_tag(&self, tag: &str) -> usize {
        self.bump();
        let mut removed = 0;
        self.entries.retain(|_, v| {
            let keep = !v.tags.iter().any(|t| t == tag);
            if !keep {
                removed += 1;
            }
            keep
        });
        metrics::record_invalidation("output_tag", removed);
        debug!("Output cache: tag {} dropped {} entries", tag, removed);
        removed
    }

    /// Drop the entry for `path`. Returns whether one existed.
    pub fn revalidate_path(&self, path: &str) -> bool {
        self.bump();
        let removed = self.entries.remove(path).is_some();
        metrics::record_invalidation("output_path", usize::from(removed));
        debug!("Output cache: path {} dropped: {}", path, removed);
        removed
    }

    pub fn clear(&self) -> usize {
        self.bump();
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn sweep_expired(&self) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, v| {
            let keep = !v.is_expired(self.ttl);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
