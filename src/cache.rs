//! Date-based content cache.
//!
//! Bounded in-process store keyed by [`CacheKey`]. Each entry's TTL comes
//! from its publish date ([`crate::ttl`]); entries without a publish date
//! get a short default. Expiry is checked lazily on read, with an optional
//! periodic [`DateBasedCache::sweep_expired`].
//!
//! When full, the entry with the fewest hits is evicted, oldest first on
//! ties. All mutation happens under one lock so eviction and insertion
//! are a single atomic step.

use crate::metrics;
use crate::ttl::{self, TtlTier};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default capacity, sized for song data.
pub const DEFAULT_MAX_ENTRIES: usize = 200;

/// TTL for values not tied to a publish event.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Kind of cached value; invalidation can target a whole kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyKind {
    /// Raw upstream feed response, keyed by request URL
    Feed,
    /// Single upstream entry, keyed by entry id
    Entry,
    /// Latest-songs list
    SongList,
    /// Resolved content item, keyed by slug
    Lookup,
}

impl KeyKind {
    pub fn prefix(self) -> &'static str {
        match self {
            KeyKind::Feed => "blogger",
            KeyKind::Entry => "song",
            KeyKind::SongList => "songs",
            KeyKind::Lookup => "lookup",
        }
    }
}

/// Structured cache key. Renders as `prefix:id`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub kind: KeyKind,
    pub id: String,
}

impl CacheKey {
    pub fn new(kind: KeyKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn feed(url: &str) -> Self {
        Self::new(KeyKind::Feed, url)
    }

    pub fn entry(entry_id: &str) -> Self {
        Self::new(KeyKind::Entry, entry_id)
    }

    pub fn latest_songs() -> Self {
        Self::new(KeyKind::SongList, "latest")
    }

    pub fn lookup(slug: &str) -> Self {
        Self::new(KeyKind::Lookup, slug)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.prefix(), self.id)
    }
}

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    published: Option<DateTime<Utc>>,
    cached_at: Instant,
    /// Monotonic insertion counter, breaks timestamp ties
    seq: u64,
    ttl: Duration,
    tier: Option<TtlTier>,
    hits: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.cached_at) > self.ttl
    }
}

#[derive(Debug)]
struct Store<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    by_kind: HashMap<KeyKind, HashSet<CacheKey>>,
    next_seq: u64,
}

impl<V> Store<V> {
    fn remove(&mut self, key: &CacheKey) -> bool {
        if self.entries.remove(key).is_some() {
            if let Some(keys) = self.by_kind.get_mut(&key.kind) {
                keys.remove(key);
            }
            true
        } else {
            false
        }
    }

    fn remove_where(&mut self, mut pred: impl FnMut(&CacheKey) -> bool) -> Vec<CacheKey> {
        let doomed: Vec<CacheKey> = self.entries.keys().filter(|k| pred(k)).cloned().collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed
    }

    /// Evict the least-hit entry, oldest first on ties.
    fn evict_one(&mut self) -> Option<CacheKey> {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.hits, e.cached_at, e.seq))
            .map(|(k, _)| k.clone())?;
        self.remove(&victim);
        Some(victim)
    }
}

/// Aggregate counters for the stats endpoint.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total: usize,
    pub expired: usize,
    pub total_hits: u64,
    /// Average hits per entry
    pub hit_rate: f64,
    pub capacity: usize,
    pub memory_usage: String,
    pub ttl_distribution: BTreeMap<&'static str, usize>,
}

/// Per-entry diagnostic row.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDetail {
    pub key: String,
    pub published_date: Option<DateTime<Utc>>,
    pub age_secs: u64,
    pub ttl_secs: u64,
    pub remaining_secs: u64,
    pub hits: u64,
    pub expired: bool,
}

/// Bounded date-based TTL cache.
#[derive(Debug)]
pub struct DateBasedCache<V> {
    store: Mutex<Store<V>>,
    max_entries: usize,
    default_ttl: Duration,
    jitter: f64,
}

impl<V: Clone> DateBasedCache<V> {
    /// Create a cache with the given capacity, no jitter and the default TTL.
    pub fn new(max_entries: usize) -> Self {
        Self::with_options(max_entries, DEFAULT_TTL, 0.0)
    }

    pub fn with_options(max_entries: usize, default_ttl: Duration, jitter: f64) -> Self {
        Self {
            store: Mutex::new(Store {
                entries: HashMap::new(),
                by_kind: HashMap::new(),
                next_seq: 0,
            }),
            max_entries: max_entries.max(1),
            default_ttl,
            jitter,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Store<V>> {
        // A panic mid-operation leaves the map consistent enough to keep serving
        self.store.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Return the value if present and fresh, counting a hit.
    /// Expired entries are removed and reported as absent.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut store = self.lock();
        let now = Instant::now();

        match store.entries.get_mut(key) {
            None => {
                metrics::record_cache_lookup(false);
                debug!("Cache MISS for {}", key);
                return None;
            }
            Some(entry) if !entry.is_expired(now) => {
                entry.hits += 1;
                metrics::record_cache_lookup(true);
                debug!("Cache HIT for {} (hits: {})", key, entry.hits);
                return Some(entry.value.clone());
            }
            Some(_) => {}
        }

        // Stale: drop it so the next read is a plain miss
        store.remove(key);
        debug!("Cache entry expired for {}", key);
        metrics::record_cache_lookup(false);
        None
    }

    /// Insert a value. With a publish date the TTL follows the date-based
    /// policy (plus jitter); without one the default TTL applies.
    pub fn set(&self, key: CacheKey, value: V, published: Option<DateTime<Utc>>) {
        let (ttl, tier) = match published {
            Some(date) => {
                let tier = ttl::tier_for_published(date, Utc::now());
                let ttl = ttl::apply_jitter(tier.ttl(), self.jitter, &mut rand::thread_rng());
                (ttl, Some(tier))
            }
            None => (self.default_ttl, None),
        };
        self.insert(key, value, published, ttl, tier);
    }

    /// Insert a value with an explicit TTL, bypassing the date policy.
    pub fn set_with_ttl(&self, key: CacheKey, value: V, ttl: Duration) {
        self.insert(key, value, None, ttl, None);
    }

    fn insert(
        &self,
        key: CacheKey,
        value: V,
        published: Option<DateTime<Utc>>,
        ttl: Duration,
        tier: Option<TtlTier>,
    ) {
        let mut store = self.lock();

        // Overwrites never need room
        if !store.entries.contains_key(&key) {
            while store.entries.len() >= self.max_entries {
                match store.evict_one() {
                    Some(victim) => debug!("Evicted {} to make room for {}", victim, key),
                    None => break,
                }
            }
        }

        let seq = store.next_seq;
        store.next_seq += 1;
        store.remove(&key);
        store.by_kind.entry(key.kind).or_default().insert(key.clone());
        store.entries.insert(
            key,
            CacheEntry {
                value,
                published,
                cached_at: Instant::now(),
                seq,
                ttl,
                tier,
                hits: 0,
            },
        );
    }

    /// Remove a single key. Returns whether it was present.
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.lock().remove(key)
    }

    /// Remove every key whose rendered form matches a `*` wildcard pattern.
    /// All other characters match literally. Returns the number removed.
    pub fn clear_by_pattern(&self, pattern: &str) -> usize {
        let Some(regex) = glob_to_regex(pattern) else {
            return 0;
        };
        let removed = self.lock().remove_where(|k| regex.is_match(&k.to_string()));
        info!(
            "Cleared {} cache entries matching pattern: {}",
            removed.len(),
            pattern
        );
        metrics::record_invalidation("pattern", removed.len());
        removed.len()
    }

    /// Remove every key of one kind.
    pub fn clear_kind(&self, kind: KeyKind) -> usize {
        let mut store = self.lock();
        let keys: Vec<CacheKey> = store
            .by_kind
            .get(&kind)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for key in &keys {
            store.remove(key);
        }
        drop(store);
        info!("Cleared {} cache entries of kind {:?}", keys.len(), kind);
        metrics::record_invalidation("kind", keys.len());
        keys.len()
    }

    /// Remove every key whose id contains `needle`, optionally limited to one kind.
    pub fn clear_matching(&self, kind: Option<KeyKind>, needle: &str) -> usize {
        let removed = self
            .lock()
            .remove_where(|k| kind.is_none_or(|kind| k.kind == kind) && k.id.contains(needle));
        info!(
            "Cleared {} cache entries containing '{}': {:?}",
            removed.len(),
            needle,
            removed.iter().map(ToString::to_string).collect::<Vec<_>>()
        );
        metrics::record_invalidation("match", removed.len());
        removed.len()
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut store = self.lock();
        let count = store.entries.len();
        store.entries.clear();
        store.by_kind.clear();
        drop(store);
        info!("Cleared all {} cache entries", count);
        metrics::record_invalidation("all", count);
    }

    /// Remove all expired entries. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let mut store = self.lock();
        let now = Instant::now();
        let expired: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            store.remove(key);
        }
        if !expired.is_empty() {
            debug!("Cache sweep removed {} expired entries", expired.len());
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Rendered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().entries.keys().map(ToString::to_string).collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> CacheStats {
        let store = self.lock();
        let now = Instant::now();

        let mut ttl_distribution: BTreeMap<&'static str, usize> = TtlTier::ALL
            .iter()
            .map(|t| (t.label(), 0))
            .chain(std::iter::once(("default", 0)))
            .collect();
        let mut expired = 0;
        let mut total_hits = 0;

        for entry in store.entries.values() {
            total_hits += entry.hits;
            if entry.is_expired(now) {
                expired += 1;
            }
            let label = entry.tier.map(TtlTier::label).unwrap_or("default");
            *ttl_distribution.entry(label).or_default() += 1;
        }

        let total = store.entries.len();
        CacheStats {
            total,
            expired,
            total_hits,
            hit_rate: if total > 0 {
                total_hits as f64 / total as f64
            } else {
                0.0
            },
            capacity: self.max_entries,
            memory_usage: format!("{}/{}", total, self.max_entries),
            ttl_distribution,
        }
    }

    /// Every entry with age, TTL and hits, most-hit first.
    pub fn detailed(&self) -> Vec<EntryDetail> {
        let store = self.lock();
        let now = Instant::now();
        let mut rows: Vec<EntryDetail> = store
            .entries
            .iter()
            .map(|(key, e)| {
                let age = now.duration_since(e.cached_at);
                EntryDetail {
                    key: key.to_string(),
                    published_date: e.published,
                    age_secs: age.as_secs(),
                    ttl_secs: e.ttl.as_secs(),
                    remaining_secs: e.ttl.saturating_sub(age).as_secs(),
                    hits: e.hits,
                    expired: e.is_expired(now),
                }
            })
            .collect();
        rows.sort_by(|a, b| b.hits.cmp(&a.hits).then_with(|| a.key.cmp(&b.key)));
        rows
    }
}

/// Translate a `*` wildcard pattern into an anchored regex with every
/// other character escaped.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    Regex::new(&format!("^{}$", escaped.join(".*"))).ok()
}
