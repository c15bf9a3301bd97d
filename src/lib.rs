//! Lyrics relay: a caching front for an upstream blog CMS feed.
//!
//! Content resolves through a tiered pipeline (static snapshot, optional
//! blob API, upstream feed) backed by a date-based TTL cache. An
//! authenticated revalidation gateway invalidates the cache and the
//! rendered-response cache out of band.

pub mod cache;
pub mod config;
pub mod content;
pub mod error;
pub mod fallback;
pub mod http_retry;
pub mod metrics;
pub mod output_cache;
pub mod revalidate;
pub mod server;
pub mod singleflight;
pub mod sitemap;
pub mod song_list;
pub mod songs;
pub mod ttl;
pub mod upstream;
