use crate::cache::DateBasedCache;
use crate::config::Config;
use crate::fallback::HybridFetcher;
use crate::output_cache::OutputCache;
use crate::revalidate::{AppInvalidator, InvalidationSink, RevalidationGateway};
use crate::song_list::SongListCache;
use crate::songs::SongService;
use crate::upstream::{RelayCache, UpstreamClient};
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::rate_limit::RateLimiter;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Date-based store shared by every content path
    pub cache: Arc<RelayCache>,
    pub upstream: Arc<UpstreamClient>,
    pub songs: Arc<SongService>,
    /// Full listing backing the sitemaps
    pub song_list: Arc<SongListCache>,
    /// Rendered responses, invalidated by tag or path
    pub output: Arc<OutputCache>,
    pub gateway: Arc<RevalidationGateway>,
    /// Per-IP rate limiter (None = disabled)
    pub rate_limiter: Option<RateLimiter>,
    pub metrics: PrometheusHandle,
    pub started_at: Instant,
}

impl AppState {
    /// Wire every component from the given configuration
    pub fn new(config: Config) -> Self {
        let http_client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to create HTTP client");

        let cache: Arc<RelayCache> = Arc::new(DateBasedCache::with_options(
            config.cache_max_entries,
            Duration::from_secs(config.default_ttl_secs),
            config.ttl_jitter,
        ));

        let upstream = Arc::new(UpstreamClient::new(
            http_client.clone(),
            config.upstream_url.clone(),
            Arc::clone(&cache),
            config.is_dev,
        ));

        let fetcher = HybridFetcher::from_config(&http_client, &config);
        let songs = Arc::new(SongService::new(
            Arc::clone(&cache),
            fetcher,
            Arc::clone(&upstream),
        ));

        let song_list = Arc::new(SongListCache::new(
            Arc::clone(&upstream),
            Duration::from_secs(config.song_list_ttl_secs),
            config.upstream_page_size,
        ));

        let output = Arc::new(OutputCache::new(Duration::from_secs(
            config.output_cache_ttl_secs,
        )));

        let sink: Arc<dyn InvalidationSink> = Arc::new(AppInvalidator::new(
            Arc::clone(&cache),
            Arc::clone(&song_list),
            Arc::clone(&output),
        ));
        let gateway = Arc::new(RevalidationGateway::new(
            config.revalidate_secret.clone(),
            sink,
        ));

        let rate_limiter = if config.rate_limit_rpm > 0 {
            Some(RateLimiter::new(config.rate_limit_rpm))
        } else {
            None
        };

        Self {
            config: Arc::new(config),
            cache,
            upstream,
            songs,
            song_list,
            output,
            gateway,
            rate_limiter,
            metrics: crate::metrics::init(),
            started_at: Instant::now(),
        }
    }
}
