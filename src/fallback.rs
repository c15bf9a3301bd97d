//! Tiered snapshot lookup.
//!
//! Tiers are tried strictly in order; the first structurally valid payload
//! wins. Every failure inside a tier (network, bad status, undecodable body,
//! wrong shape) is converted into a miss at the tier boundary, so the
//! fetcher itself cannot fail: it returns a snapshot or nothing.
//!
//! Tier 1 is the static snapshot host (`{base}/songs/{slug}.json`).
//! Tier 2 is the blob API (`{base}/api/songs/{slug}`), behind a feature
//! flag that is off by default.

use crate::config::Config;
use crate::content::{SongSnapshot, normalize_slug};
use crate::http_retry::{RetryConfig, fetch_with_retry};
use crate::metrics;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Result of asking one tier for a slug.
#[derive(Debug)]
pub enum TierLookup {
    /// Valid payload
    Hit(SongSnapshot),
    /// Tier answered with an explicit not-found
    Miss,
    /// Tier answered, but the payload was rejected
    Invalid(String),
    /// Tier could not be reached after all retries
    Failed(String),
}

impl TierLookup {
    fn outcome(&self) -> &'static str {
        match self {
            Self::Hit(_) => "hit",
            Self::Miss => "miss",
            Self::Invalid(_) => "invalid",
            Self::Failed(_) => "failed",
        }
    }
}

/// One stage of the fallback chain.
///
/// Implementations must not panic or return errors: everything that goes
/// wrong is reported as [`TierLookup::Miss`], [`TierLookup::Invalid`] or
/// [`TierLookup::Failed`].
#[async_trait]
pub trait SnapshotTier: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Look up an already-normalized slug
    async fn lookup(&self, slug: &str) -> TierLookup;
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Layout {
    /// `{base}/songs/{slug}.json`
    StaticFile,
    /// `{base}/api/songs/{slug}`
    Api,
}

/// Snapshot tier served over HTTP with retry and shape validation.
pub struct HttpSnapshotTier {
    name: &'static str,
    client: Client,
    base_url: String,
    layout: Layout,
    retry: RetryConfig,
}

impl HttpSnapshotTier {
    /// Static snapshot host (tier 1)
    pub fn cdn(client: Client, base_url: impl Into<String>) -> Self {
        Self::build("cdn", client, base_url.into(), Layout::StaticFile)
    }

    /// Dynamic blob API (tier 2)
    pub fn blob_api(client: Client, base_url: impl Into<String>) -> Self {
        Self::build("blob", client, base_url.into(), Layout::Api)
    }

    fn build(name: &'static str, client: Client, base_url: String, layout: Layout) -> Self {
        Self {
            name,
            client,
            base_url,
            layout,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// URL for a slug; the slug is percent-encoded as one path segment.
    pub fn url_for(&self, slug: &str) -> Option<String> {
        let mut url = Url::parse(&self.base_url).ok()?;
        {
            let mut segments = url.path_segments_mut().ok()?;
            segments.pop_if_empty();
            match self.layout {
                Layout::StaticFile => {
                    segments.push("songs").push(&format!("{}.json", slug));
                }
                Layout::Api => {
                    segments.push("api").push("songs").push(slug);
                }
            }
        }
        Some(url.into())
    }
}

#[async_trait]
impl SnapshotTier for HttpSnapshotTier {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn lookup(&self, slug: &str) -> TierLookup {
        let Some(url) = self.url_for(slug) else {
            return TierLookup::Failed(format!("invalid base URL {}", self.base_url));
        };

        let response = match fetch_with_retry(&self.client, &url, &self.retry).await {
            Ok(Some(response)) => response,
            Ok(None) => return TierLookup::Miss,
            Err(e) => return TierLookup::Failed(e.to_string()),
        };

        // A body that does not decode is a shape problem, not a transient one
        let value: Value = match response.json().await {
            Ok(value) => value,
            Err(e) => return TierLookup::Invalid(format!("undecodable body: {}", e)),
        };

        match SongSnapshot::validate(value) {
            Ok(item) => TierLookup::Hit(item),
            Err(e) => TierLookup::Invalid(e.to_string()),
        }
    }
}

/// Ordered chain of snapshot tiers.
pub struct HybridFetcher {
    tiers: Vec<Arc<dyn SnapshotTier>>,
}

impl HybridFetcher {
    pub fn new(tiers: Vec<Arc<dyn SnapshotTier>>) -> Self {
        Self { tiers }
    }

    /// Tier 1 always; tier 2 only when enabled and configured.
    pub fn from_config(client: &Client, config: &Config) -> Self {
        let mut tiers: Vec<Arc<dyn SnapshotTier>> = vec![Arc::new(HttpSnapshotTier::cdn(
            client.clone(),
            config.snapshot_base_url.clone(),
        ))];
        if let Some(blob_api) = config.active_blob_api() {
            tiers.push(Arc::new(HttpSnapshotTier::blob_api(client.clone(), blob_api)));
        }
        info!(
            "Snapshot tiers: {}",
            tiers.iter().map(|t| t.name()).collect::<Vec<_>>().join(" -> ")
        );
        Self::new(tiers)
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    /// Resolve a slug (with or without `.html`) to a snapshot.
    ///
    /// Returns `None` when every tier misses; the caller decides what to
    /// fall back to next.
    pub async fn fetch(&self, raw_slug: &str) -> Option<SongSnapshot> {
        let slug = normalize_slug(raw_slug);
        if slug.is_empty() {
            return None;
        }

        for (position, tier) in self.tiers.iter().enumerate() {
            let lookup = tier.lookup(&slug).await;
            metrics::record_tier_outcome(tier.name(), lookup.outcome());

            match lookup {
                TierLookup::Hit(item) => {
                    info!("Tier {} ({}) hit for {}", position + 1, tier.name(), slug);
                    return Some(item);
                }
                TierLookup::Miss => {
                    info!("Tier {} ({}) has no snapshot for {}", position + 1, tier.name(), slug);
                }
                TierLookup::Invalid(reason) => {
                    warn!(
                        "Tier {} ({}) returned invalid snapshot for {}: {}",
                        position + 1,
                        tier.name(),
                        slug,
                        reason
                    );
                }
                TierLookup::Failed(reason) => {
                    warn!(
                        "Tier {} ({}) unavailable for {}: {}",
                        position + 1,
                        tier.name(),
                        slug,
                        reason
                    );
                }
            }
        }

        info!("All snapshot tiers missed for {}", slug);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast() -> RetryConfig {
        RetryConfig {
            backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn fetcher(cdn: &MockServer, blob: Option<&MockServer>) -> HybridFetcher {
        let client = Client::new();
        let mut tiers: Vec<Arc<dyn SnapshotTier>> =
            vec![Arc::new(HttpSnapshotTier::cdn(client.clone(), cdn.uri()).with_retry(fast()))];
        if let Some(blob) = blob {
            tiers.push(Arc::new(
                HttpSnapshotTier::blob_api(client, blob.uri()).with_retry(fast()),
            ));
        }
        HybridFetcher::new(tiers)
    }

    fn ravana() -> Value {
        json!({
            "slug": "ravana-mavan-da-lyrics",
            "title": "Ravana Mavan Da Lyrics",
            "stanzas": ["Ravana mavan da..."],
            "generatorNote": "kept"
        })
    }

    #[test]
    fn url_layouts() {
        let client = Client::new();
        let cdn = HttpSnapshotTier::cdn(client.clone(), "https://cdn.example.com/");
        assert_eq!(
            cdn.url_for("ravana-mavan-da-lyrics").unwrap(),
            "https://cdn.example.com/songs/ravana-mavan-da-lyrics.json"
        );
        let blob = HttpSnapshotTier::blob_api(client, "https://blob.example.com");
        assert_eq!(
            blob.url_for("a b").unwrap(),
            "https://blob.example.com/api/songs/a%20b"
        );
    }

    #[tokio::test]
    async fn tier_one_hit_skips_tier_two() {
        let cdn = MockServer::start().await;
        let blob = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/songs/ravana-mavan-da-lyrics.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ravana()))
            .expect(1)
            .mount(&cdn)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ravana()))
            .expect(0)
            .mount(&blob)
            .await;

        let item = fetcher(&cdn, Some(&blob))
            .fetch("ravana-mavan-da-lyrics.html")
            .await
            .expect("tier 1 hit");
        assert_eq!(item.slug, "ravana-mavan-da-lyrics");
        assert_eq!(item.title, "Ravana Mavan Da Lyrics");
        assert_eq!(item.stanzas, vec!["Ravana mavan da..."]);
        assert_eq!(item.extra["generatorNote"], "kept");
    }

    #[tokio::test]
    async fn not_found_with_tier_two_disabled_is_absent() {
        let cdn = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&cdn)
            .await;

        assert!(fetcher(&cdn, None).fetch("ravana-mavan-da-lyrics").await.is_none());
    }

    #[tokio::test]
    async fn invalid_shape_falls_through_to_next_tier() {
        let cdn = MockServer::start().await;
        let blob = MockServer::start().await;

        let mut broken = ravana();
        broken["stanzas"] = json!("not an array");
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(broken))
            .expect(1)
            .mount(&cdn)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/songs/ravana-mavan-da-lyrics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ravana()))
            .expect(1)
            .mount(&blob)
            .await;

        let item = fetcher(&cdn, Some(&blob)).fetch("ravana-mavan-da-lyrics").await;
        assert_eq!(item.unwrap().slug, "ravana-mavan-da-lyrics");
    }

    #[tokio::test]
    async fn exhausted_retries_are_a_miss_not_an_error() {
        let cdn = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&cdn)
            .await;

        assert!(fetcher(&cdn, None).fetch("some-song").await.is_none());
    }

    #[tokio::test]
    async fn unreachable_tier_is_a_miss() {
        let tier = HttpSnapshotTier::cdn(Client::new(), "http://127.0.0.1:9").with_retry(fast());
        assert!(matches!(tier.lookup("x").await, TierLookup::Failed(_)));

        let fetcher = HybridFetcher::new(vec![Arc::new(tier)]);
        assert!(fetcher.fetch("x").await.is_none());
    }

    #[tokio::test]
    async fn undecodable_body_is_not_retried() {
        let cdn = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .expect(1)
            .mount(&cdn)
            .await;

        let tier = HttpSnapshotTier::cdn(Client::new(), cdn.uri()).with_retry(fast());
        assert!(matches!(tier.lookup("x").await, TierLookup::Invalid(_)));
    }

    #[tokio::test]
    async fn empty_slug_skips_every_tier() {
        let cdn = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ravana()))
            .expect(0)
            .mount(&cdn)
            .await;

        assert!(fetcher(&cdn, None).fetch(" .html ").await.is_none());
    }

    #[test]
    fn blob_tier_follows_feature_flag() {
        let mut config = crate::config::tests::test_config();
        config.blob_api_url = Some("https://blob.example.com".into());
        let client = Client::new();

        assert_eq!(HybridFetcher::from_config(&client, &config).tier_names(), vec!["cdn"]);

        config.blob_tier_enabled = true;
        assert_eq!(
            HybridFetcher::from_config(&client, &config).tier_names(),
            vec!["cdn", "blob"]
        );
    }
}
