//! Upstream CMS feed client.
//!
//! Every feed read goes through the date-based store: a feed response is
//! cached under its URL with the newest entry's publish date, and each
//! entry is also cached on its own under `song:<id>`.

use crate::cache::{CacheKey, DateBasedCache};
use crate::content::entry::FeedResponse;
use crate::content::{Entry, Feed, SongSnapshot};
use crate::error::{RelayError, Result};
use crate::metrics;
use chrono::Utc;
use reqwest::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// User-Agent sent on every upstream request
pub const UPSTREAM_USER_AGENT: &str = "Mozilla/5.0 (compatible; TamilSongLyrics/1.0)";

/// Feed path under the upstream base URL
pub const FEED_PATH: &str = "/feeds/posts/default";

/// Rows requested for the latest-songs page
pub const LATEST_PAGE_SIZE: usize = 20;

/// Rows requested from a label feed when collecting related songs
pub const RELATED_PAGE_SIZE: usize = 15;

/// Value stored in the date-based cache.
#[derive(Clone, Debug)]
pub enum CachedPayload {
    Feed(Arc<Feed>),
    Entry(Arc<Entry>),
    Song(Arc<SongSnapshot>),
}

pub type RelayCache = DateBasedCache<CachedPayload>;

/// Cached access to the upstream feed API.
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    cache: Arc<RelayCache>,
    is_dev: bool,
}

impl UpstreamClient {
    pub fn new(client: Client, base_url: impl Into<String>, cache: Arc<RelayCache>, is_dev: bool) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache,
            is_dev,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a feed URL, optionally scoped to a label (`/-/<label>`).
    pub fn feed_url(&self, label: Option<&str>, params: &[(&str, &str)]) -> Result<String> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, FEED_PATH))
            .map_err(|e| RelayError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;

        if let Some(label) = label {
            url.path_segments_mut()
                .map_err(|_| RelayError::InvalidUrl(self.base_url.clone()))?
                .push("-")
                .push(label);
        }

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("alt", "json");
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }

        Ok(url.into())
    }

    /// Fetch a feed URL through the store.
    ///
    /// On a miss the trimmed feed is cached with the newest entry's publish
    /// date and every entry is cached under `song:<id>`.
    pub async fn fetch_feed(&self, url: &str) -> Result<Arc<Feed>> {
        let key = CacheKey::feed(url);
        if let Some(CachedPayload::Feed(feed)) = self.cache.get(&key) {
            debug!("Store hit for feed {}", url);
            return Ok(feed);
        }

        let feed = Arc::new(self.fetch_uncached(url).await?);

        self.cache
            .set(key, CachedPayload::Feed(Arc::clone(&feed)), feed.newest_published());
        for entry in feed.entry.iter().filter(|e| !e.id().is_empty()) {
            self.cache.set(
                CacheKey::entry(entry.id()),
                CachedPayload::Entry(Arc::new(entry.clone())),
                entry.published_at(),
            );
        }

        Ok(feed)
    }

    /// Drop the cached copy of `url` and fetch it again.
    pub async fn refresh(&self, url: &str) -> Result<Arc<Feed>> {
        self.cache.remove(&CacheKey::feed(url));
        info!("Force refreshing upstream feed {}", url);
        self.fetch_feed(url).await
    }

    /// First page of the newest posts, also kept under `songs:latest`.
    pub async fn latest(&self) -> Result<Arc<Feed>> {
        let key = CacheKey::latest_songs();
        if let Some(CachedPayload::Feed(feed)) = self.cache.get(&key) {
            return Ok(feed);
        }

        let max = LATEST_PAGE_SIZE.to_string();
        let url = self.feed_url(None, &[("max-results", &max)])?;
        let feed = self.fetch_feed(&url).await?;
        self.cache
            .set(key, CachedPayload::Feed(Arc::clone(&feed)), feed.newest_published());
        Ok(feed)
    }

    /// Full-text search over posts.
    pub async fn search(&self, terms: &str, max_results: usize) -> Result<Arc<Feed>> {
        let max = max_results.to_string();
        let url = self.feed_url(None, &[("q", terms), ("max-results", &max)])?;
        self.fetch_feed(&url).await
    }

    /// Posts carrying a label such as `Movie:Jailer`.
    pub async fn by_label(&self, label: &str, max_results: usize) -> Result<Arc<Feed>> {
        let max = max_results.to_string();
        let url = self.feed_url(Some(label), &[("max-results", &max)])?;
        self.fetch_feed(&url).await
    }

    /// One page of the full post listing, bypassing the store.
    pub async fn page(&self, start_index: usize, max_results: usize) -> Result<Feed> {
        let start = start_index.to_string();
        let max = max_results.to_string();
        let url = self.feed_url(None, &[("max-results", &max), ("start-index", &start)])?;
        self.fetch_uncached(&url).await
    }

    async fn fetch_uncached(&self, url: &str) -> Result<Feed> {
        let fetch_url = if self.is_dev {
            with_cache_buster(url, Utc::now().timestamp_millis())
        } else {
            url.to_string()
        };
        info!(
            "Fetching upstream feed ({}): {}",
            if self.is_dev { "dev, cache bust" } else { "prod" },
            fetch_url
        );

        let response = self
            .client
            .get(&fetch_url)
            .header(USER_AGENT, UPSTREAM_USER_AGENT)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                warn!("Upstream request failed for {}: {}", url, e);
                metrics::record_upstream_error();
                RelayError::UpstreamFetch(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Upstream returned {} for {}", status, url);
            metrics::record_upstream_error();
            return Err(RelayError::UpstreamStatus(status.as_u16()));
        }

        let body: FeedResponse = response.json().await?;
        Ok(trim_feed(body.feed, is_category_request(url)))
    }
}

/// Keep only what the relay uses: entries, or categories for a
/// `max-results=0` label listing.
pub fn trim_feed(feed: Feed, category_request: bool) -> Feed {
    if category_request {
        Feed {
            entry: Vec::new(),
            category: feed.category,
        }
    } else {
        Feed {
            entry: feed.entry,
            category: Vec::new(),
        }
    }
}

fn is_category_request(url: &str) -> bool {
    Url::parse(url)
        .map(|u| u.query_pairs().any(|(k, v)| k == "max-results" && v == "0"))
        .unwrap_or(false)
}

fn with_cache_buster(url: &str, millis: i64) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}_={}", url, sep, millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn feed_body() -> serde_json::Value {
        json!({
            "feed": {
                "title": {"$t": "Tamil Song Lyrics"},
                "category": [{"term": "Movie:Jailer"}],
                "entry": [
                    {
                        "id": {"$t": "post-1"},
                        "title": {"$t": "Hukum Lyrics"},
                        "content": {"$t": "a<br><br>b"},
                        "published": {"$t": "2023-07-17T10:00:00Z"},
                        "category": [{"term": "Song:Hukum"}]
                    },
                    {
                        "id": {"$t": "post-2"},
                        "title": {"$t": "Kaavaalaa Lyrics"},
                        "content": {"$t": "c"},
                        "published": {"$t": "2023-07-06T10:00:00Z"},
                        "category": [{"term": "Song:Kaavaalaa"}]
                    }
                ]
            }
        })
    }

    fn client_for(server: &MockServer) -> (UpstreamClient, Arc<RelayCache>) {
        let cache = Arc::new(RelayCache::new(200));
        let upstream = UpstreamClient::new(Client::new(), server.uri(), Arc::clone(&cache), false);
        (upstream, cache)
    }

    #[test]
    fn builds_feed_urls() {
        let cache = Arc::new(RelayCache::new(10));
        let upstream = UpstreamClient::new(Client::new(), "https://cms.example.com/", cache, false);

        assert_eq!(
            upstream.feed_url(None, &[("q", "ravana mavan da")]).unwrap(),
            "https://cms.example.com/feeds/posts/default?alt=json&q=ravana+mavan+da"
        );
        assert_eq!(
            upstream
                .feed_url(Some("Movie:Jailer"), &[("max-results", "15")])
                .unwrap(),
            "https://cms.example.com/feeds/posts/default/-/Movie:Jailer?alt=json&max-results=15"
        );
    }

    #[test]
    fn cache_buster_appends_param() {
        assert_eq!(with_cache_buster("https://x/feed?alt=json", 7), "https://x/feed?alt=json&_=7");
        assert_eq!(with_cache_buster("https://x/feed", 7), "https://x/feed?_=7");
    }

    #[test]
    fn detects_category_requests() {
        assert!(is_category_request("https://x/feeds/posts/default?alt=json&max-results=0"));
        assert!(!is_category_request("https://x/feeds/posts/default?alt=json&max-results=05"));
        assert!(!is_category_request("not a url"));
    }

    #[tokio::test]
    async fn feed_is_fetched_once_then_served_from_store() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(FEED_PATH))
            .and(header("user-agent", UPSTREAM_USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_json(feed_body()))
            .expect(1)
            .mount(&server)
            .await;

        let (upstream, cache) = client_for(&server);
        let first = upstream.search("hukum", 10).await.unwrap();
        let second = upstream.search("hukum", 10).await.unwrap();

        assert_eq!(first.entry.len(), 2);
        assert!(first.category.is_empty());
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(
            cache.get(&CacheKey::entry("post-1")),
            Some(CachedPayload::Entry(e)) if e.title() == "Hukum Lyrics"
        ));
        // feed + two entries
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn category_listing_keeps_only_categories() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("max-results", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(feed_body()))
            .mount(&server)
            .await;

        let (upstream, _) = client_for(&server);
        let url = upstream.feed_url(None, &[("max-results", "0")]).unwrap();
        let feed = upstream.fetch_feed(&url).await.unwrap();
        assert!(feed.entry.is_empty());
        assert_eq!(feed.category.len(), 1);
    }

    #[tokio::test]
    async fn error_status_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let (upstream, cache) = client_for(&server);
        assert!(matches!(
            upstream.search("x", 5).await,
            Err(RelayError::UpstreamStatus(503))
        ));
        assert!(upstream.search("x", 5).await.is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn latest_is_kept_under_songs_latest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("max-results", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(feed_body()))
            .expect(1)
            .mount(&server)
            .await;

        let (upstream, cache) = client_for(&server);
        upstream.latest().await.unwrap();
        assert!(cache.get(&CacheKey::latest_songs()).is_some());

        // Served from songs:latest even after the feed key is gone
        let url = upstream.feed_url(None, &[("max-results", "20")]).unwrap();
        cache.remove(&CacheKey::feed(&url));
        assert_eq!(upstream.latest().await.unwrap().entry.len(), 2);
    }

    #[tokio::test]
    async fn refresh_bypasses_store() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(feed_body()))
            .expect(2)
            .mount(&server)
            .await;

        let (upstream, _) = client_for(&server);
        let url = upstream.feed_url(None, &[("q", "hukum")]).unwrap();
        upstream.fetch_feed(&url).await.unwrap();
        upstream.refresh(&url).await.unwrap();
    }

    #[tokio::test]
    async fn page_is_not_stored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("start-index", "151"))
            .respond_with(ResponseTemplate::new(200).set_body_json(feed_body()))
            .mount(&server)
            .await;

        let (upstream, cache) = client_for(&server);
        let page = upstream.page(151, 150).await.unwrap();
        assert_eq!(page.entry.len(), 2);
        assert!(cache.is_empty());
    }
}
