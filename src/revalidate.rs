//! Authenticated invalidation.
//!
//! The gateway authenticates first and only then parses the request and
//! touches any cache. All mutation goes through [`InvalidationSink`], so the
//! "no side effects without the secret" rule can be checked with a spy.

use crate::cache::KeyKind;
use crate::content::normalize_slug;
use crate::error::{RelayError, Result};
use crate::output_cache::OutputCache;
use crate::song_list::SongListCache;
use crate::upstream::RelayCache;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

/// Header carrying the shared secret
pub const SECRET_HEADER: &str = "x-revalidate-secret";

/// Sitemap pages revalidated by path in addition to the `sitemap` tag
pub const SITEMAP_PATH_PAGES: u32 = 4;

/// Tag attached to every rendered sitemap document
pub const SITEMAP_TAG: &str = "sitemap";

/// Everything the gateway is allowed to mutate.
///
/// Counts are informational; implementations must not fail.
pub trait InvalidationSink: Send + Sync {
    /// Drop every date-based store entry
    fn clear_store(&self) -> usize;

    /// Drop every store entry of one kind
    fn clear_store_kind(&self, kind: KeyKind) -> usize;

    /// Drop every store entry whose key contains `needle`
    fn clear_store_matching(&self, needle: &str) -> usize;

    /// Drop the accumulated song list
    fn clear_song_list(&self);

    /// Drop rendered outputs labelled with `tag`
    fn revalidate_tag(&self, tag: &str) -> usize;

    /// Drop the rendered output for `path`
    fn revalidate_path(&self, path: &str) -> bool;
}

/// Cache family of one song, selectable with `type=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathScope {
    Page,
    Cdn,
    Api,
}

impl PathScope {
    pub const ALL: [PathScope; 3] = [PathScope::Page, PathScope::Cdn, PathScope::Api];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "page" => Some(Self::Page),
            "cdn" => Some(Self::Cdn),
            "api" => Some(Self::Api),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Cdn => "cdn",
            Self::Api => "api",
        }
    }

    pub fn tag(self, slug: &str) -> String {
        match self {
            Self::Page => format!("song-{}", slug),
            Self::Cdn => format!("cdn-{}", slug),
            Self::Api => format!("api-{}", slug),
        }
    }

    pub fn path(self, slug: &str) -> String {
        match self {
            Self::Page => format!("/{}.html", slug),
            Self::Cdn => format!("/songs/{}.json", slug),
            Self::Api => format!("/api/songs/{}", slug),
        }
    }
}

/// What a validated request asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum RevalidateAction {
    ClearAll,
    Tag(String),
    Path {
        path: String,
        scope: Option<PathScope>,
    },
}

/// Raw parameters, from the query string (GET) or a JSON body (POST).
#[derive(Debug, Default, Deserialize)]
pub struct RevalidateParams {
    pub secret: Option<String>,
    #[serde(rename = "clearAll", default, deserialize_with = "flag")]
    pub clear_all: bool,
    pub tag: Option<String>,
    pub path: Option<String>,
    #[serde(rename = "type")]
    pub scope: Option<String>,
}

/// Accepts `true`, `"true"` or `"1"`.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }
    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Text(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1"),
        None => false,
    })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub fn usage() -> Value {
    json!({
        "clearAll": "/api/revalidate?secret=<secret>&clearAll=true",
        "tag": "/api/revalidate?secret=<secret>&tag=song-<slug>",
        "path": "/api/revalidate?secret=<secret>&path=/<slug>.html",
        "type": "optional with a song path: page | cdn | api",
        "header": format!("the secret may also be sent as {}", SECRET_HEADER)
    })
}

impl RevalidateParams {
    /// Resolve the requested action. `clearAll` wins over `tag`, which wins
    /// over `path`.
    pub fn action(&self) -> Result<RevalidateAction> {
        if self.clear_all {
            return Ok(RevalidateAction::ClearAll);
        }
        if let Some(tag) = non_empty(&self.tag) {
            return Ok(RevalidateAction::Tag(tag.to_string()));
        }
        if let Some(path) = non_empty(&self.path) {
            let scope = match non_empty(&self.scope) {
                Some(raw) => Some(PathScope::parse(raw).ok_or_else(|| {
                    RelayError::bad_request_with_usage(format!("Invalid type: {}", raw), usage())
                })?),
                None => None,
            };
            let path = if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{}", path)
            };
            return Ok(RevalidateAction::Path { path, scope });
        }
        Err(RelayError::bad_request_with_usage("Missing parameter", usage()))
    }
}

/// Body of a successful revalidation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevalidateOutcome {
    pub revalidated: bool,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub results: Vec<String>,
    pub cleared_entries: usize,
    pub timestamp: String,
}

impl RevalidateOutcome {
    fn new(kind: impl Into<String>) -> Self {
        Self {
            revalidated: true,
            kind: kind.into(),
            tag: None,
            path: None,
            message: None,
            results: Vec::new(),
            cleared_entries: 0,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Slug of a song page path such as `/ravana-mavan-da-lyrics.html`.
pub fn song_slug_from_path(path: &str) -> Option<String> {
    let file = path.strip_prefix('/')?;
    if file.contains('/') || !file.ends_with(".html") {
        return None;
    }
    let slug = normalize_slug(file);
    (!slug.is_empty()).then_some(slug)
}

/// Clear the song list and every rendered sitemap, plus the home page.
pub fn revalidate_sitemap(sink: &dyn InvalidationSink) -> Vec<String> {
    sink.clear_song_list();
    sink.revalidate_tag(SITEMAP_TAG);
    sink.revalidate_path("/sitemap.xml");
    for page in 0..SITEMAP_PATH_PAGES {
        sink.revalidate_path(&format!("/sitemap/{}.xml", page));
    }
    sink.revalidate_path("/");
    info!("Sitemap revalidated");

    vec![
        "Cleared song list cache".to_string(),
        format!(
            "Revalidated sitemap index and pages 0-{}",
            SITEMAP_PATH_PAGES - 1
        ),
        "Revalidated home page".to_string(),
    ]
}

pub struct RevalidationGateway {
    secret: String,
    sink: Arc<dyn InvalidationSink>,
}

impl RevalidationGateway {
    pub fn new(secret: impl Into<String>, sink: Arc<dyn InvalidationSink>) -> Self {
        Self {
            secret: secret.into(),
            sink,
        }
    }

    /// Constant-time comparison against the configured secret.
    pub fn authorize(&self, provided: Option<&str>) -> Result<()> {
        let ok = provided.is_some_and(|p| bool::from(p.as_bytes().ct_eq(self.secret.as_bytes())));
        if ok {
            Ok(())
        } else {
            warn!("Rejected control request with invalid or missing secret");
            Err(RelayError::Unauthorized)
        }
    }

    /// Authenticate, then run the requested invalidation.
    ///
    /// `header_secret` takes precedence over the `secret` parameter.
    pub fn handle(
        &self,
        header_secret: Option<&str>,
        params: &RevalidateParams,
    ) -> Result<RevalidateOutcome> {
        self.authorize(header_secret.or(params.secret.as_deref()))?;
        let action = params.action()?;
        Ok(self.execute(action))
    }

    /// Sitemap-only revalidation for the dedicated endpoint.
    pub fn handle_sitemap(&self, header_secret: Option<&str>) -> Result<RevalidateOutcome> {
        self.authorize(header_secret)?;
        let mut outcome = RevalidateOutcome::new("sitemap");
        outcome.path = Some("/sitemap.xml".to_string());
        outcome.results = revalidate_sitemap(self.sink.as_ref());
        outcome.message = Some(
            "Sitemap index, paginated sitemaps and home page revalidated".to_string(),
        );
        Ok(outcome)
    }

    fn execute(&self, action: RevalidateAction) -> RevalidateOutcome {
        match action {
            RevalidateAction::ClearAll => self.clear_all(),
            RevalidateAction::Tag(tag) => self.tag(tag),
            RevalidateAction::Path { path, scope } => self.path(path, scope),
        }
    }

    fn clear_all(&self) -> RevalidateOutcome {
        let sink = self.sink.as_ref();
        let mut outcome = RevalidateOutcome::new("all");

        outcome.cleared_entries = sink.clear_store();
        sink.clear_song_list();
        for tag in ["songs-latest", "homepage", "trending-api"] {
            sink.revalidate_tag(tag);
        }
        for path in ["/", "/search"] {
            sink.revalidate_path(path);
        }
        info!(
            "Cleared all caches ({} store entries, song list, homepage, search, trending)",
            outcome.cleared_entries
        );

        outcome.results = vec![
            format!("Cleared {} store entries", outcome.cleared_entries),
            "Cleared song list cache".to_string(),
            "Revalidated tags songs-latest, homepage, trending-api".to_string(),
            "Revalidated paths / and /search".to_string(),
        ];
        outcome.message = Some("All caches cleared".to_string());
        outcome
    }

    fn tag(&self, tag: String) -> RevalidateOutcome {
        let sink = self.sink.as_ref();
        let mut outcome = RevalidateOutcome::new("tag");

        if let Some(slug) = tag.strip_prefix("song-").filter(|s| !s.is_empty()) {
            outcome.cleared_entries = sink.clear_store_matching(slug);
            outcome
                .results
                .push(format!("Cleared {} store entries for {}", outcome.cleared_entries, slug));
        }
        let dropped = sink.revalidate_tag(&tag);
        info!(
            "Revalidated tag {} ({} store entries, {} rendered outputs)",
            tag, outcome.cleared_entries, dropped
        );

        outcome.results.push(format!("Revalidated tag {}", tag));
        outcome.tag = Some(tag);
        outcome
    }

    fn path(&self, path: String, scope: Option<PathScope>) -> RevalidateOutcome {
        let sink = self.sink.as_ref();

        let mut outcome = match path.as_str() {
            "/" => {
                let mut o = RevalidateOutcome::new("path");
                o.cleared_entries = sink.clear_store_kind(KeyKind::SongList)
                    + sink.clear_store_kind(KeyKind::Feed);
                sink.revalidate_tag("songs-latest");
                sink.revalidate_tag("homepage");
                sink.revalidate_path("/");
                o.results.push("Cleared homepage (data + page render)".to_string());
                o
            }
            "/search" => {
                let mut o = RevalidateOutcome::new("path");
                sink.revalidate_tag("trending-api");
                sink.revalidate_path("/search");
                o.results.push("Cleared trending API cache".to_string());
                o.results.push("Cleared search page".to_string());
                o
            }
            "/api/trending" => {
                let mut o = RevalidateOutcome::new("path");
                sink.revalidate_tag("trending-api");
                o.results.push("Cleared trending API cache".to_string());
                o
            }
            "/sitemap.xml" => {
                let mut o = RevalidateOutcome::new("sitemap");
                o.results = revalidate_sitemap(sink);
                o
            }
            other => match song_slug_from_path(other) {
                Some(slug) => self.song_path(&slug, scope),
                None => {
                    let mut o = RevalidateOutcome::new("path");
                    sink.revalidate_path(other);
                    o.results.push(format!("Revalidated path {}", other));
                    o
                }
            },
        };

        info!("Revalidated path {}: {}", path, outcome.results.join("; "));
        outcome.path = Some(path);
        outcome
    }

    fn song_path(&self, slug: &str, scope: Option<PathScope>) -> RevalidateOutcome {
        let sink = self.sink.as_ref();
        let mut outcome = RevalidateOutcome::new(scope.map_or("all", PathScope::name));

        outcome.cleared_entries = sink.clear_store_matching(slug);
        outcome
            .results
            .push(format!("Cleared {} store entries for {}", outcome.cleared_entries, slug));

        let scopes = match scope {
            Some(one) => vec![one],
            None => PathScope::ALL.to_vec(),
        };
        for scope in scopes {
            let tag = scope.tag(slug);
            let path = scope.path(slug);
            sink.revalidate_tag(&tag);
            sink.revalidate_path(&path);
            outcome
                .results
                .push(format!("Cleared {} cache ({} + {})", scope.name(), tag, path));
        }
        outcome
    }
}

/// Invalidation over the relay's real caches.
pub struct AppInvalidator {
    cache: Arc<RelayCache>,
    song_list: Arc<SongListCache>,
    output: Arc<OutputCache>,
}

impl AppInvalidator {
    pub fn new(cache: Arc<RelayCache>, song_list: Arc<SongListCache>, output: Arc<OutputCache>) -> Self {
        Self {
            cache,
            song_list,
            output,
        }
    }
}

impl InvalidationSink for AppInvalidator {
    fn clear_store(&self) -> usize {
        let count = self.cache.len();
        self.cache.clear();
        count
    }

    fn clear_store_kind(&self, kind: KeyKind) -> usize {
        self.cache.clear_kind(kind)
    }

    fn clear_store_matching(&self, needle: &str) -> usize {
        self.cache.clear_matching(None, needle)
    }

    fn clear_song_list(&self) {
        self.song_list.clear();
    }

    fn revalidate_tag(&self, tag: &str) -> usize {
        self.output.revalidate_tag(tag)
    }

    fn revalidate_path(&self, path: &str) -> bool {
        self.output.revalidate_path(path)
    }
}
