//! Upstream feed model.
//!
//! The CMS wraps scalar fields as `{"$t": "..."}` and encodes song metadata
//! as free-text category terms such as `Movie:Jailer` or `Singer:Anirudh`.

use crate::content::slug::{slug_from_link, slugify};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category prefixes that mark an entry as a song.
pub const SONG_PREFIXES: [&str; 2] = ["Song:", "OldSong:"];

/// `{"$t": "..."}` text wrapper used throughout the feed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Text {
    #[serde(rename = "$t", default)]
    pub t: String,
}

impl Text {
    pub fn new(value: impl Into<String>) -> Self {
        Self { t: value.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub term: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

/// One published post.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub id: Text,
    #[serde(default)]
    pub title: Text,
    #[serde(default)]
    pub content: Text,
    #[serde(default)]
    pub published: Text,
    #[serde(default)]
    pub category: Vec<Category>,
    #[serde(default)]
    pub link: Vec<Link>,
    #[serde(rename = "media$thumbnail", default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Thumbnail>,
}

impl Entry {
    pub fn id(&self) -> &str {
        &self.id.t
    }

    pub fn title(&self) -> &str {
        &self.title.t
    }

    pub fn content(&self) -> &str {
        &self.content.t
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.published.t.trim())
            .ok()
            .map(|d| d.with_timezone(&Utc))
    }

    pub fn thumbnail_url(&self) -> Option<&str> {
        self.thumbnail.as_ref().map(|t| t.url.as_str())
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.category.iter().map(|c| c.term.as_str())
    }

    /// Value of the first category term starting with `prefix`, trimmed.
    /// Duplicates are ignored: first match wins.
    pub fn label(&self, prefix: &str) -> Option<&str> {
        self.terms()
            .find_map(|term| term.strip_prefix(prefix))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn song_title(&self) -> Option<&str> {
        self.label("Song:")
    }

    pub fn movie_name(&self) -> Option<&str> {
        self.label("Movie:")
    }

    pub fn singer_name(&self) -> Option<&str> {
        self.label("Singer:")
    }

    pub fn lyricist_name(&self) -> Option<&str> {
        self.label("Lyrics:").or_else(|| self.label("Lyricist:"))
    }

    pub fn music_name(&self) -> Option<&str> {
        self.label("Music:")
    }

    pub fn actor_name(&self) -> Option<&str> {
        self.label("Actor:")
    }

    /// Posts labelled as English translations keep their body as one block.
    pub fn is_english_translation(&self) -> bool {
        self.terms()
            .any(|term| term.to_lowercase().contains("englishtranslation"))
    }

    pub fn is_song(&self) -> bool {
        self.terms()
            .any(|term| SONG_PREFIXES.iter().any(|p| term.starts_with(p)))
    }

    /// Slug used for routing: the title slug, falling back to the
    /// permalink and then to the `Song:` term.
    pub fn slug(&self) -> String {
        let from_title = slugify(self.title());
        if !from_title.is_empty() {
            return from_title;
        }
        if let Some(slug) = self.permalink_slug() {
            return slug;
        }
        self.song_title().map(slugify).unwrap_or_default()
    }

    /// Slug of the `alternate` link, if the post has one.
    pub fn permalink_slug(&self) -> Option<String> {
        self.link
            .iter()
            .find(|l| l.rel == "alternate")
            .and_then(|l| slug_from_link(&l.href))
    }

    /// True when either the title slug or the permalink slug is `slug`.
    pub fn matches_slug(&self, slug: &str) -> bool {
        self.slug() == slug || self.permalink_slug().is_some_and(|s| s == slug)
    }
}

/// Feed body as trimmed by the relay: entries, or categories for
/// label-only requests.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    #[serde(default)]
    pub entry: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<Category>,
}

/// Top-level upstream response: `{"feed": {...}}`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FeedResponse {
    #[serde(default)]
    pub feed: Feed,
}

impl Feed {
    /// Newest publish date across entries.
    pub fn newest_published(&self) -> Option<DateTime<Utc>> {
        self.entry.iter().filter_map(Entry::published_at).max()
    }
}
