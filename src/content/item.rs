//! Shaped content item served to rendering.
//!
//! The same shape is produced by the offline snapshot generator (tier 1 and
//! tier 2) and by [`SongSnapshot::from_entry`] when the relay falls back to
//! the upstream feed.

use crate::content::entry::Entry;
use crate::content::stanza::split_stanzas;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;
use thiserror::Error;

/// Snapshot schema version written by this relay.
pub const SCHEMA_VERSION: u32 = 1;

/// Maximum related songs attached to an item.
pub const MAX_RELATED: usize = 10;

const SITE_NAME: &str = "Tamil Song Lyrics";
const DESCRIPTION_MAX_CHARS: usize = 155;

static THUMB_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/s\d+-c/").expect("valid regex"));
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Why a tier payload was rejected.
#[derive(Debug, Error, PartialEq)]
pub enum SnapshotError {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing or empty slug")]
    MissingSlug,

    #[error("missing or empty title")]
    MissingTitle,

    #[error("stanzas is missing or not an array")]
    StanzasNotArray,

    #[error("malformed snapshot: {0}")]
    Malformed(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedSong {
    pub id: String,
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub movie_name: String,
    #[serde(default)]
    pub singer_name: String,
    #[serde(default)]
    pub published: String,
}

impl RelatedSong {
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            id: entry.id().to_string(),
            title: entry.title().to_string(),
            slug: entry.slug(),
            thumbnail: entry.thumbnail_url().map(enhance_thumbnail),
            movie_name: entry.movie_name().unwrap_or_default().to_string(),
            singer_name: entry.singer_name().unwrap_or_default().to_string(),
            published: entry.published.t.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: String,
    /// Structured data and anything else the generator adds
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SeoMetadata {
    pub fn for_entry(entry: &Entry) -> Self {
        let title = entry.title();
        Self {
            title: format!("{} | {}", title, SITE_NAME),
            description: describe(entry),
            keywords: keywords(entry),
            extra: Map::new(),
        }
    }
}

/// A fully shaped song. Fields this relay does not know about are kept in
/// `extra` and serialized back unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongSnapshot {
    pub slug: String,
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub movie_name: String,
    #[serde(default)]
    pub singer_name: String,
    #[serde(default)]
    pub lyricist_name: String,
    #[serde(default)]
    pub music_name: String,
    #[serde(default)]
    pub actor_name: String,
    #[serde(default)]
    pub published: String,
    pub stanzas: Vec<String>,
    #[serde(default)]
    pub has_tamil_lyrics: bool,
    #[serde(default)]
    pub tamil_stanzas: Vec<String>,
    #[serde(default)]
    pub category: Vec<String>,
    #[serde(default)]
    pub related_songs: Vec<RelatedSong>,
    #[serde(default)]
    pub seo: SeoMetadata,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub generated_at: Option<String>,
    #[serde(default)]
    pub version: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SongSnapshot {
    /// Check the structural shape of a tier payload and decode it.
    ///
    /// A payload is accepted only with a non-empty `slug`, a non-empty
    /// `title` and an array-typed `stanzas`.
    pub fn validate(value: Value) -> Result<Self, SnapshotError> {
        let obj = value.as_object().ok_or(SnapshotError::NotAnObject)?;

        let non_empty = |field: &str| {
            obj.get(field)
                .and_then(Value::as_str)
                .is_some_and(|s| !s.trim().is_empty())
        };
        if !non_empty("slug") {
            return Err(SnapshotError::MissingSlug);
        }
        if !non_empty("title") {
            return Err(SnapshotError::MissingTitle);
        }
        if !obj.get("stanzas").is_some_and(Value::is_array) {
            return Err(SnapshotError::StanzasNotArray);
        }

        serde_json::from_value(value).map_err(|e| SnapshotError::Malformed(e.to_string()))
    }

    /// Shape an upstream entry. Related songs are attached by the caller.
    pub fn from_entry(entry: &Entry, related: Vec<RelatedSong>) -> Self {
        Self {
            slug: entry.slug(),
            id: entry.id().to_string(),
            title: entry.title().to_string(),
            movie_name: entry.movie_name().unwrap_or_default().to_string(),
            singer_name: entry.singer_name().unwrap_or_default().to_string(),
            lyricist_name: entry.lyricist_name().unwrap_or_default().to_string(),
            music_name: entry.music_name().unwrap_or_default().to_string(),
            actor_name: entry.actor_name().unwrap_or_default().to_string(),
            published: entry.published.t.clone(),
            stanzas: split_stanzas(entry.content(), entry.is_english_translation()),
            has_tamil_lyrics: false,
            tamil_stanzas: Vec::new(),
            category: entry.terms().map(str::to_string).collect(),
            related_songs: related
                .into_iter()
                .filter(|r| r.id != entry.id())
                .take(MAX_RELATED)
                .collect(),
            seo: SeoMetadata::for_entry(entry),
            thumbnail: entry.thumbnail_url().map(enhance_thumbnail),
            generated_at: Some(Utc::now().to_rfc3339()),
            version: SCHEMA_VERSION,
            extra: Map::new(),
        }
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.published.trim())
            .ok()
            .map(|d| d.with_timezone(&Utc))
    }
}

/// Request the 400px crop of a CMS thumbnail.
pub fn enhance_thumbnail(url: &str) -> String {
    THUMB_SIZE.replace(url, "/s400-c/").into_owned()
}

/// Plain-text snippet of an HTML body, cut at `max_chars` characters.
fn snippet(html: &str, max_chars: usize) -> String {
    let text = HTML_TAG.replace_all(html, " ");
    let text = WHITESPACE.replace_all(&text, " ");
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}

fn describe(entry: &Entry) -> String {
    let title = entry.title();
    let mut parts = Vec::new();

    match title.split_once('-') {
        Some((song, _)) => parts.push(format!("Full {} song lyrics,", song.trim())),
        None => parts.push(format!("Full {},", title.trim())),
    }
    if let Some(movie) = entry.movie_name() {
        parts.push(format!("{} Songs Lyrics.", movie));
    }
    if let Some(lyricist) = entry.lyricist_name() {
        parts.push(format!("Lyrics: {},", lyricist));
    }
    if let Some(music) = entry.music_name() {
        parts.push(format!("Music: {},", music));
    }
    if let Some(singer) = entry.singer_name() {
        parts.push(format!("Singer(s): {}", singer));
    }

    let joined = parts.join(" ");
    let base = format!("{}.", joined.trim_end_matches([',', '.']));

    let remaining = DESCRIPTION_MAX_CHARS.saturating_sub(base.chars().count() + 1);
    if remaining > 30 {
        let extra = snippet(entry.content(), remaining);
        if !extra.is_empty() {
            return format!("{} {}", base, extra);
        }
    }
    base
}

fn keywords(entry: &Entry) -> String {
    let mut words: Vec<&str> = entry
        .terms()
        .filter(|t| !t.starts_with("Song:"))
        .map(|t| t.split_once(':').map_or(t, |(_, v)| v).trim())
        .filter(|t| !t.is_empty())
        .collect();
    words.extend(["Tamil lyrics", "Tamil songs"]);
    words.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::entry::tests::sample_entry;
    use serde_json::json;

    fn valid_payload() -> Value {
        json!({
            "slug": "ravana-mavan-da-lyrics",
            "title": "Ravana Mavan Da Lyrics",
            "stanzas": ["Verse one"],
            "movieName": "Jana Nayagan",
            "version": 1
        })
    }

    #[test]
    fn accepts_valid_payload() {
        let item = SongSnapshot::validate(valid_payload()).unwrap();
        assert_eq!(item.slug, "ravana-mavan-da-lyrics");
        assert_eq!(item.stanzas, vec!["Verse one"]);
        assert_eq!(item.movie_name, "Jana Nayagan");
    }

    #[test]
    fn rejects_missing_or_non_array_stanzas() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("stanzas");
        assert_eq!(
            SongSnapshot::validate(payload),
            Err(SnapshotError::StanzasNotArray)
        );

        let mut payload = valid_payload();
        payload["stanzas"] = json!("Verse one");
        assert_eq!(
            SongSnapshot::validate(payload),
            Err(SnapshotError::StanzasNotArray)
        );
    }

    #[test]
    fn rejects_empty_slug_or_title() {
        let mut payload = valid_payload();
        payload["slug"] = json!("");
        assert_eq!(SongSnapshot::validate(payload), Err(SnapshotError::MissingSlug));

        let mut payload = valid_payload();
        payload["title"] = json!(42);
        assert_eq!(SongSnapshot::validate(payload), Err(SnapshotError::MissingTitle));

        assert_eq!(
            SongSnapshot::validate(json!(["not", "an", "object"])),
            Err(SnapshotError::NotAnObject)
        );
    }

    #[test]
    fn empty_stanza_array_is_structurally_valid() {
        let mut payload = valid_payload();
        payload["stanzas"] = json!([]);
        assert!(SongSnapshot::validate(payload).is_ok());
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let mut payload = valid_payload();
        payload["seo"] = json!({
            "title": "t",
            "structuredData": {"@type": "MusicRecording"}
        });
        payload["futureField"] = json!({"nested": true});

        let item = SongSnapshot::validate(payload).unwrap();
        let back = serde_json::to_value(&item).unwrap();
        assert_eq!(back["futureField"], json!({"nested": true}));
        assert_eq!(back["seo"]["structuredData"]["@type"], "MusicRecording");
        assert_eq!(back["movieName"], "Jana Nayagan");
    }

    #[test]
    fn shapes_upstream_entry() {
        let entry = sample_entry(
            "Hukum - Thalaivar Alappara Lyrics",
            &["Movie:Jailer", "Singer:Anirudh", "Lyrics:Super Subu", "Song:Hukum"],
            "2023-07-17T10:00:00Z",
        );
        let related = vec![
            RelatedSong::from_entry(&entry),
            RelatedSong::from_entry(&sample_entry(
                "Kaavaalaa Lyrics",
                &["Movie:Jailer"],
                "2023-07-06T10:00:00Z",
            )),
        ];

        let item = SongSnapshot::from_entry(&entry, related);
        assert_eq!(item.slug, "hukum-thalaivar-alappara-lyrics");
        assert_eq!(item.stanzas, vec!["Line 1<br>Line 2", "Line 3"]);
        assert_eq!(item.movie_name, "Jailer");
        assert_eq!(item.lyricist_name, "Super Subu");
        assert_eq!(item.version, SCHEMA_VERSION);
        // The item itself is never listed as related
        assert_eq!(item.related_songs.len(), 1);
        assert_eq!(item.related_songs[0].slug, "kaavaalaa-lyrics");

        assert_eq!(
            item.seo.title,
            "Hukum - Thalaivar Alappara Lyrics | Tamil Song Lyrics"
        );
        assert!(item.seo.description.starts_with("Full Hukum song lyrics, Jailer Songs Lyrics."));
        assert!(item.seo.description.chars().count() <= DESCRIPTION_MAX_CHARS);
        assert_eq!(
            item.seo.keywords,
            "Jailer, Anirudh, Super Subu, Tamil lyrics, Tamil songs"
        );
    }

    #[test]
    fn shaped_stanzas_carry_no_active_markup() {
        let mut entry = sample_entry("Hukum Lyrics", &["Movie:Jailer"], "2023-07-17T10:00:00Z");
        entry.content.t =
            "<p>Verse<script>alert(1)</script></p><p onclick=\"steal()\">Chorus <a href=\"javascript:x()\">more</a></p>"
                .to_string();

        let item = SongSnapshot::from_entry(&entry, Vec::new());
        assert_eq!(item.stanzas.len(), 2);
        let joined = item.stanzas.join("\n");
        assert!(!joined.contains("<script"));
        assert!(!joined.contains("alert"));
        assert!(!joined.contains("onclick"));
        assert!(!joined.contains("javascript:"));
        assert!(joined.contains("Chorus"));
    }

    #[test]
    fn english_translation_posts_are_not_split() {
        let entry = sample_entry(
            "Hukum English Translation",
            &["Movie:Jailer", "EnglishTranslation"],
            "2023-07-17T10:00:00Z",
        );
        let item = SongSnapshot::from_entry(&entry, Vec::new());
        assert_eq!(item.stanzas, vec!["Line 1<br>Line 2<br><br>Line 3"]);

        let plain = sample_entry("Hukum Lyrics", &["Movie:Jailer"], "2023-07-17T10:00:00Z");
        assert_eq!(SongSnapshot::from_entry(&plain, Vec::new()).stanzas.len(), 2);
    }

    #[test]
    fn related_songs_are_capped() {
        let entry = sample_entry("Main", &["Movie:M"], "2024-01-01T00:00:00Z");
        let related = (0..15)
            .map(|i| {
                RelatedSong::from_entry(&sample_entry(
                    &format!("Other {}", i),
                    &["Movie:M"],
                    "2024-01-01T00:00:00Z",
                ))
            })
            .collect();
        let item = SongSnapshot::from_entry(&entry, related);
        assert_eq!(item.related_songs.len(), MAX_RELATED);
    }

    #[test]
    fn thumbnail_is_upsized() {
        assert_eq!(
            enhance_thumbnail("https://blogger.googleusercontent.com/img/a/s72-c/x.jpg"),
            "https://blogger.googleusercontent.com/img/a/s400-c/x.jpg"
        );
    }

    #[test]
    fn snippet_strips_markup_and_truncates() {
        assert_eq!(snippet("<b>Hello</b><br/>world", 50), "Hello world");
        let long = "word ".repeat(40);
        let cut = snippet(&long, 20);
        assert!(cut.ends_with("..."));
        assert!(cut.chars().count() <= 20);
    }
}
