//! Slug handling.
//!
//! One normalization for every lookup path: request slugs, snapshot file
//! names, cache keys and sitemap URLs all go through these functions.

use regex::Regex;
use std::sync::LazyLock;

static NON_SLUG_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\s-]").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static HYPHENS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").expect("valid regex"));

/// Normalize a requested slug into a lookup key: trim, lowercase and drop
/// a trailing `.html`. Idempotent.
pub fn normalize_slug(raw: &str) -> String {
    let mut slug = raw.trim().to_lowercase();
    while let Some(stripped) = slug.strip_suffix(".html") {
        slug = stripped.trim_end().to_string();
    }
    slug.trim_matches('/').to_string()
}

/// Build a URL slug from a free-text title. Idempotent.
///
/// `"Ravana Mavan Da Lyrics!"` becomes `"ravana-mavan-da-lyrics"`.
pub fn slugify(title: &str) -> String {
    let lower = title.to_lowercase();
    let cleaned = NON_SLUG_CHARS.replace_all(&lower, "");
    let hyphenated = WHITESPACE.replace_all(cleaned.trim(), "-");
    let collapsed = HYPHENS.replace_all(&hyphenated, "-");
    collapsed.trim_matches('-').to_string()
}

/// Extract the slug from a post permalink such as
/// `https://cms.example.com/p/song-name-lyrics.html`.
pub fn slug_from_link(href: &str) -> Option<String> {
    let last = href.trim_end_matches('/').rsplit('/').next()?;
    let stem = last.strip_suffix(".html")?;
    (!stem.is_empty()).then(|| normalize_slug(stem))
}

/// Search terms for a slug: hyphens become spaces and a trailing
/// "lyrics" word is dropped.
pub fn search_terms(slug: &str) -> String {
    let words: Vec<&str> = slug.split('-').filter(|w| !w.is_empty()).collect();
    let words = match words.split_last() {
        Some((last, rest)) if *last == "lyrics" && !rest.is_empty() => rest,
        _ => &words[..],
    };
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_suffix_is_stripped() {
        assert_eq!(
            normalize_slug("ravana-mavan-da-lyrics.html"),
            "ravana-mavan-da-lyrics"
        );
        assert_eq!(
            normalize_slug("ravana-mavan-da-lyrics"),
            "ravana-mavan-da-lyrics"
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in [
            "song.html",
            " Song-Name.HTML ",
            "/a-b.html",
            "x.html.html",
            "plain",
            "",
        ] {
            let once = normalize_slug(raw);
            assert_eq!(normalize_slug(&once), once, "input {:?}", raw);
        }
    }

    #[test]
    fn only_trailing_html_is_removed() {
        assert_eq!(normalize_slug("html-tutorial-lyrics"), "html-tutorial-lyrics");
        assert_eq!(normalize_slug("a.html-b"), "a.html-b");
    }

    #[test]
    fn slugify_title() {
        assert_eq!(slugify("Ravana Mavan Da Lyrics"), "ravana-mavan-da-lyrics");
        assert_eq!(slugify("Kaavaalaa  (From \"Jailer\")"), "kaavaalaa-from-jailer");
        assert_eq!(slugify("  --Odi  Odi--  "), "odi-odi");
        assert_eq!(slugify("Song 2024 - Remix"), "song-2024-remix");
    }

    #[test]
    fn slugify_is_idempotent() {
        for title in ["Hello World", "a -- b", "Vaa Vaathi!", "ன தமிழ் title"] {
            let once = slugify(title);
            assert_eq!(slugify(&once), once);
        }
    }

    #[test]
    fn slug_from_permalink() {
        assert_eq!(
            slug_from_link("https://tsonglyricsapp.blogspot.com/2024/01/song-name-lyrics.html"),
            Some("song-name-lyrics".to_string())
        );
        assert_eq!(slug_from_link("https://example.com/feeds/posts"), None);
    }

    #[test]
    fn search_terms_drop_trailing_lyrics() {
        assert_eq!(search_terms("ravana-mavan-da-lyrics"), "ravana mavan da");
        assert_eq!(search_terms("lyrics"), "lyrics");
        assert_eq!(search_terms("hukum"), "hukum");
    }
}
