//! Stanza shaping for upstream post bodies.
//!
//! The body is sanitized once against a fixed allowlist, then split.
//! Consumers render stanzas as HTML, so only allowlisted tags and
//! attributes survive.

use ammonia::Builder;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Two or more line breaks, or a paragraph boundary, separate stanzas.
static STANZA_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:<br\b[^>]*>(?:\s*</br>)?\s*){2,}|</p>\s*<p\b[^>]*>").expect("valid regex")
});

static SANITIZER: LazyLock<Builder<'static>> = LazyLock::new(build_sanitizer);

fn build_sanitizer() -> Builder<'static> {
    let tags: HashSet<&'static str> = HashSet::from([
        "p", "br", "strong", "em", "u", "a", "span", "div", "table", "tr", "td", "th", "tbody",
        "thead", "h3", "h4", "ul", "li", "iframe",
    ]);

    // `class` on div is governed by allowed_classes below
    let tag_attributes: HashMap<&'static str, HashSet<&'static str>> = HashMap::from([
        ("a", HashSet::from(["href", "title", "target", "rel"])),
        ("div", HashSet::from(["style"])),
        (
            "iframe",
            HashSet::from([
                "src",
                "width",
                "height",
                "title",
                "frameborder",
                "allow",
                "allowfullscreen",
                "loading",
                "referrerpolicy",
            ]),
        ),
    ]);

    let allowed_classes: HashMap<&'static str, HashSet<&'static str>> = HashMap::from([(
        "div",
        HashSet::from(["easter-egg-list", "faqs-section", "faq-item"]),
    )]);

    let mut builder = Builder::default();
    builder
        .tags(tags)
        .tag_attributes(tag_attributes)
        .generic_attributes(HashSet::new())
        .allowed_classes(allowed_classes)
        // `rel` is allowlisted on links and must not be overwritten
        .link_rel(None);
    builder
}

/// Clean a post body against the stanza allowlist.
pub fn sanitize(html: &str) -> String {
    SANITIZER.clean(html).to_string()
}

/// Sanitize a post body and split it into trimmed, non-empty stanzas.
///
/// With `keep_whole` the sanitized body is a single stanza (English
/// translation posts are laid out as one block).
pub fn split_stanzas(html: &str, keep_whole: bool) -> Vec<String> {
    if html.trim().is_empty() {
        return Vec::new();
    }
    let clean = sanitize(html);
    if keep_whole {
        let whole = clean.trim();
        return if whole.is_empty() {
            Vec::new()
        } else {
            vec![whole.to_string()]
        };
    }
    STANZA_SEPARATOR
        .split(&clean)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
