//! Sitemap XML rendering.
//!
//! The index lists one page per [`URLS_PER_SITEMAP`] songs (at least one).
//! Page 0 additionally carries the site's static pages ahead of the songs.

use crate::content::Entry;
use crate::error::{RelayError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

pub const URLS_PER_SITEMAP: usize = 1000;

const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

/// Static pages listed at the top of page 0: path, changefreq, priority.
const STATIC_PAGES: [(&str, &str, f32); 5] = [
    ("", "daily", 1.0),
    ("/about-tamil-song-lyrics.html", "monthly", 0.6),
    ("/privacy-policy-tamil-song-lyrics-app.html", "yearly", 0.3),
    ("/disclaimer.html", "yearly", 0.3),
    ("/tamil-song-lyrics-in-english.html", "weekly", 0.7),
];

/// One `<url>` row of a urlset page.
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapUrl {
    pub loc: String,
    pub lastmod: DateTime<Utc>,
    pub changefreq: &'static str,
    pub priority: f32,
}

impl SitemapUrl {
    fn for_song(base_url: &str, entry: &Entry, now: DateTime<Utc>) -> Option<Self> {
        let slug = entry.slug();
        if slug.is_empty() {
            return None;
        }
        Some(Self {
            loc: format!("{}/{}.html", base_url, slug),
            lastmod: entry.published_at().unwrap_or(now),
            changefreq: "monthly",
            priority: 0.8,
        })
    }
}

/// Number of urlset pages needed for `song_count` songs.
pub fn page_count(song_count: usize) -> usize {
    song_count.div_ceil(URLS_PER_SITEMAP).max(1)
}

/// Parse the `{page}` route segment. Accepts `3` and `3.xml`.
pub fn parse_page(raw: &str) -> Option<usize> {
    raw.strip_suffix(".xml").unwrap_or(raw).parse().ok()
}

/// URL rows for one page. Pages past the end are empty.
pub fn page_urls(
    base_url: &str,
    songs: &[Entry],
    page: usize,
    now: DateTime<Utc>,
) -> Vec<SitemapUrl> {
    let base_url = base_url.trim_end_matches('/');
    let mut urls = Vec::new();

    if page == 0 {
        urls.extend(STATIC_PAGES.iter().map(|(path, changefreq, priority)| SitemapUrl {
            loc: format!("{}{}", base_url, path),
            lastmod: now,
            changefreq,
            priority: *priority,
        }));
    }

    urls.extend(
        songs
            .iter()
            .skip(page.saturating_mul(URLS_PER_SITEMAP))
            .take(URLS_PER_SITEMAP)
            .filter_map(|entry| SitemapUrl::for_song(base_url, entry, now)),
    );
    urls
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| RelayError::Internal(format!("Failed to write sitemap XML: {}", e)))
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, value: &str) -> Result<()> {
    emit(writer, Event::Start(BytesStart::new(name)))?;
    emit(writer, Event::Text(BytesText::new(value)))?;
    emit(writer, Event::End(BytesEnd::new(name)))
}

fn document(root: &str, body: impl FnOnce(&mut Writer<Vec<u8>>) -> Result<()>) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    emit(
        &mut writer,
        Event::Start(BytesStart::new(root).with_attributes([("xmlns", SITEMAP_NS)])),
    )?;
    body(&mut writer)?;
    emit(&mut writer, Event::End(BytesEnd::new(root)))?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| RelayError::Internal(format!("Sitemap is not UTF-8: {}", e)))
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `<urlset>` document for the given rows.
pub fn render_urlset(urls: &[SitemapUrl]) -> Result<String> {
    document("urlset", |writer| {
        for url in urls {
            emit(writer, Event::Start(BytesStart::new("url")))?;
            text_element(writer, "loc", &url.loc)?;
            text_element(writer, "lastmod", &timestamp(url.lastmod))?;
            text_element(writer, "changefreq", url.changefreq)?;
            text_element(writer, "priority", &format!("{:.1}", url.priority))?;
            emit(writer, Event::End(BytesEnd::new("url")))?;
        }
        Ok(())
    })
}

/// `<sitemapindex>` document pointing at every urlset page.
pub fn render_index(base_url: &str, song_count: usize, now: DateTime<Utc>) -> Result<String> {
    let base_url = base_url.trim_end_matches('/');
    document("sitemapindex", |writer| {
        for page in 0..page_count(song_count) {
            emit(writer, Event::Start(BytesStart::new("sitemap")))?;
            text_element(writer, "loc", &format!("{}/sitemap/{}.xml", base_url, page))?;
            text_element(writer, "lastmod", &timestamp(now))?;
            emit(writer, Event::End(BytesEnd::new("sitemap")))?;
        }
        Ok(())
    })
}

/// Urlset with no rows, served when the song list is unavailable.
pub fn empty_urlset() -> Result<String> {
    render_urlset(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::entry::tests::sample_entry;

    fn songs(n: usize) -> Vec<Entry> {
        (0..n)
            .map(|i| {
                sample_entry(
                    &format!("Song {} Lyrics", i),
                    &["Song:X"],
                    "2024-03-01T12:00:00Z",
                )
            })
            .collect()
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn page_count_has_a_floor_of_one() {
        assert_eq!(page_count(0), 1);
        assert_eq!(page_count(1), 1);
        assert_eq!(page_count(1000), 1);
        assert_eq!(page_count(1001), 2);
        assert_eq!(page_count(2500), 3);
    }

    #[test]
    fn parse_page_forms() {
        assert_eq!(parse_page("0.xml"), Some(0));
        assert_eq!(parse_page("12"), Some(12));
        assert_eq!(parse_page("abc.xml"), None);
        assert_eq!(parse_page("-1.xml"), None);
        assert_eq!(parse_page(""), None);
    }

    #[test]
    fn first_page_prepends_static_pages() {
        let all = songs(1200);
        let urls = page_urls("https://example.com/", &all, 0, now());

        assert_eq!(urls.len(), 1005);
        assert_eq!(urls[0].loc, "https://example.com");
        assert_eq!(urls[0].priority, 1.0);
        assert_eq!(urls[4].loc, "https://example.com/tamil-song-lyrics-in-english.html");
        assert_eq!(urls[5].loc, "https://example.com/song-0-lyrics.html");
        assert_eq!(urls[5].changefreq, "monthly");
        assert_eq!(urls[5].priority, 0.8);
        assert_eq!(timestamp(urls[5].lastmod), "2024-03-01T12:00:00.000Z");
    }

    #[test]
    fn later_pages_hold_only_songs() {
        let all = songs(1200);
        let urls = page_urls("https://example.com", &all, 1, now());
        assert_eq!(urls.len(), 200);
        assert_eq!(urls[0].loc, "https://example.com/song-1000-lyrics.html");

        assert!(page_urls("https://example.com", &all, 5, now()).is_empty());
    }

    #[test]
    fn urlset_xml_shape() {
        let urls = page_urls("https://example.com", &songs(1), 0, now());
        let xml = render_urlset(&urls).unwrap();

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">"#));
        assert_eq!(xml.matches("<url>").count(), 6);
        assert!(xml.contains("<loc>https://example.com/song-0-lyrics.html</loc>"));
        assert!(xml.contains("<priority>0.8</priority>"));
        assert!(xml.contains("<lastmod>2024-03-01T12:00:00.000Z</lastmod>"));
    }

    #[test]
    fn loc_is_escaped() {
        let url = SitemapUrl {
            loc: "https://example.com/?a=1&b=2".to_string(),
            lastmod: now(),
            changefreq: "daily",
            priority: 1.0,
        };
        let xml = render_urlset(&[url]).unwrap();
        assert!(xml.contains("a=1&amp;b=2"));
    }

    #[test]
    fn index_lists_every_page() {
        let xml = render_index("https://example.com", 2001, now()).unwrap();
        assert!(xml.contains("<sitemapindex"));
        assert_eq!(xml.matches("<sitemap>").count(), 3);
        assert!(xml.contains("<loc>https://example.com/sitemap/2.xml</loc>"));

        let xml = render_index("https://example.com", 0, now()).unwrap();
        assert_eq!(xml.matches("<sitemap>").count(), 1);
    }

    #[test]
    fn empty_urlset_has_no_rows() {
        let xml = empty_urlset().unwrap();
        assert!(xml.contains("<urlset"));
        assert!(!xml.contains("<url>"));
    }
}
