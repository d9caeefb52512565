//! Sitemap XML parser.
//!
//! Handles both forms defined by <https://www.sitemaps.org/protocol.html>:
//! - `<urlset>` with `<url><loc>` page entries
//! - `<sitemapindex>` with `<sitemap><loc>` child sitemap entries
//!
//! Namespace prefixes are ignored; only local element names are compared.

use personamap_shared::{PersonaMapError, Result};
use quick_xml::Reader;
use quick_xml::events::Event;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Whether a sitemap lists pages or other sitemaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SitemapKind {
    UrlSet,
    Index,
}

/// A parsed sitemap document.
#[derive(Debug, Clone)]
pub struct ParsedSitemap {
    pub kind: SitemapKind,
    /// `<loc>` values in document order: page URLs for a url set, child
    /// sitemap URLs for an index.
    pub locs: Vec<String>,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse a sitemap or sitemap index document.
///
/// A document is an index when its root element is `sitemapindex` or it has
/// `<sitemap>` children. Documents with no recognisable entries parse to an
/// empty url set; malformed XML is an error.
pub(crate) fn parse_sitemap(xml: &str) -> Result<ParsedSitemap> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut root: Option<String> = None;
    let mut saw_sitemap_entry = false;
    let mut url_locs = Vec::new();
    let mut sitemap_locs = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
                if root.is_none() {
                    root = Some(name.clone());
                }
                if name == "sitemap" {
                    saw_sitemap_entry = true;
                }
                if name == "loc" {
                    text.clear();
                }
                stack.push(name);
            }
            Ok(Event::Text(ref e)) => {
                if stack.last().is_some_and(|n| n == "loc") {
                    let unescaped = e
                        .unescape()
                        .map_err(|err| PersonaMapError::parse(format!("sitemap text: {err}")))?;
                    text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(e)) => {
                if stack.last().is_some_and(|n| n == "loc") {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                let Some(name) = stack.pop() else {
                    continue;
                };
                if name != "loc" {
                    continue;
                }
                let loc = text.trim().to_string();
                text.clear();
                if loc.is_empty() {
                    continue;
                }
                match stack.last().map(String::as_str) {
                    Some("sitemap") => sitemap_locs.push(loc),
                    Some("url") => url_locs.push(loc),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(PersonaMapError::parse(format!(
                    "invalid sitemap XML at position {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    let is_index = root.as_deref().is_some_and(|r| r.ends_with("sitemapindex")) || saw_sitemap_entry;

    Ok(if is_index {
        ParsedSitemap {
            kind: SitemapKind::Index,
            locs: sitemap_locs,
        }
    } else {
        ParsedSitemap {
            kind: SitemapKind::UrlSet,
            locs: url_locs,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.com/</loc><lastmod>2024-01-01</lastmod></url>
  <url><loc> https://example.com/about?a=1&amp;b=2 </loc></url>
  <url><loc></loc></url>
</urlset>"#;
        let parsed = parse_sitemap(xml).unwrap();
        assert_eq!(parsed.kind, SitemapKind::UrlSet);
        assert_eq!(
            parsed.locs,
            vec![
                "https://example.com/".to_string(),
                "https://example.com/about?a=1&b=2".to_string(),
            ]
        );
    }

    #[test]
    fn parses_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.com/sitemap-a.xml</loc></sitemap>
  <sitemap><loc><![CDATA[https://example.com/sitemap-b.xml]]></loc></sitemap>
</sitemapindex>"#;
        let parsed = parse_sitemap(xml).unwrap();
        assert_eq!(parsed.kind, SitemapKind::Index);
        assert_eq!(parsed.locs.len(), 2);
        assert_eq!(parsed.locs[1], "https://example.com/sitemap-b.xml");
    }

    #[test]
    fn prefixed_namespace_and_sitemap_children() {
        let xml = r#"<sm:index xmlns:sm="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sm:sitemap><sm:loc>https://example.com/s1.xml</sm:loc></sm:sitemap>
</sm:index>"#;
        let parsed = parse_sitemap(xml).unwrap();
        assert_eq!(parsed.kind, SitemapKind::Index);
        assert_eq!(parsed.locs, vec!["https://example.com/s1.xml".to_string()]);
    }

    #[test]
    fn html_page_yields_no_entries() {
        let parsed = parse_sitemap("<html><body><p>Not found</p></body></html>").unwrap();
        assert_eq!(parsed.kind, SitemapKind::UrlSet);
        assert!(parsed.locs.is_empty());
    }

    #[test]
    fn malformed_xml_is_error() {
        assert!(parse_sitemap("<urlset><url><loc>x</url></urlset>").is_err());
    }
}
