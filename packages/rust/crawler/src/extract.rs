//! Main-content extraction from HTML.
//!
//! Picks the most specific content container (`main`, `article`,
//! `[role="main"]`, a content-ish `div`, then `body`), drops page chrome
//! and non-text elements, and collapses whitespace. Title, meta
//! description, headings, and outgoing links are collected from the whole
//! document.

use std::sync::LazyLock;

use personamap_shared::{CrawlScope, normalize_url};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Elements whose subtrees never contribute page text.
const STRIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "template", "svg",
];

static CONTAINER_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        "main",
        "article",
        r#"[role="main"]"#,
        r#"div[class*="content"]"#,
        r#"div[class*="main"]"#,
        r#"div[class*="body"]"#,
        "body",
    ]
    .iter()
    .map(|s| Selector::parse(s).expect("valid selector"))
    .collect()
});

static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));
static H1_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").expect("valid selector"));
static HEADING_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").expect("valid selector"));
static META_DESC_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[name="description"], meta[name="Description"]"#)
        .expect("valid selector")
});
static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

// ---------------------------------------------------------------------------
// ExtractedPage
// ---------------------------------------------------------------------------

/// A heading found in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: u8,
    pub text: String,
}

/// Text and metadata extracted from one HTML document.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    /// `<title>`, falling back to the first `<h1>`.
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub headings: Vec<Heading>,
    /// Whitespace-collapsed main text.
    pub text: String,
    pub word_count: u32,
    /// Resolved, fragment-free, normalized outgoing links (unfiltered).
    pub links: Vec<String>,
}

impl ExtractedPage {
    /// Outgoing links admitted by the job's scope, deduplicated.
    pub fn scoped_links(&self, scope: &CrawlScope) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for link in &self.links {
            if scope.admits_str(link) && !out.contains(link) {
                out.push(link.clone());
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract text and metadata from an HTML document fetched from `url`.
pub fn extract(html: &str, url: &Url) -> ExtractedPage {
    let doc = Html::parse_document(html);

    let text = CONTAINER_SELECTORS
        .iter()
        .find_map(|sel| doc.select(sel).next())
        .map(|container| {
            let mut raw = String::new();
            collect_text(container, &mut raw);
            collapse_whitespace(&raw)
        })
        .unwrap_or_default();

    let word_count = text.split_whitespace().count() as u32;

    let title = first_text(&doc, &TITLE_SEL).or_else(|| first_text(&doc, &H1_SEL));

    let meta_description = doc
        .select(&META_DESC_SEL)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(collapse_whitespace)
        .filter(|s| !s.is_empty());

    let headings = doc
        .select(&HEADING_SEL)
        .filter_map(|el| {
            let level = el.value().name()[1..].parse().unwrap_or(1);
            let text = collapse_whitespace(&el.text().collect::<String>());
            (!text.is_empty()).then_some(Heading { level, text })
        })
        .collect();

    ExtractedPage {
        title,
        meta_description,
        headings,
        text,
        word_count,
        links: extract_links(&doc, url),
    }
}

/// Append the text of `el` to `out`, skipping stripped subtrees.
fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            if !STRIPPED_ELEMENTS.contains(&child_el.value().name()) {
                collect_text(child_el, out);
                // Element boundaries separate words.
                out.push(' ');
            }
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
        }
    }
}

fn first_text(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|s| !s.is_empty())
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract all links from a document, resolved against the base URL.
fn extract_links(doc: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    for el in doc.select(&LINK_SEL) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();

        // Skip anchors, javascript:, mailto:, tel:
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }

        if let Ok(resolved) = base_url.join(href) {
            let normalized = normalize_url(&resolved);
            if !links.contains(&normalized) {
                links.push(normalized);
            }
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"<!DOCTYPE html>
<html>
<head>
  <title>  Pricing Guide | Example </title>
  <meta name="description" content="How  pricing works">
  <style>.x { color: red; }</style>
  <script>var tracking = "should not appear";</script>
</head>
<body>
  <header><a href="/">Home</a> Site header</header>
  <nav><a href="/docs">Docs</a> Navigation</nav>
  <main>
    <h1>Pricing</h1>
    <p>Plans start   at
       ten dollars.</p>
    <aside>Related sidebar</aside>
    <p>Contact <a href="/sales#team">sales</a> or <a href="mailto:x@example.com">mail</a>.</p>
    <h2>Enterprise</h2>
    <p>Custom<br>quotes</p>
  </main>
  <footer>Footer text <a href="https://other.example/page">Partner</a></footer>
</body>
</html>"##;

    fn base() -> Url {
        Url::parse("https://example.com/pricing").unwrap()
    }

    #[test]
    fn extracts_main_text_without_chrome() {
        let page = extract(PAGE, &base());
        assert_eq!(
            page.text,
            "Pricing Plans start at ten dollars. Contact sales or mail . Enterprise Custom quotes"
        );
        assert!(!page.text.contains("tracking"));
        assert!(!page.text.contains("Navigation"));
        assert!(!page.text.contains("sidebar"));
        assert!(!page.text.contains("Footer"));
        assert_eq!(page.word_count, page.text.split_whitespace().count() as u32);
    }

    #[test]
    fn extracts_metadata() {
        let page = extract(PAGE, &base());
        assert_eq!(page.title.as_deref(), Some("Pricing Guide | Example"));
        assert_eq!(page.meta_description.as_deref(), Some("How pricing works"));
        assert_eq!(
            page.headings,
            vec![
                Heading { level: 1, text: "Pricing".into() },
                Heading { level: 2, text: "Enterprise".into() },
            ]
        );
    }

    #[test]
    fn title_falls_back_to_h1() {
        let page = extract("<html><body><h1>Only Heading</h1><p>x</p></body></html>", &base());
        assert_eq!(page.title.as_deref(), Some("Only Heading"));
    }

    #[test]
    fn prefers_content_div_over_body() {
        let html = r#"<html><body><div class="sidebar-links">menu</div>
            <div class="page-content"><p>Real text</p></div></body></html>"#;
        let page = extract(html, &base());
        assert_eq!(page.text, "Real text");
    }

    #[test]
    fn links_are_resolved_and_normalized() {
        let page = extract(PAGE, &base());
        assert!(page.links.contains(&"https://example.com/".to_string()));
        assert!(page.links.contains(&"https://example.com/docs".to_string()));
        assert!(page.links.contains(&"https://example.com/sales".to_string()));
        assert!(page.links.contains(&"https://other.example/page".to_string()));
        assert!(!page.links.iter().any(|l| l.contains('#') || l.starts_with("mailto:")));
    }

    #[test]
    fn scoped_links_filter_offsite_and_excluded() {
        let page = extract(PAGE, &base());
        let scope = CrawlScope::for_job("https://example.com", &[], &["/docs*".into()]).unwrap();
        let links = page.scoped_links(&scope);
        assert_eq!(
            links,
            vec!["https://example.com/".to_string(), "https://example.com/sales".to_string()]
        );
    }

    #[test]
    fn empty_document() {
        let page = extract("", &base());
        assert!(page.text.is_empty());
        assert_eq!(page.word_count, 0);
        assert!(page.title.is_none());
    }
}
