//! URL admission rules shared by discovery, link extraction, and the job loop.
//!
//! A URL is admitted into a job's frontier when it is http(s), lives on the
//! job's site, does not look like a binary or feed resource, and passes the
//! job's include/exclude wildcard patterns.

use regex::Regex;
use url::Url;

use crate::error::{PersonaMapError, Result};

/// File extensions that never lead to HTML content.
const NON_HTML_EXTENSIONS: &[&str] = &[
    // images
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg", ".webp", ".ico", ".tiff", ".tif",
    // documents
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".odt", ".ods", ".odp",
    // archives
    ".zip", ".rar", ".tar", ".gz", ".7z", ".bz2", ".xz",
    // media
    ".mp3", ".mp4", ".avi", ".mov", ".wmv", ".flv", ".webm", ".ogg", ".wav", ".m4a",
    // code and data
    ".js", ".css", ".json", ".xml", ".csv", ".txt", ".log",
    // executables
    ".exe", ".dmg", ".pkg", ".deb", ".rpm", ".msi",
    // fonts
    ".ttf", ".otf", ".woff", ".woff2", ".eot",
    // feeds
    ".rss", ".atom", ".feed",
];

/// Path fragments that mark API, feed, and sitemap endpoints.
const NON_HTML_PATH_FRAGMENTS: &[&str] = &["/api/", "/feed/", "/rss/", "/sitemap"];

// ---------------------------------------------------------------------------
// Wildcard patterns
// ---------------------------------------------------------------------------

/// Translate a wildcard pattern (`*` any run, `?` one char) to an unanchored regex.
pub fn wildcard_to_regex(pattern: &str) -> Result<Regex> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".");
    Regex::new(&escaped)
        .map_err(|e| PersonaMapError::validation(format!("invalid pattern '{pattern}': {e}")))
}

/// A compiled exclude pattern; `key=value` patterns are also tried per query pair.
#[derive(Debug, Clone)]
struct ExcludePattern {
    regex: Regex,
    matches_query_pairs: bool,
}

/// Compiled include/exclude rules for one job.
#[derive(Debug, Clone, Default)]
pub struct UrlRules {
    include: Vec<Regex>,
    exclude: Vec<ExcludePattern>,
}

impl UrlRules {
    /// Compile the job's patterns. Blank patterns are ignored.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let include = include
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| wildcard_to_regex(p.trim()))
            .collect::<Result<Vec<_>>>()?;

        let exclude = exclude
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| {
                let p = p.trim();
                Ok(ExcludePattern {
                    regex: wildcard_to_regex(p)?,
                    matches_query_pairs: p.contains('='),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { include, exclude })
    }

    /// True when no include patterns exist or the full URL matches one.
    pub fn is_included(&self, url: &Url) -> bool {
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(url.as_str()))
    }

    /// True when an exclude pattern matches the path, the raw query, or a query pair.
    pub fn is_excluded(&self, url: &Url) -> bool {
        let path = url.path();
        let query = url.query().unwrap_or("");
        let pairs: Vec<String> = url
            .query_pairs()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        self.exclude.iter().any(|pattern| {
            if pattern.regex.is_match(path) {
                return true;
            }
            if !query.is_empty() && pattern.regex.is_match(query) {
                return true;
            }
            pattern.matches_query_pairs && pairs.iter().any(|pair| pattern.regex.is_match(pair))
        })
    }

    pub fn admits(&self, url: &Url) -> bool {
        self.is_included(url) && !self.is_excluded(url)
    }
}

// ---------------------------------------------------------------------------
// URL heuristics
// ---------------------------------------------------------------------------

/// Whether a URL plausibly serves an HTML page.
pub fn is_html_content_url(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();

    if NON_HTML_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }

    let explicit_html = path.ends_with(".html") || path.ends_with(".htm");
    if !explicit_html && NON_HTML_PATH_FRAGMENTS.iter().any(|frag| path.contains(frag)) {
        return false;
    }

    true
}

/// Host used for same-site comparison: lowercase, without a leading `www.`.
fn site_host(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// Whether two URLs belong to the same site: equal hosts (ignoring case and
/// `www.`) and equal explicit ports.
///
/// Ports are compared as written, so `http://` and `https://` on their default
/// ports stay the same site while `localhost:3000` and `localhost:4000` do not.
pub fn same_site(a: &Url, b: &Url) -> bool {
    match (site_host(a), site_host(b)) {
        (Some(host_a), Some(host_b)) => host_a == host_b && a.port() == b.port(),
        _ => false,
    }
}

/// Normalize a URL for deduplication: drop the fragment and a trailing slash.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    // The root path keeps its slash so the string still parses back to the same URL.
    if s.ends_with('/') && normalized.path() != "/" {
        s.pop();
    }
    s
}

// ---------------------------------------------------------------------------
// CrawlScope
// ---------------------------------------------------------------------------

/// Why a URL was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Scheme,
    OffSite,
    NonHtml,
    NotIncluded,
    Excluded,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Scheme => "unsupported scheme",
            Self::OffSite => "different site",
            Self::NonHtml => "non-HTML resource",
            Self::NotIncluded => "no include pattern matched",
            Self::Excluded => "matched exclude pattern",
        };
        f.write_str(s)
    }
}

/// Everything needed to decide whether a URL belongs in a job's frontier.
#[derive(Debug, Clone)]
pub struct CrawlScope {
    base: Url,
    rules: UrlRules,
}

impl CrawlScope {
    pub fn new(base: Url, rules: UrlRules) -> Self {
        Self { base, rules }
    }

    /// Build a scope from a job's base URL and raw patterns.
    pub fn for_job(base_url: &str, include: &[String], exclude: &[String]) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| PersonaMapError::validation(format!("invalid base URL '{base_url}': {e}")))?;
        Ok(Self::new(base, UrlRules::new(include, exclude)?))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn check(&self, url: &Url) -> std::result::Result<(), Rejection> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Rejection::Scheme);
        }
        if !same_site(&self.base, url) {
            return Err(Rejection::OffSite);
        }
        if !is_html_content_url(url) {
            return Err(Rejection::NonHtml);
        }
        if !self.rules.is_included(url) {
            return Err(Rejection::NotIncluded);
        }
        if self.rules.is_excluded(url) {
            return Err(Rejection::Excluded);
        }
        Ok(())
    }

    pub fn admits(&self, url: &Url) -> bool {
        self.check(url).is_ok()
    }

    /// Parse and check a raw URL string.
    pub fn admits_str(&self, raw: &str) -> bool {
        Url::parse(raw).map(|u| self.admits(&u)).unwrap_or(false)
    }
}
