//! Sitemap-driven URL discovery.
//!
//! Before a job crawls anything, its frontier is seeded from the site's
//! sitemaps. Conventional sitemap locations are probed together with any
//! `Sitemap:` directives from robots.txt; sitemap indexes are expanded
//! recursively, and every page URL is filtered through the job's
//! [`CrawlScope`] before it is returned.

mod parser;
pub mod robots;

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use personamap_shared::{CrawlScope, FetchConfig, PersonaMapError, Result, normalize_url};
use reqwest::Client;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use parser::{ParsedSitemap, SitemapKind};
pub use robots::{RobotsRules, parse_robots};

/// Conventional sitemap locations probed under the site origin.
const SITEMAP_PATHS: &[&str] = &[
    "/sitemap_index.xml",
    "/sitemap.xml",
    "/sitemaps.xml",
    "/sitemap/sitemap.xml",
    "/sitemap/index.xml",
];

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Maximum sitemap size we parse (50 MB, the protocol's uncompressed limit).
const MAX_SITEMAP_SIZE: u64 = 50 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Discovery options
// ---------------------------------------------------------------------------

/// Configuration for the discovery process.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub user_agent: String,
    /// Timeout for the robots.txt request in seconds.
    pub robots_timeout_secs: u64,
    /// Timeout for each sitemap request in seconds.
    pub sitemap_timeout_secs: u64,
    /// Upper bound on sitemap documents fetched per discovery run.
    pub max_sitemaps: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for DiscoveryOptions {
    fn from(config: &FetchConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            robots_timeout_secs: 10,
            sitemap_timeout_secs: config.timeout_secs,
            max_sitemaps: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// DiscoveryReport
// ---------------------------------------------------------------------------

/// Outcome of one discovery run.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    /// Admitted page URLs, normalized and deduplicated, in discovery order.
    pub urls: Vec<String>,
    /// Sitemap documents fetched and parsed.
    pub sitemaps_parsed: usize,
    /// Sitemap candidates that were unreachable or malformed.
    pub sitemaps_skipped: usize,
    /// Page URLs dropped by the scope rules.
    pub rejected: usize,
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Discover page URLs for a job from its site's sitemaps.
///
/// Never fails because a sitemap is missing or broken; those candidates are
/// logged and skipped. Errors only for an unusable base URL or HTTP client.
#[instrument(skip_all, fields(base = %scope.base()))]
pub async fn discover(scope: &CrawlScope, opts: &DiscoveryOptions) -> Result<DiscoveryReport> {
    let origin = origin_url(scope.base())?;
    let client = build_client(opts)?;

    let mut candidates: Vec<String> = SITEMAP_PATHS
        .iter()
        .map(|path| format!("{origin}{path}"))
        .collect();

    for sitemap in robots_sitemaps(&client, &origin, opts).await {
        if !candidates.contains(&sitemap) {
            candidates.push(sitemap);
        }
    }

    info!(candidates = candidates.len(), "probing sitemap candidates");

    let mut report = DiscoveryReport::default();
    let mut queue: VecDeque<String> = candidates.into();
    let mut visited: HashSet<String> = HashSet::new();
    let mut seen_urls: HashSet<String> = HashSet::new();

    while let Some(sitemap_url) = queue.pop_front() {
        if !visited.insert(sitemap_url.clone()) {
            continue;
        }
        if visited.len() > opts.max_sitemaps {
            warn!(max = opts.max_sitemaps, "sitemap limit reached, stopping expansion");
            break;
        }

        let body = match fetch_sitemap(&client, &sitemap_url, opts).await {
            Ok(body) => body,
            Err(e) => {
                debug!(url = %sitemap_url, error = %e, "sitemap candidate skipped");
                report.sitemaps_skipped += 1;
                continue;
            }
        };

        let parsed = match parser::parse_sitemap(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(url = %sitemap_url, error = %e, "malformed sitemap skipped");
                report.sitemaps_skipped += 1;
                continue;
            }
        };
        report.sitemaps_parsed += 1;

        match parsed.kind {
            SitemapKind::Index => {
                debug!(url = %sitemap_url, children = parsed.locs.len(), "expanding sitemap index");
                for child in parsed.locs {
                    if let Ok(resolved) = Url::parse(&sitemap_url).and_then(|base| base.join(&child)) {
                        let child = resolved.to_string();
                        if !visited.contains(&child) {
                            queue.push_back(child);
                        }
                    }
                }
            }
            SitemapKind::UrlSet => {
                for loc in parsed.locs {
                    let Ok(url) = Url::parse(&loc) else {
                        report.rejected += 1;
                        continue;
                    };
                    if let Err(reason) = scope.check(&url) {
                        debug!(%url, %reason, "sitemap URL rejected");
                        report.rejected += 1;
                        continue;
                    }
                    let normalized = normalize_url(&url);
                    if seen_urls.insert(normalized.clone()) {
                        report.urls.push(normalized);
                    }
                }
            }
        }
    }

    info!(
        urls = report.urls.len(),
        sitemaps = report.sitemaps_parsed,
        skipped = report.sitemaps_skipped,
        rejected = report.rejected,
        "sitemap discovery finished"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the origin (scheme + host + port) from a URL.
fn origin_url(url: &Url) -> Result<String> {
    let scheme = url.scheme();
    let host = url
        .host_str()
        .ok_or_else(|| PersonaMapError::validation(format!("URL has no host: {url}")))?;

    match url.port() {
        Some(port) => Ok(format!("{scheme}://{host}:{port}")),
        None => Ok(format!("{scheme}://{host}")),
    }
}

/// Build a reqwest client with appropriate settings.
fn build_client(opts: &DiscoveryOptions) -> Result<Client> {
    Client::builder()
        .user_agent(opts.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(|e| PersonaMapError::Network(format!("failed to build HTTP client: {e}")))
}

/// `Sitemap:` directives from `<origin>/robots.txt`; empty when unavailable.
async fn robots_sitemaps(client: &Client, origin: &str, opts: &DiscoveryOptions) -> Vec<String> {
    let robots_url = format!("{origin}/robots.txt");
    let response = client
        .get(&robots_url)
        .timeout(Duration::from_secs(opts.robots_timeout_secs))
        .send()
        .await;

    let body = match response {
        Ok(resp) if resp.status().is_success() => resp.text().await.unwrap_or_default(),
        Ok(resp) => {
            debug!(status = %resp.status(), "no robots.txt");
            return Vec::new();
        }
        Err(e) => {
            debug!(error = %e, "robots.txt unreachable");
            return Vec::new();
        }
    };

    let sitemaps = parse_robots(&body, &opts.user_agent).sitemaps;
    if !sitemaps.is_empty() {
        debug!(count = sitemaps.len(), "sitemaps listed in robots.txt");
    }
    sitemaps
}

/// Fetch a sitemap body.
async fn fetch_sitemap(client: &Client, url: &str, opts: &DiscoveryOptions) -> Result<String> {
    let response = client
        .get(url)
        .timeout(Duration::from_secs(opts.sitemap_timeout_secs))
        .send()
        .await
        .map_err(|e| PersonaMapError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PersonaMapError::Network(format!("{url}: HTTP {status}")));
    }

    if let Some(len) = response.content_length() {
        if len > MAX_SITEMAP_SIZE {
            return Err(PersonaMapError::validation(format!(
                "{url}: sitemap too large ({len} bytes, max {MAX_SITEMAP_SIZE})"
            )));
        }
    }

    response
        .text()
        .await
        .map_err(|e| PersonaMapError::Network(format!("{url}: failed to read body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn urlset(base: &str, paths: &[&str]) -> String {
        let entries: String = paths
            .iter()
            .map(|p| format!("<url><loc>{base}{p}</loc></url>"))
            .collect();
        format!(r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</urlset>"#)
    }

    fn index(base: &str, children: &[&str]) -> String {
        let entries: String = children
            .iter()
            .map(|c| format!("<sitemap><loc>{base}{c}</loc></sitemap>"))
            .collect();
        format!(r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</sitemapindex>"#)
    }

    async fn mount(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[test]
    fn test_origin_url_with_port() {
        let url = Url::parse("http://localhost:3000/docs").unwrap();
        assert_eq!(origin_url(&url).unwrap(), "http://localhost:3000");
    }

    #[tokio::test]
    async fn index_with_overlapping_children_yields_unique_urls() {
        let server = MockServer::start().await;
        let base = server.uri();

        mount(&server, "/sitemap_index.xml", index(&base, &["/sitemap-a.xml", "/sitemap-b.xml"])).await;
        mount(&server, "/sitemap-a.xml", urlset(&base, &["/one", "/two", "/shared"])).await;
        mount(&server, "/sitemap-b.xml", urlset(&base, &["/shared", "/four", "/five"])).await;

        let scope = CrawlScope::for_job(&base, &[], &[]).unwrap();
        let report = discover(&scope, &DiscoveryOptions::default()).await.unwrap();

        assert_eq!(report.urls.len(), 5);
        assert_eq!(report.urls[0], format!("{base}/one"));
        assert_eq!(report.sitemaps_parsed, 3);
    }

    #[tokio::test]
    async fn robots_sitemap_directive_and_cycle_guard() {
        let server = MockServer::start().await;
        let base = server.uri();

        mount(
            &server,
            "/robots.txt",
            format!("User-agent: *\nDisallow:\nSitemap: {base}/custom-index.xml\n"),
        )
        .await;
        // Index references itself and a child
        mount(&server, "/custom-index.xml", index(&base, &["/custom-index.xml", "/pages.xml"])).await;
        mount(&server, "/pages.xml", urlset(&base, &["/a", "/b/"])).await;

        let scope = CrawlScope::for_job(&base, &[], &[]).unwrap();
        let report = discover(&scope, &DiscoveryOptions::default()).await.unwrap();

        assert_eq!(report.urls, vec![format!("{base}/a"), format!("{base}/b")]);
        assert_eq!(report.sitemaps_parsed, 2);
    }

    #[tokio::test]
    async fn filters_offsite_binary_and_excluded() {
        let server = MockServer::start().await;
        let base = server.uri();

        let xml = format!(
            r#"<urlset>
<url><loc>{base}/keep</loc></url>
<url><loc>https://elsewhere.example/page</loc></url>
<url><loc>{base}/report.pdf</loc></url>
<url><loc>{base}/post?share=twitter</loc></url>
<url><loc>not a url</loc></url>
</urlset>"#
        );
        mount(&server, "/sitemap.xml", xml).await;

        let scope = CrawlScope::for_job(&base, &[], &["share=*".into()]).unwrap();
        let report = discover(&scope, &DiscoveryOptions::default()).await.unwrap();

        assert_eq!(report.urls, vec![format!("{base}/keep")]);
        assert_eq!(report.rejected, 4);
    }

    #[tokio::test]
    async fn malformed_and_missing_sitemaps_are_skipped() {
        let server = MockServer::start().await;
        let base = server.uri();

        mount(&server, "/sitemap.xml", "<urlset><url><loc>x</url>".to_string()).await;

        let scope = CrawlScope::for_job(&base, &[], &[]).unwrap();
        let report = discover(&scope, &DiscoveryOptions::default()).await.unwrap();

        assert!(report.urls.is_empty());
        assert_eq!(report.sitemaps_parsed, 0);
        assert_eq!(report.sitemaps_skipped, SITEMAP_PATHS.len());
    }
}
