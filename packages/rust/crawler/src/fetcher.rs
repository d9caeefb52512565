//! HTTP fetching with bounded retries and optional robots.txt compliance.
//!
//! [`Fetcher::fetch`] never returns an error: every way a URL can fail to
//! produce a page is reported as a [`FetchOutcome`] so the job loop can record
//! it against the frontier and move on.

use std::collections::HashMap;
use std::time::Duration;

use personamap_discovery::{RobotsRules, parse_robots};
use personamap_shared::{FetchConfig, PersonaMapError, Result};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use url::Url;

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Timeout for robots.txt requests.
const ROBOTS_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// FetchOutcome
// ---------------------------------------------------------------------------

/// A successfully fetched HTML response.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    /// URL after redirects.
    pub final_url: Url,
    pub status: u16,
    pub body: String,
    /// SHA-256 of the body.
    pub content_hash: String,
    /// Attempts used, starting at 1.
    pub attempts: u32,
}

/// Result of fetching one URL.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Fetched(FetchedResponse),
    /// Retries exhausted or a non-transient HTTP error.
    Failed { error: String, attempts: u32 },
    /// robots.txt forbids the URL.
    Disallowed,
    /// The response is not HTML.
    Skipped { reason: String },
}

/// Whether an error is worth another attempt.
enum AttemptError {
    Transient(String),
    Permanent(String),
    NotHtml(String),
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// HTTP client wrapper owned by one job.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    robots: Mutex<HashMap<String, RobotsRules>>,
}

impl Fetcher {
    /// Create a fetcher with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PersonaMapError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            robots: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch `url`, retrying transient failures with exponential backoff.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> FetchOutcome {
        if self.config.respect_robots_txt && !self.robots_allows(url).await {
            debug!("disallowed by robots.txt");
            return FetchOutcome::Disallowed;
        }

        let max_attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let backoff = self.config.retry_backoff_ms.saturating_mul(1 << (attempt - 1).min(16));
                debug!(attempt, backoff_ms = backoff, "retrying after backoff");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            match self.attempt(url).await {
                Ok((final_url, status, body)) => {
                    return FetchOutcome::Fetched(FetchedResponse {
                        final_url,
                        status,
                        content_hash: compute_hash(&body),
                        body,
                        attempts: attempt + 1,
                    });
                }
                Err(AttemptError::NotHtml(reason)) => {
                    debug!(%reason, "skipping non-HTML response");
                    return FetchOutcome::Skipped { reason };
                }
                Err(AttemptError::Permanent(error)) => {
                    debug!(%error, "non-retryable fetch failure");
                    return FetchOutcome::Failed {
                        error,
                        attempts: attempt + 1,
                    };
                }
                Err(AttemptError::Transient(error)) => {
                    warn!(attempt = attempt + 1, max_attempts, %error, "transient fetch failure");
                    last_error = error;
                }
            }
        }

        FetchOutcome::Failed {
            error: last_error,
            attempts: max_attempts,
        }
    }

    async fn attempt(&self, url: &Url) -> std::result::Result<(Url, u16, String), AttemptError> {
        let response = self.client.get(url.as_str()).send().await.map_err(|e| {
            let msg = format!("{url}: {e}");
            if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
                AttemptError::Transient(msg)
            } else {
                AttemptError::Permanent(msg)
            }
        })?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptError::Transient(format!("{url}: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(AttemptError::Permanent(format!("{url}: HTTP {status}")));
        }

        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            let lower = content_type.to_ascii_lowercase();
            if !lower.contains("html") {
                return Err(AttemptError::NotHtml(format!("content type {content_type}")));
            }
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| AttemptError::Transient(format!("{url}: body read failed: {e}")))?;

        Ok((final_url, status.as_u16(), body))
    }

    /// Check robots.txt for the URL's origin, fetching it once per origin.
    async fn robots_allows(&self, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();

        let mut cache = self.robots.lock().await;
        if !cache.contains_key(&origin) {
            let rules = self.fetch_robots(&origin).await;
            cache.insert(origin.clone(), rules);
        }
        cache
            .get(&origin)
            .map(|rules| rules.is_allowed(url.path()))
            .unwrap_or(true)
    }

    async fn fetch_robots(&self, origin: &str) -> RobotsRules {
        let robots_url = format!("{origin}/robots.txt");
        let response = self
            .client
            .get(&robots_url)
            .timeout(ROBOTS_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => parse_robots(&body, &self.config.user_agent),
                Err(_) => RobotsRules::default(),
            },
            // Missing or unreachable robots.txt allows everything.
            _ => RobotsRules::default(),
        }
    }
}

/// Compute SHA-256 hash of content.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config() -> FetchConfig {
        FetchConfig {
            user_agent: "PersonaMap/test".into(),
            timeout_secs: 5,
            max_retries: 3,
            retry_backoff_ms: 1,
            request_delay_ms: 0,
            respect_robots_txt: false,
        }
    }

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/html; charset=utf-8")
            .set_body_string(body)
    }

    #[test]
    fn test_compute_hash() {
        let hash = compute_hash("hello world");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, compute_hash("hello world"));
        assert_ne!(hash, compute_hash("hello world!"));
    }

    #[tokio::test]
    async fn fetches_html_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(html("<html><body>Hi</body></html>"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(fast_config()).unwrap();
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        match fetcher.fetch(&url).await {
            FetchOutcome::Fetched(resp) => {
                assert_eq!(resp.status, 200);
                assert_eq!(resp.attempts, 1);
                assert!(resp.body.contains("Hi"));
            }
            other => panic!("expected Fetched, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(html("<p>ok</p>"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(fast_config()).unwrap();
        let url = Url::parse(&format!("{}/flaky", server.uri())).unwrap();
        match fetcher.fetch(&url).await {
            FetchOutcome::Fetched(resp) => assert_eq!(resp.attempts, 3),
            other => panic!("expected Fetched, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_retries_report_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(fast_config()).unwrap();
        let url = Url::parse(&format!("{}/down", server.uri())).unwrap();
        match fetcher.fetch(&url).await {
            FetchOutcome::Failed { error, attempts } => {
                assert_eq!(attempts, 3);
                assert!(error.contains("500"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(fast_config()).unwrap();
        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        match fetcher.fetch(&url).await {
            FetchOutcome::Failed { attempts, .. } => assert_eq!(attempts, 1),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_html_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string("{}"),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(fast_config()).unwrap();
        let url = Url::parse(&format!("{}/data", server.uri())).unwrap();
        assert!(matches!(fetcher.fetch(&url).await, FetchOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn robots_disallow_is_respected_when_enabled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private/\n"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/public"))
            .respond_with(html("<p>public</p>"))
            .mount(&server)
            .await;

        let mut config = fast_config();
        config.respect_robots_txt = true;
        let fetcher = Fetcher::new(config).unwrap();

        let private = Url::parse(&format!("{}/private/x", server.uri())).unwrap();
        assert!(matches!(fetcher.fetch(&private).await, FetchOutcome::Disallowed));

        let public = Url::parse(&format!("{}/public", server.uri())).unwrap();
        assert!(matches!(fetcher.fetch(&public).await, FetchOutcome::Fetched(_)));
    }
}
