//! One job run: seed the frontier, then fetch, extract, classify, and record
//! each claimed URL until the page budget or the frontier is exhausted.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use personamap_classifier::Classifier;
use personamap_crawler::{FetchOutcome, Fetcher, extract};
use personamap_discovery::{DiscoveryOptions, discover};
use personamap_shared::{
    CrawlJob, CrawlMode, CrawlScope, CrawledPage, DiscoveredUrl, MAX_FAILED_ATTEMPTS,
    PersonaDefinition, Rejection, Result, SITEMAP_PRIORITY, normalize_url,
};
use personamap_storage::{PageRecord, Storage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::progress::{ProgressReporter, UrlOutcome};

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Frontier entries added by sitemap discovery this run.
    pub discovered: u32,
    /// Entries reset by overwrite mode.
    pub reset: u64,
    /// URLs claimed and handled.
    pub processed: u32,
    /// Pages stored.
    pub pages_crawled: u32,
    /// Stored pages with at least one mapping.
    pub pages_mapped: u32,
    pub failed: u32,
    pub rejected: u32,
    /// Robots-disallowed or non-HTML.
    pub skipped: u32,
    /// Stopped by cancellation before the frontier was exhausted.
    pub cancelled: bool,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// JobRun
// ---------------------------------------------------------------------------

/// Everything a job task owns for the duration of a run.
pub(crate) struct JobRun {
    pub storage: Storage,
    pub job: CrawlJob,
    pub scope: CrawlScope,
    pub fetcher: Fetcher,
    pub classifier: Classifier,
    pub discovery: DiscoveryOptions,
    pub request_delay: Duration,
    pub cancel: CancellationToken,
    pub reporter: Arc<dyn ProgressReporter>,
}

impl JobRun {
    /// Run the job to the end of its frontier or page budget.
    ///
    /// Per-URL problems are recorded against the frontier and never escape;
    /// an `Err` here is job-fatal.
    #[instrument(skip_all, fields(job_id = %self.job.id, mode = self.job.crawl_mode.as_str()))]
    pub async fn execute(&self) -> Result<RunSummary> {
        let start = Instant::now();
        let job_id = &self.job.id;
        let mut summary = RunSummary::default();

        info!(
            base_url = %self.job.base_url,
            max_pages = self.job.max_pages,
            classifier = %self.classifier.mode(),
            "starting run"
        );

        if self.job.crawl_mode == CrawlMode::Overwrite {
            self.reporter.phase("Resetting frontier");
            summary.reset = self.storage.reset_for_overwrite(job_id).await?;
        }

        if self.storage.frontier_counts(job_id).await?.total == 0 {
            self.reporter.phase("Discovering URLs from sitemaps");
            summary.discovered = self.seed_frontier().await?;
            self.storage
                .update_job_progress(job_id, 0, 0, summary.discovered)
                .await?;
        }

        let personas = self.storage.personas_for_job(job_id).await?;
        if personas.is_empty() {
            warn!("no active personas; pages will be stored without mappings");
        }

        self.reporter.phase("Crawling");
        let budget = self.job.max_pages;
        let mut attempted: HashSet<String> = HashSet::new();

        'claim: while summary.processed < budget {
            let remaining = budget - summary.processed;
            // Entries that failed earlier this run are still claimable; skip past them.
            let limit = remaining.saturating_add(attempted.len() as u32);
            let batch: Vec<DiscoveredUrl> = self
                .storage
                .claim_batch(job_id, limit)
                .await?
                .into_iter()
                .filter(|entry| !attempted.contains(&entry.url))
                .take(remaining as usize)
                .collect();

            if batch.is_empty() {
                debug!("frontier exhausted");
                break;
            }

            for entry in batch {
                if self.cancel.is_cancelled() {
                    summary.cancelled = true;
                    break 'claim;
                }

                attempted.insert(entry.url.clone());
                let outcome = self.process_url(&entry, &personas).await;
                summary.processed += 1;

                match &outcome {
                    UrlOutcome::Recorded { mappings, .. } => {
                        summary.pages_crawled += 1;
                        if *mappings > 0 {
                            summary.pages_mapped += 1;
                        }
                    }
                    UrlOutcome::Failed { .. } => summary.failed += 1,
                    UrlOutcome::Rejected(_) => summary.rejected += 1,
                    UrlOutcome::Disallowed | UrlOutcome::Skipped { .. } => summary.skipped += 1,
                }

                let total = self.storage.frontier_counts(job_id).await?.total;
                self.storage
                    .update_job_progress(job_id, summary.pages_crawled, summary.pages_mapped, total)
                    .await?;
                self.reporter
                    .url_done(&entry.url, &outcome, summary.processed, budget);

                // Rejections never touched the network.
                if matches!(outcome, UrlOutcome::Rejected(_)) || self.request_delay.is_zero() {
                    continue;
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        summary.cancelled = true;
                        break 'claim;
                    }
                    _ = tokio::time::sleep(self.request_delay) => {}
                }
            }
        }

        if self.cancel.is_cancelled() {
            summary.cancelled = true;
        }
        summary.elapsed = start.elapsed();

        info!(
            processed = summary.processed,
            pages_crawled = summary.pages_crawled,
            pages_mapped = summary.pages_mapped,
            failed = summary.failed,
            rejected = summary.rejected,
            cancelled = summary.cancelled,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "run finished"
        );
        if let Some((daily, monthly)) = self.classifier.spend() {
            info!(daily_usd = daily, monthly_usd = monthly, "AI spend so far");
        }
        self.reporter.done(&summary);
        Ok(summary)
    }

    /// Seed an empty frontier from sitemaps, falling back to the base URL.
    async fn seed_frontier(&self) -> Result<u32> {
        let report = discover(&self.scope, &self.discovery).await?;
        let mut urls = report.urls;

        if urls.is_empty() && self.scope.admits(self.scope.base()) {
            info!("no sitemap URLs found, seeding with the base URL");
            urls.push(normalize_url(self.scope.base()));
        }

        let added = self
            .storage
            .enqueue_many(&self.job.id, &urls, SITEMAP_PRIORITY)
            .await?;
        info!(
            added,
            sitemaps = report.sitemaps_parsed,
            rejected = report.rejected,
            "frontier seeded"
        );
        Ok(added)
    }

    /// Handle one claimed URL. Never fails; problems become frontier state.
    #[instrument(skip_all, fields(url = %entry.url))]
    async fn process_url(&self, entry: &DiscoveredUrl, personas: &[PersonaDefinition]) -> UrlOutcome {
        let job_id = &self.job.id;

        let url = match Url::parse(&entry.url) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "unparseable frontier URL, removing");
                self.remove(entry).await;
                return UrlOutcome::Rejected(Rejection::Scheme);
            }
        };

        // Rules may have changed since the URL was enqueued.
        if let Err(rejection) = self.scope.check(&url) {
            info!(%rejection, "removing URL rejected by job rules");
            self.remove(entry).await;
            return UrlOutcome::Rejected(rejection);
        }

        let response = match self.fetcher.fetch(&url).await {
            FetchOutcome::Fetched(response) => response,
            FetchOutcome::Failed { error, attempts } => {
                debug!(attempts, "fetch failed");
                return self.fail(entry, &error).await;
            }
            FetchOutcome::Disallowed => {
                self.settle(entry).await;
                return UrlOutcome::Disallowed;
            }
            FetchOutcome::Skipped { reason } => {
                self.settle(entry).await;
                return UrlOutcome::Skipped { reason };
            }
        };

        let extracted = extract(&response.body, &response.final_url);
        let now = Utc::now();
        let processing_error = extracted
            .text
            .is_empty()
            .then(|| "no extractable text".to_string());

        let page = CrawledPage {
            id: Uuid::now_v7().to_string(),
            job_id: job_id.clone(),
            url: entry.url.clone(),
            title: extracted.title.clone(),
            meta_description: extracted.meta_description.clone(),
            content: extracted.text.clone(),
            word_count: extracted.word_count,
            status_code: Some(response.status),
            content_hash: response.content_hash.clone(),
            crawled_at: now,
            is_processed: true,
            processed_at: Some(now),
            processing_error,
        };

        let scores = self.classifier.classify(&page, personas).await;
        let record = PageRecord {
            page,
            scores,
            links: extracted.scoped_links(&self.scope),
        };

        match self.storage.record_page_outcome(&record).await {
            Ok(outcome) => UrlOutcome::Recorded {
                mappings: outcome.mappings_created,
                links_added: outcome.links_added,
            },
            Err(e) => {
                warn!(error = %e, "failed to record page, rolled back");
                self.fail(entry, &format!("storage: {e}")).await
            }
        }
    }

    async fn fail(&self, entry: &DiscoveredUrl, error: &str) -> UrlOutcome {
        match self
            .storage
            .mark_failure(&self.job.id, &entry.url, error, MAX_FAILED_ATTEMPTS)
            .await
        {
            Ok(updated) => UrlOutcome::Failed {
                error: error.to_string(),
                permanent: updated.is_failed,
            },
            Err(e) => {
                warn!(error = %e, "could not record fetch failure");
                UrlOutcome::Failed {
                    error: error.to_string(),
                    permanent: false,
                }
            }
        }
    }

    /// Mark a URL done without storing a page.
    async fn settle(&self, entry: &DiscoveredUrl) {
        if let Err(e) = self.storage.mark_success(&self.job.id, &entry.url).await {
            warn!(error = %e, "could not settle frontier entry");
        }
    }

    async fn remove(&self, entry: &DiscoveredUrl) {
        if let Err(e) = self.storage.delete_url(&self.job.id, &entry.url).await {
            warn!(error = %e, "could not remove frontier entry");
        }
    }
}
