//! Progress callbacks for job runs.

use personamap_shared::Rejection;

use crate::run::RunSummary;

/// What happened to one claimed frontier URL.
#[derive(Debug, Clone, PartialEq)]
pub enum UrlOutcome {
    /// Page stored and classified.
    Recorded { mappings: usize, links_added: u32 },
    /// Fetch or persistence failed; `permanent` once the attempt limit is hit.
    Failed { error: String, permanent: bool },
    /// Removed from the frontier by the job's rules.
    Rejected(Rejection),
    /// Blocked by robots.txt.
    Disallowed,
    /// Not an HTML document.
    Skipped { reason: String },
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each claimed URL. `processed` counts URLs handled this
    /// run; `budget` is the job's page limit.
    fn url_done(&self, url: &str, outcome: &UrlOutcome, processed: u32, budget: u32);
    /// Called when the run ends without a job-fatal error.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn url_done(&self, _url: &str, _outcome: &UrlOutcome, _processed: u32, _budget: u32) {}
    fn done(&self, _summary: &RunSummary) {}
}
