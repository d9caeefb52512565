//! Terminal progress reporting for `personamap crawl`.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use personamap_core::{ProgressReporter, RunSummary, UrlOutcome};

/// Spinner driven by run callbacks.
pub(crate) struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    pub(crate) fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn url_done(&self, url: &str, outcome: &UrlOutcome, processed: u32, budget: u32) {
        let tag = match outcome {
            UrlOutcome::Recorded { mappings: 0, .. } => "crawled".to_string(),
            UrlOutcome::Recorded { mappings, .. } => format!("{mappings} mapped"),
            UrlOutcome::Failed { permanent: true, .. } => "failed permanently".to_string(),
            UrlOutcome::Failed { .. } => "failed".to_string(),
            UrlOutcome::Rejected(reason) => format!("removed: {reason}"),
            UrlOutcome::Disallowed => "robots.txt".to_string(),
            UrlOutcome::Skipped { .. } => "skipped".to_string(),
        };
        self.spinner
            .set_message(format!("[{processed}/{budget}] {url} ({tag})"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}
