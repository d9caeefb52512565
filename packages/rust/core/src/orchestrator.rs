//! Job lifecycle: start, stop, progress, and the in-process run registry.
//!
//! At most one run per job is active. Two guards enforce this: the
//! [`JobRegistry`] for runs in this process and the job's `status` column
//! (`try_mark_running`) for runs anywhere else using the same database.
//!
//! ```text
//! inactive ──start──▶ running ──exhausted──▶ completed ──start──▶ running
//!                       │  │
//!                       │  ├──fatal error──▶ failed ──start──▶ running
//!                       │  └──reset (run died with its process)──▶ inactive
//!                       └──stop──▶ inactive
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use personamap_classifier::Classifier;
use personamap_crawler::Fetcher;
use personamap_discovery::DiscoveryOptions;
use personamap_shared::{
    AppConfig, CrawlScope, FetchConfig, JobId, JobStatus, PersonaMapError, ProgressSnapshot,
    Result,
};
use personamap_storage::Storage;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::progress::{ProgressReporter, SilentProgress};
use crate::run::{JobRun, RunSummary};

// ---------------------------------------------------------------------------
// JobRegistry
// ---------------------------------------------------------------------------

/// Handle to a run in flight.
struct RunHandle {
    cancel: CancellationToken,
    /// Flips to `true` when the run's task has finished.
    finished: watch::Receiver<bool>,
}

/// Runs active in this process, keyed by job.
#[derive(Default)]
pub struct JobRegistry {
    runs: Mutex<HashMap<JobId, RunHandle>>,
}

impl JobRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, RunHandle>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.lock().contains_key(job_id)
    }

    fn cancel(&self, job_id: &JobId) -> bool {
        match self.lock().get(job_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn finished(&self, job_id: &JobId) -> Option<watch::Receiver<bool>> {
        self.lock().get(job_id).map(|h| h.finished.clone())
    }

    fn remove(&self, job_id: &JobId) {
        self.lock().remove(job_id);
    }
}

/// Removes the registry entry and signals waiters when the run task ends,
/// including by panic.
struct RunGuard {
    registry: Arc<JobRegistry>,
    job_id: JobId,
    finished: watch::Sender<bool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.job_id);
        let _ = self.finished.send(true);
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Starts and supervises job runs.
pub struct Orchestrator {
    storage: Storage,
    config: AppConfig,
    registry: Arc<JobRegistry>,
    reporter: Arc<dyn ProgressReporter>,
}

impl Orchestrator {
    pub fn new(storage: Storage, config: AppConfig) -> Self {
        Self {
            storage,
            config,
            registry: Arc::new(JobRegistry::default()),
            reporter: Arc::new(SilentProgress),
        }
    }

    /// Report run progress to `reporter` instead of discarding it.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Start a run of `job_id` in the background.
    ///
    /// Returns `false` when the job is already running, here or in another
    /// process sharing the database.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn start(&self, job_id: &JobId) -> Result<bool> {
        let cancel = CancellationToken::new();
        let (finished_tx, finished_rx) = watch::channel(false);
        {
            let mut runs = self.registry.lock();
            if runs.contains_key(job_id) {
                info!("job already running in this process");
                return Ok(false);
            }
            runs.insert(
                job_id.clone(),
                RunHandle {
                    cancel: cancel.clone(),
                    finished: finished_rx,
                },
            );
        }
        // The slot is held from here on; dropping the guard on any early
        // return releases it before the status column is touched again.
        let guard = RunGuard {
            registry: Arc::clone(&self.registry),
            job_id: job_id.clone(),
            finished: finished_tx,
        };

        let job = self.storage.get_job(job_id).await?;
        if !self.storage.try_mark_running(job_id).await? {
            info!("job already marked running");
            return Ok(false);
        }

        let run = match self.prepare_run(job_id, cancel).await {
            Ok(run) => run,
            Err(e) => {
                error!(error = %e, "could not prepare run");
                self.storage
                    .set_job_status(job_id, JobStatus::Failed, Some(&e.to_string()))
                    .await?;
                return Err(e);
            }
        };

        info!(name = %job.name, "job started");
        tokio::spawn(async move {
            let _guard = guard;
            supervise(run).await;
        });

        Ok(true)
    }

    /// Return a job stuck in `running` to `inactive`.
    ///
    /// For a run that died with its process (crash or kill) and so never wrote
    /// a terminal status. Refuses while this process has the job in flight.
    /// Returns `false` when nothing was reset.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn reset(&self, job_id: &JobId) -> Result<bool> {
        if self.registry.contains(job_id) {
            warn!("job is running in this process, stop it instead");
            return Ok(false);
        }

        let job = self.storage.get_job(job_id).await?;
        if job.status != JobStatus::Running {
            info!(status = job.status.as_str(), "job is not marked running");
            return Ok(false);
        }

        self.storage
            .set_job_status(job_id, JobStatus::Inactive, None)
            .await?;
        info!("reset interrupted job to inactive");
        Ok(true)
    }

    /// Ask a running job to stop after its current URL.
    pub fn stop(&self, job_id: &JobId) -> bool {
        let stopped = self.registry.cancel(job_id);
        if stopped {
            info!(job_id = %job_id, "stop requested");
        }
        stopped
    }

    pub fn is_running(&self, job_id: &JobId) -> bool {
        self.registry.contains(job_id)
    }

    /// Current progress as stored for the job.
    pub async fn progress(&self, job_id: &JobId) -> Result<ProgressSnapshot> {
        let job = self.storage.get_job(job_id).await?;
        Ok(ProgressSnapshot::from(&job))
    }

    /// Wait until the job's current run (if any) has finished.
    pub async fn wait(&self, job_id: &JobId) {
        let Some(mut finished) = self.registry.finished(job_id) else {
            return;
        };
        // A closed channel means the guard already dropped.
        let _ = finished.wait_for(|done| *done).await;
    }

    /// Start a run and wait for it, returning the final progress.
    pub async fn run_to_completion(&self, job_id: &JobId) -> Result<ProgressSnapshot> {
        if !self.start(job_id).await? {
            return Err(PersonaMapError::Conflict(format!(
                "job {job_id} is already running"
            )));
        }
        self.wait(job_id).await;
        self.progress(job_id).await
    }

    /// Build everything a run owns: its own connection, HTTP client, and classifier.
    async fn prepare_run(&self, job_id: &JobId, cancel: CancellationToken) -> Result<JobRun> {
        let storage = self.storage.fork().await?;
        let job = storage.get_job(job_id).await?;
        let scope = CrawlScope::for_job(&job.base_url, &job.include_patterns, &job.exclude_patterns)?;

        let fetch_config = FetchConfig::from(&self.config);
        let discovery = DiscoveryOptions::from(&fetch_config);
        let request_delay = Duration::from_millis(fetch_config.request_delay_ms);
        let fetcher = Fetcher::new(fetch_config)?;

        let classifier = Classifier::from_config(&self.config.ai).unwrap_or_else(|e| {
            warn!(error = %e, "AI classifier unavailable, using keyword mode");
            Classifier::keyword_only(self.config.ai.keyword_threshold)
        });

        Ok(JobRun {
            storage,
            job,
            scope,
            fetcher,
            classifier,
            discovery,
            request_delay,
            cancel,
            reporter: Arc::clone(&self.reporter),
        })
    }
}

/// Run a job and write its terminal status.
async fn supervise(run: JobRun) {
    let run = Arc::new(run);
    let job_id = run.job.id.clone();

    // A nested task turns a panic into a JoinError instead of a stuck `running` row.
    let task = {
        let run = Arc::clone(&run);
        tokio::spawn(async move { run.execute().await })
    };
    let result: Result<RunSummary> = match task.await {
        Ok(result) => result,
        Err(e) => Err(PersonaMapError::Storage(format!("run task aborted: {e}"))),
    };

    let (status, message) = match &result {
        Ok(summary) if summary.cancelled => (JobStatus::Inactive, None),
        Ok(_) => (JobStatus::Completed, None),
        Err(e) => {
            error!(job_id = %job_id, error = %e, "run failed");
            (JobStatus::Failed, Some(e.to_string()))
        }
    };

    if let Err(e) = run
        .storage
        .set_job_status(&job_id, status, message.as_deref())
        .await
    {
        error!(job_id = %job_id, error = %e, "could not record final job status");
    }
    info!(job_id = %job_id, status = status.as_str(), "job finished");
}
