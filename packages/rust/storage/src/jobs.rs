//! Crawl job records: configuration, status, and progress counters.

use libsql::{Connection, params};
use personamap_shared::{CrawlJob, JobId, JobStatus, PersonaMapError, Result};

use crate::frontier::clear_job_rows;
use crate::{Storage, db_err, now_ts, parse_opt_ts, parse_ts};

const JOB_COLUMNS: &str = "id, name, base_url, include_patterns, exclude_patterns, max_pages, \
     crawl_mode, schedule, status, pages_crawled, pages_mapped, total_discovered_urls, \
     last_activity_at, last_run_at, error_message, created_at";

impl Storage {
    /// Insert a new crawl job.
    pub async fn insert_job(&self, job: &CrawlJob) -> Result<()> {
        self.check_writable()?;
        let include = serde_json::to_string(&job.include_patterns)
            .map_err(|e| PersonaMapError::Storage(e.to_string()))?;
        let exclude = serde_json::to_string(&job.exclude_patterns)
            .map_err(|e| PersonaMapError::Storage(e.to_string()))?;

        self.conn
            .execute(
                "INSERT INTO crawl_jobs (id, name, base_url, include_patterns, exclude_patterns,
                     max_pages, crawl_mode, schedule, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    job.id.to_string(),
                    job.name.as_str(),
                    job.base_url.as_str(),
                    include,
                    exclude,
                    i64::from(job.max_pages),
                    job.crawl_mode.as_str(),
                    job.schedule.as_deref(),
                    job.status.as_str(),
                    job.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: &JobId) -> Result<CrawlJob> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM crawl_jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => row_to_job(&row),
            None => Err(PersonaMapError::NotFound(format!("job {id}"))),
        }
    }

    /// List all jobs, newest first.
    pub async fn list_jobs(&self) -> Result<Vec<CrawlJob>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM crawl_jobs ORDER BY created_at DESC"),
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    /// Delete a job together with its frontier, pages, mappings, and persona assignments.
    ///
    /// Runs in one transaction; on error nothing is removed.
    pub async fn delete_job(&self, id: &JobId) -> Result<()> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(db_err)?;
        match delete_job_on(&tx, &id.to_string()).await {
            Ok(0) => {
                let _ = tx.rollback().await;
                Err(PersonaMapError::NotFound(format!("job {id}")))
            }
            Ok(_) => {
                tx.commit().await.map_err(db_err)?;
                tracing::info!(job_id = %id, "deleted job");
                Ok(())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(db_err(e))
            }
        }
    }

    /// Atomically move a job to `running` unless it already is.
    ///
    /// Resets the per-run counters and error. Returns `false` when the job was
    /// already running, which makes the status column a cross-process guard.
    pub async fn try_mark_running(&self, id: &JobId) -> Result<bool> {
        self.check_writable()?;
        let now = now_ts();
        let changed = self
            .conn
            .execute(
                "UPDATE crawl_jobs
                 SET status = 'running', error_message = NULL, pages_crawled = 0,
                     pages_mapped = 0, last_run_at = ?1, last_activity_at = ?1
                 WHERE id = ?2 AND status != 'running'",
                params![now.as_str(), id.to_string()],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Set a job's status and error message.
    pub async fn set_job_status(
        &self,
        id: &JobId,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        let now = now_ts();
        self.conn
            .execute(
                "UPDATE crawl_jobs SET status = ?1, error_message = ?2, last_activity_at = ?3
                 WHERE id = ?4",
                params![status.as_str(), error, now.as_str(), id.to_string()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Record progress after a URL has been processed.
    pub async fn update_job_progress(
        &self,
        id: &JobId,
        pages_crawled: u32,
        pages_mapped: u32,
        total_discovered_urls: u32,
    ) -> Result<()> {
        self.check_writable()?;
        let now = now_ts();
        self.conn
            .execute(
                "UPDATE crawl_jobs
                 SET pages_crawled = ?1, pages_mapped = ?2, total_discovered_urls = ?3,
                     last_activity_at = ?4
                 WHERE id = ?5",
                params![
                    i64::from(pages_crawled),
                    i64::from(pages_mapped),
                    i64::from(total_discovered_urls),
                    now.as_str(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

/// Delete every row owned by a job, then the job itself. Returns the job rows removed.
async fn delete_job_on(conn: &Connection, job_id: &str) -> libsql::Result<u64> {
    clear_job_rows(conn, job_id).await?;
    conn.execute("DELETE FROM job_personas WHERE job_id = ?1", params![job_id])
        .await?;
    conn.execute("DELETE FROM crawl_jobs WHERE id = ?1", params![job_id])
        .await
}

/// Convert a database row to a [`CrawlJob`].
fn row_to_job(row: &libsql::Row) -> Result<CrawlJob> {
    let id: String = row.get(0).map_err(db_err)?;
    let include: String = row.get(3).map_err(db_err)?;
    let exclude: String = row.get(4).map_err(db_err)?;
    let mode: String = row.get(6).map_err(db_err)?;
    let status: String = row.get(8).map_err(db_err)?;
    let created_at: String = row.get(15).map_err(db_err)?;

    Ok(CrawlJob {
        id: id
            .parse()
            .map_err(|e| PersonaMapError::Storage(format!("invalid job id '{id}': {e}")))?,
        name: row.get::<String>(1).map_err(db_err)?,
        base_url: row.get::<String>(2).map_err(db_err)?,
        include_patterns: serde_json::from_str(&include)
            .map_err(|e| PersonaMapError::Storage(format!("invalid include patterns: {e}")))?,
        exclude_patterns: serde_json::from_str(&exclude)
            .map_err(|e| PersonaMapError::Storage(format!("invalid exclude patterns: {e}")))?,
        max_pages: row.get::<u32>(5).map_err(db_err)?,
        crawl_mode: mode.parse()?,
        schedule: row.get::<String>(7).ok(),
        status: status.parse()?,
        pages_crawled: row.get::<u32>(9).map_err(db_err)?,
        pages_mapped: row.get::<u32>(10).map_err(db_err)?,
        total_discovered_urls: row.get::<u32>(11).map_err(db_err)?,
        last_activity_at: parse_opt_ts(row.get::<String>(12).ok()),
        last_run_at: parse_opt_ts(row.get::<String>(13).ok()),
        error_message: row.get::<String>(14).ok(),
        created_at: parse_ts(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_storage;
    use personamap_shared::{CrawlJob, CrawlMode, JobId, JobStatus};

    #[tokio::test]
    async fn job_crud() {
        let storage = test_storage().await;
        let mut job = CrawlJob::new("docs", "https://example.com", 25);
        job.include_patterns = vec!["/docs/*".into()];
        job.exclude_patterns = vec!["share=*".into()];
        job.crawl_mode = CrawlMode::Overwrite;
        job.schedule = Some("0 3 * * *".into());
        storage.insert_job(&job).await.unwrap();

        let loaded = storage.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.name, "docs");
        assert_eq!(loaded.max_pages, 25);
        assert_eq!(loaded.crawl_mode, CrawlMode::Overwrite);
        assert_eq!(loaded.include_patterns, vec!["/docs/*".to_string()]);
        assert_eq!(loaded.exclude_patterns, vec!["share=*".to_string()]);
        assert_eq!(loaded.schedule.as_deref(), Some("0 3 * * *"));
        assert_eq!(loaded.status, JobStatus::Inactive);

        assert_eq!(storage.list_jobs().await.unwrap().len(), 1);

        storage.delete_job(&job.id).await.unwrap();
        assert!(storage.get_job(&job.id).await.is_err());
        assert!(storage.delete_job(&job.id).await.is_err());
    }

    #[tokio::test]
    async fn running_guard() {
        let storage = test_storage().await;
        let job = CrawlJob::new("docs", "https://example.com", 10);
        storage.insert_job(&job).await.unwrap();

        assert!(storage.try_mark_running(&job.id).await.unwrap());
        assert!(!storage.try_mark_running(&job.id).await.unwrap());

        storage
            .set_job_status(&job.id, JobStatus::Failed, Some("boom"))
            .await
            .unwrap();
        let loaded = storage.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(loaded.error_message.as_deref(), Some("boom"));

        // failed -> running clears the error
        assert!(storage.try_mark_running(&job.id).await.unwrap());
        let loaded = storage.get_job(&job.id).await.unwrap();
        assert!(loaded.error_message.is_none());
        assert!(loaded.last_run_at.is_some());
    }

    #[tokio::test]
    async fn progress_update() {
        let storage = test_storage().await;
        let job = CrawlJob::new("docs", "https://example.com", 10);
        storage.insert_job(&job).await.unwrap();

        storage.update_job_progress(&job.id, 3, 2, 8).await.unwrap();
        let loaded = storage.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.pages_crawled, 3);
        assert_eq!(loaded.pages_mapped, 2);
        assert_eq!(loaded.total_discovered_urls, 8);
        assert!(loaded.last_activity_at.is_some());
    }

    #[tokio::test]
    async fn missing_job_is_not_found() {
        let storage = test_storage().await;
        let err = storage.get_job(&JobId::new()).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn failed_delete_keeps_job_data() {
        let storage = test_storage().await;
        let job = CrawlJob::new("docs", "https://example.com", 10);
        storage.insert_job(&job).await.unwrap();
        storage.enqueue(&job.id, "https://example.com/a", 0).await.unwrap();
        storage
            .conn
            .execute(
                "CREATE TRIGGER block_job_delete BEFORE DELETE ON crawl_jobs
                 BEGIN SELECT RAISE(ABORT, 'delete blocked'); END",
                libsql::params![],
            )
            .await
            .unwrap();

        assert!(storage.delete_job(&job.id).await.is_err());
        assert_eq!(storage.frontier_counts(&job.id).await.unwrap().total, 1);
        assert!(storage.get_job(&job.id).await.is_ok());
    }

    #[tokio::test]
    async fn list_jobs_surfaces_row_errors() {
        let storage = test_storage().await;
        storage
            .insert_job(&CrawlJob::new("docs", "https://example.com", 10))
            .await
            .unwrap();

        // Serve the table through a view whose json() call fails while stepping.
        for sql in [
            "ALTER TABLE crawl_jobs RENAME TO crawl_jobs_raw",
            "CREATE VIEW crawl_jobs AS
             SELECT id, name, base_url, json(include_patterns) AS include_patterns,
                    exclude_patterns, max_pages, crawl_mode, schedule, status, pages_crawled,
                    pages_mapped, total_discovered_urls, last_activity_at, last_run_at,
                    error_message, created_at
             FROM crawl_jobs_raw",
            "INSERT INTO crawl_jobs_raw (id, name, base_url, include_patterns, exclude_patterns,
                 max_pages, crawl_mode, status, created_at)
             VALUES ('broken', 'broken', 'https://example.org', 'not json', '[]', 1,
                 'incremental', 'inactive', '2020-01-01T00:00:00Z')",
        ] {
            storage.conn.execute(sql, libsql::params![]).await.unwrap();
        }

        assert!(storage.list_jobs().await.is_err());
    }
}
