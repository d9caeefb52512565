//! URL frontier: discovered URLs tracked through crawl success and failure.

use libsql::{Connection, params};
use personamap_shared::{DiscoveredUrl, FrontierCounts, JobId, PersonaMapError, Result};

use crate::{Storage, db_err, now_ts, parse_opt_ts, parse_ts};

const URL_COLUMNS: &str = "job_id, url, priority, discovered_at, is_crawled, crawled_at, \
     failed_attempts, is_failed, last_error";

impl Storage {
    /// Add a URL to the frontier. Returns `false` if it was already known.
    pub async fn enqueue(&self, job_id: &JobId, url: &str, priority: i64) -> Result<bool> {
        self.check_writable()?;
        let inserted = insert_url(&self.conn, job_id, url, priority, &now_ts()).await?;
        Ok(inserted)
    }

    /// Add many URLs in one transaction. Returns how many were new.
    pub async fn enqueue_many(&self, job_id: &JobId, urls: &[String], priority: i64) -> Result<u32> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(db_err)?;
        let now = now_ts();
        let mut added = 0;
        for url in urls {
            match insert_url(&tx, job_id, url, priority, &now).await {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => {
                    let _ = tx.rollback().await;
                    return Err(e);
                }
            }
        }
        tx.commit().await.map_err(db_err)?;
        Ok(added)
    }

    /// Pending entries: not crawled, not permanently failed, by priority then discovery time.
    pub async fn claim_batch(&self, job_id: &JobId, limit: u32) -> Result<Vec<DiscoveredUrl>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {URL_COLUMNS} FROM discovered_urls
                     WHERE job_id = ?1 AND is_crawled = 0 AND is_failed = 0
                     ORDER BY priority ASC, discovered_at ASC, id ASC
                     LIMIT ?2"
                ),
                params![job_id.to_string(), i64::from(limit)],
            )
            .await
            .map_err(db_err)?;

        let mut batch = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            batch.push(row_to_discovered_url(&row)?);
        }
        Ok(batch)
    }

    /// Mark a URL crawled and clear its failure state.
    pub async fn mark_success(&self, job_id: &JobId, url: &str) -> Result<()> {
        self.check_writable()?;
        mark_success_on(&self.conn, job_id, url, &now_ts()).await
    }

    /// Record a failed fetch; the entry becomes permanently failed at `max_attempts`.
    pub async fn mark_failure(
        &self,
        job_id: &JobId,
        url: &str,
        error: &str,
        max_attempts: u32,
    ) -> Result<DiscoveredUrl> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE discovered_urls
                 SET failed_attempts = failed_attempts + 1,
                     last_error = ?1,
                     is_failed = CASE WHEN failed_attempts + 1 >= ?2 THEN 1 ELSE 0 END
                 WHERE job_id = ?3 AND url = ?4",
                params![error, i64::from(max_attempts), job_id.to_string(), url],
            )
            .await
            .map_err(db_err)?;
        if changed == 0 {
            return Err(PersonaMapError::NotFound(format!("frontier entry {url}")));
        }

        let entry = self
            .get_url(job_id, url)
            .await?
            .ok_or_else(|| PersonaMapError::NotFound(format!("frontier entry {url}")))?;
        if entry.is_failed {
            tracing::warn!(%url, attempts = entry.failed_attempts, error, "URL permanently failed");
        }
        Ok(entry)
    }

    /// Clear crawled and failure state for every entry of a job.
    pub async fn reset_for_overwrite(&self, job_id: &JobId) -> Result<u64> {
        self.check_writable()?;
        let reset = self
            .conn
            .execute(
                "UPDATE discovered_urls
                 SET is_crawled = 0, crawled_at = NULL, failed_attempts = 0,
                     is_failed = 0, last_error = NULL
                 WHERE job_id = ?1",
                params![job_id.to_string()],
            )
            .await
            .map_err(db_err)?;
        tracing::info!(job_id = %job_id, reset, "frontier reset for overwrite");
        Ok(reset)
    }

    /// Remove an entry that no longer passes the job's URL rules.
    pub async fn delete_url(&self, job_id: &JobId, url: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM discovered_urls WHERE job_id = ?1 AND url = ?2",
                params![job_id.to_string(), url],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_url(&self, job_id: &JobId, url: &str) -> Result<Option<DiscoveredUrl>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {URL_COLUMNS} FROM discovered_urls WHERE job_id = ?1 AND url = ?2"),
                params![job_id.to_string(), url],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_discovered_url(&row)?)),
            None => Ok(None),
        }
    }

    /// All frontier entries of a job in claim order.
    pub async fn list_urls(&self, job_id: &JobId) -> Result<Vec<DiscoveredUrl>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {URL_COLUMNS} FROM discovered_urls WHERE job_id = ?1
                     ORDER BY priority ASC, discovered_at ASC, id ASC"
                ),
                params![job_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut urls = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            urls.push(row_to_discovered_url(&row)?);
        }
        Ok(urls)
    }

    pub async fn frontier_counts(&self, job_id: &JobId) -> Result<FrontierCounts> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*),
                        COALESCE(SUM(is_crawled), 0),
                        COALESCE(SUM(CASE WHEN is_crawled = 0 AND is_failed = 0 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(is_failed), 0)
                 FROM discovered_urls WHERE job_id = ?1",
                params![job_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(FrontierCounts {
                total: row.get::<u32>(0).map_err(db_err)?,
                crawled: row.get::<u32>(1).map_err(db_err)?,
                pending: row.get::<u32>(2).map_err(db_err)?,
                failed: row.get::<u32>(3).map_err(db_err)?,
            }),
            None => Ok(FrontierCounts::default()),
        }
    }

    /// Explicit data clear: frontier, pages, and every mapping of those pages.
    pub async fn clear_job_data(&self, job_id: &JobId) -> Result<()> {
        self.check_writable()?;
        let id = job_id.to_string();
        let tx = self.conn.transaction().await.map_err(db_err)?;
        match clear_job_rows(&tx, &id).await {
            Ok(()) => {
                tx.commit().await.map_err(db_err)?;
                tracing::info!(job_id = %job_id, "cleared job data");
                Ok(())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(db_err(e))
            }
        }
    }
}

/// Delete a job's mappings, pages, and frontier on any connection or transaction.
pub(crate) async fn clear_job_rows(conn: &Connection, job_id: &str) -> libsql::Result<()> {
    conn.execute(
        "DELETE FROM content_mappings
         WHERE page_id IN (SELECT id FROM crawled_pages WHERE job_id = ?1)",
        params![job_id],
    )
    .await?;
    conn.execute("DELETE FROM crawled_pages WHERE job_id = ?1", params![job_id])
        .await?;
    conn.execute("DELETE FROM discovered_urls WHERE job_id = ?1", params![job_id])
        .await?;
    Ok(())
}

/// `INSERT OR IGNORE` a frontier row on any connection or transaction.
pub(crate) async fn insert_url(
    conn: &Connection,
    job_id: &JobId,
    url: &str,
    priority: i64,
    now: &str,
) -> Result<bool> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO discovered_urls (job_id, url, priority, discovered_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![job_id.to_string(), url, priority, now],
        )
        .await
        .map_err(db_err)?;
    Ok(inserted > 0)
}

pub(crate) async fn mark_success_on(
    conn: &Connection,
    job_id: &JobId,
    url: &str,
    now: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE discovered_urls
         SET is_crawled = 1, crawled_at = ?1, failed_attempts = 0, is_failed = 0, last_error = NULL
         WHERE job_id = ?2 AND url = ?3",
        params![now, job_id.to_string(), url],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Convert a database row to a [`DiscoveredUrl`].
fn row_to_discovered_url(row: &libsql::Row) -> Result<DiscoveredUrl> {
    let job_id: String = row.get(0).map_err(db_err)?;
    let discovered_at: String = row.get(3).map_err(db_err)?;

    Ok(DiscoveredUrl {
        job_id: job_id
            .parse()
            .map_err(|e| PersonaMapError::Storage(format!("invalid job id '{job_id}': {e}")))?,
        url: row.get::<String>(1).map_err(db_err)?,
        priority: row.get::<i64>(2).map_err(db_err)?,
        discovered_at: parse_ts(&discovered_at)?,
        is_crawled: row.get::<i64>(4).map_err(db_err)? != 0,
        crawled_at: parse_opt_ts(row.get::<String>(5).ok()),
        failed_attempts: row.get::<u32>(6).map_err(db_err)?,
        is_failed: row.get::<i64>(7).map_err(db_err)? != 0,
        last_error: row.get::<String>(8).ok(),
    })
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_storage;
    use personamap_shared::{
        CrawlJob, JobId, LINK_PRIORITY, MAX_FAILED_ATTEMPTS, SITEMAP_PRIORITY,
    };

    async fn storage_with_job() -> (crate::Storage, JobId) {
        let storage = test_storage().await;
        let job = CrawlJob::new("docs", "https://example.com", 100);
        storage.insert_job(&job).await.unwrap();
        (storage, job.id)
    }

    #[tokio::test]
    async fn enqueue_is_unique_per_job() {
        let (storage, job) = storage_with_job().await;
        assert!(storage.enqueue(&job, "https://example.com/a", 0).await.unwrap());
        assert!(!storage.enqueue(&job, "https://example.com/a", 1).await.unwrap());

        let urls = vec![
            "https://example.com/a".to_string(),
            "https://example.com/b".to_string(),
        ];
        assert_eq!(storage.enqueue_many(&job, &urls, 0).await.unwrap(), 1);
        // Re-seeding the same set adds nothing
        assert_eq!(storage.enqueue_many(&job, &urls, 0).await.unwrap(), 0);
        assert_eq!(storage.frontier_counts(&job).await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_discovery() {
        let (storage, job) = storage_with_job().await;
        storage
            .enqueue(&job, "https://example.com/link", LINK_PRIORITY)
            .await
            .unwrap();
        storage
            .enqueue(&job, "https://example.com/first", SITEMAP_PRIORITY)
            .await
            .unwrap();
        storage
            .enqueue(&job, "https://example.com/second", SITEMAP_PRIORITY)
            .await
            .unwrap();

        let batch = storage.claim_batch(&job, 10).await.unwrap();
        let urls: Vec<&str> = batch.iter().map(|u| u.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/first",
                "https://example.com/second",
                "https://example.com/link",
            ]
        );

        let limited = storage.claim_batch(&job, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn three_failures_mark_permanent() {
        let (storage, job) = storage_with_job().await;
        let url = "https://example.com/broken";
        storage.enqueue(&job, url, 0).await.unwrap();

        for attempt in 1..=MAX_FAILED_ATTEMPTS {
            let entry = storage
                .mark_failure(&job, url, "HTTP 503", MAX_FAILED_ATTEMPTS)
                .await
                .unwrap();
            assert_eq!(entry.failed_attempts, attempt);
            // failed_attempts < 3 <=> not permanently failed
            assert_eq!(entry.is_failed, attempt >= MAX_FAILED_ATTEMPTS);
        }

        let entry = storage.get_url(&job, url).await.unwrap().unwrap();
        assert!(entry.is_failed);
        assert_eq!(entry.last_error.as_deref(), Some("HTTP 503"));
        assert!(storage.claim_batch(&job, 10).await.unwrap().is_empty());
        assert_eq!(storage.frontier_counts(&job).await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn success_resets_failure_state() {
        let (storage, job) = storage_with_job().await;
        let url = "https://example.com/flaky";
        storage.enqueue(&job, url, 0).await.unwrap();
        storage.mark_failure(&job, url, "timeout", 3).await.unwrap();
        storage.mark_failure(&job, url, "timeout", 3).await.unwrap();

        storage.mark_success(&job, url).await.unwrap();
        let entry = storage.get_url(&job, url).await.unwrap().unwrap();
        assert!(entry.is_crawled);
        assert!(entry.crawled_at.is_some());
        assert_eq!(entry.failed_attempts, 0);
        assert!(!entry.is_failed);
        assert!(entry.last_error.is_none());
    }

    #[tokio::test]
    async fn overwrite_reset_clears_all_entries() {
        let (storage, job) = storage_with_job().await;
        for i in 0..10 {
            let url = format!("https://example.com/page-{i}");
            storage.enqueue(&job, &url, 0).await.unwrap();
            if i == 9 {
                for _ in 0..3 {
                    storage.mark_failure(&job, &url, "gone", 3).await.unwrap();
                }
            } else {
                storage.mark_success(&job, &url).await.unwrap();
            }
        }
        assert!(storage.claim_batch(&job, 100).await.unwrap().is_empty());

        assert_eq!(storage.reset_for_overwrite(&job).await.unwrap(), 10);

        let urls = storage.list_urls(&job).await.unwrap();
        assert_eq!(urls.len(), 10);
        assert!(urls.iter().all(|u| !u.is_crawled
            && u.crawled_at.is_none()
            && u.failed_attempts == 0
            && !u.is_failed
            && u.last_error.is_none()));
        assert_eq!(storage.claim_batch(&job, 100).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let (storage, job) = storage_with_job().await;
        storage.enqueue(&job, "https://example.com/a", 0).await.unwrap();
        storage.enqueue(&job, "https://example.com/b", 0).await.unwrap();

        storage.delete_url(&job, "https://example.com/a").await.unwrap();
        assert!(storage.get_url(&job, "https://example.com/a").await.unwrap().is_none());

        storage.clear_job_data(&job).await.unwrap();
        assert_eq!(storage.frontier_counts(&job).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn failure_on_unknown_url_is_not_found() {
        let (storage, job) = storage_with_job().await;
        assert!(storage.mark_failure(&job, "https://example.com/x", "e", 3).await.is_err());
    }
}
