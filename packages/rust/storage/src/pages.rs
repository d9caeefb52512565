//! Crawled page records.

use libsql::{Connection, params};
use personamap_shared::{CrawledPage, JobId, PersonaMapError, Result};

use crate::{Storage, db_err, parse_opt_ts, parse_ts};

const PAGE_COLUMNS: &str = "id, job_id, url, title, meta_description, content, word_count, \
     status_code, content_hash, crawled_at, is_processed, processed_at, processing_error";

impl Storage {
    pub async fn get_page(&self, job_id: &JobId, url: &str) -> Result<Option<CrawledPage>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {PAGE_COLUMNS} FROM crawled_pages WHERE job_id = ?1 AND url = ?2"),
                params![job_id.to_string(), url],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_page(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_page_by_id(&self, page_id: &str) -> Result<CrawledPage> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {PAGE_COLUMNS} FROM crawled_pages WHERE id = ?1"),
                params![page_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => row_to_page(&row),
            None => Err(PersonaMapError::NotFound(format!("page {page_id}"))),
        }
    }

    /// List all pages of a job, ordered by URL.
    pub async fn list_pages(&self, job_id: &JobId) -> Result<Vec<CrawledPage>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {PAGE_COLUMNS} FROM crawled_pages WHERE job_id = ?1 ORDER BY url"),
                params![job_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut pages = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            pages.push(row_to_page(&row)?);
        }
        Ok(pages)
    }
}

/// Upsert a page by `(job_id, url)` and return the id of the stored row.
///
/// A re-crawl updates the existing row in place, so the returned id is the
/// original one rather than `page.id`.
pub(crate) async fn upsert_page_on(conn: &Connection, page: &CrawledPage) -> Result<String> {
    conn.execute(
        "INSERT INTO crawled_pages (id, job_id, url, title, meta_description, content, word_count,
             status_code, content_hash, crawled_at, is_processed, processed_at, processing_error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(job_id, url) DO UPDATE SET
           title = excluded.title,
           meta_description = excluded.meta_description,
           content = excluded.content,
           word_count = excluded.word_count,
           status_code = excluded.status_code,
           content_hash = excluded.content_hash,
           crawled_at = excluded.crawled_at,
           is_processed = excluded.is_processed,
           processed_at = excluded.processed_at,
           processing_error = excluded.processing_error",
        params![
            page.id.as_str(),
            page.job_id.to_string(),
            page.url.as_str(),
            page.title.as_deref(),
            page.meta_description.as_deref(),
            page.content.as_str(),
            i64::from(page.word_count),
            page.status_code.map(i64::from),
            page.content_hash.as_str(),
            page.crawled_at.to_rfc3339(),
            i64::from(page.is_processed),
            page.processed_at.map(|t| t.to_rfc3339()),
            page.processing_error.as_deref(),
        ],
    )
    .await
    .map_err(db_err)?;

    let mut rows = conn
        .query(
            "SELECT id FROM crawled_pages WHERE job_id = ?1 AND url = ?2",
            params![page.job_id.to_string(), page.url.as_str()],
        )
        .await
        .map_err(db_err)?;

    match rows.next().await.map_err(db_err)? {
        Some(row) => row.get::<String>(0).map_err(db_err),
        None => Err(PersonaMapError::Storage(format!(
            "page {} missing after upsert",
            page.url
        ))),
    }
}

/// Convert a database row to a [`CrawledPage`].
fn row_to_page(row: &libsql::Row) -> Result<CrawledPage> {
    let job_id: String = row.get(1).map_err(db_err)?;
    let crawled_at: String = row.get(9).map_err(db_err)?;

    Ok(CrawledPage {
        id: row.get::<String>(0).map_err(db_err)?,
        job_id: job_id
            .parse()
            .map_err(|e| PersonaMapError::Storage(format!("invalid job id '{job_id}': {e}")))?,
        url: row.get::<String>(2).map_err(db_err)?,
        title: row.get::<String>(3).ok(),
        meta_description: row.get::<String>(4).ok(),
        content: row.get::<String>(5).map_err(db_err)?,
        word_count: row.get::<u32>(6).map_err(db_err)?,
        status_code: row.get::<i64>(7).ok().map(|v| v as u16),
        content_hash: row.get::<String>(8).map_err(db_err)?,
        crawled_at: parse_ts(&crawled_at)?,
        is_processed: row.get::<i64>(10).map_err(db_err)? != 0,
        processed_at: parse_opt_ts(row.get::<String>(11).ok()),
        processing_error: row.get::<String>(12).ok(),
    })
}
