//! Page↔persona mapping history and the per-URL outcome transaction.
//!
//! Mapping rows are never deleted by a crawl. Each pass deactivates the
//! page's current rows and appends the new scores under one shared
//! `crawl_timestamp`, so the active rows are always the latest pass.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use libsql::{Connection, params};
use personamap_shared::{
    ContentMapping, CrawledPage, LINK_PRIORITY, PersonaMapError, PersonaScore, Result,
};
use uuid::Uuid;

use crate::frontier::{insert_url, mark_success_on};
use crate::pages::upsert_page_on;
use crate::{Storage, db_err, parse_ts};

const MAPPING_COLUMNS: &str = "id, page_id, persona_id, confidence, reason, method, is_verified, \
     is_active, crawl_timestamp, created_at";

/// Everything produced by processing one frontier URL.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub page: CrawledPage,
    /// Scores that passed their strategy's threshold.
    pub scores: Vec<PersonaScore>,
    /// Outgoing links already filtered by the job's scope.
    pub links: Vec<String>,
}

/// What [`Storage::record_page_outcome`] changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    /// Id of the stored page (stable across re-crawls).
    pub page_id: String,
    pub mappings_created: usize,
    pub mappings_deactivated: u64,
    pub links_added: u32,
}

impl Storage {
    /// Persist one URL's outcome in a single transaction.
    ///
    /// Upserts the page, supersedes its active mappings with `scores`, marks
    /// the frontier entry crawled, and enqueues newly discovered links. On
    /// error nothing is written.
    pub async fn record_page_outcome(&self, record: &PageRecord) -> Result<RecordOutcome> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(db_err)?;
        let crawl_timestamp = Utc::now();

        match write_outcome(&tx, record, crawl_timestamp).await {
            Ok(outcome) => {
                tx.commit().await.map_err(db_err)?;
                tracing::debug!(
                    url = %record.page.url,
                    mappings = outcome.mappings_created,
                    links = outcome.links_added,
                    "recorded page outcome"
                );
                Ok(outcome)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Mappings of a page; only the active ones unless `include_history`.
    pub async fn mappings_for_page(
        &self,
        page_id: &str,
        include_history: bool,
    ) -> Result<Vec<ContentMapping>> {
        let filter = if include_history { "" } else { "AND is_active = 1" };
        self.query_mappings(
            &format!(
                "SELECT {MAPPING_COLUMNS} FROM content_mappings WHERE page_id = ?1 {filter}
                 ORDER BY crawl_timestamp DESC, confidence DESC"
            ),
            page_id,
        )
        .await
    }

    /// Mappings of a persona across pages, most confident first.
    pub async fn mappings_for_persona(
        &self,
        persona_id: &str,
        include_history: bool,
    ) -> Result<Vec<ContentMapping>> {
        let filter = if include_history { "" } else { "AND is_active = 1" };
        self.query_mappings(
            &format!(
                "SELECT {MAPPING_COLUMNS} FROM content_mappings WHERE persona_id = ?1 {filter}
                 ORDER BY confidence DESC, crawl_timestamp DESC"
            ),
            persona_id,
        )
        .await
    }

    /// Full history of one (page, persona) pair, oldest first.
    pub async fn mapping_history(
        &self,
        page_id: &str,
        persona_id: &str,
    ) -> Result<Vec<ContentMapping>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {MAPPING_COLUMNS} FROM content_mappings
                     WHERE page_id = ?1 AND persona_id = ?2
                     ORDER BY crawl_timestamp ASC, created_at ASC"
                ),
                params![page_id, persona_id],
            )
            .await
            .map_err(db_err)?;

        let mut mappings = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            mappings.push(row_to_mapping(&row)?);
        }
        Ok(mappings)
    }

    async fn query_mappings(&self, sql: &str, key: &str) -> Result<Vec<ContentMapping>> {
        let mut rows = self.conn.query(sql, params![key]).await.map_err(db_err)?;
        let mut mappings = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            mappings.push(row_to_mapping(&row)?);
        }
        Ok(mappings)
    }

    /// Set or clear the operator verification flag.
    pub async fn verify_mapping(&self, mapping_id: &str, verified: bool) -> Result<()> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE content_mappings SET is_verified = ?1 WHERE id = ?2",
                params![i64::from(verified), mapping_id],
            )
            .await
            .map_err(db_err)?;
        if changed == 0 {
            return Err(PersonaMapError::NotFound(format!("mapping {mapping_id}")));
        }
        Ok(())
    }

    /// Repair duplicate active mappings left by older data.
    ///
    /// For every (page, persona) with several active rows the highest
    /// confidence wins, ties going to the newest `created_at`. The losers are
    /// deactivated, never deleted. Returns how many rows were deactivated.
    pub async fn collapse_duplicate_mappings(&self) -> Result<u64> {
        self.check_writable()?;
        let mut rows = self
            .conn
            .query(
                "SELECT id, page_id, persona_id FROM content_mappings
                 WHERE is_active = 1
                 ORDER BY page_id, persona_id, confidence DESC, created_at DESC",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut seen: HashMap<(String, String), String> = HashMap::new();
        let mut losers = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let id: String = row.get(0).map_err(db_err)?;
            let page_id: String = row.get(1).map_err(db_err)?;
            let persona_id: String = row.get(2).map_err(db_err)?;
            if seen.contains_key(&(page_id.clone(), persona_id.clone())) {
                losers.push(id);
            } else {
                seen.insert((page_id, persona_id), id);
            }
        }

        if losers.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction().await.map_err(db_err)?;
        let mut deactivated = 0;
        for id in &losers {
            match tx
                .execute(
                    "UPDATE content_mappings SET is_active = 0 WHERE id = ?1",
                    params![id.as_str()],
                )
                .await
            {
                Ok(n) => deactivated += n,
                Err(e) => {
                    let _ = tx.rollback().await;
                    return Err(db_err(e));
                }
            }
        }
        tx.commit().await.map_err(db_err)?;

        tracing::info!(deactivated, "collapsed duplicate active mappings");
        Ok(deactivated)
    }
}

async fn write_outcome(
    conn: &Connection,
    record: &PageRecord,
    crawl_timestamp: DateTime<Utc>,
) -> Result<RecordOutcome> {
    let page_id = upsert_page_on(conn, &record.page).await?;

    let mappings_deactivated = conn
        .execute(
            "UPDATE content_mappings SET is_active = 0 WHERE page_id = ?1 AND is_active = 1",
            params![page_id.as_str()],
        )
        .await
        .map_err(db_err)?;

    // One row per persona even if a strategy reported a persona twice.
    let mut best: Vec<&PersonaScore> = Vec::new();
    for score in &record.scores {
        match best.iter_mut().find(|s| s.persona_id == score.persona_id) {
            Some(existing) if existing.confidence < score.confidence => *existing = score,
            Some(_) => {}
            None => best.push(score),
        }
    }

    for score in &best {
        insert_mapping_row(conn, &page_id, score, crawl_timestamp, true).await?;
    }

    let now = crawl_timestamp.to_rfc3339();
    mark_success_on(conn, &record.page.job_id, &record.page.url, &now).await?;

    let mut links_added = 0;
    for link in &record.links {
        if insert_url(conn, &record.page.job_id, link, LINK_PRIORITY, &now).await? {
            links_added += 1;
        }
    }

    Ok(RecordOutcome {
        page_id,
        mappings_created: best.len(),
        mappings_deactivated,
        links_added,
    })
}

pub(crate) async fn insert_mapping_row(
    conn: &Connection,
    page_id: &str,
    score: &PersonaScore,
    crawl_timestamp: DateTime<Utc>,
    active: bool,
) -> Result<String> {
    let id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO content_mappings (id, page_id, persona_id, confidence, reason, method,
             is_verified, is_active, crawl_timestamp, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9)",
        params![
            id.as_str(),
            page_id,
            score.persona_id.as_str(),
            score.confidence.clamp(0.0, 1.0),
            score.reason.as_str(),
            score.method.as_str(),
            i64::from(active),
            crawl_timestamp.to_rfc3339(),
            Utc::now().to_rfc3339(),
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(id)
}

/// Convert a database row to a [`ContentMapping`].
fn row_to_mapping(row: &libsql::Row) -> Result<ContentMapping> {
    let method: String = row.get(5).map_err(db_err)?;
    let crawl_timestamp: String = row.get(8).map_err(db_err)?;
    let created_at: String = row.get(9).map_err(db_err)?;

    Ok(ContentMapping {
        id: row.get::<String>(0).map_err(db_err)?,
        page_id: row.get::<String>(1).map_err(db_err)?,
        persona_id: row.get::<String>(2).map_err(db_err)?,
        confidence: row.get::<f64>(3).map_err(db_err)?,
        reason: row.get::<String>(4).map_err(db_err)?,
        method: method.parse()?,
        is_verified: row.get::<i64>(6).map_err(db_err)? != 0,
        is_active: row.get::<i64>(7).map_err(db_err)? != 0,
        crawl_timestamp: parse_ts(&crawl_timestamp)?,
        created_at: parse_ts(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_storage;
    use personamap_shared::{CrawlJob, JobId, MappingMethod};

    fn page(job_id: &JobId, url: &str, content: &str) -> CrawledPage {
        CrawledPage {
            id: Uuid::now_v7().to_string(),
            job_id: job_id.clone(),
            url: url.into(),
            title: Some("Title".into()),
            meta_description: None,
            content: content.into(),
            word_count: content.split_whitespace().count() as u32,
            status_code: Some(200),
            content_hash: "abc".into(),
            crawled_at: Utc::now(),
            is_processed: true,
            processed_at: Some(Utc::now()),
            processing_error: None,
        }
    }

    fn score(persona: &str, confidence: f64) -> PersonaScore {
        PersonaScore {
            persona_id: persona.into(),
            confidence,
            reason: format!("matched {persona}"),
            method: MappingMethod::Keyword,
        }
    }

    async fn setup() -> (Storage, JobId) {
        let storage = test_storage().await;
        let job = CrawlJob::new("docs", "https://example.com", 10);
        storage.insert_job(&job).await.unwrap();
        (storage, job.id)
    }

    #[tokio::test]
    async fn outcome_marks_crawled_and_enqueues_links() {
        let (storage, job) = setup().await;
        let url = "https://example.com/a";
        storage.enqueue(&job, url, 0).await.unwrap();
        storage.mark_failure(&job, url, "timeout", 3).await.unwrap();

        let outcome = storage
            .record_page_outcome(&PageRecord {
                page: page(&job, url, "alpha beta"),
                scores: vec![score("a", 0.6)],
                links: vec![url.to_string(), "https://example.com/b".into()],
            })
            .await
            .unwrap();

        assert_eq!(outcome.mappings_created, 1);
        assert_eq!(outcome.links_added, 1);

        let entry = storage.get_url(&job, url).await.unwrap().unwrap();
        assert!(entry.is_crawled);
        assert_eq!(entry.failed_attempts, 0);

        let link = storage.get_url(&job, "https://example.com/b").await.unwrap().unwrap();
        assert_eq!(link.priority, LINK_PRIORITY);

        let stored = storage.get_page(&job, url).await.unwrap().unwrap();
        assert_eq!(stored.id, outcome.page_id);
        assert_eq!(stored.word_count, 2);
    }

    #[tokio::test]
    async fn recrawl_supersedes_active_mappings() {
        let (storage, job) = setup().await;
        let url = "https://example.com/a";
        storage.enqueue(&job, url, 0).await.unwrap();

        let first = storage
            .record_page_outcome(&PageRecord {
                page: page(&job, url, "first"),
                scores: vec![score("a", 0.6), score("b", 0.2)],
                links: vec![],
            })
            .await
            .unwrap();

        let second = storage
            .record_page_outcome(&PageRecord {
                page: page(&job, url, "second pass"),
                scores: vec![score("a", 0.7), score("a", 0.4)],
                links: vec![],
            })
            .await
            .unwrap();

        // Page row updated in place
        assert_eq!(first.page_id, second.page_id);
        assert_eq!(second.mappings_deactivated, 2);
        assert_eq!(storage.list_pages(&job).await.unwrap().len(), 1);

        let active = storage.mappings_for_page(&second.page_id, false).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].persona_id, "a");
        assert!((active[0].confidence - 0.7).abs() < 1e-9);

        // History is append-only
        let all = storage.mappings_for_page(&second.page_id, true).await.unwrap();
        assert_eq!(all.len(), 3);

        let history = storage.mapping_history(&second.page_id, "a").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_active);
        assert!(history[1].is_active);
        assert!(history[0].crawl_timestamp <= history[1].crawl_timestamp);
    }

    #[tokio::test]
    async fn history_never_shrinks() {
        let (storage, job) = setup().await;
        let url = "https://example.com/a";
        storage.enqueue(&job, url, 0).await.unwrap();

        let mut previous = 0;
        for pass in 0..3 {
            let scores = if pass == 1 { vec![] } else { vec![score("a", 0.5)] };
            let outcome = storage
                .record_page_outcome(&PageRecord {
                    page: page(&job, url, "content"),
                    scores,
                    links: vec![],
                })
                .await
                .unwrap();
            let total = storage.mappings_for_page(&outcome.page_id, true).await.unwrap().len();
            assert!(total >= previous);
            previous = total;
        }
        assert_eq!(previous, 2);
    }

    #[tokio::test]
    async fn persona_queries_and_verification() {
        let (storage, job) = setup().await;
        for (url, conf) in [("https://example.com/a", 0.4), ("https://example.com/b", 0.9)] {
            storage.enqueue(&job, url, 0).await.unwrap();
            storage
                .record_page_outcome(&PageRecord {
                    page: page(&job, url, "content"),
                    scores: vec![score("a", conf)],
                    links: vec![],
                })
                .await
                .unwrap();
        }

        let mappings = storage.mappings_for_persona("a", false).await.unwrap();
        assert_eq!(mappings.len(), 2);
        assert!(mappings[0].confidence > mappings[1].confidence);

        storage.verify_mapping(&mappings[0].id, true).await.unwrap();
        let mappings = storage.mappings_for_persona("a", false).await.unwrap();
        assert!(mappings[0].is_verified);
        assert!(storage.verify_mapping("missing", true).await.is_err());
    }

    #[tokio::test]
    async fn collapse_keeps_best_active_mapping() {
        let (storage, job) = setup().await;
        let url = "https://example.com/a";
        storage.enqueue(&job, url, 0).await.unwrap();
        let outcome = storage
            .record_page_outcome(&PageRecord {
                page: page(&job, url, "content"),
                scores: vec![score("a", 0.5)],
                links: vec![],
            })
            .await
            .unwrap();

        // Simulate duplicate active rows from older data
        let ts = Utc::now();
        insert_mapping_row(&storage.conn, &outcome.page_id, &score("a", 0.8), ts, true)
            .await
            .unwrap();
        let tie = insert_mapping_row(&storage.conn, &outcome.page_id, &score("a", 0.8), ts, true)
            .await
            .unwrap();
        insert_mapping_row(&storage.conn, &outcome.page_id, &score("b", 0.3), ts, true)
            .await
            .unwrap();

        assert_eq!(storage.collapse_duplicate_mappings().await.unwrap(), 2);

        let active = storage.mappings_for_page(&outcome.page_id, false).await.unwrap();
        assert_eq!(active.len(), 2);
        let a = active.iter().find(|m| m.persona_id == "a").unwrap();
        assert_eq!(a.id, tie);
        assert_eq!(storage.mappings_for_page(&outcome.page_id, true).await.unwrap().len(), 4);

        assert_eq!(storage.collapse_duplicate_mappings().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_job_data_removes_mappings() {
        let (storage, job) = setup().await;
        let url = "https://example.com/a";
        storage.enqueue(&job, url, 0).await.unwrap();
        let outcome = storage
            .record_page_outcome(&PageRecord {
                page: page(&job, url, "content"),
                scores: vec![score("a", 0.5)],
                links: vec![],
            })
            .await
            .unwrap();

        storage.clear_job_data(&job).await.unwrap();
        assert!(storage.list_pages(&job).await.unwrap().is_empty());
        assert!(storage.mappings_for_page(&outcome.page_id, true).await.unwrap().is_empty());
    }
}
