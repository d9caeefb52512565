//! SQL migration definitions for the PersonaMap database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: crawl_jobs, discovered_urls, crawled_pages, personas, content_mappings",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Crawl job configuration, status, and progress
CREATE TABLE IF NOT EXISTS crawl_jobs (
    id                    TEXT PRIMARY KEY,
    name                  TEXT NOT NULL,
    base_url              TEXT NOT NULL,
    include_patterns      TEXT NOT NULL DEFAULT '[]',
    exclude_patterns      TEXT NOT NULL DEFAULT '[]',
    max_pages             INTEGER NOT NULL DEFAULT 100,
    crawl_mode            TEXT NOT NULL DEFAULT 'incremental',
    schedule              TEXT,
    status                TEXT NOT NULL DEFAULT 'inactive',
    pages_crawled         INTEGER NOT NULL DEFAULT 0,
    pages_mapped          INTEGER NOT NULL DEFAULT 0,
    total_discovered_urls INTEGER NOT NULL DEFAULT 0,
    last_activity_at      TEXT,
    last_run_at           TEXT,
    error_message         TEXT,
    created_at            TEXT NOT NULL
);

-- URL frontier
CREATE TABLE IF NOT EXISTS discovered_urls (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id          TEXT NOT NULL REFERENCES crawl_jobs(id) ON DELETE CASCADE,
    url             TEXT NOT NULL,
    priority        INTEGER NOT NULL DEFAULT 0,
    discovered_at   TEXT NOT NULL,
    is_crawled      INTEGER NOT NULL DEFAULT 0,
    crawled_at      TEXT,
    failed_attempts INTEGER NOT NULL DEFAULT 0,
    is_failed       INTEGER NOT NULL DEFAULT 0,
    last_error      TEXT,
    UNIQUE(job_id, url)
);

CREATE INDEX IF NOT EXISTS idx_discovered_urls_claim
    ON discovered_urls(job_id, is_crawled, is_failed, priority, discovered_at);

-- Extracted page content, one row per (job, url)
CREATE TABLE IF NOT EXISTS crawled_pages (
    id               TEXT PRIMARY KEY,
    job_id           TEXT NOT NULL REFERENCES crawl_jobs(id) ON DELETE CASCADE,
    url              TEXT NOT NULL,
    title            TEXT,
    meta_description TEXT,
    content          TEXT NOT NULL,
    word_count       INTEGER NOT NULL DEFAULT 0,
    status_code      INTEGER,
    content_hash     TEXT NOT NULL,
    crawled_at       TEXT NOT NULL,
    is_processed     INTEGER NOT NULL DEFAULT 0,
    processed_at     TEXT,
    processing_error TEXT,
    UNIQUE(job_id, url)
);

CREATE INDEX IF NOT EXISTS idx_crawled_pages_job ON crawled_pages(job_id);
CREATE INDEX IF NOT EXISTS idx_crawled_pages_hash ON crawled_pages(content_hash);

-- Persona definitions synced from the operator's persona file
CREATE TABLE IF NOT EXISTS personas (
    id            TEXT PRIMARY KEY,
    title         TEXT NOT NULL,
    description   TEXT NOT NULL DEFAULT '',
    keywords_json TEXT NOT NULL DEFAULT '[]',
    is_active     INTEGER NOT NULL DEFAULT 1,
    updated_at    TEXT NOT NULL
);

-- Personas assigned to a job; no rows means every active persona
CREATE TABLE IF NOT EXISTS job_personas (
    job_id     TEXT NOT NULL REFERENCES crawl_jobs(id) ON DELETE CASCADE,
    persona_id TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    PRIMARY KEY (job_id, persona_id)
);

-- Append-only mapping history; is_active marks the current row
CREATE TABLE IF NOT EXISTS content_mappings (
    id              TEXT PRIMARY KEY,
    page_id         TEXT NOT NULL REFERENCES crawled_pages(id) ON DELETE CASCADE,
    persona_id      TEXT NOT NULL,
    confidence      REAL NOT NULL,
    reason          TEXT NOT NULL DEFAULT '',
    method          TEXT NOT NULL,
    is_verified     INTEGER NOT NULL DEFAULT 0,
    is_active       INTEGER NOT NULL DEFAULT 1,
    crawl_timestamp TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_mappings_page
    ON content_mappings(page_id, persona_id, crawl_timestamp);
CREATE INDEX IF NOT EXISTS idx_mappings_persona
    ON content_mappings(persona_id, is_active);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
