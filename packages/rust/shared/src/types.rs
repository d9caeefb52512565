//! Core domain types for PersonaMap crawl jobs, pages, personas, and mappings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PersonaMapError;

/// Failed attempts after which a frontier entry is permanently failed.
pub const MAX_FAILED_ATTEMPTS: u32 = 3;

/// Frontier priority for URLs seeded from sitemaps.
pub const SITEMAP_PRIORITY: i64 = 0;

/// Frontier priority for URLs found by following page links.
pub const LINK_PRIORITY: i64 = 1;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for crawl job identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Job enums
// ---------------------------------------------------------------------------

/// How a run treats URLs that were crawled before.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    /// Skip already-crawled URLs.
    #[default]
    Incremental,
    /// Reset every frontier entry and refetch everything.
    Overwrite,
}

impl CrawlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Overwrite => "overwrite",
        }
    }
}

impl std::str::FromStr for CrawlMode {
    type Err = PersonaMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incremental" => Ok(Self::Incremental),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(PersonaMapError::validation(format!(
                "unknown crawl mode '{other}' (expected incremental or overwrite)"
            ))),
        }
    }
}

/// Job lifecycle status.
///
/// `inactive → running → {completed, failed}`, `running → inactive` on a
/// manual stop, and `completed`/`failed` may be restarted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Inactive,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = PersonaMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(Self::Inactive),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(PersonaMapError::validation(format!(
                "unknown job status '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// CrawlJob
// ---------------------------------------------------------------------------

/// A configured crawl of one site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    pub id: JobId,
    /// Human-readable name.
    pub name: String,
    /// Site root; discovery and same-domain filtering are relative to it.
    pub base_url: String,
    /// Wildcard patterns a URL must match (any); empty admits everything.
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Wildcard patterns that reject a URL.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Maximum URLs processed per run.
    pub max_pages: u32,
    pub crawl_mode: CrawlMode,
    /// Opaque schedule expression, stored for external schedulers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    pub status: JobStatus,
    pub pages_crawled: u32,
    pub pages_mapped: u32,
    pub total_discovered_urls: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CrawlJob {
    /// Build a new inactive job with zeroed counters.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, max_pages: u32) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            base_url: base_url.into(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            max_pages,
            crawl_mode: CrawlMode::default(),
            schedule: None,
            status: JobStatus::Inactive,
            pages_crawled: 0,
            pages_mapped: 0,
            total_discovered_urls: 0,
            last_activity_at: None,
            last_run_at: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    /// Percentage of the page budget processed, capped at 100.
    pub fn progress_percentage(&self) -> f64 {
        let denominator = self.total_discovered_urls.min(self.max_pages);
        if denominator == 0 {
            return 0.0;
        }
        (f64::from(self.pages_crawled) / f64::from(denominator) * 100.0).min(100.0)
    }
}

/// Point-in-time progress for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub pages_crawled: u32,
    pub pages_mapped: u32,
    pub total_discovered_urls: u32,
    pub progress_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&CrawlJob> for ProgressSnapshot {
    fn from(job: &CrawlJob) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            pages_crawled: job.pages_crawled,
            pages_mapped: job.pages_mapped,
            total_discovered_urls: job.total_discovered_urls,
            progress_percentage: job.progress_percentage(),
            last_activity_at: job.last_activity_at,
            error_message: job.error_message.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Frontier
// ---------------------------------------------------------------------------

/// A URL known to a job, tracked through discovery → crawl → success/failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredUrl {
    pub job_id: JobId,
    pub url: String,
    /// Lower is claimed first.
    pub priority: i64,
    pub discovered_at: DateTime<Utc>,
    pub is_crawled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crawled_at: Option<DateTime<Utc>>,
    pub failed_attempts: u32,
    /// Set once `failed_attempts` reaches [`MAX_FAILED_ATTEMPTS`].
    pub is_failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Frontier totals for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierCounts {
    pub total: u32,
    pub crawled: u32,
    pub pending: u32,
    pub failed: u32,
}

// ---------------------------------------------------------------------------
// CrawledPage
// ---------------------------------------------------------------------------

/// Extracted content of one fetched URL, unique per (job, url).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledPage {
    /// Unique page identifier (UUID v7).
    pub id: String,
    pub job_id: JobId,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_description: Option<String>,
    /// Whitespace-collapsed main text.
    pub content: String,
    pub word_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// SHA-256 of the fetched body.
    pub content_hash: String,
    pub crawled_at: DateTime<Utc>,
    pub is_processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Personas
// ---------------------------------------------------------------------------

/// A named interest profile; the classification target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaDefinition {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Keywords or multi-word phrases.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl PersonaDefinition {
    /// Text representation used for embeddings and prompts.
    pub fn profile_text(&self) -> String {
        format!(
            "{}: {}. Keywords: {}",
            self.title,
            self.description,
            self.keywords.join(", ")
        )
    }
}

// ---------------------------------------------------------------------------
// Mappings
// ---------------------------------------------------------------------------

/// Which strategy produced a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMethod {
    Keyword,
    /// Embedding similarity.
    AiLocal,
    /// LLM judge.
    AiJudge,
    /// Hybrid merge where the AI score was present.
    AiHybrid,
    /// Hybrid merge with only a keyword score.
    KeywordHybrid,
    AiValidation,
}

impl MappingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::AiLocal => "ai_local",
            Self::AiJudge => "ai_judge",
            Self::AiHybrid => "ai_hybrid",
            Self::KeywordHybrid => "keyword_hybrid",
            Self::AiValidation => "ai_validation",
        }
    }
}

impl std::fmt::Display for MappingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MappingMethod {
    type Err = PersonaMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyword" => Ok(Self::Keyword),
            "ai_local" => Ok(Self::AiLocal),
            "ai_judge" => Ok(Self::AiJudge),
            "ai_hybrid" => Ok(Self::AiHybrid),
            "keyword_hybrid" => Ok(Self::KeywordHybrid),
            "ai_validation" => Ok(Self::AiValidation),
            other => Err(PersonaMapError::validation(format!(
                "unknown mapping method '{other}'"
            ))),
        }
    }
}

/// One persona's score for a page, as produced by a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaScore {
    pub persona_id: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub reason: String,
    pub method: MappingMethod,
}

/// Bucketed confidence for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceLevel {
    VeryHigh,
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceLevel {
    pub fn from_score(confidence: f64) -> Self {
        match confidence {
            c if c >= 0.9 => Self::VeryHigh,
            c if c >= 0.7 => Self::High,
            c if c >= 0.5 => Self::Medium,
            c if c >= 0.3 => Self::Low,
            _ => Self::VeryLow,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::VeryHigh => "Very High",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::VeryLow => "Very Low",
        }
    }
}

/// A scored, versioned association between one page and one persona.
///
/// Rows are append-only: each crawl pass inserts new rows and deactivates the
/// previous ones, so at most one row per (page, persona) is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentMapping {
    pub id: String,
    pub page_id: String,
    pub persona_id: String,
    pub confidence: f64,
    pub reason: String,
    pub method: MappingMethod,
    /// Operator-confirmed.
    pub is_verified: bool,
    pub is_active: bool,
    /// Shared by every mapping written in the same crawl pass.
    pub crawl_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ContentMapping {
    pub fn confidence_level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_score(self.confidence)
    }
}
