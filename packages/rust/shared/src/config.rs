//! Application configuration for PersonaMap.
//!
//! User config lives at `~/.personamap/personamap.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PersonaMapError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "personamap.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".personamap";

// ---------------------------------------------------------------------------
// Config structs (matching personamap.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP fetching behaviour.
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Relevance classification and AI backend settings.
    #[serde(default)]
    pub ai: AiConfig,

    /// Database location.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[crawler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Fixed delay between successive requests of one job.
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,

    /// Per-attempt request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Attempts per fetch before the URL is reported as failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff base; attempt `n` waits `retry_backoff_ms * 2^n`.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Whether to respect robots.txt.
    #[serde(default)]
    pub respect_robots_txt: bool,

    /// Page budget for jobs created without an explicit limit.
    #[serde(default = "default_max_pages")]
    pub default_max_pages: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_delay_ms: default_request_delay(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
            respect_robots_txt: false,
            default_max_pages: default_max_pages(),
        }
    }
}

fn default_user_agent() -> String {
    concat!("PersonaMap/", env!("CARGO_PKG_VERSION")).into()
}
fn default_request_delay() -> u64 {
    1000
}
fn default_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff() -> u64 {
    1000
}
fn default_max_pages() -> u32 {
    100
}

/// Which classification strategy a job runs with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationMode {
    /// Keyword matching only.
    #[default]
    Keyword,
    /// Embedding cosine similarity.
    Embedding,
    /// LLM judge scoring every persona at once.
    Judge,
    /// AI score blended with keyword score.
    Hybrid,
    /// Keyword mappings re-scored by the LLM judge.
    Validation,
}

impl std::fmt::Display for ClassificationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Keyword => "keyword",
            Self::Embedding => "embedding",
            Self::Judge => "judge",
            Self::Hybrid => "hybrid",
            Self::Validation => "validation",
        };
        f.write_str(s)
    }
}

/// `[ai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Master switch. When off every job classifies with keywords.
    #[serde(default)]
    pub enabled: bool,

    /// Strategy used when `enabled` is true.
    #[serde(default)]
    pub mode: ClassificationMode,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Chat model used by the judge and validation strategies.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Embedding model used by the embedding strategy.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Minimum keyword confidence for a mapping.
    #[serde(default = "default_keyword_threshold")]
    pub keyword_threshold: f64,

    /// Minimum cosine similarity for a mapping.
    #[serde(default = "default_embedding_threshold")]
    pub embedding_threshold: f64,

    /// Minimum judge confidence for a mapping.
    #[serde(default = "default_judge_threshold")]
    pub judge_threshold: f64,

    /// Characters of page content sent to the model.
    #[serde(default = "default_chunk_size")]
    pub content_chunk_size: usize,

    /// Approximate USD cost per 1000 tokens.
    #[serde(default = "default_cost_per_1k")]
    pub cost_per_1k_tokens: f64,

    #[serde(default = "default_daily_limit")]
    pub daily_cost_limit: f64,

    #[serde(default = "default_monthly_limit")]
    pub monthly_cost_limit: f64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: ClassificationMode::default(),
            api_key_env: default_api_key_env(),
            api_base_url: default_api_base_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            keyword_threshold: default_keyword_threshold(),
            embedding_threshold: default_embedding_threshold(),
            judge_threshold: default_judge_threshold(),
            content_chunk_size: default_chunk_size(),
            cost_per_1k_tokens: default_cost_per_1k(),
            daily_cost_limit: default_daily_limit(),
            monthly_cost_limit: default_monthly_limit(),
        }
    }
}

impl AiConfig {
    /// The mode a job actually runs with: AI modes need `enabled` and an API key.
    pub fn effective_mode(&self) -> ClassificationMode {
        if !self.enabled || self.mode == ClassificationMode::Keyword {
            return ClassificationMode::Keyword;
        }
        if self.api_key().is_none() {
            tracing::warn!(
                env = %self.api_key_env,
                "AI classification enabled but API key is missing, using keyword mode"
            );
            return ClassificationMode::Keyword;
        }
        self.mode
    }

    /// Read the API key from the configured env var.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|v| !v.is_empty())
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_api_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_chat_model() -> String {
    "gpt-3.5-turbo".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.3
}
fn default_keyword_threshold() -> f64 {
    0.1
}
fn default_embedding_threshold() -> f64 {
    0.5
}
fn default_judge_threshold() -> f64 {
    0.3
}
fn default_chunk_size() -> usize {
    2000
}
fn default_cost_per_1k() -> f64 {
    0.002
}
fn default_daily_limit() -> f64 {
    10.0
}
fn default_monthly_limit() -> f64 {
    100.0
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file path. `~` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.personamap/personamap.db".into()
}

impl StorageConfig {
    /// Resolve `database_path`, expanding a leading `~/`.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match self.database_path.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir()
                    .ok_or_else(|| PersonaMapError::config("could not determine home directory"))?;
                Ok(home.join(rest))
            }
            None => Ok(PathBuf::from(&self.database_path)),
        }
    }
}

// ---------------------------------------------------------------------------
// Fetch config (runtime, derived from [crawler])
// ---------------------------------------------------------------------------

/// Runtime fetch configuration handed to the crawler.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    /// Per-attempt timeout in seconds.
    pub timeout_secs: u64,
    /// Attempts per URL.
    pub max_retries: u32,
    /// Base backoff in ms.
    pub retry_backoff_ms: u64,
    /// Delay between requests in ms.
    pub request_delay_ms: u64,
    /// Whether to respect robots.txt.
    pub respect_robots_txt: bool,
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.crawler.user_agent.clone(),
            timeout_secs: config.crawler.timeout_secs,
            max_retries: config.crawler.max_retries,
            retry_backoff_ms: config.crawler.retry_backoff_ms,
            request_delay_ms: config.crawler.request_delay_ms,
            respect_robots_txt: config.crawler.respect_robots_txt,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.personamap/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| PersonaMapError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.personamap/personamap.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PersonaMapError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        PersonaMapError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PersonaMapError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PersonaMapError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PersonaMapError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject values that would make a run misbehave.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    for (name, value) in [
        ("keyword_threshold", config.ai.keyword_threshold),
        ("embedding_threshold", config.ai.embedding_threshold),
        ("judge_threshold", config.ai.judge_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(PersonaMapError::config(format!(
                "ai.{name} must be within 0.0..=1.0, got {value}"
            )));
        }
    }
    if config.crawler.max_retries == 0 {
        return Err(PersonaMapError::config("crawler.max_retries must be at least 1"));
    }
    if config.ai.content_chunk_size == 0 {
        return Err(PersonaMapError::config("ai.content_chunk_size must be positive"));
    }
    Ok(())
}

/// Check that the AI API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.ai.api_key_env;
    match config.ai.api_key() {
        Some(_) => Ok(()),
        None => Err(PersonaMapError::config(format!(
            "AI API key not found. Set the {var_name} environment variable."
        ))),
    }
}
