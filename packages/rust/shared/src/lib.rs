//! Shared types, error model, configuration, and URL scope rules for PersonaMap.
//!
//! This crate is the foundation depended on by all other PersonaMap crates.
//! It provides:
//! - [`PersonaMapError`], the unified error type
//! - Domain types ([`CrawlJob`], [`DiscoveredUrl`], [`CrawledPage`], [`ContentMapping`], ...)
//! - Configuration ([`AppConfig`], [`FetchConfig`], config loading)
//! - URL admission rules ([`CrawlScope`], [`UrlRules`])

pub mod config;
pub mod error;
pub mod scope;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AiConfig, AppConfig, ClassificationMode, CrawlerConfig, FetchConfig, StorageConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_api_key,
    validate_config,
};
pub use error::{PersonaMapError, Result};
pub use scope::{CrawlScope, Rejection, UrlRules, is_html_content_url, normalize_url, same_site};
pub use types::{
    ConfidenceLevel, ContentMapping, CrawlJob, CrawlMode, CrawledPage, DiscoveredUrl,
    FrontierCounts, JobId, JobStatus, LINK_PRIORITY, MAX_FAILED_ATTEMPTS, MappingMethod,
    PersonaDefinition, PersonaScore, ProgressSnapshot, SITEMAP_PRIORITY,
};
