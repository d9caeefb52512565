//! Error types for PersonaMap.
//!
//! Library crates use [`PersonaMapError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all PersonaMap operations.
#[derive(Debug, thiserror::Error)]
pub enum PersonaMapError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during fetch, discovery, or AI calls.
    #[error("network error: {0}")]
    Network(String),

    /// HTML, XML, or model-response parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Relevance classification error (backend failure, bad response).
    #[error("classification error: {0}")]
    Classification(String),

    /// AI spend would exceed the configured daily or monthly limit.
    #[error("cost limit reached: {0}")]
    CostLimit(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad pattern, invalid URL, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A job, page, persona, or mapping was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested state transition is not allowed right now.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PersonaMapError>;

impl PersonaMapError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came from the AI layer and should trigger keyword fallback.
    pub fn is_ai_failure(&self) -> bool {
        matches!(
            self,
            Self::Classification(_) | Self::CostLimit(_) | Self::Network(_) | Self::Parse { .. }
        )
    }
}
