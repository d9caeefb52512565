//! Page fetching and content extraction.
//!
//! This crate provides:
//! - [`fetcher`] — HTTP fetching with retries, backoff, and robots.txt checks
//! - [`extract`] — Main-text, metadata, and link extraction from HTML

pub mod extract;
pub mod fetcher;

pub use extract::{ExtractedPage, Heading, collapse_whitespace, extract};
pub use fetcher::{FetchOutcome, FetchedResponse, Fetcher, compute_hash};
