//! Job orchestration for PersonaMap.
//!
//! This crate ties discovery, fetching, extraction, classification, and
//! storage together into job runs, and supervises those runs so that each
//! job has at most one active run.

pub mod orchestrator;
pub mod progress;
mod run;

pub use orchestrator::{JobRegistry, Orchestrator};
pub use progress::{ProgressReporter, SilentProgress, UrlOutcome};
pub use run::RunSummary;
