//! CommitGraph ingestion runs
//!
//! Discovers new commits, persists the commit backbone and enriches it with
//! refs, file changes, events, signatures and merge ancestry.

pub mod outcome;
pub mod pipeline;
pub mod service;

pub use outcome::{ItemOutcome, RunSummary, StageStats};
pub use pipeline::{Pipeline, Stage};
pub use service::DefaultIngestService;
