//! Ingest run records.
//!
//! An `IngestRun` is the only durable progress artifact. It is created when a
//! run starts, updated by every stage and never deleted by normal operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a run in the ingestion state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Started,
    /// Backbone persisted. Enrichment substages keep this label while counters advance.
    CommitsComplete,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "STARTED",
            RunStatus::CommitsComplete => "COMMITS_COMPLETE",
            RunStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STARTED" => Some(RunStatus::Started),
            "COMMITS_COMPLETE" => Some(RunStatus::CommitsComplete),
            "COMPLETED" => Some(RunStatus::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

/// Per-category progress counter on a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunCounter {
    Commits,
    Refs,
    FileChanges,
    Events,
    Signatures,
    SignaturesFound,
    Merges,
}

impl RunCounter {
    /// Column backing this counter.
    pub fn column(&self) -> &'static str {
        match self {
            RunCounter::Commits => "commits_processed",
            RunCounter::Refs => "refs_processed",
            RunCounter::FileChanges => "file_changes_processed",
            RunCounter::Events => "events_processed",
            RunCounter::Signatures => "signatures_processed",
            RunCounter::SignaturesFound => "signatures_found",
            RunCounter::Merges => "merges_processed",
        }
    }
}

/// Counters tracked per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub commits_processed: u64,
    pub refs_processed: u64,
    pub file_changes_processed: u64,
    pub events_processed: u64,
    /// Commits and tags probed for a signature.
    pub signatures_processed: u64,
    pub signatures_found: u64,
    pub merges_processed: u64,
}

/// Durable record of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRun {
    pub run_id: String,
    pub status: RunStatus,
    /// Enrichment substage currently running, if any.
    pub current_stage: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_progress_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub counters: RunCounters,
}

impl IngestRun {
    /// A freshly started run with zeroed counters.
    pub fn new(run_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            status: RunStatus::Started,
            current_stage: None,
            started_at: now,
            last_progress_at: now,
            completed_at: None,
            counters: RunCounters::default(),
        }
    }
}
