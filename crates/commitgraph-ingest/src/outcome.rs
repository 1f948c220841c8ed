//! Per-item outcomes and stage statistics.

use serde::Serialize;

/// Result of processing one commit, tag or merge inside a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Success,
    /// Nothing to record for this item (unsigned, no changes, empty ancestry).
    Skipped,
    /// Extraction failed; the item is treated as having nothing to record.
    Failed(String),
}

/// Outcome counts for one stage of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageStats {
    pub stage: String,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// First few failures as `key: reason`.
    pub samples: Vec<String>,
}

impl StageStats {
    /// Failure samples kept per stage.
    pub const MAX_SAMPLES: usize = 5;

    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, key: &str, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Success => self.succeeded += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Failed(reason) => {
                self.failed += 1;
                if self.samples.len() < Self::MAX_SAMPLES {
                    self.samples.push(format!("{}: {}", key, reason));
                }
            }
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }
}

/// What a run did, stage by stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub commits_discovered: usize,
    pub stages: Vec<StageStats>,
}

impl RunSummary {
    pub fn stage(&self, name: &str) -> Option<&StageStats> {
        self.stages.iter().find(|s| s.stage == name)
    }
}
