use serde::{Deserialize, Serialize};
use crate::run::{IngestRun, RunCounters, RunStatus};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RunStatusView {
    pub run_id: String,
    pub status: RunStatus,
    pub current_stage: Option<String>,
    pub started_at: String,
    pub last_progress_at: String,
    pub completed_at: Option<String>,
    #[serde(flatten)]
    pub counters: RunCounters,
}

impl From<IngestRun> for RunStatusView {
    fn from(run: IngestRun) -> Self {
        Self {
            run_id: run.run_id,
            status: run.status,
            current_stage: run.current_stage,
            started_at: run.started_at.to_rfc3339(),
            last_progress_at: run.last_progress_at.to_rfc3339(),
            completed_at: run.completed_at.map(|t| t.to_rfc3339()),
            counters: run.counters,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StartRunResponse {
    pub run_id: String,
}
