pub mod models;

use async_trait::async_trait;
pub use models::*;

/// Entry point used by every outer surface (HTTP, CLI) to drive ingestion.
#[async_trait]
pub trait IngestService: Send + Sync {
    /// Create a run record and start ingestion in the background. Returns the run id.
    async fn start_run(&self) -> anyhow::Result<String>;

    /// Read a run's record from the store.
    async fn get_run_status(&self, run_id: &str) -> anyhow::Result<Option<RunStatusView>>;

    /// Persisted records of runs started by this process that are still executing.
    async fn list_active_runs(&self) -> anyhow::Result<Vec<RunStatusView>>;

    /// Most recently started runs recorded in the store.
    async fn recent_runs(&self, limit: usize) -> anyhow::Result<Vec<RunStatusView>>;
}
