use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use commitgraph_core::service::{IngestService, RunStatusView};
use commitgraph_core::{IngestConfig, RunStore, SqliteGraphStore};
use commitgraph_git::GitRepository;

use crate::pipeline::Pipeline;

/// Starts runs in the background and answers status queries from the store.
pub struct DefaultIngestService {
    store: Arc<SqliteGraphStore>,
    config: Arc<IngestConfig>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl DefaultIngestService {
    pub fn new(store: Arc<SqliteGraphStore>, config: Arc<IngestConfig>) -> Self {
        Self {
            store,
            config,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn pipeline(&self) -> Result<Pipeline> {
        let repo = GitRepository::open(&self.config.repo_path)?;
        Ok(Pipeline::new(
            repo,
            self.store.clone(),
            self.store.clone(),
            self.config.clone(),
        ))
    }

    /// Lock the registry with finished handles already dropped.
    fn live_tasks(&self) -> Result<MutexGuard<'_, HashMap<String, JoinHandle<()>>>> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| anyhow!("run registry poisoned"))?;
        tasks.retain(|_, handle| !handle.is_finished());
        Ok(tasks)
    }

    /// Ids of runs whose task is still executing.
    fn active_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.live_tasks()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Number of registered runs still executing.
    pub fn active_count(&self) -> Result<usize> {
        Ok(self.live_tasks()?.len())
    }
}

#[async_trait]
impl IngestService for DefaultIngestService {
    async fn start_run(&self) -> Result<String> {
        let run_id = Uuid::new_v4().to_string();
        let pipeline = self.pipeline()?;

        // The run record exists before the caller gets the id back.
        pipeline.begin_run(&run_id).await?;

        let task_id = run_id.clone();
        let handle = tokio::spawn(async move {
            match pipeline.execute(&task_id).await {
                Ok(summary) => info!(
                    run_id = %task_id,
                    commits = summary.commits_discovered,
                    "Background run finished"
                ),
                Err(e) => error!(run_id = %task_id, error = %e, "Background run failed"),
            }
        });

        self.live_tasks()?.insert(run_id.clone(), handle);
        Ok(run_id)
    }

    async fn get_run_status(&self, run_id: &str) -> Result<Option<RunStatusView>> {
        let run = self.store.get_run(run_id).await?;
        Ok(run.map(RunStatusView::from))
    }

    async fn list_active_runs(&self) -> Result<Vec<RunStatusView>> {
        let mut views = Vec::new();
        for run_id in self.active_ids()? {
            if let Some(run) = self.store.get_run(&run_id).await? {
                views.push(RunStatusView::from(run));
            }
        }
        Ok(views)
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunStatusView>> {
        let runs = self
            .store
            .list_runs(limit)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(runs.into_iter().map(RunStatusView::from).collect())
    }
}
