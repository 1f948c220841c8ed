use serde::{Deserialize, Serialize};
use commitgraph_core::service::RunStatusView;

pub const DEFAULT_RUN_LIMIT: usize = 20;

#[derive(Debug, Default, Deserialize)]
pub struct RunsQuery {
    /// Only runs still executing in this process
    pub active: Option<bool>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunsResponse {
    pub runs: Vec<RunStatusView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
