use std::sync::Arc;
use axum::{
    extract::{Path, Query},
    http::StatusCode,
    Extension, Json,
};
use tracing::error;
use commitgraph_core::service::{IngestService, RunStatusView, StartRunResponse};
use crate::models::{HealthResponse, RunsQuery, RunsResponse, DEFAULT_RUN_LIMIT};

pub struct AppState {
    pub service: Arc<dyn IngestService>,
}

pub type SharedState = Arc<AppState>;

type ApiError = (StatusCode, String);

/// Log the failure and hand the caller a generic message.
fn internal(context: &str, e: anyhow::Error) -> ApiError {
    error!(error = %e, "{}", context);
    (StatusCode::INTERNAL_SERVER_ERROR, context.to_string())
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn start_run(
    Extension(state): Extension<SharedState>,
) -> Result<(StatusCode, Json<StartRunResponse>), ApiError> {
    let run_id = state.service.start_run().await
        .map_err(|e| internal("Failed to start ingest run", e))?;

    Ok((StatusCode::ACCEPTED, Json(StartRunResponse { run_id })))
}

pub async fn get_run(
    Extension(state): Extension<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatusView>, ApiError> {
    let run = state.service.get_run_status(&run_id).await
        .map_err(|e| internal("Failed to read run status", e))?;

    run.map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Run not found: {}", run_id)))
}

pub async fn list_runs(
    Extension(state): Extension<SharedState>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<RunsResponse>, ApiError> {
    let result = if query.active.unwrap_or(false) {
        state.service.list_active_runs().await
    } else {
        state.service.recent_runs(query.limit.unwrap_or(DEFAULT_RUN_LIMIT)).await
    };
    let runs = result.map_err(|e| internal("Failed to list runs", e))?;

    Ok(Json(RunsResponse { runs }))
}
