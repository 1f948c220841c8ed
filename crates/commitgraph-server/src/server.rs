use axum::{
    routing::{get, post},
    Router, Extension,
};
use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::Result;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use crate::handlers::{get_run, health, list_runs, start_run, AppState, SharedState};
use commitgraph_core::service::IngestService;
use commitgraph_core::{IngestConfig, SqliteGraphStore};
use commitgraph_ingest::DefaultIngestService;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/runs", post(start_run).get(list_runs))
        .route("/api/v1/runs/:run_id", get(get_run))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}

pub async fn start(config: IngestConfig, port: u16) -> Result<()> {
    config.validate()?;

    let store = SqliteGraphStore::connect(&config.database, &config.store)
        .await?
        .with_batch_size(config.batch_size);
    let store = Arc::new(store);
    let service = Arc::new(DefaultIngestService::new(store, Arc::new(config))) as Arc<dyn IngestService>;

    let app = router(Arc::new(AppState { service }));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!(%addr, "CommitGraph server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
