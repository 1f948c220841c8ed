//! Ingest command implementation.

use anyhow::Result;
use colored::Colorize;
use commitgraph_core::{GraphStore, IngestConfig, RunStore, SqliteGraphStore};
use commitgraph_git::GitRepository;
use commitgraph_ingest::Pipeline;
use std::sync::Arc;
use uuid::Uuid;

/// Run the ingest command.
pub async fn run(config: IngestConfig) -> Result<()> {
    config.validate()?;
    println!("{} Ingesting {}", "→".blue(), config.repo_path.display());

    let repo = GitRepository::open(&config.repo_path)?;
    let store = SqliteGraphStore::connect(&config.database, &config.store)
        .await?
        .with_batch_size(config.batch_size);
    let store = Arc::new(store);
    let config = Arc::new(config);

    let run_id = Uuid::new_v4().to_string();
    let pipeline = Pipeline::new(repo, store.clone(), store.clone(), config.clone());
    let summary = pipeline.run(&run_id).await?;

    println!();
    println!("{} Run {} complete", "✓".green(), run_id.cyan());
    println!("  New commits: {}", summary.commits_discovered.to_string().green());
    for stage in &summary.stages {
        let failed = if stage.failed > 0 {
            stage.failed.to_string().red()
        } else {
            stage.failed.to_string().normal()
        };
        println!(
            "  {:<18} {} ok, {} skipped, {} failed",
            stage.stage, stage.succeeded, stage.skipped, failed
        );
        for sample in &stage.samples {
            println!("    {} {}", "⚠".yellow(), sample);
        }
    }

    let counts = store.node_counts().await?;
    let run = store.get_run(&run_id).await?;
    println!();
    println!("  Commits: {}", counts.commits);
    println!("  Identities: {}", counts.identities);
    println!("  Refs: {} ({} snapshots)", counts.refs, counts.ref_states);
    println!("  Tags: {}", counts.tag_objects);
    println!("  File changes: {}", counts.file_changes);
    println!("  PGP keys: {}", counts.pgp_keys);
    if let Some(run) = run {
        println!(
            "  Signatures found: {} of {} probed",
            run.counters.signatures_found, run.counters.signatures_processed
        );
    }
    println!("  Database: {}", config.database.display());

    Ok(())
}
