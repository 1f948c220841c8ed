//! Run inspection commands.

use super::database_exists;
use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use commitgraph_core::{IngestConfig, IngestRun, RunStatus, RunStore, SqliteGraphStore};

fn status_label(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Completed => status.as_str().green(),
        RunStatus::CommitsComplete => status.as_str().yellow(),
        RunStatus::Started => status.as_str().blue(),
    }
}

fn short_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Show one run.
pub async fn status(config: &IngestConfig, run_id: &str) -> Result<()> {
    if !database_exists(config) {
        return Ok(());
    }
    let store = SqliteGraphStore::open(&config.database)?;

    let Some(run) = store.get_run(run_id).await? else {
        eprintln!("{} Run not found: {}", "✗".red(), run_id);
        return Ok(());
    };
    print_run(&run);
    Ok(())
}

/// List recent runs, newest first.
pub async fn list(config: &IngestConfig, limit: usize) -> Result<()> {
    if !database_exists(config) {
        return Ok(());
    }
    let store = SqliteGraphStore::open(&config.database)?;
    let runs = store.list_runs(limit).await?;

    if runs.is_empty() {
        println!("{} No runs recorded", "⚠".yellow());
        return Ok(());
    }

    for run in &runs {
        println!(
            "{}  {}  {:<16}  {} commits",
            short_time(&run.started_at),
            run.run_id.cyan(),
            status_label(run.status),
            run.counters.commits_processed
        );
    }
    Ok(())
}

fn print_run(run: &IngestRun) {
    println!("{} Run {}", "→".blue(), run.run_id.cyan());
    println!("  Status: {}", status_label(run.status));
    if let Some(stage) = &run.current_stage {
        println!("  Stage: {}", stage);
    }
    println!("  Started: {}", short_time(&run.started_at));
    println!("  Last progress: {}", short_time(&run.last_progress_at));
    if let Some(completed) = &run.completed_at {
        println!("  Completed: {}", short_time(completed));
    }

    let c = &run.counters;
    println!();
    println!("  Commits: {}", c.commits_processed);
    println!("  Refs: {}", c.refs_processed);
    println!("  File changes: {}", c.file_changes_processed);
    println!("  Events: {}", c.events_processed);
    println!(
        "  Signatures: {} found / {} probed",
        c.signatures_found, c.signatures_processed
    );
    println!("  Merges: {}", c.merges_processed);
}
