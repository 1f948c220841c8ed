//! Repair command implementation.

use super::database_exists;
use anyhow::Result;
use colored::Colorize;
use commitgraph_core::{IngestConfig, SqliteGraphStore};

/// Run the duplicate file change repair pass.
pub fn run(config: &IngestConfig) -> Result<()> {
    if !database_exists(config) {
        return Ok(());
    }
    let store = SqliteGraphStore::open(&config.database)?;
    let report = store.repair_file_change_duplicates()?;

    if report.removed == 0 {
        println!("{} No duplicate file changes", "✓".green());
    } else {
        println!(
            "{} Removed {} duplicate rows across {} (commit, path) groups",
            "✓".green(),
            report.removed.to_string().yellow(),
            report.duplicate_groups
        );
    }
    Ok(())
}
