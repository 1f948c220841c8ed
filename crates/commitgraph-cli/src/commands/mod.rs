//! Subcommand implementations.

pub mod ingest;
pub mod relevant;
pub mod repair;
pub mod runs;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use commitgraph_core::IngestConfig;
use std::path::PathBuf;

/// Where configuration comes from.
#[derive(Args)]
pub struct ConfigArgs {
    /// TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database path (overrides the config file)
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn load(&self) -> Result<IngestConfig> {
        let mut config = match &self.config {
            Some(path) => IngestConfig::load(path)?,
            None => IngestConfig::default(),
        };
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        Ok(config)
    }
}

/// Report a missing database. Returns false when the command should stop.
pub fn database_exists(config: &IngestConfig) -> bool {
    if config.database.exists() {
        return true;
    }
    eprintln!(
        "{} Database not found: {}",
        "✗".red(),
        config.database.display()
    );
    eprintln!("Run 'commitgraph ingest' first to create it.");
    false
}
