//! CommitGraph CLI
//!
//! Command-line interface for ingesting git history into the commit graph.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::ConfigArgs;

#[derive(Parser)]
#[command(name = "commitgraph")]
#[command(author, version, about = "Mine git history into a commit fact graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    config: ConfigArgs,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full ingestion in the foreground
    Ingest {
        /// Repository to ingest (overrides the config file)
        #[arg(short, long)]
        repo: Option<PathBuf>,

        /// Bound for the full-log fallback scan
        #[arg(long)]
        commit_limit: Option<usize>,

        /// Rows per write transaction
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Show one run's status and counters
    Status {
        /// Run id
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Remove duplicate file changes left by older schemas
    Repair,

    /// Count commits and authors that changed a path
    Relevant {
        /// File or directory path inside the repository
        path: String,

        /// Repository (overrides the config file)
        #[arg(short, long)]
        repo: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "commitgraph=debug"
    } else {
        "commitgraph=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = cli.config.load()?;

    match cli.command {
        Commands::Ingest {
            repo,
            commit_limit,
            batch_size,
        } => {
            if let Some(repo) = repo {
                config.repo_path = repo;
            }
            if commit_limit.is_some() {
                config.commit_limit = commit_limit;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            commands::ingest::run(config).await?;
        }
        Commands::Status { run_id } => {
            commands::runs::status(&config, &run_id).await?;
        }
        Commands::Runs { limit } => {
            commands::runs::list(&config, limit).await?;
        }
        Commands::Repair => {
            commands::repair::run(&config)?;
        }
        Commands::Relevant { path, repo } => {
            if let Some(repo) = repo {
                config.repo_path = repo;
            }
            commands::relevant::run(&config, &path)?;
        }
    }

    Ok(())
}
