use clap::Parser;
use std::path::PathBuf;
use anyhow::Result;
use commitgraph_core::IngestConfig;

#[derive(Parser)]
#[command(name = "commitgraph-server")]
#[command(author, version, about = "CommitGraph HTTP API Server", long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path (overrides the config file)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Repository to ingest (overrides the config file)
    #[arg(short, long)]
    repo: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Verbose output
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "commitgraph_server=debug,commitgraph=debug,tower_http=debug"
    } else {
        "commitgraph_server=info,commitgraph=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => IngestConfig::load(path)?,
        None => IngestConfig::default(),
    };
    if let Some(database) = cli.database {
        config.database = database;
    }
    if let Some(repo) = cli.repo {
        config.repo_path = repo;
    }

    commitgraph_server::start(config, cli.port).await?;

    Ok(())
}
