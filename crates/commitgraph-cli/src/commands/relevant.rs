//! Relevant command implementation.

use anyhow::Result;
use colored::Colorize;
use commitgraph_core::IngestConfig;
use commitgraph_git::GitRepository;

/// Summarise the history of one path.
pub fn run(config: &IngestConfig, path: &str) -> Result<()> {
    let repo = GitRepository::open(&config.repo_path)?;
    let relevant = repo.relevant_commits(path)?;

    if relevant.commit_count == 0 {
        println!("{} No commits touch: {}", "⚠".yellow(), path);
        return Ok(());
    }

    let head = relevant
        .head_at_collection
        .as_deref()
        .map(|h| &h[..7.min(h.len())])
        .unwrap_or("unborn");

    println!("{} {}", "→".blue(), relevant.path.bold());
    println!("  HEAD: {}", head.magenta());
    println!("  Commits: {}", relevant.commit_count.to_string().green());
    println!("  Authors: {}", relevant.unique_authors);
    for name in &relevant.author_names {
        println!("    {}", name);
    }
    Ok(())
}
