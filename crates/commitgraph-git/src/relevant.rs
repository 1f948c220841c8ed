//! Commits relevant to a path.

use crate::repository::{GitRepository, Result};
use git2::{Commit, Oid, Sort};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// History summary for one path across every ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelevantCommits {
    /// Commit HEAD resolved to when the walk ran.
    pub head_at_collection: Option<String>,
    pub path: String,
    pub commit_count: usize,
    pub unique_authors: usize,
    /// Distinct author names, sorted.
    pub author_names: Vec<String>,
}

fn entry_at(commit: &Commit<'_>, path: &Path) -> Result<Option<Oid>> {
    let tree = commit.tree()?;
    Ok(tree.get_path(path).ok().map(|entry| entry.id()))
}

impl GitRepository {
    /// Count the commits reachable from any ref that change `path`.
    ///
    /// A commit counts when the path (file or directory) differs from every
    /// parent, so a merge that takes one side's version unchanged is skipped.
    /// Root commits count when the path exists in them.
    pub fn relevant_commits(&self, path: &str) -> Result<RelevantCommits> {
        let target = Path::new(path.trim_end_matches('/'));
        let mut revwalk = self.inner().revwalk()?;
        for (refname, tip) in self.walk_roots()? {
            if let Err(e) = revwalk.push(tip) {
                debug!(reference = %refname, error = %e, "Skipping ref in path walk");
            }
        }
        revwalk.set_sorting(Sort::TIME)?;

        let mut commit_count = 0;
        let mut authors = BTreeSet::new();
        for oid in revwalk {
            let commit = self.inner().find_commit(oid?)?;
            let current = entry_at(&commit, target)?;

            let touched = if commit.parent_count() == 0 {
                current.is_some()
            } else {
                let mut differs_from_all = true;
                for parent in commit.parents() {
                    if entry_at(&parent, target)? == current {
                        differs_from_all = false;
                        break;
                    }
                }
                differs_from_all
            };

            if touched {
                commit_count += 1;
                authors.insert(String::from_utf8_lossy(commit.author().name_bytes()).into_owned());
            }
        }

        Ok(RelevantCommits {
            head_at_collection: self.head_hash(),
            path: path.to_string(),
            commit_count,
            unique_authors: authors.len(),
            author_names: authors.into_iter().collect(),
        })
    }
}
