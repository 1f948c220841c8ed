//! File change extraction.

use crate::repository::{GitRepository, Result};
use commitgraph_core::{ChangeStatus, FileChangeRecord};
use git2::{Delta, DiffFindOptions, DiffOptions, Patch};

/// Whether `path` falls under any sensitive prefix.
pub fn is_sensitive_path(path: &str, sensitive: &[String]) -> bool {
    sensitive.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

/// Whether a change path and a target path are prefix-related either way.
fn touches_target(path: &str, targets: &[String]) -> bool {
    targets
        .iter()
        .any(|target| path.starts_with(target.as_str()) || target.starts_with(path))
}

impl GitRepository {
    /// Path-level changes of a commit against its first parent, or the empty tree for roots.
    pub fn file_changes(&self, hash: &str, sensitive: &[String]) -> Result<Vec<FileChangeRecord>> {
        let commit = self.find_commit(hash)?;
        let tree = commit.tree()?;
        let parent_tree = match commit.parent_count() {
            0 => None,
            _ => Some(commit.parent(0)?.tree()?),
        };

        let mut opts = DiffOptions::new();
        opts.ignore_submodules(true);
        let mut diff =
            self.inner()
                .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))?;
        let mut find = DiffFindOptions::new();
        find.renames(true);
        diff.find_similar(Some(&mut find))?;

        let mut changes = Vec::new();
        for (idx, delta) in diff.deltas().enumerate() {
            let status = match delta.status() {
                Delta::Added => ChangeStatus::Added,
                Delta::Deleted => ChangeStatus::Deleted,
                Delta::Renamed => ChangeStatus::Renamed,
                Delta::Unmodified | Delta::Ignored | Delta::Untracked => continue,
                _ => ChangeStatus::Modified,
            };

            let new_path = delta.new_file().path().map(|p| p.to_string_lossy().into_owned());
            let old_path = delta.old_file().path().map(|p| p.to_string_lossy().into_owned());
            let Some(path) = new_path.or_else(|| old_path.clone()) else {
                continue;
            };
            let rename_from = match status {
                ChangeStatus::Renamed => old_path.filter(|old| *old != path),
                _ => None,
            };

            // Binary deltas have no patch text and count as zero lines.
            let (added, deleted) = match Patch::from_diff(&diff, idx)? {
                Some(patch) => {
                    let (_, additions, deletions) = patch.line_stats()?;
                    (additions as u32, deletions as u32)
                }
                None => (0, 0),
            };

            changes.push(FileChangeRecord {
                commit_hash: hash.to_string(),
                is_sensitive: is_sensitive_path(&path, sensitive),
                path,
                status,
                added,
                deleted,
                rename_from,
            });
        }

        Ok(changes)
    }

    /// `file_changes` restricted to paths prefix-related to any of `targets`.
    pub fn file_changes_for_paths(
        &self,
        hash: &str,
        targets: &[String],
        sensitive: &[String],
    ) -> Result<Vec<FileChangeRecord>> {
        Ok(self
            .file_changes(hash, sensitive)?
            .into_iter()
            .filter(|change| touches_target(&change.path, targets))
            .collect())
    }
}
