//! Merge ancestry analysis.
//!
//! The commits a merge introduces are those reachable from its second parent
//! but not from its first. The second-parent walk stops once it meets the
//! first parent's hash; the first-parent walk is exhaustive. Both walks are
//! bounded by `walk_limit` visited commits. Parents beyond the second are not
//! considered.

use crate::repository::{GitRepository, Result};
use git2::Oid;
use std::collections::{BTreeSet, HashSet, VecDeque};
use tracing::warn;

impl GitRepository {
    /// Commits introduced by `merge_hash`, or an error if history cannot be read.
    pub fn try_merged_commits(&self, merge_hash: &str, walk_limit: usize) -> Result<BTreeSet<String>> {
        let merge = self.find_commit(merge_hash)?;
        if merge.parent_count() < 2 {
            return Ok(BTreeSet::new());
        }
        let first = merge.parent_id(0)?;
        let second = merge.parent_id(1)?;

        let introduced = self.ancestry(second, Some(first), walk_limit, merge_hash)?;
        let mainline = self.ancestry(first, None, walk_limit, merge_hash)?;

        Ok(introduced
            .difference(&mainline)
            .filter(|oid| **oid != merge.id())
            .map(|oid| oid.to_string())
            .collect())
    }

    /// Fail-soft variant: any error yields an empty set.
    pub fn merged_commits(&self, merge_hash: &str, walk_limit: usize) -> BTreeSet<String> {
        self.try_merged_commits(merge_hash, walk_limit)
            .unwrap_or_else(|e| {
                warn!(merge = %merge_hash, error = %e, "Merge ancestry failed");
                BTreeSet::new()
            })
    }

    /// Breadth-first ancestry from `start`, including it. Reaching `stop_at`
    /// ends the walk without adding it.
    fn ancestry(
        &self,
        start: Oid,
        stop_at: Option<Oid>,
        walk_limit: usize,
        merge_hash: &str,
    ) -> Result<HashSet<Oid>> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start]);

        while let Some(oid) = queue.pop_front() {
            if Some(oid) == stop_at {
                break;
            }
            if !visited.insert(oid) {
                continue;
            }
            if visited.len() >= walk_limit {
                warn!(merge = %merge_hash, walk_limit, "Ancestry walk truncated at limit");
                break;
            }
            let commit = self.inner().find_commit(oid)?;
            queue.extend(commit.parent_ids());
        }

        Ok(visited)
    }
}
