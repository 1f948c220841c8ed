//! Incremental commit discovery.
//!
//! Remote-tracking refs are walked first, then local refs whose tips were not
//! already reached. Walks prune at commits already persisted, since their
//! ancestors were imported with them.

use crate::commit::commit_record;
use crate::repository::{GitRepository, Result};
use commitgraph_core::CommitRecord;
use git2::{Oid, Sort};
use std::collections::HashSet;
use tracing::{debug, info, warn};

impl GitRepository {
    /// Commits reachable from any ref whose hash is not in `known`.
    ///
    /// If the ref walks find nothing, every commit reachable from HEAD is
    /// scanned instead (bounded by `limit`), which recovers from force-pushed
    /// histories whose tips no longer meet the known set. Order is unspecified.
    pub fn discover_new_commits(
        &self,
        known: &HashSet<String>,
        limit: Option<usize>,
        identity_source: &str,
    ) -> Result<Vec<CommitRecord>> {
        let mut seen: HashSet<Oid> = HashSet::new();
        let mut found = Vec::new();

        for (refname, tip) in self.walk_roots()? {
            if seen.contains(&tip) {
                continue;
            }
            match self.walk_ref(tip, known, &mut seen, &mut found, identity_source) {
                Ok(added) => debug!(reference = %refname, added, "Walked ref"),
                Err(e) => warn!(reference = %refname, error = %e, "Skipping ref during discovery"),
            }
        }

        if found.is_empty() {
            found = self.scan_full_log(known, limit, identity_source)?;
            if !found.is_empty() {
                info!(count = found.len(), "Full log scan found commits missed by ref walks");
            }
        }

        Ok(found)
    }

    /// Ref names and tips, remote-tracking refs first.
    pub(crate) fn walk_roots(&self) -> Result<Vec<(String, Oid)>> {
        let mut remote = Vec::new();
        let mut local = Vec::new();

        for reference in self.inner().references()? {
            let reference = match reference {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable ref");
                    continue;
                }
            };
            let Some(name) = reference.name().map(str::to_string) else {
                continue;
            };
            let tip = match reference.peel_to_commit() {
                Ok(commit) => commit.id(),
                Err(e) => {
                    debug!(reference = %name, error = %e, "Ref does not resolve to a commit");
                    continue;
                }
            };

            if name.starts_with("refs/remotes/") {
                remote.push((name, tip));
            } else if name.starts_with("refs/heads/") || name.starts_with("refs/tags/") {
                local.push((name, tip));
            }
        }

        remote.extend(local);
        Ok(remote)
    }

    /// Walk parents from `tip`, pruning at known commits.
    ///
    /// A known commit's ancestors were imported with it, so its parents are
    /// never queued. `seen` is shared across refs, so shared history is
    /// visited once per discovery.
    fn walk_ref(
        &self,
        tip: Oid,
        known: &HashSet<String>,
        seen: &mut HashSet<Oid>,
        found: &mut Vec<CommitRecord>,
        identity_source: &str,
    ) -> Result<usize> {
        let mut pending = vec![tip];
        let mut added = 0;

        while let Some(oid) = pending.pop() {
            if !seen.insert(oid) || known.contains(&oid.to_string()) {
                continue;
            }
            let commit = self.inner().find_commit(oid)?;
            pending.extend(commit.parent_ids().filter(|parent| !seen.contains(parent)));
            found.push(commit_record(&commit, identity_source));
            added += 1;
        }
        Ok(added)
    }

    /// Oldest-first scan from HEAD collecting at most `limit` unknown commits.
    fn scan_full_log(
        &self,
        known: &HashSet<String>,
        limit: Option<usize>,
        identity_source: &str,
    ) -> Result<Vec<CommitRecord>> {
        let mut revwalk = self.inner().revwalk()?;
        if revwalk.push_head().is_err() {
            // Unborn HEAD: nothing to scan.
            return Ok(Vec::new());
        }
        revwalk.set_sorting(Sort::TIME | Sort::REVERSE)?;

        let mut found = Vec::new();
        for oid in revwalk {
            if limit.is_some_and(|max| found.len() >= max) {
                break;
            }
            let oid = oid?;
            if known.contains(&oid.to_string()) {
                continue;
            }
            let commit = self.inner().find_commit(oid)?;
            found.push(commit_record(&commit, identity_source));
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use crate::fixtures::{sample_repo, RepoBuilder};
    use crate::GitRepository;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn hashes(records: &[commitgraph_core::CommitRecord]) -> HashSet<String> {
        records.iter().map(|c| c.hash.clone()).collect()
    }

    #[test]
    fn test_first_discovery_finds_every_commit_once() {
        let dir = TempDir::new().unwrap();
        let sample = sample_repo(dir.path()).unwrap();
        let repo = GitRepository::open(dir.path()).unwrap();

        let found = repo.discover_new_commits(&HashSet::new(), None, "git").unwrap();
        assert_eq!(found.len(), 5);
        assert_eq!(hashes(&found), sample.all().into_iter().collect());
    }

    #[test]
    fn test_known_commits_stop_the_walk() {
        let dir = TempDir::new().unwrap();
        let sample = sample_repo(dir.path()).unwrap();
        let known: HashSet<String> = sample.all().into_iter().collect();

        let builder = RepoBuilder::open(dir.path()).unwrap();
        let first = builder.commit("master", "Bob", &[("NOTES.md", "one\n")], "Notes").unwrap();
        let second = builder.commit("master", "Bob", &[("NOTES.md", "two\n")], "More notes").unwrap();

        let repo = GitRepository::open(dir.path()).unwrap();
        let found = repo.discover_new_commits(&known, None, "git").unwrap();
        assert_eq!(hashes(&found), [first, second].into_iter().collect());
    }

    #[test]
    fn test_fully_known_repository_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let sample = sample_repo(dir.path()).unwrap();
        let known: HashSet<String> = sample.all().into_iter().collect();
        let repo = GitRepository::open(dir.path()).unwrap();

        assert!(repo.discover_new_commits(&known, None, "git").unwrap().is_empty());
    }

    #[test]
    fn test_merged_side_commits_older_than_known_tip() {
        let dir = TempDir::new().unwrap();
        let sample = sample_repo(dir.path()).unwrap();
        let builder = RepoBuilder::open(dir.path()).unwrap();
        builder
            .repo()
            .find_reference("refs/heads/feature")
            .unwrap()
            .delete()
            .unwrap();

        // The side commit predates the known mainline tip it was merged over.
        let known: HashSet<String> = [
            sample.readme.clone(),
            sample.policy.clone(),
            sample.mempool.clone(),
        ]
        .into_iter()
        .collect();
        let repo = GitRepository::open(dir.path()).unwrap();
        let found = repo.discover_new_commits(&known, None, "git").unwrap();

        assert_eq!(
            hashes(&found),
            [sample.consensus.clone(), sample.merge.clone()].into_iter().collect()
        );
    }

    #[test]
    fn test_shared_history_walked_once() {
        let dir = TempDir::new().unwrap();
        let sample = sample_repo(dir.path()).unwrap();
        let builder = RepoBuilder::open(dir.path()).unwrap();
        for name in ["v1", "v2", "v3"] {
            builder.set_ref(&format!("refs/tags/{}", name), &sample.merge).unwrap();
        }

        let repo = GitRepository::open(dir.path()).unwrap();
        let found = repo.discover_new_commits(&HashSet::new(), None, "git").unwrap();
        assert_eq!(found.len(), 5);
    }

    #[test]
    fn test_full_scan_collects_oldest_unknown_first() {
        let dir = TempDir::new().unwrap();
        let sample = sample_repo(dir.path()).unwrap();
        let repo = GitRepository::open(dir.path()).unwrap();

        // Every ref tip and everything newer than policy is known, so the ref
        // walks find nothing and the full scan runs.
        let known: HashSet<String> = [
            sample.merge.clone(),
            sample.consensus.clone(),
            sample.mempool.clone(),
        ]
        .into_iter()
        .collect();
        let bounded = repo.discover_new_commits(&known, Some(1), "git").unwrap();
        assert_eq!(hashes(&bounded), [sample.readme.clone()].into_iter().collect());

        let enough = repo.discover_new_commits(&known, Some(3), "git").unwrap();
        assert_eq!(
            hashes(&enough),
            [sample.readme.clone(), sample.policy.clone()].into_iter().collect()
        );
    }
}
