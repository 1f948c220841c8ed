//! Git repository wrapper.

use crate::commit::{commit_record, identity_of};
use commitgraph_core::{CommitRecord, ObjectKind, RefKind, RefRecord, TagRecord};
use git2::{Commit, Oid, Reference, Repository};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors from git operations.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Repository not found at {0}")]
    NotFound(PathBuf),

    #[error("Invalid commit: {0}")]
    InvalidCommit(String),

    #[error("Unsupported ref: {0}")]
    UnsupportedRef(String),
}

/// Result type for git operations.
pub type Result<T> = std::result::Result<T, GitError>;

impl From<GitError> for commitgraph_core::Error {
    fn from(err: GitError) -> Self {
        commitgraph_core::Error::Repository(err.to_string())
    }
}

/// A ref resolved to its tip, plus the annotated tag object when there is one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefInfo {
    pub record: RefRecord,
    pub tag: Option<TagRecord>,
}

/// Wrapper around a git repository.
pub struct GitRepository {
    repo: Repository,
    path: PathBuf,
}

impl GitRepository {
    /// Open a git repository at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let repo = Repository::discover(&path).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                GitError::NotFound(path.clone())
            } else {
                GitError::Git(e)
            }
        })?;

        Ok(Self { repo, path })
    }

    /// Working directory, or the git dir for bare repositories.
    pub fn root(&self) -> PathBuf {
        self.repo
            .workdir()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| self.repo.path().to_path_buf())
    }

    /// Path the repository was opened from.
    pub fn opened_at(&self) -> &Path {
        &self.path
    }

    /// Hash of the commit HEAD resolves to, if any.
    pub fn head_hash(&self) -> Option<String> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
            .map(|commit| commit.id().to_string())
    }

    pub(crate) fn find_commit(&self, hash: &str) -> Result<Commit<'_>> {
        let oid = Oid::from_str(hash).map_err(|_| GitError::InvalidCommit(hash.to_string()))?;
        Ok(self.repo.find_commit(oid)?)
    }

    /// Read a commit by hash.
    pub fn get_commit(&self, hash: &str, source: &str) -> Result<CommitRecord> {
        let commit = self.find_commit(hash)?;
        Ok(commit_record(&commit, source))
    }

    /// Every local branch, remote-tracking branch and tag resolved to its tip.
    ///
    /// Symbolic remote heads (`origin/HEAD`) and refs outside heads/remotes/tags are
    /// skipped. A ref that fails to resolve is logged and skipped.
    pub fn refs(&self, identity_source: &str) -> Result<Vec<RefInfo>> {
        let mut refs = Vec::new();
        for reference in self.repo.references()? {
            let reference = match reference {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable ref");
                    continue;
                }
            };
            let Some(full_name) = reference.name().map(str::to_string) else {
                continue;
            };

            match self.resolve_ref(&reference, &full_name, identity_source) {
                Ok(Some(info)) => refs.push(info),
                Ok(None) => {}
                Err(e) => warn!(reference = %full_name, error = %e, "Skipping unresolvable ref"),
            }
        }

        refs.sort_by(|a, b| {
            (a.record.kind.as_str(), &a.record.remote, &a.record.name).cmp(&(
                b.record.kind.as_str(),
                &b.record.remote,
                &b.record.name,
            ))
        });
        Ok(refs)
    }

    fn resolve_ref(
        &self,
        reference: &Reference<'_>,
        full_name: &str,
        identity_source: &str,
    ) -> Result<Option<RefInfo>> {
        if let Some(name) = full_name.strip_prefix("refs/heads/") {
            let tip = reference.peel_to_commit()?;
            return Ok(Some(RefInfo {
                record: branch(name, "", tip.id()),
                tag: None,
            }));
        }

        if let Some(rest) = full_name.strip_prefix("refs/remotes/") {
            let (remote, name) = rest
                .split_once('/')
                .ok_or_else(|| GitError::UnsupportedRef(full_name.to_string()))?;
            if name == "HEAD" {
                return Ok(None);
            }
            let tip = reference.peel_to_commit()?;
            return Ok(Some(RefInfo {
                record: branch(name, remote, tip.id()),
                tag: None,
            }));
        }

        if let Some(name) = full_name.strip_prefix("refs/tags/") {
            let target = reference.target().ok_or_else(|| GitError::UnsupportedRef(full_name.to_string()))?;
            let commit = reference.peel_to_commit()?;

            if let Ok(tag) = self.repo.find_tag(target) {
                let tagger = tag.tagger();
                let record = TagRecord {
                    name: name.to_string(),
                    message: String::from_utf8_lossy(tag.message_bytes().unwrap_or_default())
                        .into_owned(),
                    tagger: tagger.as_ref().map(|s| identity_of(s, identity_source)),
                    tagger_at: tagger.as_ref().map(|s| s.when().seconds()),
                    target: commit.id().to_string(),
                };
                return Ok(Some(RefInfo {
                    record: RefRecord {
                        kind: RefKind::Tag,
                        name: name.to_string(),
                        remote: String::new(),
                        target: name.to_string(),
                        target_kind: ObjectKind::Tag,
                    },
                    tag: Some(record),
                }));
            }

            // Lightweight tag
            return Ok(Some(RefInfo {
                record: RefRecord {
                    kind: RefKind::Tag,
                    name: name.to_string(),
                    remote: String::new(),
                    target: commit.id().to_string(),
                    target_kind: ObjectKind::Commit,
                },
                tag: None,
            }));
        }

        Ok(None)
    }

    /// Get the underlying git2 repository.
    pub fn inner(&self) -> &Repository {
        &self.repo
    }
}

fn branch(name: &str, remote: &str, tip: Oid) -> RefRecord {
    RefRecord {
        kind: RefKind::Branch,
        name: name.to_string(),
        remote: remote.to_string(),
        target: tip.to_string(),
        target_kind: ObjectKind::Commit,
    }
}
