//! Records persisted into the commit graph.

use serde::{Deserialize, Serialize};

/// Identity key: the (source, name, email) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub source: String,
    pub name: String,
    pub email: String,
}

impl IdentityKey {
    pub fn new(source: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            email: email.into(),
        }
    }

    /// Get identity in "Name <email>" format.
    pub fn display(&self) -> String {
        if self.email.is_empty() {
            self.name.clone()
        } else {
            format!("{} <{}>", self.name, self.email)
        }
    }
}

/// Role an identity plays on a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityRole {
    Authored,
    Committed,
    CoAuthored,
}

impl IdentityRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityRole::Authored => "AUTHORED",
            IdentityRole::Committed => "COMMITTED",
            IdentityRole::CoAuthored => "CO_AUTHORED",
        }
    }
}

/// A commit together with the identities acting on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Full commit hash (40 hex characters).
    pub hash: String,
    /// Full commit message.
    pub message: String,
    /// First line of the message.
    pub summary: String,
    /// Epoch seconds.
    pub authored_at: i64,
    /// Epoch seconds.
    pub committed_at: i64,
    /// Parent hashes, first parent first.
    pub parents: Vec<String>,
    pub author: IdentityKey,
    pub committer: IdentityKey,
    /// Identities named in `Co-authored-by` trailers.
    pub co_authors: Vec<IdentityKey>,
}

impl CommitRecord {
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn short_hash(&self) -> &str {
        &self.hash[..8.min(self.hash.len())]
    }

    /// Every (identity, role, timestamp) edge this commit produces.
    pub fn identity_edges(&self) -> Vec<(&IdentityKey, IdentityRole, i64)> {
        let mut edges = vec![
            (&self.author, IdentityRole::Authored, self.authored_at),
            (&self.committer, IdentityRole::Committed, self.committed_at),
        ];
        for co_author in &self.co_authors {
            edges.push((co_author, IdentityRole::CoAuthored, self.authored_at));
        }
        edges
    }
}

/// Kind of ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Branch,
    Tag,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::Branch => "branch",
            RefKind::Tag => "tag",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "branch" => Some(RefKind::Branch),
            "tag" => Some(RefKind::Tag),
            _ => None,
        }
    }
}

/// Kind of object a fact can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Commit,
    Tag,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::Tag => "tag",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "commit" => Some(ObjectKind::Commit),
            "tag" => Some(ObjectKind::Tag),
            _ => None,
        }
    }
}

/// A branch or tag and its current tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefRecord {
    pub kind: RefKind,
    /// Short name (`main`, `v1.0`); remote branches drop the remote prefix.
    pub name: String,
    /// Remote name, empty for local refs.
    pub remote: String,
    /// Commit hash, or tag name when `target_kind` is `Tag`.
    pub target: String,
    pub target_kind: ObjectKind,
}

/// Immutable snapshot of a ref tip at one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefStateRecord {
    pub run_id: String,
    pub kind: RefKind,
    pub name: String,
    pub remote: String,
    pub target: String,
    pub recorded_at: i64,
}

/// An annotated tag object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub name: String,
    pub message: String,
    pub tagger: Option<IdentityKey>,
    pub tagger_at: Option<i64>,
    /// Hash of the tagged commit.
    pub target: String,
}

/// Path-level change status against the first parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeStatus {
    #[serde(rename = "A")]
    Added,
    #[serde(rename = "D")]
    Deleted,
    #[serde(rename = "R")]
    Renamed,
    #[serde(rename = "M")]
    Modified,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Added => "A",
            ChangeStatus::Deleted => "D",
            ChangeStatus::Renamed => "R",
            ChangeStatus::Modified => "M",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "A" => Some(ChangeStatus::Added),
            "D" => Some(ChangeStatus::Deleted),
            "R" => Some(ChangeStatus::Renamed),
            "M" => Some(ChangeStatus::Modified),
            _ => None,
        }
    }
}

/// A path-level change within one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeRecord {
    pub commit_hash: String,
    pub path: String,
    pub status: ChangeStatus,
    pub added: u32,
    pub deleted: u32,
    pub rename_from: Option<String>,
    pub is_sensitive: bool,
}

/// Signature facts extracted for a commit or tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    /// 40-character uppercase hex fingerprint.
    pub fingerprint: String,
    pub method: String,
    /// Always `None`: signatures are located, not validated.
    pub valid: Option<bool>,
}

/// Outcome of probing one object, ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureCheck {
    pub kind: ObjectKind,
    /// Commit hash or tag name.
    pub key: String,
    pub signature: Option<SignatureRecord>,
}

/// Synthetic source-of-truth event about an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_type: String,
    pub source: String,
    pub timestamp: i64,
    pub about_kind: ObjectKind,
    pub about_key: String,
}

/// Node counts per label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub commits: usize,
    pub identities: usize,
    pub refs: usize,
    pub ref_states: usize,
    pub tag_objects: usize,
    pub pgp_keys: usize,
    pub file_changes: usize,
    pub paths: usize,
    pub events: usize,
    pub ingest_runs: usize,
}

/// Result of the FileChange duplicate repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    /// (commit, path) groups that had more than one node.
    pub duplicate_groups: usize,
    /// Nodes deleted, leaving one per group.
    pub removed: usize,
}
