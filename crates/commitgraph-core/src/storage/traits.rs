//! Storage trait definitions.

use crate::model::{
    CommitRecord, EventRecord, FileChangeRecord, NodeCounts, ObjectKind, RefRecord,
    RefStateRecord, SignatureCheck, SignatureRecord, TagRecord,
};
use crate::run::{IngestRun, RunCounter, RunStatus};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashSet;

/// Idempotent, batched persistence of commit-graph facts.
///
/// Every write is an upsert by key; submitting the same fact twice leaves
/// the graph unchanged apart from refreshed properties.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Hashes of every persisted commit.
    async fn known_commit_hashes(&self) -> Result<HashSet<String>>;

    /// Upsert commits, their identities, identity edges and parent edges.
    async fn upsert_commits(&self, commits: &[CommitRecord]) -> Result<usize>;

    /// Count persisted commits.
    async fn commit_count(&self) -> Result<usize>;

    /// Upsert refs to their current tips and append one snapshot per ref for the run.
    async fn upsert_refs(&self, run_id: &str, refs: &[RefRecord]) -> Result<usize>;

    /// Upsert annotated tag objects with their tagger and target.
    async fn upsert_tags(&self, tags: &[TagRecord]) -> Result<usize>;

    /// Commits the file-change stage has not yet processed.
    async fn commits_pending_changes(&self) -> Result<Vec<String>>;

    /// Upsert file changes and mark `checked` commits as processed.
    async fn upsert_file_changes(
        &self,
        changes: &[FileChangeRecord],
        checked: &[String],
    ) -> Result<usize>;

    /// Commits (hash, authored_at) with no event about them yet.
    async fn commits_pending_events(&self) -> Result<Vec<(String, i64)>>;

    /// Tags (name, tagger_at) with no event about them yet.
    async fn tags_pending_events(&self) -> Result<Vec<(String, i64)>>;

    /// Upsert events and their ABOUT edges.
    async fn upsert_events(&self, events: &[EventRecord]) -> Result<usize>;

    /// Commits not yet flagged as signature-checked.
    async fn commits_pending_signature(&self) -> Result<Vec<String>>;

    /// Annotated tags not yet flagged as signature-checked.
    async fn tags_pending_signature(&self) -> Result<Vec<String>>;

    /// Persist signature outcomes and flag every probed object as checked.
    async fn record_signatures(&self, checks: &[SignatureCheck]) -> Result<usize>;

    /// Merge commits with no MERGED_INCLUDES edge yet.
    async fn unprocessed_merges(&self) -> Result<Vec<String>>;

    /// Upsert MERGED_INCLUDES edges, one group per merge commit.
    async fn upsert_merge_includes(&self, merges: &[(String, Vec<String>)]) -> Result<usize>;

    /// Commits introduced by a merge, sorted.
    async fn merged_includes(&self, merge_hash: &str) -> Result<Vec<String>>;

    /// File changes recorded for a commit, sorted by path.
    async fn file_changes(&self, commit_hash: &str) -> Result<Vec<FileChangeRecord>>;

    /// Signature attached to a commit or tag, if any.
    async fn signature_of(&self, kind: ObjectKind, key: &str) -> Result<Option<SignatureRecord>>;

    /// Ref snapshots taken during a run.
    async fn ref_states(&self, run_id: &str) -> Result<Vec<RefStateRecord>>;

    /// Node counts per label.
    async fn node_counts(&self) -> Result<NodeCounts>;
}

/// Durable run tracking.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Verify the store answers queries.
    async fn ping(&self) -> Result<()>;

    /// Persist a new run record.
    async fn create_run(&self, run: &IngestRun) -> Result<()>;

    /// Read a run record from the store.
    async fn get_run(&self, run_id: &str) -> Result<Option<IngestRun>>;

    /// Move a run to a new status and refresh its progress timestamp.
    async fn set_run_status(&self, run_id: &str, status: RunStatus) -> Result<()>;

    /// Record which enrichment substage is running.
    async fn set_run_stage(&self, run_id: &str, stage: Option<&str>) -> Result<()>;

    /// Add to a counter and refresh the progress timestamp.
    async fn add_progress(&self, run_id: &str, counter: RunCounter, amount: u64) -> Result<()>;

    /// Most recently started runs first.
    async fn list_runs(&self, limit: usize) -> Result<Vec<IngestRun>>;
}
