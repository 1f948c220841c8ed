//! Stage-gated ingestion pipeline.
//!
//! A run persists the commit backbone, re-reads its own run record to confirm
//! the backbone was recorded, then runs the enrichment stages in order. Each
//! stage selects only the work its resumability marker says is outstanding,
//! so rerunning after a crash never repeats finished work.

use crate::outcome::{ItemOutcome, RunSummary, StageStats};
use commitgraph_core::{
    EventRecord, Error, GraphStore, IngestConfig, IngestRun, ObjectKind, RefRecord, Result,
    RunCounter, RunStatus, RunStore, SignatureCheck, TagRecord,
};
use commitgraph_git::{GitRepository, SignatureExtractor, SignatureProbe};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const STAGE_REFS: &str = "refs";
pub const STAGE_FILE_CHANGES: &str = "file_changes";
pub const STAGE_EVENTS: &str = "events";
pub const STAGE_COMMIT_SIGNATURES: &str = "commit_signatures";
pub const STAGE_TAG_SIGNATURES: &str = "tag_signatures";
pub const STAGE_MERGE_ANCESTRY: &str = "merge_ancestry";

/// Enrichment stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Refs,
    FileChanges,
    Events,
    CommitSignatures,
    TagSignatures,
    MergeAncestry,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Refs,
        Stage::FileChanges,
        Stage::Events,
        Stage::CommitSignatures,
        Stage::TagSignatures,
        Stage::MergeAncestry,
    ];

    /// Name recorded as the run's current stage.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Refs => STAGE_REFS,
            Stage::FileChanges => STAGE_FILE_CHANGES,
            Stage::Events => STAGE_EVENTS,
            Stage::CommitSignatures => STAGE_COMMIT_SIGNATURES,
            Stage::TagSignatures => STAGE_TAG_SIGNATURES,
            Stage::MergeAncestry => STAGE_MERGE_ANCESTRY,
        }
    }
}

pub const EVENT_COMMIT_AUTHORED: &str = "commit_authored";
pub const EVENT_TAG_CREATED: &str = "tag_created";

/// Drives one repository into one graph store.
pub struct Pipeline {
    repo: Mutex<GitRepository>,
    graph: Arc<dyn GraphStore>,
    runs: Arc<dyn RunStore>,
    config: Arc<IngestConfig>,
    signatures: SignatureExtractor,
}

impl Pipeline {
    pub fn new(
        repo: GitRepository,
        graph: Arc<dyn GraphStore>,
        runs: Arc<dyn RunStore>,
        config: Arc<IngestConfig>,
    ) -> Self {
        let signatures = SignatureExtractor::new(repo.root(), config.signature_timeout());
        Self {
            repo: Mutex::new(repo),
            graph,
            runs,
            config,
            signatures,
        }
    }

    /// Replace the signature extractor.
    pub fn with_signature_extractor(mut self, signatures: SignatureExtractor) -> Self {
        self.signatures = signatures;
        self
    }

    /// Run `f` against the repository. Only owned data leaves the lock.
    fn with_repo<T>(&self, f: impl FnOnce(&GitRepository) -> T) -> Result<T> {
        let repo = self
            .repo
            .lock()
            .map_err(|_| Error::Repository("repository mutex poisoned".into()))?;
        Ok(f(&repo))
    }

    /// Start and execute a run to completion.
    pub async fn run(&self, run_id: &str) -> Result<RunSummary> {
        self.begin_run(run_id).await?;
        self.execute(run_id).await
    }

    /// Check the store answers, then record a fresh run.
    pub async fn begin_run(&self, run_id: &str) -> Result<IngestRun> {
        self.runs.ping().await?;
        let run = IngestRun::new(run_id);
        self.runs.create_run(&run).await?;
        info!(run_id, "Ingest run started");
        Ok(run)
    }

    /// Execute the stages of a run whose record already exists.
    pub async fn execute(&self, run_id: &str) -> Result<RunSummary> {
        let mut summary = RunSummary {
            run_id: run_id.to_string(),
            ..RunSummary::default()
        };

        summary.commits_discovered = self.import_commits(run_id).await?;
        self.verify_backbone(run_id).await?;

        for stage in Stage::ALL {
            self.runs.set_run_stage(run_id, Some(stage.name())).await?;
            let stats = match stage {
                Stage::Refs => self.snapshot_refs(run_id).await?,
                Stage::FileChanges => self.extract_file_changes(run_id).await?,
                Stage::Events => self.record_events(run_id).await?,
                Stage::CommitSignatures => self.probe_signatures(run_id, ObjectKind::Commit).await?,
                Stage::TagSignatures => self.probe_signatures(run_id, ObjectKind::Tag).await?,
                Stage::MergeAncestry => self.analyze_merges(run_id).await?,
            };
            let stage = stage.name();
            info!(
                run_id,
                stage,
                succeeded = stats.succeeded,
                skipped = stats.skipped,
                failed = stats.failed,
                "Stage finished"
            );
            if !stats.samples.is_empty() {
                warn!(run_id, stage, samples = ?stats.samples, "Stage had item failures");
            }
            summary.stages.push(stats);
        }

        self.runs.set_run_stage(run_id, None).await?;
        self.runs.set_run_status(run_id, RunStatus::Completed).await?;
        info!(run_id, commits = summary.commits_discovered, "Ingest run completed");
        Ok(summary)
    }

    /// Discover and persist unseen commits, then mark the backbone complete.
    async fn import_commits(&self, run_id: &str) -> Result<usize> {
        let known = self.graph.known_commit_hashes().await?;
        let source = self.config.identity_source.clone();
        let limit = self.config.commit_limit;
        let commits = self.with_repo(|repo| repo.discover_new_commits(&known, limit, &source))??;

        info!(run_id, new = commits.len(), known = known.len(), "Commit discovery finished");
        self.graph.upsert_commits(&commits).await?;
        self.runs
            .add_progress(run_id, RunCounter::Commits, commits.len() as u64)
            .await?;
        self.runs
            .set_run_status(run_id, RunStatus::CommitsComplete)
            .await?;
        Ok(commits.len())
    }

    /// Re-read the run from the store and require the backbone status.
    async fn verify_backbone(&self, run_id: &str) -> Result<()> {
        let found = self.runs.get_run(run_id).await?.map(|run| run.status);
        if found == Some(RunStatus::CommitsComplete) {
            return Ok(());
        }
        let found = found.map_or("missing", |status| status.as_str());
        warn!(run_id, found, "Backbone verification failed; skipping enrichment");
        Err(Error::Consistency {
            run_id: run_id.to_string(),
            expected: RunStatus::CommitsComplete.as_str().to_string(),
            found: found.to_string(),
        })
    }

    async fn snapshot_refs(&self, run_id: &str) -> Result<StageStats> {
        let mut stats = StageStats::new(STAGE_REFS);
        let source = self.config.identity_source.clone();
        let infos = self.with_repo(|repo| repo.refs(&source))??;

        let mut refs: Vec<RefRecord> = Vec::with_capacity(infos.len());
        let mut tags: Vec<TagRecord> = Vec::new();
        for info in infos {
            stats.record(&info.record.name, ItemOutcome::Success);
            refs.push(info.record);
            tags.extend(info.tag);
        }

        self.graph.upsert_tags(&tags).await?;
        self.graph.upsert_refs(run_id, &refs).await?;
        self.runs
            .add_progress(run_id, RunCounter::Refs, refs.len() as u64)
            .await?;
        debug!(run_id, refs = refs.len(), tags = tags.len(), "Refs snapshotted");
        Ok(stats)
    }

    async fn extract_file_changes(&self, run_id: &str) -> Result<StageStats> {
        let mut stats = StageStats::new(STAGE_FILE_CHANGES);
        let pending = self.graph.commits_pending_changes().await?;

        for chunk in pending.chunks(self.config.batch_size) {
            let sensitive = &self.config.sensitive_paths;
            let mut changes = Vec::new();
            let mut outcomes = Vec::with_capacity(chunk.len());
            self.with_repo(|repo| {
                for hash in chunk {
                    match repo.file_changes(hash, sensitive) {
                        Ok(found) if found.is_empty() => outcomes.push(ItemOutcome::Skipped),
                        Ok(found) => {
                            changes.extend(found);
                            outcomes.push(ItemOutcome::Success);
                        }
                        Err(e) => outcomes.push(ItemOutcome::Failed(e.to_string())),
                    }
                }
            })?;
            for (hash, outcome) in chunk.iter().zip(outcomes) {
                stats.record(hash, outcome);
            }

            // Failed commits are marked too: they count as having no changes.
            let written = self.graph.upsert_file_changes(&changes, chunk).await?;
            self.runs
                .add_progress(run_id, RunCounter::FileChanges, written as u64)
                .await?;
        }
        Ok(stats)
    }

    async fn record_events(&self, run_id: &str) -> Result<StageStats> {
        let mut stats = StageStats::new(STAGE_EVENTS);
        let source = &self.config.event_source;

        let commits = self.graph.commits_pending_events().await?;
        let tags = self.graph.tags_pending_events().await?;
        let events: Vec<EventRecord> = commits
            .into_iter()
            .map(|(hash, at)| (EVENT_COMMIT_AUTHORED, ObjectKind::Commit, hash, at))
            .chain(
                tags.into_iter()
                    .map(|(name, at)| (EVENT_TAG_CREATED, ObjectKind::Tag, name, at)),
            )
            .map(|(event_type, about_kind, about_key, timestamp)| EventRecord {
                event_type: event_type.to_string(),
                source: source.clone(),
                timestamp,
                about_kind,
                about_key,
            })
            .collect();

        for chunk in events.chunks(self.config.batch_size) {
            let written = self.graph.upsert_events(chunk).await?;
            for event in chunk {
                stats.record(&event.about_key, ItemOutcome::Success);
            }
            self.runs
                .add_progress(run_id, RunCounter::Events, written as u64)
                .await?;
        }
        Ok(stats)
    }

    async fn probe_signatures(&self, run_id: &str, kind: ObjectKind) -> Result<StageStats> {
        let (stage, pending) = match kind {
            ObjectKind::Commit => (
                STAGE_COMMIT_SIGNATURES,
                self.graph.commits_pending_signature().await?,
            ),
            ObjectKind::Tag => (
                STAGE_TAG_SIGNATURES,
                self.graph.tags_pending_signature().await?,
            ),
        };
        let mut stats = StageStats::new(stage);
        let mut rejected = 0usize;

        for chunk in pending.chunks(self.config.batch_size) {
            let mut checks = Vec::with_capacity(chunk.len());
            let mut found = 0u64;
            for key in chunk {
                let probe = self.signatures.probe(kind, key).await;
                let outcome = match &probe {
                    SignatureProbe::Signed(_) => {
                        found += 1;
                        ItemOutcome::Success
                    }
                    SignatureProbe::Unsigned => ItemOutcome::Skipped,
                    SignatureProbe::Rejected => {
                        rejected += 1;
                        ItemOutcome::Skipped
                    }
                    SignatureProbe::Failed(reason) => ItemOutcome::Failed(reason.clone()),
                };
                stats.record(key, outcome);
                checks.push(SignatureCheck {
                    kind,
                    key: key.clone(),
                    signature: probe.into_signature(),
                });
            }

            self.graph.record_signatures(&checks).await?;
            self.runs
                .add_progress(run_id, RunCounter::Signatures, chunk.len() as u64)
                .await?;
            self.runs
                .add_progress(run_id, RunCounter::SignaturesFound, found)
                .await?;
        }

        if rejected > 0 {
            info!(run_id, stage, rejected, "Discarded malformed fingerprints");
        }
        Ok(stats)
    }

    async fn analyze_merges(&self, run_id: &str) -> Result<StageStats> {
        let mut stats = StageStats::new(STAGE_MERGE_ANCESTRY);
        let pending = self.graph.unprocessed_merges().await?;
        let walk_limit = self.config.merge_walk_limit;

        for chunk in pending.chunks(self.config.batch_size) {
            let mut includes = Vec::new();
            let mut outcomes = Vec::with_capacity(chunk.len());
            self.with_repo(|repo| {
                for hash in chunk {
                    match repo.try_merged_commits(hash, walk_limit) {
                        Ok(merged) if merged.is_empty() => outcomes.push(ItemOutcome::Skipped),
                        Ok(merged) => {
                            includes.push((hash.clone(), merged.into_iter().collect::<Vec<_>>()));
                            outcomes.push(ItemOutcome::Success);
                        }
                        Err(e) => outcomes.push(ItemOutcome::Failed(e.to_string())),
                    }
                }
            })?;
            for (hash, outcome) in chunk.iter().zip(outcomes) {
                stats.record(hash, outcome);
            }

            self.graph.upsert_merge_includes(&includes).await?;
            self.runs
                .add_progress(run_id, RunCounter::Merges, chunk.len() as u64)
                .await?;
        }
        Ok(stats)
    }
}
