use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use commitgraph_core::service::IngestService;
use commitgraph_core::{
    Error, GraphStore, IngestConfig, IngestRun, ObjectKind, Result, RunCounter, RunStatus,
    RunStore, SqliteGraphStore,
};
use commitgraph_git::fixtures::{sample_repo, RepoBuilder, SampleRepo};
use commitgraph_git::{GitRepository, SignatureExtractor};
use commitgraph_ingest::pipeline::{Stage, STAGE_COMMIT_SIGNATURES, STAGE_MERGE_ANCESTRY};
use commitgraph_ingest::{DefaultIngestService, Pipeline};
use tempfile::TempDir;

const FINGERPRINT: &str = "0123456789ABCDEF0123456789ABCDEF01234567";

struct Fixture {
    dir: TempDir,
    sample: SampleRepo,
    store: Arc<SqliteGraphStore>,
    config: Arc<IngestConfig>,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let sample = sample_repo(dir.path()).unwrap();
        let store = Arc::new(SqliteGraphStore::in_memory().unwrap());
        let config = Arc::new(IngestConfig {
            repo_path: dir.path().to_path_buf(),
            signature_timeout_secs: 5,
            ..IngestConfig::default()
        });
        Self {
            dir,
            sample,
            store,
            config,
        }
    }

    /// Pipeline whose signature probes always fail to spawn.
    fn pipeline(&self) -> Pipeline {
        self.pipeline_with_signer(Path::new("/nonexistent/commitgraph-signer"))
    }

    fn pipeline_with_signer(&self, program: &Path) -> Pipeline {
        self.pipeline_with_timeout(program, Duration::from_secs(5))
    }

    fn pipeline_with_timeout(&self, program: &Path, timeout: Duration) -> Pipeline {
        let repo = GitRepository::open(self.dir.path()).unwrap();
        let extractor = SignatureExtractor::new(self.dir.path(), timeout).with_program(program);
        Pipeline::new(repo, self.store.clone(), self.store.clone(), self.config.clone())
            .with_signature_extractor(extractor)
    }

    fn tag_release(&self) {
        let builder = RepoBuilder::open(self.dir.path()).unwrap();
        builder
            .annotated_tag("v0.1", &self.sample.policy, "Bob", "First release")
            .unwrap();
    }
}

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Executable that reports every object as signed by the same key.
#[cfg(unix)]
fn fake_signer(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "fake-git",
        &format!(
            "echo \"commit $4\"\necho \"gpg: using RSA key {}\" >&2\nexit 1\n",
            FINGERPRINT
        ),
    )
}

/// Executable that never answers within a short timeout.
#[cfg(unix)]
fn hanging_signer(dir: &Path) -> PathBuf {
    write_script(dir, "slow-git", "sleep 5\n")
}

#[tokio::test]
async fn test_full_run_builds_graph() {
    let fx = Fixture::new();
    fx.tag_release();

    let summary = fx.pipeline().run("run-1").await.unwrap();
    assert_eq!(summary.commits_discovered, 5);

    let run = fx.store.get_run("run-1").await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.current_stage.is_none());
    assert!(run.completed_at.is_some());
    assert_eq!(run.counters.commits_processed, 5);
    // master, feature, v0.1
    assert_eq!(run.counters.refs_processed, 3);
    assert_eq!(run.counters.file_changes_processed, 5);
    assert_eq!(run.counters.events_processed, 6);
    assert_eq!(run.counters.signatures_processed, 6);
    assert_eq!(run.counters.signatures_found, 0);
    assert_eq!(run.counters.merges_processed, 1);

    let counts = fx.store.node_counts().await.unwrap();
    assert_eq!(counts.commits, 5);
    assert_eq!(counts.identities, 4);
    assert_eq!(counts.tag_objects, 1);
    assert_eq!(counts.pgp_keys, 0);

    let names: Vec<&str> = summary.stages.iter().map(|s| s.stage.as_str()).collect();
    let expected: Vec<&str> = Stage::ALL.iter().map(Stage::name).collect();
    assert_eq!(names, expected);
    assert_eq!(names.last(), Some(&STAGE_MERGE_ANCESTRY));

    let signatures = summary.stage(STAGE_COMMIT_SIGNATURES).unwrap();
    assert_eq!(signatures.failed, 5);
    assert!(!signatures.samples.is_empty());
}

#[tokio::test]
async fn test_merge_ancestry_and_sensitive_paths() {
    let fx = Fixture::new();
    let summary = fx.pipeline().run("run-1").await.unwrap();

    assert_eq!(
        fx.store.merged_includes(&fx.sample.merge).await.unwrap(),
        vec![fx.sample.consensus.clone()]
    );
    assert_eq!(summary.stage(STAGE_MERGE_ANCESTRY).unwrap().succeeded, 1);

    let policy = fx.store.file_changes(&fx.sample.policy).await.unwrap();
    assert_eq!(policy.len(), 1);
    assert!(policy[0].is_sensitive);

    let readme = fx.store.file_changes(&fx.sample.readme).await.unwrap();
    assert_eq!(readme[0].path, "README.md");
    assert!(!readme[0].is_sensitive);

    // The merge is diffed against its first parent.
    let merge = fx.store.file_changes(&fx.sample.merge).await.unwrap();
    assert_eq!(merge.len(), 1);
    assert_eq!(merge[0].path, "src/consensus/consensus.cpp");
}

#[tokio::test]
async fn test_rerun_does_no_repeat_work() {
    let fx = Fixture::new();
    fx.tag_release();
    fx.pipeline().run("run-1").await.unwrap();
    let before = fx.store.node_counts().await.unwrap();

    let summary = fx.pipeline().run("run-2").await.unwrap();
    assert_eq!(summary.commits_discovered, 0);

    let run = fx.store.get_run("run-2").await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.counters.commits_processed, 0);
    assert_eq!(run.counters.file_changes_processed, 0);
    assert_eq!(run.counters.events_processed, 0);
    assert_eq!(run.counters.signatures_processed, 0);
    assert_eq!(run.counters.merges_processed, 0);
    // Refs are snapshotted on every run.
    assert_eq!(run.counters.refs_processed, 3);

    let after = fx.store.node_counts().await.unwrap();
    assert_eq!(after.commits, before.commits);
    assert_eq!(after.identities, before.identities);
    assert_eq!(after.file_changes, before.file_changes);
    assert_eq!(after.events, before.events);
    assert_eq!(after.ref_states, before.ref_states + 3);
    assert_eq!(fx.store.ref_states("run-2").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_incremental_run_picks_up_new_commits() {
    let fx = Fixture::new();
    fx.pipeline().run("run-1").await.unwrap();

    let builder = RepoBuilder::open(fx.dir.path()).unwrap();
    let first = builder
        .commit("master", "Erin", &[("src/policy/policy.cpp", "int fee = 2;\n")], "Raise fee")
        .unwrap();
    builder
        .commit("master", "Erin", &[("doc/fees.md", "Fees went up.\n")], "Document fees")
        .unwrap();

    let summary = fx.pipeline().run("run-2").await.unwrap();
    assert_eq!(summary.commits_discovered, 2);

    let run = fx.store.get_run("run-2").await.unwrap().unwrap();
    assert_eq!(run.counters.commits_processed, 2);
    assert_eq!(run.counters.file_changes_processed, 2);
    assert_eq!(run.counters.events_processed, 2);
    assert_eq!(fx.store.commit_count().await.unwrap(), 7);

    let changes = fx.store.file_changes(&first).await.unwrap();
    assert_eq!(changes.len(), 1);
    assert!(changes[0].is_sensitive);
}

#[cfg(unix)]
#[tokio::test]
async fn test_signed_objects_share_one_key() {
    let fx = Fixture::new();
    fx.tag_release();
    let signer_dir = TempDir::new().unwrap();
    let signer = fake_signer(signer_dir.path());

    fx.pipeline_with_signer(&signer).run("run-1").await.unwrap();

    let run = fx.store.get_run("run-1").await.unwrap().unwrap();
    assert_eq!(run.counters.signatures_processed, 6);
    assert_eq!(run.counters.signatures_found, 6);
    assert_eq!(fx.store.node_counts().await.unwrap().pgp_keys, 1);

    let signature = fx
        .store
        .signature_of(ObjectKind::Tag, "v0.1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(signature.fingerprint, FINGERPRINT);
    assert_eq!(signature.method, "gpg");
}

#[cfg(unix)]
#[tokio::test]
async fn test_signature_timeouts_count_as_unsigned() {
    let fx = Fixture::new();
    let signer_dir = TempDir::new().unwrap();
    let signer = hanging_signer(signer_dir.path());

    let summary = fx
        .pipeline_with_timeout(&signer, Duration::from_secs(1))
        .run("run-1")
        .await
        .unwrap();

    let signatures = summary.stage(STAGE_COMMIT_SIGNATURES).unwrap();
    assert_eq!(signatures.failed, 5);
    assert!(signatures.samples[0].contains("timed out"));

    let run = fx.store.get_run("run-1").await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.counters.signatures_processed, 5);
    assert_eq!(run.counters.signatures_found, 0);
    assert!(fx.store.commits_pending_signature().await.unwrap().is_empty());
    assert!(fx
        .store
        .signature_of(ObjectKind::Commit, &fx.sample.merge)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_runs_converge() {
    let single = Fixture::new();
    single.tag_release();
    single.pipeline().run("solo").await.unwrap();
    let expected = single.store.node_counts().await.unwrap();

    let fx = Fixture::new();
    fx.tag_release();
    let first = Arc::new(fx.pipeline());
    let second = Arc::new(fx.pipeline());
    let a = tokio::spawn(async move { first.run("a").await });
    let b = tokio::spawn(async move { second.run("b").await });
    let (a, b) = tokio::join!(a, b);
    a.unwrap().unwrap();
    b.unwrap().unwrap();

    let counts = fx.store.node_counts().await.unwrap();
    assert_eq!(counts.commits, expected.commits);
    assert_eq!(counts.identities, expected.identities);
    assert_eq!(counts.refs, expected.refs);
    assert_eq!(counts.tag_objects, expected.tag_objects);
    assert_eq!(counts.pgp_keys, expected.pgp_keys);
    assert_eq!(counts.file_changes, expected.file_changes);
    assert_eq!(counts.paths, expected.paths);
    assert_eq!(counts.events, expected.events);
    assert_eq!(counts.ref_states, expected.ref_states * 2);

    assert_eq!(
        fx.store.merged_includes(&fx.sample.merge).await.unwrap(),
        vec![fx.sample.consensus.clone()]
    );
    for hash in fx.sample.all() {
        assert_eq!(fx.store.file_changes(&hash).await.unwrap().len(), 1, "{}", hash);
    }
    for run_id in ["a", "b"] {
        let run = fx.store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }
}

/// Run store whose reads never see the backbone status.
struct StaleRuns(Arc<SqliteGraphStore>);

#[async_trait]
impl RunStore for StaleRuns {
    async fn ping(&self) -> Result<()> {
        self.0.ping().await
    }

    async fn create_run(&self, run: &IngestRun) -> Result<()> {
        self.0.create_run(run).await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<IngestRun>> {
        Ok(self.0.get_run(run_id).await?.map(|mut run| {
            run.status = RunStatus::Started;
            run
        }))
    }

    async fn set_run_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
        self.0.set_run_status(run_id, status).await
    }

    async fn set_run_stage(&self, run_id: &str, stage: Option<&str>) -> Result<()> {
        self.0.set_run_stage(run_id, stage).await
    }

    async fn add_progress(&self, run_id: &str, counter: RunCounter, amount: u64) -> Result<()> {
        self.0.add_progress(run_id, counter, amount).await
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<IngestRun>> {
        self.0.list_runs(limit).await
    }
}

#[tokio::test]
async fn test_unconfirmed_backbone_blocks_enrichment() {
    let fx = Fixture::new();
    fx.tag_release();
    let repo = GitRepository::open(fx.dir.path()).unwrap();
    let pipeline = Pipeline::new(
        repo,
        fx.store.clone(),
        Arc::new(StaleRuns(fx.store.clone())),
        fx.config.clone(),
    );

    match pipeline.run("run-1").await {
        Err(Error::Consistency {
            expected, found, ..
        }) => {
            assert_eq!(expected, "COMMITS_COMPLETE");
            assert_eq!(found, "STARTED");
        }
        other => panic!("expected consistency failure, got {:?}", other),
    }

    let counts = fx.store.node_counts().await.unwrap();
    assert_eq!(counts.commits, 5);
    assert_eq!(counts.refs, 0);
    assert_eq!(counts.tag_objects, 0);
    assert_eq!(counts.file_changes, 0);
    assert_eq!(counts.events, 0);
    assert_eq!(counts.pgp_keys, 0);
    assert!(fx.store.merged_includes(&fx.sample.merge).await.unwrap().is_empty());

    let run = fx.store.get_run("run-1").await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::CommitsComplete);
}

#[tokio::test]
async fn test_service_runs_in_background() {
    let fx = Fixture::new();
    let service = DefaultIngestService::new(fx.store.clone(), fx.config.clone());

    let run_id = service.start_run().await.unwrap();
    assert!(service.get_run_status(&run_id).await.unwrap().is_some());

    let mut status = None;
    for _ in 0..200 {
        let view = service.get_run_status(&run_id).await.unwrap().unwrap();
        if view.status == RunStatus::Completed {
            status = Some(view);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let view = status.expect("run did not complete");
    assert_eq!(view.counters.commits_processed, 5);

    // The task may still be logging after the status flips.
    let mut active = service.list_active_runs().await.unwrap();
    for _ in 0..100 {
        if active.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        active = service.list_active_runs().await.unwrap();
    }
    assert!(active.is_empty());

    let recent = service.recent_runs(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].run_id, run_id);
    assert!(service.get_run_status("missing").await.unwrap().is_none());
}
