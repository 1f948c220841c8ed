//! SQLite graph store implementation.

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::model::{
    ChangeStatus, CommitRecord, EventRecord, FileChangeRecord, IdentityKey, NodeCounts,
    ObjectKind, RefKind, RefRecord, RefStateRecord, RepairReport, SignatureCheck,
    SignatureRecord, TagRecord,
};
use crate::run::{IngestRun, RunCounter, RunCounters, RunStatus};
use crate::storage::schema;
use crate::storage::traits::{GraphStore, RunStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

const UPSERT_COMMIT: &str = r#"
    INSERT INTO commits (hash, message, summary, authored_at, committed_at, is_merge, parents)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(hash) DO UPDATE SET
        message = excluded.message,
        summary = excluded.summary,
        authored_at = excluded.authored_at,
        committed_at = excluded.committed_at,
        is_merge = excluded.is_merge,
        parents = excluded.parents,
        updated_at = datetime('now')
"#;

const UPSERT_IDENTITY: &str = r#"
    INSERT INTO identities (source, name, email) VALUES (?1, ?2, ?3)
    ON CONFLICT(source, name, email) DO UPDATE SET email = excluded.email
    RETURNING id
"#;

const UPSERT_IDENTITY_EDGE: &str = r#"
    INSERT INTO identity_edges (identity_id, commit_hash, role, at) VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(identity_id, commit_hash, role) DO UPDATE SET at = excluded.at
"#;

const UPSERT_PARENT_EDGE: &str = r#"
    INSERT INTO parent_edges (child_hash, parent_hash, idx) VALUES (?1, ?2, ?3)
    ON CONFLICT(child_hash, parent_hash, idx) DO NOTHING
"#;

const UPSERT_REF: &str = r#"
    INSERT INTO refs (kind, name, remote, target, target_kind) VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(kind, name, remote) DO UPDATE SET
        target = excluded.target,
        target_kind = excluded.target_kind,
        updated_at = datetime('now')
"#;

const APPEND_REF_STATE: &str = r#"
    INSERT INTO ref_states (run_id, kind, name, remote, target, target_kind, recorded_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(run_id, kind, name, remote) DO NOTHING
"#;

// A tag moved to a new target needs its signature probed again.
const UPSERT_TAG: &str = r#"
    INSERT INTO tag_objects (name, message, tagger_id, tagger_at, target) VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(name) DO UPDATE SET
        message = excluded.message,
        tagger_id = excluded.tagger_id,
        tagger_at = excluded.tagger_at,
        signature_checked = CASE
            WHEN tag_objects.target = excluded.target THEN tag_objects.signature_checked
            ELSE 0
        END,
        target = excluded.target
"#;

const UPSERT_PATH: &str = "INSERT INTO paths (path) VALUES (?1) ON CONFLICT(path) DO NOTHING";

const UPSERT_FILE_CHANGE: &str = r#"
    INSERT INTO file_changes (commit_hash, path, status, added, deleted, rename_from, is_sensitive)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(commit_hash, path) DO UPDATE SET
        status = excluded.status,
        added = excluded.added,
        deleted = excluded.deleted,
        rename_from = excluded.rename_from,
        is_sensitive = excluded.is_sensitive
"#;

const UPSERT_EVENT: &str = r#"
    INSERT INTO events (event_type, source, timestamp) VALUES (?1, ?2, ?3)
    ON CONFLICT(event_type, source, timestamp) DO UPDATE SET source = excluded.source
    RETURNING id
"#;

const UPSERT_ABOUT_EDGE: &str = r#"
    INSERT INTO about_edges (event_id, artifact_kind, artifact_key) VALUES (?1, ?2, ?3)
    ON CONFLICT(event_id, artifact_kind, artifact_key) DO NOTHING
"#;

const UPSERT_PGP_KEY: &str =
    "INSERT INTO pgp_keys (fingerprint) VALUES (?1) ON CONFLICT(fingerprint) DO NOTHING";

const UPSERT_SIGNATURE: &str = r#"
    INSERT INTO signatures (subject_kind, subject_key, fingerprint, method, valid)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(subject_kind, subject_key, fingerprint) DO UPDATE SET
        method = excluded.method,
        valid = excluded.valid
"#;

const UPSERT_MERGED_INCLUDES: &str = r#"
    INSERT INTO merged_includes (merge_hash, commit_hash) VALUES (?1, ?2)
    ON CONFLICT(merge_hash, commit_hash) DO NOTHING
"#;

const RUN_COLUMNS: &str = r#"
    run_id, status, current_stage, started_at, last_progress_at, completed_at,
    commits_processed, refs_processed, file_changes_processed, events_processed,
    signatures_processed, signatures_found, merges_processed
"#;

/// SQLite-backed commit graph.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
    batch_size: usize,
}

impl SqliteGraphStore {
    /// Default rows per write transaction.
    pub const DEFAULT_BATCH_SIZE: usize = 1000;

    /// Open (or create) a store at the given path, migrating it to the current schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // WAL is unavailable on some filesystems; the default journal still works.
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode = WAL;") {
            debug!(error = %e, "WAL journal not enabled");
        }
        Self::from_connection(conn)
    }

    /// Open with bounded retries and a fixed delay between attempts.
    pub async fn connect(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        let attempts = config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match Self::open(path) {
                Ok(store) => {
                    info!(path = %path.display(), attempt, "Connected to graph store");
                    return Ok(store);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Graph store connection attempt failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(config.retry_delay()).await;
                    }
                }
            }
        }

        Err(Error::Connectivity {
            attempts,
            message: last_error,
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Override the number of rows written per transaction.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            batch_size: Self::DEFAULT_BATCH_SIZE,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("graph store connection mutex poisoned".into()))
    }

    /// Current schema version.
    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    /// Remove duplicate FileChange nodes left behind by non-idempotent imports.
    ///
    /// Migration 3 runs this once before adding the uniqueness constraint;
    /// steady-state ingestion never needs it.
    pub fn repair_file_change_duplicates(&self) -> Result<RepairReport> {
        let conn = self.lock()?;
        let report = schema::repair_file_change_duplicates(&conn)?;
        info!(
            groups = report.duplicate_groups,
            removed = report.removed,
            "File change repair pass finished"
        );
        Ok(report)
    }

    /// Write rows in bounded transactions. A failing row rolls back its whole batch.
    fn write_batches<T, F>(&self, label: &str, rows: &[T], mut write: F) -> Result<usize>
    where
        F: FnMut(&Connection, &T) -> rusqlite::Result<()>,
    {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let mut written = 0;
        for (batch, chunk) in rows.chunks(self.batch_size).enumerate() {
            let fail = |source| Error::BatchFailed {
                batch,
                rows: chunk.len(),
                source,
            };
            let tx = conn.transaction().map_err(fail)?;
            for row in chunk {
                write(&*tx, row).map_err(fail)?;
            }
            tx.commit().map_err(fail)?;
            written += chunk.len();
            debug!(label, batch, rows = chunk.len(), "Committed batch");
        }
        Ok(written)
    }

    fn query_strings(&self, sql: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn query_keyed_times(&self, sql: &str) -> Result<Vec<(String, i64)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn upsert_identity(conn: &Connection, identity: &IdentityKey) -> rusqlite::Result<i64> {
    conn.prepare_cached(UPSERT_IDENTITY)?.query_row(
        params![identity.source, identity.name, identity.email],
        |row| row.get(0),
    )
}

fn invalid_column(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unrecognized {}: {}", what, value).into(),
    )
}

fn parse_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<IngestRun> {
    let status: String = row.get(1)?;
    let started_at: String = row.get(3)?;
    let last_progress_at: String = row.get(4)?;
    let completed_at: Option<String> = row.get(5)?;

    Ok(IngestRun {
        run_id: row.get(0)?,
        status: RunStatus::parse(&status).ok_or_else(|| invalid_column(1, "run status", &status))?,
        current_stage: row.get(2)?,
        started_at: parse_time(3, &started_at)?,
        last_progress_at: parse_time(4, &last_progress_at)?,
        completed_at: completed_at.as_deref().map(|t| parse_time(5, t)).transpose()?,
        counters: RunCounters {
            commits_processed: row.get::<_, i64>(6)? as u64,
            refs_processed: row.get::<_, i64>(7)? as u64,
            file_changes_processed: row.get::<_, i64>(8)? as u64,
            events_processed: row.get::<_, i64>(9)? as u64,
            signatures_processed: row.get::<_, i64>(10)? as u64,
            signatures_found: row.get::<_, i64>(11)? as u64,
            merges_processed: row.get::<_, i64>(12)? as u64,
        },
    })
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn known_commit_hashes(&self) -> Result<HashSet<String>> {
        Ok(self
            .query_strings("SELECT hash FROM commits")?
            .into_iter()
            .collect())
    }

    async fn upsert_commits(&self, commits: &[CommitRecord]) -> Result<usize> {
        self.write_batches("commits", commits, |conn, commit| {
            let parents = serde_json::to_string(&commit.parents)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            conn.prepare_cached(UPSERT_COMMIT)?.execute(params![
                commit.hash,
                commit.message,
                commit.summary,
                commit.authored_at,
                commit.committed_at,
                commit.is_merge(),
                parents,
            ])?;

            for (identity, role, at) in commit.identity_edges() {
                let identity_id = upsert_identity(conn, identity)?;
                conn.prepare_cached(UPSERT_IDENTITY_EDGE)?.execute(params![
                    identity_id,
                    commit.hash,
                    role.as_str(),
                    at,
                ])?;
            }

            for (idx, parent) in commit.parents.iter().enumerate() {
                conn.prepare_cached(UPSERT_PARENT_EDGE)?
                    .execute(params![commit.hash, parent, idx as i64])?;
            }
            Ok(())
        })
    }

    async fn commit_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM commits", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn upsert_refs(&self, run_id: &str, refs: &[RefRecord]) -> Result<usize> {
        let recorded_at = Utc::now().timestamp();
        self.write_batches("refs", refs, |conn, r| {
            conn.prepare_cached(UPSERT_REF)?.execute(params![
                r.kind.as_str(),
                r.name,
                r.remote,
                r.target,
                r.target_kind.as_str(),
            ])?;
            conn.prepare_cached(APPEND_REF_STATE)?.execute(params![
                run_id,
                r.kind.as_str(),
                r.name,
                r.remote,
                r.target,
                r.target_kind.as_str(),
                recorded_at,
            ])?;
            Ok(())
        })
    }

    async fn upsert_tags(&self, tags: &[TagRecord]) -> Result<usize> {
        self.write_batches("tags", tags, |conn, tag| {
            let tagger_id = tag
                .tagger
                .as_ref()
                .map(|tagger| upsert_identity(conn, tagger))
                .transpose()?;
            conn.prepare_cached(UPSERT_TAG)?.execute(params![
                tag.name,
                tag.message,
                tagger_id,
                tag.tagger_at,
                tag.target,
            ])?;
            Ok(())
        })
    }

    async fn commits_pending_changes(&self) -> Result<Vec<String>> {
        self.query_strings(
            "SELECT hash FROM commits WHERE changes_checked = 0 ORDER BY committed_at, hash",
        )
    }

    async fn upsert_file_changes(
        &self,
        changes: &[FileChangeRecord],
        checked: &[String],
    ) -> Result<usize> {
        let written = self.write_batches("file_changes", changes, |conn, change| {
            conn.prepare_cached(UPSERT_PATH)?.execute(params![change.path])?;
            conn.prepare_cached(UPSERT_FILE_CHANGE)?.execute(params![
                change.commit_hash,
                change.path,
                change.status.as_str(),
                change.added,
                change.deleted,
                change.rename_from,
                change.is_sensitive,
            ])?;
            Ok(())
        })?;

        self.write_batches("changes_checked", checked, |conn, hash| {
            conn.prepare_cached("UPDATE commits SET changes_checked = 1 WHERE hash = ?1")?
                .execute(params![hash])?;
            Ok(())
        })?;

        Ok(written)
    }

    async fn commits_pending_events(&self) -> Result<Vec<(String, i64)>> {
        self.query_keyed_times(
            r#"
            SELECT c.hash, c.authored_at FROM commits c
            WHERE NOT EXISTS (
                SELECT 1 FROM about_edges a
                WHERE a.artifact_kind = 'commit' AND a.artifact_key = c.hash
            )
            ORDER BY c.authored_at, c.hash
            "#,
        )
    }

    async fn tags_pending_events(&self) -> Result<Vec<(String, i64)>> {
        self.query_keyed_times(
            r#"
            SELECT t.name, t.tagger_at FROM tag_objects t
            WHERE t.tagger_at IS NOT NULL AND NOT EXISTS (
                SELECT 1 FROM about_edges a
                WHERE a.artifact_kind = 'tag' AND a.artifact_key = t.name
            )
            ORDER BY t.tagger_at, t.name
            "#,
        )
    }

    async fn upsert_events(&self, events: &[EventRecord]) -> Result<usize> {
        self.write_batches("events", events, |conn, event| {
            let event_id: i64 = conn.prepare_cached(UPSERT_EVENT)?.query_row(
                params![event.event_type, event.source, event.timestamp],
                |row| row.get(0),
            )?;
            conn.prepare_cached(UPSERT_ABOUT_EDGE)?.execute(params![
                event_id,
                event.about_kind.as_str(),
                event.about_key,
            ])?;
            Ok(())
        })
    }

    async fn commits_pending_signature(&self) -> Result<Vec<String>> {
        self.query_strings(
            "SELECT hash FROM commits WHERE signature_checked = 0 ORDER BY committed_at, hash",
        )
    }

    async fn tags_pending_signature(&self) -> Result<Vec<String>> {
        self.query_strings("SELECT name FROM tag_objects WHERE signature_checked = 0 ORDER BY name")
    }

    async fn record_signatures(&self, checks: &[SignatureCheck]) -> Result<usize> {
        self.write_batches("signatures", checks, |conn, check| {
            if let Some(signature) = &check.signature {
                conn.prepare_cached(UPSERT_PGP_KEY)?
                    .execute(params![signature.fingerprint])?;
                conn.prepare_cached(UPSERT_SIGNATURE)?.execute(params![
                    check.kind.as_str(),
                    check.key,
                    signature.fingerprint,
                    signature.method,
                    signature.valid,
                ])?;
            }

            let mark = match check.kind {
                ObjectKind::Commit => "UPDATE commits SET signature_checked = 1 WHERE hash = ?1",
                ObjectKind::Tag => "UPDATE tag_objects SET signature_checked = 1 WHERE name = ?1",
            };
            conn.prepare_cached(mark)?.execute(params![check.key])?;
            Ok(())
        })
    }

    async fn unprocessed_merges(&self) -> Result<Vec<String>> {
        self.query_strings(
            r#"
            SELECT c.hash FROM commits c
            WHERE c.is_merge = 1 AND NOT EXISTS (
                SELECT 1 FROM merged_includes m WHERE m.merge_hash = c.hash
            )
            ORDER BY c.committed_at, c.hash
            "#,
        )
    }

    async fn upsert_merge_includes(&self, merges: &[(String, Vec<String>)]) -> Result<usize> {
        let mut edges = 0;
        self.write_batches("merged_includes", merges, |conn, (merge_hash, included)| {
            for commit_hash in included {
                conn.prepare_cached(UPSERT_MERGED_INCLUDES)?
                    .execute(params![merge_hash, commit_hash])?;
                edges += 1;
            }
            Ok(())
        })?;
        Ok(edges)
    }

    async fn merged_includes(&self, merge_hash: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT commit_hash FROM merged_includes WHERE merge_hash = ?1 ORDER BY commit_hash",
        )?;
        let hashes = stmt
            .query_map(params![merge_hash], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(hashes)
    }

    async fn file_changes(&self, commit_hash: &str) -> Result<Vec<FileChangeRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT commit_hash, path, status, added, deleted, rename_from, is_sensitive
            FROM file_changes WHERE commit_hash = ?1 ORDER BY path
            "#,
        )?;
        let changes = stmt
            .query_map(params![commit_hash], |row| {
                let status: String = row.get(2)?;
                Ok(FileChangeRecord {
                    commit_hash: row.get(0)?,
                    path: row.get(1)?,
                    status: ChangeStatus::parse(&status)
                        .ok_or_else(|| invalid_column(2, "change status", &status))?,
                    added: row.get(3)?,
                    deleted: row.get(4)?,
                    rename_from: row.get(5)?,
                    is_sensitive: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(changes)
    }

    async fn signature_of(&self, kind: ObjectKind, key: &str) -> Result<Option<SignatureRecord>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            r#"
            SELECT fingerprint, method, valid FROM signatures
            WHERE subject_kind = ?1 AND subject_key = ?2
            ORDER BY fingerprint LIMIT 1
            "#,
            params![kind.as_str(), key],
            |row| {
                Ok(SignatureRecord {
                    fingerprint: row.get(0)?,
                    method: row.get(1)?,
                    valid: row.get(2)?,
                })
            },
        );

        match result {
            Ok(signature) => Ok(Some(signature)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn ref_states(&self, run_id: &str) -> Result<Vec<RefStateRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT run_id, kind, name, remote, target, recorded_at FROM ref_states
            WHERE run_id = ?1 ORDER BY kind, remote, name
            "#,
        )?;
        let states = stmt
            .query_map(params![run_id], |row| {
                let kind: String = row.get(1)?;
                Ok(RefStateRecord {
                    run_id: row.get(0)?,
                    kind: RefKind::parse(&kind).ok_or_else(|| invalid_column(1, "ref kind", &kind))?,
                    name: row.get(2)?,
                    remote: row.get(3)?,
                    target: row.get(4)?,
                    recorded_at: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(states)
    }

    async fn node_counts(&self) -> Result<NodeCounts> {
        let conn = self.lock()?;
        let count = |table: &str| -> rusqlite::Result<usize> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|c| c as usize)
        };

        Ok(NodeCounts {
            commits: count("commits")?,
            identities: count("identities")?,
            refs: count("refs")?,
            ref_states: count("ref_states")?,
            tag_objects: count("tag_objects")?,
            pgp_keys: count("pgp_keys")?,
            file_changes: count("file_changes")?,
            paths: count("paths")?,
            events: count("events")?,
            ingest_runs: count("ingest_runs")?,
        })
    }
}

#[async_trait]
impl RunStore for SqliteGraphStore {
    async fn ping(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| Error::Connectivity {
                attempts: 1,
                message: e.to_string(),
            })
    }

    async fn create_run(&self, run: &IngestRun) -> Result<()> {
        let conn = self.lock()?;
        // Re-using a run id starts that record over.
        conn.execute(
            r#"
            INSERT INTO ingest_runs (run_id, status, current_stage, started_at, last_progress_at)
            VALUES (?1, ?2, NULL, ?3, ?4)
            ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                current_stage = NULL,
                started_at = excluded.started_at,
                last_progress_at = excluded.last_progress_at,
                completed_at = NULL,
                commits_processed = 0,
                refs_processed = 0,
                file_changes_processed = 0,
                events_processed = 0,
                signatures_processed = 0,
                signatures_found = 0,
                merges_processed = 0
            "#,
            params![
                run.run_id,
                run.status.as_str(),
                run.started_at.to_rfc3339(),
                run.last_progress_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<IngestRun>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            &format!("SELECT {} FROM ingest_runs WHERE run_id = ?1", RUN_COLUMNS),
            params![run_id],
            run_from_row,
        );

        match result {
            Ok(run) => Ok(Some(run)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_run_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let updated = conn.execute(
            r#"
            UPDATE ingest_runs SET
                status = ?2,
                last_progress_at = ?3,
                completed_at = CASE WHEN ?2 = 'COMPLETED' THEN ?3 ELSE completed_at END
            WHERE run_id = ?1
            "#,
            params![run_id, status.as_str(), now],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("run {}", run_id)));
        }
        Ok(())
    }

    async fn set_run_stage(&self, run_id: &str, stage: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE ingest_runs SET current_stage = ?2 WHERE run_id = ?1",
            params![run_id, stage],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("run {}", run_id)));
        }
        Ok(())
    }

    async fn add_progress(&self, run_id: &str, counter: RunCounter, amount: u64) -> Result<()> {
        let conn = self.lock()?;
        let column = counter.column();
        let updated = conn.execute(
            &format!(
                "UPDATE ingest_runs SET {col} = {col} + ?2, last_progress_at = ?3 WHERE run_id = ?1",
                col = column
            ),
            params![run_id, amount as i64, Utc::now().to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("run {}", run_id)));
        }
        Ok(())
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<IngestRun>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM ingest_runs ORDER BY started_at DESC, run_id LIMIT ?1",
            RUN_COLUMNS
        ))?;
        let runs = stmt
            .query_map(params![limit as i64], run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{commit, TestFixtures};

    #[tokio::test]
    async fn test_commit_upsert_is_idempotent() {
        let storage = SqliteGraphStore::in_memory().unwrap();
        let alice = TestFixtures::identity("Alice");
        let root = commit("1", &[], &alice, 100);
        let child = commit("2", &[&root.hash], &alice, 200);

        storage.upsert_commits(&[root.clone(), child.clone()]).await.unwrap();
        let first = storage.node_counts().await.unwrap();

        storage.upsert_commits(&[child, root]).await.unwrap();
        let second = storage.node_counts().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.commits, 2);
        assert_eq!(second.identities, 1);
    }

    #[tokio::test]
    async fn test_parent_edges_keep_order_without_parent_nodes() {
        let storage = SqliteGraphStore::in_memory().unwrap();
        let alice = TestFixtures::identity("Alice");
        let first = "a".repeat(40);
        let second = "b".repeat(40);
        let merge = commit("3", &[&first, &second], &alice, 300);

        // Parents are unknown; persisting the merge first must not create stubs.
        storage.upsert_commits(&[merge.clone()]).await.unwrap();
        assert_eq!(storage.commit_count().await.unwrap(), 1);

        let conn = storage.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT parent_hash, idx FROM parent_edges WHERE child_hash = ?1 ORDER BY idx")
            .unwrap();
        let edges: Vec<(String, i64)> = stmt
            .query_map(params![merge.hash], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(edges, vec![(first, 0), (second, 1)]);
    }

    #[tokio::test]
    async fn test_small_batches_write_everything() {
        let storage = SqliteGraphStore::in_memory().unwrap().with_batch_size(2);
        let bob = TestFixtures::identity("Bob");
        let commits: Vec<_> = (0..5)
            .map(|i| commit(&i.to_string(), &[], &bob, 100 + i))
            .collect();

        let written = storage.upsert_commits(&commits).await.unwrap();
        assert_eq!(written, 5);
        assert_eq!(storage.commit_count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_signature_marker_covers_unsigned_commits() {
        let storage = SqliteGraphStore::in_memory().unwrap();
        let alice = TestFixtures::identity("Alice");
        let signed = commit("1", &[], &alice, 100);
        let unsigned = commit("2", &[&signed.hash], &alice, 200);
        storage.upsert_commits(&[signed.clone(), unsigned.clone()]).await.unwrap();

        assert_eq!(storage.commits_pending_signature().await.unwrap().len(), 2);

        let checks = vec![
            SignatureCheck {
                kind: ObjectKind::Commit,
                key: signed.hash.clone(),
                signature: Some(TestFixtures::signature()),
            },
            SignatureCheck {
                kind: ObjectKind::Commit,
                key: unsigned.hash.clone(),
                signature: None,
            },
        ];
        storage.record_signatures(&checks).await.unwrap();
        storage.record_signatures(&checks).await.unwrap();

        assert!(storage.commits_pending_signature().await.unwrap().is_empty());
        let found = storage
            .signature_of(ObjectKind::Commit, &signed.hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.fingerprint, TestFixtures::signature().fingerprint);
        assert_eq!(found.valid, None);
        assert!(storage
            .signature_of(ObjectKind::Commit, &unsigned.hash)
            .await
            .unwrap()
            .is_none());
        assert_eq!(storage.node_counts().await.unwrap().pgp_keys, 1);
    }

    #[tokio::test]
    async fn test_merge_marker_requires_an_edge() {
        let storage = SqliteGraphStore::in_memory().unwrap();
        let alice = TestFixtures::identity("Alice");
        let base = commit("1", &[], &alice, 100);
        let side = commit("2", &[&base.hash], &alice, 200);
        let merge = commit("3", &[&base.hash, &side.hash], &alice, 300);
        storage
            .upsert_commits(&[base, side.clone(), merge.clone()])
            .await
            .unwrap();

        assert_eq!(storage.unprocessed_merges().await.unwrap(), vec![merge.hash.clone()]);

        let edges = storage
            .upsert_merge_includes(&[(merge.hash.clone(), vec![side.hash.clone()])])
            .await
            .unwrap();
        assert_eq!(edges, 1);
        assert!(storage.unprocessed_merges().await.unwrap().is_empty());
        assert_eq!(storage.merged_includes(&merge.hash).await.unwrap(), vec![side.hash]);
    }

    #[tokio::test]
    async fn test_ref_states_are_append_only_per_run() {
        let storage = SqliteGraphStore::in_memory().unwrap();
        let main = |target: &str| RefRecord {
            kind: RefKind::Branch,
            name: "main".into(),
            remote: String::new(),
            target: target.into(),
            target_kind: ObjectKind::Commit,
        };

        storage.upsert_refs("run-1", &[main("aaa")]).await.unwrap();
        // Same run, moved tip: the snapshot is not rewritten.
        storage.upsert_refs("run-1", &[main("bbb")]).await.unwrap();
        storage.upsert_refs("run-2", &[main("ccc")]).await.unwrap();

        let first = storage.ref_states("run-1").await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].target, "aaa");
        assert_eq!(storage.ref_states("run-2").await.unwrap()[0].target, "ccc");

        let counts = storage.node_counts().await.unwrap();
        assert_eq!(counts.refs, 1);
        assert_eq!(counts.ref_states, 2);
    }

    #[tokio::test]
    async fn test_moved_tag_is_probed_again() {
        let storage = SqliteGraphStore::in_memory().unwrap();
        let tag = |target: &str| TagRecord {
            name: "v1.0".into(),
            message: "release".into(),
            tagger: Some(TestFixtures::identity("Alice")),
            tagger_at: Some(500),
            target: target.into(),
        };

        storage.upsert_tags(&[tag("aaa")]).await.unwrap();
        storage
            .record_signatures(&[SignatureCheck {
                kind: ObjectKind::Tag,
                key: "v1.0".into(),
                signature: None,
            }])
            .await
            .unwrap();
        assert!(storage.tags_pending_signature().await.unwrap().is_empty());

        storage.upsert_tags(&[tag("aaa")]).await.unwrap();
        assert!(storage.tags_pending_signature().await.unwrap().is_empty());

        storage.upsert_tags(&[tag("bbb")]).await.unwrap();
        assert_eq!(storage.tags_pending_signature().await.unwrap(), vec!["v1.0".to_string()]);
    }

    #[tokio::test]
    async fn test_file_changes_upsert_and_mark_checked() {
        let storage = SqliteGraphStore::in_memory().unwrap();
        let carol = TestFixtures::identity("Carol");
        let c = commit("1", &[], &carol, 100);
        storage.upsert_commits(&[c.clone()]).await.unwrap();

        let change = FileChangeRecord {
            commit_hash: c.hash.clone(),
            path: "src/consensus/consensus.cpp".into(),
            status: ChangeStatus::Added,
            added: 1,
            deleted: 0,
            rename_from: None,
            is_sensitive: true,
        };
        storage
            .upsert_file_changes(&[change.clone()], &[c.hash.clone()])
            .await
            .unwrap();
        storage
            .upsert_file_changes(&[change.clone()], &[c.hash.clone()])
            .await
            .unwrap();

        assert_eq!(storage.file_changes(&c.hash).await.unwrap(), vec![change]);
        assert!(storage.commits_pending_changes().await.unwrap().is_empty());
        let counts = storage.node_counts().await.unwrap();
        assert_eq!(counts.file_changes, 1);
        assert_eq!(counts.paths, 1);
    }

    #[tokio::test]
    async fn test_events_link_commits_sharing_a_timestamp() {
        let storage = SqliteGraphStore::in_memory().unwrap();
        let dave = TestFixtures::identity("Dave");
        let a = commit("1", &[], &dave, 100);
        let b = commit("2", &[], &dave, 100);
        storage.upsert_commits(&[a.clone(), b.clone()]).await.unwrap();

        let events: Vec<_> = storage
            .commits_pending_events()
            .await
            .unwrap()
            .into_iter()
            .map(|(hash, at)| EventRecord {
                event_type: "commit_authored".into(),
                source: "git".into(),
                timestamp: at,
                about_kind: ObjectKind::Commit,
                about_key: hash,
            })
            .collect();
        assert_eq!(events.len(), 2);

        storage.upsert_events(&events).await.unwrap();
        assert!(storage.commits_pending_events().await.unwrap().is_empty());
        // One event keyed by (type, source, timestamp) about both commits.
        assert_eq!(storage.node_counts().await.unwrap().events, 1);
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let storage = SqliteGraphStore::in_memory().unwrap();
        let run = IngestRun::new("run-1");
        storage.create_run(&run).await.unwrap();

        storage.add_progress("run-1", RunCounter::Commits, 5).await.unwrap();
        storage
            .set_run_status("run-1", RunStatus::CommitsComplete)
            .await
            .unwrap();
        storage.set_run_stage("run-1", Some("refs")).await.unwrap();
        storage.add_progress("run-1", RunCounter::Refs, 2).await.unwrap();

        let live = storage.get_run("run-1").await.unwrap().unwrap();
        assert_eq!(live.status, RunStatus::CommitsComplete);
        assert_eq!(live.current_stage.as_deref(), Some("refs"));
        assert_eq!(live.counters.commits_processed, 5);
        assert_eq!(live.counters.refs_processed, 2);
        assert!(live.completed_at.is_none());

        storage.set_run_status("run-1", RunStatus::Completed).await.unwrap();
        let done = storage.get_run("run-1").await.unwrap().unwrap();
        assert!(done.completed_at.is_some());

        assert!(storage.get_run("missing").await.unwrap().is_none());
        assert!(matches!(
            storage.set_run_status("missing", RunStatus::Completed).await,
            Err(Error::NotFound(_))
        ));
    }
}
