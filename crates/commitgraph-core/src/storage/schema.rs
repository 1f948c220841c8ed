//! Versioned graph schema.
//!
//! The schema version lives in `PRAGMA user_version`. Each migration runs in
//! its own transaction and bumps the version on commit.

use crate::model::RepairReport;
use rusqlite::{Connection, Transaction};
use tracing::{info, warn};

/// Version a fully migrated store reports.
pub const SCHEMA_VERSION: i64 = 3;

/// Nodes are keyed tables, edges are tables unique on their identifying properties.
pub(crate) const BASE_SCHEMA: &str = r#"
    -- Commit nodes
    CREATE TABLE IF NOT EXISTS commits (
        hash              TEXT PRIMARY KEY,
        message           TEXT NOT NULL,
        summary           TEXT NOT NULL,
        authored_at       INTEGER NOT NULL,
        committed_at      INTEGER NOT NULL,
        is_merge          INTEGER NOT NULL DEFAULT 0,
        parents           TEXT NOT NULL DEFAULT '[]',
        signature_checked INTEGER NOT NULL DEFAULT 0,
        changes_checked   INTEGER NOT NULL DEFAULT 0,
        updated_at        TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE INDEX IF NOT EXISTS idx_commits_merge ON commits(is_merge);
    CREATE INDEX IF NOT EXISTS idx_commits_signature ON commits(signature_checked);

    -- Identity nodes and AUTHORED / COMMITTED / CO_AUTHORED edges
    CREATE TABLE IF NOT EXISTS identities (
        id      INTEGER PRIMARY KEY AUTOINCREMENT,
        source  TEXT NOT NULL,
        name    TEXT NOT NULL,
        email   TEXT NOT NULL,
        UNIQUE(source, name, email)
    );

    CREATE TABLE IF NOT EXISTS identity_edges (
        identity_id  INTEGER NOT NULL REFERENCES identities(id),
        commit_hash  TEXT NOT NULL,
        role         TEXT NOT NULL,
        at           INTEGER NOT NULL,
        UNIQUE(identity_id, commit_hash, role)
    );

    CREATE INDEX IF NOT EXISTS idx_identity_edges_commit ON identity_edges(commit_hash);

    -- PARENT edges; idx 0 is the first parent
    CREATE TABLE IF NOT EXISTS parent_edges (
        child_hash   TEXT NOT NULL,
        parent_hash  TEXT NOT NULL,
        idx          INTEGER NOT NULL,
        UNIQUE(child_hash, parent_hash, idx)
    );

    CREATE INDEX IF NOT EXISTS idx_parent_edges_parent ON parent_edges(parent_hash);

    -- Ref nodes and their append-only per-run snapshots
    CREATE TABLE IF NOT EXISTS refs (
        kind         TEXT NOT NULL,
        name         TEXT NOT NULL,
        remote       TEXT NOT NULL DEFAULT '',
        target       TEXT NOT NULL,
        target_kind  TEXT NOT NULL,
        updated_at   TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE(kind, name, remote)
    );

    CREATE TABLE IF NOT EXISTS ref_states (
        run_id       TEXT NOT NULL,
        kind         TEXT NOT NULL,
        name         TEXT NOT NULL,
        remote       TEXT NOT NULL DEFAULT '',
        target       TEXT NOT NULL,
        target_kind  TEXT NOT NULL,
        recorded_at  INTEGER NOT NULL,
        UNIQUE(run_id, kind, name, remote)
    );

    -- Annotated tags; TAG_OF and TAGGED_BY are carried as columns
    CREATE TABLE IF NOT EXISTS tag_objects (
        name               TEXT PRIMARY KEY,
        message            TEXT NOT NULL,
        tagger_id          INTEGER REFERENCES identities(id),
        tagger_at          INTEGER,
        target             TEXT NOT NULL,
        signature_checked  INTEGER NOT NULL DEFAULT 0
    );

    -- PGP keys and HAS_SIGNATURE edges
    CREATE TABLE IF NOT EXISTS pgp_keys (
        fingerprint    TEXT PRIMARY KEY,
        first_seen_at  TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS signatures (
        subject_kind  TEXT NOT NULL,
        subject_key   TEXT NOT NULL,
        fingerprint   TEXT NOT NULL REFERENCES pgp_keys(fingerprint),
        method        TEXT NOT NULL,
        valid         INTEGER,
        UNIQUE(subject_kind, subject_key, fingerprint)
    );

    CREATE INDEX IF NOT EXISTS idx_signatures_fingerprint ON signatures(fingerprint);

    -- Path nodes and FileChange nodes (uniqueness added by migration 3)
    CREATE TABLE IF NOT EXISTS paths (
        path  TEXT PRIMARY KEY
    );

    CREATE TABLE IF NOT EXISTS file_changes (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        commit_hash   TEXT NOT NULL,
        path          TEXT NOT NULL,
        status        TEXT NOT NULL,
        added         INTEGER NOT NULL DEFAULT 0,
        deleted       INTEGER NOT NULL DEFAULT 0,
        rename_from   TEXT,
        is_sensitive  INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_file_changes_path ON file_changes(path);

    -- MERGED_INCLUDES edges
    CREATE TABLE IF NOT EXISTS merged_includes (
        merge_hash   TEXT NOT NULL,
        commit_hash  TEXT NOT NULL,
        UNIQUE(merge_hash, commit_hash)
    );

    -- Event nodes and ABOUT edges
    CREATE TABLE IF NOT EXISTS events (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        event_type  TEXT NOT NULL,
        source      TEXT NOT NULL,
        timestamp   INTEGER NOT NULL,
        UNIQUE(event_type, source, timestamp)
    );

    CREATE TABLE IF NOT EXISTS about_edges (
        event_id       INTEGER NOT NULL REFERENCES events(id),
        artifact_kind  TEXT NOT NULL,
        artifact_key   TEXT NOT NULL,
        UNIQUE(event_id, artifact_kind, artifact_key)
    );

    CREATE INDEX IF NOT EXISTS idx_about_artifact ON about_edges(artifact_kind, artifact_key);

    -- Run records
    CREATE TABLE IF NOT EXISTS ingest_runs (
        run_id                  TEXT PRIMARY KEY,
        status                  TEXT NOT NULL,
        current_stage           TEXT,
        started_at              TEXT NOT NULL,
        last_progress_at        TEXT NOT NULL,
        completed_at            TEXT,
        commits_processed       INTEGER NOT NULL DEFAULT 0,
        refs_processed          INTEGER NOT NULL DEFAULT 0,
        file_changes_processed  INTEGER NOT NULL DEFAULT 0,
        events_processed        INTEGER NOT NULL DEFAULT 0,
        signatures_processed    INTEGER NOT NULL DEFAULT 0,
        signatures_found        INTEGER NOT NULL DEFAULT 0,
        merges_processed        INTEGER NOT NULL DEFAULT 0
    );
"#;

type Migration = fn(&Transaction<'_>) -> rusqlite::Result<()>;

const MIGRATIONS: &[(i64, &str, Migration)] = &[
    (1, "base schema", create_base_schema),
    (2, "fold legacy actors into identities", fold_legacy_actors),
    (3, "unique file changes", enforce_unique_file_changes),
];

/// Bring the store up to `SCHEMA_VERSION`. Returns the version found on open.
pub(crate) fn migrate(conn: &mut Connection) -> rusqlite::Result<i64> {
    let found: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if found > SCHEMA_VERSION {
        warn!(found, supported = SCHEMA_VERSION, "Store schema is newer than this build");
    }

    for (version, name, apply) in MIGRATIONS {
        if *version <= found {
            continue;
        }
        let tx = conn.transaction()?;
        apply(&tx)?;
        tx.pragma_update(None, "user_version", *version)?;
        tx.commit()?;
        info!(version = *version, migration = *name, "Applied schema migration");
    }

    Ok(found)
}

fn create_base_schema(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(BASE_SCHEMA)
}

/// Early stores labelled every person a generic `actors` node with no source.
fn fold_legacy_actors(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    if !table_exists(tx, "actors")? {
        return Ok(());
    }

    let folded = tx.execute(
        r#"
        INSERT INTO identities (source, name, email)
        SELECT 'git', COALESCE(name, ''), COALESCE(email, '') FROM actors WHERE true
        ON CONFLICT(source, name, email) DO NOTHING
        "#,
        [],
    )?;
    tx.execute("DROP TABLE actors", [])?;
    info!(folded, "Folded legacy actor nodes into identities");
    Ok(())
}

fn enforce_unique_file_changes(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    let report = repair_file_change_duplicates(tx)?;
    if report.duplicate_groups > 0 {
        warn!(
            groups = report.duplicate_groups,
            removed = report.removed,
            "Removed duplicate file change nodes before adding uniqueness"
        );
    }
    tx.execute_batch(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_file_changes_commit_path ON file_changes(commit_hash, path);",
    )
}

/// Keep the oldest node of every (commit, path) group and delete the rest.
pub(crate) fn repair_file_change_duplicates(conn: &Connection) -> rusqlite::Result<RepairReport> {
    let groups: i64 = conn.query_row(
        r#"
        SELECT COUNT(*) FROM (
            SELECT 1 FROM file_changes
            GROUP BY commit_hash, path
            HAVING COUNT(*) > 1
        )
        "#,
        [],
        |row| row.get(0),
    )?;

    if groups == 0 {
        return Ok(RepairReport::default());
    }

    let removed = conn.execute(
        r#"
        DELETE FROM file_changes
        WHERE id NOT IN (
            SELECT MIN(id) FROM file_changes GROUP BY commit_hash, path
        )
        "#,
        [],
    )?;

    Ok(RepairReport {
        duplicate_groups: groups as usize,
        removed,
    })
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
