//! CommitGraph Core Library
//!
//! Records, run tracking, configuration and graph storage for the commit
//! fact graph.

pub mod config;
pub mod error;
pub mod model;
pub mod run;
pub mod service;
pub mod storage;

#[cfg(test)]
pub mod testutils;

pub use config::{IngestConfig, StoreConfig, DEFAULT_SENSITIVE_PATHS};
pub use error::{Error, Result};
pub use model::{
    ChangeStatus, CommitRecord, EventRecord, FileChangeRecord, IdentityKey, IdentityRole,
    NodeCounts, ObjectKind, RefKind, RefRecord, RefStateRecord, RepairReport, SignatureCheck,
    SignatureRecord, TagRecord,
};
pub use run::{IngestRun, RunCounter, RunCounters, RunStatus};
pub use storage::{GraphStore, RunStore, SqliteGraphStore, SCHEMA_VERSION};
