//! Error types for CommitGraph.

use thiserror::Error;

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// CommitGraph error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A write batch failed and was rolled back as a unit.
    #[error("Batch {batch} ({rows} rows) failed: {source}")]
    BatchFailed {
        batch: usize,
        rows: usize,
        #[source]
        source: rusqlite::Error,
    },

    /// The store could not be reached after the configured retries.
    #[error("Store unreachable after {attempts} attempts: {message}")]
    Connectivity { attempts: u32, message: String },

    /// A persisted state did not match what was just written.
    #[error("Consistency check failed for run {run_id}: expected {expected}, found {found}")]
    Consistency {
        run_id: String,
        expected: String,
        found: String,
    },

    /// Storage layer failure outside of SQL execution
    #[error("Storage error: {0}")]
    Storage(String),

    /// Repository access error
    #[error("Repository error: {0}")]
    Repository(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
