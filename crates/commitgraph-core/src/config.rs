//! Ingestion configuration.
//!
//! Every field has a default so a config file only needs to name what it changes.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Path prefixes whose changes are flagged as sensitive.
pub const DEFAULT_SENSITIVE_PATHS: &[&str] = &[
    "src/policy",
    "src/consensus",
    "src/rpc/mempool.cpp",
    "contrib/verify-commits",
    "contrib/verify-binaries",
];

/// Settings for a store connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection attempts before giving up
    pub max_retries: u32,
    /// Fixed delay between attempts, in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_ms: 2000,
        }
    }
}

impl StoreConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Configuration for an ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Repository to mine
    pub repo_path: PathBuf,
    /// Graph database path
    pub database: PathBuf,
    /// Rows per write transaction
    pub batch_size: usize,
    /// Upper bound for the full-log fallback scan during discovery
    pub commit_limit: Option<usize>,
    /// Prefixes flagged as sensitive in file changes
    pub sensitive_paths: Vec<String>,
    /// Hard timeout for each signature probe
    pub signature_timeout_secs: u64,
    /// Maximum commits visited per ancestry walk during merge analysis
    pub merge_walk_limit: usize,
    /// Source recorded on identities
    pub identity_source: String,
    /// Source recorded on synthetic events
    pub event_source: String,
    pub store: StoreConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from("."),
            database: PathBuf::from(".commitgraph/graph.db"),
            batch_size: 1000,
            commit_limit: None,
            sensitive_paths: DEFAULT_SENSITIVE_PATHS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            signature_timeout_secs: 10,
            merge_walk_limit: 100_000,
            identity_source: "git".to_string(),
            event_source: "git".to_string(),
            store: StoreConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Load a TOML config file. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than zero".into()));
        }
        if self.merge_walk_limit == 0 {
            return Err(Error::Config("merge_walk_limit must be greater than zero".into()));
        }
        if self.identity_source.is_empty() || self.event_source.is_empty() {
            return Err(Error::Config("identity and event sources must be named".into()));
        }
        Ok(())
    }

    pub fn signature_timeout(&self) -> Duration {
        Duration::from_secs(self.signature_timeout_secs)
    }
}
