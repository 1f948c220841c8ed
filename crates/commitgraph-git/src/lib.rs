//! CommitGraph Git Integration
//!
//! Read-only access to repository history: ref enumeration, commit discovery,
//! merge ancestry, file change extraction and signature probing.

pub mod changes;
pub mod commit;
pub mod discovery;
pub mod merge;
pub mod relevant;
pub mod repository;
pub mod signature;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;

pub use changes::is_sensitive_path;
pub use relevant::RelevantCommits;
pub use repository::{GitError, GitRepository, RefInfo, Result};
pub use signature::{parse_gpg_fingerprint, SignatureExtractor, SignatureProbe};
