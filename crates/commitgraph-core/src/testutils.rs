//! Test utilities for the commit graph.
//!
//! Provides reusable record fixtures.

use crate::model::{CommitRecord, IdentityKey, SignatureRecord};
use crate::storage::SqliteGraphStore;

/// Test fixture for creating sample records.
pub struct TestFixtures;

impl TestFixtures {
    /// A git identity with a derived address.
    pub fn identity(name: &str) -> IdentityKey {
        IdentityKey::new("git", name, format!("{}@example.com", name.to_lowercase()))
    }

    /// A located, unvalidated signature.
    pub fn signature() -> SignatureRecord {
        SignatureRecord {
            fingerprint: "0123456789ABCDEF0123456789ABCDEF01234567".into(),
            method: "gpg".into(),
            valid: None,
        }
    }
}

/// A commit whose hash is `id` left-padded with zeros to 40 characters.
pub fn commit(id: &str, parents: &[&str], author: &IdentityKey, at: i64) -> CommitRecord {
    let summary = format!("Commit {}", id);
    CommitRecord {
        hash: format!("{:0>40}", id),
        message: format!("{}\n", summary),
        summary,
        authored_at: at,
        committed_at: at,
        parents: parents.iter().map(|p| p.to_string()).collect(),
        author: author.clone(),
        committer: author.clone(),
        co_authors: Vec::new(),
    }
}

/// Create a temporary in-memory store for testing.
pub fn test_store() -> SqliteGraphStore {
    SqliteGraphStore::in_memory().expect("Failed to create in-memory store")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_fixture_pads_hash() {
        let alice = TestFixtures::identity("Alice");
        let c = commit("ab", &[], &alice, 10);
        assert_eq!(c.hash.len(), 40);
        assert!(c.hash.ends_with("ab"));
        assert_eq!(c.author.email, "alice@example.com");
    }
}
