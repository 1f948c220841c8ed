//! Commit records built from git2 commits.

use commitgraph_core::{CommitRecord, IdentityKey};
use git2::{Commit, Signature};
use regex::Regex;
use std::sync::OnceLock;

static CO_AUTHOR: OnceLock<Option<Regex>> = OnceLock::new();

fn co_author_pattern() -> Option<&'static Regex> {
    CO_AUTHOR
        .get_or_init(|| Regex::new(r"(?im)^co-authored-by:\s*(.+?)\s*<([^>]*)>\s*$").ok())
        .as_ref()
}

/// Identity for a git signature. Non-UTF-8 names and emails are decoded lossily.
pub fn identity_of(signature: &Signature<'_>, source: &str) -> IdentityKey {
    IdentityKey::new(
        source,
        String::from_utf8_lossy(signature.name_bytes()).trim(),
        String::from_utf8_lossy(signature.email_bytes()).trim(),
    )
}

/// Identities named in `Co-authored-by:` trailers, in message order, without repeats.
pub fn parse_co_authors(message: &str, source: &str) -> Vec<IdentityKey> {
    let Some(pattern) = co_author_pattern() else {
        return Vec::new();
    };

    let mut found: Vec<IdentityKey> = Vec::new();
    for caps in pattern.captures_iter(message) {
        let identity = IdentityKey::new(source, caps[1].trim(), caps[2].trim());
        if !found.contains(&identity) {
            found.push(identity);
        }
    }
    found
}

/// Build a record from a git2 commit.
pub fn commit_record(commit: &Commit<'_>, source: &str) -> CommitRecord {
    let message = String::from_utf8_lossy(commit.message_bytes()).into_owned();
    let summary = message.lines().next().unwrap_or("").trim().to_string();

    CommitRecord {
        hash: commit.id().to_string(),
        co_authors: parse_co_authors(&message, source),
        message,
        summary,
        authored_at: commit.author().when().seconds(),
        committed_at: commit.committer().when().seconds(),
        parents: commit.parent_ids().map(|id| id.to_string()).collect(),
        author: identity_of(&commit.author(), source),
        committer: identity_of(&commit.committer(), source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_co_author_trailers() {
        let message = "Rework validation\n\nCo-authored-by: Dave <dave@example.com>\nco-authored-by:  Erin Q  <erin@example.com> \nCo-authored-by: Dave <dave@example.com>\n";
        let co_authors = parse_co_authors(message, "git");

        assert_eq!(co_authors.len(), 2);
        assert_eq!(co_authors[0], IdentityKey::new("git", "Dave", "dave@example.com"));
        assert_eq!(co_authors[1].name, "Erin Q");
    }

    #[test]
    fn test_trailer_must_start_a_line() {
        let message = "Mention Co-authored-by: Dave <dave@example.com> inline\n";
        assert!(parse_co_authors(message, "git").is_empty());
    }
}
