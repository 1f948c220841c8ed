//! Signature extraction from `git show --show-signature` output.
//!
//! Signatures are located and fingerprinted, never validated. The tool may
//! print signature metadata on either stream, so both are scanned together.

use commitgraph_core::{ObjectKind, SignatureRecord};
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Literal markers whose presence means the object carries a signature.
const SIGNATURE_MARKERS: &[&str] = &[
    "gpg:",
    "Good signature",
    "Bad signature",
    "Primary key fingerprint:",
    "using RSA key",
    "using ECDSA key",
    "using EDDSA key",
    "using DSA key",
];

/// Fingerprint patterns, most specific first.
const FINGERPRINT_PATTERNS: &[&str] = &[
    r"(?i)Primary key fingerprint:\s*([0-9A-F]{4}(?:\s+[0-9A-F]{4}){9})",
    r"(?i)using\s+(?:RSA|ECDSA|EDDSA|DSA)\s+key\s+([0-9A-F]+)",
    r"(?i)(?:key\s+id|keyid|fingerprint)[\s:]*([0-9A-F]+)",
];

static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn patterns() -> &'static [Regex] {
    PATTERNS.get_or_init(|| {
        FINGERPRINT_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

fn is_fingerprint(candidate: &str) -> bool {
    candidate.len() == 40
        && candidate
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
}

/// Whether tool output mentions a signature at all.
pub fn has_signature_marker(output: &str) -> bool {
    SIGNATURE_MARKERS.iter().any(|marker| output.contains(marker))
}

/// Extract a 40-hex uppercase fingerprint from signature output.
///
/// Each pattern is tried in priority order. Matches are upper-cased with
/// whitespace removed; one that is not then exactly 40 hex characters is
/// discarded and the search moves on. There is no catch-all scan.
pub fn parse_gpg_fingerprint(output: &str) -> Option<String> {
    for pattern in patterns() {
        for caps in pattern.captures_iter(output) {
            let raw = &caps[1];
            let candidate = raw.split_whitespace().collect::<String>().to_uppercase();
            if is_fingerprint(&candidate) {
                return Some(candidate);
            }
            debug!(candidate = %candidate, "Discarding malformed fingerprint");
        }
    }
    None
}

/// Decode process output as UTF-8, falling back to Latin-1 so no byte is lost.
pub fn decode_lenient(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Outcome of probing one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureProbe {
    /// No signature markers in the output.
    Unsigned,
    Signed(SignatureRecord),
    /// Markers present but no well-formed fingerprint.
    Rejected,
    /// The tool could not be run or timed out.
    Failed(String),
}

impl SignatureProbe {
    /// Classify combined tool output.
    pub fn from_output(output: &str) -> Self {
        if !has_signature_marker(output) {
            return SignatureProbe::Unsigned;
        }
        match parse_gpg_fingerprint(output) {
            Some(fingerprint) => SignatureProbe::Signed(SignatureRecord {
                fingerprint,
                method: "gpg".to_string(),
                valid: None,
            }),
            None => SignatureProbe::Rejected,
        }
    }

    /// Signature to persist. Every outcome other than `Signed` is stored as unsigned.
    pub fn into_signature(self) -> Option<SignatureRecord> {
        match self {
            SignatureProbe::Signed(signature) => Some(signature),
            _ => None,
        }
    }
}

/// Runs the git binary against a working directory to show signed objects.
#[derive(Debug, Clone)]
pub struct SignatureExtractor {
    program: PathBuf,
    workdir: PathBuf,
    timeout: Duration,
}

impl SignatureExtractor {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("git"),
            workdir: workdir.into(),
            timeout,
        }
    }

    /// Use a different executable in place of `git`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Probe a commit (by hash) or annotated tag (by name).
    pub async fn probe(&self, kind: ObjectKind, key: &str) -> SignatureProbe {
        let object = match kind {
            ObjectKind::Commit => key.to_string(),
            ObjectKind::Tag => format!("refs/tags/{}", key),
        };

        match self.show_signature(&object).await {
            Ok(output) => SignatureProbe::from_output(&output),
            Err(reason) => SignatureProbe::Failed(reason),
        }
    }

    async fn show_signature(&self, object: &str) -> std::result::Result<String, String> {
        let child = Command::new(&self.program)
            .arg("show")
            .arg("--show-signature")
            .arg("--no-patch")
            .arg(object)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("spawn failed: {}", e))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| format!("wait failed: {}", e))?,
            Err(_) => return Err(format!("timed out after {:?}", self.timeout)),
        };

        let mut text = decode_lenient(&output.stdout);
        text.push('\n');
        text.push_str(&decode_lenient(&output.stderr));

        // Unverifiable signatures exit non-zero but still print what we need.
        if !output.status.success() {
            debug!(object, status = %output.status, "git show exited with failure");
        }
        Ok(text)
    }
}
