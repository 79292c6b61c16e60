//! Pattern deduplication
//!
//! Structurally identical snippets from different projects resolve to one
//! `CodePattern` node keyed by the SHA-256 of their normalized form. Each
//! sighting is kept as an occurrence with an `occurred_in` edge to its
//! project.
//!
//! Normalization is order-independent over lines: lowercase, strip `//`
//! and `#` comments, re-tokenize, drop blank lines, sort. Two snippets that
//! differ only in comments, spacing, case or line order share a signature.
//!
//! Uniqueness relies on the backend's unique index on the signature. A
//! create that loses the race comes back as a conflict and falls back to
//! the winner's node.

use std::sync::Arc;

use chrono::Utc;
use graph_state::{CodePattern, EdgeKind, MemoryBackend, MemoryEdge, PatternOccurrence};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::connector::ResilientConnector;
use crate::error::{MemoryError, MemoryResult};
use crate::metrics::METRICS;
use crate::monitor::OperationKind;
use crate::obs;

/// Content hash of a normalized structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternSignature {
    /// 64-char lowercase SHA-256 hex
    pub hash: String,
    /// Sorted normalized lines joined by `\n`
    pub normalized: String,
}

impl PatternSignature {
    pub fn short(&self) -> &str {
        &self.hash[..8.min(self.hash.len())]
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }
}

fn strip_comment(line: &str) -> &str {
    let cut = [line.find("//"), line.find('#')]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(line.len());
    &line[..cut]
}

/// Identifier, number and single-punctuation tokens; whitespace dropped.
fn tokenize_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    for c in line.chars() {
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
            continue;
        }
        if !word.is_empty() {
            tokens.push(std::mem::take(&mut word));
        }
        if !c.is_whitespace() {
            tokens.push(c.to_string());
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}

pub fn normalize_structure(structure: &str) -> Vec<String> {
    let lowered = structure.to_lowercase();
    let mut lines: Vec<String> = lowered
        .lines()
        .map(|line| tokenize_line(strip_comment(line)).join(" "))
        .filter(|line| !line.is_empty())
        .collect();
    lines.sort();
    lines
}

pub fn signature_of(structure: &str) -> PatternSignature {
    let lines = normalize_structure(structure);

    let mut hasher = Sha256::new();
    hasher.update(b"P");
    hasher.update(lines.len().to_string().as_bytes());
    hasher.update(b"\0");
    for line in &lines {
        hasher.update(b"L:");
        hasher.update(line.as_bytes());
        hasher.update(b"\0");
    }

    PatternSignature {
        hash: hex::encode(hasher.finalize()),
        normalized: lines.join("\n"),
    }
}

pub fn is_signature_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn check_hash(hash: &str) -> MemoryResult<()> {
    if is_signature_hash(hash) {
        Ok(())
    } else {
        Err(MemoryError::validation(format!(
            "'{hash}' is not a 64-character lowercase hex signature"
        )))
    }
}

#[derive(Clone)]
pub struct PatternEngine {
    backend: Arc<dyn MemoryBackend>,
    connector: Arc<ResilientConnector>,
    sample_len: usize,
}

impl PatternEngine {
    pub fn new(
        backend: Arc<dyn MemoryBackend>,
        connector: Arc<ResilientConnector>,
        sample_len: usize,
    ) -> Self {
        Self {
            backend,
            connector,
            sample_len,
        }
    }

    /// Resolve `signature` to its pattern node and record one occurrence.
    /// Returns the pattern id (the signature hash).
    #[instrument(skip(self, signature), fields(signature = %signature.short()))]
    pub async fn upsert_pattern(
        &self,
        signature: &PatternSignature,
        project_id: &str,
        example_record_id: &str,
    ) -> MemoryResult<String> {
        if signature.is_empty() {
            return Err(MemoryError::validation(
                "pattern structure is empty after normalization",
            ));
        }
        check_hash(&signature.hash)?;

        let created = self.resolve_node(signature).await?;
        if !created {
            METRICS.inc_patterns_deduplicated();
        }

        let backend = &self.backend;
        let occurrence = PatternOccurrence::new(&signature.hash, project_id, example_record_id);
        let occurrence = &occurrence;
        self.connector
            .call(OperationKind::Occurrence, move || async move {
                backend.add_occurrence(occurrence).await
            })
            .await?;

        let edge = MemoryEdge::new(&signature.hash, project_id, EdgeKind::OccurredIn);
        let edge = &edge;
        self.connector
            .call(OperationKind::Edge, move || async move {
                backend.insert_edge(edge).await
            })
            .await?;

        obs::emit_pattern_upserted(&signature.hash, project_id, created);
        Ok(signature.hash.clone())
    }

    /// Create the node, or find the existing one. `true` when created here.
    async fn resolve_node(&self, signature: &PatternSignature) -> MemoryResult<bool> {
        let backend = &self.backend;
        let candidate = CodePattern {
            signature: signature.hash.clone(),
            sample: signature.normalized.chars().take(self.sample_len).collect(),
            first_seen: Utc::now(),
        };
        let candidate = &candidate;

        let mut last_conflict = String::new();
        for attempt in 1..=2 {
            let created = self
                .connector
                .call(OperationKind::Pattern, move || async move {
                    backend.create_pattern(candidate).await
                })
                .await;

            match created {
                Ok(_) => return Ok(true),
                Err(MemoryError::Conflict(msg)) => {
                    if self.get_pattern(&signature.hash).await?.is_some() {
                        return Ok(false);
                    }
                    debug!(attempt, "Pattern create conflicted but no node is visible yet");
                    last_conflict = msg;
                }
                Err(e) => return Err(e),
            }
        }
        Err(MemoryError::Conflict(last_conflict))
    }

    /// Every occurrence of a signature, oldest first.
    pub async fn find_cross_project(&self, hash: &str) -> MemoryResult<Vec<PatternOccurrence>> {
        check_hash(hash)?;
        let backend = &self.backend;
        self.connector
            .call(OperationKind::Occurrence, move || async move {
                backend.occurrences(hash).await
            })
            .await
    }

    pub async fn get_pattern(&self, hash: &str) -> MemoryResult<Option<CodePattern>> {
        check_hash(hash)?;
        let backend = &self.backend;
        self.connector
            .call(OperationKind::Pattern, move || async move {
                backend.get_pattern(hash).await
            })
            .await
    }

    pub async fn list_patterns(&self) -> MemoryResult<Vec<CodePattern>> {
        let backend = &self.backend;
        self.connector
            .call(OperationKind::Pattern, move || async move {
                backend.list_patterns().await
            })
            .await
    }

    /// Distinct projects a pattern was seen in, in order of first sighting.
    pub async fn projects_for(&self, hash: &str) -> MemoryResult<Vec<String>> {
        let mut projects: Vec<String> = Vec::new();
        for occurrence in self.find_cross_project(hash).await? {
            if !projects.contains(&occurrence.project_id) {
                projects.push(occurrence.project_id);
            }
        }
        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_sha256_hex() {
        let sig = signature_of("fn main() {}");
        assert!(is_signature_hash(&sig.hash));
        assert_eq!(sig.short().len(), 8);
    }

    #[test]
    fn test_comments_case_and_spacing_ignored() {
        let a = signature_of("let x = retry(3); // three tries\nreturn x;");
        let b = signature_of("LET   x=retry( 3 );\n# shell-style note\n\n  return x ;");
        assert_eq!(a, b);
    }

    #[test]
    fn test_line_order_ignored() {
        let a = signature_of("open()\nread()\nclose()");
        let b = signature_of("close()\nopen()\nread()");
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_line_multiplicity_matters() {
        let once = signature_of("lock()");
        let twice = signature_of("lock()\nlock()");
        assert_ne!(once.hash, twice.hash);
    }

    #[test]
    fn test_different_structure_differs() {
        assert_ne!(
            signature_of("a + b").hash,
            signature_of("a - b").hash
        );
        // Token boundaries are preserved
        assert_ne!(signature_of("ab c").hash, signature_of("a bc").hash);
    }

    #[test]
    fn test_comment_only_structure_is_empty() {
        let sig = signature_of("// nothing\n# here\n   ");
        assert!(sig.is_empty());
    }

    #[test]
    fn test_normalized_form() {
        let sig = signature_of("B = 2\na=1 // set");
        assert_eq!(sig.normalized, "a = 1\nb = 2");
    }

    #[test]
    fn test_is_signature_hash() {
        assert!(is_signature_hash(&"a".repeat(64)));
        assert!(!is_signature_hash(&"A".repeat(64)));
        assert!(!is_signature_hash("abc"));
    }
}
