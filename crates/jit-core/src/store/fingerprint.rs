//! Content fingerprints used as cache keys.

use sha2::{Digest, Sha256};

use crate::models::{Declaration, TestPredicate};

/// SHA-256 hex digest over the declaration source followed by every test
/// predicate's source joined with newlines.
pub fn fingerprint_sources(declaration_source: &str, test_sources: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(declaration_source.as_bytes());
    hasher.update(test_sources.join("\n").as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn fingerprint<T>(declaration: &Declaration, tests: &[Box<dyn TestPredicate<T>>]) -> String {
    let sources: Vec<&str> = tests.iter().map(|t| t.source()).collect();
    fingerprint_sources(&declaration.source, &sources)
}
