//! Candidate evaluation: turning a generated code unit into a callable
//! object, and the import bookkeeping done before a unit is loaded.

pub mod formatter;
pub mod python;

use std::sync::LazyLock;

use indexmap::IndexSet;
use regex::Regex;

static IMPORT_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(import\s+\S.*|from\s+\S+\s+import\s+.+)$").unwrap());

/// A candidate unit that could not be loaded. The message is fed back to
/// the generative service verbatim.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Loads a code unit and extracts the named top-level symbol from it.
pub trait CandidateEvaluator {
    type Output;

    fn load(&self, unit: &str, symbol: &str) -> Result<Self::Output, CompileError>;
}

/// Move top-level import statements out of `code` into the import list.
///
/// The list is trimmed and deduplicated in first-seen order. Nested and
/// multi-line parenthesized imports stay where they are. When nothing is
/// hoisted the code is returned untouched.
pub fn hoist_imports(imports: &[String], code: &str) -> (Vec<String>, String) {
    let mut merged: IndexSet<String> = imports
        .iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();

    let mut kept = Vec::new();
    let mut hoisted = false;
    for line in code.lines() {
        let open_paren = line.contains('(') && !line.contains(')');
        if !open_paren && IMPORT_LINE_RE.is_match(line.trim_end()) {
            merged.insert(line.trim().to_string());
            hoisted = true;
        } else {
            kept.push(line);
        }
    }

    let imports: Vec<String> = merged.into_iter().collect();
    if !hoisted {
        return (imports, code.to_string());
    }

    let start = kept.iter().position(|l| !l.trim().is_empty()).unwrap_or(kept.len());
    let end = kept
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map_or(start, |i| i + 1);
    let mut body = kept[start..end].join("\n");
    if code.ends_with('\n') && !body.is_empty() {
        body.push('\n');
    }
    (imports, body)
}
