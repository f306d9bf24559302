//! Persisted artifact format.
//!
//! An artifact is a Python file whose header comments record the version,
//! test status, origin and fingerprint, followed by the optional reasoning
//! trace, the imports and the implementation. It doubles as the cache
//! payload: the sections are parsed back to rebuild the loadable unit.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::errors::{JitError, JitResult};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const CHAIN_OF_THOUGHT_MARKER: &str = "# Chain of Thought:\n";
const IMPORTS_MARKER: &str = "# Imports\n";
const IMPLEMENTATION_MARKER: &str = "# Implementation\n";

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^# Version: (\d+) - Generated on (\S+)\s*$").unwrap());

static PASSED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^# Tests Passed: (\w+)\s*$").unwrap());

static FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^# Declaration File: (.*)$").unwrap());

static CHECKSUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^# Implementation Checksum: (\w+)").unwrap());

/// Join imports and implementation into one loadable unit.
pub fn merge_unit(imports: &[String], code: &str) -> String {
    if imports.is_empty() {
        code.to_string()
    } else {
        format!("{}\n\n{}", imports.join("\n"), code)
    }
}

/// Only the checksum line, for callers that just need cache validity.
pub fn read_checksum(text: &str) -> Option<&str> {
    CHECKSUM_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub tests_passed: bool,
    pub declaration_file: String,
    pub checksum: String,
    pub chain_of_thought: Vec<String>,
    pub imports: Vec<String>,
    pub code: String,
}

impl Artifact {
    pub fn unit(&self) -> String {
        merge_unit(&self.imports, &self.code)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "# Version: {} - Generated on {}\n\n",
            self.version,
            self.timestamp.format(TIMESTAMP_FORMAT)
        ));
        out.push_str(&format!(
            "# Tests Passed: {}\n\n",
            if self.tests_passed { "PASSED" } else { "FAILED" }
        ));
        out.push_str(&format!("# Declaration File: {}\n", self.declaration_file));
        out.push_str(&format!("# Implementation Checksum: {}\n\n", self.checksum));

        let notes = self.chain_of_thought.join("\n");
        if !notes.trim().is_empty() {
            out.push_str(CHAIN_OF_THOUGHT_MARKER);
            for line in notes.lines() {
                let commented = format!("# {line}");
                out.push_str(commented.trim_end());
                out.push('\n');
            }
            out.push('\n');
        }

        if !self.imports.is_empty() {
            out.push_str(IMPORTS_MARKER);
            out.push_str(&self.imports.join("\n"));
            out.push_str("\n\n");
        }

        out.push_str(IMPLEMENTATION_MARKER);
        out.push_str(&self.code);
        out.push('\n');
        out
    }

    pub fn parse(text: &str) -> JitResult<Self> {
        let missing = |field: &str| JitError::Store(format!("artifact is missing {field}"));

        let version_caps = VERSION_RE.captures(text).ok_or_else(|| missing("version"))?;
        let version = version_caps[1]
            .parse::<u32>()
            .map_err(|e| JitError::Store(format!("bad version: {e}")))?;
        let timestamp = NaiveDateTime::parse_from_str(&version_caps[2], TIMESTAMP_FORMAT)
            .map_err(|e| JitError::Store(format!("bad timestamp: {e}")))?
            .and_utc();
        let tests_passed = PASSED_RE
            .captures(text)
            .map(|caps| caps[1].eq_ignore_ascii_case("PASSED"))
            .ok_or_else(|| missing("test status"))?;
        let declaration_file = FILE_RE
            .captures(text)
            .map(|caps| caps[1].trim().to_string())
            .ok_or_else(|| missing("declaration file"))?;
        let checksum_line = CHECKSUM_RE.captures(text).ok_or_else(|| missing("checksum"))?;
        let checksum = checksum_line[1].to_string();

        // Sections are read in order; a note line may look like a marker.
        let header_end = checksum_line.get(0).map_or(0, |m| m.end());
        let mut cursor = skip_blank_lines(text, line_end(text, header_end));

        let mut chain_of_thought = Vec::new();
        if text[cursor..].starts_with(CHAIN_OF_THOUGHT_MARKER) {
            cursor += CHAIN_OF_THOUGHT_MARKER.len();
            for line in text[cursor..].split_inclusive('\n') {
                let Some(note) = line.trim_end_matches('\n').strip_prefix('#') else {
                    break;
                };
                chain_of_thought.push(note.strip_prefix(' ').unwrap_or(note).to_string());
                cursor += line.len();
            }
            cursor = skip_blank_lines(text, cursor);
        }

        let mut imports = Vec::new();
        if text[cursor..].starts_with(IMPORTS_MARKER) {
            cursor += IMPORTS_MARKER.len();
            for line in text[cursor..].split_inclusive('\n') {
                let import = line.trim_end();
                if import.is_empty() {
                    break;
                }
                imports.push(import.to_string());
                cursor += line.len();
            }
            cursor = skip_blank_lines(text, cursor);
        }

        if !text[cursor..].starts_with(IMPLEMENTATION_MARKER) {
            return Err(missing("implementation"));
        }
        let body = &text[cursor + IMPLEMENTATION_MARKER.len()..];
        let code = body.strip_suffix('\n').unwrap_or(body).to_string();

        Ok(Self {
            version,
            timestamp,
            tests_passed,
            declaration_file,
            checksum,
            chain_of_thought,
            imports,
            code,
        })
    }
}

/// Offset just past the newline ending the line that contains `at`.
fn line_end(text: &str, at: usize) -> usize {
    text[at..].find('\n').map_or(text.len(), |i| at + i + 1)
}

fn skip_blank_lines(text: &str, mut at: usize) -> usize {
    while text[at..].starts_with('\n') {
        at += 1;
    }
    at
}
