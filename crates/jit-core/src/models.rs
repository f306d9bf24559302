//! Shared typed models used across the source, conversation, and store layers.

use std::fmt;
use std::ops::Range;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Session defaults
// ---------------------------------------------------------------------------

/// Default number of failed submissions tolerated before a session gives up.
pub const DEFAULT_MAX_TRIES: usize = 5;

/// Upper bound on service turns per allowed attempt. Reasoning and reveal
/// turns do not consume attempts, so this caps a service that never submits.
pub const MAX_TURNS_PER_TRY: usize = 10;

// ---------------------------------------------------------------------------
// 1. Declaration
// ---------------------------------------------------------------------------

/// Whether a declaration is a free function/method or a class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeclarationKind {
    Function,
    Class,
}

impl fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclarationKind::Function => write!(f, "function"),
            DeclarationKind::Class => write!(f, "class"),
        }
    }
}

/// A function or class captured from its origin file as static data.
///
/// `source` is the text exactly as it appears in `origin` (decorators and
/// leading indentation included) and `span` is its byte range in that file,
/// which is what the in-place rewrite replaces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub qualified_name: String,
    pub kind: DeclarationKind,
    pub origin: PathBuf,
    pub source: String,
    pub span: Range<usize>,
    pub indent: String,
    /// Raw annotation expressions: parameter and return types for functions,
    /// field and method annotations for classes.
    pub annotations: Vec<String>,
}

// ---------------------------------------------------------------------------
// 2. Test predicates
// ---------------------------------------------------------------------------

/// Result of running one test predicate against a synthesized object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestOutcome {
    pub passed: bool,
    pub description: String,
}

impl TestOutcome {
    pub fn new(passed: bool, description: impl Into<String>) -> Self {
        Self {
            passed,
            description: description.into(),
        }
    }
}

/// A caller-supplied check run against every candidate.
///
/// `source` is the predicate's own text; it takes part in the content
/// fingerprint, so editing a test invalidates the cached implementation.
pub trait TestPredicate<T> {
    fn source(&self) -> &str;
    fn check(&self, target: &T) -> TestOutcome;
}

/// Predicate backed by a Rust closure plus the text that identifies it.
pub struct FnPredicate<F> {
    source: String,
    check: F,
}

impl<F> FnPredicate<F> {
    pub fn new(source: impl Into<String>, check: F) -> Self {
        Self {
            source: source.into(),
            check,
        }
    }
}

impl<T, F> TestPredicate<T> for FnPredicate<F>
where
    F: Fn(&T) -> (bool, String),
{
    fn source(&self) -> &str {
        &self.source
    }

    fn check(&self, target: &T) -> TestOutcome {
        let (passed, description) = (self.check)(target);
        TestOutcome {
            passed,
            description,
        }
    }
}

// ---------------------------------------------------------------------------
// 3. Session options and outcomes
// ---------------------------------------------------------------------------

/// The four caller-facing knobs of one synthesis session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// When false, the operator confirms every attempt after the first.
    pub autonomous: bool,
    /// Rewrite the origin file with the accepted code and ask for a relaunch.
    pub in_place: bool,
    pub max_tries: usize,
    /// Reuse a persisted implementation whose fingerprint still matches.
    pub reuse_cached: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            autonomous: true,
            in_place: false,
            max_tries: DEFAULT_MAX_TRIES,
            reuse_cached: true,
        }
    }
}

/// A loaded, tested implementation together with where it was persisted.
#[derive(Debug)]
pub struct Synthesized<T> {
    pub value: T,
    pub version: u32,
    pub fingerprint: String,
    pub artifact_path: PathBuf,
    pub from_cache: bool,
}

/// Terminal result of a session that did not fail.
#[derive(Debug)]
pub enum SynthesisOutcome<T> {
    Ready(Synthesized<T>),
    /// The operator declined to continue in interactive mode.
    Cancelled,
    /// The origin file was rewritten in place; the host should restart.
    Relaunch { rewritten: PathBuf },
}

impl<T> SynthesisOutcome<T> {
    pub fn into_ready(self) -> Option<Synthesized<T>> {
        match self {
            SynthesisOutcome::Ready(synthesized) => Some(synthesized),
            _ => None,
        }
    }
}
