//! Error types for the jit-core library.

/// Top-level error enum for the synthesis engine.
///
/// Only configuration problems and budget exhaustion are expected to reach
/// a caller during normal operation; everything else indicates broken input
/// files or a misbehaving collaborator.
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Declaration not found: {0}")]
    DeclarationNotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Rewrite error: {0}")]
    Rewrite(String),

    #[error("Maximum number of tries ({max_tries}) reached without passing tests")]
    Exhausted { max_tries: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl JitError {
    /// True for the terminal "retry budget used up" failure.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, JitError::Exhausted { .. })
    }
}

pub type JitResult<T> = Result<T, JitError>;
