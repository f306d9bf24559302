//! Source formatting of submitted code before it is merged and persisted.

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum FormatterError {
    #[error("formatter unavailable: {0}")]
    Unavailable(String),

    #[error("formatter failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait Formatter {
    fn format(&self, source: &str) -> Result<String, FormatterError>;
}

/// Leaves the source as submitted.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopFormatter;

impl Formatter for NoopFormatter {
    fn format(&self, source: &str) -> Result<String, FormatterError> {
        Ok(source.to_string())
    }
}

/// Runs `ruff format` over a temporary copy of the source.
#[derive(Clone, Debug)]
pub struct RuffFormatter {
    program: PathBuf,
}

impl Default for RuffFormatter {
    fn default() -> Self {
        Self::new("ruff")
    }
}

impl RuffFormatter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Formatter for RuffFormatter {
    fn format(&self, source: &str) -> Result<String, FormatterError> {
        let mut file = tempfile::Builder::new().suffix(".py").tempfile()?;
        file.write_all(source.as_bytes())?;
        file.flush()?;

        let output = Command::new(&self.program)
            .arg("format")
            .arg("--quiet")
            .arg(file.path())
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    FormatterError::Unavailable(format!("{} not found", self.program.display()))
                }
                _ => FormatterError::Io(e),
            })?;
        if !output.status.success() {
            return Err(FormatterError::Failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(std::fs::read_to_string(file.path())?)
    }
}

/// Format `source`, falling back to the unformatted text on any error.
pub fn format_or_passthrough(formatter: &dyn Formatter, source: &str) -> String {
    match formatter.format(source) {
        Ok(formatted) => formatted,
        Err(e) => {
            warn!("Skipping formatting: {e}");
            source.to_string()
        }
    }
}
