//! Environment-driven configuration.
//!
//! | Variable                  | Default                       |
//! |---------------------------|-------------------------------|
//! | `JIT_IMPLEMENTATION_PATH` | `.jit_code`                   |
//! | `JIT_PROJECT_ROOT`        | current directory             |
//! | `JIT_API_KEY`             | `OPENAI_API_KEY`              |
//! | `JIT_MODEL`               | `gpt-4o-2024-08-06`           |
//! | `JIT_BASE_URL`            | `https://api.openai.com/v1`   |
//! | `JIT_TEMPERATURE`         | `0.0`                         |
//! | `JIT_TIMEOUT_SECS`        | `120`                         |
//! | `JIT_PYTHON`              | `python3`                     |
//! | `JIT_FORMAT`              | on (`0/false/no/off` disable) |
//! | `JIT_FORMATTER`           | `ruff`                        |

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{JitError, JitResult};

pub const DEFAULT_IMPLEMENTATION_PATH: &str = ".jit_code";
pub const DEFAULT_MODEL: &str = "gpt-4o-2024-08-06";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Clone, Debug, PartialEq)]
pub struct JitConfig {
    pub implementation_path: PathBuf,
    pub project_root: PathBuf,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub timeout: Duration,
    pub python: PathBuf,
    pub format_enabled: bool,
    pub formatter: String,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            implementation_path: PathBuf::from(DEFAULT_IMPLEMENTATION_PATH),
            project_root: PathBuf::from("."),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.0,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            python: PathBuf::from("python3"),
            format_enabled: true,
            formatter: "ruff".to_string(),
        }
    }
}

fn flag_enabled(value: Option<String>, default: bool) -> bool {
    match value {
        Some(val) => {
            let v = val.trim().to_lowercase();
            !matches!(v.as_str(), "0" | "false" | "no" | "off")
        }
        None => default,
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl JitConfig {
    pub fn from_env() -> JitResult<Self> {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;
        if config.project_root == PathBuf::from(".") {
            config.project_root = std::env::current_dir()?;
        }
        Ok(config)
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> JitResult<Self> {
        let defaults = Self::default();

        let temperature = match non_empty(lookup("JIT_TEMPERATURE")) {
            Some(raw) => raw
                .parse::<f32>()
                .map_err(|e| JitError::Config(format!("JIT_TEMPERATURE={raw}: {e}")))?,
            None => defaults.temperature,
        };
        let timeout = match non_empty(lookup("JIT_TIMEOUT_SECS")) {
            Some(raw) => Duration::from_secs(
                raw.parse::<u64>()
                    .map_err(|e| JitError::Config(format!("JIT_TIMEOUT_SECS={raw}: {e}")))?,
            ),
            None => defaults.timeout,
        };

        Ok(Self {
            implementation_path: non_empty(lookup("JIT_IMPLEMENTATION_PATH"))
                .map(|raw| expand_tilde(&raw))
                .unwrap_or(defaults.implementation_path),
            project_root: non_empty(lookup("JIT_PROJECT_ROOT"))
                .map(|raw| expand_tilde(&raw))
                .unwrap_or(defaults.project_root),
            api_key: non_empty(lookup("JIT_API_KEY"))
                .or_else(|| non_empty(lookup("OPENAI_API_KEY"))),
            model: non_empty(lookup("JIT_MODEL")).unwrap_or(defaults.model),
            base_url: non_empty(lookup("JIT_BASE_URL"))
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            temperature,
            timeout,
            python: non_empty(lookup("JIT_PYTHON"))
                .map(PathBuf::from)
                .unwrap_or(defaults.python),
            format_enabled: flag_enabled(lookup("JIT_FORMAT"), defaults.format_enabled),
            formatter: non_empty(lookup("JIT_FORMATTER")).unwrap_or(defaults.formatter),
        })
    }

    /// Artifact store root, anchored at the project root when relative.
    pub fn store_root(&self) -> PathBuf {
        if self.implementation_path.is_absolute() {
            self.implementation_path.clone()
        } else {
            self.project_root.join(&self.implementation_path)
        }
    }
}
