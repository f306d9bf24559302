//! jit-core: implement Python functions and classes from their declarations.
//!
//! A declaration (signature plus docstring) is sent to a generative service,
//! which may read the source of the types it depends on, reason, and submit
//! candidate implementations. Each candidate is loaded and checked against
//! caller-supplied test predicates. Accepted and failed versions are
//! persisted as annotated Python files, and an accepted version is reused
//! for as long as the declaration and its tests stay unchanged.

pub mod config;
pub mod conversation;
pub mod errors;
pub mod evaluate;
pub mod models;
pub mod resolver;
pub mod source;
pub mod store;

use std::path::Path;

use tracing::info;

pub use config::JitConfig;
pub use conversation::Coder;
pub use errors::{JitError, JitResult};
pub use evaluate::python::{PythonEvaluator, PythonPredicate, PythonUnit};
pub use models::{SessionOptions, SynthesisOutcome, Synthesized, TestPredicate};

use conversation::OpenAiService;
use evaluate::formatter::{NoopFormatter, RuffFormatter};
use source::modules::PythonSource;
use store::VersionStore;

/// Implement `name` from `origin` using configuration from the environment.
pub fn implement(
    origin: impl AsRef<Path>,
    name: &str,
    tests: &[Box<dyn TestPredicate<PythonUnit>>],
    options: SessionOptions,
) -> JitResult<SynthesisOutcome<PythonUnit>> {
    let config = JitConfig::from_env()?;
    implement_with(&config, origin, name, tests, options)
}

/// Wire the shipped collaborators from `config` and run one session.
pub fn implement_with(
    config: &JitConfig,
    origin: impl AsRef<Path>,
    name: &str,
    tests: &[Box<dyn TestPredicate<PythonUnit>>],
    options: SessionOptions,
) -> JitResult<SynthesisOutcome<PythonUnit>> {
    let origin = origin.as_ref();
    let origin = if origin.is_absolute() {
        origin.to_path_buf()
    } else {
        config.project_root.join(origin)
    };

    let sources = PythonSource::new(&config.project_root, &origin);
    let declaration = sources.declaration(name)?;
    info!(
        "Synthesizing {} from {} with model {}",
        declaration.qualified_name,
        origin.display(),
        config.model
    );

    let coder = Coder::new(
        OpenAiService::from_config(config),
        PythonEvaluator::new(&config.python),
        sources,
        VersionStore::new(config.store_root(), &config.project_root),
    )
    .with_options(options);
    let mut coder = if config.format_enabled {
        coder.with_formatter(RuffFormatter::new(&config.formatter))
    } else {
        coder.with_formatter(NoopFormatter)
    };
    coder.run(&declaration, tests)
}
