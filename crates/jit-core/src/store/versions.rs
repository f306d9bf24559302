//! Filesystem layout of persisted artifacts.
//!
//! The accepted implementation of `pkg/geometry.py::area` lives at
//! `<root>/pkg/geometry/area.py`; failed attempts sit next to it as
//! `area.v01_failed.py`, `area.v02_failed.py`, and so on.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::JitResult;
use crate::models::Declaration;
use crate::store::artifact::Artifact;

#[derive(Clone, Debug)]
pub struct VersionStore {
    root: PathBuf,
    project_root: PathBuf,
}

impl VersionStore {
    pub fn new(root: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            project_root: project_root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory mirroring the declaration's origin file, extension dropped.
    fn directory(&self, declaration: &Declaration) -> PathBuf {
        let origin = &declaration.origin;
        let relative: PathBuf = match origin.strip_prefix(&self.project_root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => origin
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .collect(),
        };
        self.root.join(relative.with_extension(""))
    }

    /// Slot of the accepted implementation.
    pub fn slot(&self, declaration: &Declaration) -> PathBuf {
        self.directory(declaration)
            .join(format!("{}.py", declaration.qualified_name))
    }

    pub fn failed_slot(&self, declaration: &Declaration, version: u32) -> PathBuf {
        self.directory(declaration)
            .join(format!("{}.v{version:02}_failed.py", declaration.qualified_name))
    }

    pub fn exists(&self, declaration: &Declaration) -> bool {
        self.slot(declaration).is_file()
    }

    /// Persist `artifact`, choosing the slot from its test status.
    pub fn write(&self, declaration: &Declaration, artifact: &Artifact) -> JitResult<PathBuf> {
        let path = if artifact.tests_passed {
            self.slot(declaration)
        } else {
            self.failed_slot(declaration, artifact.version)
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, artifact.render())?;
        debug!("Wrote {}", path.display());
        Ok(path)
    }

    /// The accepted artifact, if one exists and can be parsed.
    pub fn read(&self, declaration: &Declaration) -> JitResult<Option<Artifact>> {
        let path = self.slot(declaration);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        match Artifact::parse(&text) {
            Ok(artifact) => Ok(Some(artifact)),
            Err(e) => {
                warn!("Ignoring unreadable artifact {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    /// The accepted artifact when its checksum matches `fingerprint`.
    pub fn cached(&self, declaration: &Declaration, fingerprint: &str) -> JitResult<Option<Artifact>> {
        let Some(artifact) = self.read(declaration)? else {
            return Ok(None);
        };
        if artifact.checksum != fingerprint {
            debug!(
                "Checksum mismatch for {}: stored {}, current {}",
                declaration.qualified_name, artifact.checksum, fingerprint
            );
            return Ok(None);
        }
        Ok(Some(artifact))
    }
}
