//! Artifact persistence: fingerprints, the artifact file format, and the
//! per-declaration version slots.

pub mod artifact;
pub mod fingerprint;
pub mod versions;

pub use artifact::Artifact;
pub use fingerprint::fingerprint;
pub use versions::VersionStore;
