//! Declaration source: read-only access to declarations and the source of
//! the types they depend on.

pub mod annotations;
pub mod declarations;
pub mod modules;
pub mod parser;
pub mod rewrite;

/// Source text of a dependency type plus the annotations of its members,
/// which may introduce further dependencies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeSource {
    pub source: String,
    pub annotations: Vec<String>,
}

/// Looks up the source of a type by the name it is referenced with.
///
/// `None` is a soft failure: builtins, third-party types and anything
/// constructed at runtime simply have no retrievable source.
pub trait SourceProvider {
    fn type_source(&self, name: &str) -> Option<TypeSource>;
}
