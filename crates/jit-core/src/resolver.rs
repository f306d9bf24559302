//! Type dependency resolution for one synthesis session.
//!
//! Tracks which custom types a declaration reaches through its annotations.
//! Types start out "unread" when discovered and become "resolved" once their
//! source has been fetched, at which point their own annotations are
//! discovered in turn.

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::models::Declaration;
use crate::source::annotations::custom_types;
use crate::source::declarations::clean_source;
use crate::source::SourceProvider;

/// Resolved and unread dependency types. A name is in at most one of the
/// two collections; both keep insertion order.
#[derive(Debug, Default, Clone)]
pub struct TypeDependencySet {
    resolved: IndexMap<String, Option<String>>,
    unread: IndexSet<String>,
}

impl TypeDependencySet {
    pub fn is_resolved(&self, name: &str) -> bool {
        self.resolved.contains_key(name)
    }

    pub fn resolved(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.resolved
            .iter()
            .map(|(name, source)| (name.as_str(), source.as_deref()))
    }

    pub fn unread(&self) -> impl Iterator<Item = &str> {
        self.unread.iter().map(String::as_str)
    }

    fn mark_unread(&mut self, name: String) -> bool {
        if self.resolved.contains_key(&name) {
            return false;
        }
        self.unread.insert(name)
    }

    fn mark_resolved(&mut self, name: &str, source: Option<String>) {
        self.unread.shift_remove(name);
        self.resolved.insert(name.to_string(), source);
    }
}

/// Incremental resolver over a [`SourceProvider`].
pub struct TypeResolver<'a> {
    provider: &'a dyn SourceProvider,
    deps: TypeDependencySet,
}

impl<'a> TypeResolver<'a> {
    pub fn new(provider: &'a dyn SourceProvider) -> Self {
        Self {
            provider,
            deps: TypeDependencySet::default(),
        }
    }

    pub fn dependencies(&self) -> &TypeDependencySet {
        &self.deps
    }

    /// Register the declaration under synthesis as already resolved and
    /// discover the types its annotations mention.
    pub fn seed(&mut self, declaration: &Declaration) {
        self.deps
            .mark_resolved(&declaration.name, Some(clean_source(&declaration.source)));
        self.discover(&declaration.annotations);
    }

    /// Add every custom type mentioned by `annotations` to the unread set,
    /// unless it has already been resolved.
    pub fn discover(&mut self, annotations: &[String]) {
        for annotation in annotations {
            let names = match custom_types(annotation) {
                Ok(names) => names,
                Err(e) => {
                    debug!("Ignoring annotation: {e}");
                    continue;
                }
            };
            for name in names {
                if self.deps.mark_unread(name.clone()) {
                    debug!("Discovered dependency type {name}");
                }
            }
        }
    }

    /// Source of `name`, fetching it on first use.
    ///
    /// A type without retrievable source is recorded as `None` and is never
    /// offered again. Resolving an already resolved type does not fetch.
    pub fn resolve(&mut self, name: &str) -> Option<&str> {
        if !self.deps.is_resolved(name) {
            match self.provider.type_source(name) {
                Some(found) => {
                    self.deps.mark_resolved(name, Some(found.source));
                    self.discover(&found.annotations);
                }
                None => {
                    debug!("No source available for {name}");
                    self.deps.mark_resolved(name, None);
                }
            }
        }
        self.deps.resolved.get(name).and_then(|s| s.as_deref())
    }

    /// Unread type names, in discovery order.
    pub fn unread(&self) -> Vec<String> {
        self.deps.unread().map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeclarationKind;
    use crate::source::TypeSource;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[derive(Default)]
    struct FakeSource {
        types: HashMap<&'static str, TypeSource>,
        fetches: RefCell<Vec<String>>,
    }

    impl FakeSource {
        fn with(mut self, name: &'static str, source: &str, annotations: &[&str]) -> Self {
            self.types.insert(
                name,
                TypeSource {
                    source: source.to_string(),
                    annotations: annotations.iter().map(|a| a.to_string()).collect(),
                },
            );
            self
        }
    }

    impl SourceProvider for FakeSource {
        fn type_source(&self, name: &str) -> Option<TypeSource> {
            self.fetches.borrow_mut().push(name.to_string());
            self.types.get(name).cloned()
        }
    }

    fn declaration(annotations: &[&str]) -> Declaration {
        Declaration {
            name: "solve".into(),
            qualified_name: "solve".into(),
            kind: DeclarationKind::Function,
            origin: PathBuf::from("solver.py"),
            source: "def solve(m: Matrix) -> Vector:\n    ...\n".into(),
            span: 0..10,
            indent: String::new(),
            annotations: annotations.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_seed_discovers_custom_types_only() {
        let source = FakeSource::default();
        let mut resolver = TypeResolver::new(&source);
        resolver.seed(&declaration(&["Matrix", "list[Vector]", "int", "Matrix | None"]));
        assert_eq!(resolver.unread(), vec!["Matrix", "Vector"]);
        assert!(resolver.dependencies().is_resolved("solve"));
        assert!(source.fetches.borrow().is_empty());
    }

    #[test]
    fn test_self_reference_is_never_unread() {
        let source = FakeSource::default();
        let mut resolver = TypeResolver::new(&source);
        let mut decl = declaration(&["solve", "Helper"]);
        decl.kind = DeclarationKind::Class;
        resolver.seed(&decl);
        assert_eq!(resolver.unread(), vec!["Helper"]);
    }

    #[test]
    fn test_resolve_moves_type_and_discovers_nested() {
        let source = FakeSource::default()
            .with("Matrix", "class Matrix:\n    rows: list[Row]\n", &["list[Row]"])
            .with("Row", "class Row:\n    cells: list[float]\n", &["list[float]"]);
        let mut resolver = TypeResolver::new(&source);
        resolver.seed(&declaration(&["Matrix"]));

        let matrix = resolver.resolve("Matrix").map(str::to_string);
        assert_eq!(matrix.as_deref(), Some("class Matrix:\n    rows: list[Row]\n"));
        assert_eq!(resolver.unread(), vec!["Row"]);

        resolver.resolve("Row");
        assert!(resolver.unread().is_empty());
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let source = FakeSource::default().with("Matrix", "class Matrix: ...", &[]);
        let mut resolver = TypeResolver::new(&source);
        resolver.seed(&declaration(&["Matrix"]));

        let first = resolver.resolve("Matrix").map(str::to_string);
        let second = resolver.resolve("Matrix").map(str::to_string);
        assert_eq!(first, second);
        assert_eq!(*source.fetches.borrow(), vec!["Matrix".to_string()]);
    }

    #[test]
    fn test_unresolvable_type_is_soft_and_permanent() {
        let source = FakeSource::default();
        let mut resolver = TypeResolver::new(&source);
        resolver.seed(&declaration(&["np.ndarray"]));

        assert_eq!(resolver.resolve("np.ndarray"), None);
        assert!(resolver.unread().is_empty());

        resolver.discover(&["np.ndarray".to_string()]);
        assert!(resolver.unread().is_empty());
        assert_eq!(source.fetches.borrow().len(), 1);
    }

    #[test]
    fn test_cycles_terminate() {
        let source = FakeSource::default()
            .with("Node", "class Node:\n    next: Edge\n", &["Edge"])
            .with("Edge", "class Edge:\n    target: Node\n", &["Node"]);
        let mut resolver = TypeResolver::new(&source);
        resolver.seed(&declaration(&["Node"]));
        resolver.resolve("Node");
        assert_eq!(resolver.unread(), vec!["Edge"]);
        resolver.resolve("Edge");
        assert!(resolver.unread().is_empty());
        assert_eq!(resolver.dependencies().resolved().count(), 3);
    }
}
