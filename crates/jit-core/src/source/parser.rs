//! Python parsing wrapper used by declaration extraction.

use std::path::{Path, PathBuf};

use crate::errors::{JitError, JitResult};

/// A parsed Python module: the raw source plus its tree-sitter tree.
pub struct ParsedModule {
    pub path: PathBuf,
    pub source: String,
    pub tree: tree_sitter::Tree,
}

impl ParsedModule {
    pub fn root(&self) -> tree_sitter::Node<'_> {
        self.tree.root_node()
    }

    /// Source text covered by `node`.
    pub fn text(&self, node: tree_sitter::Node<'_>) -> &str {
        &self.source[node.byte_range()]
    }
}

pub fn parse_python(path: &Path, source: String) -> JitResult<ParsedModule> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| JitError::Parse(format!("Failed to set language: {e}")))?;

    let tree = parser
        .parse(source.as_bytes(), None)
        .ok_or_else(|| JitError::Parse(format!("Failed to parse {}", path.display())))?;

    Ok(ParsedModule {
        path: path.to_path_buf(),
        source,
        tree,
    })
}

pub fn parse_file(path: &Path) -> JitResult<ParsedModule> {
    let source = std::fs::read_to_string(path)?;
    parse_python(path, source)
}
