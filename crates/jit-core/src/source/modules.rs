//! Project-level Python source lookup.
//!
//! Finds the definition of a dependency type by searching the origin
//! module, then the modules it imports, then every Python file in the
//! project.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::errors::JitResult;
use crate::models::{Declaration, DeclarationKind};
use crate::source::declarations::{clean_source, extract_declarations, find_declaration};
use crate::source::parser::parse_file;
use crate::source::{SourceProvider, TypeSource};

static PY_FROM_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*from\s+(\.*[A-Za-z0-9_.]*)\s+import\s+(.+)$").unwrap());

static PY_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s+(.+)$").unwrap());

/// One name bound by an import statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PythonImport {
    /// Module the name comes from (`a.b`, `.sibling`, `..pkg`).
    pub module: String,
    /// Imported member for `from m import x`; `None` for `import m`.
    pub member: Option<String>,
    /// Name bound in the importing module.
    pub alias: String,
}

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or("")
}

fn split_alias(item: &str) -> Option<(String, String)> {
    let item = item.trim();
    if item.is_empty() || item == "*" {
        return None;
    }
    match item.split_once(" as ") {
        Some((name, alias)) => Some((name.trim().to_string(), alias.trim().to_string())),
        None => Some((item.to_string(), item.to_string())),
    }
}

/// Extract the import bindings of a Python module, joining parenthesized
/// multi-line `from ... import (...)` statements.
pub fn extract_imports(source: &str) -> Vec<PythonImport> {
    let mut statements: Vec<String> = Vec::new();
    let mut pending: Option<String> = None;
    for line in source.lines() {
        let line = strip_comment(line);
        if let Some(mut acc) = pending.take() {
            acc.push(' ');
            acc.push_str(line.trim());
            if line.contains(')') {
                statements.push(acc);
            } else {
                pending = Some(acc);
            }
            continue;
        }
        if PY_FROM_IMPORT_RE.is_match(line) && line.contains('(') && !line.contains(')') {
            pending = Some(line.trim().to_string());
        } else {
            statements.push(line.to_string());
        }
    }

    let mut imports = Vec::new();
    for statement in statements {
        if let Some(caps) = PY_FROM_IMPORT_RE.captures(&statement) {
            let module = caps[1].to_string();
            let names = caps[2].replace(['(', ')', '\\'], "");
            for (member, alias) in names.split(',').filter_map(split_alias) {
                imports.push(PythonImport {
                    module: module.clone(),
                    member: Some(member),
                    alias,
                });
            }
        } else if let Some(caps) = PY_IMPORT_RE.captures(&statement) {
            for (module, alias) in caps[1].split(',').filter_map(split_alias) {
                imports.push(PythonImport {
                    module,
                    member: None,
                    alias,
                });
            }
        }
    }
    imports
}

/// Map a module name to a project file, relative to the importing file for
/// relative imports. Paths in `files` are project-relative with `/`.
pub fn resolve_module(
    source_path: &str,
    module_name: &str,
    files: &BTreeMap<String, PathBuf>,
) -> Option<PathBuf> {
    if module_name.is_empty() {
        return None;
    }
    let base = if module_name.starts_with('.') {
        let levels = module_name.chars().take_while(|&c| c == '.').count();
        let suffix = &module_name[levels..];
        let mut base_dir = Path::new(source_path)
            .parent()
            .unwrap_or(Path::new(""))
            .to_path_buf();
        for _ in 0..levels.saturating_sub(1) {
            base_dir = base_dir.parent().unwrap_or(Path::new("")).to_path_buf();
        }
        let joined = if suffix.is_empty() {
            base_dir
        } else {
            base_dir.join(suffix.replace('.', "/"))
        };
        joined.to_string_lossy().replace('\\', "/")
    } else {
        module_name.replace('.', "/")
    };
    let base = base.trim_start_matches('/');
    [format!("{base}.py"), format!("{base}/__init__.py")]
        .into_iter()
        .find_map(|candidate| files.get(&candidate).cloned())
}

/// Tree-sitter backed [`SourceProvider`] over a project directory.
pub struct PythonSource {
    project_root: PathBuf,
    origin: PathBuf,
    files: OnceCell<BTreeMap<String, PathBuf>>,
}

impl PythonSource {
    pub fn new(project_root: impl Into<PathBuf>, origin: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            origin: origin.into(),
            files: OnceCell::new(),
        }
    }

    /// Capture the named declaration from the origin file.
    pub fn declaration(&self, name: &str) -> JitResult<Declaration> {
        let module = parse_file(&self.origin)?;
        find_declaration(&module, name)
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.project_root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Python files under the project root, honoring `.gitignore` and
    /// skipping hidden directories (which includes the artifact store).
    fn project_files(&self) -> &BTreeMap<String, PathBuf> {
        self.files.get_or_init(|| {
            let mut files = BTreeMap::new();
            for entry in ignore::WalkBuilder::new(&self.project_root).build().flatten() {
                let path = entry.path();
                let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
                if is_file && path.extension().is_some_and(|ext| ext == "py") {
                    files.insert(self.relative(path), path.to_path_buf());
                }
            }
            debug!(
                "Indexed {} Python files under {}",
                files.len(),
                self.project_root.display()
            );
            files
        })
    }

    fn find_class(path: &Path, class_name: &str) -> Option<Declaration> {
        let module = match parse_file(path) {
            Ok(module) => module,
            Err(e) => {
                debug!("Skipping {}: {e}", path.display());
                return None;
            }
        };
        let declarations = extract_declarations(&module);
        let is_class = |d: &&Declaration| d.kind == DeclarationKind::Class;
        declarations
            .iter()
            .filter(is_class)
            .find(|d| d.qualified_name == class_name)
            .or_else(|| declarations.iter().filter(is_class).find(|d| d.name == class_name))
            .cloned()
    }

    fn find_via_imports(&self, name: &str) -> Option<Declaration> {
        let source = std::fs::read_to_string(&self.origin).ok()?;
        let origin_rel = self.relative(&self.origin);
        let files = self.project_files();
        let (head, last) = match name.rsplit_once('.') {
            Some((head, last)) => (Some(head), last),
            None => (None, name),
        };

        for import in extract_imports(&source) {
            let target = match (&import.member, head) {
                // from m import Matrix [as Alias]
                (Some(member), None) if import.alias == name => {
                    resolve_module(&origin_rel, &import.module, files)
                        .and_then(|path| Self::find_class(&path, member))
                }
                // import pkg.geometry [as geo]; geo.Matrix
                (None, Some(head)) if import.alias == head => {
                    resolve_module(&origin_rel, &import.module, files)
                        .and_then(|path| Self::find_class(&path, last))
                }
                // from pkg import geometry; geometry.Matrix
                (Some(member), Some(head)) if import.alias == head => {
                    let module = if import.module.ends_with('.') {
                        format!("{}{member}", import.module)
                    } else {
                        format!("{}.{member}", import.module)
                    };
                    resolve_module(&origin_rel, &module, files)
                        .and_then(|path| Self::find_class(&path, last))
                }
                _ => None,
            };
            if target.is_some() {
                return target;
            }
        }
        None
    }

    fn find_in_project(&self, name: &str) -> Option<Declaration> {
        let simple = name.rsplit('.').next().unwrap_or(name);
        self.project_files()
            .values()
            .filter(|path| path.as_path() != self.origin.as_path())
            .find_map(|path| Self::find_class(path, simple))
    }

    fn locate(&self, name: &str) -> Option<Declaration> {
        if !name.contains('.') {
            if let Some(found) = Self::find_class(&self.origin, name) {
                return Some(found);
            }
        }
        self.find_via_imports(name)
            .or_else(|| self.find_in_project(name))
    }
}

impl SourceProvider for PythonSource {
    fn type_source(&self, name: &str) -> Option<TypeSource> {
        let found = self.locate(name)?;
        debug!(
            "Located source of {name} in {}",
            found.origin.display()
        );
        Some(TypeSource {
            source: clean_source(&found.source),
            annotations: found.annotations,
        })
    }
}
