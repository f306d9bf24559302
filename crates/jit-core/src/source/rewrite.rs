//! In-place replacement of a declaration inside its origin file.

use std::path::PathBuf;

use tracing::info;

use crate::errors::{JitError, JitResult};
use crate::models::Declaration;

/// Prefix every non-blank line with `indent`. The span starts at the line
/// start, so the first line needs it too.
fn reindent(unit: &str, indent: &str) -> String {
    let mut out = String::with_capacity(unit.len());
    for (i, line) in unit.trim_end().lines().enumerate() {
        if i > 0 {
            out.push('\n');
            if !line.trim().is_empty() {
                out.push_str(indent);
            }
        } else {
            out.push_str(indent);
        }
        if !line.trim().is_empty() {
            out.push_str(line);
        }
    }
    out
}

/// Replace the declaration's captured span in its origin file with `unit`.
///
/// Every byte outside the span is preserved. The file must still contain the
/// captured declaration text at the captured span.
pub fn rewrite_in_place(declaration: &Declaration, unit: &str) -> JitResult<PathBuf> {
    let path = declaration.origin.clone();
    let contents = std::fs::read_to_string(&path)?;

    let span = declaration.span.clone();
    if contents.get(span.clone()) != Some(declaration.source.as_str()) {
        return Err(JitError::Rewrite(format!(
            "{} changed since {} was captured",
            path.display(),
            declaration.qualified_name
        )));
    }

    let mut rewritten = String::with_capacity(contents.len() + unit.len());
    rewritten.push_str(&contents[..span.start]);
    rewritten.push_str(&reindent(unit, &declaration.indent));
    rewritten.push_str(&contents[span.end..]);
    std::fs::write(&path, rewritten)?;

    info!(
        "Replaced {} in {} with the accepted implementation",
        declaration.qualified_name,
        path.display()
    );
    Ok(path)
}
