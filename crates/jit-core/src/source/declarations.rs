//! Declaration extraction from parsed Python modules.
//!
//! Walks the module's top level and class bodies, capturing every function
//! and class as a [`Declaration`]: its exact source span, its indentation and
//! the raw text of every type annotation it carries.

use tree_sitter::Node;

use crate::errors::{JitError, JitResult};
use crate::models::{Declaration, DeclarationKind};
use crate::source::parser::ParsedModule;

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

/// Remove the whitespace prefix common to every non-blank line.
///
/// Whitespace-only lines are normalized to empty lines, matching
/// Python's `textwrap.dedent`.
pub fn dedent(text: &str) -> String {
    let mut margin: Option<&str> = None;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = &line[..line.len() - line.trim_start().len()];
        margin = Some(match margin {
            None => indent,
            Some(current) => {
                let common = current
                    .char_indices()
                    .zip(indent.chars())
                    .take_while(|((_, a), b)| a == b)
                    .last()
                    .map(|((i, c), _)| i + c.len_utf8())
                    .unwrap_or(0);
                &current[..common]
            }
        });
    }
    let margin = margin.unwrap_or("");

    let mut out: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            out.push("");
        } else {
            out.push(line.strip_prefix(margin).unwrap_or(line));
        }
    }
    let mut result = out.join("\n");
    if text.ends_with('\n') {
        result.push('\n');
    }
    result
}

/// Drop leading decorator lines (including multi-line decorator calls) so
/// only the bare `def`/`class` signature and body remain.
pub fn strip_decorators(text: &str) -> String {
    let mut depth: i32 = 0;
    let mut in_decorator = false;
    let mut skip_bytes = 0;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if depth == 0 {
            if trimmed.starts_with('@') {
                in_decorator = true;
            } else if trimmed.is_empty() && in_decorator {
                // blank line between stacked decorators
            } else {
                break;
            }
        }
        depth = (depth + bracket_delta(line)).max(0);
        skip_bytes += line.len();
    }

    text[skip_bytes..].to_string()
}

/// Net bracket nesting opened by `line`, ignoring string literals and
/// trailing comments.
fn bracket_delta(line: &str) -> i32 {
    let mut delta = 0;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(_), '\\') => {
                chars.next();
            }
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '#') => break,
            (None, '(' | '[' | '{') => delta += 1,
            (None, ')' | ']' | '}') => delta -= 1,
            _ => {}
        }
    }
    delta
}

/// The text shown to the generative service: de-indented, no decorators.
pub fn clean_source(raw: &str) -> String {
    strip_decorators(&dedent(raw))
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Every function and class in the module, outermost first.
pub fn extract_declarations(module: &ParsedModule) -> Vec<Declaration> {
    let mut out = Vec::new();
    visit_block(module, module.root(), "", &mut out);
    out
}

/// Look up a declaration by qualified name, falling back to the first
/// declaration whose simple name matches.
pub fn find_declaration(module: &ParsedModule, name: &str) -> JitResult<Declaration> {
    let declarations = extract_declarations(module);
    if let Some(found) = declarations.iter().find(|d| d.qualified_name == name) {
        return Ok(found.clone());
    }
    declarations
        .into_iter()
        .find(|d| d.name == name)
        .ok_or_else(|| {
            JitError::DeclarationNotFound(format!("{name} in {}", module.path.display()))
        })
}

fn visit_block(module: &ParsedModule, block: Node<'_>, prefix: &str, out: &mut Vec<Declaration>) {
    let mut cursor = block.walk();
    for child in block.named_children(&mut cursor) {
        let (outer, definition) = match child.kind() {
            "function_definition" | "class_definition" => (child, child),
            "decorated_definition" => match child.child_by_field_name("definition") {
                Some(def) => (child, def),
                None => continue,
            },
            _ => continue,
        };
        let Some(name_node) = definition.child_by_field_name("name") else {
            continue;
        };
        let name = module.text(name_node).to_string();
        let qualified_name = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };

        let (kind, annotations) = if definition.kind() == "class_definition" {
            (DeclarationKind::Class, class_annotations(module, definition))
        } else {
            (DeclarationKind::Function, function_annotations(module, definition))
        };

        let (span, indent) = line_span(module, outer);
        out.push(Declaration {
            name,
            qualified_name: qualified_name.clone(),
            kind,
            origin: module.path.clone(),
            source: module.source[span.clone()].to_string(),
            span,
            indent,
            annotations,
        });

        if kind == DeclarationKind::Class {
            if let Some(body) = definition.child_by_field_name("body") {
                visit_block(module, body, &qualified_name, out);
            }
        }
    }
}

/// Extend a node's byte range back to the start of its line when only
/// whitespace precedes it, so the captured text keeps its indentation.
fn line_span(module: &ParsedModule, node: Node<'_>) -> (std::ops::Range<usize>, String) {
    let start = node.start_byte();
    let line_start = module.source[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let indent = &module.source[line_start..start];
    if indent.chars().all(|c| c == ' ' || c == '\t') {
        (line_start..node.end_byte(), indent.to_string())
    } else {
        (start..node.end_byte(), String::new())
    }
}

fn function_annotations(module: &ParsedModule, function: Node<'_>) -> Vec<String> {
    let mut annotations = Vec::new();
    if let Some(params) = function.child_by_field_name("parameters") {
        let mut cursor = params.walk();
        for param in params.named_children(&mut cursor) {
            if matches!(param.kind(), "typed_parameter" | "typed_default_parameter") {
                if let Some(ty) = param.child_by_field_name("type") {
                    annotations.push(module.text(ty).to_string());
                }
            }
        }
    }
    if let Some(ret) = function.child_by_field_name("return_type") {
        annotations.push(module.text(ret).to_string());
    }
    annotations
}

fn class_annotations(module: &ParsedModule, class: Node<'_>) -> Vec<String> {
    let mut annotations = Vec::new();
    let Some(body) = class.child_by_field_name("body") else {
        return annotations;
    };
    let mut cursor = body.walk();
    for member in body.named_children(&mut cursor) {
        match member.kind() {
            "expression_statement" => {
                let Some(inner) = member.named_child(0) else {
                    continue;
                };
                if inner.kind() == "assignment" {
                    if let Some(ty) = inner.child_by_field_name("type") {
                        annotations.push(module.text(ty).to_string());
                    }
                }
            }
            "function_definition" => annotations.extend(function_annotations(module, member)),
            "decorated_definition" => {
                if let Some(def) = member.child_by_field_name("definition") {
                    if def.kind() == "function_definition" {
                        annotations.extend(function_annotations(module, def));
                    }
                }
            }
            _ => {}
        }
    }
    annotations
}
