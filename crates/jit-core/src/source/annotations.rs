//! Parsing and flattening of Python type annotations.
//!
//! An annotation such as `dict[str, list["Matrix"]] | None` is parsed into a
//! small expression tree and flattened into every type name it mentions:
//! the origin of each parameterized type plus its arguments, recursively.

use std::collections::HashSet;

use crate::errors::{JitError, JitResult};

/// Names that never need their source revealed.
const PRIMITIVE_TYPES: &[&str] = &[
    // builtins
    "int", "float", "complex", "str", "bytes", "bytearray", "bool", "object", "type",
    "list", "dict", "set", "frozenset", "tuple", "range", "slice", "memoryview",
    "None", "NoneType", "Ellipsis", "BaseException", "Exception",
    // typing
    "Any", "Optional", "Union", "List", "Dict", "Set", "FrozenSet", "Tuple", "Type",
    "Callable", "Iterable", "Iterator", "Generator", "Sequence", "MutableSequence",
    "Mapping", "MutableMapping", "Collection", "Container", "Hashable", "Sized",
    "Reversible", "AbstractSet", "MutableSet", "DefaultDict", "OrderedDict", "Counter",
    "Deque", "ChainMap", "Literal", "Annotated", "ClassVar", "Final", "TypeVar",
    "Generic", "Protocol", "NoReturn", "Never", "Self", "TypeAlias", "TypeGuard",
    "Awaitable", "Coroutine", "AsyncIterable", "AsyncIterator", "AsyncGenerator",
    "SupportsInt", "SupportsFloat", "SupportsAbs", "SupportsIndex", "IO", "TextIO",
    "BinaryIO", "Pattern", "Match", "AnyStr", "Text",
];

/// Module prefixes whose members are always treated as primitive.
const PRIMITIVE_MODULES: &[&str] = &["typing.", "typing_extensions.", "collections.abc.", "builtins."];

/// Origins whose arguments are values, not types.
const VALUE_ARGUMENT_ORIGINS: &[&str] = &["Literal", "typing.Literal"];

/// Origins whose arguments after the first are metadata.
const METADATA_ORIGINS: &[&str] = &["Annotated", "typing.Annotated"];

/// Parsed form of one annotation expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeExpr {
    /// A (possibly dotted) name such as `int` or `np.ndarray`.
    Name(String),
    /// A parameterized type: `origin[args...]`.
    Generic { origin: String, args: Vec<TypeExpr> },
    /// `A | B | C`
    Union(Vec<TypeExpr>),
    /// A bracketed argument list, as in `Callable[[int, str], bool]`.
    List(Vec<TypeExpr>),
    /// A value that is not a type: numbers, `...`, `None`, literal strings.
    Value(String),
}

impl TypeExpr {
    /// Every type name mentioned, origins before arguments, without
    /// duplicates and in first-seen order.
    pub fn flatten(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.collect(&mut seen, &mut out);
        out
    }

    fn collect(&self, seen: &mut HashSet<String>, out: &mut Vec<String>) {
        match self {
            TypeExpr::Name(name) => {
                if seen.insert(name.clone()) {
                    out.push(name.clone());
                }
            }
            TypeExpr::Generic { origin, args } => {
                if seen.insert(origin.clone()) {
                    out.push(origin.clone());
                }
                if VALUE_ARGUMENT_ORIGINS.contains(&origin.as_str()) {
                    return;
                }
                let take = if METADATA_ORIGINS.contains(&origin.as_str()) {
                    1
                } else {
                    args.len()
                };
                for arg in args.iter().take(take) {
                    arg.collect(seen, out);
                }
            }
            TypeExpr::Union(items) | TypeExpr::List(items) => {
                for item in items {
                    item.collect(seen, out);
                }
            }
            TypeExpr::Value(_) => {}
        }
    }
}

/// True when `name` is a builtin, a typing construct, or lives in one of
/// the standard typing modules.
pub fn is_primitive(name: &str) -> bool {
    if PRIMITIVE_MODULES.iter().any(|prefix| name.starts_with(prefix)) {
        return true;
    }
    PRIMITIVE_TYPES.contains(&name)
}

/// Parse `annotation` and return the custom (non-primitive) type names it
/// references.
pub fn custom_types(annotation: &str) -> JitResult<Vec<String>> {
    let expr = parse_annotation(annotation)?;
    Ok(expr
        .flatten()
        .into_iter()
        .filter(|name| !is_primitive(name))
        .collect())
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Name(String),
    Str(String),
    Number(String),
    Ellipsis,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Pipe,
}

fn tokenize(text: &str) -> JitResult<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '.' if chars[i..].starts_with(&['.', '.', '.']) => {
                tokens.push(Token::Ellipsis);
                i += 3;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(JitError::Parse(format!(
                        "Unterminated string in annotation: {text}"
                    )));
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                tokens.push(Token::Name(name.trim_end_matches('.').to_string()));
            }
            other => {
                return Err(JitError::Parse(format!(
                    "Unexpected character {other:?} in annotation: {text}"
                )))
            }
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Recursive-descent parser
// ---------------------------------------------------------------------------

struct AnnotationParser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

pub fn parse_annotation(text: &str) -> JitResult<TypeExpr> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(JitError::Parse("Empty annotation".to_string()));
    }
    let mut parser = AnnotationParser {
        text,
        tokens,
        pos: 0,
    };
    let expr = parser.union()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("trailing tokens"));
    }
    Ok(expr)
}

impl AnnotationParser<'_> {
    fn error(&self, what: &str) -> JitError {
        JitError::Parse(format!("{what} in annotation: {}", self.text))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, token: Token) -> JitResult<()> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            _ => Err(self.error(&format!("expected {token:?}"))),
        }
    }

    fn union(&mut self) -> JitResult<TypeExpr> {
        let mut items = vec![self.primary()?];
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            items.push(self.primary()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            TypeExpr::Union(items)
        })
    }

    fn args(&mut self, close: Token) -> JitResult<Vec<TypeExpr>> {
        let mut args = Vec::new();
        loop {
            if self.peek() == Some(&close) {
                self.pos += 1;
                return Ok(args);
            }
            args.push(self.union()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(t) if t == close => return Ok(args),
                _ => return Err(self.error("unbalanced brackets")),
            }
        }
    }

    fn primary(&mut self) -> JitResult<TypeExpr> {
        match self.next() {
            Some(Token::Name(name)) => {
                if self.peek() == Some(&Token::LBracket) {
                    self.pos += 1;
                    let args = if VALUE_ARGUMENT_ORIGINS.contains(&name.as_str()) {
                        self.literal_args()?
                    } else {
                        self.args(Token::RBracket)?
                    };
                    Ok(TypeExpr::Generic { origin: name, args })
                } else if name == "None" {
                    Ok(TypeExpr::Value(name))
                } else {
                    Ok(TypeExpr::Name(name))
                }
            }
            // A string is a forward reference; it holds an annotation itself.
            Some(Token::Str(inner)) => parse_annotation(&inner),
            Some(Token::LBracket) => Ok(TypeExpr::List(self.args(Token::RBracket)?)),
            Some(Token::LParen) => {
                let inner = self.union()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Number(value)) => Ok(TypeExpr::Value(value)),
            Some(Token::Ellipsis) => Ok(TypeExpr::Value("...".to_string())),
            _ => Err(self.error("expected a type")),
        }
    }

    /// `Literal[...]` arguments are values; strings there are not forward refs.
    fn literal_args(&mut self) -> JitResult<Vec<TypeExpr>> {
        let mut args = Vec::new();
        loop {
            match self.next() {
                Some(Token::RBracket) => return Ok(args),
                Some(Token::Comma) => {}
                Some(Token::Str(value)) | Some(Token::Number(value)) | Some(Token::Name(value)) => {
                    args.push(TypeExpr::Value(value))
                }
                _ => return Err(self.error("unterminated Literal")),
            }
        }
    }
}
