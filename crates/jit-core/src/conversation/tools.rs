//! The three tools offered to the service and the typed actions they map to.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::conversation::messages::{ToolCall, ToolDefinition};

pub const SUBMIT_TOOL: &str = "SubmitVersion";
pub const REASONING_TOOL: &str = "Reasoning";
pub const REVEAL_TOOL: &str = "ReadSourceCode";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitVersion {
    pub imports: Vec<String>,
    pub code: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reasoning {
    pub chain_of_thought: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadSourceCode {
    #[serde(rename = "type")]
    pub type_name: String,
}

/// A validated tool call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolAction {
    Submit(SubmitVersion),
    Reasoning(Reasoning),
    Reveal(ReadSourceCode),
}

/// Tool calls the session answers with an error result instead of acting.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool `{0}`")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: &'static str, message: String },

    #[error("Type `{name}` cannot be read; available types: {available}")]
    NotRevealable { name: String, available: String },
}

fn decode<T: for<'de> Deserialize<'de>>(tool: &'static str, arguments: &Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments.clone()).map_err(|e| ToolError::InvalidArguments {
        tool,
        message: e.to_string(),
    })
}

impl ToolAction {
    /// Validate `call` against the tools offered this turn. `revealable` is
    /// the unread set the reveal enum was built from.
    pub fn parse(call: &ToolCall, revealable: &[String]) -> Result<Self, ToolError> {
        match call.name.as_str() {
            SUBMIT_TOOL => decode(SUBMIT_TOOL, &call.arguments).map(ToolAction::Submit),
            REASONING_TOOL => decode(REASONING_TOOL, &call.arguments).map(ToolAction::Reasoning),
            REVEAL_TOOL if !revealable.is_empty() => {
                let reveal: ReadSourceCode = decode(REVEAL_TOOL, &call.arguments)?;
                if !revealable.contains(&reveal.type_name) {
                    return Err(ToolError::NotRevealable {
                        name: reveal.type_name,
                        available: revealable.join(", "),
                    });
                }
                Ok(ToolAction::Reveal(reveal))
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

/// Tools for one turn. The reveal tool is present only while there are
/// unread types, and its enum lists exactly those.
pub fn tool_definitions(revealable: &[String]) -> Vec<ToolDefinition> {
    let mut tools = vec![
        ToolDefinition {
            name: SUBMIT_TOOL.to_string(),
            description: "Submit a complete implementation for testing.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "imports": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Required imports"
                    },
                    "code": {
                        "type": "string",
                        "description": "Code of the object (without import statements)"
                    }
                },
                "required": ["imports", "code"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: REASONING_TOOL.to_string(),
            description: "Record reasoning steps before submitting.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "chain_of_thought": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Chain of thought"
                    }
                },
                "required": ["chain_of_thought"],
                "additionalProperties": false
            }),
        },
    ];
    if !revealable.is_empty() {
        tools.push(ToolDefinition {
            name: REVEAL_TOOL.to_string(),
            description: "Read the source code of a type the declaration depends on.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "type": {
                        "type": "string",
                        "enum": revealable,
                        "description": "Name of the type to read"
                    }
                },
                "required": ["type"],
                "additionalProperties": false
            }),
        });
    }
    tools
}
