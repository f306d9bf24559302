//! The conversation with the generative service: transcript types, tools,
//! the service client, and the orchestrating state machine.

pub mod messages;
pub mod operator;
pub mod orchestrator;
pub mod prompt;
pub mod service;
pub mod tools;

pub use messages::{Message, Role, ToolCall, ToolDefinition};
pub use operator::{Operator, StdinOperator};
pub use orchestrator::{Coder, ConversationState, SessionState};
pub use service::{CompletionRequest, GenerativeService, OpenAiService};
