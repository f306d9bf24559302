//! Generative service abstraction and the OpenAI-compatible client.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use crate::config::JitConfig;
use crate::conversation::messages::{Message, Role, ToolCall, ToolDefinition};
use crate::errors::{JitError, JitResult};

/// One request: the whole transcript plus the tools offered this turn.
#[derive(Clone, Copy, Debug)]
pub struct CompletionRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolDefinition],
}

/// Returns the next assistant turn for a transcript.
pub trait GenerativeService {
    /// Fail fast with `JitError::Config` when the service cannot be used.
    /// Called once, before the first turn of a session.
    fn check_ready(&self) -> JitResult<()> {
        Ok(())
    }

    fn complete(&mut self, request: &CompletionRequest<'_>) -> JitResult<Message>;
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiService {
    agent: ureq::Agent,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl OpenAiService {
    const CONNECT_TIMEOUT_SECS: u64 = 10;

    fn build_agent(timeout: Duration) -> ureq::Agent {
        ureq::AgentBuilder::new()
            .timeout(timeout)
            .timeout_connect(Duration::from_secs(Self::CONNECT_TIMEOUT_SECS).min(timeout))
            .build()
    }

    pub fn from_config(config: &JitConfig) -> Self {
        Self {
            agent: Self::build_agent(config.timeout),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_body(&self, request: &CompletionRequest<'_>) -> Value {
        let tools: Vec<Value> = request.tools.iter().map(wire_tool).collect();
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": request.messages.iter().map(wire_message).collect::<Vec<_>>(),
            "tools": tools,
            "tool_choice": "required",
        })
    }
}

fn wire_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn wire_message(message: &Message) -> Value {
    match message.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content_text(),
        }),
        Role::Assistant if !message.tool_calls.is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    let arguments = match &call.arguments {
                        Value::String(raw) => raw.clone(),
                        other => other.to_string(),
                    };
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": arguments,
                        }
                    })
                })
                .collect();
            json!({
                "role": "assistant",
                "content": message.content,
                "tool_calls": calls,
            })
        }
        role => json!({
            "role": role,
            "content": message.content_text(),
        }),
    }
}

/// Extract the assistant turn from a chat-completions response body.
fn parse_response(body: &Value) -> JitResult<Message> {
    if let Some(error) = body.get("error") {
        let msg = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(JitError::Service(msg.to_string()));
    }
    let message = body
        .pointer("/choices/0/message")
        .ok_or_else(|| JitError::Service("response has no choices".to_string()))?;

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let raw = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}");
            tool_calls.push(ToolCall {
                id: call
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                arguments: serde_json::from_str(raw)
                    .unwrap_or_else(|_| Value::String(raw.to_string())),
            });
        }
    }

    Ok(Message {
        role: Role::Assistant,
        content: message
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string),
        tool_calls,
        tool_call_id: None,
    })
}

impl GenerativeService for OpenAiService {
    fn check_ready(&self) -> JitResult<()> {
        match &self.api_key {
            Some(_) => Ok(()),
            None => Err(JitError::Config(
                "OPENAI_API_KEY environment variable not set".to_string(),
            )),
        }
    }

    fn complete(&mut self, request: &CompletionRequest<'_>) -> JitResult<Message> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| JitError::Config("OPENAI_API_KEY environment variable not set".to_string()))?;
        debug!(
            "Requesting completion: {} messages, {} tools",
            request.messages.len(),
            request.tools.len()
        );

        let response = self
            .agent
            .post(&self.endpoint())
            .set("Content-Type", "application/json")
            .set("Authorization", &format!("Bearer {key}"))
            .send_json(self.request_body(request));

        let body: Value = match response {
            Ok(resp) => resp
                .into_json()
                .map_err(|e| JitError::Service(format!("Failed to parse completion: {e}")))?,
            Err(ureq::Error::Status(code, resp)) => {
                let detail = resp.into_string().unwrap_or_default();
                return Err(JitError::Service(format!("HTTP {code}: {detail}")));
            }
            Err(e) => return Err(JitError::Service(format!("Completion request failed: {e}"))),
        };
        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(api_key: Option<&str>) -> OpenAiService {
        let config = JitConfig {
            api_key: api_key.map(str::to_string),
            ..JitConfig::default()
        };
        OpenAiService::from_config(&config)
    }

    #[test]
    fn test_check_ready_requires_key() {
        assert!(matches!(service(None).check_ready(), Err(JitError::Config(_))));
        assert!(service(Some("sk-test")).check_ready().is_ok());
    }

    #[test]
    fn test_request_body_shape() {
        let svc = service(Some("sk-test"));
        let messages = vec![
            Message::system("sys"),
            Message::assistant_calls(vec![ToolCall {
                id: "call_1".into(),
                name: "Reasoning".into(),
                arguments: json!({"chain_of_thought": ["a"]}),
            }]),
            Message::tool_result("call_1", "Noted."),
        ];
        let tools = crate::conversation::tools::tool_definitions(&[]);
        let body = svc.request_body(&CompletionRequest {
            messages: &messages,
            tools: &tools,
        });

        assert_eq!(body["model"], "gpt-4o-2024-08-06");
        assert_eq!(body["tool_choice"], "required");
        assert_eq!(body["tools"][0]["function"]["name"], "SubmitVersion");
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "sys"}));
        assert_eq!(
            body["messages"][1]["tool_calls"][0]["function"]["arguments"],
            "{\"chain_of_thought\":[\"a\"]}"
        );
        assert_eq!(body["messages"][2]["tool_call_id"], "call_1");
        assert_eq!(svc.endpoint(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_parse_response_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "c1", "type": "function", "function": {"name": "SubmitVersion", "arguments": "{\"imports\":[],\"code\":\"x = 1\"}"}},
                        {"id": "c2", "type": "function", "function": {"name": "Reasoning", "arguments": "not json"}}
                    ]
                }
            }]
        });
        let message = parse_response(&body).unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert!(message.content.is_none());
        assert_eq!(message.tool_calls.len(), 2);
        assert_eq!(message.tool_calls[0].arguments["code"], "x = 1");
        assert_eq!(message.tool_calls[1].arguments, Value::String("not json".into()));
    }

    #[test]
    fn test_parse_response_error() {
        let body = json!({"error": {"message": "Incorrect API key provided"}});
        match parse_response(&body) {
            Err(JitError::Service(msg)) => assert!(msg.contains("Incorrect API key")),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(parse_response(&json!({})), Err(JitError::Service(_))));
    }
}
