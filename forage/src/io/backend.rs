//! Model backend seam: trait, tagged reply, and the HTTP adapter.
//!
//! The [`ModelBackend`] trait decouples the loop from the actual provider.
//! Tests use scripted backends that return predetermined replies without any
//! network traffic. The shipped implementation, [`HttpBackend`], speaks the
//! OpenAI-compatible `chat/completions` wire format over blocking HTTP.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::core::convo::{Role, Turn};
use crate::core::types::ToolCallRequest;
use crate::io::config::ForageConfig;

/// Name of the single tool the loop exposes to the model.
pub const COMMAND_TOOL_NAME: &str = "run_command";

const COMMAND_TOOL_DESCRIPTION: &str = "\
Execute a shell command to gather information needed to answer the user's \
question. Use it for read-only inspection: file contents (cat, head, tail, \
grep), git state (git status, git diff, git log), directory listings (ls, \
find), or running tests. Do not use it for destructive operations, privilege \
escalation, or writing files; such commands are rejected by policy and the \
rejection is reported back to you.";

/// One request to the model backend.
pub struct ModelRequest<'a> {
    /// Full conversation so far, oldest turn first.
    pub turns: &'a [Turn],
    /// Schema the final answer must satisfy, when the caller supplied one.
    pub schema: Option<&'a Value>,
    /// Whether the command tool is declared to the model.
    pub tools_enabled: bool,
    /// Remaining run budget, when a deadline is set.
    pub timeout: Option<Duration>,
}

/// Tagged backend reply. Downstream logic matches on this exhaustively; there
/// is no fourth shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    FinalText(String),
    FinalStructured(Value),
    ToolCalls(Vec<ToolCallRequest>),
}

/// Failure surfaced by a backend. Transport and HTTP-status failures are kept
/// distinct from a reply that arrived but could not be classified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("backend transport error: {0}")]
    Transport(String),
    #[error("backend reply was malformed: {0}")]
    MalformedReply(String),
}

/// Abstraction over model providers.
pub trait ModelBackend {
    fn send(&self, request: &ModelRequest<'_>) -> Result<ModelReply, BackendError>;
}

/// OpenAI-compatible `chat/completions` adapter.
pub struct HttpBackend {
    base_url: String,
    model: String,
    api_key: String,
    temperature: Option<f64>,
    max_tokens: Option<u64>,
    timeout: Duration,
}

impl HttpBackend {
    /// Build the adapter from configuration. The API key is read from the
    /// environment variable named in the config.
    pub fn from_config(config: &ForageConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("read API key from ${}", config.api_key_env))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.backend_timeout_secs),
        })
    }
}

impl ModelBackend for HttpBackend {
    #[instrument(skip_all, fields(model = %self.model, turns = request.turns.len()))]
    fn send(&self, request: &ModelRequest<'_>) -> Result<ModelReply, BackendError> {
        let payload = build_payload(
            &self.model,
            request,
            self.temperature,
            self.max_tokens,
        );
        // A run deadline tighter than the configured timeout wins.
        let timeout = match request.timeout {
            Some(remaining) => self.timeout.min(remaining),
            None => self.timeout,
        };
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();

        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, "sending chat completion request");
        let response = agent
            .post(&url)
            .set("content-type", "application/json")
            .set("authorization", &format!("Bearer {}", self.api_key))
            .send_json(payload);

        let body = match response {
            Ok(resp) => resp
                .into_string()
                .map_err(|err| BackendError::Transport(format!("read response body: {err}")))?,
            Err(ureq::Error::Status(status, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                return Err(BackendError::Http { status, body });
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(BackendError::Transport(err.to_string()));
            }
        };

        let value: Value = serde_json::from_str(&body).map_err(|err| {
            BackendError::MalformedReply(format!("response was not valid JSON: {err}"))
        })?;
        classify_reply(&value, request.schema.is_some())
    }
}

/// Assemble the wire payload for one request. Pure, for testability.
fn build_payload(
    model: &str,
    request: &ModelRequest<'_>,
    temperature: Option<f64>,
    max_tokens: Option<u64>,
) -> Value {
    let messages: Vec<Value> = request
        .turns
        .iter()
        .map(|turn| {
            json!({
                "role": role_name(turn.role),
                "content": turn.content,
            })
        })
        .collect();

    let mut payload = json!({
        "model": model,
        "messages": messages,
    });
    if let Some(temperature) = temperature {
        payload["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = max_tokens {
        payload["max_tokens"] = json!(max_tokens);
    }
    if request.tools_enabled {
        payload["tools"] = json!([command_tool_definition()]);
        payload["tool_choice"] = json!("auto");
    }
    if let Some(schema) = request.schema {
        payload["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {
                "name": "final_output",
                "schema": schema,
            },
        });
    }
    payload
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn command_tool_definition() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": COMMAND_TOOL_NAME,
            "description": COMMAND_TOOL_DESCRIPTION,
            "parameters": {
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute (e.g., 'git status', 'cat error.log')",
                    },
                    "args": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Extra arguments appended to the command",
                    },
                    "reason": {
                        "type": "string",
                        "description": "Brief explanation of why this command is needed",
                    },
                },
                "required": ["command"],
            },
        },
    })
}

/// Classify a provider response body into the three-way reply.
fn classify_reply(value: &Value, expect_structured: bool) -> Result<ModelReply, BackendError> {
    let message = value
        .pointer("/choices/0/message")
        .ok_or_else(|| BackendError::MalformedReply("missing choices[0].message".to_string()))?;

    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array)
        && !calls.is_empty()
    {
        let requests = calls
            .iter()
            .map(parse_tool_call)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(ModelReply::ToolCalls(requests));
    }

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(BackendError::MalformedReply(
            "reply had neither content nor tool calls".to_string(),
        ));
    }
    if expect_structured
        && let Ok(parsed) = serde_json::from_str::<Value>(content)
    {
        return Ok(ModelReply::FinalStructured(parsed));
    }
    Ok(ModelReply::FinalText(content.to_string()))
}

fn parse_tool_call(call: &Value) -> Result<ToolCallRequest, BackendError> {
    let id = call
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| BackendError::MalformedReply("tool call missing id".to_string()))?;
    let function = call
        .get("function")
        .ok_or_else(|| BackendError::MalformedReply("tool call missing function".to_string()))?;
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if name != COMMAND_TOOL_NAME {
        return Err(BackendError::MalformedReply(format!(
            "unknown tool '{name}'"
        )));
    }
    let arguments = function
        .get("arguments")
        .and_then(Value::as_str)
        .ok_or_else(|| BackendError::MalformedReply("tool call missing arguments".to_string()))?;
    let arguments: Value = serde_json::from_str(arguments).map_err(|err| {
        BackendError::MalformedReply(format!("tool call arguments were not valid JSON: {err}"))
    })?;
    let command = arguments
        .get("command")
        .and_then(Value::as_str)
        .ok_or_else(|| BackendError::MalformedReply("tool call missing 'command'".to_string()))?
        .to_string();
    let args = arguments
        .get("args")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let reason = arguments
        .get("reason")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(ToolCallRequest {
        id: id.to_string(),
        command,
        args,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(turns: &'a [Turn], schema: Option<&'a Value>, tools: bool) -> ModelRequest<'a> {
        ModelRequest {
            turns,
            schema,
            tools_enabled: tools,
            timeout: None,
        }
    }

    #[test]
    fn payload_carries_messages_in_order() {
        let turns = vec![
            Turn {
                role: Role::System,
                content: "sys".to_string(),
            },
            Turn {
                role: Role::User,
                content: "hello".to_string(),
            },
        ];
        let payload = build_payload("test-model", &request(&turns, None, false), None, None);
        assert_eq!(payload["model"], "test-model");
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["content"], "hello");
        assert!(payload.get("tools").is_none());
        assert!(payload.get("response_format").is_none());
    }

    #[test]
    fn payload_declares_the_command_tool_when_enabled() {
        let turns = vec![Turn {
            role: Role::User,
            content: "hi".to_string(),
        }];
        let payload = build_payload("m", &request(&turns, None, true), Some(0.2), Some(512));
        assert_eq!(
            payload["tools"][0]["function"]["name"],
            COMMAND_TOOL_NAME
        );
        assert_eq!(payload["tool_choice"], "auto");
        assert_eq!(payload["temperature"], 0.2);
        assert_eq!(payload["max_tokens"], 512);
    }

    #[test]
    fn payload_forwards_the_schema_as_response_format() {
        let turns = vec![Turn {
            role: Role::User,
            content: "hi".to_string(),
        }];
        let schema = json!({"type": "object"});
        let payload = build_payload("m", &request(&turns, Some(&schema), false), None, None);
        assert_eq!(payload["response_format"]["type"], "json_schema");
        assert_eq!(
            payload["response_format"]["json_schema"]["schema"],
            schema
        );
    }

    #[test]
    fn classify_extracts_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {
                            "name": COMMAND_TOOL_NAME,
                            "arguments": "{\"command\": \"ls /tmp\", \"reason\": \"list files\"}"
                        }
                    }]
                }
            }]
        });
        let reply = classify_reply(&body, false).expect("reply");
        let ModelReply::ToolCalls(calls) = reply else {
            panic!("expected tool calls");
        };
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].command, "ls /tmp");
        assert_eq!(calls[0].reason.as_deref(), Some("list files"));
    }

    #[test]
    fn classify_returns_text_without_schema() {
        let body = json!({
            "choices": [{ "message": { "content": "plain answer" } }]
        });
        let reply = classify_reply(&body, false).expect("reply");
        assert_eq!(reply, ModelReply::FinalText("plain answer".to_string()));
    }

    #[test]
    fn classify_returns_structured_when_schema_expected_and_content_is_json() {
        let body = json!({
            "choices": [{ "message": { "content": "{\"summary\": \"ok\"}" } }]
        });
        let reply = classify_reply(&body, true).expect("reply");
        assert_eq!(
            reply,
            ModelReply::FinalStructured(json!({"summary": "ok"}))
        );
    }

    #[test]
    fn classify_keeps_non_json_content_as_text_even_with_schema() {
        // The validator turns this into a correction round; the backend must
        // not reject it.
        let body = json!({
            "choices": [{ "message": { "content": "not json" } }]
        });
        let reply = classify_reply(&body, true).expect("reply");
        assert_eq!(reply, ModelReply::FinalText("not json".to_string()));
    }

    #[test]
    fn classify_rejects_empty_replies() {
        let body = json!({
            "choices": [{ "message": { "content": "" } }]
        });
        let err = classify_reply(&body, false).expect_err("empty reply");
        assert!(matches!(err, BackendError::MalformedReply(_)));
    }

    #[test]
    fn classify_rejects_unknown_tools() {
        let body = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "function": { "name": "format_disk", "arguments": "{}" }
                    }]
                }
            }]
        });
        let err = classify_reply(&body, false).expect_err("unknown tool");
        assert!(matches!(err, BackendError::MalformedReply(_)));
    }

    #[test]
    fn classify_rejects_unparseable_arguments() {
        let body = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "function": { "name": COMMAND_TOOL_NAME, "arguments": "{not json" }
                    }]
                }
            }]
        });
        let err = classify_reply(&body, false).expect_err("bad arguments");
        assert!(matches!(err, BackendError::MalformedReply(_)));
    }
}
