//! Conversation message model.
//!
//! A conversation is an ordered list of [`ConversationMessage`]s alternating
//! between *requests* (what the gateway sends to the model) and *responses*
//! (what the model produced).  Each message is a list of typed
//! [`MessagePart`]s, serialized with a `part_kind` tag so history can be
//! round-tripped through the HTTP API and replayed in a later run.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, Result};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Direction of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Sent to the model.
    Request,
    /// Produced by the model.
    Response,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub kind: MessageKind,
    pub parts: Vec<MessagePart>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Model that authored a response message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

impl ConversationMessage {
    /// Create a request message.
    pub fn request(parts: Vec<MessagePart>) -> Self {
        Self {
            kind: MessageKind::Request,
            parts,
            timestamp: Utc::now(),
            model_name: None,
        }
    }

    /// Create a response message.
    pub fn response(parts: Vec<MessagePart>, model_name: Option<String>) -> Self {
        Self {
            kind: MessageKind::Response,
            parts,
            timestamp: Utc::now(),
            model_name,
        }
    }

    pub fn is_request(&self) -> bool {
        self.kind == MessageKind::Request
    }

    /// Tool-call parts of this message, in order.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.parts.iter().filter_map(|part| match part {
            MessagePart::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    /// Concatenated text parts, or `None` when the message has no text.
    pub fn text(&self) -> Option<String> {
        let mut texts = self.parts.iter().filter_map(|part| match part {
            MessagePart::Text(text) => Some(text.content.as_str()),
            _ => None,
        });
        let first = texts.next()?;
        let mut joined = first.to_owned();
        for text in texts {
            joined.push_str(text);
        }
        Some(joined)
    }

    pub fn has_system_prompt(&self) -> bool {
        self.parts
            .iter()
            .any(|part| matches!(part, MessagePart::SystemPrompt(_)))
    }
}

// ---------------------------------------------------------------------------
// Parts
// ---------------------------------------------------------------------------

/// A typed fragment of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part_kind", rename_all = "kebab-case")]
pub enum MessagePart {
    SystemPrompt(SystemPromptPart),
    UserPrompt(UserPromptPart),
    Text(TextPart),
    ToolCall(ToolCallPart),
    ToolReturn(ToolReturnPart),
    RetryPrompt(RetryPromptPart),
}

impl MessagePart {
    pub fn system_prompt(content: impl Into<String>) -> Self {
        Self::SystemPrompt(SystemPromptPart {
            content: content.into(),
        })
    }

    pub fn user_prompt(content: impl Into<String>) -> Self {
        Self::UserPrompt(UserPromptPart {
            content: content.into(),
        })
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(TextPart {
            content: content.into(),
        })
    }

    /// Name of the part kind as it appears on the wire.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::SystemPrompt(_) => "system-prompt",
            Self::UserPrompt(_) => "user-prompt",
            Self::Text(_) => "text",
            Self::ToolCall(_) => "tool-call",
            Self::ToolReturn(_) => "tool-return",
            Self::RetryPrompt(_) => "retry-prompt",
        }
    }
}

/// Instructions supplied by the agent definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPromptPart {
    pub content: String,
}

/// Prompt supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPromptPart {
    pub content: String,
}

/// Model-authored text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPart {
    pub content: String,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub tool_name: String,
    /// Arguments as emitted by the model.  Usually an object; some providers
    /// send a JSON-encoded string instead, see [`ToolCallPart::args_object`].
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub tool_call_id: String,
}

impl ToolCallPart {
    /// Create a call with a freshly generated id.
    pub fn new(tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            args,
            tool_call_id: new_tool_call_id(),
        }
    }

    /// The arguments as a JSON object.
    ///
    /// Accepts an object, a string containing a JSON object, or null / empty
    /// string (treated as no arguments).
    pub fn args_object(&self) -> std::result::Result<serde_json::Map<String, Value>, String> {
        match &self.args {
            Value::Object(map) => Ok(map.clone()),
            Value::Null => Ok(serde_json::Map::new()),
            Value::String(raw) if raw.trim().is_empty() => Ok(serde_json::Map::new()),
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(other) => Err(format!("arguments must be a JSON object, got {other}")),
                Err(e) => Err(format!("arguments are not valid JSON: {e}")),
            },
            other => Err(format!("arguments must be a JSON object, got {other}")),
        }
    }
}

/// The value a tool produced, correlated to its call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReturnPart {
    pub tool_name: String,
    pub content: Value,
    pub tool_call_id: String,
}

/// Corrective instruction sent back to the model after a failed tool call or
/// a result that did not validate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPromptPart {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl RetryPromptPart {
    /// Text shown to the model for this retry.
    pub fn model_response(&self) -> String {
        format!("{}\n\nFix the errors and try again.", self.content)
    }
}

/// Generate a tool call id for calls the provider left unnamed.
pub fn new_tool_call_id() -> String {
    format!("call_{}", uuid::Uuid::now_v7().simple())
}

// ---------------------------------------------------------------------------
// History checks
// ---------------------------------------------------------------------------

/// Verify that every tool return and every id-carrying retry prompt refers
/// to a tool call that appeared earlier in `messages`.
pub fn validate_history(messages: &[ConversationMessage]) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();

    for (index, message) in messages.iter().enumerate() {
        for part in &message.parts {
            let referenced = match part {
                MessagePart::ToolCall(call) => {
                    seen.insert(call.tool_call_id.as_str());
                    continue;
                }
                MessagePart::ToolReturn(ret) => Some(ret.tool_call_id.as_str()),
                MessagePart::RetryPrompt(retry) => retry.tool_call_id.as_deref(),
                _ => None,
            };
            if let Some(id) = referenced
                && !seen.contains(id)
            {
                return Err(GatewayError::InvalidRequest {
                    reason: format!(
                        "message {index}: {} references unknown tool_call_id `{id}`",
                        part.kind_name()
                    ),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parts_serialize_with_kind_tag() {
        let part = MessagePart::ToolCall(ToolCallPart {
            tool_name: "sum".into(),
            args: json!({"a": 1, "b": 2}),
            tool_call_id: "call_1".into(),
        });
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["part_kind"], "tool-call");
        assert_eq!(value["tool_name"], "sum");
        assert_eq!(value["tool_call_id"], "call_1");

        let back: MessagePart = serde_json::from_value(value).unwrap();
        assert_eq!(back, part);
    }

    #[test]
    fn message_parses_from_wire() {
        let raw = json!({
            "kind": "request",
            "parts": [
                {"part_kind": "system-prompt", "content": "be brief"},
                {"part_kind": "user-prompt", "content": "hi"}
            ]
        });
        let message: ConversationMessage = serde_json::from_value(raw).unwrap();
        assert!(message.is_request());
        assert!(message.has_system_prompt());
        assert_eq!(message.parts.len(), 2);
    }

    #[test]
    fn text_concatenates_parts() {
        let message = ConversationMessage::response(
            vec![MessagePart::text("Hello, "), MessagePart::text("world")],
            None,
        );
        assert_eq!(message.text().as_deref(), Some("Hello, world"));

        let empty = ConversationMessage::response(vec![], None);
        assert!(empty.text().is_none());
    }

    #[test]
    fn args_object_accepts_json_string() {
        let call = ToolCallPart::new("sum", json!("{\"a\": 1}"));
        assert_eq!(call.args_object().unwrap()["a"], 1);

        let call = ToolCallPart::new("sum", Value::Null);
        assert!(call.args_object().unwrap().is_empty());

        let call = ToolCallPart::new("sum", json!([1, 2]));
        assert!(call.args_object().is_err());
    }

    #[test]
    fn history_pairing_accepted() {
        let call = ToolCallPart::new("sum", json!({"a": 1, "b": 2}));
        let id = call.tool_call_id.clone();
        let history = vec![
            ConversationMessage::request(vec![MessagePart::user_prompt("add")]),
            ConversationMessage::response(vec![MessagePart::ToolCall(call)], None),
            ConversationMessage::request(vec![MessagePart::ToolReturn(ToolReturnPart {
                tool_name: "sum".into(),
                content: json!(3),
                tool_call_id: id,
            })]),
        ];
        assert!(validate_history(&history).is_ok());
    }

    #[test]
    fn history_with_orphan_return_rejected() {
        let history = vec![ConversationMessage::request(vec![MessagePart::ToolReturn(
            ToolReturnPart {
                tool_name: "sum".into(),
                content: json!(3),
                tool_call_id: "missing".into(),
            },
        )])];
        let err = validate_history(&history).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));
    }

    #[test]
    fn retry_prompt_without_id_is_fine() {
        let history = vec![ConversationMessage::request(vec![MessagePart::RetryPrompt(
            RetryPromptPart {
                content: "bad output".into(),
                tool_name: None,
                tool_call_id: None,
            },
        )])];
        assert!(validate_history(&history).is_ok());
    }
}
