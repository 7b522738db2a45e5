//! Provider-agnostic request/response types for completion backends.
//!
//! The dispatcher talks to every backend in terms of these types; the
//! [`super::client`] module translates them into provider wire formats.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModelError;
use crate::message::{ConversationMessage, MessagePart, ToolCallPart};
use crate::usage::RequestUsage;

// ---------------------------------------------------------------------------
// Tool definitions
// ---------------------------------------------------------------------------

/// A tool definition exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool's arguments.
    pub parameters: Value,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Sampling settings sent with each model request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Per-request HTTP timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ModelSettings {
    /// `self` with every field set in `overrides` replaced.
    pub fn merged_with(&self, overrides: &ModelSettings) -> ModelSettings {
        ModelSettings {
            temperature: overrides.temperature.or(self.temperature),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            top_p: overrides.top_p.or(self.top_p),
            timeout_secs: overrides.timeout_secs.or(self.timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// One step of a run, as handed to a backend.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Full conversation so far, oldest first.
    pub messages: Vec<ConversationMessage>,
    /// Function tools the model may call.
    pub tools: Vec<ToolDefinition>,
    /// Output tool carrying the result schema, when the agent has one.
    pub output_tool: Option<ToolDefinition>,
    pub settings: ModelSettings,
}

impl ModelRequest {
    /// Function tools followed by the output tool.
    pub fn all_tools(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.iter().chain(self.output_tool.iter())
    }
}

/// A complete model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    /// Text and tool-call parts in the order the model produced them.
    pub parts: Vec<MessagePart>,
    pub usage: RequestUsage,
    pub model_name: Option<String>,
}

impl ModelResponse {
    /// A response with a single text part.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            parts: vec![MessagePart::text(content)],
            ..Self::default()
        }
    }

    /// A response consisting of tool calls.
    pub fn tool_calls(calls: Vec<ToolCallPart>) -> Self {
        Self {
            parts: calls.into_iter().map(MessagePart::ToolCall).collect(),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: RequestUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Split into the chunks a streaming backend would have produced.
    pub fn into_chunks(self) -> Vec<StreamChunk> {
        let mut chunks: Vec<StreamChunk> = self
            .parts
            .into_iter()
            .filter_map(|part| match part {
                MessagePart::Text(text) => Some(StreamChunk::TextDelta(text.content)),
                MessagePart::ToolCall(call) => Some(StreamChunk::ToolCall(call)),
                _ => None,
            })
            .collect();
        chunks.push(StreamChunk::Usage(self.usage));
        chunks
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Incremental output of a streaming backend.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// A piece of model-authored text.
    TextDelta(String),
    /// A fully assembled tool call.
    ToolCall(ToolCallPart),
    /// Token usage; successive chunks add up.
    Usage(RequestUsage),
}

/// Boxed stream of chunks returned by [`super::CompletionModel::request_stream`].
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ModelError>> + Send>>;

/// Decode tool-call arguments sent as a JSON string.
///
/// Malformed JSON is kept as the raw string so the dispatcher can report it
/// back to the model instead of failing the whole step.
pub(crate) fn parse_tool_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

/// Folds [`StreamChunk`]s back into a [`ModelResponse`].
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    parts: Vec<MessagePart>,
    usage: RequestUsage,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, chunk: StreamChunk) {
        match chunk {
            StreamChunk::TextDelta(delta) => match self.parts.last_mut() {
                Some(MessagePart::Text(text)) => text.content.push_str(&delta),
                _ => self.parts.push(MessagePart::text(delta)),
            },
            StreamChunk::ToolCall(call) => self.parts.push(MessagePart::ToolCall(call)),
            StreamChunk::Usage(usage) => {
                self.usage.input_tokens += usage.input_tokens;
                self.usage.output_tokens += usage.output_tokens;
            }
        }
    }

    pub fn finish(self, model_name: Option<String>) -> ModelResponse {
        ModelResponse {
            parts: self.parts,
            usage: self.usage,
            model_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn settings_merge_field_by_field() {
        let defaults = ModelSettings {
            temperature: Some(0.2),
            max_tokens: Some(512),
            ..ModelSettings::default()
        };
        let overrides = ModelSettings {
            temperature: Some(0.9),
            top_p: Some(0.5),
            ..ModelSettings::default()
        };
        let merged = defaults.merged_with(&overrides);
        assert_eq!(merged.temperature, Some(0.9));
        assert_eq!(merged.max_tokens, Some(512));
        assert_eq!(merged.top_p, Some(0.5));
        assert_eq!(merged.timeout_secs, None);
    }

    #[test]
    fn accumulator_merges_adjacent_text() {
        let mut acc = ResponseAccumulator::new();
        acc.apply(StreamChunk::TextDelta("Hel".into()));
        acc.apply(StreamChunk::TextDelta("lo".into()));
        acc.apply(StreamChunk::ToolCall(ToolCallPart::new("sum", json!({}))));
        acc.apply(StreamChunk::Usage(RequestUsage {
            input_tokens: 5,
            output_tokens: 0,
        }));
        acc.apply(StreamChunk::Usage(RequestUsage {
            input_tokens: 0,
            output_tokens: 2,
        }));

        let response = acc.finish(Some("m".into()));
        assert_eq!(response.parts.len(), 2);
        assert_eq!(response.parts[0], MessagePart::text("Hello"));
        assert_eq!(response.usage.input_tokens, 5);
        assert_eq!(response.usage.output_tokens, 2);
    }

    #[test]
    fn chunks_round_trip_through_accumulator() {
        let original = ModelResponse::text("hi").with_usage(RequestUsage {
            input_tokens: 1,
            output_tokens: 1,
        });
        let mut acc = ResponseAccumulator::new();
        for chunk in original.clone().into_chunks() {
            acc.apply(chunk);
        }
        assert_eq!(acc.finish(None), original);
    }
}
