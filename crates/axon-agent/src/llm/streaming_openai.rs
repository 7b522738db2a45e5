//! SSE stream parsing for the OpenAI Chat Completions API.
//!
//! The OpenAI streaming format sends `data:` lines whose JSON payloads carry
//! `choices[].delta` objects, terminated by a `data: [DONE]` sentinel.  Text
//! deltas can be forwarded immediately; tool-call deltas are accumulated by
//! index until the stream ends.

use serde_json::Value;

use crate::error::ModelError;
use crate::llm::types::{StreamChunk, parse_tool_arguments};
use crate::message::ToolCallPart;
use crate::usage::RequestUsage;

/// Accumulates an OpenAI SSE stream.
#[derive(Debug, Default)]
pub struct OpenAiStreamAccumulator {
    /// In-progress tool calls, indexed by the `index` OpenAI sends.
    tool_call_builders: Vec<OpenAiToolCallBuilder>,
    done: bool,
    /// Usage from the final chunk (requires `stream_options.include_usage`).
    usage: RequestUsage,
    model: Option<String>,
}

#[derive(Debug, Default)]
struct OpenAiToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

impl OpenAiStreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been received.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Model name reported by the stream.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Feed a single SSE line.
    ///
    /// Returns the text delta it carried, if any.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<String>, ModelError> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let v: Value = serde_json::from_str(data).map_err(|e| ModelError::ParseFailed {
            reason: format!("invalid JSON in OpenAI SSE data: {e}"),
        })?;

        if let Some(message) = v["error"]["message"].as_str() {
            return Err(ModelError::StreamInterrupted {
                reason: message.to_owned(),
            });
        }

        if self.model.is_none() {
            self.model = v["model"].as_str().map(String::from);
        }

        if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
            self.usage = RequestUsage {
                input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
                output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
            };
        }

        let delta = &v["choices"][0]["delta"];
        if delta.is_null() {
            return Ok(None);
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0) as usize;
                if self.tool_call_builders.len() <= index {
                    self.tool_call_builders
                        .resize_with(index + 1, OpenAiToolCallBuilder::default);
                }
                let builder = &mut self.tool_call_builders[index];

                if let Some(id) = tc["id"].as_str() {
                    builder.id = id.to_owned();
                }
                let func = &tc["function"];
                if let Some(name) = func["name"].as_str() {
                    builder.name.push_str(name);
                }
                if let Some(args) = func["arguments"].as_str() {
                    builder.arguments.push_str(args);
                }
            }
        }

        Ok(delta["content"]
            .as_str()
            .filter(|text| !text.is_empty())
            .map(str::to_owned))
    }

    /// Chunks still owed once the stream has ended: the assembled tool calls,
    /// then usage.
    pub fn finish(self) -> Vec<StreamChunk> {
        let mut chunks: Vec<StreamChunk> = self
            .tool_call_builders
            .into_iter()
            .filter(|b| !b.name.is_empty())
            .map(|b| {
                StreamChunk::ToolCall(ToolCallPart {
                    tool_name: b.name,
                    args: parse_tool_arguments(&b.arguments),
                    tool_call_id: b.id,
                })
            })
            .collect();
        chunks.push(StreamChunk::Usage(self.usage));
        chunks
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
