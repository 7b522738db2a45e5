//! SSE stream parsing for the Anthropic Messages API.
//!
//! The Anthropic streaming format sends `event:` and `data:` lines in
//! standard SSE format.  [`SseParser`] turns those lines into typed
//! [`SseEvent`]s and [`AnthropicStreamAccumulator`] folds the events into
//! gateway [`StreamChunk`]s.  [`LineBuffer`] splits the raw byte stream into
//! lines for both providers.

use serde_json::Value;

use crate::error::ModelError;
use crate::llm::types::{StreamChunk, parse_tool_arguments};
use crate::message::ToolCallPart;
use crate::usage::RequestUsage;

// ---------------------------------------------------------------------------
// Line buffering
// ---------------------------------------------------------------------------

/// Splits a chunked byte stream into complete lines.
///
/// Bytes are buffered until a newline arrives, so multi-byte characters
/// split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every line they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, ModelError> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&line[..line.len() - 1])?);
        }
        Ok(lines)
    }

    /// Return whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Result<Option<String>, ModelError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let rest = std::mem::take(&mut self.pending);
        decode_line(&rest).map(Some)
    }
}

fn decode_line(bytes: &[u8]) -> Result<String, ModelError> {
    let line = std::str::from_utf8(bytes).map_err(|e| ModelError::StreamInterrupted {
        reason: format!("invalid UTF-8 in stream: {e}"),
    })?;
    Ok(line.trim_end_matches('\r').to_owned())
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events of the Anthropic streaming protocol (the SSE `event:` field).
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// Stream start; input tokens are known here.
    MessageStart { model: String, input_tokens: u64 },
    /// A content block opened.  `content_type` is `text` or `tool_use`.
    ContentBlockStart {
        index: u32,
        content_type: String,
        id: Option<String>,
        name: Option<String>,
    },
    ContentBlockDelta { index: u32, delta: SseDelta },
    ContentBlockStop { index: u32 },
    /// Final message metadata.
    MessageDelta {
        stop_reason: Option<String>,
        output_tokens: u64,
    },
    MessageStop,
    Ping,
    /// The provider reported an error mid-stream.
    Error { message: String },
}

/// Incremental delta within a content block.
#[derive(Debug, Clone, PartialEq)]
pub enum SseDelta {
    Text(String),
    /// A fragment of a tool-use input JSON document.
    InputJson(String),
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parses raw SSE lines from the Anthropic stream.
///
/// Keeps the most recent `event:` type because an event spans two lines.
#[derive(Debug, Default)]
pub struct SseParser {
    current_event_type: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a single line.
    ///
    /// Returns `Some(event)` once a `data:` line completes an event; `None`
    /// for comments, blank lines and `event:` lines.
    pub fn parse_line(&mut self, line: &str) -> Result<Option<SseEvent>, ModelError> {
        let line = line.trim_end();

        if line.starts_with(':') || line.is_empty() {
            return Ok(None);
        }

        if let Some(event_type) = line.strip_prefix("event:") {
            self.current_event_type = Some(event_type.trim().to_owned());
            return Ok(None);
        }

        if let Some(data) = line.strip_prefix("data:") {
            let event_type = self
                .current_event_type
                .take()
                .unwrap_or_else(|| "unknown".into());
            return parse_event(&event_type, data.trim_start());
        }

        tracing::trace!(line, "ignoring unrecognised SSE line");
        Ok(None)
    }
}

fn parse_event(event_type: &str, data: &str) -> Result<Option<SseEvent>, ModelError> {
    let event = match event_type {
        "message_start" => {
            let v = parse_json(data)?;
            let message = &v["message"];
            SseEvent::MessageStart {
                model: json_string(message, "model"),
                input_tokens: message["usage"]["input_tokens"].as_u64().unwrap_or(0),
            }
        }
        "content_block_start" => {
            let v = parse_json(data)?;
            let block = &v["content_block"];
            SseEvent::ContentBlockStart {
                index: json_index(&v),
                content_type: json_string(block, "type"),
                id: block["id"].as_str().map(String::from),
                name: block["name"].as_str().map(String::from),
            }
        }
        "content_block_delta" => {
            let v = parse_json(data)?;
            let delta = &v["delta"];
            let delta = match delta["type"].as_str() {
                Some("text_delta") => SseDelta::Text(json_string(delta, "text")),
                Some("input_json_delta") => SseDelta::InputJson(json_string(delta, "partial_json")),
                other => {
                    tracing::debug!(delta_type = ?other, "ignoring delta type");
                    return Ok(None);
                }
            };
            SseEvent::ContentBlockDelta {
                index: json_index(&v),
                delta,
            }
        }
        "content_block_stop" => {
            let v = parse_json(data)?;
            SseEvent::ContentBlockStop {
                index: json_index(&v),
            }
        }
        "message_delta" => {
            let v = parse_json(data)?;
            SseEvent::MessageDelta {
                stop_reason: v["delta"]["stop_reason"].as_str().map(String::from),
                output_tokens: v["usage"]["output_tokens"].as_u64().unwrap_or(0),
            }
        }
        "message_stop" => SseEvent::MessageStop,
        "ping" => SseEvent::Ping,
        "error" => {
            let v = parse_json(data)?;
            SseEvent::Error {
                message: json_string(&v["error"], "message"),
            }
        }
        _ if data.trim() == "[DONE]" => SseEvent::MessageStop,
        _ => {
            tracing::trace!(event_type, "ignoring unknown SSE event type");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

fn parse_json(data: &str) -> Result<Value, ModelError> {
    serde_json::from_str(data).map_err(|e| ModelError::ParseFailed {
        reason: format!("invalid JSON in SSE data: {e}"),
    })
}

fn json_string(v: &Value, field: &str) -> String {
    v[field].as_str().unwrap_or_default().to_owned()
}

fn json_index(v: &Value) -> u32 {
    v["index"].as_u64().unwrap_or(0) as u32
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// Turns Anthropic stream events into [`StreamChunk`]s.
///
/// Text deltas pass straight through; tool-use input arrives as JSON
/// fragments and is emitted as one [`StreamChunk::ToolCall`] when its block
/// closes.
#[derive(Debug, Default)]
pub struct AnthropicStreamAccumulator {
    open_tool: Option<ToolUseBuilder>,
    model: Option<String>,
    stopped: bool,
}

#[derive(Debug)]
struct ToolUseBuilder {
    index: u32,
    id: String,
    name: String,
    input_json: String,
}

impl AnthropicStreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `message_stop` has been seen.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Model name reported in `message_start`.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Apply one event, returning the chunk it produces (if any).
    pub fn apply(&mut self, event: SseEvent) -> Result<Option<StreamChunk>, ModelError> {
        let chunk = match event {
            SseEvent::MessageStart {
                model,
                input_tokens,
            } => {
                self.model = Some(model).filter(|m| !m.is_empty());
                Some(StreamChunk::Usage(RequestUsage {
                    input_tokens,
                    output_tokens: 0,
                }))
            }
            SseEvent::ContentBlockStart {
                index,
                content_type,
                id,
                name,
            } if content_type == "tool_use" => {
                self.open_tool = Some(ToolUseBuilder {
                    index,
                    id: id.unwrap_or_default(),
                    name: name.unwrap_or_default(),
                    input_json: String::new(),
                });
                None
            }
            SseEvent::ContentBlockDelta { delta, .. } => match delta {
                SseDelta::Text(text) if !text.is_empty() => Some(StreamChunk::TextDelta(text)),
                SseDelta::Text(_) => None,
                SseDelta::InputJson(fragment) => {
                    if let Some(builder) = self.open_tool.as_mut() {
                        builder.input_json.push_str(&fragment);
                    }
                    None
                }
            },
            SseEvent::ContentBlockStop { index } => match self.open_tool.take() {
                Some(builder) if builder.index == index => {
                    Some(StreamChunk::ToolCall(ToolCallPart {
                        tool_name: builder.name,
                        args: parse_tool_arguments(&builder.input_json),
                        tool_call_id: builder.id,
                    }))
                }
                other => {
                    self.open_tool = other;
                    None
                }
            },
            SseEvent::MessageDelta { output_tokens, .. } => Some(StreamChunk::Usage(RequestUsage {
                input_tokens: 0,
                output_tokens,
            })),
            SseEvent::MessageStop => {
                self.stopped = true;
                None
            }
            SseEvent::Error { message } => {
                return Err(ModelError::StreamInterrupted { reason: message });
            }
            SseEvent::ContentBlockStart { .. } | SseEvent::Ping => None,
        };
        Ok(chunk)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut SseParser, event: &str, data: &str) -> SseEvent {
        assert!(parser.parse_line(&format!("event: {event}")).unwrap().is_none());
        parser.parse_line(&format!("data: {data}")).unwrap().unwrap()
    }

    #[test]
    fn line_buffer_splits_and_keeps_partial() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"data: a\r\nda").unwrap(), vec!["data: a"]);
        assert_eq!(buf.push(b"ta: b\n\n").unwrap(), vec!["data: b", ""]);
        assert!(buf.finish().unwrap().is_none());
    }

    #[test]
    fn line_buffer_handles_split_utf8() {
        let bytes = "data: héllo\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xc3).unwrap() + 1;
        let mut buf = LineBuffer::new();
        assert!(buf.push(&bytes[..split]).unwrap().is_empty());
        assert_eq!(buf.push(&bytes[split..]).unwrap(), vec!["data: héllo"]);
    }

    #[test]
    fn parse_message_start_with_usage() {
        let mut parser = SseParser::new();
        let event = feed(
            &mut parser,
            "message_start",
            r#"{"type":"message_start","message":{"id":"msg_01","model":"claude-sonnet-4-20250514","usage":{"input_tokens":10,"output_tokens":0}}}"#,
        );
        assert_eq!(
            event,
            SseEvent::MessageStart {
                model: "claude-sonnet-4-20250514".into(),
                input_tokens: 10,
            }
        );
    }

    #[test]
    fn parse_deltas() {
        let mut parser = SseParser::new();
        let event = feed(
            &mut parser,
            "content_block_delta",
            r#"{"index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
        );
        assert_eq!(
            event,
            SseEvent::ContentBlockDelta {
                index: 0,
                delta: SseDelta::Text("Hello".into()),
            }
        );

        let event = feed(
            &mut parser,
            "content_block_delta",
            r#"{"index":1,"delta":{"type":"input_json_delta","partial_json":"{\"a\":"}}"#,
        );
        assert_eq!(
            event,
            SseEvent::ContentBlockDelta {
                index: 1,
                delta: SseDelta::InputJson(r#"{"a":"#.into()),
            }
        );
    }

    #[test]
    fn blank_comment_and_ping() {
        let mut parser = SseParser::new();
        assert!(parser.parse_line("").unwrap().is_none());
        assert!(parser.parse_line(": keepalive").unwrap().is_none());
        assert_eq!(feed(&mut parser, "ping", "{}"), SseEvent::Ping);
        assert_eq!(feed(&mut parser, "message_stop", "{}"), SseEvent::MessageStop);
    }

    #[test]
    fn invalid_json_is_parse_failure() {
        let mut parser = SseParser::new();
        parser.parse_line("event: message_delta").unwrap();
        let err = parser.parse_line("data: {oops").unwrap_err();
        assert!(matches!(err, ModelError::ParseFailed { .. }));
    }

    #[test]
    fn accumulator_assembles_tool_use() {
        let mut acc = AnthropicStreamAccumulator::new();
        let events = vec![
            SseEvent::MessageStart {
                model: "claude".into(),
                input_tokens: 7,
            },
            SseEvent::ContentBlockStart {
                index: 0,
                content_type: "text".into(),
                id: None,
                name: None,
            },
            SseEvent::ContentBlockDelta {
                index: 0,
                delta: SseDelta::Text("Adding.".into()),
            },
            SseEvent::ContentBlockStop { index: 0 },
            SseEvent::ContentBlockStart {
                index: 1,
                content_type: "tool_use".into(),
                id: Some("toolu_1".into()),
                name: Some("sum".into()),
            },
            SseEvent::ContentBlockDelta {
                index: 1,
                delta: SseDelta::InputJson(r#"{"a": 1,"#.into()),
            },
            SseEvent::ContentBlockDelta {
                index: 1,
                delta: SseDelta::InputJson(r#" "b": 2}"#.into()),
            },
            SseEvent::ContentBlockStop { index: 1 },
            SseEvent::MessageDelta {
                stop_reason: Some("tool_use".into()),
                output_tokens: 12,
            },
            SseEvent::MessageStop,
        ];

        let chunks: Vec<StreamChunk> = events
            .into_iter()
            .filter_map(|e| acc.apply(e).unwrap())
            .collect();

        assert!(acc.is_stopped());
        assert_eq!(acc.model(), Some("claude"));
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[1], StreamChunk::TextDelta("Adding.".into()));
        match &chunks[2] {
            StreamChunk::ToolCall(call) => {
                assert_eq!(call.tool_name, "sum");
                assert_eq!(call.tool_call_id, "toolu_1");
                assert_eq!(call.args["b"], 2);
            }
            other => panic!("unexpected chunk: {other:?}"),
        }
        assert_eq!(
            chunks[3],
            StreamChunk::Usage(RequestUsage {
                input_tokens: 0,
                output_tokens: 12,
            })
        );
    }

    #[test]
    fn stream_error_event_fails() {
        let mut acc = AnthropicStreamAccumulator::new();
        let err = acc
            .apply(SseEvent::Error {
                message: "overloaded".into(),
            })
            .unwrap_err();
        assert!(err.is_transient());
    }
}
