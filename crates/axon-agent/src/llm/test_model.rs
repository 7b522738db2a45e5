//! Deterministic offline model.
//!
//! [`TestModel`] never talks to a provider.  On the first step after a user
//! prompt it calls every function tool once with arguments synthesised from
//! the tool's schema; afterwards it answers, either through the output tool
//! (with synthesised data) or with the collected tool returns as JSON text.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::error::ModelError;
use crate::llm::model::CompletionModel;
use crate::llm::types::{ModelRequest, ModelResponse};
use crate::message::{ConversationMessage, MessagePart, ToolCallPart};
use crate::usage::RequestUsage;

/// Baseline input token estimate per request.
const BASE_INPUT_TOKENS: u64 = 50;

#[derive(Debug, Clone)]
pub struct TestModel {
    name: String,
    call_tools: bool,
    output_text: Option<String>,
    output_args: Option<Value>,
}

impl Default for TestModel {
    fn default() -> Self {
        Self::new()
    }
}

impl TestModel {
    pub fn new() -> Self {
        Self {
            name: "test".into(),
            call_tools: true,
            output_text: None,
            output_args: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Answer with this text when the agent has no result schema.
    pub fn with_output_text(mut self, text: impl Into<String>) -> Self {
        self.output_text = Some(text.into());
        self
    }

    /// Call the output tool with these arguments instead of synthesised ones.
    pub fn with_output_args(mut self, args: Value) -> Self {
        self.output_args = Some(args);
        self
    }

    /// Skip function tools and answer straight away.
    pub fn without_tool_calls(mut self) -> Self {
        self.call_tools = false;
        self
    }

    fn respond(&self, request: &ModelRequest) -> Vec<MessagePart> {
        let current = current_turn(&request.messages);
        let tools_called = current.iter().any(|m| {
            m.tool_calls()
                .any(|call| request.tools.iter().any(|t| t.name == call.tool_name))
        });

        if self.call_tools && !request.tools.is_empty() && !tools_called {
            return request
                .tools
                .iter()
                .map(|tool| {
                    MessagePart::ToolCall(ToolCallPart::new(
                        &tool.name,
                        example_from_schema(&tool.parameters),
                    ))
                })
                .collect();
        }

        if let Some(output) = &request.output_tool {
            let args = self
                .output_args
                .clone()
                .unwrap_or_else(|| example_from_schema(&output.parameters));
            return vec![MessagePart::ToolCall(ToolCallPart::new(&output.name, args))];
        }

        let text = self.output_text.clone().unwrap_or_else(|| {
            let returns: Map<String, Value> = current
                .iter()
                .flat_map(|m| m.parts.iter())
                .filter_map(|part| match part {
                    MessagePart::ToolReturn(ret) => {
                        Some((ret.tool_name.clone(), ret.content.clone()))
                    }
                    _ => None,
                })
                .collect();
            if returns.is_empty() {
                "success (no tool calls)".to_owned()
            } else {
                Value::Object(returns).to_string()
            }
        });
        vec![MessagePart::text(text)]
    }
}

#[async_trait]
impl CompletionModel for TestModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let parts = self.respond(request);
        let usage = RequestUsage {
            input_tokens: BASE_INPUT_TOKENS
                + request
                    .messages
                    .iter()
                    .flat_map(|m| m.parts.iter())
                    .map(part_words)
                    .sum::<u64>(),
            output_tokens: parts.iter().map(part_words).sum(),
        };
        Ok(ModelResponse {
            parts,
            usage,
            model_name: Some(self.name.clone()),
        })
    }
}

/// Messages since the most recent user prompt.
fn current_turn(messages: &[ConversationMessage]) -> &[ConversationMessage] {
    let start = messages
        .iter()
        .rposition(|m| {
            m.parts
                .iter()
                .any(|p| matches!(p, MessagePart::UserPrompt(_)))
        })
        .unwrap_or(0);
    &messages[start..]
}

fn part_words(part: &MessagePart) -> u64 {
    let words = |s: &str| s.split_whitespace().count() as u64;
    match part {
        MessagePart::SystemPrompt(p) => words(&p.content),
        MessagePart::UserPrompt(p) => words(&p.content),
        MessagePart::Text(p) => words(&p.content),
        MessagePart::ToolCall(p) => 1 + words(&p.args.to_string()),
        MessagePart::ToolReturn(p) => words(&p.content.to_string()),
        MessagePart::RetryPrompt(p) => words(&p.content),
    }
}

/// Synthesise a value matching a JSON Schema fragment.
///
/// Strings become `"a"`, numbers zero, booleans `false`, arrays empty;
/// objects get every declared property.
pub fn example_from_schema(schema: &Value) -> Value {
    match schema["type"].as_str() {
        Some("string") => json!("a"),
        Some("integer") => json!(0),
        Some("number") => json!(0.0),
        Some("boolean") => json!(false),
        Some("array") => json!([]),
        Some("null") => Value::Null,
        Some("object") | None if schema.get("properties").is_some() => {
            let properties = schema["properties"].as_object().cloned().unwrap_or_default();
            Value::Object(
                properties
                    .iter()
                    .map(|(name, sub)| (name.clone(), example_from_schema(sub)))
                    .collect(),
            )
        }
        Some("object") => json!({}),
        _ => Value::Null,
    }
}
