//! Multi-provider HTTP completion client.
//!
//! Supports the **Anthropic Messages API** and the **OpenAI Chat Completions
//! API** (including OpenAI-compatible endpoints such as Ollama, Together, and
//! vLLM) with both streaming SSE and non-streaming modes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::error::ModelError;
use crate::llm::model::{CompletionModel, ModelProvider};
use crate::llm::streaming::{AnthropicStreamAccumulator, LineBuffer, SseParser};
use crate::llm::streaming_openai::OpenAiStreamAccumulator;
use crate::llm::types::{
    CompletionStream, ModelRequest, ModelResponse, ModelSettings, StreamChunk, ToolDefinition,
    parse_tool_arguments,
};
use crate::message::{ConversationMessage, MessageKind, MessagePart, ToolCallPart};
use crate::usage::RequestUsage;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default Anthropic API base URL.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Default OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_MAX_TOKENS: u32 = 4096;

const DEFAULT_TIMEOUT_SECS: u64 = 120;

// ---------------------------------------------------------------------------
// Provider enum
// ---------------------------------------------------------------------------

/// Wire protocol spoken by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    /// Anthropic Messages API.
    Anthropic,
    /// OpenAI Chat Completions API (also covers OpenAI-compatible endpoints).
    OpenAI,
}

impl LlmProvider {
    pub fn name(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAI => "openai",
        }
    }
}

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// Connection settings for one provider endpoint.
///
/// A config is also a [`ModelProvider`]: registered in the model catalog, it
/// creates one [`LlmClient`] per model name.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    /// Base URL for the API (e.g. `https://api.anthropic.com`).
    pub base_url: String,
    /// Maximum tokens per response when the request does not set one.
    pub max_tokens: u32,
    /// Default HTTP timeout.
    pub timeout_secs: u64,
}

impl LlmClientConfig {
    /// Configuration for the Anthropic API.
    pub fn anthropic(api_key: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_owned(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Configuration for the OpenAI API.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_owned(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Configuration for any OpenAI-compatible API.
    pub fn openai_compatible(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::openai(api_key)
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl ModelProvider for LlmClientConfig {
    fn create(&self, model_name: &str) -> Result<Arc<dyn CompletionModel>, ModelError> {
        Ok(Arc::new(LlmClient::new(self.clone(), model_name)?))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A completion backend talking to one model over HTTP.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: Arc<LlmClientConfig>,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    /// Create a client for `model` on the configured endpoint.
    pub fn new(config: LlmClientConfig, model: impl Into<String>) -> Result<Self, ModelError> {
        if config.api_key.is_empty() {
            return Err(ModelError::MissingApiKey {
                provider: config.provider.name().into(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ModelError::RequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
                retryable: false,
            })?;

        Ok(Self {
            config: Arc::new(config),
            model: model.into(),
            http,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.config.provider
    }

    fn build_request_body(&self, request: &ModelRequest, stream: bool) -> Value {
        match self.config.provider {
            LlmProvider::Anthropic => self.build_anthropic_request_body(request, stream),
            LlmProvider::OpenAI => self.build_openai_request_body(request, stream),
        }
    }

    /// Build the JSON body for the Anthropic Messages API.
    fn build_anthropic_request_body(&self, request: &ModelRequest, stream: bool) -> Value {
        let (system_text, messages) = messages_to_anthropic(&request.messages);
        let settings = &request.settings;

        let mut body = json!({
            "model": self.model,
            "max_tokens": settings.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": messages,
        });
        if let Some(system) = system_text {
            body["system"] = json!(system);
        }
        apply_sampling(&mut body, settings);

        let tools: Vec<&ToolDefinition> = request.all_tools().collect();
        if !tools.is_empty() {
            body["tools"] = tools_to_anthropic(&tools);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    /// Build the JSON body for the OpenAI Chat Completions API.
    fn build_openai_request_body(&self, request: &ModelRequest, stream: bool) -> Value {
        let settings = &request.settings;

        let mut body = json!({
            "model": self.model,
            "max_tokens": settings.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": messages_to_openai(&request.messages),
        });
        apply_sampling(&mut body, settings);

        let tools: Vec<&ToolDefinition> = request.all_tools().collect();
        if !tools.is_empty() {
            body["tools"] = tools_to_openai(&tools);
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    fn headers(&self) -> Result<HeaderMap, ModelError> {
        let invalid = |e: reqwest::header::InvalidHeaderValue| ModelError::RequestFailed {
            reason: format!("invalid API key header: {e}"),
            retryable: false,
        };

        let mut headers = HeaderMap::new();
        match self.config.provider {
            LlmProvider::Anthropic => {
                headers.insert(
                    "x-api-key",
                    HeaderValue::from_str(&self.config.api_key).map_err(invalid)?,
                );
                headers.insert(
                    "anthropic-version",
                    HeaderValue::from_static(ANTHROPIC_VERSION),
                );
            }
            LlmProvider::OpenAI => {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
                        .map_err(invalid)?,
                );
            }
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// POST `body` and fail on non-success status.
    ///
    /// 429 and 5xx responses are reported as retryable.
    async fn send(
        &self,
        body: &Value,
        settings: &ModelSettings,
    ) -> Result<reqwest::Response, ModelError> {
        let url = match self.config.provider {
            LlmProvider::Anthropic => format!("{}/v1/messages", self.config.base_url),
            LlmProvider::OpenAI => format!("{}/chat/completions", self.config.base_url),
        };

        tracing::debug!(
            url = %url,
            model = %self.model,
            provider = self.config.provider.name(),
            "sending LLM request"
        );

        let mut builder = self.http.post(&url).headers(self.headers()?).json(body);
        if let Some(secs) = settings.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::RequestFailed {
                reason: format!("API returned {status}: {text}"),
                retryable: status.as_u16() == 429 || status.is_server_error(),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl CompletionModel for LlmClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn request(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let body = self.build_request_body(request, false);
        let resp = self.send(&body, &request.settings).await?;

        let text = resp.text().await.map_err(|e| ModelError::RequestFailed {
            reason: format!("failed to read response body: {e}"),
            retryable: true,
        })?;
        let v: Value = serde_json::from_str(&text).map_err(|e| ModelError::ParseFailed {
            reason: format!("invalid JSON response: {e}"),
        })?;

        match self.config.provider {
            LlmProvider::Anthropic => parse_anthropic_response(&v),
            LlmProvider::OpenAI => parse_openai_response(&v),
        }
    }

    async fn request_stream(&self, request: &ModelRequest) -> Result<CompletionStream, ModelError> {
        let body = self.build_request_body(request, true);
        let resp = self.send(&body, &request.settings).await?;

        Ok(match self.config.provider {
            LlmProvider::Anthropic => Box::pin(anthropic_chunks(resp)),
            LlmProvider::OpenAI => Box::pin(openai_chunks(resp)),
        })
    }
}

fn apply_sampling(body: &mut Value, settings: &ModelSettings) {
    if let Some(temp) = settings.temperature {
        body["temperature"] = json!(temp);
    }
    if let Some(top_p) = settings.top_p {
        body["top_p"] = json!(top_p);
    }
}

fn stream_error(e: reqwest::Error) -> ModelError {
    ModelError::StreamInterrupted {
        reason: format!("stream read error: {e}"),
    }
}

// ===========================================================================
// Streaming
// ===========================================================================

/// Chunks of an Anthropic SSE response.  Dropping the stream drops the
/// connection.
fn anthropic_chunks(
    resp: reqwest::Response,
) -> impl Stream<Item = Result<StreamChunk, ModelError>> + Send {
    async_stream::try_stream! {
        let mut bytes = resp.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut parser = SseParser::new();
        let mut acc = AnthropicStreamAccumulator::new();

        while !acc.is_stopped() {
            let Some(chunk) = bytes.next().await else { break };
            let chunk = chunk.map_err(stream_error)?;
            for line in lines.push(&chunk)? {
                if let Some(event) = parser.parse_line(&line)? {
                    if let Some(out) = acc.apply(event)? {
                        yield out;
                    }
                }
            }
        }
    }
}

/// Chunks of an OpenAI SSE response.  Tool calls and usage are emitted once
/// the stream is done.
fn openai_chunks(
    resp: reqwest::Response,
) -> impl Stream<Item = Result<StreamChunk, ModelError>> + Send {
    async_stream::try_stream! {
        let mut bytes = resp.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut acc = OpenAiStreamAccumulator::new();

        while !acc.is_done() {
            let Some(chunk) = bytes.next().await else { break };
            let chunk = chunk.map_err(stream_error)?;
            for line in lines.push(&chunk)? {
                if let Some(text) = acc.feed_line(&line)? {
                    yield StreamChunk::TextDelta(text);
                }
            }
        }
        if let Some(line) = lines.finish()? {
            if let Some(text) = acc.feed_line(&line)? {
                yield StreamChunk::TextDelta(text);
            }
        }
        for chunk in acc.finish() {
            yield chunk;
        }
    }
}

// ===========================================================================
// Anthropic format conversion (free functions)
// ===========================================================================

/// Split system prompts out (Anthropic takes them as a top-level field) and
/// convert the rest of the conversation to the Anthropic wire format.
///
/// Each conversation message becomes one wire message, so roles alternate.
fn messages_to_anthropic(messages: &[ConversationMessage]) -> (Option<String>, Vec<Value>) {
    let mut system: Option<String> = None;
    let mut wire_messages: Vec<Value> = Vec::with_capacity(messages.len());

    for msg in messages {
        let mut content: Vec<Value> = Vec::new();
        for part in &msg.parts {
            match part {
                MessagePart::SystemPrompt(p) => match &mut system {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(&p.content);
                    }
                    None => system = Some(p.content.clone()),
                },
                MessagePart::UserPrompt(p) => {
                    content.push(json!({"type": "text", "text": p.content}));
                }
                MessagePart::Text(p) => {
                    content.push(json!({"type": "text", "text": p.content}));
                }
                MessagePart::ToolCall(call) => {
                    content.push(json!({
                        "type": "tool_use",
                        "id": call.tool_call_id,
                        "name": call.tool_name,
                        "input": call
                            .args_object()
                            .map(Value::Object)
                            .unwrap_or_else(|_| json!({})),
                    }));
                }
                MessagePart::ToolReturn(ret) => {
                    content.push(json!({
                        "type": "tool_result",
                        "tool_use_id": ret.tool_call_id,
                        "content": content_to_string(&ret.content),
                    }));
                }
                MessagePart::RetryPrompt(retry) => match &retry.tool_call_id {
                    Some(id) => content.push(json!({
                        "type": "tool_result",
                        "tool_use_id": id,
                        "content": retry.model_response(),
                        "is_error": true,
                    })),
                    None => content.push(json!({"type": "text", "text": retry.model_response()})),
                },
            }
        }

        if content.is_empty() {
            continue;
        }
        let role = match msg.kind {
            MessageKind::Request => "user",
            MessageKind::Response => "assistant",
        };
        wire_messages.push(json!({"role": role, "content": content}));
    }

    (system, wire_messages)
}

/// Convert tool definitions into the Anthropic API format.
fn tools_to_anthropic(tools: &[&ToolDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters,
            })
        })
        .collect();
    json!(tool_values)
}

/// Parse a non-streaming Anthropic Messages API response.
fn parse_anthropic_response(v: &Value) -> Result<ModelResponse, ModelError> {
    let content = v["content"]
        .as_array()
        .ok_or_else(|| ModelError::ParseFailed {
            reason: "missing `content` array in response".into(),
        })?;

    let mut parts = Vec::with_capacity(content.len());
    for block in content {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(text) = block["text"].as_str().filter(|t| !t.is_empty()) {
                    parts.push(MessagePart::text(text));
                }
            }
            Some("tool_use") => parts.push(MessagePart::ToolCall(ToolCallPart {
                tool_name: block["name"].as_str().unwrap_or_default().to_owned(),
                args: block["input"].clone(),
                tool_call_id: block["id"].as_str().unwrap_or_default().to_owned(),
            })),
            _ => {}
        }
    }

    Ok(ModelResponse {
        parts,
        usage: RequestUsage {
            input_tokens: v["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: v["usage"]["output_tokens"].as_u64().unwrap_or(0),
        },
        model_name: v["model"].as_str().map(String::from),
    })
}

// ===========================================================================
// OpenAI format conversion (free functions)
// ===========================================================================

/// Convert the conversation to the OpenAI Chat Completions wire format.
///
/// System prompts stay in the `messages` array, tool calls go in
/// `assistant.tool_calls`, and tool results use `role: "tool"`.
pub fn messages_to_openai(messages: &[ConversationMessage]) -> Vec<Value> {
    let mut wire_messages: Vec<Value> = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.kind {
            MessageKind::Request => {
                for part in &msg.parts {
                    let wire = match part {
                        MessagePart::SystemPrompt(p) => {
                            json!({"role": "system", "content": p.content})
                        }
                        MessagePart::UserPrompt(p) => json!({"role": "user", "content": p.content}),
                        MessagePart::Text(p) => json!({"role": "user", "content": p.content}),
                        MessagePart::ToolReturn(ret) => json!({
                            "role": "tool",
                            "tool_call_id": ret.tool_call_id,
                            "content": content_to_string(&ret.content),
                        }),
                        MessagePart::RetryPrompt(retry) => match &retry.tool_call_id {
                            Some(id) => json!({
                                "role": "tool",
                                "tool_call_id": id,
                                "content": retry.model_response(),
                            }),
                            None => json!({"role": "user", "content": retry.model_response()}),
                        },
                        MessagePart::ToolCall(_) => continue,
                    };
                    wire_messages.push(wire);
                }
            }
            MessageKind::Response => {
                let tool_calls: Vec<Value> = msg
                    .tool_calls()
                    .map(|tc| {
                        let arguments = match &tc.args {
                            Value::String(raw) => raw.clone(),
                            other => other.to_string(),
                        };
                        json!({
                            "id": tc.tool_call_id,
                            "type": "function",
                            "function": {"name": tc.tool_name, "arguments": arguments},
                        })
                    })
                    .collect();
                let text = msg.text();

                let mut m = json!({"role": "assistant"});
                if let Some(text) = &text {
                    m["content"] = json!(text);
                }
                if !tool_calls.is_empty() {
                    m["tool_calls"] = json!(tool_calls);
                }
                if text.is_some() || !tool_calls.is_empty() {
                    wire_messages.push(m);
                }
            }
        }
    }

    wire_messages
}

/// Convert tool definitions into the OpenAI format.
///
/// OpenAI wraps each tool in `{"type": "function", "function": {...}}`.
pub fn tools_to_openai(tools: &[&ToolDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect();
    json!(tool_values)
}

/// Parse a non-streaming OpenAI Chat Completions response.
pub fn parse_openai_response(v: &Value) -> Result<ModelResponse, ModelError> {
    let message = &v["choices"][0]["message"];
    if message.is_null() {
        return Err(ModelError::ParseFailed {
            reason: "missing `choices[0].message` in response".into(),
        });
    }

    let mut parts = Vec::new();
    if let Some(content) = message["content"].as_str().filter(|c| !c.is_empty()) {
        parts.push(MessagePart::text(content));
    }
    if let Some(tool_calls) = message["tool_calls"].as_array() {
        for tc in tool_calls {
            let func = &tc["function"];
            parts.push(MessagePart::ToolCall(ToolCallPart {
                tool_name: func["name"].as_str().unwrap_or_default().to_owned(),
                args: parse_tool_arguments(func["arguments"].as_str().unwrap_or_default()),
                tool_call_id: tc["id"].as_str().unwrap_or_default().to_owned(),
            }));
        }
    }

    Ok(ModelResponse {
        parts,
        usage: RequestUsage {
            input_tokens: v["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: v["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        },
        model_name: v["model"].as_str().map(String::from),
    })
}

/// Tool results travel as strings on both wire formats.
fn content_to_string(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
