//! Execution dispatcher.
//!
//! Drives an agent through a run: the model is called with the conversation
//! so far, tool calls are executed and fed back, and the loop ends when the
//! model produces a result that satisfies the agent's result schema (or plain
//! text when there is none).  Failures the model can fix (bad tool arguments,
//! failing handlers, invalid results) are sent back as retry prompts, bounded
//! by the agent's [`RetryPolicy`](crate::definition::RetryPolicy).
//!
//! Three entry points share the same state machine:
//!
//! - [`Dispatcher::run_sync`] returns the final [`RunResult`].
//! - [`Dispatcher::run_stream`] returns a [`RunStream`] of text fragments
//!   followed by exactly one terminal result or error.  Dropping the stream
//!   cancels the run.
//! - [`Dispatcher::call_tool`] invokes one tool directly, without a model.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::definition::{AgentDefinition, OUTPUT_TOOL_NAME};
use crate::error::{GatewayError, ModelError, Result};
use crate::llm::{ModelRequest, ModelResponse, ModelSettings, ResponseAccumulator, StreamChunk};
use crate::message::{
    ConversationMessage, MessagePart, RetryPromptPart, ToolCallPart, ToolReturnPart,
    new_tool_call_id, validate_history,
};
use crate::registry::AgentRegistry;
use crate::tools::ToolRegistry;
use crate::usage::{Usage, UsageLimits};

/// First backoff delay between transient model failures; doubles per attempt.
const BASE_BACKOFF_MS: u64 = 100;

/// Ceiling for a single backoff delay.
const MAX_BACKOFF_MS: u64 = 10_000;

const FINAL_RESULT_PROCESSED: &str = "Final result processed.";
const TOOL_NOT_EXECUTED: &str = "Tool not executed - a final result was already processed.";
const EMPTY_RESPONSE_RETRY: &str = "Received an empty response. Reply with text or call a tool.";

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// Input of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub prompt: String,
    /// Earlier conversation to continue from, usually the `messages` of a
    /// previous [`RunResult`].
    #[serde(default, alias = "history")]
    pub message_history: Vec<ConversationMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_settings: Option<ModelSettings>,
    /// When omitted the default request limit still applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_limits: Option<UsageLimits>,
}

impl RunRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationMessage>) -> Self {
        self.message_history = history;
        self
    }

    pub fn with_model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = Some(settings);
        self
    }

    pub fn with_usage_limits(mut self, limits: UsageLimits) -> Self {
        self.usage_limits = Some(limits);
        self
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    /// Validated result, or the model's text when the agent has no schema.
    pub data: Value,
    pub usage: Usage,
    /// Every message of the conversation, replayed history included.
    pub messages: Vec<ConversationMessage>,
    /// Index of the first message produced by this run.
    pub new_message_index: usize,
}

impl RunResult {
    /// Messages produced by this run, without the replayed history.
    pub fn new_messages(&self) -> &[ConversationMessage] {
        &self.messages[self.new_message_index..]
    }
}

// ---------------------------------------------------------------------------
// Streaming handle
// ---------------------------------------------------------------------------

/// Element of a [`RunStream`].
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A piece of model-authored text, in arrival order.
    Fragment(String),
    /// Terminal success.
    Result(Box<RunResult>),
    /// Terminal failure.
    Error(GatewayError),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Fragment(_))
    }
}

/// Lazy, single-use sequence of [`StreamEvent`]s.
///
/// The terminal outcome is kept once it has been yielded, so it can be read
/// back after the stream is exhausted.
pub struct RunStream {
    inner: Pin<Box<dyn Stream<Item = StreamEvent> + Send>>,
    outcome: Option<Result<RunResult>>,
}

impl RunStream {
    fn new(inner: impl Stream<Item = StreamEvent> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(inner),
            outcome: None,
        }
    }

    /// The final result, once the stream has yielded it.
    pub fn result(&self) -> Option<&RunResult> {
        self.outcome.as_ref().and_then(|o| o.as_ref().ok())
    }

    /// The terminal error, once the stream has yielded it.
    pub fn error(&self) -> Option<&GatewayError> {
        self.outcome.as_ref().and_then(|o| o.as_ref().err())
    }

    /// Consume the handle, returning the final result if there was one.
    pub fn into_result(self) -> Option<RunResult> {
        self.outcome.and_then(|o| o.ok())
    }

    /// Drive the stream to the end, discarding fragments.
    pub async fn finish(mut self) -> Result<RunResult> {
        while self.next().await.is_some() {}
        self.outcome.unwrap_or_else(|| {
            Err(GatewayError::Unexpected(
                "run stream ended without a terminal event".into(),
            ))
        })
    }
}

impl std::fmt::Debug for RunStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStream")
            .field("finished", &self.outcome.is_some())
            .finish_non_exhaustive()
    }
}

impl Stream for RunStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_next(cx);
        if let Poll::Ready(Some(event)) = &polled {
            match event {
                StreamEvent::Result(result) => this.outcome = Some(Ok((**result).clone())),
                StreamEvent::Error(err) => this.outcome = Some(Err(err.clone())),
                StreamEvent::Fragment(_) => {}
            }
        }
        polled
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Executes runs and tool calls against the agents of an [`AgentRegistry`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: AgentRegistry,
}

impl Dispatcher {
    pub fn new(registry: AgentRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Run an agent to completion.
    ///
    /// # Errors
    ///
    /// [`GatewayError::AgentNotFound`], [`GatewayError::InvalidRequest`],
    /// [`GatewayError::UsageLimitExceeded`], [`GatewayError::ModelBehavior`]
    /// or [`GatewayError::ResultValidation`].
    pub async fn run_sync(&self, agent_id: &str, request: RunRequest) -> Result<RunResult> {
        let definition = self.registry.lookup(agent_id)?;
        let mut run = Run::start(definition, request)?;

        match run.drive().await {
            Ok(data) => Ok(run.finish(data)),
            Err(err) => Err(run.fail(err)),
        }
    }

    /// Run an agent, streaming text fragments as they arrive.
    ///
    /// Never fails up front: a missing agent or an invalid request is the
    /// stream's terminal [`StreamEvent::Error`].
    pub fn run_stream(&self, agent_id: &str, request: RunRequest) -> RunStream {
        let started = self
            .registry
            .lookup(agent_id)
            .and_then(|definition| Run::start(definition, request));

        RunStream::new(async_stream::stream! {
            let mut run = match started {
                Ok(run) => run,
                Err(err) => {
                    yield StreamEvent::Error(err);
                    return;
                }
            };

            loop {
                if let Err(err) = run.check_before_request() {
                    yield StreamEvent::Error(run.fail(err));
                    return;
                }

                let model_request = run.model_request();
                let model = Arc::clone(&run.definition.model);
                let opened = run
                    .with_model_retry(|| model.request_stream(&model_request))
                    .await;
                let mut chunks = match opened {
                    Ok(chunks) => chunks,
                    Err(err) => {
                        yield StreamEvent::Error(run.fail(err));
                        return;
                    }
                };

                let mut accumulator = ResponseAccumulator::new();
                let mut interrupted: Option<ModelError> = None;
                while let Some(chunk) = chunks.next().await {
                    match chunk {
                        Ok(StreamChunk::TextDelta(delta)) => {
                            if !delta.is_empty() {
                                yield StreamEvent::Fragment(delta.clone());
                            }
                            accumulator.apply(StreamChunk::TextDelta(delta));
                        }
                        Ok(chunk) => accumulator.apply(chunk),
                        Err(err) => {
                            interrupted = Some(err);
                            break;
                        }
                    }
                }
                drop(chunks);

                if let Some(err) = interrupted {
                    yield StreamEvent::Error(run.fail(err.into()));
                    return;
                }

                let response = accumulator.finish(Some(model.name().to_owned()));
                if let Err(err) = run.record_response(response) {
                    yield StreamEvent::Error(run.fail(err));
                    return;
                }

                match run.advance().await {
                    Ok(Some(data)) => {
                        yield StreamEvent::Result(Box::new(run.finish(data)));
                        return;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        yield StreamEvent::Error(run.fail(err));
                        return;
                    }
                }
            }
        })
    }

    /// Invoke one of an agent's tools directly.
    pub async fn call_tool(
        &self,
        agent_id: &str,
        tool_name: &str,
        arguments: &Value,
    ) -> Result<Value> {
        let definition = self.registry.lookup(agent_id)?;
        tracing::info!(agent_id = %agent_id, tool = %tool_name, "direct tool call");
        definition.tools.invoke(tool_name, arguments).await
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Mutable state of one run.
struct Run {
    run_id: Uuid,
    definition: Arc<AgentDefinition>,
    messages: Vec<ConversationMessage>,
    new_message_index: usize,
    usage: Usage,
    limits: UsageLimits,
    settings: ModelSettings,
    step: u32,
    tool_retries: HashMap<String, u32>,
    result_retries: u32,
    empty_responses: u32,
}

impl Run {
    fn start(definition: Arc<AgentDefinition>, request: RunRequest) -> Result<Self> {
        if request.prompt.trim().is_empty() {
            return Err(GatewayError::InvalidRequest {
                reason: "prompt must not be empty".into(),
            });
        }
        validate_history(&request.message_history)?;

        let mut messages = request.message_history;
        let new_message_index = messages.len();

        let mut parts = Vec::with_capacity(2);
        if new_message_index == 0 && !definition.system_prompt.is_empty() {
            parts.push(MessagePart::system_prompt(&definition.system_prompt));
        }
        parts.push(MessagePart::user_prompt(request.prompt));
        messages.push(ConversationMessage::request(parts));

        let settings = definition
            .model_settings
            .merged_with(&request.model_settings.unwrap_or_default());
        let run = Self {
            run_id: Uuid::now_v7(),
            limits: request.usage_limits.unwrap_or_default(),
            settings,
            definition,
            messages,
            new_message_index,
            usage: Usage::default(),
            step: 0,
            tool_retries: HashMap::new(),
            result_retries: 0,
            empty_responses: 0,
        };

        tracing::info!(
            run_id = %run.run_id,
            agent_id = %run.definition.agent_id,
            history = new_message_index,
            "run started"
        );
        Ok(run)
    }

    fn check_before_request(&self) -> Result<()> {
        self.limits.check_before_request(&self.usage)?;
        Ok(())
    }

    /// Non-streaming step loop.
    async fn drive(&mut self) -> Result<Value> {
        loop {
            self.check_before_request()?;
            let model_request = self.model_request();
            let model = Arc::clone(&self.definition.model);
            let response = self
                .with_model_retry(|| model.request(&model_request))
                .await?;
            self.record_response(response)?;
            if let Some(data) = self.advance().await? {
                return Ok(data);
            }
        }
    }

    fn model_request(&self) -> ModelRequest {
        ModelRequest {
            messages: self.messages.clone(),
            tools: self.definition.tools.definitions(),
            output_tool: self.definition.output_tool(),
            settings: self.settings,
        }
    }

    /// Call the model, retrying transient failures with exponential backoff.
    async fn with_model_retry<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ModelError>>,
    {
        let max_retries = self.definition.retry_policy.max_retries;
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_retries => {
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        run_id = %self.run_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient model failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Account usage and append the response to the conversation.
    fn record_response(&mut self, mut response: ModelResponse) -> Result<()> {
        self.step += 1;
        self.usage.record(response.usage);

        for part in &mut response.parts {
            if let MessagePart::ToolCall(call) = part
                && call.tool_call_id.is_empty()
            {
                call.tool_call_id = new_tool_call_id();
            }
        }

        tracing::debug!(
            run_id = %self.run_id,
            step = self.step,
            parts = response.parts.len(),
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "model step"
        );

        self.messages
            .push(ConversationMessage::response(response.parts, response.model_name));
        self.limits.check_after_response(&self.usage)?;
        Ok(())
    }

    /// Act on the latest response.  Returns the result data when the run is
    /// complete; otherwise appends the next request message.
    async fn advance(&mut self) -> Result<Option<Value>> {
        let Some(response) = self.messages.last() else {
            return Err(GatewayError::Unexpected("no model response to act on".into()));
        };
        let calls: Vec<ToolCallPart> = response.tool_calls().cloned().collect();
        let text = response.text();

        let has_schema = self.definition.result_schema.is_some();
        let (output_calls, function_calls): (Vec<ToolCallPart>, Vec<ToolCallPart>) = calls
            .into_iter()
            .partition(|call| has_schema && call.tool_name == OUTPUT_TOOL_NAME);

        let mut next = Vec::new();

        if let Some((first, rest)) = output_calls.split_first() {
            match self.validate_output_call(first) {
                Ok(data) => {
                    next.push(tool_return(first, Value::String(FINAL_RESULT_PROCESSED.into())));
                    next.extend(
                        rest.iter()
                            .chain(&function_calls)
                            .map(|call| tool_return(call, Value::String(TOOL_NOT_EXECUTED.into()))),
                    );
                    self.messages.push(ConversationMessage::request(next));
                    return Ok(Some(data));
                }
                Err(reason) => {
                    self.consume_result_retry(&reason)?;
                    next.push(retry_prompt(first, reason));
                    next.extend(
                        rest.iter()
                            .map(|call| tool_return(call, Value::String(TOOL_NOT_EXECUTED.into()))),
                    );
                }
            }
        }

        if !function_calls.is_empty() {
            let parts = self.execute_tools(&function_calls).await?;
            next.extend(parts);
        } else if output_calls.is_empty() {
            match text.filter(|t| !t.trim().is_empty()) {
                Some(text) => match self.validate_text(text) {
                    Ok(data) => return Ok(Some(data)),
                    Err(reason) => {
                        self.consume_result_retry(&reason)?;
                        next.push(MessagePart::RetryPrompt(RetryPromptPart {
                            content: reason,
                            tool_name: None,
                            tool_call_id: None,
                        }));
                    }
                },
                None => {
                    self.consume_empty_response()?;
                    next.push(MessagePart::RetryPrompt(RetryPromptPart {
                        content: EMPTY_RESPONSE_RETRY.into(),
                        tool_name: None,
                        tool_call_id: None,
                    }));
                }
            }
        }

        self.messages.push(ConversationMessage::request(next));
        Ok(None)
    }

    /// Invoke function tools concurrently, keeping call order in the output.
    async fn execute_tools(&mut self, calls: &[ToolCallPart]) -> Result<Vec<MessagePart>> {
        let definition = Arc::clone(&self.definition);
        let outcomes = futures::future::join_all(
            calls
                .iter()
                .map(|call| definition.tools.invoke(&call.tool_name, &call.args)),
        )
        .await;

        let mut parts = Vec::with_capacity(calls.len());
        for (call, outcome) in calls.iter().zip(outcomes) {
            match outcome {
                Ok(content) => parts.push(tool_return(call, content)),
                Err(err) => {
                    self.consume_tool_retry(&call.tool_name, &err)?;
                    parts.push(retry_prompt(call, tool_retry_content(&err, &definition.tools)));
                }
            }
        }
        Ok(parts)
    }

    fn validate_output_call(&self, call: &ToolCallPart) -> std::result::Result<Value, String> {
        let arguments = Value::Object(call.args_object()?);
        self.validate_result(arguments)
    }

    fn validate_text(&self, text: String) -> std::result::Result<Value, String> {
        if self.definition.result_schema.is_none() {
            return Ok(Value::String(text));
        }
        let value: Value = serde_json::from_str(strip_code_fence(&text))
            .map_err(|e| format!("response is not valid JSON: {e}"))?;
        self.validate_result(value)
    }

    fn validate_result(&self, value: Value) -> std::result::Result<Value, String> {
        match &self.definition.result_schema {
            Some(schema) => schema.validate(&value).map(|()| value).map_err(|e| e.to_string()),
            None => Ok(value),
        }
    }

    fn consume_result_retry(&mut self, reason: &str) -> Result<()> {
        self.result_retries += 1;
        let max = self.definition.retry_policy.max_result_retries;
        tracing::warn!(
            run_id = %self.run_id,
            retry = self.result_retries,
            max,
            reason,
            "result failed validation"
        );
        if self.result_retries > max {
            return Err(GatewayError::ResultValidation {
                retries: max,
                reason: reason.to_owned(),
            });
        }
        Ok(())
    }

    fn consume_tool_retry(&mut self, tool_name: &str, err: &GatewayError) -> Result<()> {
        let count = self.tool_retries.entry(tool_name.to_owned()).or_default();
        *count += 1;
        let max = self.definition.retry_policy.max_retries;
        tracing::warn!(
            run_id = %self.run_id,
            tool = %tool_name,
            retry = *count,
            max,
            error = %err,
            "tool call failed"
        );
        if *count > max {
            return Err(GatewayError::ModelBehavior {
                reason: format!("tool `{tool_name}` exceeded max retries count of {max}: {err}"),
            });
        }
        Ok(())
    }

    fn consume_empty_response(&mut self) -> Result<()> {
        self.empty_responses += 1;
        let max = self.definition.retry_policy.max_retries;
        if self.empty_responses > max {
            return Err(GatewayError::ModelBehavior {
                reason: format!("model returned {} empty responses", self.empty_responses),
            });
        }
        tracing::warn!(run_id = %self.run_id, "empty model response, retrying");
        Ok(())
    }

    fn finish(self, data: Value) -> RunResult {
        tracing::info!(
            run_id = %self.run_id,
            agent_id = %self.definition.agent_id,
            steps = self.step,
            requests = self.usage.requests,
            total_tokens = self.usage.total_tokens,
            "run completed"
        );
        RunResult {
            run_id: self.run_id,
            data,
            usage: self.usage,
            messages: self.messages,
            new_message_index: self.new_message_index,
        }
    }

    fn fail(&self, err: GatewayError) -> GatewayError {
        tracing::warn!(
            run_id = %self.run_id,
            agent_id = %self.definition.agent_id,
            steps = self.step,
            error = %err,
            "run failed"
        );
        err
    }
}

fn tool_return(call: &ToolCallPart, content: Value) -> MessagePart {
    MessagePart::ToolReturn(ToolReturnPart {
        tool_name: call.tool_name.clone(),
        content,
        tool_call_id: call.tool_call_id.clone(),
    })
}

fn retry_prompt(call: &ToolCallPart, content: String) -> MessagePart {
    MessagePart::RetryPrompt(RetryPromptPart {
        content,
        tool_name: Some(call.tool_name.clone()),
        tool_call_id: Some(call.tool_call_id.clone()),
    })
}

/// What the model is told after a failed tool call.
fn tool_retry_content(err: &GatewayError, tools: &ToolRegistry) -> String {
    match err {
        GatewayError::ToolNotFound { tool_name } => {
            let names = tools.names();
            if names.is_empty() {
                format!("Unknown tool name: `{tool_name}`. No tools available.")
            } else {
                format!(
                    "Unknown tool name: `{tool_name}`. Available tools: {}",
                    names.join(", ")
                )
            }
        }
        GatewayError::ArgumentValidation { reason, .. }
        | GatewayError::ToolExecution { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

/// Delay before retry number `attempt + 1`.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis((BASE_BACKOFF_MS << attempt.min(16)).min(MAX_BACKOFF_MS))
}

/// Strip a surrounding Markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.strip_suffix("```").unwrap_or(body).trim()
}
