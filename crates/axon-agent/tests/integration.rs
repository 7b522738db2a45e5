//! Integration tests for the axon-agent crate.
//!
//! These tests drive the gateway end to end with the offline backends
//! ([`TestModel`], [`FunctionModel`] and a local streaming model), so no
//! provider connection is needed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use axon_agent::llm::{CompletionStream, StreamChunk};
use axon_agent::message::ToolCallPart;
use axon_agent::{
    AgentConfig, AgentDefinition, CompletionModel, ConversationMessage, FieldSpec, FunctionModel,
    Gateway, GatewayError, MessagePart, ModelError, ModelRequest, ModelResponse, RunRequest,
    Shape, StreamEvent, ToolError, ToolSpec, UsageLimits, handler_fn,
};

fn agent(value: Value) -> AgentConfig {
    serde_json::from_value(value).expect("valid agent config")
}

fn sum_agent(gateway: &Gateway) {
    gateway
        .create_agent(&agent(json!({
            "agent_id": "calculator",
            "model": "test",
            "system_prompt": "Use the sum tool.",
            "tools": ["sum"],
            "result_schema": {"total": {"type": "integer"}}
        })))
        .unwrap();
}

fn tool_calls<'a>(
    messages: &'a [ConversationMessage],
    name: &'a str,
) -> impl Iterator<Item = (usize, &'a ToolCallPart)> + 'a {
    messages.iter().enumerate().flat_map(move |(i, m)| {
        m.tool_calls()
            .filter(move |c| c.tool_name == name)
            .map(move |c| (i, c))
    })
}

// ═══════════════════════════════════════════════════════════════════════
//  Agent lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn create_then_run_then_duplicate() {
    let gateway = Gateway::default();
    let config = agent(json!({"agent_id": "a", "model": "test"}));

    gateway.create_agent(&config).unwrap();
    let result = gateway.run_sync("a", RunRequest::new("hello")).await.unwrap();
    assert_eq!(result.data, json!("success (no tool calls)"));

    let err = gateway.create_agent(&config).unwrap_err();
    assert!(matches!(err, GatewayError::DuplicateAgentId { .. }));
}

#[tokio::test]
async fn delete_unknown_and_run_after_delete() {
    let gateway = Gateway::default();
    assert!(matches!(
        gateway.delete_agent("nobody"),
        Err(GatewayError::AgentNotFound { .. })
    ));

    gateway
        .create_agent(&agent(json!({"agent_id": "gone", "model": "test"})))
        .unwrap();
    gateway.delete_agent("gone").unwrap();
    let err = gateway.run_sync("gone", RunRequest::new("hi")).await.unwrap_err();
    assert!(matches!(err, GatewayError::AgentNotFound { .. }));
}

// ═══════════════════════════════════════════════════════════════════════
//  Scenarios
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn echo_agent_returns_structured_result() {
    let gateway = Gateway::default();
    gateway
        .create_agent(&agent(json!({
            "agent_id": "echo",
            "model": "test",
            "system_prompt": "Echo the user.",
            "result_schema": {"response": {"type": "string"}}
        })))
        .unwrap();

    let result = gateway.run_sync("echo", RunRequest::new("say hi")).await.unwrap();
    let response = result.data["response"].as_str().unwrap();
    assert!(!response.is_empty());
    assert!(result.usage.total_tokens >= result.usage.input_tokens);
    assert_eq!(result.usage.requests, 1);
}

#[tokio::test]
async fn sum_tool_called_once_before_result() {
    let gateway = Gateway::default();
    sum_agent(&gateway);

    let result = gateway
        .run_sync("calculator", RunRequest::new("What is 0 + 0?"))
        .await
        .unwrap();
    assert_eq!(result.data, json!({"total": 0}));

    let calls: Vec<_> = tool_calls(&result.messages, "sum").collect();
    assert_eq!(calls.len(), 1);
    let (call_index, call) = calls[0];

    let returns: Vec<usize> = result
        .messages
        .iter()
        .enumerate()
        .flat_map(|(i, m)| m.parts.iter().map(move |p| (i, p)))
        .filter_map(|(i, p)| match p {
            MessagePart::ToolReturn(r) if r.tool_name == "sum" => {
                assert_eq!(r.tool_call_id, call.tool_call_id);
                assert_eq!(r.content, json!(0));
                Some(i)
            }
            _ => None,
        })
        .collect();
    assert_eq!(returns.len(), 1);

    let (final_index, _) = tool_calls(&result.messages, axon_agent::OUTPUT_TOOL_NAME)
        .next()
        .unwrap();
    assert!(call_index < returns[0]);
    assert!(returns[0] < final_index);
}

/// Streams one text fragment, then asks for a tool.  Flags when the
/// underlying stream is released.
struct SlowStreamingModel {
    released: Arc<AtomicBool>,
}

struct ReleaseFlag(Arc<AtomicBool>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CompletionModel for SlowStreamingModel {
    fn name(&self) -> &str {
        "slow"
    }

    async fn request(&self, _request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        Ok(ModelResponse::text("unused"))
    }

    async fn request_stream(
        &self,
        _request: &ModelRequest,
    ) -> Result<CompletionStream, ModelError> {
        let flag = ReleaseFlag(Arc::clone(&self.released));
        let chunks = vec![
            StreamChunk::TextDelta("thinking".into()),
            StreamChunk::ToolCall(ToolCallPart::new("count", json!({}))),
        ];
        Ok(Box::pin(futures::stream::iter(chunks).map(move |chunk| {
            let _held = &flag;
            Ok::<_, ModelError>(chunk)
        })))
    }
}

#[tokio::test]
async fn dropping_stream_cancels_run() {
    let released = Arc::new(AtomicBool::new(false));
    let invocations = Arc::new(AtomicUsize::new(0));

    let counted = Arc::clone(&invocations);
    let count = ToolSpec::new(
        "count",
        "Counts invocations",
        Shape::new(),
        handler_fn(move |_| {
            let counted = Arc::clone(&counted);
            async move { Ok(json!(counted.fetch_add(1, Ordering::SeqCst))) }
        }),
    )
    .unwrap();

    let gateway = Gateway::default();
    gateway
        .register_agent(
            AgentDefinition::builder(
                "slow",
                Arc::new(SlowStreamingModel {
                    released: Arc::clone(&released),
                }),
            )
            .tool(count)
            .build()
            .unwrap(),
        )
        .unwrap();

    let mut stream = gateway.run_stream("slow", RunRequest::new("go"));
    match stream.next().await {
        Some(StreamEvent::Fragment(text)) => assert_eq!(text, "thinking"),
        other => panic!("expected a fragment, got {other:?}"),
    }
    assert!(!released.load(Ordering::SeqCst));

    drop(stream);
    tokio::task::yield_now().await;

    assert!(released.load(Ordering::SeqCst));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

/// Emits one fragment, then the connection breaks.
struct BrokenStreamModel;

#[async_trait]
impl CompletionModel for BrokenStreamModel {
    fn name(&self) -> &str {
        "broken-stream"
    }

    async fn request(&self, _request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        Ok(ModelResponse::text("unused"))
    }

    async fn request_stream(
        &self,
        _request: &ModelRequest,
    ) -> Result<CompletionStream, ModelError> {
        Ok(Box::pin(futures::stream::iter(vec![
            Ok(StreamChunk::TextDelta("hel".into())),
            Err(ModelError::StreamInterrupted {
                reason: "reset".into(),
            }),
        ])))
    }
}

#[tokio::test]
async fn mid_stream_failure_ends_with_one_error() {
    let gateway = Gateway::default();
    gateway
        .register_agent(
            AgentDefinition::builder("flaky", Arc::new(BrokenStreamModel))
                .build()
                .unwrap(),
        )
        .unwrap();

    let events: Vec<StreamEvent> = gateway
        .run_stream("flaky", RunRequest::new("hello"))
        .collect()
        .await;

    assert_eq!(events.len(), 2, "{events:?}");
    assert!(matches!(&events[0], StreamEvent::Fragment(text) if text == "hel"));
    match &events[1] {
        StreamEvent::Error(GatewayError::ModelBehavior { reason }) => {
            assert!(reason.contains("reset"), "{reason}");
        }
        other => panic!("expected a terminal model error, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_tool_call_leaves_agent_usable() {
    let gateway = Gateway::default();
    sum_agent(&gateway);

    let err = gateway
        .call_tool("calculator", "multiply", &json!({"a": 1}))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ToolNotFound { .. }));

    let value = gateway
        .call_tool("calculator", "sum", &json!({"a": 2, "b": 3}))
        .await
        .unwrap();
    assert_eq!(value, json!(5));
    assert!(gateway.run_sync("calculator", RunRequest::new("again")).await.is_ok());
}

// ═══════════════════════════════════════════════════════════════════════
//  Properties
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn call_tool_is_repeatable() {
    let gateway = Gateway::default();
    sum_agent(&gateway);
    let args = json!({"a": 40, "b": 2});
    let first = gateway.call_tool("calculator", "sum", &args).await.unwrap();
    let second = gateway.call_tool("calculator", "sum", &args).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn call_tool_rejects_bad_arguments() {
    let gateway = Gateway::default();
    sum_agent(&gateway);
    let err = gateway
        .call_tool("calculator", "sum", &json!({"a": "one"}))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ArgumentValidation { .. }));
}

#[tokio::test]
async fn zero_token_budget_fails_before_model_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let model = FunctionModel::new(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(ModelResponse::text("never"))
    });

    let gateway = Gateway::default();
    gateway
        .register_agent(AgentDefinition::builder("budget", Arc::new(model)).build().unwrap())
        .unwrap();

    let request = RunRequest::new("hi")
        .with_usage_limits(UsageLimits::default().with_total_tokens_limit(0));
    let err = gateway.run_sync("budget", request).await.unwrap_err();
    assert!(matches!(err, GatewayError::UsageLimitExceeded(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn history_replay_keeps_single_system_prompt() {
    let gateway = Gateway::default();
    sum_agent(&gateway);

    let first = gateway
        .run_sync("calculator", RunRequest::new("first"))
        .await
        .unwrap();
    let history = first.messages.clone();

    let second = gateway
        .run_sync("calculator", RunRequest::new("second").with_history(history.clone()))
        .await
        .unwrap();

    assert_eq!(second.new_message_index, history.len());
    assert_eq!(&second.messages[..history.len()], &history[..]);

    let system_prompts = second
        .messages
        .iter()
        .filter(|m| m.has_system_prompt())
        .count();
    assert_eq!(system_prompts, 1);
    assert!(!second.new_messages()[0].has_system_prompt());

    // Every tool return follows its call.
    let mut seen = std::collections::HashSet::new();
    for message in &second.messages {
        for part in &message.parts {
            match part {
                MessagePart::ToolCall(call) => {
                    seen.insert(call.tool_call_id.clone());
                }
                MessagePart::ToolReturn(ret) => assert!(seen.contains(&ret.tool_call_id)),
                _ => {}
            }
        }
    }
}

#[tokio::test]
async fn broken_history_rejected() {
    let gateway = Gateway::default();
    sum_agent(&gateway);

    let history: Vec<ConversationMessage> = serde_json::from_value(json!([
        {"kind": "request", "parts": [{"part_kind": "user-prompt", "content": "hi"}]},
        {"kind": "request", "parts": [{
            "part_kind": "tool-return",
            "tool_name": "sum",
            "content": 1,
            "tool_call_id": "call_missing"
        }]}
    ]))
    .unwrap();

    let err = gateway
        .run_sync("calculator", RunRequest::new("next").with_history(history))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidRequest { .. }));
}

#[tokio::test]
async fn usage_is_monotonic_across_steps() {
    let steps = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&steps);
    let model = FunctionModel::new(move |_| {
        let step = seen.fetch_add(1, Ordering::SeqCst);
        let usage = axon_agent::usage::RequestUsage {
            input_tokens: 7,
            output_tokens: 3,
        };
        if step == 0 {
            Ok(
                ModelResponse::tool_calls(vec![ToolCallPart::new("echo", json!({"text": "x"}))])
                    .with_usage(usage),
            )
        } else {
            Ok(ModelResponse::text("done").with_usage(usage))
        }
    });

    let echo = ToolSpec::new(
        "echo",
        "",
        Shape::new().field("text", FieldSpec::string()),
        handler_fn(|args| async move { Ok(args["text"].clone()) }),
    )
    .unwrap();

    let gateway = Gateway::default();
    gateway
        .register_agent(
            AgentDefinition::builder("steps", Arc::new(model))
                .tool(echo)
                .build()
                .unwrap(),
        )
        .unwrap();

    let result = gateway.run_sync("steps", RunRequest::new("go")).await.unwrap();
    assert_eq!(result.usage.requests, 2);
    assert_eq!(result.usage.input_tokens, 14);
    assert_eq!(result.usage.output_tokens, 6);
    assert_eq!(result.usage.total_tokens, 20);
}

#[tokio::test]
async fn stream_and_sync_agree() {
    let gateway = Gateway::default();
    sum_agent(&gateway);

    let sync = gateway
        .run_sync("calculator", RunRequest::new("add"))
        .await
        .unwrap();
    let streamed = gateway
        .run_stream("calculator", RunRequest::new("add"))
        .finish()
        .await
        .unwrap();

    assert_eq!(sync.data, streamed.data);
    assert_eq!(sync.usage, streamed.usage);
    assert_eq!(sync.messages.len(), streamed.messages.len());
}

#[tokio::test]
async fn failing_handler_surfaces_as_tool_execution_error() {
    let broken = ToolSpec::new(
        "broken",
        "",
        Shape::new(),
        handler_fn(|_| async { Err(ToolError::new("disk on fire")) }),
    )
    .unwrap();
    let gateway = Gateway::default();
    gateway.tools().register(broken);
    gateway
        .create_agent(&agent(json!({"agent_id": "b", "model": "test", "tools": ["broken"]})))
        .unwrap();

    match gateway.call_tool("b", "broken", &json!({})).await {
        Err(GatewayError::ToolExecution { tool_name, reason }) => {
            assert_eq!(tool_name, "broken");
            assert_eq!(reason, "disk on fire");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}
