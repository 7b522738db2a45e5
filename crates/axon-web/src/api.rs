//! REST and SSE route handlers.
//!
//! Every handler records the request in the health counters, delegates to
//! the gateway and renders failures through [`ApiError`].

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use axon_agent::{
    AgentConfig, AgentSummary, ConversationMessage, GatewayError, RunRequest, RunResult,
    StreamEvent, Usage,
};

use crate::error::ApiError;
use crate::health::HealthReport;
use crate::state::AppState;

/// Data of the last SSE event of every stream.
pub const STREAM_DONE: &str = "[DONE]";

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Agent lifecycle
// ---------------------------------------------------------------------------

/// Response for a successful mutation.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// POST /agents — Create an agent.
pub async fn create_agent(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AgentConfig>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SuccessResponse>)> {
    state.health.record_request();
    let Json(config) = body.map_err(|e| state.fail("create_agent", config_rejection(e)))?;

    let definition = state
        .gateway
        .create_agent(&config)
        .map_err(|e| state.fail("create_agent", e))?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse {
            status: "success",
            agent_id: Some(definition.agent_id.clone()),
        }),
    ))
}

/// A body that parses as JSON but not as an agent config is a schema error,
/// like any other malformed config.
fn config_rejection(rejection: JsonRejection) -> GatewayError {
    match rejection {
        JsonRejection::JsonDataError(err) => GatewayError::SchemaValidation {
            reason: err.body_text(),
        },
        other => ApiError::from(other).0,
    }
}

/// Response for `GET /agents`.
#[derive(Debug, Serialize)]
pub struct AgentList {
    pub agents: Vec<AgentSummary>,
}

/// GET /agents — List registered agents.
pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<AgentList> {
    state.health.record_request();
    Json(AgentList {
        agents: state.gateway.list_agents(),
    })
}

/// GET /agents/{agent_id} — Describe one agent.
pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentSummary>> {
    state.health.record_request();
    state
        .gateway
        .describe_agent(&agent_id)
        .map(Json)
        .map_err(|e| state.fail("get_agent", e))
}

/// DELETE /agents/{agent_id} — Delete an agent.
pub async fn delete_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    state.health.record_request();
    state
        .gateway
        .delete_agent(&agent_id)
        .map_err(|e| state.fail("delete_agent", e))?;
    Ok(Json(SuccessResponse {
        status: "success",
        agent_id: None,
    }))
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Response for `POST /agents/{agent_id}/run_sync`.
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run_id: Uuid,
    pub result: Value,
    pub usage: Usage,
    pub messages: Vec<ConversationMessage>,
}

impl From<RunResult> for RunResponse {
    fn from(result: RunResult) -> Self {
        Self {
            run_id: result.run_id,
            result: result.data,
            usage: result.usage,
            messages: result.messages,
        }
    }
}

/// POST /agents/{agent_id}/run_sync — Run an agent to completion.
pub async fn run_sync(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> ApiResult<Json<RunResponse>> {
    state.health.record_request();
    let Json(request) = body.map_err(|e| state.fail("run_sync", ApiError::from(e).0))?;

    let result = state
        .gateway
        .run_sync(&agent_id, request)
        .await
        .map_err(|e| state.fail("run_sync", e))?;
    Ok(Json(result.into()))
}

/// POST /agents/{agent_id}/run_stream — Run an agent, streaming fragments as
/// Server-Sent Events.
///
/// An unknown agent or malformed body is rejected with a regular error
/// response; failures after that become the stream's terminal `error` event.
pub async fn run_stream(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    state.health.record_request();
    let Json(request) = body.map_err(|e| state.fail("run_stream", ApiError::from(e).0))?;
    state
        .gateway
        .registry()
        .lookup(&agent_id)
        .map_err(|e| state.fail("run_stream", e))?;

    let events_state = Arc::clone(&state);
    let events = state
        .gateway
        .run_stream(&agent_id, request)
        .map(move |event| {
            let payload = stream_payload(&events_state, event);
            Ok::<_, Infallible>(Event::default().data(payload.to_string()))
        })
        .chain(futures::stream::once(async {
            Ok::<_, Infallible>(Event::default().data(STREAM_DONE))
        }));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// JSON data of one SSE event.
fn stream_payload(state: &AppState, event: StreamEvent) -> Value {
    match event {
        StreamEvent::Fragment(content) => json!({"type": "fragment", "content": content}),
        StreamEvent::Result(result) => json!({
            "type": "result",
            "run_id": result.run_id,
            "result": result.data,
            "usage": result.usage,
            "messages": result.messages,
        }),
        StreamEvent::Error(err) => {
            let ApiError(err) = state.fail("run_stream", err);
            let mut payload = serde_json::to_value(err.outcome()).unwrap_or_else(|_| json!({}));
            if let Some(map) = payload.as_object_mut() {
                map.insert("type".into(), json!("error"));
            }
            payload
        }
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// Request body for a direct tool call.
#[derive(Debug, Deserialize)]
pub struct ToolCallBody {
    pub tool_name: String,
    #[serde(default, alias = "arguments")]
    pub args: Value,
}

/// Response for a direct tool call.
#[derive(Debug, Serialize)]
pub struct ToolCallResponse {
    pub result: Value,
}

/// POST /agents/{agent_id}/tool_call — Invoke one of an agent's tools.
pub async fn tool_call(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    body: Result<Json<ToolCallBody>, JsonRejection>,
) -> ApiResult<Json<ToolCallResponse>> {
    state.health.record_request();
    let Json(body) = body.map_err(|e| state.fail("tool_call", ApiError::from(e).0))?;

    let result = state
        .gateway
        .call_tool(&agent_id, &body.tool_name, &body.args)
        .await
        .map_err(|e| state.fail("tool_call", e))?;
    Ok(Json(ToolCallResponse { result }))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// GET /health — Service health.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.health.report(state.gateway.registry().len()))
}
