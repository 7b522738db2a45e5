//! Agent execution gateway core for Axon.
//!
//! This crate holds everything needed to define LLM-backed agents and run
//! them: the agent registry, per-agent tool registries, the conversation
//! message model, completion backends and the dispatcher that ties them
//! together.  Transports (see the `axon-web` crate) are thin adapters over
//! [`Gateway`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────┐     ┌──────────────┐
//! │   Gateway    │────>│ Dispatcher │────>│ ToolRegistry │
//! │ (operations) │     │ (run loop) │     │  (per agent) │
//! └──────┬───────┘     └─────┬──────┘     └──────────────┘
//!        │                   │
//! ┌──────┴───────┐     ┌─────┴──────────────┐
//! │AgentRegistry │     │  CompletionModel   │
//! │  (dashmap)   │     │ (OpenAI/Anthropic/ │
//! └──────────────┘     │   test/function)   │
//!                      └────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`gateway`] -- The operations a transport exposes.
//! - [`dispatcher`] -- Run-sync, run-stream and direct tool calls.
//! - [`definition`] / [`registry`] -- Agent definitions and their registry.
//! - [`tools`] -- Tool specs, the per-agent registry and the startup catalog.
//! - [`llm`] -- Completion backends and their wire formats.
//! - [`message`] -- Conversation messages and parts.
//! - [`schema`] -- Declarative shapes compiled to JSON Schema validators.
//! - [`usage`] -- Usage accounting and limits.
//! - [`error`] -- Error taxonomy and its fixed outcome mapping.

pub mod definition;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod message;
pub mod registry;
pub mod schema;
pub mod tools;
pub mod usage;

// Re-export the most commonly used types at the crate root.
pub use definition::{
    AgentConfig, AgentDefinition, AgentSummary, OUTPUT_TOOL_NAME, RetryPolicy, ToolReference,
};
pub use dispatcher::{Dispatcher, RunRequest, RunResult, RunStream, StreamEvent};
pub use error::{
    ErrorCategory, ErrorKind, ErrorOutcome, GatewayError, ModelError, Result, SchemaError,
    ToolError,
};
pub use gateway::Gateway;
pub use llm::{
    CompletionModel, FunctionModel, LlmClient, LlmClientConfig, LlmProvider, ModelCatalog,
    ModelProvider, ModelRequest, ModelResponse, ModelSettings, TestModel,
};
pub use message::{ConversationMessage, MessageKind, MessagePart};
pub use registry::AgentRegistry;
pub use schema::{CompiledShape, FieldKind, FieldSpec, Shape};
pub use tools::{ToolCatalog, ToolHandler, ToolRegistry, ToolSpec, handler_fn};
pub use usage::{Usage, UsageLimits};
