//! Completion backends.
//!
//! This module provides the interface between the dispatcher and language
//! model providers.  It is organized into:
//!
//! - [`model`] -- The [`CompletionModel`] capability and [`ModelProvider`] factories.
//! - [`types`] -- Provider-agnostic requests, responses and stream chunks.
//! - [`client`] -- HTTP client for Anthropic and OpenAI APIs.
//! - [`streaming`] -- SSE parsing for Anthropic incremental responses.
//! - [`streaming_openai`] -- SSE parsing for OpenAI incremental responses.
//! - [`test_model`] / [`function`] -- Offline backends.
//! - [`catalog`] -- Resolution of `provider:model` references.

pub mod catalog;
pub mod client;
pub mod function;
pub mod model;
pub mod streaming;
pub mod streaming_openai;
pub mod test_model;
pub mod types;

pub use catalog::ModelCatalog;
pub use client::{LlmClient, LlmClientConfig, LlmProvider};
pub use function::FunctionModel;
pub use model::{CompletionModel, ModelProvider};
pub use test_model::TestModel;
pub use types::{
    CompletionStream, ModelRequest, ModelResponse, ModelSettings, ResponseAccumulator,
    StreamChunk, ToolDefinition,
};
