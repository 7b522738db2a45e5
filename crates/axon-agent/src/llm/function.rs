//! Model driven by a caller-supplied closure.
//!
//! Useful in tests and for embedding the gateway with a custom backend that
//! does not warrant a full [`CompletionModel`] implementation.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ModelError;
use crate::llm::model::CompletionModel;
use crate::llm::types::{CompletionStream, ModelRequest, ModelResponse, StreamChunk};

type ModelFn = dyn Fn(&ModelRequest) -> Result<ModelResponse, ModelError> + Send + Sync;

#[derive(Clone)]
pub struct FunctionModel {
    name: String,
    function: Arc<ModelFn>,
    stream_words: bool,
}

impl fmt::Debug for FunctionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionModel")
            .field("name", &self.name)
            .field("stream_words", &self.stream_words)
            .finish_non_exhaustive()
    }
}

impl FunctionModel {
    pub fn new<F>(function: F) -> Self
    where
        F: Fn(&ModelRequest) -> Result<ModelResponse, ModelError> + Send + Sync + 'static,
    {
        Self {
            name: "function".into(),
            function: Arc::new(function),
            stream_words: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Stream text one word at a time instead of in a single delta.
    pub fn with_word_stream(mut self) -> Self {
        self.stream_words = true;
        self
    }
}

#[async_trait]
impl CompletionModel for FunctionModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        (self.function)(request)
    }

    async fn request_stream(&self, request: &ModelRequest) -> Result<CompletionStream, ModelError> {
        let chunks = (self.function)(request)?.into_chunks();
        let chunks: Vec<StreamChunk> = if self.stream_words {
            chunks.into_iter().flat_map(split_words).collect()
        } else {
            chunks
        };
        Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
    }
}

/// Split a text delta at word boundaries, keeping the whitespace.
fn split_words(chunk: StreamChunk) -> Vec<StreamChunk> {
    match chunk {
        StreamChunk::TextDelta(text) => text
            .split_inclusive(' ')
            .map(|word| StreamChunk::TextDelta(word.to_owned()))
            .collect(),
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::llm::types::ModelSettings;

    fn empty_request() -> ModelRequest {
        ModelRequest {
            messages: vec![],
            tools: vec![],
            output_tool: None,
            settings: ModelSettings::default(),
        }
    }

    #[tokio::test]
    async fn delegates_to_closure() {
        let model =
            FunctionModel::new(|req| Ok(ModelResponse::text(format!("{}", req.messages.len()))))
                .with_name("counter");
        assert_eq!(model.name(), "counter");
        let response = model.request(&empty_request()).await.unwrap();
        assert_eq!(response, ModelResponse::text("0"));
    }

    #[tokio::test]
    async fn word_stream_splits_text() {
        let model =
            FunctionModel::new(|_| Ok(ModelResponse::text("one two three"))).with_word_stream();
        let chunks: Vec<StreamChunk> = model
            .request_stream(&empty_request())
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        let texts: Vec<String> = chunks
            .into_iter()
            .filter_map(|c| match c {
                StreamChunk::TextDelta(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["one ", "two ", "three"]);
    }

    #[tokio::test]
    async fn errors_propagate() {
        let model = FunctionModel::new(|_| {
            Err(ModelError::ParseFailed {
                reason: "nope".into(),
            })
        });
        assert!(model.request(&empty_request()).await.is_err());
        assert!(model.request_stream(&empty_request()).await.is_err());
    }
}
