//! The completion capability consumed by the dispatcher.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ModelError;
use crate::llm::types::{CompletionStream, ModelRequest, ModelResponse};

/// A language-model backend.
///
/// Implementations must be cheap to share: agent definitions hold them as
/// `Arc<dyn CompletionModel>` and many runs may use one concurrently.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Model name, used in logs and on response messages.
    fn name(&self) -> &str;

    /// Produce one complete response.
    async fn request(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Produce a response incrementally.
    ///
    /// The default adapts [`CompletionModel::request`] into a stream that
    /// yields the whole response at once.  Dropping the stream must release
    /// any underlying connection.
    async fn request_stream(&self, request: &ModelRequest) -> Result<CompletionStream, ModelError> {
        let response = self.request(request).await?;
        Ok(Box::pin(futures::stream::iter(
            response.into_chunks().into_iter().map(Ok),
        )))
    }
}

/// Creates models for one provider prefix (`openai`, `anthropic`, ...).
pub trait ModelProvider: Send + Sync {
    fn create(&self, model_name: &str) -> Result<Arc<dyn CompletionModel>, ModelError>;
}

impl<F> ModelProvider for F
where
    F: Fn(&str) -> Result<Arc<dyn CompletionModel>, ModelError> + Send + Sync,
{
    fn create(&self, model_name: &str) -> Result<Arc<dyn CompletionModel>, ModelError> {
        self(model_name)
    }
}
