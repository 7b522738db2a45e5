//! Registry of model providers, keyed by reference prefix.
//!
//! A model reference has the form `provider:model` (`openai:gpt-4o`,
//! `anthropic:claude-sonnet-4-20250514`).  A bare name is resolved against a
//! provider registered under that exact name first (so `test` means the
//! offline test model), then against the default provider.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::ModelError;
use crate::llm::model::{CompletionModel, ModelProvider};
use crate::llm::test_model::TestModel;

/// Provider used for references without a prefix.
pub const DEFAULT_PROVIDER: &str = "openai";

/// Concurrent prefix → [`ModelProvider`] map.
#[derive(Clone)]
pub struct ModelCatalog {
    providers: Arc<DashMap<String, Arc<dyn ModelProvider>>>,
    default_provider: String,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelCatalog {
    /// Catalog with only the `test` provider registered.
    #[must_use]
    pub fn new() -> Self {
        let catalog = Self {
            providers: Arc::new(DashMap::new()),
            default_provider: DEFAULT_PROVIDER.to_owned(),
        };
        catalog.register(
            "test",
            |name: &str| -> Result<Arc<dyn CompletionModel>, ModelError> {
                Ok(Arc::new(TestModel::new().with_name(name)))
            },
        );
        catalog
    }

    /// Register (or replace) the provider for `prefix`.
    pub fn register(&self, prefix: impl Into<String>, provider: impl ModelProvider + 'static) {
        let prefix = prefix.into();
        tracing::info!(provider = %prefix, "model provider registered");
        self.providers.insert(prefix, Arc::new(provider));
    }

    /// Registered prefixes, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Resolve a model reference to a backend.
    pub fn resolve(&self, reference: &str) -> Result<Arc<dyn CompletionModel>, ModelError> {
        let (prefix, model_name) = match reference.split_once(':') {
            Some((prefix, model_name)) => (prefix, model_name),
            None if self.providers.contains_key(reference) => (reference, reference),
            None => (self.default_provider.as_str(), reference),
        };
        if prefix.trim().is_empty() || model_name.trim().is_empty() {
            return Err(ModelError::InvalidReference {
                reference: reference.to_owned(),
            });
        }

        let provider = self
            .providers
            .get(prefix)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ModelError::UnknownProvider {
                provider: prefix.to_owned(),
                reference: reference.to_owned(),
            })?;
        provider.create(model_name)
    }
}

impl std::fmt::Debug for ModelCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCatalog")
            .field("providers", &self.providers())
            .field("default_provider", &self.default_provider)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmClientConfig;

    #[test]
    fn test_provider_is_builtin() {
        let catalog = ModelCatalog::new();
        assert_eq!(catalog.resolve("test").unwrap().name(), "test");
        assert_eq!(catalog.resolve("test:quick").unwrap().name(), "quick");
    }

    #[test]
    fn bare_names_use_default_provider() {
        let catalog = ModelCatalog::new();
        let err = catalog.resolve("gpt-4o").err().unwrap();
        match err {
            ModelError::UnknownProvider { provider, reference } => {
                assert_eq!(provider, "openai");
                assert_eq!(reference, "gpt-4o");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        catalog.register("openai", LlmClientConfig::openai("sk-test"));
        assert_eq!(catalog.resolve("gpt-4o").unwrap().name(), "gpt-4o");
        assert_eq!(catalog.resolve("openai:gpt-4o-mini").unwrap().name(), "gpt-4o-mini");
    }

    #[test]
    fn unknown_prefix_fails() {
        let catalog = ModelCatalog::new();
        assert!(matches!(
            catalog.resolve("mystery:model"),
            Err(ModelError::UnknownProvider { .. })
        ));
    }

    #[test]
    fn empty_parts_rejected() {
        let catalog = ModelCatalog::new();
        catalog.register("openai", LlmClientConfig::openai("sk-test"));
        for reference in ["openai:", ":gpt-4o", "", "  "] {
            assert!(
                matches!(
                    catalog.resolve(reference),
                    Err(ModelError::InvalidReference { .. })
                ),
                "{reference:?}"
            );
        }
    }

    #[test]
    fn providers_listed() {
        let catalog = ModelCatalog::new();
        catalog.register("anthropic", LlmClientConfig::anthropic("k"));
        assert_eq!(catalog.providers(), vec!["anthropic", "test"]);
    }
}
