//! Tools an agent can invoke.
//!
//! A [`ToolSpec`] pairs a name, description and parameter [`Shape`] with a
//! [`ToolHandler`] capability.  Specs are registered once in a process-wide
//! [`ToolCatalog`] and referenced by name when agents are created; each agent
//! then owns a [`ToolRegistry`] resolving names to its own tools.

pub mod builtin;
pub mod catalog;
pub mod registry;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{SchemaError, ToolError};
use crate::llm::ToolDefinition;
use crate::schema::{CompiledShape, Shape};

pub use catalog::ToolCatalog;
pub use registry::ToolRegistry;

// ---------------------------------------------------------------------------
// Handler capability
// ---------------------------------------------------------------------------

/// Executable side of a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Invoke the tool with already-validated arguments.
    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, ToolError>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
        (self.0)(arguments).await
    }
}

/// Wrap an async closure as a shared handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

// ---------------------------------------------------------------------------
// ToolSpec
// ---------------------------------------------------------------------------

/// A named, described, parameter-checked tool.
#[derive(Clone)]
pub struct ToolSpec {
    name: String,
    description: String,
    parameters: CompiledShape,
    handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", self.parameters.json_schema())
            .finish_non_exhaustive()
    }
}

impl ToolSpec {
    /// Build a spec, compiling its parameter shape.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Shape,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SchemaError::Invalid {
                reason: "tool name must not be empty".into(),
            });
        }
        Ok(Self {
            name,
            description: description.into(),
            parameters: CompiledShape::compile(parameters)?,
            handler,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &CompiledShape {
        &self.parameters
    }

    pub fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }

    /// Same capability with a different description.
    pub fn with_description(&self, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..self.clone()
        }
    }

    /// Same capability with a different parameter shape.
    pub fn with_parameters(&self, parameters: Shape) -> Result<Self, SchemaError> {
        Ok(Self {
            parameters: CompiledShape::compile(parameters)?,
            ..self.clone()
        })
    }

    /// Definition advertised to the model.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.json_schema().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::FieldSpec;

    fn upper() -> ToolSpec {
        ToolSpec::new(
            "upper",
            "Uppercase a string",
            Shape::new().field("text", FieldSpec::string()),
            handler_fn(|args| async move {
                let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
                Ok(Value::String(text.to_uppercase()))
            }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn fn_handler_invokes_closure() {
        let spec = upper();
        let mut args = Map::new();
        args.insert("text".into(), json!("abc"));
        let out = spec.handler().call(args).await.unwrap();
        assert_eq!(out, json!("ABC"));
    }

    #[test]
    fn definition_carries_schema() {
        let def = upper().definition();
        assert_eq!(def.name, "upper");
        assert_eq!(def.parameters["properties"]["text"]["type"], "string");
    }

    #[test]
    fn overrides_keep_handler() {
        let spec = upper().with_description("Shout");
        assert_eq!(spec.description(), "Shout");

        let spec = spec
            .with_parameters(Shape::new().field("text", FieldSpec::string().optional()))
            .unwrap();
        assert_eq!(spec.definition().parameters["required"], json!([]));
    }

    #[test]
    fn empty_name_rejected() {
        let err = ToolSpec::new(
            " ",
            "",
            Shape::new(),
            handler_fn(|_| async { Ok(Value::Null) }),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::Invalid { .. }));
    }
}
