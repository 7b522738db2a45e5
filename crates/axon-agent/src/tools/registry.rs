//! Per-agent tool registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::llm::ToolDefinition;
use crate::message::ToolCallPart;

use super::ToolSpec;

/// Ordered set of tools owned by one agent definition.
///
/// Built once when the agent is created and never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<ToolSpec>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Build a registry, rejecting duplicate tool names.
    pub fn new(tools: Vec<Arc<ToolSpec>>) -> Result<Self> {
        let mut index = HashMap::with_capacity(tools.len());
        for (position, tool) in tools.iter().enumerate() {
            if index.insert(tool.name().to_owned(), position).is_some() {
                return Err(GatewayError::SchemaValidation {
                    reason: format!("duplicate tool name: {}", tool.name()),
                });
            }
        }
        Ok(Self { tools, index })
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, tool_name: &str) -> bool {
        self.index.contains_key(tool_name)
    }

    /// Tool names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Definitions advertised to the model, in declaration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Look up a tool by name.
    pub fn resolve(&self, tool_name: &str) -> Result<&Arc<ToolSpec>> {
        self.index
            .get(tool_name)
            .map(|&position| &self.tools[position])
            .ok_or_else(|| GatewayError::ToolNotFound {
                tool_name: tool_name.to_owned(),
            })
    }

    /// Validate `arguments` against the tool's parameters and invoke it.
    ///
    /// `arguments` must be a JSON object (or a string holding one).
    pub async fn invoke(&self, tool_name: &str, arguments: &Value) -> Result<Value> {
        let tool = self.resolve(tool_name)?;

        let call = ToolCallPart {
            tool_name: tool_name.to_owned(),
            args: arguments.clone(),
            tool_call_id: String::new(),
        };
        let arguments = call
            .args_object()
            .map_err(|reason| GatewayError::ArgumentValidation {
                tool_name: tool_name.to_owned(),
                reason,
            })?;

        tool.parameters()
            .validate(&Value::Object(arguments.clone()))
            .map_err(|e| GatewayError::ArgumentValidation {
                tool_name: tool_name.to_owned(),
                reason: e.to_string(),
            })?;

        tracing::debug!(tool = %tool_name, "invoking tool");

        tool.handler().call(arguments).await.map_err(|e| {
            if e.invalid_arguments {
                tracing::debug!(tool = %tool_name, error = %e, "tool rejected arguments");
                return GatewayError::ArgumentValidation {
                    tool_name: tool_name.to_owned(),
                    reason: e.message,
                };
            }
            tracing::warn!(tool = %tool_name, error = %e, "tool handler failed");
            GatewayError::ToolExecution {
                tool_name: tool_name.to_owned(),
                reason: e.message,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ToolError;
    use crate::schema::{FieldSpec, Shape};
    use crate::tools::handler_fn;

    fn sum() -> Arc<ToolSpec> {
        Arc::new(
            ToolSpec::new(
                "sum",
                "Add two integers",
                Shape::new()
                    .field("a", FieldSpec::integer())
                    .field("b", FieldSpec::integer()),
                handler_fn(|args| async move {
                    let a = args["a"].as_i64().unwrap_or_default();
                    let b = args["b"].as_i64().unwrap_or_default();
                    Ok(json!(a + b))
                }),
            )
            .unwrap(),
        )
    }

    fn failing() -> Arc<ToolSpec> {
        Arc::new(
            ToolSpec::new(
                "broken",
                "Always fails",
                Shape::new(),
                handler_fn(|_| async { Err(ToolError::new("disk on fire")) }),
            )
            .unwrap(),
        )
    }

    fn picky() -> Arc<ToolSpec> {
        Arc::new(
            ToolSpec::new(
                "picky",
                "Rejects every argument set",
                Shape::new(),
                handler_fn(|_| async { Err(ToolError::invalid_arguments("not today")) }),
            )
            .unwrap(),
        )
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = ToolRegistry::new(vec![sum(), sum()]).unwrap_err();
        assert!(matches!(err, GatewayError::SchemaValidation { .. }));
    }

    #[test]
    fn resolve_and_order() {
        let registry = ToolRegistry::new(vec![sum(), failing()]).unwrap();
        assert_eq!(registry.names(), vec!["sum", "broken"]);
        assert!(registry.resolve("sum").is_ok());
        assert!(matches!(
            registry.resolve("nope"),
            Err(GatewayError::ToolNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn invoke_validates_then_calls() {
        let registry = ToolRegistry::new(vec![sum()]).unwrap();
        let out = registry.invoke("sum", &json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(out, json!(5));

        // String-encoded arguments are accepted too.
        let out = registry.invoke("sum", &json!("{\"a\": 1, \"b\": 1}")).await.unwrap();
        assert_eq!(out, json!(2));
    }

    #[tokio::test]
    async fn invoke_rejects_bad_arguments() {
        let registry = ToolRegistry::new(vec![sum()]).unwrap();

        let err = registry.invoke("sum", &json!({"a": 1})).await.unwrap_err();
        assert!(matches!(err, GatewayError::ArgumentValidation { .. }));

        let err = registry.invoke("sum", &json!({"a": "x", "b": 1})).await.unwrap_err();
        assert!(matches!(err, GatewayError::ArgumentValidation { .. }));

        let err = registry.invoke("sum", &json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, GatewayError::ArgumentValidation { .. }));
    }

    #[tokio::test]
    async fn invoke_wraps_handler_failure() {
        let registry = ToolRegistry::new(vec![failing()]).unwrap();
        let err = registry.invoke("broken", &json!({})).await.unwrap_err();
        match err {
            GatewayError::ToolExecution { tool_name, reason } => {
                assert_eq!(tool_name, "broken");
                assert_eq!(reason, "disk on fire");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn handler_argument_rejection_is_an_argument_error() {
        let registry = ToolRegistry::new(vec![picky()]).unwrap();
        let err = registry.invoke("picky", &json!({})).await.unwrap_err();
        match err {
            GatewayError::ArgumentValidation { tool_name, reason } => {
                assert_eq!(tool_name, "picky");
                assert_eq!(reason, "not today");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
