//! Agent definitions.
//!
//! An [`AgentDefinition`] is the immutable bundle the dispatcher executes:
//! a resolved completion backend, a system prompt, a per-agent
//! [`ToolRegistry`], an optional result schema and the retry policy.
//!
//! Definitions arrive on the wire as an [`AgentConfig`], which references
//! tools and models by name; [`AgentConfig::build`] resolves those names
//! against the startup catalogs.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::llm::{CompletionModel, ModelCatalog, ModelSettings, ToolDefinition};
use crate::schema::{CompiledShape, Shape};
use crate::tools::{ToolCatalog, ToolRegistry, ToolSpec};

/// Name of the synthetic tool through which the model delivers a structured
/// result.
pub const OUTPUT_TOOL_NAME: &str = "final_result";

const OUTPUT_TOOL_DESCRIPTION: &str = "The final response which ends this conversation";

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounds on how often a run may recover from failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries for transient model failures, and per tool for failing calls.
    pub max_retries: u32,
    /// Retries for results that do not match the result schema.
    pub max_result_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            max_result_retries: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// A registered agent.  Never mutated after construction.
#[derive(Clone)]
pub struct AgentDefinition {
    pub agent_id: String,
    /// Reference the backend was resolved from, e.g. `openai:gpt-4o`.
    pub model_reference: String,
    pub model: Arc<dyn CompletionModel>,
    pub system_prompt: String,
    pub tools: ToolRegistry,
    pub result_schema: Option<CompiledShape>,
    pub retry_policy: RetryPolicy,
    /// Defaults applied to every run; per-call settings override them.
    pub model_settings: ModelSettings,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for AgentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentDefinition")
            .field("agent_id", &self.agent_id)
            .field("model_reference", &self.model_reference)
            .field("model", &self.model.name())
            .field("tools", &self.tools.names())
            .field("has_result_schema", &self.result_schema.is_some())
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl AgentDefinition {
    /// Start building a definition around an already resolved backend.
    pub fn builder(
        agent_id: impl Into<String>,
        model: Arc<dyn CompletionModel>,
    ) -> AgentDefinitionBuilder {
        AgentDefinitionBuilder::new(agent_id, model)
    }

    /// The output tool advertised to the model when a result schema exists.
    pub fn output_tool(&self) -> Option<ToolDefinition> {
        self.result_schema.as_ref().map(|schema| ToolDefinition {
            name: OUTPUT_TOOL_NAME.to_owned(),
            description: OUTPUT_TOOL_DESCRIPTION.to_owned(),
            parameters: schema.json_schema().clone(),
        })
    }

    /// Public view of the definition.
    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            agent_id: self.agent_id.clone(),
            model: self.model_reference.clone(),
            system_prompt: self.system_prompt.clone(),
            tools: self.tools.definitions(),
            result_schema: self.result_schema.as_ref().map(|s| s.json_schema().clone()),
            retries: self.retry_policy.max_retries,
            result_retries: self.retry_policy.max_result_retries,
            model_settings: self.model_settings,
            created_at: self.created_at,
        }
    }
}

/// Builder for [`AgentDefinition`].
pub struct AgentDefinitionBuilder {
    agent_id: String,
    model_reference: Option<String>,
    model: Arc<dyn CompletionModel>,
    system_prompt: String,
    tools: Vec<Arc<ToolSpec>>,
    result_schema: Option<Shape>,
    retry_policy: RetryPolicy,
    model_settings: ModelSettings,
}

impl AgentDefinitionBuilder {
    fn new(agent_id: impl Into<String>, model: Arc<dyn CompletionModel>) -> Self {
        Self {
            agent_id: agent_id.into(),
            model_reference: None,
            model,
            system_prompt: String::new(),
            tools: Vec::new(),
            result_schema: None,
            retry_policy: RetryPolicy::default(),
            model_settings: ModelSettings::default(),
        }
    }

    pub fn model_reference(mut self, reference: impl Into<String>) -> Self {
        self.model_reference = Some(reference.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn tool(mut self, tool: impl Into<Arc<ToolSpec>>) -> Self {
        self.tools.push(tool.into());
        self
    }

    pub fn result_schema(mut self, shape: Shape) -> Self {
        self.result_schema = Some(shape);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = settings;
        self
    }

    /// Validate and assemble the definition.
    ///
    /// # Errors
    ///
    /// [`GatewayError::SchemaValidation`] for an empty id, duplicate tool
    /// names, a tool shadowing the output tool, or a result schema that does
    /// not compile.
    pub fn build(self) -> Result<AgentDefinition> {
        if self.agent_id.trim().is_empty() {
            return Err(GatewayError::SchemaValidation {
                reason: "agent_id must not be empty".into(),
            });
        }
        if self.tools.iter().any(|t| t.name() == OUTPUT_TOOL_NAME) {
            return Err(GatewayError::SchemaValidation {
                reason: format!("tool name `{OUTPUT_TOOL_NAME}` is reserved"),
            });
        }

        let tools = ToolRegistry::new(self.tools)?;
        let result_schema = self.result_schema.map(CompiledShape::compile).transpose()?;
        let model_reference = self
            .model_reference
            .unwrap_or_else(|| self.model.name().to_owned());

        Ok(AgentDefinition {
            agent_id: self.agent_id,
            model_reference,
            model: self.model,
            system_prompt: self.system_prompt,
            tools,
            result_schema,
            retry_policy: self.retry_policy,
            model_settings: self.model_settings,
            created_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Wire form
// ---------------------------------------------------------------------------

/// A tool referenced by name, optionally overriding its description and
/// parameter shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ToolReferenceRepr")]
pub struct ToolReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Tools may be listed as bare names or as objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum ToolReferenceRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        parameters: Option<Value>,
    },
}

impl From<ToolReferenceRepr> for ToolReference {
    fn from(repr: ToolReferenceRepr) -> Self {
        match repr {
            ToolReferenceRepr::Name(name) => Self {
                name,
                description: None,
                parameters: None,
            },
            ToolReferenceRepr::Full {
                name,
                description,
                parameters,
            } => Self {
                name,
                description,
                parameters,
            },
        }
    }
}

/// Agent configuration as accepted by `create_agent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    /// Model reference, `provider:model` or a bare model name.
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<ToolReference>,
    #[serde(default, alias = "result_type", skip_serializing_if = "Option::is_none")]
    pub result_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Defaults to `retries` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_settings: Option<ModelSettings>,
}

impl AgentConfig {
    /// Resolve tool and model references and build the definition.
    ///
    /// Every failure is reported as [`GatewayError::SchemaValidation`].
    pub fn build(&self, tools: &ToolCatalog, models: &ModelCatalog) -> Result<AgentDefinition> {
        let model = models
            .resolve(&self.model)
            .map_err(|e| GatewayError::SchemaValidation {
                reason: format!("model `{}`: {e}", self.model),
            })?;

        let defaults = RetryPolicy::default();
        let max_retries = self.retries.unwrap_or(defaults.max_retries);
        let retry_policy = RetryPolicy {
            max_retries,
            max_result_retries: self
                .result_retries
                .or(self.retries)
                .unwrap_or(defaults.max_result_retries),
        };

        let mut builder = AgentDefinition::builder(&self.agent_id, model)
            .model_reference(&self.model)
            .system_prompt(&self.system_prompt)
            .retry_policy(retry_policy)
            .model_settings(self.model_settings.unwrap_or_default());

        for reference in &self.tools {
            builder = builder.tool(resolve_tool(reference, tools)?);
        }

        if let Some(schema) = &self.result_schema {
            let shape = Shape::from_value(schema).map_err(|e| GatewayError::SchemaValidation {
                reason: format!("result_schema: {e}"),
            })?;
            builder = builder.result_schema(shape);
        }

        builder.build()
    }
}

fn resolve_tool(reference: &ToolReference, catalog: &ToolCatalog) -> Result<Arc<ToolSpec>> {
    let base = catalog
        .get(&reference.name)
        .ok_or_else(|| GatewayError::SchemaValidation {
            reason: format!("unknown tool: {}", reference.name),
        })?;

    if reference.description.is_none() && reference.parameters.is_none() {
        return Ok(base);
    }

    let mut spec = (*base).clone();
    if let Some(description) = &reference.description {
        spec = spec.with_description(description);
    }
    if let Some(parameters) = &reference.parameters {
        let shape = Shape::from_value(parameters).map_err(|e| GatewayError::SchemaValidation {
            reason: format!("parameters of tool `{}`: {e}", reference.name),
        })?;
        spec = spec.with_parameters(shape)?;
    }
    Ok(Arc::new(spec))
}

/// Serializable description of a registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub model: String,
    pub system_prompt: String,
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_schema: Option<Value>,
    pub retries: u32,
    pub result_retries: u32,
    pub model_settings: ModelSettings,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::llm::TestModel;
    use crate::schema::FieldSpec;

    fn catalogs() -> (ToolCatalog, ModelCatalog) {
        (ToolCatalog::with_builtin_tools(), ModelCatalog::new())
    }

    fn config(value: Value) -> AgentConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn builds_from_config() {
        let (tools, models) = catalogs();
        let cfg = config(json!({
            "agent_id": "calc",
            "model": "test",
            "system_prompt": "You add numbers.",
            "tools": [{"name": "sum"}, "echo"],
            "result_schema": {"total": {"type": "integer"}},
            "retries": 3
        }));

        let def = cfg.build(&tools, &models).unwrap();
        assert_eq!(def.agent_id, "calc");
        assert_eq!(def.model_reference, "test");
        assert_eq!(def.tools.names(), vec!["sum", "echo"]);
        assert_eq!(def.retry_policy.max_retries, 3);
        assert_eq!(def.retry_policy.max_result_retries, 3);

        let output = def.output_tool().unwrap();
        assert_eq!(output.name, OUTPUT_TOOL_NAME);
        assert_eq!(output.parameters["required"], json!(["total"]));
    }

    #[test]
    fn result_type_alias_accepted() {
        let cfg = config(json!({
            "agent_id": "a",
            "model": "test",
            "result_type": {"type": "object", "properties": {"x": {"type": "string"}}}
        }));
        assert!(cfg.result_schema.is_some());
    }

    #[test]
    fn unknown_tool_rejected() {
        let (tools, models) = catalogs();
        let cfg = config(json!({"agent_id": "a", "model": "test", "tools": ["nope"]}));
        let err = cfg.build(&tools, &models).unwrap_err();
        assert!(matches!(err, GatewayError::SchemaValidation { .. }));
    }

    #[test]
    fn duplicate_tool_rejected() {
        let (tools, models) = catalogs();
        let cfg = config(json!({"agent_id": "a", "model": "test", "tools": ["sum", "sum"]}));
        assert!(matches!(
            cfg.build(&tools, &models),
            Err(GatewayError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn bad_schema_rejected() {
        let (tools, models) = catalogs();
        let cfg = config(json!({
            "agent_id": "a",
            "model": "test",
            "result_schema": {"x": {"type": "decimal"}}
        }));
        assert!(matches!(
            cfg.build(&tools, &models),
            Err(GatewayError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn unknown_model_provider_rejected() {
        let (tools, models) = catalogs();
        let cfg = config(json!({"agent_id": "a", "model": "mystery:thing"}));
        assert!(matches!(
            cfg.build(&tools, &models),
            Err(GatewayError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn empty_model_name_rejected_at_create() {
        let (tools, models) = catalogs();
        models.register("openai", crate::llm::LlmClientConfig::openai("sk-test"));
        let cfg = config(json!({"agent_id": "a", "model": "openai:"}));
        match cfg.build(&tools, &models) {
            Err(GatewayError::SchemaValidation { reason }) => {
                assert!(reason.contains("invalid model reference"), "{reason}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn tool_overrides_applied() {
        let (tools, models) = catalogs();
        let cfg = config(json!({
            "agent_id": "a",
            "model": "test",
            "tools": [{
                "name": "echo",
                "description": "Repeat the text back",
                "parameters": {"text": {"type": "string", "description": "what to say"}}
            }]
        }));
        let def = cfg.build(&tools, &models).unwrap();
        let echo = def.tools.resolve("echo").unwrap();
        assert_eq!(echo.description(), "Repeat the text back");
        assert_eq!(
            echo.parameters().json_schema()["properties"]["text"]["description"],
            "what to say"
        );
    }

    #[test]
    fn builder_rejects_empty_id_and_reserved_tool() {
        let model: Arc<dyn CompletionModel> = Arc::new(TestModel::new());
        assert!(AgentDefinition::builder("  ", model.clone()).build().is_err());

        let reserved = ToolSpec::new(
            OUTPUT_TOOL_NAME,
            "",
            Shape::new(),
            crate::tools::handler_fn(|_| async { Ok(Value::Null) }),
        )
        .unwrap();
        assert!(
            AgentDefinition::builder("a", model)
                .tool(reserved)
                .build()
                .is_err()
        );
    }

    #[test]
    fn summary_reports_definition() {
        let model: Arc<dyn CompletionModel> = Arc::new(TestModel::new());
        let def = AgentDefinition::builder("echo", model)
            .model_reference("test")
            .system_prompt("Be brief.")
            .result_schema(Shape::new().field("response", FieldSpec::string()))
            .build()
            .unwrap();
        let summary = serde_json::to_value(def.summary()).unwrap();
        assert_eq!(summary["agent_id"], "echo");
        assert_eq!(summary["model"], "test");
        assert_eq!(summary["result_schema"]["type"], "object");
        assert_eq!(summary["retries"], 1);
    }
}
