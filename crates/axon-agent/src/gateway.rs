//! The gateway facade.
//!
//! [`Gateway`] bundles the agent registry, the tool and model catalogs and the
//! dispatcher behind the operations a transport exposes.  It is cheap to
//! clone; clones share all state.

use std::sync::Arc;

use serde_json::Value;

use crate::definition::{AgentConfig, AgentDefinition, AgentSummary};
use crate::dispatcher::{Dispatcher, RunRequest, RunResult, RunStream};
use crate::error::Result;
use crate::llm::ModelCatalog;
use crate::registry::AgentRegistry;
use crate::tools::ToolCatalog;

#[derive(Debug, Clone)]
pub struct Gateway {
    registry: AgentRegistry,
    tools: ToolCatalog,
    models: ModelCatalog,
    dispatcher: Dispatcher,
}

impl Default for Gateway {
    /// Built-in tools and only the offline `test` model provider.
    fn default() -> Self {
        Self::new(ToolCatalog::with_builtin_tools(), ModelCatalog::new())
    }
}

impl Gateway {
    pub fn new(tools: ToolCatalog, models: ModelCatalog) -> Self {
        let registry = AgentRegistry::new();
        Self {
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            tools,
            models,
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn tools(&self) -> &ToolCatalog {
        &self.tools
    }

    pub fn models(&self) -> &ModelCatalog {
        &self.models
    }

    // -- Agent lifecycle ---------------------------------------------------

    /// Build an agent from its wire configuration and register it.
    ///
    /// # Errors
    ///
    /// [`GatewayError::SchemaValidation`](crate::GatewayError::SchemaValidation)
    /// if the configuration does not resolve, or
    /// [`GatewayError::DuplicateAgentId`](crate::GatewayError::DuplicateAgentId).
    pub fn create_agent(&self, config: &AgentConfig) -> Result<Arc<AgentDefinition>> {
        if self.registry.lookup(&config.agent_id).is_ok() {
            return Err(crate::GatewayError::DuplicateAgentId {
                agent_id: config.agent_id.clone(),
            });
        }
        let definition = config.build(&self.tools, &self.models)?;
        self.registry.register(definition)
    }

    /// Register an already built definition.
    pub fn register_agent(&self, definition: AgentDefinition) -> Result<Arc<AgentDefinition>> {
        self.registry.register(definition)
    }

    pub fn delete_agent(&self, agent_id: &str) -> Result<()> {
        self.registry.deregister(agent_id).map(|_| ())
    }

    pub fn describe_agent(&self, agent_id: &str) -> Result<AgentSummary> {
        self.registry.lookup(agent_id).map(|d| d.summary())
    }

    pub fn list_agents(&self) -> Vec<AgentSummary> {
        self.registry.list().iter().map(|d| d.summary()).collect()
    }

    // -- Execution ---------------------------------------------------------

    pub async fn run_sync(&self, agent_id: &str, request: RunRequest) -> Result<RunResult> {
        self.dispatcher.run_sync(agent_id, request).await
    }

    pub fn run_stream(&self, agent_id: &str, request: RunRequest) -> RunStream {
        self.dispatcher.run_stream(agent_id, request)
    }

    pub async fn call_tool(
        &self,
        agent_id: &str,
        tool_name: &str,
        arguments: &Value,
    ) -> Result<Value> {
        self.dispatcher.call_tool(agent_id, tool_name, arguments).await
    }
}
