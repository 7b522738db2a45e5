//! In-memory agent registry.
//!
//! Backed by a [`DashMap`], so lookups of one agent never wait on the
//! registration or removal of another.  Insertion goes through the entry API,
//! which makes the duplicate-id check and the insert a single atomic step.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::definition::AgentDefinition;
use crate::error::{GatewayError, Result};

/// Concurrent agent id → definition map.  Cheap to clone; clones share the
/// same underlying map.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    inner: Arc<DashMap<String, Arc<AgentDefinition>>>,
}

impl AgentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under its `agent_id`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::DuplicateAgentId`] if the id is already taken.
    pub fn register(&self, definition: AgentDefinition) -> Result<Arc<AgentDefinition>> {
        match self.inner.entry(definition.agent_id.clone()) {
            Entry::Occupied(entry) => Err(GatewayError::DuplicateAgentId {
                agent_id: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                let definition = Arc::new(definition);
                tracing::info!(
                    agent_id = %definition.agent_id,
                    model = %definition.model_reference,
                    tools = definition.tools.len(),
                    "agent registered"
                );
                entry.insert(Arc::clone(&definition));
                Ok(definition)
            }
        }
    }

    /// Remove an agent.  Runs already holding the definition finish normally.
    pub fn deregister(&self, agent_id: &str) -> Result<Arc<AgentDefinition>> {
        let (_, definition) =
            self.inner
                .remove(agent_id)
                .ok_or_else(|| GatewayError::AgentNotFound {
                    agent_id: agent_id.to_owned(),
                })?;
        tracing::info!(agent_id = %agent_id, "agent deregistered");
        Ok(definition)
    }

    pub fn lookup(&self, agent_id: &str) -> Result<Arc<AgentDefinition>> {
        self.inner
            .get(agent_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| GatewayError::AgentNotFound {
                agent_id: agent_id.to_owned(),
            })
    }

    /// Snapshot of every definition, sorted by id.
    pub fn list(&self) -> Vec<Arc<AgentDefinition>> {
        let mut agents: Vec<Arc<AgentDefinition>> =
            self.inner.iter().map(|e| Arc::clone(e.value())).collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
