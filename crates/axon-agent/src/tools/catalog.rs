//! Process-wide catalog of tool capabilities.
//!
//! Agents created over the API reference tools by name; the catalog is where
//! those names are resolved.  It is filled at startup and cheaply cloneable.

use std::sync::Arc;

use dashmap::DashMap;

use super::ToolSpec;

/// Concurrent name → [`ToolSpec`] map backed by [`DashMap`].
#[derive(Clone, Default)]
pub struct ToolCatalog {
    inner: Arc<DashMap<String, Arc<ToolSpec>>>,
}

impl ToolCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-filled with the built-in tools.
    #[must_use]
    pub fn with_builtin_tools() -> Self {
        let catalog = Self::new();
        for tool in super::builtin::builtin_tools() {
            catalog.register(tool);
        }
        catalog
    }

    /// Register a tool.  A tool with the same name is replaced.
    pub fn register(&self, tool: ToolSpec) {
        let name = tool.name().to_owned();
        tracing::info!(tool = %name, "tool registered in catalog");
        self.inner.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.inner.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl std::fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCatalog")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::schema::Shape;
    use crate::tools::handler_fn;

    fn noop(name: &str, description: &str) -> ToolSpec {
        ToolSpec::new(
            name,
            description,
            Shape::new(),
            handler_fn(|_| async { Ok(Value::Null) }),
        )
        .unwrap()
    }

    #[test]
    fn register_and_get() {
        let catalog = ToolCatalog::new();
        assert!(catalog.is_empty());

        catalog.register(noop("b", "first"));
        catalog.register(noop("a", ""));
        assert_eq!(catalog.names(), vec!["a", "b"]);
        assert_eq!(catalog.get("b").unwrap().description(), "first");
        assert!(catalog.get("c").is_none());
    }

    #[test]
    fn register_replaces() {
        let catalog = ToolCatalog::new();
        catalog.register(noop("x", "old"));
        catalog.register(noop("x", "new"));
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("x").unwrap().description(), "new");
    }

    #[test]
    fn clones_share_state() {
        let catalog = ToolCatalog::new();
        let clone = catalog.clone();
        clone.register(noop("shared", ""));
        assert!(catalog.get("shared").is_some());
    }

    #[test]
    fn builtins_present() {
        let catalog = ToolCatalog::with_builtin_tools();
        for name in ["sum", "echo", "current_time"] {
            assert!(catalog.get(name).is_some(), "missing builtin {name}");
        }
    }
}
