//! Tool registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::traits::Tool;
use crate::types::ToolDefinition;

/// Tools available to a run, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Arc::new(tool));
        self
    }

    /// Register a tool under its own name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Register a tool under an explicit key
    pub fn register_as(&mut self, key: impl Into<String>, tool: Arc<dyn Tool>) {
        self.tools.insert(key.into(), tool);
    }

    /// Exact key first, then a tool whose own id equals `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools
            .get(name)
            .or_else(|| self.tools.values().find(|t| t.id() == Some(name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered keys, sorted.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Tool>)> {
        self.tools.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn any_requires_approval(&self) -> bool {
        self.tools.values().any(|t| t.requires_approval())
    }

    pub fn any_can_suspend(&self) -> bool {
        self.tools.values().any(|t| t.suspend_schema().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::FnTool;
    use serde_json::json;

    #[test]
    fn test_lookup_by_key_then_id() {
        let mut registry = ToolRegistry::new();
        registry.register_as(
            "web_search",
            Arc::new(FnTool::new("search", "Search the web").with_id("search-v2")),
        );

        assert!(registry.get("web_search").is_some());
        assert!(registry.get("search-v2").is_some());
        assert!(registry.get("search").is_none());
    }

    #[test]
    fn test_capability_scans() {
        let registry = ToolRegistry::new()
            .with_tool(FnTool::new("a", "plain"))
            .with_tool(FnTool::new("b", "waits").with_suspend_schema(json!({"type": "object"})));

        assert!(!registry.any_requires_approval());
        assert!(registry.any_can_suspend());
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
    }
}
