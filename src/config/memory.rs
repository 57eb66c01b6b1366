//! In-Memory Configuration Provider
//!
//! Useful for testing and code-defined configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::ConfigResult;
use super::provider::ConfigProvider;

#[derive(Debug, Default)]
pub struct MemoryConfigProvider {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_data(data: HashMap<String, String>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Builder-style insert.
    pub fn value(self, key: impl Into<String>, value: impl ToString) -> Self {
        if let Ok(mut data) = self.data.try_write() {
            data.insert(key.into(), value.to_string());
        }
        self
    }

    pub async fn insert(&self, key: impl Into<String>, value: impl ToString) {
        self.data.write().await.insert(key.into(), value.to_string());
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for MemoryConfigProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        let data = self.data.read().await;
        Ok(data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigProviderExt;

    #[tokio::test]
    async fn test_memory_provider_builder_values() {
        let provider = MemoryConfigProvider::new()
            .value("max_iterations", 3)
            .value("require_tool_approval", true);

        assert_eq!(provider.len().await, 2);
        let max: Option<usize> = provider.get("max_iterations").await.unwrap();
        assert_eq!(max, Some(3));
        let keys = provider.list_keys("require").await.unwrap();
        assert_eq!(keys, vec!["require_tool_approval".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_provider_insert() {
        let provider = MemoryConfigProvider::new();
        provider.insert("timeout_secs", 30).await;
        let timeout: Option<u64> = provider.get("timeout_secs").await.unwrap();
        assert_eq!(timeout, Some(30));
    }
}
