//! Agent loop configuration.

use std::time::Duration;

use crate::config::{ConfigProvider, ConfigProviderExt, ConfigResult, keys};

pub const DEFAULT_TOOL_CONCURRENCY: usize = 10;
pub const DEFAULT_MAX_ITERATIONS: usize = 50;

/// Execution behavior configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// Maximum model turns per run
    pub max_iterations: usize,
    /// Upper bound on concurrently executing tool calls; `0` means the default
    pub tool_concurrency: usize,
    /// Force approval for every tool call regardless of tool configuration
    pub require_tool_approval: bool,
    /// Overall timeout for one `run`/`resume` call
    pub timeout: Option<Duration>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool_concurrency: DEFAULT_TOOL_CONCURRENCY,
            require_tool_approval: false,
            timeout: None,
        }
    }
}

impl ExecutionConfig {
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_tool_concurrency(mut self, concurrency: usize) -> Self {
        self.tool_concurrency = concurrency;
        self
    }

    pub fn with_require_tool_approval(mut self, required: bool) -> Self {
        self.require_tool_approval = required;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Configured concurrency with `0` mapped to the default.
    pub fn effective_concurrency(&self) -> usize {
        if self.tool_concurrency == 0 {
            DEFAULT_TOOL_CONCURRENCY
        } else {
            self.tool_concurrency
        }
    }

    /// Reads overrides from `provider`, keeping defaults for absent keys.
    pub async fn load<P: ConfigProvider + ?Sized>(provider: &P) -> ConfigResult<Self> {
        let mut config = Self::default();
        if let Some(max) = provider.get::<usize>(keys::MAX_ITERATIONS).await? {
            config.max_iterations = max;
        }
        if let Some(concurrency) = provider.get::<usize>(keys::TOOL_CONCURRENCY).await? {
            config.tool_concurrency = concurrency;
        }
        if let Some(required) = provider.get::<bool>(keys::REQUIRE_TOOL_APPROVAL).await? {
            config.require_tool_approval = required;
        }
        if let Some(secs) = provider.get::<u64>(keys::TIMEOUT_SECS).await? {
            config.timeout = Some(Duration::from_secs(secs));
        }
        tracing::debug!(provider = provider.name(), ?config, "Loaded execution config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigProvider;

    #[test]
    fn test_zero_concurrency_falls_back() {
        let config = ExecutionConfig::default().with_tool_concurrency(0);
        assert_eq!(config.effective_concurrency(), DEFAULT_TOOL_CONCURRENCY);
        assert_eq!(
            ExecutionConfig::default()
                .with_tool_concurrency(3)
                .effective_concurrency(),
            3
        );
    }

    #[tokio::test]
    async fn test_load_from_provider() {
        let provider = MemoryConfigProvider::new()
            .value(keys::TOOL_CONCURRENCY, 4)
            .value(keys::REQUIRE_TOOL_APPROVAL, true)
            .value(keys::TIMEOUT_SECS, 30);

        let config = ExecutionConfig::load(&provider).await.unwrap();
        assert_eq!(config.tool_concurrency, 4);
        assert!(config.require_tool_approval);
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
    }

    #[tokio::test]
    async fn test_load_rejects_bad_values() {
        let provider = MemoryConfigProvider::new().value(keys::MAX_ITERATIONS, "many");
        assert!(ExecutionConfig::load(&provider).await.is_err());
    }
}
