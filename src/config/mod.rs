//! Pluggable configuration provider system.
//!
//! ```rust,no_run
//! use agent_runtime::agent::ExecutionConfig;
//! use agent_runtime::config::ConfigBuilder;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = ConfigBuilder::new().env().build();
//! let config = ExecutionConfig::load(&provider).await?;
//! # Ok(())
//! # }
//! ```

pub mod composite;
pub mod env;
pub mod memory;
pub mod provider;

pub use composite::CompositeConfigProvider;
pub use env::{DEFAULT_ENV_PREFIX, EnvConfigProvider};
pub use memory::MemoryConfigProvider;
pub use provider::{ConfigProvider, ConfigProviderExt};

use thiserror::Error;

/// Keys read by [`ExecutionConfig::load`](crate::agent::ExecutionConfig::load).
pub mod keys {
    pub const MAX_ITERATIONS: &str = "max_iterations";
    pub const TOOL_CONCURRENCY: &str = "tool_concurrency";
    pub const REQUIRE_TOOL_APPROVAL: &str = "require_tool_approval";
    pub const TIMEOUT_SECS: &str = "timeout_secs";
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("Provider error: {message}")]
    Provider { message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Configuration builder for fluent API
#[derive(Default)]
pub struct ConfigBuilder {
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment variables with the default `AGENT_RUNTIME_` prefix
    pub fn env(mut self) -> Self {
        self.providers.push(Box::new(EnvConfigProvider::new()));
        self
    }

    pub fn env_with_prefix(mut self, prefix: &str) -> Self {
        self.providers
            .push(Box::new(EnvConfigProvider::prefixed(prefix)));
        self
    }

    pub fn memory(mut self, provider: MemoryConfigProvider) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn provider(mut self, provider: Box<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build(self) -> CompositeConfigProvider {
        let mut composite = CompositeConfigProvider::new();
        for provider in self.providers {
            composite.add_provider(provider);
        }
        composite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::NotFound {
            key: keys::TOOL_CONCURRENCY.to_string(),
        };
        assert!(err.to_string().contains("tool_concurrency"));
    }

    #[test]
    fn test_config_builder_order() {
        let composite = ConfigBuilder::new()
            .memory(MemoryConfigProvider::new())
            .env()
            .build();
        assert_eq!(composite.provider_names(), vec!["memory", "env"]);
    }
}
