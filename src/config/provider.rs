//! Configuration Provider Trait

use serde::de::DeserializeOwned;

use super::{ConfigError, ConfigResult};

/// Core configuration provider trait
#[async_trait::async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Get a raw configuration value
    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>>;

    /// List keys matching a prefix
    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>>;
}

/// Parses a raw value as JSON, falling back to a bare string so that
/// `AGENT_RUNTIME_NAME=worker` reads as `"worker"`.
pub(crate) fn parse_raw<T: DeserializeOwned>(key: &str, raw: &str) -> ConfigResult<T> {
    serde_json::from_str(raw)
        .or_else(|_| serde_json::from_value(serde_json::Value::String(raw.to_string())))
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

/// Extension methods for typed configuration access
pub trait ConfigProviderExt: ConfigProvider {
    /// Get a typed configuration value
    fn get<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<Option<T>>> + Send
    where
        Self: Sync,
    {
        async move {
            match self.get_raw(key).await? {
                Some(raw) => parse_raw(key, &raw).map(Some),
                None => Ok(None),
            }
        }
    }

    /// Get a typed value or fail with [`ConfigError::NotFound`]
    fn require<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<T>> + Send
    where
        Self: Sync,
    {
        async move {
            self.get(key).await?.ok_or_else(|| ConfigError::NotFound {
                key: key.to_string(),
            })
        }
    }
}

impl<P: ConfigProvider + ?Sized> ConfigProviderExt for P {}
