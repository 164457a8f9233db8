use serde::{Deserialize, Serialize};

use crate::{common::types::AnyResult, configs::*};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    pub fn load() -> AnyResult<Self> {
        let config_path = if std::path::Path::new("config.toml").exists() {
            "config.toml"
        } else if std::path::Path::new("config.default.toml").exists() {
            "config.default.toml"
        } else {
            return Err("config.toml or config.default.toml not found".into());
        };

        let config_str = std::fs::read_to_string(config_path)?;
        if config_str.is_empty() {
            return Err(format!("{} is empty", config_path).into());
        }

        let config = Self::from_toml(&config_str)?;
        tracing::debug!("Loaded configuration from {}", config_path);
        Ok(config)
    }

    pub fn from_toml(text: &str) -> AnyResult<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.network.transport, Transport::Reqwest);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.pipeline.segment_retries, 3);
        assert!(config.logging.is_none());
    }

    #[test]
    fn parses_sections() {
        let config = Config::from_toml(
            r#"
            [network]
            transport = "socket"
            user_agent = "hlswave-test"
            keep_alive = false

            [retry]
            max_attempts = 6
            base_delay_ms = 10

            [cache]
            cache_busting = false

            [pipeline]
            max_bandwidth = 128000

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.network.transport, Transport::Socket);
        assert_eq!(config.network.user_agent, "hlswave-test");
        assert!(!config.network.keep_alive);
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.retry.base_delay_ms, 10);
        assert_eq!(config.retry.max_delay_ms, 8_000);
        assert!(!config.cache.cache_busting);
        assert_eq!(config.pipeline.max_bandwidth, Some(128_000));
        assert_eq!(
            config.logging.and_then(|l| l.level).as_deref(),
            Some("debug")
        );
    }
}
