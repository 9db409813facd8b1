//! Configuration for the resilience stack.
//!
//! Every field is optional in config files; missing values fall back to
//! the defaults of each layer. Durations are written human-readable
//! (`"5m"`, `"1s 500ms"`) or as integer milliseconds.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use bulwark_core::validate_config_schema;

use crate::batch::BatchConfig;
use crate::cache::CacheConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::monitoring::MonitoringConfig;
use crate::retry::RetryPolicy;

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config failed schema validation: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Configuration for the full resilience stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Response cache (innermost layer)
    pub cache: CacheConfig,

    /// Retry with backoff
    pub retry: RetryPolicy,

    /// Circuit breaker
    pub circuit_breaker: CircuitBreakerConfig,

    /// Error monitoring (outermost layer)
    pub monitoring: MonitoringConfig,

    /// Batch helper
    pub batch: BatchConfig,

    /// Per-attempt deadline on the base operation; disabled when absent
    #[serde(with = "duration_human::option", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl ResilienceConfig {
    /// Parse a config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a config from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse a config file, picking the format from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_yaml_file(path),
        }
    }

    /// Render as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        // An empty document means "all defaults"
        let value = if value.is_null() {
            serde_json::json!({})
        } else {
            value
        };

        validate_config_schema(&value).map_err(ConfigError::Schema)?;
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints the schema cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid("cache.capacity must be at least 1".into()));
        }

        let retry = &self.retry;
        if retry.initial_delay > retry.max_delay {
            return Err(ConfigError::Invalid(format!(
                "retry.initial_delay ({:?}) exceeds retry.max_delay ({:?})",
                retry.initial_delay, retry.max_delay
            )));
        }
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff_multiplier must be a finite number >= 1, got {}",
                retry.backoff_multiplier
            )));
        }

        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker thresholds must be at least 1".into(),
            ));
        }

        if self.monitoring.window_size == 0 {
            return Err(ConfigError::Invalid("monitoring.window_size must be at least 1".into()));
        }

        if self.batch.concurrency == 0 {
            return Err(ConfigError::Invalid("batch.concurrency must be at least 1".into()));
        }

        if self.timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid("timeout must be greater than zero".into()));
        }

        Ok(())
    }
}

/// Serde adapter for human-readable durations.
pub mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(u64),
    }

    fn from_raw<E: serde::de::Error>(raw: Raw) -> Result<Duration, E> {
        match raw {
            Raw::Text(text) => humantime::parse_duration(text.trim()).map_err(E::custom),
            Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
        }
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        from_raw::<D::Error>(Raw::deserialize(deserializer)?)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<Raw>::deserialize(deserializer)? {
                Some(raw) => from_raw::<D::Error>(raw).map(Some),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::ErrorClass;

    #[test]
    fn test_defaults() {
        let config = ResilienceConfig::default();
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert_eq!(config.cache.capacity, 100);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(1000));
        assert_eq!(config.retry.max_delay, Duration::from_millis(30_000));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_secs(60));
        assert_eq!(config.circuit_breaker.success_threshold, 3);
        assert_eq!(config.monitoring.window_size, 100);
        assert_eq!(config.batch.concurrency, 5);
        assert_eq!(config.timeout, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_is_all_defaults() {
        assert_eq!(ResilienceConfig::from_yaml("").unwrap(), ResilienceConfig::default());
        assert_eq!(ResilienceConfig::from_yaml("{}").unwrap(), ResilienceConfig::default());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
cache:
  ttl: 90s
retry:
  max_retries: 5
  initial_delay: 250ms
  retryable: [429, 503]
circuit_breaker:
  reset_timeout: 2m
timeout: 1500
"#;
        let config = ResilienceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.cache.ttl, Duration::from_secs(90));
        assert_eq!(config.cache.capacity, 100);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert!(config.retry.retryable.contains(&ErrorClass::Unavailable));
        assert!(!config.retry.retryable.contains(&ErrorClass::InternalFault));
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_secs(120));
        assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_schema_errors_surface() {
        let result = ResilienceConfig::from_yaml("retry:\n  attempts: 3\n");
        assert!(matches!(result, Err(ConfigError::Schema(_))));
    }

    #[test]
    fn test_semantic_validation() {
        let yaml = "retry:\n  initial_delay: 10s\n  max_delay: 1s\n";
        assert!(matches!(
            ResilienceConfig::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_bad_duration_text() {
        let result = ResilienceConfig::from_json(r#"{"cache": {"ttl": "5 fortnights"}}"#);
        assert!(matches!(result, Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_yaml_roundtrip_of_defaults() {
        let yaml = ResilienceConfig::default().to_yaml().unwrap();
        assert!(yaml.contains("ttl: 5m"));
        assert_eq!(ResilienceConfig::from_yaml(&yaml).unwrap(), ResilienceConfig::default());
    }
}
