//! JSON Schema validation for resilience configuration.
//!
//! Config files are validated against schema/resilience.schema.json before
//! they are deserialized, so unknown keys and out-of-range values are
//! reported with their location instead of a bare serde error.

use std::sync::OnceLock;
use thiserror::Error;

const CONFIG_SCHEMA_JSON: &str = include_str!("../../../schema/resilience.schema.json");

/// The embedded schema could not be turned into a validator.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Embedded config schema is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Embedded config schema failed to compile: {0}")]
    Compile(String),
}

fn compile() -> Result<jsonschema::Validator, SchemaError> {
    let schema: serde_json::Value = serde_json::from_str(CONFIG_SCHEMA_JSON)?;
    jsonschema::options()
        .build(&schema)
        .map_err(|e| SchemaError::Compile(e.to_string()))
}

/// Validator for the embedded schema, compiled on first use.
pub fn validator() -> Result<&'static jsonschema::Validator, &'static SchemaError> {
    static VALIDATOR: OnceLock<Result<jsonschema::Validator, SchemaError>> = OnceLock::new();
    VALIDATOR.get_or_init(compile).as_ref()
}

/// Validate a config value against the schema.
///
/// Returns every violation as `"<message> at <path>"`.
pub fn validate_config_schema(config: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(config)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_schema_compiles() {
        assert!(validator().is_ok());
        assert!(std::ptr::eq(validator().unwrap(), validator().unwrap()));
    }

    #[test]
    fn test_empty_config_is_valid() {
        assert!(validate_config_schema(&serde_json::json!({})).is_ok());
    }

    #[test]
    fn test_full_config_is_valid() {
        let value = serde_json::json!({
            "cache": {"enabled": true, "ttl": "5m", "capacity": 100},
            "retry": {
                "max_retries": 3,
                "initial_delay": "1s",
                "max_delay": 30000,
                "backoff_multiplier": 2.0,
                "retryable": [429, 500, 502, 503, 504],
                "retry_unclassified": true
            },
            "circuit_breaker": {"failure_threshold": 5, "reset_timeout": "60s", "success_threshold": 3},
            "monitoring": {"window_size": 100},
            "batch": {"concurrency": 5},
            "timeout": "10s"
        });
        assert!(validate_config_schema(&value).is_ok());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let value = serde_json::json!({"retry": {"max_attempts": 3}});
        let errors = validate_config_schema(&value).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let value = serde_json::json!({
            "cache": {"capacity": 0},
            "retry": {"backoff_multiplier": 0.5}
        });
        let errors = validate_config_schema(&value).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("/cache/capacity")));
    }
}
