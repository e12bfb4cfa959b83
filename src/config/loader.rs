//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{normalize_config, validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse, normalize and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let mut config: GatewayConfig = toml::from_str(content)?;
    normalize_config(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[listener]
bind_address = "127.0.0.1:9000"

[[endpoints]]
endpoint = "/users/{id}"

[[endpoints.backends]]
hosts = ["http://127.0.0.1:3000"]
url_pattern = "/users/{id}"
allow = ["id", "name"]

[endpoints.backends.extra_config."qos/circuit-breaker"]
interval = 60
timeout = 10
max_errors = 1

[endpoints.backends.extra_config."qos/ratelimit/proxy"]
max_rate = 50
"#;

    #[test]
    fn test_parse_sample() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.endpoints.len(), 1);

        let endpoint = &config.endpoints[0];
        assert_eq!(endpoint.method, "GET");
        let backend = &endpoint.backends[0];
        assert_eq!(backend.name, "/users/{id}");
        assert_eq!(backend.encoding, "json");
        assert!(backend.has_namespace("qos/circuit-breaker"));
        assert_eq!(
            backend.extra_config["qos/ratelimit/proxy"]["max_rate"],
            serde_json::json!(50)
        );
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            parse_config("[[endpoints]]\nendpoint = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validation_error_is_reported() {
        let err = parse_config("[[endpoints]]\nendpoint = \"/x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("has no backends"));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_config(Path::new("/definitely/not/here.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
