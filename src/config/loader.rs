//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::GuardConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GuardConfig, ConfigError> {
    let config: GuardConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::national_id::LookupFailurePolicy;
    use std::io::Write;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.lockout.max_attempts, 5);
        assert_eq!(config.audit.capacity, 10_000);
        assert_eq!(config.rate_limit.general.max_requests, 100);
    }

    #[test]
    fn test_partial_sections() {
        let config = parse_config(
            r#"
            [ssrf]
            allowed_domains = ["googleapis.com"]

            [national_id]
            on_lookup_failure = "reject"

            [rate_limit.strict]
            window_secs = 30
            max_requests = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.ssrf.allowed_domains, vec!["googleapis.com"]);
        assert!(!config.ssrf.url_fields.is_empty());
        assert_eq!(config.national_id.on_lookup_failure, LookupFailurePolicy::Reject);
        assert_eq!(config.rate_limit.strict.max_requests, 3);
        assert!(!config.rate_limit.strict.skip_successful);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = parse_config("[lockout]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref e) if e.len() == 1));
        assert!(err.to_string().contains("lockout.max_attempts"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[listener]\nbind_address = \"127.0.0.1:9999\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9999");

        let missing = load_config(Path::new("/nonexistent/portal-guard.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
