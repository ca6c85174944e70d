//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding `listener.address`.
pub const ENV_ADDRESS: &str = "RPC_ADDRESS";

/// Environment variable carrying the application id.
pub const ENV_APP_ID: &str = "RPC_APP_ID";

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

/// Load and validate configuration from a TOML file.
///
/// Environment overrides are applied between parsing and validation.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: ServerConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply `RPC_ADDRESS` / `RPC_APP_ID` style overrides.
///
/// The lookup is injected so tests don't have to touch the process
/// environment.
pub fn apply_env_overrides<F>(config: &mut ServerConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(address) = lookup(ENV_ADDRESS).filter(|v| !v.is_empty()) {
        config.listener.address = address;
    }
    if let Some(app_id) = lookup(ENV_APP_ID).filter(|v| !v.is_empty()) {
        config.app_id = Some(app_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_toml_with_defaults_for_missing_sections() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
app_id = "echo"

[listener]
address = "127.0.0.1:9000"

[observability]
log_format = "json"
"#
        )
        .expect("write");

        let config = load_config(file.path()).expect("load");
        assert_eq!(config.address(), "127.0.0.1:9000");
        assert_eq!(config.app_id.as_deref(), Some("echo"));
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.observability.log_level, "info");
        assert!(config.listener.handle_signals);
    }

    #[test]
    fn invalid_address_fails_validation() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "[listener]\naddress = \"localhost\"").expect("write");

        match load_config(file.path()) {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "listener.address");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "[listener\naddress = ").expect("write");
        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = ServerConfig::default();
        apply_env_overrides(&mut config, |key| match key {
            ENV_ADDRESS => Some("10.0.0.1:7000".to_string()),
            ENV_APP_ID => Some("billing".to_string()),
            _ => None,
        });
        assert_eq!(config.address(), "10.0.0.1:7000");
        assert_eq!(config.app_id.as_deref(), Some("billing"));
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut config = ServerConfig::default();
        apply_env_overrides(&mut config, |_| Some(String::new()));
        assert_eq!(config, ServerConfig::default());
    }
}
