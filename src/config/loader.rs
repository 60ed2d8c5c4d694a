//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::TransferNodeConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<TransferNodeConfig, ConfigError> {
    let config: TransferNodeConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<TransferNodeConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::types::NetworkMode;
    use crate::config::schema::BackoffKind;
    use std::io::Write;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.transfer.finality_max_attempts, 6);
        assert_eq!(config.transfer.finality_backoff, BackoffKind::Exponential);
        assert_eq!(config.transfer.import_fee_multiplier_percent, 100);
        assert_eq!(config.service.network, NetworkMode::Mainnet);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[service]
network = "fuji"
accounts = [0, 1]

[chains.c]
rpc_url = "http://localhost:9650"
static_base_fee = 25

[transfer]
finality_backoff = "constant"
finality_backoff_secs = 2
import_fee_multiplier_percent = 150
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.service.network, NetworkMode::Fuji);
        assert_eq!(config.service.accounts, vec![0, 1]);
        assert_eq!(config.chains.c.static_base_fee, Some(25));
        assert_eq!(config.chains.p.call_timeout_secs, 10);
        assert_eq!(config.transfer.finality_backoff, BackoffKind::Constant);
        assert_eq!(config.transfer.import_fee_multiplier_percent, 150);
    }

    #[test]
    fn test_parse_error() {
        let err = parse_config("[transfer]\nfinality_max_attempts = \"six\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_errors_are_reported_together() {
        let err = parse_config(
            "[transfer]\nfinality_max_attempts = 0\nimport_fee_multiplier_percent = 50",
        )
        .unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/transfer-node.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
