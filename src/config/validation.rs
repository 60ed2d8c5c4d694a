//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, attempts > 0, multiplier bounds)
//! - Check addresses and URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function over the parsed config
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::chain::types::Chain;
use crate::config::schema::TransferNodeConfig;

/// Lowest accepted import base-fee multiplier, in percent.
pub const MIN_IMPORT_FEE_MULTIPLIER_PERCENT: u32 = 100;

/// Highest accepted import base-fee multiplier, in percent.
pub const MAX_IMPORT_FEE_MULTIPLIER_PERCENT: u32 = 300;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &TransferNodeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "service.bind_address",
            format!("'{}' is not a socket address", config.service.bind_address),
        ));
    }
    if config.service.data_dir.trim().is_empty() {
        errors.push(ValidationError::new("service.data_dir", "must not be empty"));
    }
    if config.service.request_timeout_secs == 0 {
        errors.push(ValidationError::new("service.request_timeout_secs", "must be positive"));
    }

    for chain in Chain::ALL {
        let endpoint = config.chains.get(chain);
        let prefix = format!("chains.{}", chain.as_str().to_ascii_lowercase());
        for url in std::iter::once(&endpoint.rpc_url).chain(endpoint.failover_urls.iter()) {
            if url.parse::<url::Url>().is_err() {
                errors.push(ValidationError::new(
                    format!("{}.rpc_url", prefix),
                    format!("'{}' is not a valid URL", url),
                ));
            }
        }
        if endpoint.call_timeout_secs == 0 {
            errors.push(ValidationError::new(
                format!("{}.call_timeout_secs", prefix),
                "must be positive",
            ));
        }
    }

    let transfer = &config.transfer;
    if transfer.finality_max_attempts == 0 {
        errors.push(ValidationError::new("transfer.finality_max_attempts", "must be positive"));
    }
    if transfer.submit_max_attempts == 0 {
        errors.push(ValidationError::new("transfer.submit_max_attempts", "must be positive"));
    }
    if transfer.recovery_max_attempts == 0 {
        errors.push(ValidationError::new("transfer.recovery_max_attempts", "must be positive"));
    }
    if !(MIN_IMPORT_FEE_MULTIPLIER_PERCENT..=MAX_IMPORT_FEE_MULTIPLIER_PERCENT)
        .contains(&transfer.import_fee_multiplier_percent)
    {
        errors.push(ValidationError::new(
            "transfer.import_fee_multiplier_percent",
            format!(
                "{} is outside {}..={}",
                transfer.import_fee_multiplier_percent,
                MIN_IMPORT_FEE_MULTIPLIER_PERCENT,
                MAX_IMPORT_FEE_MULTIPLIER_PERCENT
            ),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
