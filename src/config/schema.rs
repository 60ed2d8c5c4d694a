//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the transfer
//! node. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::chain::types::{Chain, NetworkMode};

/// Root configuration for the transfer node.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TransferNodeConfig {
    /// HTTP service, storage and wallet settings.
    pub service: ServiceConfig,

    /// Per-chain RPC endpoints.
    pub chains: ChainsConfig,

    /// Retry budgets and fee tuning for transfers.
    pub transfer: TransferConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Bind address of the HTTP API (e.g., "127.0.0.1:8650").
    pub bind_address: String,

    /// Directory holding persisted transfer state.
    pub data_dir: String,

    /// Network the wallet operates on.
    pub network: NetworkMode,

    /// Identifier of the wallet, used to namespace cached keys.
    pub wallet_id: String,

    /// Account indices whose keys are loaded at startup.
    pub accounts: Vec<u32>,

    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8650".to_string(),
            data_dir: "./data/transfers".to_string(),
            network: NetworkMode::Mainnet,
            wallet_id: "default".to_string(),
            accounts: vec![0],
            request_timeout_secs: 30,
        }
    }
}

/// Endpoints of both chains.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ChainsConfig {
    pub p: ChainEndpointConfig,
    pub c: ChainEndpointConfig,
}

impl ChainsConfig {
    pub fn get(&self, chain: Chain) -> &ChainEndpointConfig {
        match chain {
            Chain::P => &self.p,
            Chain::C => &self.c,
        }
    }
}

/// RPC configuration of one chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChainEndpointConfig {
    /// Base URL of the node (chain paths are appended).
    pub rpc_url: String,

    /// Failover node URLs, tried in order.
    pub failover_urls: Vec<String>,

    /// Timeout of each individual call in seconds.
    pub call_timeout_secs: u64,

    /// Fixed base fee per byte in nAVAX, instead of asking the node.
    pub static_base_fee: Option<u64>,
}

impl Default for ChainEndpointConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.avax.network".to_string(),
            failover_urls: Vec::new(),
            call_timeout_secs: 10,
            static_base_fee: None,
        }
    }
}

/// Backoff shape used while polling for finality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Exponential,
    Constant,
}

/// Transfer tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Status polls before a transfer is reported stuck.
    pub finality_max_attempts: u32,

    /// Backoff between status polls.
    pub finality_backoff: BackoffKind,

    /// Delay unit in seconds: the constant delay, or the base of `2^n`.
    pub finality_backoff_secs: u64,

    /// Submission attempts for transient network errors.
    pub submit_max_attempts: u32,

    /// Constant delay between submission attempts in seconds.
    pub submit_backoff_secs: u64,

    /// Multiplier applied to the destination base fee, in percent.
    pub import_fee_multiplier_percent: u32,

    /// Attempts at listing pending imports during recovery.
    pub recovery_max_attempts: u32,

    /// Constant delay between those attempts in seconds.
    pub recovery_backoff_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            finality_max_attempts: 6,
            finality_backoff: BackoffKind::Exponential,
            finality_backoff_secs: 1,
            submit_max_attempts: 3,
            submit_backoff_secs: 1,
            import_fee_multiplier_percent: 100,
            recovery_max_attempts: 10,
            recovery_backoff_secs: 2,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
