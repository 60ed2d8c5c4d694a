//! Chain-specific types and error definitions.

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::chain::amount::Amount;

/// Minimum flat fee, in nAVAX, the staking chain accepts for any transaction.
pub const P_CHAIN_MIN_FEE: u64 = 100;

/// Supported ledgers.
///
/// Every per-chain property (curve, fee floor, status vocabulary, address
/// format, RPC namespace) is resolved by an exhaustive match on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Chain {
    /// Staking-oriented UTXO chain.
    #[serde(rename = "P", alias = "p")]
    P,
    /// EVM-compatible account chain.
    #[serde(rename = "C", alias = "c")]
    C,
}

impl Chain {
    pub const ALL: [Chain; 2] = [Chain::P, Chain::C];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::P => "P",
            Chain::C => "C",
        }
    }

    /// Curve and derivation coin type used for keys on this chain.
    pub fn curve_spec(&self) -> CurveSpec {
        match self {
            Chain::P => CurveSpec {
                curve: Curve::Secp256k1,
                coin_type: 9000,
            },
            Chain::C => CurveSpec {
                curve: Curve::Secp256k1,
                coin_type: 60,
            },
        }
    }

    /// Minimum fee any transaction on this chain must pay.
    pub fn fee_floor(&self) -> Amount {
        match self {
            Chain::P => Amount::from(P_CHAIN_MIN_FEE),
            Chain::C => Amount::ZERO,
        }
    }

    /// Status value the chain reports once a transaction is final.
    pub fn finalized_status(&self) -> TransactionStatus {
        match self {
            Chain::P => TransactionStatus::Committed,
            Chain::C => TransactionStatus::Accepted,
        }
    }

    /// Whether spending happens from UTXOs (true) or from a nonce-based account.
    pub fn is_utxo(&self) -> bool {
        match self {
            Chain::P => true,
            Chain::C => false,
        }
    }

    /// Whether exports on this chain get their burned amount validated
    /// against the expected fee before signing.
    pub fn validates_burn(&self) -> bool {
        match self {
            Chain::P => false,
            Chain::C => true,
        }
    }

    /// JSON-RPC namespace for atomic transaction methods.
    pub fn rpc_namespace(&self) -> &'static str {
        match self {
            Chain::P => "platform",
            Chain::C => "avax",
        }
    }

    /// One-byte tag used by the transaction codec.
    pub fn codec_tag(&self) -> u8 {
        match self {
            Chain::P => 0x01,
            Chain::C => 0x02,
        }
    }

    /// Render a 20-byte address in this chain's identifier format.
    pub fn format_address(&self, address: Address) -> String {
        match self {
            Chain::P => format!("P-{}", alloy::primitives::hex::encode(address.as_slice())),
            Chain::C => address.to_checksum(None),
        }
    }

    /// Parse an address written in this chain's identifier format.
    pub fn parse_address(&self, input: &str) -> Result<Address, ChainError> {
        let trimmed = input.trim();
        let raw = match self {
            Chain::P => trimmed
                .strip_prefix("P-")
                .ok_or_else(|| ChainError::InvalidAddress {
                    chain: *self,
                    address: input.to_string(),
                })?,
            Chain::C => trimmed,
        };
        raw.parse::<Address>().map_err(|_| ChainError::InvalidAddress {
            chain: *self,
            address: input.to_string(),
        })
    }

    /// The other chain of the supported pair.
    pub fn counterpart(&self) -> Chain {
        match self {
            Chain::P => Chain::C,
            Chain::C => Chain::P,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P" | "P-CHAIN" => Ok(Chain::P),
            "C" | "C-CHAIN" => Ok(Chain::C),
            _ => Err(ChainError::UnknownChain(s.to_string())),
        }
    }
}

/// Network the wallet is connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    #[default]
    Mainnet,
    Fuji,
}

impl NetworkMode {
    pub fn network_id(&self) -> u32 {
        match self {
            NetworkMode::Mainnet => 1,
            NetworkMode::Fuji => 5,
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Mainnet => f.write_str("mainnet"),
            NetworkMode::Fuji => f.write_str("fuji"),
        }
    }
}

/// Elliptic curves a chain may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Curve {
    Secp256k1,
}

/// Curve plus the BIP-44 coin type used to derive keys for a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurveSpec {
    pub curve: Curve,
    pub coin_type: u32,
}

impl CurveSpec {
    /// BIP-44 path for an account's first external key.
    pub fn derivation_path(&self, account_index: u32) -> String {
        format!("m/44'/{}'/{}'/0/0", self.coin_type, account_index)
    }
}

/// Transaction identifier (hash of the signed bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub B256);

impl TxId {
    pub const ZERO: TxId = TxId(B256::ZERO);
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TxId {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<B256>()
            .map(TxId)
            .map_err(|_| ChainError::MalformedResponse(format!("invalid transaction id '{}'", s)))
    }
}

/// Lifecycle of a submitted transaction.
///
/// ```text
/// Processing ──▶ Accepted | Committed   (terminal success)
///            └─▶ Failed                 (terminal failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    Processing,
    Accepted,
    Committed,
    Failed,
}

impl TransactionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TransactionStatus::Accepted | TransactionStatus::Committed)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Processing)
    }
}

/// Errors that can occur while talking to a chain.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// RPC connection or request failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} ms")]
    Timeout(u64),

    /// The node answered with something we could not interpret.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The node refused the transaction.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// The node has never seen this transaction.
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxId),

    /// A transaction was routed to the client of another chain.
    #[error("chain mismatch: client serves {expected}, transaction targets {actual}")]
    ChainMismatch { expected: Chain, actual: Chain },

    /// A transaction without a credential for every input.
    #[error("transaction {0} is missing signatures")]
    IncompleteSignatures(TxId),

    #[error("invalid {chain}-chain address '{address}'")]
    InvalidAddress { chain: Chain, address: String },

    #[error("unknown chain '{0}'")]
    UnknownChain(String),

    /// Encoding failure (e.g. an amount wider than the wire format).
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl ChainError {
    /// Errors worth retrying: the request may succeed if sent again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::Rpc(_) | ChainError::Timeout(_) | ChainError::MalformedResponse(_)
        )
    }
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
