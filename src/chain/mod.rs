//! Chain access: amounts, transactions, fees, signing and clients.
//!
//! # Data Flow
//! ```text
//! TransferRequest
//!     → signer.rs   (build export/import, sign with the chain's curve spec)
//!     → fee.rs      (fee from signed size and base fee)
//!     → client.rs   (submit, poll status; per-call timeout)
//!     → rpc.rs      (JSON-RPC with failover)  |  simulated.rs (in-memory)
//! ```
//!
//! # Design Decisions
//! - Supported chains are the closed enum [`types::Chain`]; every per-chain
//!   property is an exhaustive match
//! - Amounts are integers in nAVAX, never floats
//! - Keys stay behind [`keys::KeyProvider`]; only public keys are cached

pub mod amount;
pub mod balance;
pub mod client;
pub mod codec;
pub mod fee;
pub mod keyring;
pub mod keys;
pub mod rpc;
pub mod signer;
#[cfg(any(test, feature = "testing"))]
pub mod simulated;
pub mod transaction;
pub mod types;

pub use amount::Amount;
pub use client::{ChainClient, ChainClients, ChainConnectivity};
pub use signer::{ChainSigner, SignerError};
pub use types::{Chain, ChainError, NetworkMode, TransactionStatus, TxId};
