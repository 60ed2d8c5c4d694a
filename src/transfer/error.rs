//! Transfer error taxonomy.
//!
//! ```text
//! validation   InvalidRequest, InsufficientBalance, InvalidFeeInput, AmbiguousSigner
//! signing      Signing
//! network      Network (retried at the call site when transient)
//! finality     TransferStuck (carries the tx id to verify)
//! control      Cancelled, Suspended, AccountBusy, NotFound
//! ```

use thiserror::Error;
use uuid::Uuid;

use crate::chain::amount::Amount;
use crate::chain::fee::FeeError;
use crate::chain::keys::KeyError;
use crate::chain::signer::SignerError;
use crate::chain::types::{Chain, ChainError, TxId};
use crate::transfer::store::StoreError;
use crate::transfer::types::TransferPhase;

#[derive(Debug, Clone, Error)]
pub enum TransferError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("insufficient balance on {chain}-chain: need {required} nAVAX, have {available} nAVAX")]
    InsufficientBalance {
        chain: Chain,
        required: Amount,
        available: Amount,
    },

    #[error("invalid fee input: {0}")]
    InvalidFeeInput(String),

    #[error("inputs span accounts {accounts:?}; explicit signer indices are required")]
    AmbiguousSigner { accounts: Vec<u32> },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("network error: {0}")]
    Network(#[from] ChainError),

    /// Finality polling ran out; verify `tx_id` on chain and resume.
    #[error("transfer stuck in {phase}: verify transaction {tx_id} and resume")]
    TransferStuck { phase: TransferPhase, tx_id: TxId },

    /// The chain finalized the transaction as failed.
    #[error("transaction {tx_id} failed on {chain}-chain")]
    TransactionFailed { chain: Chain, tx_id: TxId },

    /// Cancelled before anything reached a chain.
    #[error("transfer cancelled before export")]
    Cancelled,

    /// Cancelled after export; automatic progress stopped, state kept.
    #[error("transfer suspended in {phase}; resume to continue")]
    Suspended { phase: TransferPhase },

    #[error("account {0} already has a transfer in flight")]
    AccountBusy(u32),

    #[error("transfer {0} not found")]
    NotFound(Uuid),

    #[error("store error: {0}")]
    Store(String),
}

impl TransferError {
    /// Transient network failures: the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Network(e) if e.is_transient())
    }

    /// Errors raised only once an export reached the source chain.
    pub fn export_submitted(&self) -> bool {
        match self {
            TransferError::TransferStuck { .. } => true,
            TransferError::Suspended { phase } => phase.export_submitted(),
            _ => false,
        }
    }
}

impl From<SignerError> for TransferError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::InsufficientBalance {
                chain,
                required,
                available,
            } => TransferError::InsufficientBalance {
                chain,
                required,
                available,
            },
            SignerError::AmbiguousSigner { accounts } => TransferError::AmbiguousSigner { accounts },
            SignerError::Signing(message) => TransferError::Signing(message),
            SignerError::Key(KeyError::UnknownAccount {
                account_index,
                chain,
            }) => TransferError::InvalidRequest(format!(
                "unknown account {} on {}-chain",
                account_index, chain
            )),
            SignerError::Key(e) => TransferError::Signing(e.to_string()),
            SignerError::Fee(e) => e.into(),
            SignerError::Chain(e) => match e {
                ChainError::InvalidAddress { .. } | ChainError::UnknownChain(_) => {
                    TransferError::InvalidRequest(e.to_string())
                }
                ChainError::Encoding(message) => TransferError::InvalidRequest(message),
                other => TransferError::Network(other),
            },
        }
    }
}

impl From<FeeError> for TransferError {
    fn from(err: FeeError) -> Self {
        TransferError::InvalidFeeInput(err.to_string())
    }
}

impl From<StoreError> for TransferError {
    fn from(err: StoreError) -> Self {
        TransferError::Store(err.to_string())
    }
}
