//! Network fee computation.
//!
//! # Responsibilities
//! - Minimum fee from serialized (signed) size and the chain's per-byte base fee
//! - Per-chain flat fee floors
//! - Burned-amount sanity check before signing EVM-chain exports
//!
//! # Design Decisions
//! - Pure functions, integer arithmetic only
//! - Fees are always computed on the signed size; the credential section is
//!   added with [`signed_size_estimate`] before signing. The codec is fixed
//!   width, so the estimate equals the size of the signed transaction.

use thiserror::Error;

use crate::chain::amount::Amount;
use crate::chain::codec;
use crate::chain::transaction::UnsignedTransaction;
use crate::chain::types::Chain;

/// Tolerated excess burn over the expected fee, in percent.
pub const BURN_TOLERANCE_PERCENT: u32 = 50;

/// Fee computation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeeError {
    #[error("invalid fee input: {0}")]
    InvalidFeeInput(String),

    #[error("fee computation overflowed")]
    Overflow,

    #[error("excessive burn: expected at most {allowed} nAVAX, transaction burns {burned} nAVAX")]
    ExcessiveBurn { allowed: Amount, burned: Amount },
}

/// Minimum fee for a transaction of `serialized_size_bytes` signed bytes.
///
/// Returns `base_fee_per_byte * serialized_size_bytes`, raised to the chain's
/// floor when below it.
pub fn compute_fee(
    base_fee_per_byte: Amount,
    serialized_size_bytes: usize,
    chain: Chain,
) -> Result<Amount, FeeError> {
    if serialized_size_bytes == 0 {
        return Err(FeeError::InvalidFeeInput(
            "serialized size must be positive".to_string(),
        ));
    }

    let fee = base_fee_per_byte
        .checked_mul_u64(serialized_size_bytes as u64)
        .ok_or(FeeError::Overflow)?;

    Ok(fee.max(chain_specific_floor(chain)))
}

/// Flat minimum fee of a chain.
pub fn chain_specific_floor(chain: Chain) -> Amount {
    chain.fee_floor()
}

/// Signed size of a transaction whose unsigned encoding is `unsigned_len`
/// bytes and that needs `signatures` credentials.
///
/// Each credential adds [`codec::CREDENTIAL_BYTES`] (input index plus a
/// 65-byte recoverable secp256k1 signature) on top of a
/// [`codec::CREDENTIAL_HEADER_BYTES`] count prefix.
pub fn signed_size_estimate(unsigned_len: usize, signatures: usize) -> usize {
    codec::signed_size(unsigned_len, signatures)
}

/// Apply the configured multiplier (in percent) to a freshly queried base fee.
pub fn adjust_base_fee(base_fee: Amount, multiplier_percent: u32) -> Result<Amount, FeeError> {
    if multiplier_percent == 0 {
        return Err(FeeError::InvalidFeeInput(
            "base fee multiplier must be positive".to_string(),
        ));
    }
    base_fee
        .mul_percent_ceil(multiplier_percent)
        .ok_or(FeeError::Overflow)
}

/// Reject transactions that would burn far more than the expected fee.
pub fn validate_burned_amount(
    tx: &UnsignedTransaction,
    expected_fee: Amount,
) -> Result<(), FeeError> {
    let burned = tx.burned().ok_or(FeeError::Overflow)?;
    let allowed = expected_fee
        .mul_percent_ceil(100 + BURN_TOLERANCE_PERCENT)
        .ok_or(FeeError::Overflow)?;

    if burned > allowed {
        tracing::error!(
            chain = %tx.chain(),
            burned = %burned,
            allowed = %allowed,
            "Excessive burn amount"
        );
        return Err(FeeError::ExcessiveBurn { allowed, burned });
    }
    Ok(())
}
