//! Canonical binary encoding of atomic transactions.
//!
//! # Layout
//! ```text
//! u16 codec version | u32 type id | u32 network id | u8 chain | u8 counterpart
//! u32 input count   | inputs  (u8 kind, 32B id, u64 index/nonce, 20B owner, u64 amount)
//! u32 output count  | outputs (20B address, u64 amount)
//! u64 fee
//! -- signed only --
//! u32 credential count | credentials (u32 input index, 65B signature)
//! ```
//!
//! Every field is fixed width, so the size of a transaction depends only on
//! its input/output counts, never on the amounts it carries. Fees can
//! therefore be computed before the final amounts are known.

use crate::chain::amount::Amount;
use crate::chain::transaction::{InputSource, TxKind, UnsignedTransaction};
use crate::chain::types::{Chain, ChainError, ChainResult};

pub const CODEC_VERSION: u16 = 0;

/// Credential section header (the credential count).
pub const CREDENTIAL_HEADER_BYTES: usize = 4;

/// Recoverable secp256k1 signature.
pub const SECP256K1_SIGNATURE_BYTES: usize = 65;

/// One credential: input index plus signature.
pub const CREDENTIAL_BYTES: usize = 4 + SECP256K1_SIGNATURE_BYTES;

/// Serializes unsigned transactions into the bytes that get signed.
pub trait TxEncoder: Send + Sync {
    fn encode(&self, tx: &UnsignedTransaction) -> ChainResult<Vec<u8>>;
}

/// Exact signed size for an unsigned encoding of `unsigned_len` bytes
/// that will carry `signatures` credentials.
pub fn signed_size(unsigned_len: usize, signatures: usize) -> usize {
    unsigned_len + CREDENTIAL_HEADER_BYTES + signatures * CREDENTIAL_BYTES
}

/// Type identifier of each transaction shape.
fn type_id(chain: Chain, kind: TxKind) -> u32 {
    match (chain, kind) {
        (Chain::P, TxKind::Import { .. }) => 0x11,
        (Chain::P, TxKind::Export { .. }) => 0x12,
        (Chain::C, TxKind::Import { .. }) => 0x00,
        (Chain::C, TxKind::Export { .. }) => 0x01,
    }
}

fn wire_amount(amount: &Amount) -> ChainResult<u64> {
    amount
        .to_u64()
        .ok_or_else(|| ChainError::Encoding(format!("amount {} exceeds 64 bits", amount)))
}

/// The production encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalEncoder;

impl TxEncoder for CanonicalEncoder {
    fn encode(&self, tx: &UnsignedTransaction) -> ChainResult<Vec<u8>> {
        let mut out = Vec::with_capacity(
            12 + 4 + tx.inputs().len() * 69 + 4 + tx.outputs().len() * 28 + 8,
        );

        let counterpart = match tx.kind() {
            TxKind::Export { destination } => destination,
            TxKind::Import { source } => source,
        };

        out.extend_from_slice(&CODEC_VERSION.to_be_bytes());
        out.extend_from_slice(&type_id(tx.chain(), tx.kind()).to_be_bytes());
        out.extend_from_slice(&tx.network_id().to_be_bytes());
        out.push(tx.chain().codec_tag());
        out.push(counterpart.codec_tag());

        out.extend_from_slice(&(tx.inputs().len() as u32).to_be_bytes());
        for input in tx.inputs() {
            match input.source {
                InputSource::Utxo { tx_id, output_index } => {
                    out.push(0x00);
                    out.extend_from_slice(tx_id.0.as_slice());
                    out.extend_from_slice(&u64::from(output_index).to_be_bytes());
                }
                InputSource::Account { nonce } => {
                    out.push(0x01);
                    out.extend_from_slice(&[0u8; 32]);
                    out.extend_from_slice(&nonce.to_be_bytes());
                }
            }
            out.extend_from_slice(input.owner.as_slice());
            out.extend_from_slice(&wire_amount(&input.amount)?.to_be_bytes());
        }

        out.extend_from_slice(&(tx.outputs().len() as u32).to_be_bytes());
        for output in tx.outputs() {
            out.extend_from_slice(output.address.as_slice());
            out.extend_from_slice(&wire_amount(&output.amount)?.to_be_bytes());
        }

        out.extend_from_slice(&wire_amount(&tx.fee())?.to_be_bytes());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::transaction::{TxInput, TxOutput};
    use crate::chain::types::TxId;
    use alloy::primitives::{Address, U256};

    fn tx(inputs: usize, outputs: usize, amount: Amount) -> UnsignedTransaction {
        UnsignedTransaction {
            chain: Chain::P,
            network_id: 1,
            kind: TxKind::Export { destination: Chain::C },
            inputs: (0..inputs)
                .map(|i| TxInput {
                    source: InputSource::Utxo {
                        tx_id: TxId::ZERO,
                        output_index: i as u32,
                    },
                    owner: Address::ZERO,
                    account_index: 0,
                    amount,
                })
                .collect(),
            outputs: (0..outputs)
                .map(|_| TxOutput {
                    address: Address::ZERO,
                    amount,
                })
                .collect(),
            fee: Amount::ZERO,
            signer_indices: None,
        }
    }

    #[test]
    fn test_size_is_independent_of_amounts() {
        let small = CanonicalEncoder.encode(&tx(1, 2, Amount::from(1))).unwrap();
        let large = CanonicalEncoder.encode(&tx(1, 2, Amount::from(u64::MAX))).unwrap();
        assert_eq!(small.len(), large.len());
        assert_eq!(small.len(), 12 + 4 + 69 + 4 + 2 * 28 + 8);
    }

    #[test]
    fn test_size_grows_with_inputs() {
        let one = CanonicalEncoder.encode(&tx(1, 1, Amount::from(5))).unwrap();
        let two = CanonicalEncoder.encode(&tx(2, 1, Amount::from(5))).unwrap();
        assert_eq!(two.len() - one.len(), 69);
    }

    #[test]
    fn test_signed_size_overhead() {
        assert_eq!(signed_size(100, 0), 104);
        assert_eq!(signed_size(100, 2), 104 + 2 * CREDENTIAL_BYTES);
    }

    #[test]
    fn test_oversized_amount_is_rejected() {
        let huge = Amount::from_u256(U256::from(u64::MAX) + U256::from(1u64));
        let result = CanonicalEncoder.encode(&tx(1, 1, huge));
        assert!(matches!(result, Err(ChainError::Encoding(_))));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = CanonicalEncoder.encode(&tx(2, 2, Amount::from(77))).unwrap();
        let b = CanonicalEncoder.encode(&tx(2, 2, Amount::from(77))).unwrap();
        assert_eq!(a, b);
    }
}
