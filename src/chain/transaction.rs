//! Atomic export/import transactions.
//!
//! An [`UnsignedTransaction`] is an immutable intent created by the
//! [`ChainSigner`](crate::chain::signer::ChainSigner). Signing consumes it and
//! yields a [`SignedTransaction`] carrying the exact bytes that were signed
//! plus one credential per input.

use alloy::primitives::{keccak256, Address, B256};
use alloy::signers::Signature;
use serde::{Deserialize, Serialize};

use crate::chain::amount::Amount;
use crate::chain::codec::CREDENTIAL_BYTES;
use crate::chain::types::{Chain, TxId};

/// Direction of an atomic transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxKind {
    /// Lock value on the issuing chain for import on `destination`.
    Export { destination: Chain },
    /// Claim value previously exported from `source`.
    Import { source: Chain },
}

/// Where an input's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputSource {
    /// An unspent output of an earlier transaction (UTXO chains and atomic memory).
    Utxo { tx_id: TxId, output_index: u32 },
    /// A debit from a nonce-based account (EVM chain).
    Account { nonce: u64 },
}

/// A value consumed by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub source: InputSource,
    /// Address whose key must sign this input.
    pub owner: Address,
    /// Account index that owns `owner`.
    pub account_index: u32,
    pub amount: Amount,
}

/// A value created by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: Address,
    pub amount: Amount,
}

/// Reference to a finalized export output, claimable on the destination chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportProof {
    pub source_chain: Chain,
    pub tx_id: TxId,
    pub output_index: u32,
    /// Address (on the destination chain's key) that owns the exported output.
    pub owner: Address,
    pub amount: Amount,
}

/// Index of the exported output in every export transaction.
pub const EXPORTED_OUTPUT_INDEX: u32 = 0;

/// Transaction intent, ready to be signed exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub(crate) chain: Chain,
    pub(crate) network_id: u32,
    pub(crate) kind: TxKind,
    pub(crate) inputs: Vec<TxInput>,
    pub(crate) outputs: Vec<TxOutput>,
    pub(crate) fee: Amount,
    /// Explicit signer account indices, required when inputs span accounts.
    pub(crate) signer_indices: Option<Vec<u32>>,
}

impl UnsignedTransaction {
    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn network_id(&self) -> u32 {
        self.network_id
    }

    pub fn kind(&self) -> TxKind {
        self.kind
    }

    pub fn inputs(&self) -> &[TxInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TxOutput] {
        &self.outputs
    }

    /// Fee the builder set aside for this transaction.
    pub fn fee(&self) -> Amount {
        self.fee
    }

    pub fn signer_indices(&self) -> Option<&[u32]> {
        self.signer_indices.as_deref()
    }

    /// Attach explicit signer indices (needed when inputs span accounts).
    pub fn with_signer_indices(mut self, indices: Vec<u32>) -> Self {
        self.signer_indices = Some(indices);
        self
    }

    /// The exported (export) or claimed (import) output.
    pub fn primary_output(&self) -> Option<&TxOutput> {
        self.outputs.first()
    }

    pub fn total_input(&self) -> Option<Amount> {
        Amount::checked_sum(self.inputs.iter().map(|i| &i.amount))
    }

    pub fn total_output(&self) -> Option<Amount> {
        Amount::checked_sum(self.outputs.iter().map(|o| &o.amount))
    }

    /// Value destroyed by this transaction: inputs minus outputs.
    pub fn burned(&self) -> Option<Amount> {
        self.total_input()?.checked_sub(self.total_output()?)
    }

    /// Distinct account indices referenced by the inputs, sorted.
    pub fn input_accounts(&self) -> Vec<u32> {
        let mut accounts: Vec<u32> = self.inputs.iter().map(|i| i.account_index).collect();
        accounts.sort_unstable();
        accounts.dedup();
        accounts
    }
}

/// Signature over the transaction digest for one input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub input_index: u32,
    pub signer: Address,
    pub signature: Signature,
}

/// A transaction with credentials, ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    unsigned: UnsignedTransaction,
    /// Encoded unsigned bytes the credentials sign over.
    unsigned_bytes: Vec<u8>,
    credentials: Vec<Credential>,
}

impl SignedTransaction {
    pub(crate) fn new(
        unsigned: UnsignedTransaction,
        unsigned_bytes: Vec<u8>,
        credentials: Vec<Credential>,
    ) -> Self {
        Self {
            unsigned,
            unsigned_bytes,
            credentials,
        }
    }

    pub fn unsigned(&self) -> &UnsignedTransaction {
        &self.unsigned
    }

    pub fn chain(&self) -> Chain {
        self.unsigned.chain
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    /// Digest every credential signs.
    pub fn digest(&self) -> B256 {
        keccak256(&self.unsigned_bytes)
    }

    /// True when every input has exactly one credential from its owner.
    pub fn has_all_signatures(&self) -> bool {
        let inputs = &self.unsigned.inputs;
        if inputs.is_empty() || self.credentials.len() != inputs.len() {
            return false;
        }
        inputs.iter().enumerate().all(|(index, input)| {
            self.credentials
                .iter()
                .any(|c| c.input_index as usize == index && c.signer == input.owner)
        })
    }

    /// Full wire encoding: unsigned bytes followed by the credential section.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.size());
        bytes.extend_from_slice(&self.unsigned_bytes);
        bytes.extend_from_slice(&(self.credentials.len() as u32).to_be_bytes());
        for credential in &self.credentials {
            bytes.extend_from_slice(&credential.input_index.to_be_bytes());
            bytes.extend_from_slice(&credential.signature.as_bytes());
        }
        bytes
    }

    /// Serialized size in bytes, credentials included.
    pub fn size(&self) -> usize {
        self.unsigned_bytes.len() + 4 + self.credentials.len() * CREDENTIAL_BYTES
    }

    /// Identifier the chain assigns: hash of the signed bytes.
    pub fn id(&self) -> TxId {
        TxId(keccak256(self.to_bytes()))
    }
}

impl ExportProof {
    /// Proof for the exported output of a submitted export.
    pub fn for_export(source_chain: Chain, tx_id: TxId, owner: Address, amount: Amount) -> Self {
        Self {
            source_chain,
            tx_id,
            output_index: EXPORTED_OUTPUT_INDEX,
            owner,
            amount,
        }
    }
}
