//! Transaction building and signing.
//!
//! # Responsibilities
//! - Build export transactions from an account's spendable inputs
//! - Build import transactions claiming a finalized export
//! - Sign with the curve and derivation the transaction's chain requires
//!
//! # Data Flow
//! ```text
//! TransferRequest ──▶ build_export / build_import ──▶ UnsignedTransaction
//!                                                          │
//!                          KeyProvider (per input owner) ◀─┤ sign
//!                                                          ▼
//!                                               SignedTransaction
//! ```
//!
//! # Design Decisions
//! - Balance is checked before inputs are selected, so an underfunded
//!   account fails without touching the network beyond the balance query
//! - Import feasibility (`exported > fee`) is checked before anything else
//! - Derived public keys go through an injected [`KeyCache`]

use alloy::primitives::Address;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::chain::amount::Amount;
use crate::chain::balance::BalanceProvider;
use crate::chain::codec::{self, TxEncoder};
use crate::chain::fee::{self, FeeError};
use crate::chain::keys::{KeyCache, KeyError, KeyProvider};
use crate::chain::transaction::{
    Credential, ExportProof, InputSource, SignedTransaction, TxInput, TxKind, TxOutput,
    UnsignedTransaction,
};
use crate::chain::types::{Chain, ChainError, CurveSpec, NetworkMode};
use crate::transfer::types::TransferRequest;

/// Errors raised while building or signing.
#[derive(Debug, Clone, Error)]
pub enum SignerError {
    #[error("insufficient balance on {chain}-chain: need {required} nAVAX, have {available} nAVAX")]
    InsufficientBalance {
        chain: Chain,
        required: Amount,
        available: Amount,
    },

    /// Inputs span several accounts and no signer indices were supplied.
    #[error("inputs span accounts {accounts:?}; explicit signer indices are required")]
    AmbiguousSigner { accounts: Vec<u32> },

    #[error("signing error: {0}")]
    Signing(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Fee(#[from] FeeError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Builds and signs atomic transactions for one wallet.
#[derive(Clone)]
pub struct ChainSigner {
    wallet_id: String,
    mode: NetworkMode,
    keys: Arc<dyn KeyProvider>,
    balances: Arc<dyn BalanceProvider>,
    cache: Arc<KeyCache>,
    encoder: Arc<dyn TxEncoder>,
}

impl ChainSigner {
    /// Create a signer.
    ///
    /// # Arguments
    /// * `wallet_id` - Namespace for cached public keys
    /// * `mode` - Network the transactions are built for
    /// * `keys` - Key derivation and signing backend
    /// * `balances` - Spendable value lookups
    /// * `cache` - Public key cache owned by the caller
    pub fn new(
        wallet_id: impl Into<String>,
        mode: NetworkMode,
        keys: Arc<dyn KeyProvider>,
        balances: Arc<dyn BalanceProvider>,
        cache: Arc<KeyCache>,
    ) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            mode,
            keys,
            balances,
            cache,
            encoder: Arc::new(codec::CanonicalEncoder),
        }
    }

    /// Replace the transaction encoder.
    pub fn with_encoder(mut self, encoder: Arc<dyn TxEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    pub fn network_mode(&self) -> NetworkMode {
        self.mode
    }

    pub fn cache(&self) -> &Arc<KeyCache> {
        &self.cache
    }

    /// Address of an account on a chain, derived once and then cached.
    pub async fn address(&self, account_index: u32, chain: Chain) -> Result<Address, SignerError> {
        if let Some(key) = self.cache.get(&self.wallet_id, account_index, chain) {
            return Ok(key.address());
        }
        let key = self
            .keys
            .derive_public_key(account_index, chain, chain.curve_spec().curve)
            .await?;
        let address = key.address();
        self.cache.insert(&self.wallet_id, account_index, chain, key);
        Ok(address)
    }

    /// Build an export on the request's source chain.
    ///
    /// Locks `exported + fee`: `exported` lands in atomic memory owned by the
    /// account's destination-chain address, `fee` is burned. UTXO chains get a
    /// change output (possibly zero, so the size never depends on amounts).
    pub async fn build_export(
        &self,
        request: &TransferRequest,
        exported: Amount,
        fee: Amount,
    ) -> Result<UnsignedTransaction, SignerError> {
        let source = request.source_chain;
        let destination = request.destination_chain;
        let account = request.account_index;

        let required = exported.checked_add(fee).ok_or(FeeError::Overflow)?;
        let available = self.balances.available_balance(account, source).await?;
        if available < required {
            return Err(SignerError::InsufficientBalance {
                chain: source,
                required,
                available,
            });
        }

        let spendable = self.balances.spendable_inputs(account, source).await?;
        let (inputs, selected) = select_inputs(spendable, required);
        if selected < required {
            return Err(SignerError::InsufficientBalance {
                chain: source,
                required,
                available: selected,
            });
        }

        let mut outputs = vec![TxOutput {
            address: self.address(account, destination).await?,
            amount: exported,
        }];
        if source.is_utxo() {
            let change = selected.checked_sub(required).unwrap_or(Amount::ZERO);
            outputs.push(TxOutput {
                address: self.address(account, source).await?,
                amount: change,
            });
        }

        let tx = UnsignedTransaction {
            chain: source,
            network_id: self.mode.network_id(),
            kind: TxKind::Export { destination },
            inputs,
            outputs,
            fee,
            signer_indices: None,
        };

        if source.validates_burn() {
            fee::validate_burned_amount(&tx, fee)?;
        }

        tracing::debug!(
            chain = %source,
            account_index = account,
            inputs = tx.inputs().len(),
            exported = %exported,
            fee = %fee,
            "Built export"
        );
        Ok(tx)
    }

    /// Build an import on the request's destination chain claiming `proof`.
    ///
    /// The claimed value pays `fee`; the rest goes to the request's
    /// destination address. Fails before any signing when the export cannot
    /// cover the fee.
    pub async fn build_import(
        &self,
        request: &TransferRequest,
        proof: &ExportProof,
        fee: Amount,
    ) -> Result<UnsignedTransaction, SignerError> {
        let destination = request.destination_chain;
        let claimable = match proof.amount.checked_sub(fee) {
            Some(claimable) if !claimable.is_zero() => claimable,
            _ => {
                return Err(SignerError::InsufficientBalance {
                    chain: destination,
                    required: fee.checked_add(Amount::from(1)).ok_or(FeeError::Overflow)?,
                    available: proof.amount,
                })
            }
        };

        let recipient = destination.parse_address(&request.destination_address)?;

        Ok(UnsignedTransaction {
            chain: destination,
            network_id: self.mode.network_id(),
            kind: TxKind::Import {
                source: proof.source_chain,
            },
            inputs: vec![TxInput {
                source: InputSource::Utxo {
                    tx_id: proof.tx_id,
                    output_index: proof.output_index,
                },
                owner: proof.owner,
                account_index: request.account_index,
                amount: proof.amount,
            }],
            outputs: vec![TxOutput {
                address: recipient,
                amount: claimable,
            }],
            fee,
            signer_indices: None,
        })
    }

    /// Size of `tx` once signed, credentials included.
    pub fn signed_size(&self, tx: &UnsignedTransaction) -> Result<usize, SignerError> {
        let unsigned = self.encoder.encode(tx)?;
        Ok(fee::signed_size_estimate(unsigned.len(), tx.inputs().len()))
    }

    /// Sign every input of `tx`.
    ///
    /// # Arguments
    /// * `tx` - Transaction to sign, consumed
    /// * `account_index` - Signer when the transaction carries no explicit indices
    /// * `curve_spec` - Must be the curve spec of the transaction's chain
    pub async fn sign(
        &self,
        tx: UnsignedTransaction,
        account_index: u32,
        curve_spec: CurveSpec,
    ) -> Result<SignedTransaction, SignerError> {
        let chain = tx.chain();
        if curve_spec != chain.curve_spec() {
            return Err(SignerError::Signing(format!(
                "curve spec {:?} does not match {}-chain",
                curve_spec, chain
            )));
        }

        let accounts = tx.input_accounts();
        let signers: Vec<u32> = match tx.signer_indices() {
            Some(indices) => indices.to_vec(),
            None if accounts.len() > 1 => {
                return Err(SignerError::AmbiguousSigner { accounts });
            }
            None => vec![account_index],
        };

        // Owner address -> account index able to sign for it.
        let mut owners: HashMap<Address, u32> = HashMap::with_capacity(signers.len());
        for &signer in &signers {
            match self.address(signer, chain).await {
                Ok(address) => {
                    owners.insert(address, signer);
                }
                Err(SignerError::Key(KeyError::UnknownAccount { .. })) => continue,
                Err(e) => return Err(e),
            }
        }

        let bytes = self.encoder.encode(&tx)?;
        let digest = alloy::primitives::keccak256(&bytes);

        let mut signatures = HashMap::with_capacity(owners.len());
        let mut credentials = Vec::with_capacity(tx.inputs().len());
        for (index, input) in tx.inputs().iter().enumerate() {
            let signer = *owners.get(&input.owner).ok_or_else(|| {
                SignerError::Signing(format!(
                    "no derivable key for {}",
                    chain.format_address(input.owner)
                ))
            })?;

            let signature = match signatures.get(&signer) {
                Some(signature) => *signature,
                None => {
                    let signature = self
                        .keys
                        .sign_digest(signer, chain, curve_spec.curve, digest)
                        .await
                        .map_err(|e| SignerError::Signing(e.to_string()))?;
                    let recovered = signature
                        .recover_address_from_prehash(&digest)
                        .map_err(|e| SignerError::Signing(e.to_string()))?;
                    if recovered != input.owner {
                        return Err(SignerError::Signing(format!(
                            "signature does not recover to {}",
                            chain.format_address(input.owner)
                        )));
                    }
                    signatures.insert(signer, signature);
                    signature
                }
            };

            credentials.push(Credential {
                input_index: index as u32,
                signer: input.owner,
                signature,
            });
        }

        let signed = SignedTransaction::new(tx, bytes, credentials);
        if !signed.has_all_signatures() {
            return Err(SignerError::Signing("transaction is not fully signed".to_string()));
        }
        Ok(signed)
    }
}

impl std::fmt::Debug for ChainSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSigner")
            .field("wallet_id", &self.wallet_id)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Pick inputs in order until `required` is covered.
///
/// Account inputs are trimmed to the remaining amount so account chains
/// debit exactly what the transaction moves.
fn select_inputs(spendable: Vec<TxInput>, required: Amount) -> (Vec<TxInput>, Amount) {
    let mut selected = Vec::new();
    let mut total = Amount::ZERO;
    for mut input in spendable {
        if total >= required {
            break;
        }
        if input.amount.is_zero() {
            continue;
        }
        let remaining = required.checked_sub(total).unwrap_or(Amount::ZERO);
        if matches!(input.source, InputSource::Account { .. }) && input.amount > remaining {
            input.amount = remaining;
        }
        total = match total.checked_add(input.amount) {
            Some(total) => total,
            None => break,
        };
        selected.push(input);
    }
    (selected, total)
}
