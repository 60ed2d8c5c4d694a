//! In-memory network for local development and tests.
//!
//! Implements both [`ChainConnectivity`] and [`BalanceProvider`] over a
//! single ledger, so a transfer can run end to end without a node:
//!
//! ```text
//! submit(export) ─▶ inputs spent, change credited ─▶ Processing
//!                                                       │ polls
//!                                                       ▼
//!                         finalized ─▶ exported output lands in atomic memory
//! submit(import) ─▶ atomic output consumed, value credited ─▶ Processing ─▶ ...
//! ```
//!
//! Knobs make the network misbehave: transient submission failures, failing
//! status queries, transactions that never finalize or finalize as failed.

use alloy::primitives::{keccak256, Address, B256};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::chain::amount::Amount;
use crate::chain::balance::BalanceProvider;
use crate::chain::client::ChainConnectivity;
use crate::chain::transaction::{ExportProof, InputSource, SignedTransaction, TxInput, TxKind};
use crate::chain::types::{Chain, ChainError, ChainResult, TransactionStatus, TxId};

#[derive(Debug, Clone)]
struct Utxo {
    tx_id: TxId,
    output_index: u32,
    owner: Address,
    amount: Amount,
}

#[derive(Debug, Clone, Default)]
struct Account {
    nonce: u64,
    balance: Amount,
}

#[derive(Debug)]
struct SimTx {
    chain: Chain,
    tx: SignedTransaction,
    polls: u32,
    status: TransactionStatus,
}

#[derive(Debug, Default)]
struct Ledger {
    base_fees: HashMap<Chain, Amount>,
    utxos: Vec<Utxo>,
    accounts: HashMap<Address, Account>,
    owners: HashMap<(u32, Chain), Address>,
    /// Finalized exports waiting for import, by destination chain.
    atomic: HashMap<Chain, Vec<ExportProof>>,
    txs: HashMap<TxId, SimTx>,
    mint_counter: u64,

    finalize_after_polls: u32,
    fail_next_submissions: u32,
    fail_next_status_queries: u32,
    fail_next_listings: u32,
    never_finalize: HashSet<Chain>,
    fail_transactions: HashSet<Chain>,
    submissions: HashMap<Chain, u32>,
    polls: HashMap<Chain, u32>,
}

/// Scriptable in-memory ledger of both chains.
#[derive(Debug)]
pub struct SimulatedNetwork {
    ledger: Mutex<Ledger>,
}

impl Default for SimulatedNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedNetwork {
    /// A network with base fee 1 on both chains that finalizes on the first poll.
    pub fn new() -> Self {
        let ledger = Ledger {
            base_fees: Chain::ALL.iter().map(|c| (*c, Amount::from(1))).collect(),
            finalize_after_polls: 1,
            ..Ledger::default()
        };
        Self {
            ledger: Mutex::new(ledger),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `owner` as the address of `account_index` on `chain`.
    pub fn register(&self, account_index: u32, chain: Chain, owner: Address) {
        self.ledger().owners.insert((account_index, chain), owner);
    }

    /// Credit value to an account: a fresh UTXO on UTXO chains, balance otherwise.
    pub fn fund(&self, chain: Chain, account_index: u32, owner: Address, amount: Amount) {
        let mut ledger = self.ledger();
        ledger.owners.insert((account_index, chain), owner);
        ledger.credit(chain, owner, amount, None);
    }

    /// Place an exported output directly in the atomic memory of `chain`.
    pub fn add_pending_import(&self, chain: Chain, proof: ExportProof) {
        self.ledger().atomic.entry(chain).or_default().push(proof);
    }

    pub fn set_base_fee(&self, chain: Chain, fee: Amount) {
        self.ledger().base_fees.insert(chain, fee);
    }

    /// Polls needed before a transaction reports its final status.
    pub fn set_finalize_after_polls(&self, polls: u32) {
        self.ledger().finalize_after_polls = polls.max(1);
    }

    /// Fail the next `count` submissions with a transient RPC error.
    pub fn fail_next_submissions(&self, count: u32) {
        self.ledger().fail_next_submissions = count;
    }

    /// Fail the next `count` status queries with a transient RPC error.
    pub fn fail_next_status_queries(&self, count: u32) {
        self.ledger().fail_next_status_queries = count;
    }

    /// Fail the next `count` pending-import listings with a transient RPC error.
    pub fn fail_next_listings(&self, count: u32) {
        self.ledger().fail_next_listings = count;
    }

    /// Keep every transaction on `chain` in `Processing`.
    pub fn set_never_finalize(&self, chain: Chain, never: bool) {
        let mut ledger = self.ledger();
        if never {
            ledger.never_finalize.insert(chain);
        } else {
            ledger.never_finalize.remove(&chain);
        }
    }

    /// Finalize transactions on `chain` as `Failed`.
    pub fn set_fail_transactions(&self, chain: Chain, fail: bool) {
        let mut ledger = self.ledger();
        if fail {
            ledger.fail_transactions.insert(chain);
        } else {
            ledger.fail_transactions.remove(&chain);
        }
    }

    /// Accepted submissions on `chain`, including duplicates.
    pub fn submissions(&self, chain: Chain) -> u32 {
        self.ledger().submissions.get(&chain).copied().unwrap_or(0)
    }

    pub fn polls(&self, chain: Chain) -> u32 {
        self.ledger().polls.get(&chain).copied().unwrap_or(0)
    }

    /// Spendable value of `owner` on `chain`.
    pub fn balance(&self, chain: Chain, owner: Address) -> Amount {
        self.ledger().balance_of(chain, owner)
    }

    /// Exported outputs waiting for import on `chain`.
    pub fn pending(&self, chain: Chain) -> Vec<ExportProof> {
        self.ledger().atomic.get(&chain).cloned().unwrap_or_default()
    }

    /// The transaction submitted under `tx_id`, if any.
    pub fn transaction(&self, tx_id: &TxId) -> Option<SignedTransaction> {
        self.ledger().txs.get(tx_id).map(|t| t.tx.clone())
    }
}

impl Ledger {
    fn balance_of(&self, chain: Chain, owner: Address) -> Amount {
        if chain.is_utxo() {
            let owned = self.utxos.iter().filter(|u| u.owner == owner).map(|u| &u.amount);
            Amount::checked_sum(owned).unwrap_or(Amount::ZERO)
        } else {
            self.accounts.get(&owner).map(|a| a.balance).unwrap_or_default()
        }
    }

    fn credit(&mut self, chain: Chain, owner: Address, amount: Amount, origin: Option<(TxId, u32)>) {
        if chain.is_utxo() {
            let (tx_id, output_index) = origin.unwrap_or_else(|| {
                self.mint_counter += 1;
                (TxId(keccak256(self.mint_counter.to_be_bytes())), 0)
            });
            self.utxos.push(Utxo {
                tx_id,
                output_index,
                owner,
                amount,
            });
        } else {
            let account = self.accounts.entry(owner).or_default();
            account.balance = account.balance.checked_add(amount).unwrap_or(account.balance);
        }
    }

    /// Check credentials, spend inputs and credit outputs.
    fn apply(&mut self, tx_id: TxId, tx: &SignedTransaction) -> ChainResult<()> {
        let unsigned = tx.unsigned();
        let chain = unsigned.chain();

        if !tx.has_all_signatures() {
            return Err(ChainError::Rejected("missing credentials".to_string()));
        }
        let digest: B256 = tx.digest();
        for credential in tx.credentials() {
            let recovered = credential
                .signature
                .recover_address_from_prehash(&digest)
                .map_err(|e| ChainError::Rejected(format!("bad signature: {}", e)))?;
            if recovered != credential.signer {
                return Err(ChainError::Rejected("signature does not match owner".to_string()));
            }
        }

        for input in unsigned.inputs() {
            self.check_spendable(chain, unsigned.kind(), input)?;
        }
        for input in unsigned.inputs() {
            self.spend(chain, unsigned.kind(), input);
        }

        match unsigned.kind() {
            TxKind::Export { .. } => {
                // outputs[0] waits in atomic memory until finality
                for (index, output) in unsigned.outputs().iter().enumerate().skip(1) {
                    self.credit(chain, output.address, output.amount, Some((tx_id, index as u32)));
                }
            }
            TxKind::Import { .. } => {
                for (index, output) in unsigned.outputs().iter().enumerate() {
                    self.credit(chain, output.address, output.amount, Some((tx_id, index as u32)));
                }
            }
        }
        Ok(())
    }

    fn check_spendable(&self, chain: Chain, kind: TxKind, input: &TxInput) -> ChainResult<()> {
        let ok = match (kind, input.source) {
            (TxKind::Import { .. }, InputSource::Utxo { tx_id, output_index }) => self
                .atomic
                .get(&chain)
                .map(|pending| {
                    pending
                        .iter()
                        .any(|p| p.tx_id == tx_id && p.output_index == output_index && p.amount == input.amount)
                })
                .unwrap_or(false),
            (TxKind::Export { .. }, InputSource::Utxo { tx_id, output_index }) => {
                self.utxos.iter().any(|u| {
                    u.tx_id == tx_id
                        && u.output_index == output_index
                        && u.owner == input.owner
                        && u.amount == input.amount
                })
            }
            (TxKind::Export { .. }, InputSource::Account { nonce }) => self
                .accounts
                .get(&input.owner)
                .map(|a| a.nonce == nonce && a.balance >= input.amount)
                .unwrap_or(false),
            (TxKind::Import { .. }, InputSource::Account { .. }) => false,
        };
        if ok {
            Ok(())
        } else {
            Err(ChainError::Rejected(format!(
                "input of {} is not spendable on {}-chain",
                chain.format_address(input.owner),
                chain
            )))
        }
    }

    fn spend(&mut self, chain: Chain, kind: TxKind, input: &TxInput) {
        match (kind, input.source) {
            (TxKind::Import { .. }, InputSource::Utxo { tx_id, output_index }) => {
                if let Some(pending) = self.atomic.get_mut(&chain) {
                    pending.retain(|p| !(p.tx_id == tx_id && p.output_index == output_index));
                }
            }
            (TxKind::Export { .. }, InputSource::Utxo { tx_id, output_index }) => {
                self.utxos
                    .retain(|u| !(u.tx_id == tx_id && u.output_index == output_index));
            }
            (_, InputSource::Account { .. }) => {
                if let Some(account) = self.accounts.get_mut(&input.owner) {
                    account.nonce += 1;
                    account.balance = account.balance.checked_sub(input.amount).unwrap_or(Amount::ZERO);
                }
            }
        }
    }
}

#[async_trait]
impl ChainConnectivity for SimulatedNetwork {
    async fn submit_transaction(&self, tx: &SignedTransaction) -> ChainResult<TxId> {
        let mut ledger = self.ledger();
        if ledger.fail_next_submissions > 0 {
            ledger.fail_next_submissions -= 1;
            return Err(ChainError::Rpc("simulated connection reset".to_string()));
        }

        let chain = tx.chain();
        let tx_id = tx.id();
        *ledger.submissions.entry(chain).or_default() += 1;

        // Re-issuing a known transaction is a no-op.
        if ledger.txs.contains_key(&tx_id) {
            return Ok(tx_id);
        }

        ledger.apply(tx_id, tx)?;
        ledger.txs.insert(
            tx_id,
            SimTx {
                chain,
                tx: tx.clone(),
                polls: 0,
                status: TransactionStatus::Processing,
            },
        );
        Ok(tx_id)
    }

    async fn query_status(&self, tx_id: &TxId, chain: Chain) -> ChainResult<TransactionStatus> {
        let mut ledger = self.ledger();
        *ledger.polls.entry(chain).or_default() += 1;
        if ledger.fail_next_status_queries > 0 {
            ledger.fail_next_status_queries -= 1;
            return Err(ChainError::Rpc("simulated status outage".to_string()));
        }

        let finalize_after = ledger.finalize_after_polls;
        let never = ledger.never_finalize.contains(&chain);
        let fail = ledger.fail_transactions.contains(&chain);

        let (status, proof) = {
            let sim = match ledger.txs.get_mut(tx_id) {
                Some(sim) if sim.chain == chain => sim,
                _ => return Err(ChainError::UnknownTransaction(*tx_id)),
            };
            if sim.status.is_terminal() || never {
                return Ok(sim.status);
            }
            sim.polls += 1;
            if sim.polls < finalize_after {
                return Ok(TransactionStatus::Processing);
            }
            if fail {
                sim.status = TransactionStatus::Failed;
                (sim.status, None)
            } else {
                sim.status = chain.finalized_status();
                let unsigned = sim.tx.unsigned();
                let proof = match (unsigned.kind(), unsigned.primary_output()) {
                    (TxKind::Export { destination }, Some(output)) => Some((
                        destination,
                        ExportProof::for_export(chain, *tx_id, output.address, output.amount),
                    )),
                    _ => None,
                };
                (sim.status, proof)
            }
        };

        if let Some((destination, proof)) = proof {
            ledger.atomic.entry(destination).or_default().push(proof);
        }
        Ok(status)
    }

    async fn base_fee(&self, chain: Chain) -> ChainResult<Amount> {
        Ok(self.ledger().base_fees.get(&chain).copied().unwrap_or_default())
    }

    async fn pending_imports(&self, chain: Chain, owner: Address) -> ChainResult<Vec<ExportProof>> {
        let mut ledger = self.ledger();
        if ledger.fail_next_listings > 0 {
            ledger.fail_next_listings -= 1;
            return Err(ChainError::Rpc("simulated indexer outage".to_string()));
        }
        Ok(ledger
            .atomic
            .get(&chain)
            .map(|pending| pending.iter().filter(|p| p.owner == owner).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl BalanceProvider for SimulatedNetwork {
    async fn available_balance(&self, account_index: u32, chain: Chain) -> ChainResult<Amount> {
        let ledger = self.ledger();
        Ok(ledger
            .owners
            .get(&(account_index, chain))
            .map(|owner| ledger.balance_of(chain, *owner))
            .unwrap_or_default())
    }

    async fn spendable_inputs(&self, account_index: u32, chain: Chain) -> ChainResult<Vec<TxInput>> {
        let ledger = self.ledger();
        let owner = match ledger.owners.get(&(account_index, chain)) {
            Some(owner) => *owner,
            None => return Ok(Vec::new()),
        };
        if chain.is_utxo() {
            Ok(ledger
                .utxos
                .iter()
                .filter(|u| u.owner == owner)
                .map(|u| TxInput {
                    source: InputSource::Utxo {
                        tx_id: u.tx_id,
                        output_index: u.output_index,
                    },
                    owner,
                    account_index,
                    amount: u.amount,
                })
                .collect())
        } else {
            let account = ledger.accounts.get(&owner).cloned().unwrap_or_default();
            Ok(vec![TxInput {
                source: InputSource::Account {
                    nonce: account.nonce,
                },
                owner,
                account_index,
                amount: account.balance,
            }])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_funding_and_balances() {
        let net = SimulatedNetwork::new();
        let owner = Address::repeat_byte(1);
        net.fund(Chain::P, 0, owner, Amount::from(500));
        net.fund(Chain::P, 0, owner, Amount::from(700));
        net.fund(Chain::C, 0, owner, Amount::from(42));

        assert_eq!(net.available_balance(0, Chain::P).await.unwrap(), Amount::from(1_200));
        assert_eq!(net.spendable_inputs(0, Chain::P).await.unwrap().len(), 2);
        assert_eq!(net.available_balance(0, Chain::C).await.unwrap(), Amount::from(42));
        assert!(net.available_balance(3, Chain::C).await.unwrap().is_zero());
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let net = SimulatedNetwork::new();
        let err = net.query_status(&TxId::ZERO, Chain::P).await.unwrap_err();
        assert!(matches!(err, ChainError::UnknownTransaction(_)));
        assert_eq!(net.polls(Chain::P), 1);
    }

    #[tokio::test]
    async fn test_knobs() {
        let net = SimulatedNetwork::new();
        net.set_base_fee(Chain::C, Amount::from(25));
        assert_eq!(net.base_fee(Chain::C).await.unwrap(), Amount::from(25));

        net.fail_next_status_queries(1);
        assert!(net.query_status(&TxId::ZERO, Chain::C).await.unwrap_err().is_transient());
        assert!(matches!(
            net.query_status(&TxId::ZERO, Chain::C).await,
            Err(ChainError::UnknownTransaction(_))
        ));
    }
}
