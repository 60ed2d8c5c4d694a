//! Balance lookups for building exports.

use async_trait::async_trait;

use crate::chain::amount::Amount;
use crate::chain::transaction::TxInput;
use crate::chain::types::{Chain, ChainResult};

/// Source of an account's spendable value on a chain.
#[async_trait]
pub trait BalanceProvider: Send + Sync {
    /// Total value the account can spend on `chain` right now.
    async fn available_balance(&self, account_index: u32, chain: Chain) -> ChainResult<Amount>;

    /// The inputs making up that balance: unspent outputs on UTXO chains,
    /// a single nonce-tagged input on account chains.
    async fn spendable_inputs(&self, account_index: u32, chain: Chain)
        -> ChainResult<Vec<TxInput>>;
}
