//! Per-chain client with call timeouts and submission guards.
//!
//! # Responsibilities
//! - Submit signed transactions and query their status on one chain
//! - Fetch the chain's current base fee
//! - Bound every network call with its own timeout
//! - Refuse partially signed or mis-routed transactions locally
//!
//! # Design Decisions
//! - Transport lives behind [`ChainConnectivity`] (JSON-RPC in production,
//!   an in-memory ledger in tests)
//! - A timed-out call surfaces as [`ChainError::Timeout`], which callers
//!   count as a failed attempt, never as a terminal error

use alloy::primitives::Address;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::chain::amount::Amount;
use crate::chain::transaction::{ExportProof, SignedTransaction};
use crate::chain::types::{Chain, ChainError, ChainResult, NetworkMode, TransactionStatus, TxId};
use crate::observability::metrics;

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport to the chains.
#[async_trait]
pub trait ChainConnectivity: Send + Sync {
    /// Issue a signed transaction, returning the id the node assigned.
    async fn submit_transaction(&self, tx: &SignedTransaction) -> ChainResult<TxId>;

    async fn query_status(&self, tx_id: &TxId, chain: Chain) -> ChainResult<TransactionStatus>;

    /// Current base fee per byte, in nAVAX.
    async fn base_fee(&self, chain: Chain) -> ChainResult<Amount>;

    /// Exported outputs owned by `owner` waiting to be imported on `chain`.
    async fn pending_imports(&self, chain: Chain, owner: Address) -> ChainResult<Vec<ExportProof>>;
}

/// Connection to one chain on one network.
#[derive(Clone)]
pub struct ChainClient {
    chain: Chain,
    mode: NetworkMode,
    connectivity: Arc<dyn ChainConnectivity>,
    call_timeout: Duration,
}

impl ChainClient {
    pub fn new(chain: Chain, mode: NetworkMode, connectivity: Arc<dyn ChainConnectivity>) -> Self {
        Self {
            chain,
            mode,
            connectivity,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn network_mode(&self) -> NetworkMode {
        self.mode
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    async fn timed<T, F>(&self, fut: F) -> ChainResult<T>
    where
        F: std::future::Future<Output = ChainResult<T>>,
    {
        match timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::Timeout(self.call_timeout.as_millis() as u64)),
        }
    }

    /// Submit a fully signed transaction.
    ///
    /// # Errors
    /// - [`ChainError::ChainMismatch`] when the transaction targets the other chain
    /// - [`ChainError::IncompleteSignatures`] when an input lacks its credential
    pub async fn submit(&self, tx: &SignedTransaction) -> ChainResult<TxId> {
        if tx.chain() != self.chain {
            return Err(ChainError::ChainMismatch {
                expected: self.chain,
                actual: tx.chain(),
            });
        }
        if !tx.has_all_signatures() {
            return Err(ChainError::IncompleteSignatures(tx.id()));
        }

        let result = self.timed(self.connectivity.submit_transaction(tx)).await;
        metrics::record_submit(self.chain, result.is_ok());
        match &result {
            Ok(tx_id) => tracing::info!(chain = %self.chain, tx_id = %tx_id, "Transaction submitted"),
            Err(e) => tracing::warn!(chain = %self.chain, error = %e, "Submission failed"),
        }
        result
    }

    pub async fn status(&self, tx_id: &TxId) -> ChainResult<TransactionStatus> {
        metrics::record_poll(self.chain);
        self.timed(self.connectivity.query_status(tx_id, self.chain)).await
    }

    pub async fn base_fee(&self) -> ChainResult<Amount> {
        self.timed(self.connectivity.base_fee(self.chain)).await
    }

    pub async fn pending_imports(&self, owner: Address) -> ChainResult<Vec<ExportProof>> {
        self.timed(self.connectivity.pending_imports(self.chain, owner)).await
    }
}

impl std::fmt::Debug for ChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainClient")
            .field("chain", &self.chain)
            .field("mode", &self.mode)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

/// One client per supported chain.
#[derive(Debug, Clone)]
pub struct ChainClients {
    p: ChainClient,
    c: ChainClient,
}

impl ChainClients {
    /// Build both clients over a shared transport.
    pub fn new(mode: NetworkMode, connectivity: Arc<dyn ChainConnectivity>, call_timeout: Duration) -> Self {
        Self {
            p: ChainClient::new(Chain::P, mode, connectivity.clone()).with_call_timeout(call_timeout),
            c: ChainClient::new(Chain::C, mode, connectivity).with_call_timeout(call_timeout),
        }
    }

    pub fn from_clients(p: ChainClient, c: ChainClient) -> Self {
        Self { p, c }
    }

    pub fn get(&self, chain: Chain) -> &ChainClient {
        match chain {
            Chain::P => &self.p,
            Chain::C => &self.c,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::transaction::{InputSource, TxInput, TxKind, TxOutput, UnsignedTransaction};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct SlowConnectivity {
        submits: AtomicU32,
        delay: Duration,
    }

    #[async_trait]
    impl ChainConnectivity for SlowConnectivity {
        async fn submit_transaction(&self, tx: &SignedTransaction) -> ChainResult<TxId> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            Ok(tx.id())
        }

        async fn query_status(&self, _tx_id: &TxId, _chain: Chain) -> ChainResult<TransactionStatus> {
            tokio::time::sleep(self.delay).await;
            Ok(TransactionStatus::Processing)
        }

        async fn base_fee(&self, _chain: Chain) -> ChainResult<Amount> {
            Ok(Amount::from(1))
        }

        async fn pending_imports(&self, _chain: Chain, _owner: Address) -> ChainResult<Vec<ExportProof>> {
            Ok(Vec::new())
        }
    }

    fn client(delay: Duration) -> (ChainClient, Arc<SlowConnectivity>) {
        let connectivity = Arc::new(SlowConnectivity {
            submits: AtomicU32::new(0),
            delay,
        });
        let client = ChainClient::new(Chain::P, NetworkMode::Fuji, connectivity.clone())
            .with_call_timeout(Duration::from_millis(20));
        (client, connectivity)
    }

    fn unsigned(chain: Chain) -> UnsignedTransaction {
        UnsignedTransaction {
            chain,
            network_id: 5,
            kind: TxKind::Export {
                destination: chain.counterpart(),
            },
            inputs: vec![TxInput {
                source: InputSource::Account { nonce: 0 },
                owner: Address::repeat_byte(1),
                account_index: 0,
                amount: Amount::from(10),
            }],
            outputs: vec![TxOutput {
                address: Address::repeat_byte(2),
                amount: Amount::from(9),
            }],
            fee: Amount::from(1),
            signer_indices: None,
        }
    }

    #[tokio::test]
    async fn test_partially_signed_never_reaches_transport() {
        let (client, connectivity) = client(Duration::ZERO);
        let tx = SignedTransaction::new(unsigned(Chain::P), vec![1, 2, 3], Vec::new());

        let err = client.submit(&tx).await.unwrap_err();
        assert!(matches!(err, ChainError::IncompleteSignatures(_)));
        assert_eq!(connectivity.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chain_mismatch() {
        let (client, connectivity) = client(Duration::ZERO);
        let tx = SignedTransaction::new(unsigned(Chain::C), vec![1], Vec::new());

        let err = client.submit(&tx).await.unwrap_err();
        assert!(matches!(
            err,
            ChainError::ChainMismatch {
                expected: Chain::P,
                actual: Chain::C
            }
        ));
        assert_eq!(connectivity.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let (client, _) = client(Duration::from_millis(200));
        let err = client.status(&TxId::ZERO).await.unwrap_err();
        assert!(matches!(err, ChainError::Timeout(20)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_clients_dispatch_by_chain() {
        let (_, connectivity) = client(Duration::ZERO);
        let clients = ChainClients::new(NetworkMode::Mainnet, connectivity, Duration::from_secs(1));
        assert_eq!(clients.get(Chain::P).chain(), Chain::P);
        assert_eq!(clients.get(Chain::C).chain(), Chain::C);
        assert_eq!(clients.get(Chain::C).base_fee().await.unwrap(), Amount::from(1));
    }
}
