//! JSON-RPC transport with failover.
//!
//! # Responsibilities
//! - Issue atomic transactions and query their status on both chains
//! - Read the staking chain's fee state and the EVM chain's gas price
//! - List UTXOs (spendable and pending-import) for an address
//! - Fail over across configured nodes on transport errors
//!
//! # Endpoints
//! ```text
//! <node>/ext/bc/P        platform.issueTx, platform.getTxStatus,
//!                        platform.getUTXOs, platform.getFeeState
//! <node>/ext/bc/C/avax   avax.issueTx, avax.getAtomicTxStatus, avax.getUTXOs
//! <node>/ext/bc/C/rpc    eth_gasPrice, eth_getBalance, eth_getTransactionCount
//! ```
//!
//! # Design Decisions
//! - A node that answers with a JSON-RPC error is authoritative (no failover)
//! - Only transport failures and timeouts move on to the next node

use alloy::primitives::hex;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::chain::amount::Amount;
use crate::chain::balance::BalanceProvider;
use crate::chain::client::ChainConnectivity;
use crate::chain::transaction::{ExportProof, InputSource, SignedTransaction, TxInput};
use crate::chain::types::{Chain, ChainError, ChainResult, TransactionStatus, TxId};
use crate::config::schema::{ChainEndpointConfig, ChainsConfig};

/// Encoded UTXO: 32B tx id, u32 output index, 20B owner, u64 amount.
pub const UTXO_BYTES: usize = 32 + 4 + 20 + 8;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct IssueTxResult {
    #[serde(rename = "txID")]
    tx_id: String,
}

#[derive(Debug, Deserialize)]
struct TxStatusResult {
    status: String,
}

#[derive(Debug, Deserialize)]
struct UtxosResult {
    utxos: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FeeStateResult {
    price: String,
}

/// A UTXO as returned by `getUTXOs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawUtxo {
    pub tx_id: TxId,
    pub output_index: u32,
    pub owner: Address,
    pub amount: Amount,
}

/// Decode one hex-encoded UTXO.
pub fn decode_utxo(encoded: &str) -> ChainResult<RawUtxo> {
    let bytes = hex::decode(encoded.trim_start_matches("0x"))
        .map_err(|e| ChainError::MalformedResponse(format!("UTXO is not hex: {}", e)))?;
    if bytes.len() != UTXO_BYTES {
        return Err(ChainError::MalformedResponse(format!(
            "UTXO has {} bytes, expected {}",
            bytes.len(),
            UTXO_BYTES
        )));
    }

    let mut index = [0u8; 4];
    index.copy_from_slice(&bytes[32..36]);
    let mut amount = [0u8; 8];
    amount.copy_from_slice(&bytes[56..64]);

    Ok(RawUtxo {
        tx_id: TxId(B256::from_slice(&bytes[..32])),
        output_index: u32::from_be_bytes(index),
        owner: Address::from_slice(&bytes[36..56]),
        amount: Amount::from(u64::from_be_bytes(amount)),
    })
}

/// Map a node's status string onto [`TransactionStatus`].
pub fn parse_status(chain: Chain, tx_id: &TxId, status: &str) -> ChainResult<TransactionStatus> {
    match (chain, status) {
        (_, "Processing") => Ok(TransactionStatus::Processing),
        (Chain::P, "Committed") => Ok(TransactionStatus::Committed),
        (Chain::C, "Accepted") => Ok(TransactionStatus::Accepted),
        (_, "Dropped" | "Aborted" | "Rejected") => Ok(TransactionStatus::Failed),
        (_, "Unknown") => Err(ChainError::UnknownTransaction(*tx_id)),
        (_, other) => Err(ChainError::MalformedResponse(format!(
            "unexpected {}-chain status '{}'",
            chain, other
        ))),
    }
}

/// Endpoints of one chain.
#[derive(Debug, Clone)]
struct ChainEndpoints {
    /// Atomic-transaction JSON-RPC URLs (primary first).
    atomic: Vec<url::Url>,
    static_base_fee: Option<Amount>,
    call_timeout: Duration,
}

impl ChainEndpoints {
    fn from_config(chain: Chain, config: &ChainEndpointConfig) -> ChainResult<Self> {
        let path = match chain {
            Chain::P => "ext/bc/P",
            Chain::C => "ext/bc/C/avax",
        };
        let mut atomic = vec![join(&config.rpc_url, path)?];
        for url in &config.failover_urls {
            match join(url, path) {
                Ok(url) => atomic.push(url),
                Err(_) => tracing::warn!(url = %url, "Ignoring invalid failover RPC URL"),
            }
        }
        Ok(Self {
            atomic,
            static_base_fee: config.static_base_fee.map(Amount::from),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        })
    }
}

fn join(base: &str, path: &str) -> ChainResult<url::Url> {
    let base = format!("{}/", base.trim_end_matches('/'));
    base.parse::<url::Url>()
        .and_then(|url| url.join(path))
        .map_err(|e| ChainError::Rpc(format!("Invalid RPC URL '{}': {}", base, e)))
}

/// Production [`ChainConnectivity`] over the node's JSON-RPC APIs.
#[derive(Clone)]
pub struct JsonRpcConnectivity {
    http: reqwest::Client,
    p: ChainEndpoints,
    c: ChainEndpoints,
    /// EVM providers for the C-chain (primary + failovers).
    evm: Vec<Arc<dyn Provider + Send + Sync>>,
}

impl JsonRpcConnectivity {
    /// Create the transport.
    ///
    /// # Arguments
    /// * `config` - Endpoint configuration of both chains
    pub fn new(config: &ChainsConfig) -> ChainResult<Self> {
        let p = ChainEndpoints::from_config(Chain::P, &config.p)?;
        let c = ChainEndpoints::from_config(Chain::C, &config.c)?;

        let mut evm = Vec::new();
        for base in std::iter::once(&config.c.rpc_url).chain(config.c.failover_urls.iter()) {
            match join(base, "ext/bc/C/rpc") {
                Ok(url) => evm.push(
                    Arc::new(ProviderBuilder::new().connect_http(url)) as Arc<dyn Provider + Send + Sync>
                ),
                Err(_) => tracing::warn!(url = %base, "Ignoring invalid EVM RPC URL"),
            }
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ChainError::Rpc(format!("HTTP client: {}", e)))?;

        tracing::info!(
            p_endpoints = p.atomic.len(),
            c_endpoints = c.atomic.len(),
            "JSON-RPC connectivity initialized"
        );

        Ok(Self { http, p, c, evm })
    }

    fn endpoints(&self, chain: Chain) -> &ChainEndpoints {
        match chain {
            Chain::P => &self.p,
            Chain::C => &self.c,
        }
    }

    /// Call `method` on the chain's atomic API, failing over across nodes.
    async fn call<T: DeserializeOwned>(&self, chain: Chain, method: &str, params: Value) -> ChainResult<T> {
        let endpoints = self.endpoints(chain);
        let method = format!("{}.{}", chain.rpc_namespace(), method);
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        for (i, url) in endpoints.atomic.iter().enumerate() {
            let fut = async {
                self.http
                    .post(url.clone())
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<RpcResponse<T>>()
                    .await
            };
            match timeout(endpoints.call_timeout, fut).await {
                Ok(Ok(response)) => {
                    if let Some(error) = response.error {
                        return Err(ChainError::Rejected(format!(
                            "{} ({}): {}",
                            method, error.code, error.message
                        )));
                    }
                    return response.result.ok_or_else(|| {
                        ChainError::MalformedResponse(format!("{} returned no result", method))
                    });
                }
                Ok(Err(e)) if e.is_decode() => {
                    return Err(ChainError::MalformedResponse(format!("{}: {}", method, e)));
                }
                Ok(Err(e)) => tracing::warn!(provider_idx = i, method = %method, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, method = %method, "RPC timeout"),
            }
        }
        Err(ChainError::Rpc(format!("All RPC providers failed for {}", method)))
    }

    async fn get_utxos(&self, chain: Chain, owner: Address, source: Option<Chain>) -> ChainResult<Vec<RawUtxo>> {
        let mut params = json!({
            "addresses": [chain.format_address(owner)],
            "encoding": "hex",
        });
        if let Some(source) = source {
            params["sourceChain"] = Value::String(source.as_str().to_string());
        }
        let result: UtxosResult = self.call(chain, "getUTXOs", params).await?;
        result.utxos.iter().map(|u| decode_utxo(u)).collect()
    }

    /// Gas price of the EVM chain in wei.
    async fn gas_price(&self) -> ChainResult<u128> {
        for (i, provider) in self.evm.iter().enumerate() {
            match timeout(self.c.call_timeout, provider.get_gas_price()).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(ChainError::Rpc("All providers failed to get gas price".to_string()))
    }

    /// Balance of an EVM account in wei.
    async fn evm_balance(&self, address: Address) -> ChainResult<U256> {
        for (i, provider) in self.evm.iter().enumerate() {
            match timeout(self.c.call_timeout, provider.get_balance(address)).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(ChainError::Rpc("All providers failed to get balance".to_string()))
    }

    async fn evm_nonce(&self, address: Address) -> ChainResult<u64> {
        for (i, provider) in self.evm.iter().enumerate() {
            match timeout(self.c.call_timeout, provider.get_transaction_count(address)).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(ChainError::Rpc("All providers failed to get transaction count".to_string()))
    }
}

impl std::fmt::Debug for JsonRpcConnectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcConnectivity")
            .field("p", &self.p.atomic)
            .field("c", &self.c.atomic)
            .field("evm_providers", &self.evm.len())
            .finish()
    }
}

#[async_trait]
impl ChainConnectivity for JsonRpcConnectivity {
    async fn submit_transaction(&self, tx: &SignedTransaction) -> ChainResult<TxId> {
        let params = json!({
            "tx": format!("0x{}", hex::encode(tx.to_bytes())),
            "encoding": "hex",
        });
        let result: IssueTxResult = self.call(tx.chain(), "issueTx", params).await?;
        result.tx_id.parse()
    }

    async fn query_status(&self, tx_id: &TxId, chain: Chain) -> ChainResult<TransactionStatus> {
        let method = match chain {
            Chain::P => "getTxStatus",
            Chain::C => "getAtomicTxStatus",
        };
        let result: TxStatusResult = self
            .call(chain, method, json!({ "txID": tx_id.to_string() }))
            .await?;
        parse_status(chain, tx_id, &result.status)
    }

    async fn base_fee(&self, chain: Chain) -> ChainResult<Amount> {
        if let Some(fee) = self.endpoints(chain).static_base_fee {
            return Ok(fee);
        }
        match chain {
            Chain::P => {
                let state: FeeStateResult = self.call(chain, "getFeeState", json!({})).await?;
                state.price.parse::<Amount>().map_err(|e| {
                    ChainError::MalformedResponse(format!("fee price '{}': {}", state.price, e))
                })
            }
            Chain::C => Ok(Amount::from_wei_ceil(U256::from(self.gas_price().await?))),
        }
    }

    async fn pending_imports(&self, chain: Chain, owner: Address) -> ChainResult<Vec<ExportProof>> {
        let source = chain.counterpart();
        let utxos = self.get_utxos(chain, owner, Some(source)).await?;
        Ok(utxos
            .into_iter()
            .filter(|u| u.owner == owner)
            .map(|u| ExportProof {
                source_chain: source,
                tx_id: u.tx_id,
                output_index: u.output_index,
                owner: u.owner,
                amount: u.amount,
            })
            .collect())
    }
}

/// [`BalanceProvider`] reading balances from the nodes.
///
/// Addresses are registered per account at startup; the provider never
/// touches keys.
#[derive(Debug)]
pub struct RpcBalanceProvider {
    rpc: Arc<JsonRpcConnectivity>,
    addresses: DashMap<(u32, Chain), Address>,
}

impl RpcBalanceProvider {
    pub fn new(rpc: Arc<JsonRpcConnectivity>) -> Self {
        Self {
            rpc,
            addresses: DashMap::new(),
        }
    }

    pub fn register(&self, account_index: u32, chain: Chain, address: Address) {
        self.addresses.insert((account_index, chain), address);
    }

    fn address(&self, account_index: u32, chain: Chain) -> ChainResult<Address> {
        self.addresses
            .get(&(account_index, chain))
            .map(|r| *r.value())
            .ok_or_else(|| {
                ChainError::InvalidAddress {
                    chain,
                    address: format!("account {} is not registered", account_index),
                }
            })
    }
}

#[async_trait]
impl BalanceProvider for RpcBalanceProvider {
    async fn available_balance(&self, account_index: u32, chain: Chain) -> ChainResult<Amount> {
        let inputs = self.spendable_inputs(account_index, chain).await?;
        Amount::checked_sum(inputs.iter().map(|i| &i.amount))
            .ok_or_else(|| ChainError::MalformedResponse("balance overflow".to_string()))
    }

    async fn spendable_inputs(&self, account_index: u32, chain: Chain) -> ChainResult<Vec<TxInput>> {
        let owner = self.address(account_index, chain)?;
        match chain {
            Chain::P => {
                let utxos = self.rpc.get_utxos(chain, owner, None).await?;
                Ok(utxos
                    .into_iter()
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
            }
            Chain::C => {
                let balance = Amount::from_wei_floor(self.rpc.evm_balance(owner).await?);
                let nonce = self.rpc.evm_nonce(owner).await?;
                Ok(vec![TxInput {
                    source: InputSource::Account { nonce },
                    owner,
                    account_index,
                    amount: balance,
                }])
            }
        }
    }
}
