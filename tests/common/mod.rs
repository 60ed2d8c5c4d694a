//! Shared fixtures for integration tests.

#![allow(dead_code)]

use alloy::primitives::Address;
use std::sync::Arc;
use std::time::Duration;

use xchain_transfer::chain::amount::Amount;
use xchain_transfer::chain::client::ChainClients;
use xchain_transfer::chain::codec::{CanonicalEncoder, TxEncoder, CREDENTIAL_BYTES, CREDENTIAL_HEADER_BYTES};
use xchain_transfer::chain::keyring::LocalKeyring;
use xchain_transfer::chain::keys::KeyCache;
use xchain_transfer::chain::signer::ChainSigner;
use xchain_transfer::chain::simulated::SimulatedNetwork;
use xchain_transfer::chain::transaction::UnsignedTransaction;
use xchain_transfer::chain::types::{Chain, ChainResult, NetworkMode};
use xchain_transfer::transfer::{
    FeePayment, OrchestratorSettings, TransferOrchestrator, TransferRequest, TransferService,
    TransferStore,
};

/// Well-known development key (account 0).
pub const TEST_KEY_0: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Signed size every transaction gets under [`PinnedSizeEncoder`].
pub const PINNED_SIZE: usize = 300;

/// Canonical encoding zero-padded so every signed transaction is exactly
/// [`PINNED_SIZE`] bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PinnedSizeEncoder;

impl TxEncoder for PinnedSizeEncoder {
    fn encode(&self, tx: &UnsignedTransaction) -> ChainResult<Vec<u8>> {
        let mut bytes = CanonicalEncoder.encode(tx)?;
        let credentials = CREDENTIAL_HEADER_BYTES + tx.inputs().len() * CREDENTIAL_BYTES;
        let target = PINNED_SIZE.saturating_sub(credentials);
        if bytes.len() < target {
            bytes.resize(target, 0);
        }
        Ok(bytes)
    }
}

/// A simulated network with account 0 keyed on both chains.
pub struct Harness {
    pub net: Arc<SimulatedNetwork>,
    pub orchestrator: TransferOrchestrator,
    pub service: TransferService,
    /// Account 0's address (same key on both chains).
    pub owner: Address,
}

/// Harness with fast retries; `pinned` fixes every transaction at 300 bytes.
pub fn harness(store: Arc<dyn TransferStore>, pinned: bool) -> Harness {
    harness_on(Arc::new(SimulatedNetwork::new()), store, pinned)
}

/// Same, over an existing network (e.g. to restart a node).
pub fn harness_on(net: Arc<SimulatedNetwork>, store: Arc<dyn TransferStore>, pinned: bool) -> Harness {
    let keyring = LocalKeyring::new();
    let owner = keyring.insert_hex(0, Chain::P, TEST_KEY_0).unwrap();
    keyring.insert_hex(0, Chain::C, TEST_KEY_0).unwrap();
    net.register(0, Chain::P, owner);
    net.register(0, Chain::C, owner);

    let mut signer = ChainSigner::new(
        "integration",
        NetworkMode::Fuji,
        Arc::new(keyring),
        net.clone(),
        Arc::new(KeyCache::new()),
    );
    if pinned {
        signer = signer.with_encoder(Arc::new(PinnedSizeEncoder));
    }

    let clients = ChainClients::new(NetworkMode::Fuji, net.clone(), Duration::from_secs(1));
    let settings = OrchestratorSettings::default().with_time_unit(Duration::from_millis(1));
    let orchestrator = TransferOrchestrator::new(signer, clients, store, settings);
    let service = TransferService::new(orchestrator.clone());

    Harness {
        net,
        orchestrator,
        service,
        owner,
    }
}

/// Recipient used by the tests.
pub fn recipient() -> Address {
    Address::repeat_byte(0x42)
}

pub fn request(
    amount: u64,
    source: Chain,
    destination: Chain,
    fee_payment: FeePayment,
) -> TransferRequest {
    TransferRequest {
        amount: Amount::from(amount),
        source_chain: source,
        destination_chain: destination,
        account_index: 0,
        destination_address: destination.format_address(recipient()),
        fee_payment,
    }
}
