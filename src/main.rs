//! Transfer node.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                    TRANSFER NODE                      │
//!   HTTP client   │  ┌─────────┐    ┌──────────────┐    ┌──────────────┐  │
//!   ──────────────┼─▶│   api   │───▶│   transfer   │───▶│ orchestrator │  │
//!                 │  │ (axum)  │    │   service    │    │ state machine│  │
//!                 │  └─────────┘    └──────┬───────┘    └──────┬───────┘  │
//!                 │                        │ persist           │          │
//!                 │                        ▼                   ▼          │
//!                 │                 ┌─────────────┐    ┌──────────────┐   │   P-chain
//!                 │                 │ JSON store  │    │ chain signer │   │   C-chain
//!                 │                 └─────────────┘    │ + clients    │───┼──▶ JSON-RPC
//!                 │                                    └──────────────┘   │
//!                 │  config · observability · resilience · lifecycle      │
//!                 └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use xchain_transfer::api::{self, AppState};
use xchain_transfer::chain::client::{ChainClient, ChainClients};
use xchain_transfer::chain::keyring::LocalKeyring;
use xchain_transfer::chain::keys::{KeyCache, KeyProvider};
use xchain_transfer::chain::rpc::{JsonRpcConnectivity, RpcBalanceProvider};
use xchain_transfer::chain::signer::ChainSigner;
use xchain_transfer::chain::types::Chain;
use xchain_transfer::config::loader::load_config;
use xchain_transfer::lifecycle::{signals, Shutdown};
use xchain_transfer::observability::{logging, metrics};
use xchain_transfer::transfer::{
    JsonFileStore, OrchestratorSettings, TransferOrchestrator, TransferService,
};
use xchain_transfer::TransferNodeConfig;

#[derive(Parser, Debug)]
#[command(name = "transfer-node", version, about = "Cross-chain transfer node")]
struct Args {
    /// Path to the TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => TransferNodeConfig::default(),
    };

    logging::init_tracing(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        network = %config.service.network,
        wallet_id = %config.service.wallet_id,
        "transfer-node starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mode = config.service.network;
    let rpc = Arc::new(JsonRpcConnectivity::new(&config.chains)?);

    // Keys come from the environment only, never from the config file.
    let keyring = Arc::new(LocalKeyring::from_env(&config.service.accounts)?);
    let balances = RpcBalanceProvider::new(rpc.clone());
    for &account in &config.service.accounts {
        for chain in Chain::ALL {
            match keyring
                .derive_public_key(account, chain, chain.curve_spec().curve)
                .await
            {
                Ok(key) => balances.register(account, chain, key.address()),
                Err(e) => tracing::warn!(account_index = account, chain = %chain, error = %e, "Account unavailable"),
            }
        }
    }

    let signer = ChainSigner::new(
        config.service.wallet_id.clone(),
        mode,
        keyring,
        Arc::new(balances),
        Arc::new(KeyCache::new()),
    );
    let clients = ChainClients::from_clients(
        ChainClient::new(Chain::P, mode, rpc.clone())
            .with_call_timeout(Duration::from_secs(config.chains.p.call_timeout_secs)),
        ChainClient::new(Chain::C, mode, rpc)
            .with_call_timeout(Duration::from_secs(config.chains.c.call_timeout_secs)),
    );
    let store = Arc::new(JsonFileStore::open(&config.service.data_dir).await?);
    let settings = OrchestratorSettings::from_config(&config.transfer);
    tracing::info!(
        finality_attempts = settings.finality.max_retries,
        finality_budget_secs = settings.finality.backoff.total_wait(settings.finality.max_retries).as_secs(),
        "Transfers are reported stuck once the finality budget is spent"
    );
    let orchestrator = TransferOrchestrator::new(signer, clients, store, settings);

    let service = TransferService::new(orchestrator);
    let resumed = service.resume_all().await?;
    if !resumed.is_empty() {
        tracing::info!(count = resumed.len(), "Resumed interrupted transfers");
    }

    let listener = TcpListener::bind(&config.service.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let shutdown_rx = shutdown.subscribe();
    signals::spawn_signal_handler(shutdown.clone());

    let router = api::build_router(
        AppState::new(service.clone(), mode),
        Duration::from_secs(config.service.request_timeout_secs),
    );
    axum::serve(listener, router)
        .with_graceful_shutdown(Shutdown::wait(shutdown_rx))
        .await?;

    tracing::info!("HTTP server stopped; suspending transfers");
    service.suspend_all().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
