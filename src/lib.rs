//! Cross-chain atomic transfer orchestrator.
//!
//! Moves value between the UTXO-based P-chain and the account-based C-chain
//! with an export on the source chain followed by an import on the
//! destination chain, persisting every step so interrupted transfers resume
//! instead of exporting twice.

pub mod api;
pub mod chain;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod transfer;

pub use config::schema::TransferNodeConfig;
pub use lifecycle::Shutdown;
pub use transfer::{TransferOrchestrator, TransferService};
