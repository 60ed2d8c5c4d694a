//! Cross-chain transfers.
//!
//! # Data Flow
//! ```text
//! TransferService ──spawn──▶ TransferOrchestrator::run
//!                                 │ every step
//!                                 ▼
//!                           TransferStore (memory | JSON files)
//! ```
//!
//! # Design Decisions
//! - The persisted [`types::TransferState`] is the only progress record;
//!   progress queries read the store
//! - Errors separate "nothing happened on chain" from "export submitted,
//!   must resume" via [`types::TransferState::is_resumable`]

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod service;
pub mod store;
pub mod types;

pub use error::TransferError;
pub use orchestrator::{OrchestratorSettings, TransferOrchestrator};
pub use service::{RecoveryReport, TransferHandle, TransferService};
pub use store::{JsonFileStore, MemoryStore, StoreError, TransferStore};
pub use types::{
    FeePayment, FeeQuote, SubmittedTx, TransferPhase, TransferReport, TransferRequest,
    TransferState,
};
