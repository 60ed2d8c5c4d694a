//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     HTTP server stops accepting → in-flight transfers are cancelled
//!     → each transfer persists its phase → exit
//!
//! Cancellation (cancel.rs):
//!     One CancelToken per transfer; backoff waits abort on cancel
//! ```
//!
//! # Design Decisions
//! - Cancelling a transfer before its export is submitted aborts it cleanly
//! - Cancelling after export only stops automatic retries; state is kept for resume

pub mod cancel;
pub mod shutdown;
pub mod signals;

pub use cancel::CancelToken;
pub use shutdown::Shutdown;
