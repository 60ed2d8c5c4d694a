//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Probe of an eventually-consistent system (status poll, submission):
//!     → retries.rs (bounded attempts, cancellable waits)
//!     → backoff.rs (delay as a pure function of the attempt index)
//! ```
//!
//! # Design Decisions
//! - Per-call timeouts live in the chain client; a timeout is just a failed attempt
//! - Backoff carries no hidden state and no jitter, so schedules are testable
//! - Tests inject millisecond units instead of sleeping for seconds

pub mod backoff;
pub mod retries;

pub use backoff::Backoff;
pub use retries::{RetryError, RetryPolicy};
