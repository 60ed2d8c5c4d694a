//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! chain client, orchestrator, service:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Every transfer log line carries `transfer_id`; chain calls carry `chain`
//! - Keys, signatures and raw transaction bytes are never logged
//! - Metric updates are fire-and-forget; with no recorder installed they are no-ops

pub mod logging;
pub mod metrics;
