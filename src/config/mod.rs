//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TransferNodeConfig (validated, immutable)
//!     → handed to the chain clients, orchestrator settings and API
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Private keys never appear in the file; they come from the environment

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::ChainEndpointConfig;
pub use schema::ObservabilityConfig;
pub use schema::TransferConfig;
pub use schema::TransferNodeConfig;
