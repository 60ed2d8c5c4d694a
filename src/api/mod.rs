//! HTTP API over the transfer service.
//!
//! # Routes
//! ```text
//! POST /transfers                  start a transfer          202 { id }
//! GET  /transfers                  list persisted transfers
//! GET  /transfers/{id}             progress (with `resumable`)
//! DELETE /transfers/{id}           forget a finished transfer
//! POST /transfers/{id}/cancel      cancel or suspend
//! POST /transfers/{id}/resume      resume a halted transfer  202 { id }
//! POST /quotes                     fee quote, nothing submitted
//! POST /accounts/{index}/recover   import stuck funds
//! GET  /status                     node status
//! ```

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::chain::types::NetworkMode;
use crate::transfer::TransferService;

use self::handlers::*;

/// Application state injected into handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    pub service: TransferService,
    pub network: NetworkMode,
}

impl AppState {
    pub fn new(service: TransferService, network: NetworkMode) -> Self {
        Self { service, network }
    }
}

/// Build the router with tracing and a per-request timeout.
#[allow(deprecated)]
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/transfers", post(start_transfer).get(list_transfers))
        .route("/transfers/{id}", get(get_transfer).delete(delete_transfer))
        .route("/transfers/{id}/cancel", post(cancel_transfer))
        .route("/transfers/{id}/resume", post(resume_transfer))
        .route("/quotes", post(create_quote))
        .route("/accounts/{index}/recover", post(recover_account))
        .route("/status", get(get_status))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}
