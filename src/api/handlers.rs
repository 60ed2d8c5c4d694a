use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::chain::types::NetworkMode;
use crate::lifecycle::CancelToken;
use crate::transfer::{TransferError, TransferHandle, TransferRequest, TransferState};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub network: NetworkMode,
    pub wallet_id: String,
    pub active_transfers: usize,
}

/// Progress of a transfer as seen by API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransferProgress {
    #[serde(flatten)]
    pub state: TransferState,
    /// True when an export may be on chain: the transfer must be resumed,
    /// never discarded.
    pub resumable: bool,
    pub running: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Accepted {
    pub id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
    pub retryable: bool,
}

/// [`TransferError`] rendered as a JSON response.
pub struct ApiError(pub TransferError);

impl From<TransferError> for ApiError {
    fn from(err: TransferError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            TransferError::InvalidRequest(_)
            | TransferError::InvalidFeeInput(_)
            | TransferError::AmbiguousSigner { .. } => StatusCode::BAD_REQUEST,
            TransferError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            TransferError::NotFound(_) => StatusCode::NOT_FOUND,
            TransferError::AccountBusy(_)
            | TransferError::TransferStuck { .. }
            | TransferError::TransactionFailed { .. }
            | TransferError::Cancelled
            | TransferError::Suspended { .. } => StatusCode::CONFLICT,
            TransferError::Network(_) => StatusCode::BAD_GATEWAY,
            TransferError::Signing(_) | TransferError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> &'static str {
        match &self.0 {
            TransferError::InvalidRequest(_) => "invalid_request",
            TransferError::InsufficientBalance { .. } => "insufficient_balance",
            TransferError::InvalidFeeInput(_) => "invalid_fee_input",
            TransferError::AmbiguousSigner { .. } => "ambiguous_signer",
            TransferError::Signing(_) => "signing",
            TransferError::Network(_) => "network",
            TransferError::TransferStuck { .. } => "transfer_stuck",
            TransferError::TransactionFailed { .. } => "transaction_failed",
            TransferError::Cancelled => "cancelled",
            TransferError::Suspended { .. } => "suspended",
            TransferError::AccountBusy(_) => "account_busy",
            TransferError::NotFound(_) => "not_found",
            TransferError::Store(_) => "store",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            kind: self.kind().to_string(),
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

async fn progress(state: &AppState, handle: &TransferHandle) -> Result<TransferProgress, ApiError> {
    let transfer = state.service.get_progress(handle).await?;
    Ok(TransferProgress {
        resumable: transfer.is_resumable(),
        running: state.service.is_running(handle),
        state: transfer,
    })
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        network: state.network,
        wallet_id: state.service.orchestrator().signer().wallet_id().to_string(),
        active_transfers: state.service.active_count(),
    })
}

pub async fn start_transfer(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let handle = state.service.start_transfer(request).await?;
    Ok((StatusCode::ACCEPTED, Json(Accepted { id: handle.id })))
}

pub async fn list_transfers(
    State(state): State<AppState>,
) -> Result<Json<Vec<TransferProgress>>, ApiError> {
    let transfers = state
        .service
        .list()
        .await?
        .into_iter()
        .map(|transfer| {
            let handle = TransferHandle { id: transfer.id };
            TransferProgress {
                resumable: transfer.is_resumable(),
                running: state.service.is_running(&handle),
                state: transfer,
            }
        })
        .collect();
    Ok(Json(transfers))
}

pub async fn get_transfer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransferProgress>, ApiError> {
    progress(&state, &TransferHandle { id }).await.map(Json)
}

pub async fn cancel_transfer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<TransferProgress>), ApiError> {
    let handle = TransferHandle { id };
    state.service.cancel(&handle).await?;
    Ok((StatusCode::ACCEPTED, Json(progress(&state, &handle).await?)))
}

pub async fn delete_transfer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.service.forget(&TransferHandle { id }).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn resume_transfer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let handle = state.service.resume(id).await?;
    Ok((StatusCode::ACCEPTED, Json(Accepted { id: handle.id })))
}

pub async fn create_quote(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Result<Response, ApiError> {
    let quote = state.service.quote(&request).await?;
    Ok((StatusCode::OK, Json(quote)).into_response())
}

pub async fn recover_account(
    State(state): State<AppState>,
    Path(index): Path<u32>,
) -> Result<Response, ApiError> {
    // detached from the request future; imports run to completion
    let service = state.service.clone();
    let task = tokio::spawn(async move {
        let cancel = CancelToken::new();
        service.recover(index, &cancel).await
    });
    match task.await {
        Ok(report) => Ok((StatusCode::OK, Json(report?)).into_response()),
        Err(e) => Err(TransferError::Store(format!("recovery task aborted: {}", e)).into()),
    }
}
