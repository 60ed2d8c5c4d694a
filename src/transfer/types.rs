//! Transfer requests, phases and the persisted working record.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::chain::amount::Amount;
use crate::chain::transaction::{ExportProof, SignedTransaction};
use crate::chain::types::{Chain, TransactionStatus, TxId};
use crate::transfer::error::TransferError;

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Who absorbs the network fees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeePayment {
    /// Fees come out of `amount`: the source is debited exactly `amount`
    /// and the destination receives `amount - export_fee - import_fee`.
    #[default]
    FromAmount,
    /// Fees are paid on top: the destination receives exactly `amount`.
    OnTop,
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub amount: Amount,
    pub source_chain: Chain,
    pub destination_chain: Chain,
    pub account_index: u32,
    /// Recipient on the destination chain, in that chain's address format.
    pub destination_address: String,
    #[serde(default)]
    pub fee_payment: FeePayment,
}

impl TransferRequest {
    /// Local checks that need no network access.
    pub fn validate(&self) -> Result<Address, TransferError> {
        if self.amount.is_zero() {
            return Err(TransferError::InvalidRequest("amount must be positive".to_string()));
        }
        if self.source_chain == self.destination_chain {
            return Err(TransferError::InvalidRequest(format!(
                "source and destination are both {}-chain",
                self.source_chain
            )));
        }
        self.destination_chain
            .parse_address(&self.destination_address)
            .map_err(|e| TransferError::InvalidRequest(e.to_string()))
    }
}

/// State machine phases.
///
/// ```text
/// Idle ─▶ Exporting ─▶ AwaitingExportFinality ─▶ Importing ─▶ AwaitingImportFinality ─▶ Complete
///   └──────────┴──────────────┴─────────────────────┴──────────────────┴──▶ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    Idle,
    Exporting,
    AwaitingExportFinality,
    Importing,
    AwaitingImportFinality,
    Complete,
    Failed,
}

impl TransferPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferPhase::Idle => "idle",
            TransferPhase::Exporting => "exporting",
            TransferPhase::AwaitingExportFinality => "awaiting_export_finality",
            TransferPhase::Importing => "importing",
            TransferPhase::AwaitingImportFinality => "awaiting_import_finality",
            TransferPhase::Complete => "complete",
            TransferPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferPhase::Complete | TransferPhase::Failed)
    }

    /// Phases only reachable once an export was accepted by the source chain.
    pub fn export_submitted(&self) -> bool {
        matches!(
            self,
            TransferPhase::AwaitingExportFinality
                | TransferPhase::Importing
                | TransferPhase::AwaitingImportFinality
                | TransferPhase::Complete
        )
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fees fixed before the export is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub export_fee: Amount,
    /// Import fee at the time of quoting; recomputed from a fresh base fee
    /// when the import is built.
    pub import_fee: Amount,
    pub total_fee: Amount,
    /// Value carried by the export into atomic memory.
    pub exported_amount: Amount,
    /// Value leaving the source account.
    pub source_debit: Amount,
    pub expected_realized: Amount,
}

/// A transaction the orchestrator signed and handed to a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedTx {
    pub id: TxId,
    pub chain: Chain,
    /// Value of the primary output (exported or claimed).
    pub amount: Amount,
    pub fee: Amount,
    /// Owner of the primary output.
    pub owner: Address,
    pub submitted_at: u64,
}

impl SubmittedTx {
    pub fn from_signed(tx: &SignedTransaction) -> Self {
        let unsigned = tx.unsigned();
        let (owner, amount) = unsigned
            .primary_output()
            .map(|o| (o.address, o.amount))
            .unwrap_or((Address::ZERO, Amount::ZERO));
        Self {
            id: tx.id(),
            chain: tx.chain(),
            amount,
            fee: unsigned.fee(),
            owner,
            submitted_at: unix_now(),
        }
    }

    /// Proof of the exported output, for building the import.
    pub fn export_proof(&self) -> ExportProof {
        ExportProof::for_export(self.chain, self.id, self.owner, self.amount)
    }
}

/// The orchestrator's working record, persisted after every step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferState {
    pub id: Uuid,
    pub request: TransferRequest,
    pub phase: TransferPhase,
    pub quote: Option<FeeQuote>,
    pub export_tx: Option<SubmittedTx>,
    pub export_status: Option<TransactionStatus>,
    pub import_tx: Option<SubmittedTx>,
    pub import_status: Option<TransactionStatus>,
    pub realized_amount: Option<Amount>,
    pub last_error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl TransferState {
    pub fn new(request: TransferRequest) -> Self {
        let now = unix_now();
        Self {
            id: Uuid::new_v4(),
            request,
            phase: TransferPhase::Idle,
            quote: None,
            export_tx: None,
            export_status: None,
            import_tx: None,
            import_status: None,
            realized_amount: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, phase: TransferPhase) {
        tracing::debug!(
            transfer_id = %self.id,
            from = %self.phase,
            to = %phase,
            "Transfer phase change"
        );
        self.phase = phase;
        self.updated_at = unix_now();
    }

    /// True once an export may have reached the source chain and the
    /// transfer is not finished: the record must be kept and resumed,
    /// never discarded.
    pub fn is_resumable(&self) -> bool {
        !self.phase.is_terminal() && (self.phase.export_submitted() || self.export_tx.is_some())
    }

    /// Completion report, once the transfer is complete.
    pub fn report(&self) -> Option<TransferReport> {
        if self.phase != TransferPhase::Complete {
            return None;
        }
        let export = self.export_tx.as_ref()?;
        let import = self.import_tx.as_ref()?;
        Some(TransferReport {
            transfer_id: self.id,
            realized_amount: self.realized_amount.unwrap_or(import.amount),
            export_tx_id: export.id,
            import_tx_id: import.id,
            export_fee: export.fee,
            import_fee: import.fee,
            total_fee: export.fee.checked_add(import.fee).unwrap_or(Amount::ZERO),
        })
    }
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReport {
    pub transfer_id: Uuid,
    pub realized_amount: Amount,
    pub export_tx_id: TxId,
    pub import_tx_id: TxId,
    pub export_fee: Amount,
    pub import_fee: Amount,
    pub total_fee: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TransferRequest {
        TransferRequest {
            amount: Amount::from(1_000),
            source_chain: Chain::P,
            destination_chain: Chain::C,
            account_index: 0,
            destination_address: Chain::C.format_address(Address::repeat_byte(5)),
            fee_payment: FeePayment::default(),
        }
    }

    #[test]
    fn test_request_validation() {
        assert_eq!(request().validate().unwrap(), Address::repeat_byte(5));

        let zero = TransferRequest {
            amount: Amount::ZERO,
            ..request()
        };
        assert!(matches!(zero.validate(), Err(TransferError::InvalidRequest(_))));

        let same = TransferRequest {
            destination_chain: Chain::P,
            ..request()
        };
        assert!(same.validate().is_err());

        let bad_address = TransferRequest {
            destination_address: "P-0011".to_string(),
            ..request()
        };
        assert!(bad_address.validate().is_err());
    }

    #[test]
    fn test_request_json_defaults_fee_payment() {
        let json = r#"{
            "amount": "1000000",
            "source_chain": "P",
            "destination_chain": "C",
            "account_index": 0,
            "destination_address": "0x0505050505050505050505050505050505050505"
        }"#;
        let request: TransferRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.fee_payment, FeePayment::FromAmount);
        assert_eq!(request.amount, Amount::from(1_000_000));
    }

    #[test]
    fn test_resumable_distinction() {
        let mut state = TransferState::new(request());
        assert!(!state.is_resumable());

        state.transition(TransferPhase::Exporting);
        assert!(!state.is_resumable());

        state.transition(TransferPhase::AwaitingExportFinality);
        assert!(state.is_resumable());

        state.transition(TransferPhase::Complete);
        assert!(!state.is_resumable());
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(TransferPhase::AwaitingExportFinality.to_string(), "awaiting_export_finality");
        let json = serde_json::to_string(&TransferPhase::Importing).unwrap();
        assert_eq!(json, "\"importing\"");
    }
}
