//! Stuck-funds recovery.
//!
//! Value can sit in a chain's atomic memory when an export finalized but
//! its import never happened (the node died in between, or another client
//! exported without importing). Recovery lists those outputs for an account
//! on every chain and imports each one to the account's own address there.
//! Outputs exported by a transfer that is still unfinished are left for
//! that transfer to import to its own destination.

use serde::Serialize;
use std::collections::HashSet;

use crate::chain::amount::Amount;
use crate::chain::keys::KeyError;
use crate::chain::signer::SignerError;
use crate::chain::types::{Chain, ChainError, TxId};
use crate::lifecycle::CancelToken;
use crate::resilience::RetryError;
use crate::transfer::error::TransferError;
use crate::transfer::orchestrator::{SubmitOutcome, TransferOrchestrator};
use crate::transfer::types::{FeePayment, SubmittedTx, TransferPhase, TransferRequest};

/// Progress notifications, in order of occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RecoveryEvent {
    /// A listing of pending imports failed and will be retried.
    FetchingPendingFailing { chain: Chain, attempt: u32 },
    ImportStart { chain: Chain },
    ImportFinish { chain: Chain, tx_id: TxId },
    /// Nothing left to do.
    Idle,
}

/// One output claimed by recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveredImport {
    pub chain: Chain,
    pub source_chain: Chain,
    pub tx_id: TxId,
    pub amount: Amount,
    pub fee: Amount,
}

/// Import every pending atomic output owned by `account_index`.
///
/// # Arguments
/// * `orchestrator` - Provides the signer, clients and retry budgets
/// * `account_index` - Account whose outputs are claimed
/// * `cancel` - Stops between imports and aborts pending waits
/// * `on_event` - Receives [`RecoveryEvent`]s
pub async fn import_stuck_funds<F>(
    orchestrator: &TransferOrchestrator,
    account_index: u32,
    cancel: &CancelToken,
    on_event: F,
) -> Result<Vec<RecoveredImport>, TransferError>
where
    F: Fn(RecoveryEvent),
{
    let signer = orchestrator.signer();
    let mut recovered = Vec::new();

    let owned_by_transfers: HashSet<TxId> = orchestrator
        .store()
        .list()
        .await?
        .into_iter()
        .filter(|state| !state.phase.is_terminal())
        .filter_map(|state| state.export_tx.map(|tx| tx.id))
        .collect();

    for chain in Chain::ALL {
        let owner = match signer.address(account_index, chain).await {
            Ok(owner) => owner,
            Err(SignerError::Key(KeyError::UnknownAccount { .. })) => {
                tracing::debug!(account_index = account_index, chain = %chain, "No key; skipping chain");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let client = orchestrator.clients().get(chain);
        let on_event = &on_event;
        let listed = orchestrator
            .settings()
            .recovery
            .execute(
                |attempt| async move {
                    let result = client.pending_imports(owner).await;
                    if let Err(e) = &result {
                        tracing::warn!(chain = %chain, attempt = attempt, error = %e, "Listing pending imports failed");
                        on_event(RecoveryEvent::FetchingPendingFailing { chain, attempt });
                    }
                    result
                },
                |_| true,
                cancel,
            )
            .await;

        let pending = match listed {
            Ok(pending) => pending,
            Err(RetryError::Cancelled { .. }) => return Err(TransferError::Cancelled),
            Err(e) => {
                return Err(match e.last_error() {
                    Some(last) => TransferError::Network(last.clone()),
                    None => TransferError::Network(ChainError::Rpc(e.to_string())),
                })
            }
        };

        for proof in pending {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            if owned_by_transfers.contains(&proof.tx_id) {
                tracing::info!(
                    chain = %chain,
                    export_tx_id = %proof.tx_id,
                    "Pending output belongs to an unfinished transfer; leaving it"
                );
                continue;
            }

            let request = TransferRequest {
                amount: proof.amount,
                source_chain: proof.source_chain,
                destination_chain: chain,
                account_index,
                destination_address: chain.format_address(owner),
                fee_payment: FeePayment::FromAmount,
            };

            let fee = orchestrator.import_fee(&request, &proof).await?;
            if proof.amount <= fee {
                tracing::warn!(
                    chain = %chain,
                    export_tx_id = %proof.tx_id,
                    amount = %proof.amount,
                    fee = %fee,
                    "Pending output cannot cover its import fee; leaving it"
                );
                continue;
            }

            on_event(RecoveryEvent::ImportStart { chain });
            let unsigned = signer.build_import(&request, &proof, fee).await?;
            let signed = signer
                .sign(unsigned, account_index, chain.curve_spec())
                .await?;
            let mut import = SubmittedTx::from_signed(&signed);

            import.id = match orchestrator.submit(&signed, cancel).await {
                SubmitOutcome::Submitted(tx_id) => tx_id,
                SubmitOutcome::NotLanded(err) | SubmitOutcome::Unknown(err) => return Err(err),
            };

            let status = orchestrator
                .await_finality(&import, TransferPhase::AwaitingImportFinality, cancel)
                .await?;
            if !status.is_success() {
                return Err(TransferError::TransactionFailed {
                    chain,
                    tx_id: import.id,
                });
            }

            tracing::info!(
                chain = %chain,
                tx_id = %import.id,
                amount = %import.amount,
                "Recovered stuck funds"
            );
            on_event(RecoveryEvent::ImportFinish {
                chain,
                tx_id: import.id,
            });
            recovered.push(RecoveredImport {
                chain,
                source_chain: proof.source_chain,
                tx_id: import.id,
                amount: import.amount,
                fee,
            });
        }
    }

    on_event(RecoveryEvent::Idle);
    Ok(recovered)
}
