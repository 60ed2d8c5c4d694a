//! Export/import state machine.
//!
//! # Responsibilities
//! - Quote both fees before anything is submitted
//! - Build, sign and submit the export, then poll it to finality
//! - Build, sign and submit the import against a fresh destination base fee
//! - Persist the state after every step so a crash or a stuck poll resumes
//!   without exporting twice
//!
//! # Data Flow
//! ```text
//!  Idle ──validate/quote/sign/submit──▶ AwaitingExportFinality ──poll──▶ Importing
//!    │                                        │ exhausted                  │
//!    ▼                                        ▼                            ▼ sign/submit
//!  Failed (nothing on chain)          TransferStuck (kept)      AwaitingImportFinality ──poll──▶ Complete
//! ```
//!
//! # Design Decisions
//! - A transfer whose export may have reached the source chain never moves
//!   to `Failed` on a network error, a stuck poll or a cancel; it keeps its
//!   phase and can be resumed
//! - A submission that fails after retries is probed by id before it is
//!   declared lost
//! - `Idle` and `Exporting` with a recorded export probe that export first
//!   instead of building a new one

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::chain::amount::Amount;
use crate::chain::client::ChainClients;
use crate::chain::fee::{self, FeeError};
use crate::chain::signer::ChainSigner;
use crate::chain::transaction::{ExportProof, SignedTransaction, UnsignedTransaction};
use crate::chain::types::{ChainError, TransactionStatus, TxId};
use crate::config::TransferConfig;
use crate::lifecycle::CancelToken;
use crate::observability::metrics;
use crate::resilience::{Backoff, RetryError, RetryPolicy};
use crate::transfer::error::TransferError;
use crate::transfer::store::TransferStore;
use crate::transfer::types::{
    unix_now, FeePayment, FeeQuote, SubmittedTx, TransferPhase, TransferReport, TransferRequest,
    TransferState,
};

/// Rounds of re-sizing the export once its fee is known.
const FEE_ROUNDS: usize = 4;

/// Retry budgets and fee tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Status polling until a transaction is final.
    pub finality: RetryPolicy,
    /// Resubmission on transient network errors.
    pub submission: RetryPolicy,
    /// Listing pending imports during stuck-funds recovery.
    pub recovery: RetryPolicy,
    /// Multiplier on the destination base fee, in percent.
    pub import_fee_multiplier_percent: u32,
}

impl OrchestratorSettings {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            finality: RetryPolicy::new(
                config.finality_max_attempts,
                Backoff::from_config(config.finality_backoff, config.finality_backoff_secs),
            ),
            submission: RetryPolicy::new(
                config.submit_max_attempts,
                Backoff::constant(config.submit_backoff_secs),
            ),
            recovery: RetryPolicy::new(
                config.recovery_max_attempts,
                Backoff::constant(config.recovery_backoff_secs),
            ),
            import_fee_multiplier_percent: config.import_fee_multiplier_percent,
        }
    }

    /// Same budgets with every delay scaled to `unit`.
    pub fn with_time_unit(mut self, unit: Duration) -> Self {
        self.finality.backoff = self.finality.backoff.scaled(unit);
        self.submission.backoff = self.submission.backoff.scaled(unit);
        self.recovery.backoff = self.recovery.backoff.scaled(unit);
        self
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&TransferConfig::default())
    }
}

/// What became of a submission.
pub(crate) enum SubmitOutcome {
    /// The chain knows the transaction.
    Submitted(TxId),
    /// The chain refused it or never saw it; nothing was spent.
    NotLanded(TransferError),
    /// The chain could not be asked; the transaction may have landed.
    Unknown(TransferError),
}

/// Drives one transfer at a time through its phases.
#[derive(Clone)]
pub struct TransferOrchestrator {
    signer: ChainSigner,
    clients: ChainClients,
    store: Arc<dyn TransferStore>,
    settings: OrchestratorSettings,
}

impl TransferOrchestrator {
    pub fn new(
        signer: ChainSigner,
        clients: ChainClients,
        store: Arc<dyn TransferStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            signer,
            clients,
            store,
            settings,
        }
    }

    pub fn signer(&self) -> &ChainSigner {
        &self.signer
    }

    pub fn clients(&self) -> &ChainClients {
        &self.clients
    }

    pub fn store(&self) -> &Arc<dyn TransferStore> {
        &self.store
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Advance `state` until it completes, fails, gets stuck or is cancelled.
    ///
    /// The state is persisted after every step. On error it reflects where
    /// the transfer stopped: `Failed` when nothing reached a chain, the
    /// current phase otherwise.
    pub async fn run(
        &self,
        state: &mut TransferState,
        cancel: &CancelToken,
    ) -> Result<TransferReport, TransferError> {
        if state.phase == TransferPhase::Idle {
            metrics::record_transfer_started();
            tracing::info!(
                transfer_id = %state.id,
                source = %state.request.source_chain,
                destination = %state.request.destination_chain,
                amount = %state.request.amount,
                account_index = state.request.account_index,
                "Transfer started"
            );
        }

        loop {
            match state.phase {
                TransferPhase::Complete => {
                    return state.report().ok_or_else(|| {
                        TransferError::Store(format!(
                            "transfer {} is complete but lacks its transactions",
                            state.id
                        ))
                    });
                }
                TransferPhase::Failed => {
                    return Err(TransferError::InvalidRequest(format!(
                        "transfer {} already failed: {}",
                        state.id,
                        state.last_error.as_deref().unwrap_or("unknown reason")
                    )));
                }
                _ => {}
            }

            if cancel.is_cancelled() {
                let err = if state.is_resumable() {
                    TransferError::Suspended { phase: state.phase }
                } else {
                    TransferError::Cancelled
                };
                return Err(self.handle_error(state, err).await);
            }

            let step = match state.phase {
                TransferPhase::Idle | TransferPhase::Exporting => {
                    self.export_step(state, cancel).await
                }
                TransferPhase::AwaitingExportFinality => {
                    self.export_finality_step(state, cancel).await
                }
                TransferPhase::Importing => self.import_step(state, cancel).await,
                TransferPhase::AwaitingImportFinality => {
                    self.import_finality_step(state, cancel).await
                }
                TransferPhase::Complete | TransferPhase::Failed => Ok(()),
            };

            if let Err(err) = step {
                return Err(self.handle_error(state, err).await);
            }
        }
    }

    /// Fee quote for a request, without submitting anything.
    pub async fn quote(&self, request: &TransferRequest) -> Result<FeeQuote, TransferError> {
        self.prepare_export(request).await.map(|(_, quote)| quote)
    }

    /// Record `err` on the state and decide whether the transfer is over.
    async fn handle_error(&self, state: &mut TransferState, err: TransferError) -> TransferError {
        state.last_error = Some(err.to_string());

        let terminal = state.phase.is_terminal();
        match &err {
            _ if terminal => {}
            TransferError::Suspended { phase } => {
                tracing::info!(transfer_id = %state.id, phase = %phase, "Transfer suspended");
                state.updated_at = unix_now();
            }
            _ if state.is_resumable() => {
                if matches!(err, TransferError::TransferStuck { .. }) {
                    metrics::record_transfer_stuck();
                }
                tracing::warn!(
                    transfer_id = %state.id,
                    phase = %state.phase,
                    error = %err,
                    "Transfer halted; resume to continue"
                );
                state.updated_at = unix_now();
            }
            _ => {
                tracing::error!(
                    transfer_id = %state.id,
                    phase = %state.phase,
                    error = %err,
                    "Transfer failed"
                );
                self.mark_failed(state);
            }
        }

        if let Err(e) = self.store.save(state).await {
            tracing::error!(transfer_id = %state.id, error = %e, "Failed to persist transfer");
        }
        err
    }

    fn mark_failed(&self, state: &mut TransferState) {
        metrics::record_transfer_failed(state.phase.as_str());
        state.transition(TransferPhase::Failed);
    }

    async fn persist(&self, state: &TransferState) -> Result<(), TransferError> {
        Ok(self.store.save(state).await?)
    }

    /// Quote both fees and build the export that realizes the quote.
    async fn prepare_export(
        &self,
        request: &TransferRequest,
    ) -> Result<(UnsignedTransaction, FeeQuote), TransferError> {
        request.validate()?;
        let source = request.source_chain;
        let source_rate = self.clients.get(source).base_fee().await?;

        // The import claims roughly `amount`; its size does not depend on value.
        let owner = self
            .signer
            .address(request.account_index, request.destination_chain)
            .await?;
        let draft_proof = ExportProof::for_export(source, TxId::ZERO, owner, request.amount);
        let import_fee = self.import_fee(request, &draft_proof).await?;

        let mut export_fee = Amount::ZERO;
        for _ in 0..FEE_ROUNDS {
            let exported = exported_amount(request, export_fee, import_fee)?;
            let draft = self
                .signer
                .build_export(request, exported, export_fee)
                .await?;
            let size = self.signer.signed_size(&draft)?;
            let needed = fee::compute_fee(source_rate, size, source)?;
            if needed <= export_fee {
                let quote = FeeQuote {
                    export_fee,
                    import_fee,
                    total_fee: checked_add(export_fee, import_fee)?,
                    exported_amount: exported,
                    source_debit: checked_add(exported, export_fee)?,
                    expected_realized: exported.checked_sub(import_fee).unwrap_or(Amount::ZERO),
                };
                return Ok((draft, quote));
            }
            export_fee = needed;
        }

        Err(TransferError::InvalidFeeInput(
            "export fee did not settle".to_string(),
        ))
    }

    /// Import fee against a freshly queried destination base fee.
    pub(crate) async fn import_fee(
        &self,
        request: &TransferRequest,
        proof: &ExportProof,
    ) -> Result<Amount, TransferError> {
        let destination = request.destination_chain;
        let base_fee = self.clients.get(destination).base_fee().await?;
        let rate = fee::adjust_base_fee(base_fee, self.settings.import_fee_multiplier_percent)?;
        let draft = self.signer.build_import(request, proof, Amount::ZERO).await?;
        let size = self.signer.signed_size(&draft)?;
        Ok(fee::compute_fee(rate, size, destination)?)
    }

    async fn export_step(
        &self,
        state: &mut TransferState,
        cancel: &CancelToken,
    ) -> Result<(), TransferError> {
        if let Some(export) = state.export_tx.clone() {
            match self.clients.get(export.chain).status(&export.id).await {
                Ok(status) => {
                    tracing::info!(
                        transfer_id = %state.id,
                        tx_id = %export.id,
                        status = ?status,
                        "Recorded export found on chain"
                    );
                    state.export_status = Some(status);
                    state.transition(TransferPhase::AwaitingExportFinality);
                    return self.persist(state).await;
                }
                Err(ChainError::UnknownTransaction(_)) => {
                    tracing::info!(
                        transfer_id = %state.id,
                        tx_id = %export.id,
                        "Recorded export never landed; rebuilding"
                    );
                    state.export_tx = None;
                    state.export_status = None;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let request = state.request.clone();
        let account = request.account_index;
        let source = request.source_chain;
        self.signer.address(account, source).await?;

        let (unsigned, quote) = self.prepare_export(&request).await?;
        tracing::info!(
            transfer_id = %state.id,
            export_fee = %quote.export_fee,
            import_fee = %quote.import_fee,
            total_fee = %quote.total_fee,
            exported = %quote.exported_amount,
            "Fees quoted"
        );
        state.quote = Some(quote);
        state.transition(TransferPhase::Exporting);
        self.persist(state).await?;

        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let signed = self.signer.sign(unsigned, account, source.curve_spec()).await?;
        state.export_tx = Some(SubmittedTx::from_signed(&signed));
        self.persist(state).await?;

        match self.submit(&signed, cancel).await {
            SubmitOutcome::Submitted(tx_id) => {
                if let Some(export) = state.export_tx.as_mut() {
                    export.id = tx_id;
                }
                tracing::info!(transfer_id = %state.id, tx_id = %tx_id, chain = %source, "Export submitted");
                state.transition(TransferPhase::AwaitingExportFinality);
                self.persist(state).await
            }
            SubmitOutcome::NotLanded(err) => {
                state.export_tx = None;
                Err(err)
            }
            SubmitOutcome::Unknown(err) => Err(halted(err, state)),
        }
    }

    async fn export_finality_step(
        &self,
        state: &mut TransferState,
        cancel: &CancelToken,
    ) -> Result<(), TransferError> {
        let export = recorded(&state.export_tx, state.phase)?;
        let status = self
            .await_finality(&export, TransferPhase::AwaitingExportFinality, cancel)
            .await?;
        state.export_status = Some(status);

        if status.is_success() {
            tracing::info!(transfer_id = %state.id, tx_id = %export.id, "Export final");
            state.transition(TransferPhase::Importing);
            self.persist(state).await
        } else {
            self.mark_failed(state);
            self.persist(state).await?;
            Err(TransferError::TransactionFailed {
                chain: export.chain,
                tx_id: export.id,
            })
        }
    }

    async fn import_step(
        &self,
        state: &mut TransferState,
        cancel: &CancelToken,
    ) -> Result<(), TransferError> {
        if let Some(import) = state.import_tx.clone() {
            match self.clients.get(import.chain).status(&import.id).await {
                Ok(status) => {
                    state.import_status = Some(status);
                    state.transition(TransferPhase::AwaitingImportFinality);
                    return self.persist(state).await;
                }
                Err(ChainError::UnknownTransaction(_)) => {
                    state.import_tx = None;
                    state.import_status = None;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let request = state.request.clone();
        let destination = request.destination_chain;
        let proof = recorded(&state.export_tx, state.phase)?.export_proof();

        let import_fee = self.import_fee(&request, &proof).await?;
        let unsigned = self.signer.build_import(&request, &proof, import_fee).await?;
        let signed = self
            .signer
            .sign(unsigned, request.account_index, destination.curve_spec())
            .await?;
        state.import_tx = Some(SubmittedTx::from_signed(&signed));
        self.persist(state).await?;

        match self.submit(&signed, cancel).await {
            SubmitOutcome::Submitted(tx_id) => {
                if let Some(import) = state.import_tx.as_mut() {
                    import.id = tx_id;
                }
                tracing::info!(
                    transfer_id = %state.id,
                    tx_id = %tx_id,
                    chain = %destination,
                    fee = %import_fee,
                    "Import submitted"
                );
                state.transition(TransferPhase::AwaitingImportFinality);
                self.persist(state).await
            }
            SubmitOutcome::NotLanded(err) => {
                state.import_tx = None;
                Err(err)
            }
            SubmitOutcome::Unknown(err) => Err(halted(err, state)),
        }
    }

    async fn import_finality_step(
        &self,
        state: &mut TransferState,
        cancel: &CancelToken,
    ) -> Result<(), TransferError> {
        let import = recorded(&state.import_tx, state.phase)?;
        let status = self
            .await_finality(&import, TransferPhase::AwaitingImportFinality, cancel)
            .await?;
        state.import_status = Some(status);

        if status.is_success() {
            state.realized_amount = Some(import.amount);
            state.transition(TransferPhase::Complete);
            self.persist(state).await?;
            metrics::record_transfer_completed(Duration::from_secs(
                state.updated_at.saturating_sub(state.created_at),
            ));
            tracing::info!(
                transfer_id = %state.id,
                realized = %import.amount,
                import_tx_id = %import.id,
                "Transfer complete"
            );
            Ok(())
        } else {
            // The export output is still unclaimed; build a new import.
            state.import_tx = None;
            state.import_status = None;
            state.transition(TransferPhase::Importing);
            self.persist(state).await?;
            Err(TransferError::TransactionFailed {
                chain: import.chain,
                tx_id: import.id,
            })
        }
    }

    /// Poll `tx` until the chain reports a terminal status.
    pub(crate) async fn await_finality(
        &self,
        tx: &SubmittedTx,
        phase: TransferPhase,
        cancel: &CancelToken,
    ) -> Result<TransactionStatus, TransferError> {
        let client = self.clients.get(tx.chain);
        let result = self
            .settings
            .finality
            .execute(
                |attempt| async move {
                    let status = client.status(&tx.id).await;
                    tracing::debug!(
                        chain = %tx.chain,
                        tx_id = %tx.id,
                        attempt = attempt,
                        status = ?status,
                        "Polled status"
                    );
                    status
                },
                |status: &TransactionStatus| status.is_terminal(),
                cancel,
            )
            .await;

        match result {
            Ok(status) => Ok(status),
            Err(RetryError::Cancelled { .. }) => Err(TransferError::Suspended { phase }),
            Err(e) => {
                tracing::warn!(
                    chain = %tx.chain,
                    tx_id = %tx.id,
                    phase = %phase,
                    error = %e,
                    "Finality polling exhausted"
                );
                Err(TransferError::TransferStuck {
                    phase,
                    tx_id: tx.id,
                })
            }
        }
    }

    /// Submit with retries on transient errors.
    ///
    /// When the retries run out, or a rejection follows a transient failure,
    /// the chain is asked for the transaction by id before it is declared
    /// lost.
    pub(crate) async fn submit(&self, tx: &SignedTransaction, cancel: &CancelToken) -> SubmitOutcome {
        let client = self.clients.get(tx.chain());
        let saw_transient = AtomicBool::new(false);
        let transient = &saw_transient;
        let result = self
            .settings
            .submission
            .execute_with(
                |attempt| async move {
                    if attempt > 0 {
                        tracing::debug!(chain = %tx.chain(), attempt = attempt, "Resubmitting");
                    }
                    let result = client.submit(tx).await;
                    if matches!(&result, Err(e) if e.is_transient()) {
                        transient.store(true, Ordering::Relaxed);
                    }
                    result
                },
                |_| true,
                |e: &ChainError| !e.is_transient(),
                cancel,
            )
            .await;

        let err = match result {
            Ok(tx_id) => return SubmitOutcome::Submitted(tx_id),
            // an earlier attempt may have landed before its reply was lost
            Err(RetryError::Aborted { error, .. }) if saw_transient.load(Ordering::Relaxed) => {
                error.into()
            }
            Err(RetryError::Aborted { error, .. }) => {
                return SubmitOutcome::NotLanded(error.into());
            }
            Err(RetryError::Cancelled { .. }) => TransferError::Cancelled,
            Err(e) => match e.last_error() {
                Some(last) => TransferError::Network(last.clone()),
                None => TransferError::Network(ChainError::Rpc(e.to_string())),
            },
        };

        // A timed out attempt may still have reached the node.
        let tx_id = tx.id();
        match client.status(&tx_id).await {
            Ok(_) => SubmitOutcome::Submitted(tx_id),
            Err(ChainError::UnknownTransaction(_)) => SubmitOutcome::NotLanded(err),
            Err(status_err) => {
                tracing::warn!(
                    chain = %tx.chain(),
                    tx_id = %tx_id,
                    error = %status_err,
                    "Could not tell whether the submission landed"
                );
                SubmitOutcome::Unknown(err)
            }
        }
    }
}

impl std::fmt::Debug for TransferOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferOrchestrator")
            .field("wallet_id", &self.signer.wallet_id())
            .field("settings", &self.settings)
            .finish()
    }
}

/// A cancel that leaves a submission unaccounted for suspends the transfer.
fn halted(err: TransferError, state: &TransferState) -> TransferError {
    match err {
        TransferError::Cancelled if state.is_resumable() => {
            TransferError::Suspended { phase: state.phase }
        }
        other => other,
    }
}

fn recorded(tx: &Option<SubmittedTx>, phase: TransferPhase) -> Result<SubmittedTx, TransferError> {
    tx.clone().ok_or_else(|| {
        TransferError::Store(format!("state in {} has no recorded transaction", phase))
    })
}

fn checked_add(a: Amount, b: Amount) -> Result<Amount, TransferError> {
    a.checked_add(b).ok_or_else(|| FeeError::Overflow.into())
}

/// Value the export must carry for the request's fee payment mode.
fn exported_amount(
    request: &TransferRequest,
    export_fee: Amount,
    import_fee: Amount,
) -> Result<Amount, TransferError> {
    match request.fee_payment {
        FeePayment::FromAmount => match request.amount.checked_sub(export_fee) {
            Some(exported) if exported > import_fee => Ok(exported),
            _ => Err(TransferError::InsufficientBalance {
                chain: request.destination_chain,
                required: checked_add(checked_add(export_fee, import_fee)?, Amount::from(1))?,
                available: request.amount,
            }),
        },
        FeePayment::OnTop => checked_add(request.amount, import_fee),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::keyring::LocalKeyring;
    use alloy::primitives::Address;
    use crate::chain::keys::KeyCache;
    use crate::chain::client::ChainConnectivity;
    use crate::chain::simulated::SimulatedNetwork;
    use crate::chain::types::{Chain, ChainResult, NetworkMode};
    use crate::transfer::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    struct Fixture {
        net: Arc<SimulatedNetwork>,
        store: MemoryStore,
        orchestrator: TransferOrchestrator,
        owner: Address,
    }

    /// How [`Scripted`] misbehaves on submission.
    #[derive(Clone, Copy)]
    enum Script {
        /// The first submission lands but its reply times out; later ones
        /// are rejected as duplicates.
        LostReply,
        /// Submissions and status queries fail; the first submission cancels.
        Outage,
        /// Every submission is rejected without reaching the chain.
        Rejected,
    }

    struct Scripted {
        net: Arc<SimulatedNetwork>,
        script: Script,
        cancel: CancelToken,
        submits: AtomicU32,
    }

    #[async_trait]
    impl ChainConnectivity for Scripted {
        async fn submit_transaction(&self, tx: &SignedTransaction) -> ChainResult<TxId> {
            let n = self.submits.fetch_add(1, Ordering::SeqCst);
            match (self.script, n) {
                (Script::LostReply, 0) => {
                    self.net.submit_transaction(tx).await?;
                    Err(ChainError::Timeout(1_000))
                }
                (Script::LostReply, _) => {
                    Err(ChainError::Rejected("transaction already issued".to_string()))
                }
                (Script::Rejected, _) => Err(ChainError::Rejected("insufficient funds".to_string())),
                (Script::Outage, _) => {
                    self.cancel.cancel();
                    Err(ChainError::Rpc("connection refused".to_string()))
                }
            }
        }

        async fn query_status(&self, tx_id: &TxId, chain: Chain) -> ChainResult<TransactionStatus> {
            match self.script {
                Script::LostReply | Script::Rejected => self.net.query_status(tx_id, chain).await,
                Script::Outage => Err(ChainError::Rpc("connection refused".to_string())),
            }
        }

        async fn base_fee(&self, chain: Chain) -> ChainResult<Amount> {
            self.net.base_fee(chain).await
        }

        async fn pending_imports(&self, chain: Chain, owner: Address) -> ChainResult<Vec<ExportProof>> {
            self.net.pending_imports(chain, owner).await
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|net| net as Arc<dyn ChainConnectivity>)
    }

    fn scripted(script: Script, cancel: &CancelToken) -> Fixture {
        let cancel = cancel.clone();
        fixture_with(move |net| {
            let connectivity: Arc<dyn ChainConnectivity> = Arc::new(Scripted {
                net,
                script,
                cancel,
                submits: AtomicU32::new(0),
            });
            connectivity
        })
    }

    fn fixture_with<F>(connect: F) -> Fixture
    where
        F: FnOnce(Arc<SimulatedNetwork>) -> Arc<dyn ChainConnectivity>,
    {
        let net = Arc::new(SimulatedNetwork::new());
        let keyring = LocalKeyring::new();
        let owner = keyring.insert_hex(0, Chain::P, KEY).unwrap();
        keyring.insert_hex(0, Chain::C, KEY).unwrap();
        net.register(0, Chain::P, owner);
        net.register(0, Chain::C, owner);

        let signer = ChainSigner::new(
            "test",
            NetworkMode::Fuji,
            Arc::new(keyring),
            net.clone(),
            Arc::new(KeyCache::new()),
        );
        let clients = ChainClients::new(NetworkMode::Fuji, connect(net.clone()), Duration::from_secs(1));
        let store = MemoryStore::new();
        let settings = OrchestratorSettings::default().with_time_unit(Duration::from_millis(1));
        let orchestrator =
            TransferOrchestrator::new(signer, clients, Arc::new(store.clone()), settings);
        Fixture {
            net,
            store,
            orchestrator,
            owner,
        }
    }

    fn request(amount: u64, fee_payment: FeePayment) -> TransferRequest {
        TransferRequest {
            amount: Amount::from(amount),
            source_chain: Chain::P,
            destination_chain: Chain::C,
            account_index: 0,
            destination_address: Chain::C.format_address(Address::repeat_byte(0x42)),
            fee_payment,
        }
    }

    #[tokio::test]
    async fn test_quote_is_persisted_before_export() {
        let f = fixture();
        f.net.fund(Chain::P, 0, f.owner, Amount::from(2_000_000));
        f.net.fail_next_submissions(100);

        let mut state = TransferState::new(request(1_000_000, FeePayment::FromAmount));
        let err = f.orchestrator.run(&mut state, &CancelToken::new()).await.unwrap_err();

        assert!(err.is_retryable());
        let saved = f.store.load(&state.id).await.unwrap().unwrap();
        assert!(saved.quote.is_some());
        // nothing landed, so the transfer is over
        assert_eq!(saved.phase, TransferPhase::Failed);
        assert!(saved.export_tx.is_none());
        assert_eq!(f.net.submissions(Chain::P), 0);
    }

    #[tokio::test]
    async fn test_transient_submit_errors_are_retried() {
        let f = fixture();
        f.net.fund(Chain::P, 0, f.owner, Amount::from(2_000_000));
        f.net.fail_next_submissions(2);

        let mut state = TransferState::new(request(1_000_000, FeePayment::FromAmount));
        let report = f.orchestrator.run(&mut state, &CancelToken::new()).await.unwrap();
        assert_eq!(state.phase, TransferPhase::Complete);
        assert!(report.realized_amount < Amount::from(1_000_000));
    }

    #[tokio::test]
    async fn test_rejection_after_lost_reply_keeps_landed_export() {
        let cancel = CancelToken::new();
        let f = scripted(Script::LostReply, &cancel);
        f.net.fund(Chain::P, 0, f.owner, Amount::from(2_000_000));
        f.net.set_never_finalize(Chain::P, true);

        let mut state = TransferState::new(request(1_000_000, FeePayment::FromAmount));
        let err = f.orchestrator.run(&mut state, &cancel).await.unwrap_err();

        // the export is on chain: the transfer waits for it instead of failing
        assert!(matches!(err, TransferError::TransferStuck { .. }));
        assert_eq!(state.phase, TransferPhase::AwaitingExportFinality);
        assert!(state.is_resumable());
        let export = state.export_tx.clone().unwrap();
        assert!(f.net.transaction(&export.id).is_some());
        assert_eq!(f.net.submissions(Chain::P), 1);

        let saved = f.store.load(&state.id).await.unwrap().unwrap();
        assert_eq!(saved.phase, TransferPhase::AwaitingExportFinality);
        assert_eq!(saved.export_tx.unwrap().id, export.id);
    }

    #[tokio::test]
    async fn test_outright_rejection_fails_cleanly() {
        let cancel = CancelToken::new();
        let f = scripted(Script::Rejected, &cancel);
        f.net.fund(Chain::P, 0, f.owner, Amount::from(2_000_000));

        let mut state = TransferState::new(request(1_000_000, FeePayment::FromAmount));
        let err = f.orchestrator.run(&mut state, &cancel).await.unwrap_err();

        assert!(matches!(err, TransferError::Network(ChainError::Rejected(_))));
        assert_eq!(state.phase, TransferPhase::Failed);
        assert!(state.export_tx.is_none());
        assert_eq!(f.net.balance(Chain::P, f.owner), Amount::from(2_000_000));
    }

    #[tokio::test]
    async fn test_cancel_during_unanswered_submission_suspends() {
        let cancel = CancelToken::new();
        let f = scripted(Script::Outage, &cancel);
        f.net.fund(Chain::P, 0, f.owner, Amount::from(2_000_000));

        let mut state = TransferState::new(request(1_000_000, FeePayment::FromAmount));
        let err = f.orchestrator.run(&mut state, &cancel).await.unwrap_err();

        assert!(matches!(err, TransferError::Suspended { phase: TransferPhase::Exporting }));
        assert_eq!(state.phase, TransferPhase::Exporting);
        assert!(state.is_resumable());
        assert!(state.last_error.unwrap().contains("suspended"));
    }

    #[tokio::test]
    async fn test_insufficient_balance_fails_without_submission() {
        let f = fixture();
        f.net.fund(Chain::P, 0, f.owner, Amount::from(500));

        let mut state = TransferState::new(request(1_000_000, FeePayment::FromAmount));
        let err = f.orchestrator.run(&mut state, &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, TransferError::InsufficientBalance { chain: Chain::P, .. }));
        assert_eq!(state.phase, TransferPhase::Failed);
        assert_eq!(f.net.submissions(Chain::P), 0);
    }

    #[tokio::test]
    async fn test_amount_below_fees_is_rejected() {
        let f = fixture();
        f.net.fund(Chain::P, 0, f.owner, Amount::from(2_000_000));

        let err = f
            .orchestrator
            .quote(&request(150, FeePayment::FromAmount))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InsufficientBalance { chain: Chain::C, .. }));
    }

    #[tokio::test]
    async fn test_unknown_account_is_invalid_request() {
        let f = fixture();
        let mut req = request(1_000, FeePayment::FromAmount);
        req.account_index = 7;
        let mut state = TransferState::new(req);
        let err = f.orchestrator.run(&mut state, &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidRequest(_)));
        assert_eq!(state.phase, TransferPhase::Failed);
    }

    #[tokio::test]
    async fn test_cancel_before_export_fails_cleanly() {
        let f = fixture();
        f.net.fund(Chain::P, 0, f.owner, Amount::from(2_000_000));
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut state = TransferState::new(request(1_000_000, FeePayment::FromAmount));
        let err = f.orchestrator.run(&mut state, &cancel).await.unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
        assert_eq!(state.phase, TransferPhase::Failed);
        assert!(state.last_error.unwrap().contains("cancelled"));
        assert_eq!(f.net.submissions(Chain::P), 0);
    }

    #[tokio::test]
    async fn test_failed_export_fails_transfer() {
        let f = fixture();
        f.net.fund(Chain::P, 0, f.owner, Amount::from(2_000_000));
        f.net.set_fail_transactions(Chain::P, true);

        let mut state = TransferState::new(request(1_000_000, FeePayment::FromAmount));
        let err = f.orchestrator.run(&mut state, &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, TransferError::TransactionFailed { chain: Chain::P, .. }));
        assert_eq!(state.phase, TransferPhase::Failed);
    }

    #[tokio::test]
    async fn test_failed_import_returns_to_importing() {
        let f = fixture();
        f.net.fund(Chain::P, 0, f.owner, Amount::from(2_000_000));
        f.net.set_fail_transactions(Chain::C, true);

        let mut state = TransferState::new(request(1_000_000, FeePayment::FromAmount));
        let err = f.orchestrator.run(&mut state, &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, TransferError::TransactionFailed { chain: Chain::C, .. }));
        assert_eq!(state.phase, TransferPhase::Importing);
        assert!(state.import_tx.is_none());
        assert!(state.is_resumable());
    }

    #[test]
    fn test_exported_amount_by_mode() {
        let from_amount = request(1_000, FeePayment::FromAmount);
        assert_eq!(
            exported_amount(&from_amount, Amount::from(100), Amount::from(50)).unwrap(),
            Amount::from(900)
        );
        assert!(exported_amount(&from_amount, Amount::from(900), Amount::from(100)).is_err());

        let on_top = request(1_000, FeePayment::OnTop);
        assert_eq!(
            exported_amount(&on_top, Amount::from(100), Amount::from(50)).unwrap(),
            Amount::from(1_050)
        );
    }
}
