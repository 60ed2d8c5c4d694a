//! Transfer service: spawns state machines and tracks them.
//!
//! # Responsibilities
//! - One tokio task per transfer
//! - At most one transfer (or recovery) in flight per account
//! - Progress, cancel and resume by transfer id
//! - Resume persisted transfers on startup and suspend running ones on
//!   shutdown
//!
//! # Concurrency
//! ```text
//! start_transfer ──try_lock(account)──▶ spawn(run) ──holds guard until done
//!                        │ busy
//!                        ▼
//!                   AccountBusy
//! ```

use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::lifecycle::CancelToken;
use crate::transfer::error::TransferError;
use crate::transfer::orchestrator::TransferOrchestrator;
use crate::transfer::recovery::{self, RecoveredImport, RecoveryEvent};
use crate::transfer::types::{FeeQuote, TransferPhase, TransferReport, TransferRequest, TransferState};

/// Reference to a spawned transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TransferHandle {
    pub id: Uuid,
}

/// Outcome of a recovery run.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub account_index: u32,
    pub imports: Vec<RecoveredImport>,
    pub events: Vec<RecoveryEvent>,
}

struct ActiveTransfer {
    cancel: CancelToken,
    task: JoinHandle<Result<TransferReport, TransferError>>,
}

struct Inner {
    orchestrator: TransferOrchestrator,
    account_locks: DashMap<u32, Arc<AsyncMutex<()>>>,
    active: DashMap<Uuid, ActiveTransfer>,
}

/// Cloneable front door to the orchestrator.
#[derive(Clone)]
pub struct TransferService {
    inner: Arc<Inner>,
}

impl TransferService {
    pub fn new(orchestrator: TransferOrchestrator) -> Self {
        Self {
            inner: Arc::new(Inner {
                orchestrator,
                account_locks: DashMap::new(),
                active: DashMap::new(),
            }),
        }
    }

    pub fn orchestrator(&self) -> &TransferOrchestrator {
        &self.inner.orchestrator
    }

    fn lock_account(&self, account_index: u32) -> Result<OwnedMutexGuard<()>, TransferError> {
        let lock = self
            .inner
            .account_locks
            .entry(account_index)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        lock.try_lock_owned()
            .map_err(|_| TransferError::AccountBusy(account_index))
    }

    fn spawn(&self, state: TransferState, guard: OwnedMutexGuard<()>) -> TransferHandle {
        let id = state.id;
        let cancel = CancelToken::new();
        let orchestrator = self.inner.orchestrator.clone();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let _guard = guard;
            let mut state = state;
            let result = orchestrator.run(&mut state, &token).await;
            if let Err(e) = &result {
                tracing::debug!(transfer_id = %id, phase = %state.phase, error = %e, "Transfer task ended");
            }
            result
        });

        self.prune();
        self.inner.active.insert(id, ActiveTransfer { cancel, task });
        TransferHandle { id }
    }

    /// Drop bookkeeping of finished tasks nobody waited for.
    fn prune(&self) {
        self.inner.active.retain(|_, active| !active.task.is_finished());
    }

    /// Validate, persist and spawn a new transfer.
    ///
    /// # Errors
    /// - [`TransferError::InvalidRequest`] for a malformed request
    /// - [`TransferError::AccountBusy`] when the account has a transfer in flight
    pub async fn start_transfer(
        &self,
        request: TransferRequest,
    ) -> Result<TransferHandle, TransferError> {
        request.validate()?;
        let guard = self.lock_account(request.account_index)?;

        let state = TransferState::new(request);
        self.inner.orchestrator.store().save(&state).await?;
        Ok(self.spawn(state, guard))
    }

    /// Latest persisted state of a transfer.
    pub async fn get_progress(&self, handle: &TransferHandle) -> Result<TransferState, TransferError> {
        self.inner
            .orchestrator
            .store()
            .load(&handle.id)
            .await?
            .ok_or(TransferError::NotFound(handle.id))
    }

    /// All persisted transfers, oldest first.
    pub async fn list(&self) -> Result<Vec<TransferState>, TransferError> {
        let mut states = self.inner.orchestrator.store().list().await?;
        states.sort_by_key(|s| s.created_at);
        Ok(states)
    }

    pub fn is_running(&self, handle: &TransferHandle) -> bool {
        self.inner
            .active
            .get(&handle.id)
            .map(|active| !active.task.is_finished())
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .active
            .iter()
            .filter(|active| !active.task.is_finished())
            .count()
    }

    /// Ask a running transfer to stop.
    ///
    /// Before the export is submitted the transfer fails cleanly; afterwards
    /// it is suspended in its current phase.
    pub async fn cancel(&self, handle: &TransferHandle) -> Result<(), TransferError> {
        match self.inner.active.get(&handle.id) {
            Some(active) => {
                tracing::info!(transfer_id = %handle.id, "Cancel requested");
                active.cancel.cancel();
                Ok(())
            }
            None => self.get_progress(handle).await.map(|_| ()),
        }
    }

    /// Continue a persisted, unfinished transfer.
    pub async fn resume(&self, id: Uuid) -> Result<TransferHandle, TransferError> {
        let handle = TransferHandle { id };
        if self.is_running(&handle) {
            return Ok(handle);
        }

        let state = self.get_progress(&handle).await?;
        if state.phase.is_terminal() {
            return Err(TransferError::InvalidRequest(format!(
                "transfer {} is already {}",
                id, state.phase
            )));
        }
        let guard = self.lock_account(state.request.account_index)?;
        tracing::info!(transfer_id = %id, phase = %state.phase, "Resuming transfer");
        Ok(self.spawn(state, guard))
    }

    /// Drop the record of a finished transfer.
    ///
    /// Only `Complete` and `Failed` transfers can be forgotten.
    pub async fn forget(&self, handle: &TransferHandle) -> Result<(), TransferError> {
        let state = self.get_progress(handle).await?;
        if !state.phase.is_terminal() || self.is_running(handle) {
            return Err(TransferError::InvalidRequest(format!(
                "transfer {} is {}; only finished transfers can be forgotten",
                handle.id, state.phase
            )));
        }
        self.inner.orchestrator.store().remove(&handle.id).await?;
        tracing::info!(transfer_id = %handle.id, "Transfer record removed");
        Ok(())
    }

    /// Resume every persisted transfer whose export may be on chain.
    ///
    /// Transfers interrupted before their export was signed are marked
    /// failed instead: nothing reached a chain.
    pub async fn resume_all(&self) -> Result<Vec<TransferHandle>, TransferError> {
        let store = self.inner.orchestrator.store();
        let mut handles = Vec::new();

        for mut state in self.list().await? {
            if state.phase.is_terminal() {
                continue;
            }
            if !state.is_resumable() {
                tracing::info!(transfer_id = %state.id, phase = %state.phase, "Discarding transfer interrupted before export");
                state.last_error = Some("interrupted before export".to_string());
                state.transition(TransferPhase::Failed);
                store.save(&state).await?;
                continue;
            }
            match self.resume(state.id).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    tracing::warn!(transfer_id = %state.id, error = %e, "Could not resume transfer");
                }
            }
        }

        tracing::info!(count = handles.len(), "Resumed persisted transfers");
        Ok(handles)
    }

    /// Wait for a spawned transfer to stop and return its outcome.
    pub async fn wait(&self, handle: &TransferHandle) -> Result<TransferReport, TransferError> {
        if let Some((_, active)) = self.inner.active.remove(&handle.id) {
            return match active.task.await {
                Ok(result) => result,
                Err(e) => Err(TransferError::Store(format!("transfer task aborted: {}", e))),
            };
        }

        let state = self.get_progress(handle).await?;
        state.report().ok_or_else(|| {
            TransferError::InvalidRequest(format!(
                "transfer {} is not running ({})",
                handle.id, state.phase
            ))
        })
    }

    /// Cancel every running transfer and wait for each to persist.
    pub async fn suspend_all(&self) -> usize {
        let ids: Vec<Uuid> = self.inner.active.iter().map(|e| *e.key()).collect();
        for id in &ids {
            if let Some(active) = self.inner.active.get(id) {
                active.cancel.cancel();
            }
        }

        let mut stopped = 0;
        for id in ids {
            if let Some((_, active)) = self.inner.active.remove(&id) {
                if active.task.await.is_ok() {
                    stopped += 1;
                }
            }
        }
        tracing::info!(count = stopped, "Suspended running transfers");
        stopped
    }

    /// Fee quote without starting anything.
    pub async fn quote(&self, request: &TransferRequest) -> Result<FeeQuote, TransferError> {
        self.inner.orchestrator.quote(request).await
    }

    /// Import stuck funds of an account, holding the account lock meanwhile.
    pub async fn recover(
        &self,
        account_index: u32,
        cancel: &CancelToken,
    ) -> Result<RecoveryReport, TransferError> {
        let _guard = self.lock_account(account_index)?;
        let events = Mutex::new(Vec::new());
        let imports = recovery::import_stuck_funds(
            &self.inner.orchestrator,
            account_index,
            cancel,
            |event| {
                tracing::debug!(account_index = account_index, event = ?event, "Recovery event");
                events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
            },
        )
        .await?;

        Ok(RecoveryReport {
            account_index,
            imports,
            events: events.into_inner().unwrap_or_else(|e| e.into_inner()),
        })
    }
}

impl std::fmt::Debug for TransferService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferService")
            .field("active", &self.inner.active.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::amount::Amount;
    use crate::chain::client::ChainClients;
    use crate::chain::keyring::LocalKeyring;
    use crate::chain::keys::KeyCache;
    use crate::chain::signer::ChainSigner;
    use crate::chain::simulated::SimulatedNetwork;
    use crate::chain::types::{Chain, NetworkMode};
    use crate::transfer::orchestrator::OrchestratorSettings;
    use crate::transfer::store::{MemoryStore, TransferStore};
    use crate::transfer::types::FeePayment;
    use alloy::primitives::Address;
    use std::time::Duration;

    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn service(net: Arc<SimulatedNetwork>, store: MemoryStore) -> (TransferService, Address) {
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
        let clients = ChainClients::new(NetworkMode::Fuji, net, Duration::from_secs(1));
        let settings = OrchestratorSettings::default().with_time_unit(Duration::from_millis(5));
        let orchestrator = TransferOrchestrator::new(signer, clients, Arc::new(store), settings);
        (TransferService::new(orchestrator), owner)
    }

    fn request() -> TransferRequest {
        TransferRequest {
            amount: Amount::from(1_000_000),
            source_chain: Chain::P,
            destination_chain: Chain::C,
            account_index: 0,
            destination_address: Chain::C.format_address(Address::repeat_byte(0x42)),
            fee_payment: FeePayment::FromAmount,
        }
    }

    #[tokio::test]
    async fn test_second_transfer_for_busy_account_fails_fast() {
        let net = Arc::new(SimulatedNetwork::new());
        let (service, owner) = service(net.clone(), MemoryStore::new());
        net.fund(Chain::P, 0, owner, Amount::from(5_000_000));
        net.set_never_finalize(Chain::P, true);

        let first = service.start_transfer(request()).await.unwrap();
        let second = service.start_transfer(request()).await;
        assert!(matches!(second, Err(TransferError::AccountBusy(0))));

        let err = service.wait(&first).await.unwrap_err();
        assert!(matches!(err, TransferError::TransferStuck { .. }));

        // lock released once the task ends
        net.set_never_finalize(Chain::P, false);
        let resumed = service.resume(first.id).await.unwrap();
        service.wait(&resumed).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_request_is_not_spawned() {
        let net = Arc::new(SimulatedNetwork::new());
        let store = MemoryStore::new();
        let (service, _) = service(net, store.clone());
        let mut bad = request();
        bad.destination_chain = Chain::P;
        assert!(matches!(service.start_transfer(bad).await, Err(TransferError::InvalidRequest(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_after_export_suspends() {
        let net = Arc::new(SimulatedNetwork::new());
        let (service, owner) = service(net.clone(), MemoryStore::new());
        net.fund(Chain::P, 0, owner, Amount::from(5_000_000));
        net.set_finalize_after_polls(1_000);

        let handle = service.start_transfer(request()).await.unwrap();
        for _ in 0..200 {
            if service.get_progress(&handle).await.unwrap().phase == TransferPhase::AwaitingExportFinality {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        service.cancel(&handle).await.unwrap();

        let err = service.wait(&handle).await.unwrap_err();
        assert!(matches!(err, TransferError::Suspended { .. }));
        let state = service.get_progress(&handle).await.unwrap();
        assert_eq!(state.phase, TransferPhase::AwaitingExportFinality);
        assert!(state.is_resumable());
        assert_eq!(net.submissions(Chain::P), 1);
    }

    #[tokio::test]
    async fn test_resume_all_discards_unstarted_transfers() {
        let net = Arc::new(SimulatedNetwork::new());
        let store = MemoryStore::new();
        let (service, _) = service(net, store.clone());

        let unstarted = TransferState::new(request());
        store.save(&unstarted).await.unwrap();

        let handles = service.resume_all().await.unwrap();
        assert!(handles.is_empty());
        assert_eq!(store.load(&unstarted.id).await.unwrap().unwrap().phase, TransferPhase::Failed);
    }

    #[tokio::test]
    async fn test_unknown_transfer() {
        let net = Arc::new(SimulatedNetwork::new());
        let (service, _) = service(net, MemoryStore::new());
        let handle = TransferHandle { id: Uuid::new_v4() };
        assert!(matches!(service.get_progress(&handle).await, Err(TransferError::NotFound(_))));
        assert!(matches!(service.resume(handle.id).await, Err(TransferError::NotFound(_))));
        assert!(service.cancel(&handle).await.is_err());
    }
}
