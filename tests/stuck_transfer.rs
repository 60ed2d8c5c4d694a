//! Transfers whose export never finalizes, and their resumption.

use std::sync::Arc;

use xchain_transfer::chain::amount::Amount;
use xchain_transfer::chain::types::Chain;
use xchain_transfer::lifecycle::CancelToken;
use xchain_transfer::transfer::{
    FeePayment, JsonFileStore, MemoryStore, TransferError, TransferPhase, TransferState,
    TransferStore,
};

mod common;

use common::{harness, harness_on, recipient, request};

#[tokio::test]
async fn test_export_that_never_finalizes_is_kept_resumable() {
    let store = MemoryStore::new();
    let h = harness(Arc::new(store.clone()), false);
    h.net.fund(Chain::P, 0, h.owner, Amount::from(2_000_000));
    h.net.set_never_finalize(Chain::P, true);

    let mut state = TransferState::new(request(1_000_000, Chain::P, Chain::C, FeePayment::FromAmount));
    let err = h.orchestrator.run(&mut state, &CancelToken::new()).await.unwrap_err();

    let export_id = state.export_tx.as_ref().unwrap().id;
    match err {
        TransferError::TransferStuck { phase, tx_id } => {
            assert_eq!(phase, TransferPhase::AwaitingExportFinality);
            assert_eq!(tx_id, export_id);
        }
        other => panic!("expected TransferStuck, got {other:?}"),
    }
    assert_eq!(h.net.polls(Chain::P), 6);

    let persisted = store.load(&state.id).await.unwrap().unwrap();
    assert_eq!(persisted.phase, TransferPhase::AwaitingExportFinality);
    assert!(persisted.is_resumable());
    assert!(persisted.last_error.is_some());
}

#[tokio::test]
async fn test_resume_after_stuck_does_not_export_twice() {
    let store = MemoryStore::new();
    let h = harness(Arc::new(store.clone()), false);
    h.net.fund(Chain::P, 0, h.owner, Amount::from(2_000_000));
    h.net.set_never_finalize(Chain::P, true);

    let handle = h
        .service
        .start_transfer(request(1_000_000, Chain::P, Chain::C, FeePayment::FromAmount))
        .await
        .unwrap();
    let err = h.service.wait(&handle).await.unwrap_err();
    assert!(err.export_submitted());
    assert_eq!(h.net.submissions(Chain::P), 1);

    h.net.set_never_finalize(Chain::P, false);
    let resumed = h.service.resume(handle.id).await.unwrap();
    let report = h.service.wait(&resumed).await.unwrap();

    assert_eq!(h.net.submissions(Chain::P), 1);
    assert_eq!(h.net.submissions(Chain::C), 1);
    assert_eq!(h.net.balance(Chain::C, recipient()), report.realized_amount);
    assert_eq!(
        store.load(&handle.id).await.unwrap().unwrap().phase,
        TransferPhase::Complete
    );
}

#[tokio::test]
async fn test_resume_of_complete_transfer_is_rejected() {
    let h = harness(Arc::new(MemoryStore::new()), false);
    h.net.fund(Chain::P, 0, h.owner, Amount::from(2_000_000));

    let handle = h
        .service
        .start_transfer(request(1_000_000, Chain::P, Chain::C, FeePayment::FromAmount))
        .await
        .unwrap();
    h.service.wait(&handle).await.unwrap();

    let err = h.service.resume(handle.id).await.unwrap_err();
    assert!(matches!(err, TransferError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_restart_resumes_persisted_transfers() {
    let dir = tempfile::tempdir().unwrap();
    let first = harness(Arc::new(JsonFileStore::open(dir.path()).await.unwrap()), false);
    first.net.fund(Chain::P, 0, first.owner, Amount::from(2_000_000));
    first.net.set_never_finalize(Chain::P, true);

    let handle = first
        .service
        .start_transfer(request(1_000_000, Chain::P, Chain::C, FeePayment::FromAmount))
        .await
        .unwrap();
    assert!(first.service.wait(&handle).await.is_err());

    // a second node over the same network and directory
    let net = first.net.clone();
    drop(first);
    net.set_never_finalize(Chain::P, false);
    let second = harness_on(net, Arc::new(JsonFileStore::open(dir.path()).await.unwrap()), false);

    let handles = second.service.resume_all().await.unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].id, handle.id);

    let report = second.service.wait(&handles[0]).await.unwrap();
    assert_eq!(second.net.submissions(Chain::P), 1);
    assert_eq!(second.net.balance(Chain::C, recipient()), report.realized_amount);

    let state = second.service.get_progress(&handle).await.unwrap();
    assert_eq!(state.phase, TransferPhase::Complete);
    assert!(!state.is_resumable());
}
