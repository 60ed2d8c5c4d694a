//! End-to-end transfers over the simulated network.

use std::sync::Arc;

use xchain_transfer::chain::amount::Amount;
use xchain_transfer::chain::types::{Chain, TransactionStatus};
use xchain_transfer::lifecycle::CancelToken;
use xchain_transfer::transfer::{
    FeePayment, MemoryStore, TransferPhase, TransferState, TransferStore,
};

mod common;

use common::{harness, recipient, request};

#[tokio::test]
async fn test_p_to_c_fees_on_top_realizes_requested_amount() {
    let store = MemoryStore::new();
    let h = harness(Arc::new(store.clone()), true);
    h.net.fund(Chain::P, 0, h.owner, Amount::from(2_000_000));

    let handle = h
        .service
        .start_transfer(request(1_000_000, Chain::P, Chain::C, FeePayment::OnTop))
        .await
        .unwrap();
    let report = h.service.wait(&handle).await.unwrap();

    assert_eq!(report.realized_amount, Amount::from(1_000_000));
    assert_eq!(report.export_fee, Amount::from(300));
    assert_eq!(report.import_fee, Amount::from(300));
    assert_eq!(report.total_fee, Amount::from(600));
    assert_ne!(report.export_tx_id, report.import_tx_id);

    let state = store.load(&handle.id).await.unwrap().unwrap();
    assert_eq!(state.phase, TransferPhase::Complete);
    assert_eq!(state.export_tx.as_ref().unwrap().amount, Amount::from(1_000_300));
    assert_eq!(state.export_status, Some(TransactionStatus::Committed));
    assert!(state.import_status.unwrap().is_success());

    let quote = state.quote.unwrap();
    assert_eq!(quote.exported_amount, Amount::from(1_000_300));
    assert_eq!(quote.source_debit, Amount::from(1_000_600));
    assert_eq!(quote.expected_realized, Amount::from(1_000_000));

    assert_eq!(h.net.balance(Chain::C, recipient()), Amount::from(1_000_000));
    assert_eq!(h.net.balance(Chain::P, h.owner), Amount::from(999_400));
    assert!(h.net.pending(Chain::C).is_empty());
}

#[tokio::test]
async fn test_fees_from_amount_conserve_value() {
    let h = harness(Arc::new(MemoryStore::new()), false);
    h.net.fund(Chain::P, 0, h.owner, Amount::from(600_000));
    h.net.fund(Chain::P, 0, h.owner, Amount::from(600_000));

    let requested = Amount::from(1_000_000);
    let mut state = TransferState::new(request(1_000_000, Chain::P, Chain::C, FeePayment::FromAmount));
    let report = h.orchestrator.run(&mut state, &CancelToken::new()).await.unwrap();

    assert!(!report.export_fee.is_zero());
    assert!(!report.import_fee.is_zero());
    let expected = requested
        .checked_sub(report.export_fee)
        .and_then(|r| r.checked_sub(report.import_fee))
        .unwrap();
    assert_eq!(report.realized_amount, expected);
    assert!(report.realized_amount < requested);

    assert_eq!(h.net.balance(Chain::C, recipient()), report.realized_amount);
    // the source is debited exactly the requested amount
    assert_eq!(h.net.balance(Chain::P, h.owner), Amount::from(200_000));
}

#[tokio::test]
async fn test_c_to_p_transfer() {
    let h = harness(Arc::new(MemoryStore::new()), false);
    h.net.fund(Chain::C, 0, h.owner, Amount::from(5_000_000));

    let mut state = TransferState::new(request(2_000_000, Chain::C, Chain::P, FeePayment::FromAmount));
    let report = h.orchestrator.run(&mut state, &CancelToken::new()).await.unwrap();

    assert_eq!(state.phase, TransferPhase::Complete);
    assert_eq!(h.net.balance(Chain::P, recipient()), report.realized_amount);
    assert_eq!(h.net.balance(Chain::C, h.owner), Amount::from(3_000_000));
    // the P-chain fee floor applies to the import
    assert!(report.import_fee >= Amount::from(100));
}

#[tokio::test]
async fn test_status_outage_is_absorbed_by_polling() {
    let h = harness(Arc::new(MemoryStore::new()), false);
    h.net.fund(Chain::P, 0, h.owner, Amount::from(2_000_000));
    h.net.fail_next_status_queries(2);

    let mut state = TransferState::new(request(1_000_000, Chain::P, Chain::C, FeePayment::FromAmount));
    h.orchestrator.run(&mut state, &CancelToken::new()).await.unwrap();
    assert_eq!(state.phase, TransferPhase::Complete);
}

#[tokio::test]
async fn test_import_fee_follows_fresh_destination_base_fee() {
    let h = harness(Arc::new(MemoryStore::new()), true);
    h.net.fund(Chain::P, 0, h.owner, Amount::from(2_000_000));
    h.net.set_finalize_after_polls(2);

    let cancel = CancelToken::new();
    let mut state = TransferState::new(request(1_000_000, Chain::P, Chain::C, FeePayment::FromAmount));

    // stop once the export is on chain, then raise the destination fee
    h.net.set_never_finalize(Chain::P, true);
    let err = h.orchestrator.run(&mut state, &cancel).await.unwrap_err();
    assert!(err.export_submitted());
    assert_eq!(state.quote.as_ref().unwrap().import_fee, Amount::from(300));

    h.net.set_never_finalize(Chain::P, false);
    h.net.set_base_fee(Chain::C, Amount::from(2));
    let report = h.orchestrator.run(&mut state, &cancel).await.unwrap();

    assert_eq!(report.import_fee, Amount::from(600));
    assert_eq!(report.realized_amount, Amount::from(1_000_000 - 300 - 600));
}
