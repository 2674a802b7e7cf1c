mod common;

use alloy::primitives::{address, U256};
use common::{FakeChain, WALLET_KEY};
use liquidity_orchestrator::clients::{ChainClients, TxCall};
use liquidity_orchestrator::error::{ChainError, NonceErrorKind, OrchestratorError};
use liquidity_orchestrator::signing::{NonceManager, TransactionSubmitter, Wallet};
use std::collections::HashSet;
use std::sync::Arc;

struct Harness {
    chain: Arc<FakeChain>,
    nonces: Arc<NonceManager>,
    submitter: Arc<TransactionSubmitter>,
}

async fn harness(pending_count: u64) -> Harness {
    let wallet = Arc::new(Wallet::from_private_key(WALLET_KEY).unwrap());
    let chain = Arc::new(FakeChain::new(1, pending_count));
    let chains = ChainClients::new().with(chain.clone());
    let nonces = Arc::new(NonceManager::new(wallet.address(), chains.clone()));
    nonces.initialize_chain(1).await.unwrap();
    let submitter = Arc::new(TransactionSubmitter::new(nonces.clone(), chains, wallet));
    Harness {
        chain,
        nonces,
        submitter,
    }
}

fn transfer_call() -> TxCall {
    TxCall::native_transfer(address!("00000000000000000000000000000000000000cc"), U256::from(1u64))
}

#[tokio::test]
async fn commit_advances_and_release_keeps_the_nonce() {
    let h = harness(5).await;

    let first = h.nonces.reserve_nonce(1).await.unwrap();
    assert_eq!(first.nonce(), 5);
    assert!(first.commit());

    let second = h.nonces.reserve_nonce(1).await.unwrap();
    assert_eq!(second.nonce(), 6);
    second.release();

    let third = h.nonces.reserve_nonce(1).await.unwrap();
    assert_eq!(third.nonce(), 6);
}

#[tokio::test]
async fn stale_commit_after_reset_is_skipped() {
    let h = harness(5).await;

    let reservation = h.nonces.reserve_nonce(1).await.unwrap();
    assert_eq!(reservation.nonce(), 5);
    h.chain.set_pending_count(12);

    assert_eq!(h.nonces.reset_chain(1).await.unwrap(), 12);
    assert!(!reservation.commit());
    assert_eq!(h.nonces.current_nonce(1), Some(12));
}

#[tokio::test]
async fn uninitialized_chain_is_rejected() {
    let h = harness(0).await;
    assert!(matches!(
        h.nonces.reserve_nonce(137).await,
        Err(OrchestratorError::ChainNotInitialized(137))
    ));
}

#[tokio::test]
async fn gas_estimation_failure_releases_the_nonce() {
    let h = harness(5).await;
    h.chain.fail_estimates(true);

    let err = h.submitter.submit(1, transfer_call()).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Chain {
            source: ChainError::GasEstimation(_),
            ..
        }
    ));
    assert!(err.is_transient());
    assert_eq!(h.nonces.current_nonce(1), Some(5));
    assert!(h.chain.sent_nonces().is_empty());

    h.chain.fail_estimates(false);
    h.submitter.submit(1, transfer_call()).await.unwrap();
    assert_eq!(h.chain.sent_nonces(), vec![5]);
}

#[tokio::test]
async fn nonce_error_on_broadcast_resets_from_network() {
    let h = harness(5).await;
    h.chain.set_pending_count(9);
    h.chain.push_send_error(ChainError::Nonce {
        kind: NonceErrorKind::TooLow,
        message: "nonce too low".into(),
    });

    let err = h.submitter.submit(1, transfer_call()).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::NonceDesync {
            chain_id: 1,
            kind: NonceErrorKind::TooLow,
            ..
        }
    ));
    assert_eq!(h.nonces.current_nonce(1), Some(9));

    h.submitter.submit(1, transfer_call()).await.unwrap();
    assert_eq!(h.chain.sent_nonces(), vec![9]);
    assert_eq!(h.nonces.current_nonce(1), Some(10));
}

#[tokio::test]
async fn reverted_transaction_still_consumes_its_nonce() {
    let h = harness(3).await;
    h.chain.revert_all(true);

    let err = h.submitter.submit(1, transfer_call()).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Chain {
            source: ChainError::Reverted { .. },
            ..
        }
    ));
    assert_eq!(h.nonces.current_nonce(1), Some(4));
}

#[tokio::test]
async fn concurrent_submissions_get_distinct_contiguous_nonces() {
    let h = harness(20).await;

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let submitter = h.submitter.clone();
        tasks.push(tokio::spawn(async move { submitter.submit(1, transfer_call()).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let nonces: HashSet<u64> = h.chain.sent_nonces().into_iter().collect();
    assert_eq!(nonces, (20..30).collect::<HashSet<_>>());
    assert_eq!(h.nonces.current_nonce(1), Some(30));
}

#[tokio::test]
async fn reset_during_broadcast_never_reuses_the_sent_nonce() {
    let h = harness(5).await;
    let (parked, release) = h.chain.hold_sends();

    let submitter = h.submitter.clone();
    let first = tokio::spawn(async move { submitter.submit(1, transfer_call()).await });

    // The node has not seen the transaction yet, so the reset reads 5.
    parked.notified().await;
    assert_eq!(h.nonces.reset_chain(1).await.unwrap(), 5);
    release.notify_one();

    first.await.unwrap().unwrap();
    assert_eq!(h.nonces.current_nonce(1), Some(6));

    h.submitter.submit(1, transfer_call()).await.unwrap();
    assert_eq!(h.chain.sent_nonces(), vec![5, 6]);
}

#[test]
fn broadcast_note_on_unknown_chain_is_ignored() {
    let nonces = NonceManager::new(
        Wallet::from_private_key(WALLET_KEY).unwrap().address(),
        ChainClients::new(),
    );
    assert_eq!(nonces.note_broadcast(1, 3), None);
}

#[tokio::test]
async fn broadcast_note_keeps_a_higher_network_count() {
    let h = harness(12).await;
    assert_eq!(h.nonces.note_broadcast(1, 5), Some(12));
    assert_eq!(h.nonces.note_broadcast(1, 12), Some(13));
}
