//! Capability detection and send-path selection against scripted endpoints.

use zmail_core::cancel::CancelToken;
use zmail_core::constants::MEMO_SIZE;
use zmail_core::error::{TxFailureKind, ZmailError};
use zmail_core::types::{ProviderType, SpendingKey};
use zmail_rpc::{SendStrategy, TransactionRequest};
use zmail_tests::helpers::*;

fn request() -> TransactionRequest {
    TransactionRequest {
        from: "zs1sender".into(),
        to: "zs1recipient".into(),
        amount: 10_000,
        memo: [0xF6; MEMO_SIZE],
        fee: None,
    }
}

fn key() -> SpendingKey {
    SpendingKey::new("secret-extended-key-main1routing")
}

fn failure_kind(err: ZmailError) -> TxFailureKind {
    match err {
        ZmailError::TransactionFailed { kind, .. } => kind,
        other => panic!("expected a transaction failure, got {other:?}"),
    }
}

#[tokio::test]
async fn loopback_endpoint_trusted_after_one_call() {
    let chain = SimChain::local();
    let router = router(&chain);

    let strategy = router.select_strategy().await.unwrap();
    assert_eq!(strategy.name(), "wallet-rpc");
    assert_eq!(chain.calls(), vec!["getinfo"]);
}

#[tokio::test]
async fn remote_wallet_detection_has_no_side_effects() {
    let chain = SimChain::new(REMOTE_ENDPOINT, SimFeatures::FULL);
    let router = router(&chain);

    let caps = router.refresh().await;
    assert!(!caps.is_local_node);
    assert_eq!(caps.provider_type, ProviderType::Unknown);
    assert!(caps.supports_wallet_methods);
    assert!(caps.supports_wallet_send());
    assert!(caps.supports_send_raw_transaction);
    assert_eq!(router.select_strategy().await.unwrap().name(), "wallet-rpc");

    assert_eq!(chain.call_count("z_sendmany"), 1);
    assert_eq!(chain.call_count("z_importkey"), 1);
    assert!(chain.transactions().is_empty());
    assert_eq!(chain.imported_keys(), 0);
}

#[tokio::test]
async fn remote_without_wallet_uses_raw_transactions() {
    let chain = SimChain::new(REMOTE_ENDPOINT, SimFeatures::RAW_ONLY);
    let router = router(&chain);

    let outcome = router
        .send_transaction(&request(), &key(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(router.strategy_name(), Some("raw-transaction"));
    assert_eq!(outcome.operation_id, None);
    let txs = chain.transactions();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].txid, outcome.txid);
    assert_eq!(txs[0].to, "zs1recipient");
    assert_eq!(txs[0].amount, 10_000);
    assert_eq!(txs[0].memo, vec![0xF6; MEMO_SIZE]);
    assert_eq!(chain.call_count("z_getoperationstatus"), 0);
}

#[tokio::test(start_paused = true)]
async fn wallet_send_imports_key_and_polls() {
    let chain = SimChain::local();
    let router = router(&chain);

    let outcome = router
        .send_transaction(&request(), &key(), &CancelToken::new())
        .await
        .unwrap();

    assert!(outcome.operation_id.is_some());
    assert_eq!(chain.imported_keys(), 1);
    // One "executing" answer, then success.
    assert_eq!(chain.call_count("z_getoperationstatus"), 2);
    assert_eq!(chain.transactions()[0].txid, outcome.txid);
    assert_eq!(chain.transactions()[0].from.as_deref(), Some("zs1sender"));
}

#[tokio::test]
async fn unreachable_endpoint_offers_no_send_path() {
    let chain = SimChain::new(REMOTE_ENDPOINT, SimFeatures::OFFLINE);
    let router = router(&chain);

    let err = router
        .send_transaction(&request(), &key(), &CancelToken::new())
        .await
        .unwrap_err();
    assert_eq!(failure_kind(err.clone()), TxFailureKind::CapabilityMismatch);
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("sendrawtransaction"));
}

#[tokio::test]
async fn known_public_provider_classified() {
    let chain = SimChain::new("https://mainnet.zec.rocks:443", SimFeatures::RAW_ONLY);
    let router = router(&chain);

    let caps = router.refresh().await;
    assert_eq!(caps.provider_type, ProviderType::Public);
    assert!(!caps.is_local_node);
    assert!(!caps.supports_wallet_methods);
}

#[tokio::test]
async fn broadcast_rejections_classified() {
    let cases = [
        ("txn-already-known", TxFailureKind::AlreadyInChain),
        ("bad-txns-in-belowout", TxFailureKind::InsufficientFunds),
        ("64: non-final", TxFailureKind::NonFinal),
        ("something else entirely", TxFailureKind::Rejected),
    ];
    for (message, expected) in cases {
        let chain = SimChain::new(REMOTE_ENDPOINT, SimFeatures::RAW_ONLY);
        chain.reject_broadcasts(message);
        let err = router(&chain)
            .send_transaction(&request(), &key(), &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(failure_kind(err), expected, "{message}");
    }
}

#[tokio::test]
async fn strategy_cached_until_refresh() {
    let chain = SimChain::new(REMOTE_ENDPOINT, SimFeatures::RAW_ONLY);
    let router = router(&chain);
    assert_eq!(router.select_strategy().await.unwrap().name(), "raw-transaction");

    chain.set_features(SimFeatures::FULL);
    let detections = chain.call_count("getinfo");
    assert_eq!(router.select_strategy().await.unwrap().name(), "raw-transaction");
    assert_eq!(chain.call_count("getinfo"), detections);

    router.refresh().await;
    assert_eq!(router.select_strategy().await.unwrap().name(), "wallet-rpc");
}
