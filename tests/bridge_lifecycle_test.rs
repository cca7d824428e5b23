//! End-to-end lifecycle tests against an in-memory database.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use blockcoop_bridge::database::bridge_repository::BridgeRepository;
use blockcoop_bridge::database::transaction_repository::{
    NewTransaction, TransactionRepository,
};
use blockcoop_bridge::database::{init_pool, init_schema, PoolConfig};
use blockcoop_bridge::payments::error::{PaymentError, PaymentResult};
use blockcoop_bridge::payments::provider::StkPushProvider;
use blockcoop_bridge::payments::types::{
    StkCallbackEvent, StkPushRequest, StkPushResponse, StkStatusVerdict,
};
use blockcoop_bridge::services::payment_bridge::{
    BridgeServiceConfig, CallbackOutcome, InitiatePurchaseRequest, PaymentBridgeService,
};

struct SequentialProvider {
    counter: AtomicU64,
}

#[async_trait]
impl StkPushProvider for SequentialProvider {
    async fn initiate_stk_push(&self, _request: StkPushRequest) -> PaymentResult<StkPushResponse> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(StkPushResponse {
            merchant_request_id: format!("merchant-{}", n),
            checkout_request_id: format!("ws_CO_e2e_{}", n),
            response_code: "0".to_string(),
            response_description: "Success".to_string(),
            customer_message: "Success".to_string(),
        })
    }

    async fn query_status(&self, _checkout_request_id: &str) -> PaymentResult<StkStatusVerdict> {
        Ok(StkStatusVerdict::StillPending)
    }

    fn parse_callback(&self, payload: &[u8]) -> PaymentResult<StkCallbackEvent> {
        serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
            message: e.to_string(),
            field: None,
        })
    }

    fn name(&self) -> &'static str {
        "sequential"
    }

    async fn health_check(&self) -> PaymentResult<()> {
        Ok(())
    }
}

struct Harness {
    service: PaymentBridgeService,
    transactions: Arc<TransactionRepository>,
    bridges: Arc<BridgeRepository>,
}

async fn harness() -> Harness {
    let pool = init_pool("sqlite::memory:", Some(PoolConfig::default()))
        .await
        .unwrap();
    init_schema(&pool).await.unwrap();

    let transactions = Arc::new(TransactionRepository::new(pool.clone()));
    let bridges = Arc::new(BridgeRepository::new(pool));
    let service = PaymentBridgeService::new(
        transactions.clone(),
        bridges.clone(),
        Arc::new(SequentialProvider {
            counter: AtomicU64::new(0),
        }),
        BridgeServiceConfig::default(),
    );
    Harness {
        service,
        transactions,
        bridges,
    }
}

fn purchase(wallet: &str, amount_usd: f64) -> InitiatePurchaseRequest {
    InitiatePurchaseRequest {
        wallet_address: wallet.to_string(),
        package_id: 2,
        phone_number: "0712345678".to_string(),
        amount_usd,
        referrer_address: None,
    }
}

fn success_callback(checkout_id: &str) -> Vec<u8> {
    serde_json::json!({
        "merchant_request_id": "merchant-x",
        "checkout_request_id": checkout_id,
        "result_code": 0,
        "result_desc": "The service request is processed successfully.",
        "mpesa_receipt": "QGH7SK2M1P",
        "amount_kes": 6450.0,
        "phone_number": "254712345678",
    })
    .to_string()
    .into_bytes()
}

const WALLET: &str = "0x2222222222222222222222222222222222222222";

#[tokio::test]
async fn completed_payment_cannot_be_regressed_by_any_later_event() {
    let h = harness().await;
    let tx = h.service.initiate_purchase(purchase(WALLET, 50.0)).await.unwrap();
    let checkout = tx.checkout_request_id.clone().unwrap();

    h.service
        .handle_callback(&success_callback(&checkout))
        .await
        .unwrap();

    // Late failure callback, direct repository failure, and a timeout
    // attempt must all leave the row completed.
    let late_failure = serde_json::json!({
        "merchant_request_id": "merchant-x",
        "checkout_request_id": checkout,
        "result_code": 1032,
        "result_desc": "Request cancelled by user",
        "mpesa_receipt": null,
        "amount_kes": null,
        "phone_number": null,
    })
    .to_string()
    .into_bytes();
    let outcome = h.service.handle_callback(&late_failure).await.unwrap();
    assert_eq!(outcome, CallbackOutcome::AlreadySettled);

    let direct = h
        .transactions
        .mark_failed(&checkout, 1, "forced")
        .await
        .unwrap();
    assert!(direct.is_none());

    let timed = h.transactions.mark_timed_out(&tx.transaction_id).await.unwrap();
    assert!(timed.is_none());

    let row = h
        .transactions
        .find_by_transaction_id(&tx.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "completed");
    assert_eq!(row.mpesa_receipt.as_deref(), Some("QGH7SK2M1P"));
}

#[tokio::test]
async fn checkout_request_id_is_unique_across_transactions() {
    let h = harness().await;

    let row = NewTransaction {
        wallet_address: WALLET.to_string(),
        package_id: 1,
        phone_number: "254712345678".to_string(),
        amount_usd: 10.0,
        amount_kes: 1290.0,
        checkout_request_id: Some("ws_CO_dup".to_string()),
        merchant_request_id: None,
        referrer_address: None,
    };
    h.transactions.create(row.clone()).await.unwrap();

    let err = h.transactions.create(row).await.unwrap_err();
    assert!(err.is_unique_violation());

    let stats = h.service.stats().await.unwrap();
    assert_eq!(stats.total_transactions, 1);
}

#[tokio::test]
async fn stats_reflect_every_row_exactly_once() {
    let h = harness().await;

    // Three purchases: one completed, one failed, one left pending
    let completed = h.service.initiate_purchase(purchase(WALLET, 100.0)).await.unwrap();
    let failed = h.service.initiate_purchase(purchase(WALLET, 25.0)).await.unwrap();
    let _pending = h.service.initiate_purchase(purchase(WALLET, 10.0)).await.unwrap();

    h.service
        .handle_callback(&success_callback(
            completed.checkout_request_id.as_deref().unwrap(),
        ))
        .await
        .unwrap();
    h.transactions
        .mark_failed(
            failed.checkout_request_id.as_deref().unwrap(),
            1,
            "The balance is insufficient for the transaction",
        )
        .await
        .unwrap();

    let stats = h.service.stats().await.unwrap();
    assert_eq!(stats.total_transactions, 3);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.timeout, 0);
    assert!(stats.is_consistent());
    assert!((stats.total_usd_completed - 100.0).abs() < 1e-9);

    let package: Vec<_> = stats
        .packages
        .iter()
        .filter(|p| p.package_id == 2)
        .collect();
    assert_eq!(package.len(), 1);
    assert_eq!(package[0].purchases, 1);
}

#[tokio::test]
async fn replayed_callbacks_produce_one_bridge_and_one_state_change() {
    let h = harness().await;
    let tx = h.service.initiate_purchase(purchase(WALLET, 75.0)).await.unwrap();
    let checkout = tx.checkout_request_id.clone().unwrap();
    let payload = success_callback(&checkout);

    let first = h.service.handle_callback(&payload).await.unwrap();
    assert_eq!(
        first,
        CallbackOutcome::Completed {
            transaction_id: tx.transaction_id.clone()
        }
    );

    for _ in 0..3 {
        let outcome = h.service.handle_callback(&payload).await.unwrap();
        assert_eq!(outcome, CallbackOutcome::AlreadySettled);
    }

    let bridge = h
        .bridges
        .find_by_transaction(&tx.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bridge.status, "pending");
    assert_eq!(bridge.retry_count, 0);

    let stats = h.service.stats().await.unwrap();
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn referred_purchase_carries_referrer_into_the_bridge() {
    let h = harness().await;
    let referrer = "0x3333333333333333333333333333333333333333";

    let mut request = purchase(WALLET, 40.0);
    request.referrer_address = Some(referrer.to_string());
    let tx = h.service.initiate_purchase(request).await.unwrap();

    h.service
        .handle_callback(&success_callback(
            tx.checkout_request_id.as_deref().unwrap(),
        ))
        .await
        .unwrap();

    let bridge = h.service.get_bridge(&tx.transaction_id).await.unwrap();
    assert_eq!(bridge.referrer_address.as_deref(), Some(referrer));

    let stats = h.service.stats().await.unwrap();
    assert_eq!(stats.referred_purchases, 1);
    assert_eq!(stats.top_referrers.len(), 1);
    assert_eq!(stats.top_referrers[0].referrer_address, referrer);
    assert!((stats.top_referrers[0].total_usd - 40.0).abs() < 1e-9);
}
