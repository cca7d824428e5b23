//! Payment and bridge endpoints
//!
//! The callback endpoint always acknowledges with ResultCode 0. Daraja
//! retries on anything else, and a replayed callback is harmless, so
//! processing failures are logged rather than surfaced to the provider.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::payment_bridge::{
    CallbackOutcome, InitiatePurchaseRequest, PaymentBridgeService,
};

#[derive(Clone)]
pub struct PaymentsState {
    pub service: Arc<PaymentBridgeService>,
}

fn tag_request_id(error: AppError, request_id: Option<String>) -> AppError {
    match request_id {
        Some(id) => error.with_request_id(id),
        None => error,
    }
}

/// POST /api/payments/initiate
pub async fn initiate_payment(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Json(request): Json<InitiatePurchaseRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    info!(
        wallet_address = %request.wallet_address,
        package_id = request.package_id,
        amount_usd = request.amount_usd,
        "Payment initiation request"
    );

    let transaction = state
        .service
        .initiate_purchase(request)
        .await
        .map_err(|e| tag_request_id(e, request_id))?;

    Ok((StatusCode::CREATED, Json(transaction)))
}

/// POST /api/payments/callback
///
/// Always returns 200 with a Daraja-shaped acknowledgement.
pub async fn handle_callback(
    State(state): State<PaymentsState>,
    body: Bytes,
) -> impl IntoResponse {
    match state.service.handle_callback(&body).await {
        Ok(CallbackOutcome::Completed { transaction_id }) => {
            info!(transaction_id = %transaction_id, "Callback completed payment");
        }
        Ok(CallbackOutcome::Failed { transaction_id }) => {
            info!(transaction_id = %transaction_id, "Callback recorded payment failure");
        }
        Ok(CallbackOutcome::AlreadySettled) => {
            info!("Callback replay ignored, transaction already settled");
        }
        Ok(CallbackOutcome::UnknownCheckout) => {
            warn!("Callback for unknown checkout request");
        }
        Err(e) => {
            // Acknowledge anyway; a non-200 just makes Daraja replay it
            error!(error = %e, "Callback processing failed");
        }
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "ResultCode": 0,
            "ResultDesc": "Accepted",
        })),
    )
}

/// GET /api/payments/status/{checkout_request_id}
pub async fn get_payment_status(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Path(checkout_request_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    let transaction = state
        .service
        .query_status(&checkout_request_id)
        .await
        .map_err(|e| tag_request_id(e, request_id))?;

    Ok(Json(transaction))
}

#[derive(Debug, Deserialize)]
pub struct WalletTransactionsQuery {
    pub limit: Option<i64>,
}

/// GET /api/transactions/wallet/{address}
pub async fn get_wallet_transactions(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Path(address): Path<String>,
    Query(params): Query<WalletTransactionsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    let limit = params.limit.unwrap_or(50).clamp(1, 200);

    let transactions = state
        .service
        .wallet_transactions(&address, limit)
        .await
        .map_err(|e| tag_request_id(e, request_id))?;

    Ok(Json(transactions))
}

/// GET /api/bridge/{transaction_id}
pub async fn get_bridge(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Path(transaction_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    let bridge = state
        .service
        .get_bridge(&transaction_id)
        .await
        .map_err(|e| tag_request_id(e, request_id))?;

    Ok(Json(bridge))
}

/// POST /api/bridge/{transaction_id}/retry
pub async fn retry_bridge(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Path(transaction_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    info!(transaction_id = %transaction_id, "Bridge retry requested");

    let bridge = state
        .service
        .retry_bridge(&transaction_id)
        .await
        .map_err(|e| tag_request_id(e, request_id))?;

    Ok((StatusCode::ACCEPTED, Json(bridge)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::bridge_repository::BridgeRepository;
    use crate::database::transaction_repository::TransactionRepository;
    use crate::database::{init_pool, init_schema, PoolConfig};
    use crate::payments::error::{PaymentError, PaymentResult};
    use crate::payments::provider::StkPushProvider;
    use crate::payments::types::{
        StkCallbackEvent, StkPushRequest, StkPushResponse, StkStatusVerdict,
    };
    use crate::services::payment_bridge::BridgeServiceConfig;
    use async_trait::async_trait;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    struct StubProvider;

    #[async_trait]
    impl StkPushProvider for StubProvider {
        async fn initiate_stk_push(
            &self,
            _request: StkPushRequest,
        ) -> PaymentResult<StkPushResponse> {
            Ok(StkPushResponse {
                merchant_request_id: "merchant-0".to_string(),
                checkout_request_id: "ws_CO_api_test".to_string(),
                response_code: "0".to_string(),
                response_description: "Success".to_string(),
                customer_message: "Success".to_string(),
            })
        }

        async fn query_status(
            &self,
            _checkout_request_id: &str,
        ) -> PaymentResult<StkStatusVerdict> {
            Ok(StkStatusVerdict::StillPending)
        }

        fn parse_callback(&self, payload: &[u8]) -> PaymentResult<StkCallbackEvent> {
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: e.to_string(),
                field: None,
            })
        }

        fn name(&self) -> &'static str {
            "stub"
        }

        async fn health_check(&self) -> PaymentResult<()> {
            Ok(())
        }
    }

    async fn callback_router() -> Router {
        let pool = init_pool("sqlite::memory:", Some(PoolConfig::default()))
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();

        let service = Arc::new(PaymentBridgeService::new(
            Arc::new(TransactionRepository::new(pool.clone())),
            Arc::new(BridgeRepository::new(pool)),
            Arc::new(StubProvider),
            BridgeServiceConfig::default(),
        ));
        Router::new()
            .route("/api/payments/callback", post(handle_callback))
            .with_state(PaymentsState { service })
    }

    async fn post_callback(router: Router, body: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/payments/callback")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn callback_acks_unknown_checkout() {
        let router = callback_router().await;
        let payload = serde_json::json!({
            "merchant_request_id": "merchant-0",
            "checkout_request_id": "ws_CO_never_seen",
            "result_code": 0,
            "result_desc": "Success",
            "mpesa_receipt": "NLJ7RT61SV",
            "amount_kes": 12900.0,
            "phone_number": "254712345678",
        })
        .to_string();

        let (status, body) = post_callback(router, &payload).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ResultCode"], 0);
    }

    #[tokio::test]
    async fn callback_acks_even_when_payload_is_garbage() {
        let router = callback_router().await;

        let (status, body) = post_callback(router, "not json at all").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ResultCode"], 0);
        assert_eq!(body["ResultDesc"], "Accepted");
    }
}
