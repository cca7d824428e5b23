//! Aggregate transaction statistics endpoint

use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::warn;

use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::payment_bridge::PaymentBridgeService;

#[derive(Clone)]
pub struct StatsState {
    pub service: Arc<PaymentBridgeService>,
}

/// GET /api/stats
pub async fn get_stats(
    State(state): State<StatsState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let stats = state.service.stats().await.map_err(|e| {
        match get_request_id_from_headers(&headers) {
            Some(id) => e.with_request_id(id),
            None => e,
        }
    })?;

    if !stats.is_consistent() {
        // Counts come from one aggregation query, so this indicates a bug
        warn!(
            total = stats.total_transactions,
            "status counts do not partition the transaction total"
        );
    }

    Ok(Json(stats))
}
