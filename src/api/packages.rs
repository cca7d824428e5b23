//! Package split preview endpoint

use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use serde::Deserialize;
use tracing::info;

use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::package_split::{compute_split, PackageTerms};

#[derive(Clone, Default)]
pub struct PackagesState;

#[derive(Debug, Deserialize)]
pub struct SplitRequest {
    pub amount_usd: String,
    pub terms: PackageTerms,
}

/// POST /api/packages/split
///
/// Pure arithmetic preview; nothing is persisted.
pub async fn compute_package_split(
    State(_state): State<PackagesState>,
    headers: HeaderMap,
    Json(request): Json<SplitRequest>,
) -> Result<impl IntoResponse, AppError> {
    info!(amount_usd = %request.amount_usd, "Package split preview requested");

    let breakdown = compute_split(&request.amount_usd, &request.terms).map_err(|e| {
        match get_request_id_from_headers(&headers) {
            Some(id) => e.with_request_id(id),
            None => e,
        }
    })?;

    Ok(Json(breakdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn split_endpoint_rejects_bad_terms() {
        let router = Router::new()
            .route("/api/packages/split", post(compute_package_split))
            .with_state(PackagesState);

        let payload = serde_json::json!({
            "amount_usd": "100",
            "terms": {
                "vesting_bps": 7000,
                "pool_bps": 2000,
                "treasury_bps": 500,
                "referral_bps": 499,
            }
        })
        .to_string();

        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/packages/split")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    }
}
