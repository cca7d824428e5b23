use crate::payments::error::PaymentResult;
use crate::payments::types::{StkCallbackEvent, StkPushRequest, StkPushResponse, StkStatusVerdict};
use async_trait::async_trait;

/// Seam between the bridge service and the STK push provider.
///
/// The production implementation talks to Daraja; tests swap in a mock.
#[async_trait]
pub trait StkPushProvider: Send + Sync {
    /// Push an STK prompt to the customer's handset.
    async fn initiate_stk_push(&self, request: StkPushRequest) -> PaymentResult<StkPushResponse>;

    /// Query the provider for the current verdict on a checkout.
    async fn query_status(&self, checkout_request_id: &str) -> PaymentResult<StkStatusVerdict>;

    /// Parse a raw callback body into a callback event.
    fn parse_callback(&self, payload: &[u8]) -> PaymentResult<StkCallbackEvent>;

    fn name(&self) -> &'static str;

    /// Cheap reachability probe for the health endpoint.
    async fn health_check(&self) -> PaymentResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::error::PaymentError;

    struct MockProvider;

    #[async_trait]
    impl StkPushProvider for MockProvider {
        async fn initiate_stk_push(
            &self,
            _request: StkPushRequest,
        ) -> PaymentResult<StkPushResponse> {
            Ok(StkPushResponse {
                merchant_request_id: "29115-34620561-1".to_string(),
                checkout_request_id: "ws_CO_mock".to_string(),
                response_code: "0".to_string(),
                response_description: "Success. Request accepted for processing".to_string(),
                customer_message: "Success. Request accepted for processing".to_string(),
            })
        }

        async fn query_status(
            &self,
            _checkout_request_id: &str,
        ) -> PaymentResult<StkStatusVerdict> {
            Ok(StkStatusVerdict::StillPending)
        }

        fn parse_callback(&self, _payload: &[u8]) -> PaymentResult<StkCallbackEvent> {
            Err(PaymentError::ValidationError {
                message: "not implemented".to_string(),
                field: None,
            })
        }

        fn name(&self) -> &'static str {
            "mock"
        }

        async fn health_check(&self) -> PaymentResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_provider() {
        let provider: Box<dyn StkPushProvider> = Box::new(MockProvider);
        let response = provider
            .initiate_stk_push(StkPushRequest {
                phone_number: "254712345678".to_string(),
                amount_kes: 12900,
                account_reference: "BlockCoop".to_string(),
                description: "Package purchase".to_string(),
            })
            .await
            .expect("stk push should succeed");
        assert_eq!(response.checkout_request_id, "ws_CO_mock");

        let verdict = provider.query_status("ws_CO_mock").await.unwrap();
        assert_eq!(verdict, StkStatusVerdict::StillPending);
    }
}
