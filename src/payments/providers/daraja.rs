//! Safaricom Daraja STK push provider
//!
//! Handles OAuth token caching, STK push initiation, status queries and
//! callback parsing for the M-Pesa Express (Lipa na M-Pesa Online) API.

use crate::config::MpesaConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::StkPushProvider;
use crate::payments::types::{
    StkCallbackEvent, StkPushRequest, StkPushResponse, StkStatusVerdict,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DarajaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub base_url: String,
    pub callback_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl DarajaConfig {
    pub fn from_mpesa_config(config: &MpesaConfig) -> Self {
        Self {
            consumer_key: config.consumer_key.clone(),
            consumer_secret: config.consumer_secret.clone(),
            shortcode: config.shortcode.clone(),
            passkey: config.passkey.clone(),
            base_url: config.base_url.clone(),
            callback_url: config.callback_url.clone(),
            timeout_secs: config.request_timeout,
            max_retries: config.max_retries,
        }
    }
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct DarajaProvider {
    config: DarajaConfig,
    http: PaymentHttpClient,
    /// Zero-retry client for the query endpoint: a pending payment comes
    /// back as an HTTP 500 there, and retrying with backoff just burns
    /// sleeps on every poll. The monitor re-polls anyway.
    status_http: PaymentHttpClient,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct OAuthResponse {
    access_token: String,
    /// Daraja returns this as a string of seconds
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct StkPushRawResponse {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    response_code: String,
    #[serde(rename = "ResponseDescription")]
    response_description: String,
    #[serde(rename = "CustomerMessage")]
    customer_message: String,
}

#[derive(Debug, Deserialize)]
struct StkQueryRawResponse {
    #[serde(rename = "ResponseCode")]
    #[allow(dead_code)]
    response_code: String,
    #[serde(rename = "ResultCode")]
    result_code: String,
    #[serde(rename = "ResultDesc")]
    result_desc: String,
}

#[derive(Debug, Deserialize)]
struct CallbackEnvelope {
    #[serde(rename = "Body")]
    body: CallbackBody,
}

#[derive(Debug, Deserialize)]
struct CallbackBody {
    #[serde(rename = "stkCallback")]
    stk_callback: RawStkCallback,
}

#[derive(Debug, Deserialize)]
struct RawStkCallback {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    result_code: i64,
    #[serde(rename = "ResultDesc")]
    result_desc: String,
    #[serde(rename = "CallbackMetadata")]
    callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
struct CallbackMetadata {
    #[serde(rename = "Item")]
    item: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
struct CallbackItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    value: Option<serde_json::Value>,
}

/// Daraja's "still processing" error code on the query endpoint
const PROCESSING_ERROR_CODE: &str = "500.001.1001";

impl DarajaProvider {
    pub fn new(config: DarajaConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        let status_http = PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), 0)?;
        Ok(Self {
            config,
            http,
            status_http,
            token: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Password for STK requests: base64(shortcode + passkey + timestamp)
    fn credentials(&self) -> (String, String) {
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = base64::engine::general_purpose::STANDARD.encode(format!(
            "{}{}{}",
            self.config.shortcode, self.config.passkey, timestamp
        ));
        (password, timestamp)
    }

    /// Fetch the OAuth bearer token, reusing the cached one until shortly
    /// before it expires.
    async fn access_token(&self) -> PaymentResult<String> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.token.clone());
            }
        }

        let raw: OAuthResponse = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint("/oauth/v1/generate?grant_type=client_credentials"),
                None,
                Some((&self.config.consumer_key, &self.config.consumer_secret)),
                None,
            )
            .await?;

        let ttl_secs = raw.expires_in.parse::<u64>().unwrap_or(3599);
        // Refresh a minute early so in-flight requests never carry a stale token
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs.saturating_sub(60));

        debug!(ttl_secs, "Daraja OAuth token refreshed");
        *guard = Some(CachedToken {
            token: raw.access_token.clone(),
            expires_at,
        });

        Ok(raw.access_token)
    }
}

#[async_trait]
impl StkPushProvider for DarajaProvider {
    async fn initiate_stk_push(&self, request: StkPushRequest) -> PaymentResult<StkPushResponse> {
        if request.amount_kes == 0 {
            return Err(PaymentError::ValidationError {
                message: "amount must be at least 1 KES".to_string(),
                field: Some("amount_kes".to_string()),
            });
        }

        let token = self.access_token().await?;
        let (password, timestamp) = self.credentials();

        let payload = serde_json::json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": password,
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": request.amount_kes,
            "PartyA": request.phone_number,
            "PartyB": self.config.shortcode,
            "PhoneNumber": request.phone_number,
            "CallBackURL": self.config.callback_url,
            "AccountReference": request.account_reference,
            "TransactionDesc": request.description,
        });

        let raw: StkPushRawResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/mpesa/stkpush/v1/processrequest"),
                Some(&token),
                None,
                Some(&payload),
            )
            .await?;

        if raw.response_code != "0" {
            return Err(PaymentError::ProviderError {
                provider: "daraja".to_string(),
                message: raw.response_description,
                provider_code: Some(raw.response_code),
                retryable: false,
            });
        }

        info!(
            checkout_request_id = %raw.checkout_request_id,
            "STK push accepted by Daraja"
        );

        Ok(StkPushResponse {
            merchant_request_id: raw.merchant_request_id,
            checkout_request_id: raw.checkout_request_id,
            response_code: raw.response_code,
            response_description: raw.response_description,
            customer_message: raw.customer_message,
        })
    }

    async fn query_status(&self, checkout_request_id: &str) -> PaymentResult<StkStatusVerdict> {
        let token = self.access_token().await?;
        let (password, timestamp) = self.credentials();

        let payload = serde_json::json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": password,
            "Timestamp": timestamp,
            "CheckoutRequestID": checkout_request_id,
        });

        let result: PaymentResult<StkQueryRawResponse> = self
            .status_http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/mpesa/stkpushquery/v1/query"),
                Some(&token),
                None,
                Some(&payload),
            )
            .await;

        match result {
            Ok(raw) => {
                let result_code = raw.result_code.parse::<i64>().unwrap_or(-1);
                if result_code == 0 {
                    Ok(StkStatusVerdict::Completed)
                } else {
                    Ok(StkStatusVerdict::Failed {
                        result_code,
                        result_desc: raw.result_desc,
                    })
                }
            }
            // The query endpoint reports "still processing" as an error
            Err(PaymentError::ProviderError { message, .. })
                if message.contains(PROCESSING_ERROR_CODE) =>
            {
                Ok(StkStatusVerdict::StillPending)
            }
            Err(e) => Err(e),
        }
    }

    fn parse_callback(&self, payload: &[u8]) -> PaymentResult<StkCallbackEvent> {
        let envelope: CallbackEnvelope =
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: format!("malformed STK callback payload: {}", e),
                field: None,
            })?;

        let raw = envelope.body.stk_callback;
        let mut mpesa_receipt = None;
        let mut amount_kes = None;
        let mut phone_number = None;

        if let Some(metadata) = raw.callback_metadata {
            for item in metadata.item {
                match (item.name.as_str(), item.value) {
                    ("MpesaReceiptNumber", Some(v)) => {
                        mpesa_receipt = v.as_str().map(|s| s.to_string());
                    }
                    ("Amount", Some(v)) => {
                        amount_kes = v.as_f64();
                    }
                    ("PhoneNumber", Some(v)) => {
                        phone_number = match v {
                            serde_json::Value::String(s) => Some(s),
                            serde_json::Value::Number(n) => Some(n.to_string()),
                            _ => None,
                        };
                    }
                    _ => {}
                }
            }
        }

        Ok(StkCallbackEvent {
            merchant_request_id: raw.merchant_request_id,
            checkout_request_id: raw.checkout_request_id,
            result_code: raw.result_code,
            result_desc: raw.result_desc,
            mpesa_receipt,
            amount_kes,
            phone_number,
        })
    }

    fn name(&self) -> &'static str {
        "daraja"
    }

    async fn health_check(&self) -> PaymentResult<()> {
        self.access_token().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn test_config() -> DarajaConfig {
        DarajaConfig {
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            shortcode: "174379".to_string(),
            passkey: "passkey".to_string(),
            base_url: "https://sandbox.safaricom.co.ke".to_string(),
            callback_url: "https://bridge.example.com/api/payments/callback".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }

    #[test]
    fn password_is_base64_of_shortcode_passkey_timestamp() {
        let provider = DarajaProvider::new(test_config()).unwrap();
        let (password, timestamp) = provider.credentials();

        assert_eq!(timestamp.len(), 14);
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&password)
            .unwrap();
        let decoded = String::from_utf8(decoded).unwrap();
        assert_eq!(decoded, format!("174379passkey{}", timestamp));
    }

    #[test]
    fn parse_successful_callback() {
        let provider = DarajaProvider::new(test_config()).unwrap();
        let payload = serde_json::json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "Amount", "Value": 12900.00},
                            {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                            {"Name": "TransactionDate", "Value": 20191219102115u64},
                            {"Name": "PhoneNumber", "Value": 254712345678u64}
                        ]
                    }
                }
            }
        });

        let event = provider
            .parse_callback(payload.to_string().as_bytes())
            .unwrap();
        assert!(event.is_success());
        assert_eq!(event.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(event.mpesa_receipt.as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(event.amount_kes, Some(12900.0));
        assert_eq!(event.phone_number.as_deref(), Some("254712345678"));
    }

    #[test]
    fn parse_cancelled_callback_without_metadata() {
        let provider = DarajaProvider::new(test_config()).unwrap();
        let payload = serde_json::json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        });

        let event = provider
            .parse_callback(payload.to_string().as_bytes())
            .unwrap();
        assert!(!event.is_success());
        assert_eq!(event.result_code, 1032);
        assert!(event.mpesa_receipt.is_none());
    }

    #[test]
    fn parse_rejects_malformed_payload() {
        let provider = DarajaProvider::new(test_config()).unwrap();
        assert!(provider.parse_callback(b"not json").is_err());
        assert!(provider.parse_callback(b"{\"Body\":{}}").is_err());
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let headers = String::from_utf8_lossy(&buf[..header_end]);
            let content_length = headers
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                break;
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    async fn write_response(stream: &mut TcpStream, status: &str, body: &str) {
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn still_processing_query_is_not_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let query_hits = Arc::new(AtomicUsize::new(0));

        let hits = query_hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let hits = hits.clone();
                tokio::spawn(async move {
                    let request = read_request(&mut stream).await;
                    if request.contains("/oauth/") {
                        write_response(
                            &mut stream,
                            "200 OK",
                            r#"{"access_token":"token","expires_in":"3599"}"#,
                        )
                        .await;
                    } else {
                        hits.fetch_add(1, Ordering::SeqCst);
                        write_response(
                            &mut stream,
                            "500 Internal Server Error",
                            r#"{"requestId":"1","errorCode":"500.001.1001","errorMessage":"The transaction is being processed"}"#,
                        )
                        .await;
                    }
                });
            }
        });

        let mut config = test_config();
        config.base_url = format!("http://{}", addr);
        let provider = DarajaProvider::new(config).unwrap();

        let verdict = provider.query_status("ws_CO_pending").await.unwrap();
        assert_eq!(verdict, StkStatusVerdict::StillPending);
        // The pending verdict came from a single request, not a retry cycle
        assert_eq!(query_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_amount_is_rejected_before_hitting_the_network() {
        let provider = DarajaProvider::new(test_config()).unwrap();
        let request = StkPushRequest {
            phone_number: "254712345678".to_string(),
            amount_kes: 0,
            account_reference: "BlockCoop".to_string(),
            description: "Package purchase".to_string(),
        };

        let err = provider.initiate_stk_push(request).await.unwrap_err();
        assert!(matches!(err, PaymentError::ValidationError { .. }));
    }
}
