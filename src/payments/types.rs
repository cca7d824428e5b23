//! Shared payment types for the STK push flow

use crate::payments::error::{PaymentError, PaymentResult};
use serde::{Deserialize, Serialize};

/// Lifecycle of an M-Pesa transaction.
///
/// `Pending` is the only non-terminal state. Once a row reaches any of the
/// other three it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    Pending,
    Completed,
    Failed,
    Timeout,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "pending",
            PaymentState::Completed => "completed",
            PaymentState::Failed => "failed",
            PaymentState::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentState::Pending)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentState::Pending),
            "completed" => Some(PaymentState::Completed),
            "failed" => Some(PaymentState::Failed),
            "timeout" => Some(PaymentState::Timeout),
            _ => None,
        }
    }
}

/// Request to push an STK prompt to a customer's handset
#[derive(Debug, Clone, Serialize)]
pub struct StkPushRequest {
    /// Normalized payer number, 2547XXXXXXXX form
    pub phone_number: String,
    /// Whole KES (Daraja rejects fractional amounts)
    pub amount_kes: u64,
    /// Shown on the customer's statement
    pub account_reference: String,
    pub description: String,
}

/// Provider acknowledgement of an STK push
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkPushResponse {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub response_code: String,
    pub response_description: String,
    pub customer_message: String,
}

/// Result of querying an in-flight STK push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StkStatusVerdict {
    /// Customer paid; receipt may arrive only via callback
    Completed,
    /// Provider returned a definite failure code
    Failed { result_code: i64, result_desc: String },
    /// Still waiting on the customer
    StillPending,
}

/// Parsed `Body.stkCallback` payload from Daraja
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkCallbackEvent {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub result_code: i64,
    pub result_desc: String,
    /// Present only on success
    pub mpesa_receipt: Option<String>,
    pub amount_kes: Option<f64>,
    pub phone_number: Option<String>,
}

impl StkCallbackEvent {
    pub fn is_success(&self) -> bool {
        self.result_code == 0
    }
}

/// Daraja result codes with known meanings
pub mod result_codes {
    pub const SUCCESS: i64 = 0;
    pub const INSUFFICIENT_FUNDS: i64 = 1;
    pub const USER_CANCELLED: i64 = 1032;
    pub const WRONG_PIN: i64 = 2001;
    pub const REQUEST_TIMEOUT: i64 = 1037;
}

/// Normalize a Kenyan mobile number to the 254XXXXXXXXX form Daraja expects.
///
/// Accepts `07XXXXXXXX`, `01XXXXXXXX`, `7XXXXXXXX`, `1XXXXXXXX`,
/// `+254XXXXXXXXX` and `254XXXXXXXXX`.
pub fn normalize_phone_number(raw: &str) -> PaymentResult<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);

    let normalized = if let Some(rest) = cleaned.strip_prefix("254") {
        format!("254{}", rest)
    } else if let Some(rest) = cleaned.strip_prefix('0') {
        format!("254{}", rest)
    } else if cleaned.starts_with('7') || cleaned.starts_with('1') {
        format!("254{}", cleaned)
    } else {
        return Err(PaymentError::ValidationError {
            message: format!("'{}' is not a recognized Kenyan mobile number", raw),
            field: Some("phone_number".to_string()),
        });
    };

    if normalized.len() != 12 || !normalized.chars().all(|c| c.is_ascii_digit()) {
        return Err(PaymentError::ValidationError {
            message: format!("'{}' is not a recognized Kenyan mobile number", raw),
            field: Some("phone_number".to_string()),
        });
    }

    let prefix = &normalized[3..4];
    if prefix != "7" && prefix != "1" {
        return Err(PaymentError::ValidationError {
            message: format!("'{}' is not a Kenyan mobile prefix", raw),
            field: Some("phone_number".to_string()),
        });
    }

    Ok(normalized)
}
