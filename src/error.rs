//! Unified error handling for the BlockCoop payment bridge
//!
//! This module provides a layered error system with proper HTTP status mapping,
//! user-friendly messages, and structured error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "BRIDGE_NOT_FOUND")]
    BridgeNotFound,
    #[serde(rename = "DUPLICATE_CHECKOUT_REQUEST")]
    DuplicateCheckoutRequest,
    #[serde(rename = "PAYMENT_NOT_COMPLETED")]
    PaymentNotCompleted,
    #[serde(rename = "INSUFFICIENT_FUNDS")]
    InsufficientFunds,
    #[serde(rename = "PAYMENT_CANCELLED")]
    PaymentCancelled,
    #[serde(rename = "INVALID_PACKAGE_SPLIT")]
    InvalidPackageSplit,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "BLOCKCHAIN_ERROR")]
    BlockchainError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Transaction with the given id or checkout request id doesn't exist
    TransactionNotFound { reference: String },
    /// No bridge row exists for the given transaction
    BridgeNotFound { transaction_id: String },
    /// A transaction already exists for this checkout request id
    DuplicateCheckoutRequest { checkout_request_id: String },
    /// The underlying M-Pesa payment is not in `completed` state
    PaymentNotCompleted { transaction_id: String, status: String },
    /// The payer's M-Pesa wallet did not cover the amount
    InsufficientFunds { amount_kes: String },
    /// The payer dismissed or cancelled the STK prompt
    PaymentCancelled { checkout_request_id: String },
    /// A package split whose parts don't add up
    InvalidPackageSplit { reason: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External service errors (payment provider, blockchain)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// M-Pesa / Daraja error
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// BSC chain error
    Blockchain { message: String, is_retryable: bool },
    /// Rate limit exceeded
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    /// External service timeout
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Invalid BSC wallet address format
    InvalidWalletAddress { address: String, reason: String },
    /// Phone number not in a recognized Kenyan mobile format
    InvalidPhoneNumber { phone: String, reason: String },
    /// Invalid amount (format or value)
    InvalidAmount { amount: String, reason: String },
    /// Required field missing
    MissingField { field: String },
    /// Field value out of acceptable range
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::BridgeNotFound { .. } => 404,
                DomainError::DuplicateCheckoutRequest { .. } => 409, // Conflict
                DomainError::PaymentNotCompleted { .. } => 422,      // Unprocessable Entity
                DomainError::InsufficientFunds { .. } => 402,        // Payment Required
                DomainError::PaymentCancelled { .. } => 422,
                DomainError::InvalidPackageSplit { .. } => 422,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => 500,
                InfrastructureError::Configuration { .. } => 500,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502, // Bad Gateway
                ExternalError::Blockchain { .. } => 502,
                ExternalError::RateLimit { .. } => 429, // Too Many Requests
                ExternalError::Timeout { .. } => 504,   // Gateway Timeout
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::BridgeNotFound { .. } => ErrorCode::BridgeNotFound,
                DomainError::DuplicateCheckoutRequest { .. } => ErrorCode::DuplicateCheckoutRequest,
                DomainError::PaymentNotCompleted { .. } => ErrorCode::PaymentNotCompleted,
                DomainError::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
                DomainError::PaymentCancelled { .. } => ErrorCode::PaymentCancelled,
                DomainError::InvalidPackageSplit { .. } => ErrorCode::InvalidPackageSplit,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::Blockchain { .. } => ErrorCode::BlockchainError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { reference } => {
                    format!("Transaction '{}' not found", reference)
                }
                DomainError::BridgeNotFound { transaction_id } => {
                    format!("No bridge record exists for transaction '{}'", transaction_id)
                }
                DomainError::DuplicateCheckoutRequest {
                    checkout_request_id,
                } => {
                    format!(
                        "A transaction already exists for checkout request '{}'",
                        checkout_request_id
                    )
                }
                DomainError::PaymentNotCompleted {
                    transaction_id,
                    status,
                } => {
                    format!(
                        "Transaction '{}' is '{}', not completed",
                        transaction_id, status
                    )
                }
                DomainError::InsufficientFunds { amount_kes } => {
                    format!(
                        "M-Pesa wallet balance is insufficient for KES {}",
                        amount_kes
                    )
                }
                DomainError::PaymentCancelled {
                    checkout_request_id,
                } => {
                    format!(
                        "Payment prompt for '{}' was cancelled by the user",
                        checkout_request_id
                    )
                }
                DomainError::InvalidPackageSplit { reason } => {
                    format!("Invalid package split: {}", reason)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::Blockchain { is_retryable, .. } => {
                    if *is_retryable {
                        "Blockchain network is busy. Please try again in a moment".to_string()
                    } else {
                        "Blockchain operation failed. Please contact support".to_string()
                    }
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => {
                    if let Some(secs) = retry_after {
                        format!(
                            "Rate limit exceeded for {}. Please try again in {} seconds",
                            service, secs
                        )
                    } else {
                        format!("Rate limit exceeded for {}. Please try again later", service)
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!(
                        "{} request timed out after {} seconds. Please try again",
                        service, timeout_secs
                    )
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidWalletAddress { address, reason } => {
                    format!("Invalid wallet address '{}': {}", address, reason)
                }
                ValidationError::InvalidPhoneNumber { phone, reason } => {
                    format!("Invalid phone number '{}': {}", phone, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => {
                        format!("Field '{}' must be at least {}", field, min)
                    }
                    (None, Some(max)) => {
                        format!("Field '{}' must be at most {}", field, max)
                    }
                    (None, None) => {
                        format!("Field '{}' is out of acceptable range", field)
                    }
                },
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::Blockchain { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<crate::database::error::DatabaseError> for AppError {
    fn from(err: crate::database::error::DatabaseError) -> Self {
        use crate::database::error::DatabaseErrorKind;

        let kind = match err.kind() {
            DatabaseErrorKind::UniqueViolation { constraint } => {
                AppErrorKind::Domain(DomainError::DuplicateCheckoutRequest {
                    checkout_request_id: constraint.clone(),
                })
            }
            DatabaseErrorKind::NotFound => AppErrorKind::Domain(DomainError::TransactionNotFound {
                reference: "unknown".to_string(),
            }),
            _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };

        AppError::new(kind)
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_checkout_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::DuplicateCheckoutRequest {
            checkout_request_id: "ws_CO_123".to_string(),
        }));

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::DuplicateCheckoutRequest);
        assert!(error.user_message().contains("ws_CO_123"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_insufficient_funds_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::InsufficientFunds {
            amount_kes: "12900".to_string(),
        }));

        assert_eq!(error.status_code(), 402);
        assert_eq!(error.error_code(), ErrorCode::InsufficientFunds);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_rate_limit_error() {
        let error = AppError::new(AppErrorKind::External(ExternalError::RateLimit {
            service: "Daraja".to_string(),
            retry_after: Some(60),
        }));

        assert_eq!(error.status_code(), 429);
        assert_eq!(error.error_code(), ErrorCode::RateLimitError);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidPhoneNumber {
            phone: "12345".to_string(),
            reason: "not a Kenyan mobile number".to_string(),
        }));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }
}
