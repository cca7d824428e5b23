use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Insufficient funds: {message}")]
    InsufficientFundsError { message: String },

    #[error("Payment cancelled by user: {message}")]
    UserCancelledError { message: String },

    #[error("Payment declined: {message}")]
    PaymentDeclinedError {
        message: String,
        provider_code: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Authentication with provider failed: {message}")]
    AuthenticationError { message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::InsufficientFundsError { .. } => false,
            PaymentError::UserCancelledError { .. } => false,
            PaymentError::PaymentDeclinedError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::AuthenticationError { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::InsufficientFundsError { .. } => 402,
            PaymentError::UserCancelledError { .. } => 422,
            PaymentError::PaymentDeclinedError { .. } => 402,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::AuthenticationError { .. } => 502,
            PaymentError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::InsufficientFundsError { .. } => {
                "Insufficient M-Pesa balance to complete payment".to_string()
            }
            PaymentError::UserCancelledError { .. } => {
                "Payment request was cancelled on the handset".to_string()
            }
            PaymentError::PaymentDeclinedError { .. } => {
                "Payment was declined by the provider".to_string()
            }
            PaymentError::NetworkError { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment provider. Please retry shortly".to_string()
            }
            PaymentError::AuthenticationError { .. } => {
                "Could not authenticate with payment provider".to_string()
            }
            PaymentError::ProviderError { .. } => "Payment provider returned an error".to_string(),
        }
    }

    /// Categorize a Daraja STK result code into a payment error.
    ///
    /// Only called for non-zero codes; unknown codes are declined without
    /// retry since the provider gave a definite verdict.
    pub fn from_result_code(result_code: i64, result_desc: &str) -> Self {
        use crate::payments::types::result_codes;

        match result_code {
            result_codes::INSUFFICIENT_FUNDS => PaymentError::InsufficientFundsError {
                message: result_desc.to_string(),
            },
            result_codes::USER_CANCELLED => PaymentError::UserCancelledError {
                message: result_desc.to_string(),
            },
            result_codes::WRONG_PIN => PaymentError::PaymentDeclinedError {
                message: result_desc.to_string(),
                provider_code: Some(result_code.to_string()),
            },
            result_codes::REQUEST_TIMEOUT => PaymentError::ProviderError {
                provider: "daraja".to_string(),
                message: result_desc.to_string(),
                provider_code: Some(result_code.to_string()),
                retryable: false,
            },
            _ => PaymentError::PaymentDeclinedError {
                message: result_desc.to_string(),
                provider_code: Some(result_code.to_string()),
            },
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, ExternalError, ValidationError};

        let kind = match &err {
            PaymentError::ValidationError { message, .. } => {
                AppErrorKind::Validation(ValidationError::InvalidPhoneNumber {
                    phone: "".to_string(),
                    reason: message.clone(),
                })
            }
            PaymentError::InsufficientFundsError { message } => {
                AppErrorKind::Domain(DomainError::InsufficientFunds {
                    amount_kes: message.clone(),
                })
            }
            PaymentError::UserCancelledError { message } => {
                AppErrorKind::Domain(DomainError::PaymentCancelled {
                    checkout_request_id: message.clone(),
                })
            }
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: "daraja".to_string(),
                retry_after: *retry_after_seconds,
            }),
            other => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "daraja".to_string(),
                message: other.to_string(),
                is_retryable: other.is_retryable(),
            }),
        };

        AppError::new(kind)
    }
}
