pub mod bsc;

use async_trait::async_trait;
use thiserror::Error;

/// On-chain purchase instruction derived from a settled M-Pesa payment
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    /// Buyer wallet that receives the package
    pub buyer_address: String,
    pub package_id: u64,
    /// USD amount to spend, converted to token units by the client
    pub amount_usd: f64,
    pub referrer_address: Option<String>,
}

/// Confirmed on-chain purchase
#[derive(Debug, Clone)]
pub struct PurchaseReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Invalid signing key: {reason}")]
    InvalidKey { reason: String },

    #[error("RPC error: {message}")]
    Rpc { message: String, retryable: bool },

    #[error("Transaction reverted: {reason}")]
    Reverted { reason: String },

    #[error("Treasury balance too low: need {required} token units")]
    InsufficientTreasuryBalance { required: String },

    #[error("Transaction not confirmed within {timeout_secs}s")]
    ConfirmationTimeout { timeout_secs: u64 },
}

impl ChainError {
    /// Network and timeout failures are worth retrying; reverts, bad
    /// addresses and an empty treasury are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChainError::Rpc { retryable, .. } => *retryable,
            ChainError::ConfirmationTimeout { .. } => true,
            ChainError::InvalidAddress { .. }
            | ChainError::InvalidKey { .. }
            | ChainError::Reverted { .. }
            | ChainError::InsufficientTreasuryBalance { .. } => false,
        }
    }
}

impl From<ChainError> for crate::error::AppError {
    fn from(err: ChainError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError};

        let is_retryable = err.is_retryable();
        AppError::new(AppErrorKind::External(ExternalError::Blockchain {
            message: err.to_string(),
            is_retryable,
        }))
    }
}

/// Seam between the bridge processor and the chain.
///
/// The production implementation submits `purchaseFor` on BSC; tests swap
/// in a mock.
#[async_trait]
pub trait PackagePurchaser: Send + Sync {
    async fn execute_purchase(&self, request: PurchaseRequest)
        -> Result<PurchaseReceipt, ChainError>;

    /// Returns the current block number as a reachability probe.
    async fn health_check(&self) -> Result<u64, ChainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_classification() {
        assert!(ChainError::Rpc {
            message: "connection reset".to_string(),
            retryable: true
        }
        .is_retryable());
        assert!(ChainError::ConfirmationTimeout { timeout_secs: 120 }.is_retryable());
        assert!(!ChainError::Reverted {
            reason: "package sold out".to_string()
        }
        .is_retryable());
        assert!(!ChainError::InsufficientTreasuryBalance {
            required: "100000000000000000000".to_string()
        }
        .is_retryable());
    }
}
