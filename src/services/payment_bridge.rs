//! Payment bridge orchestration
//!
//! Ties the STK push provider to the transaction and bridge repositories:
//! initiating checkouts, settling them from callbacks or status queries,
//! and arming the on-chain purchase once the payment completes.

use crate::database::bridge_repository::{BridgeRepository, PaymentBridge};
use crate::database::transaction_repository::{
    NewTransaction, Transaction, TransactionRepository, TransactionStats,
};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ValidationError};
use crate::payments::error::PaymentError;
use crate::payments::provider::StkPushProvider;
use crate::payments::types::{
    normalize_phone_number, result_codes, PaymentState, StkCallbackEvent, StkPushRequest,
    StkStatusVerdict,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Tunables for the bridge service
#[derive(Debug, Clone)]
pub struct BridgeServiceConfig {
    pub kes_per_usd: f64,
    pub account_reference: String,
}

impl Default for BridgeServiceConfig {
    fn default() -> Self {
        Self {
            kes_per_usd: 129.0,
            account_reference: "BlockCoop".to_string(),
        }
    }
}

/// Purchase initiation input from the API layer
#[derive(Debug, Clone, Deserialize)]
pub struct InitiatePurchaseRequest {
    pub wallet_address: String,
    pub package_id: u64,
    pub phone_number: String,
    pub amount_usd: f64,
    pub referrer_address: Option<String>,
}

/// What a processed callback amounted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Payment confirmed; the bridge row now exists
    Completed { transaction_id: String },
    /// Provider reported a definite failure
    Failed { transaction_id: String },
    /// The transaction was already terminal; nothing changed
    AlreadySettled,
    /// No transaction matches the checkout request id
    UnknownCheckout,
}

pub struct PaymentBridgeService {
    transactions: Arc<TransactionRepository>,
    bridges: Arc<BridgeRepository>,
    provider: Arc<dyn StkPushProvider>,
    config: BridgeServiceConfig,
}

fn validate_wallet_address(address: &str) -> AppResult<()> {
    let valid = address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidWalletAddress {
                address: address.to_string(),
                reason: "expected a 0x-prefixed 20-byte hex address".to_string(),
            },
        )))
    }
}

impl PaymentBridgeService {
    pub fn new(
        transactions: Arc<TransactionRepository>,
        bridges: Arc<BridgeRepository>,
        provider: Arc<dyn StkPushProvider>,
        config: BridgeServiceConfig,
    ) -> Self {
        Self {
            transactions,
            bridges,
            provider,
            config,
        }
    }

    /// Start a package purchase: record the pending transaction, push the
    /// STK prompt, then attach the provider's checkout request id.
    ///
    /// The row goes in before the push so a charge can never reach the
    /// customer's handset without a record of it. If the push itself fails
    /// the row is marked failed; if only the id attach fails the timeout
    /// monitor settles the row from its no-checkout branch.
    pub async fn initiate_purchase(
        &self,
        request: InitiatePurchaseRequest,
    ) -> AppResult<Transaction> {
        validate_wallet_address(&request.wallet_address)?;
        if let Some(referrer) = request.referrer_address.as_deref() {
            validate_wallet_address(referrer)?;
        }
        if !(request.amount_usd > 0.0) {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::InvalidAmount {
                    amount: request.amount_usd.to_string(),
                    reason: "amount must be greater than 0".to_string(),
                },
            )));
        }

        let phone = normalize_phone_number(&request.phone_number)?;
        // Daraja takes whole shillings; round up so we never undercharge
        let amount_kes = (request.amount_usd * self.config.kes_per_usd).ceil();

        let transaction = self
            .transactions
            .create(NewTransaction {
                wallet_address: request.wallet_address,
                package_id: request.package_id as i64,
                phone_number: phone.clone(),
                amount_usd: request.amount_usd,
                amount_kes,
                checkout_request_id: None,
                merchant_request_id: None,
                referrer_address: request.referrer_address,
            })
            .await?;

        let push = match self
            .provider
            .initiate_stk_push(StkPushRequest {
                phone_number: phone,
                amount_kes: amount_kes as u64,
                account_reference: self.config.account_reference.clone(),
                description: format!("Package {} purchase", request.package_id),
            })
            .await
        {
            Ok(push) => push,
            Err(e) => {
                if let Err(db_err) = self
                    .transactions
                    .mark_failed_by_id(&transaction.transaction_id, &e.to_string())
                    .await
                {
                    warn!(
                        transaction_id = %transaction.transaction_id,
                        error = %db_err,
                        "Could not record STK push failure"
                    );
                }
                return Err(e.into());
            }
        };

        let transaction = match self
            .transactions
            .attach_checkout(
                &transaction.transaction_id,
                &push.checkout_request_id,
                Some(&push.merchant_request_id),
            )
            .await?
        {
            Some(updated) => updated,
            None => {
                // The row raced to a terminal state; keep what we have
                warn!(
                    transaction_id = %transaction.transaction_id,
                    "Transaction settled before its checkout id was attached"
                );
                transaction
            }
        };

        info!(
            transaction_id = %transaction.transaction_id,
            checkout_request_id = %push.checkout_request_id,
            "Purchase initiated, awaiting payment"
        );

        Ok(transaction)
    }

    /// Process a raw STK callback payload.
    ///
    /// Replays are harmless: terminal rows are never touched, and the
    /// bridge insert is `ON CONFLICT DO NOTHING`.
    pub async fn handle_callback(&self, payload: &[u8]) -> AppResult<CallbackOutcome> {
        let event = self.provider.parse_callback(payload)?;
        self.settle_from_event(&event).await
    }

    async fn settle_from_event(&self, event: &StkCallbackEvent) -> AppResult<CallbackOutcome> {
        let checkout_id = event.checkout_request_id.as_str();

        let existing = self.transactions.find_by_checkout_id(checkout_id).await?;
        let Some(existing) = existing else {
            warn!(
                checkout_request_id = %checkout_id,
                "Callback for unknown checkout request"
            );
            return Ok(CallbackOutcome::UnknownCheckout);
        };

        if event.is_success() {
            let updated = self
                .transactions
                .mark_completed(
                    checkout_id,
                    event.mpesa_receipt.as_deref(),
                    event.result_code,
                    &event.result_desc,
                )
                .await?;

            match updated {
                Some(tx) => {
                    self.arm_bridge(&tx).await?;
                    info!(
                        transaction_id = %tx.transaction_id,
                        receipt = ?event.mpesa_receipt,
                        "Payment completed, bridge armed"
                    );
                    Ok(CallbackOutcome::Completed {
                        transaction_id: tx.transaction_id,
                    })
                }
                None => {
                    // Replay or race with the timeout monitor; if the row
                    // ended up completed, make sure the bridge exists.
                    if existing.status == PaymentState::Completed.as_str() {
                        self.arm_bridge(&existing).await?;
                    }
                    Ok(CallbackOutcome::AlreadySettled)
                }
            }
        } else {
            let category = PaymentError::from_result_code(event.result_code, &event.result_desc);

            // 1037 is Daraja reporting that the handset never answered;
            // that is the timeout state, not a refusal.
            let updated = if event.result_code == result_codes::REQUEST_TIMEOUT {
                self.transactions
                    .mark_timed_out(&existing.transaction_id)
                    .await?
            } else {
                self.transactions
                    .mark_failed(checkout_id, event.result_code, &event.result_desc)
                    .await?
            };

            match updated {
                Some(tx) => {
                    info!(
                        transaction_id = %tx.transaction_id,
                        result_code = event.result_code,
                        category = %category.user_message(),
                        status = %tx.status,
                        "Payment not completed"
                    );
                    Ok(CallbackOutcome::Failed {
                        transaction_id: tx.transaction_id,
                    })
                }
                None => Ok(CallbackOutcome::AlreadySettled),
            }
        }
    }

    /// Create the pending bridge row for a completed transaction.
    async fn arm_bridge(&self, tx: &Transaction) -> AppResult<PaymentBridge> {
        let bridge = self
            .bridges
            .create_if_absent(
                &tx.transaction_id,
                &tx.wallet_address,
                tx.package_id,
                tx.amount_usd,
                tx.referrer_address.as_deref(),
            )
            .await?;
        Ok(bridge)
    }

    /// Return the current view of a checkout, falling back to a provider
    /// query when the row is still pending.
    pub async fn query_status(&self, checkout_request_id: &str) -> AppResult<Transaction> {
        let tx = self
            .transactions
            .find_by_checkout_id(checkout_request_id)
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                    reference: checkout_request_id.to_string(),
                }))
            })?;

        if tx.is_terminal() {
            return Ok(tx);
        }

        match self.provider.query_status(checkout_request_id).await {
            Ok(StkStatusVerdict::Completed) => {
                // Receipt arrives only via callback; settle without it
                let updated = self
                    .transactions
                    .mark_completed(checkout_request_id, None, 0, "Confirmed via status query")
                    .await?;
                if let Some(updated) = updated.as_ref() {
                    self.arm_bridge(updated).await?;
                }
                Ok(updated.unwrap_or(tx))
            }
            Ok(StkStatusVerdict::Failed {
                result_code,
                result_desc,
            }) => {
                let updated = self
                    .transactions
                    .mark_failed(checkout_request_id, result_code, &result_desc)
                    .await?;
                Ok(updated.unwrap_or(tx))
            }
            Ok(StkStatusVerdict::StillPending) => Ok(tx),
            Err(e) => {
                // The row itself is still authoritative; surface it even
                // when the provider is unreachable.
                warn!(
                    checkout_request_id = %checkout_request_id,
                    error = %e,
                    "Status query against provider failed"
                );
                Ok(tx)
            }
        }
    }

    /// Bridge record for a transaction
    pub async fn get_bridge(&self, transaction_id: &str) -> AppResult<PaymentBridge> {
        self.bridges
            .find_by_transaction(transaction_id)
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::BridgeNotFound {
                    transaction_id: transaction_id.to_string(),
                }))
            })
    }

    /// Re-arm a failed bridge so the processor picks it up again.
    ///
    /// Only allowed when the underlying payment actually completed.
    pub async fn retry_bridge(&self, transaction_id: &str) -> AppResult<PaymentBridge> {
        let tx = self
            .transactions
            .find_by_transaction_id(transaction_id)
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                    reference: transaction_id.to_string(),
                }))
            })?;

        if tx.status != PaymentState::Completed.as_str() {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::PaymentNotCompleted {
                    transaction_id: transaction_id.to_string(),
                    status: tx.status,
                },
            )));
        }

        let bridge = self.get_bridge(transaction_id).await?;
        match self.bridges.re_arm(&bridge.bridge_id).await? {
            Some(rearmed) => Ok(rearmed),
            // Pending or completed bridges are returned unchanged
            None => Ok(bridge),
        }
    }

    pub async fn wallet_transactions(
        &self,
        wallet_address: &str,
        limit: i64,
    ) -> AppResult<Vec<Transaction>> {
        validate_wallet_address(wallet_address)?;
        Ok(self.transactions.find_by_wallet(wallet_address, limit).await?)
    }

    pub async fn stats(&self) -> AppResult<TransactionStats> {
        Ok(self.transactions.stats().await?)
    }
}
