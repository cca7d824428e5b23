use crate::database::error::DatabaseError;
use crate::database::repository::Repository;
use crate::payments::types::PaymentState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

/// M-Pesa transaction entity
///
/// One row per STK push checkout. `checkout_request_id` is unique, so a
/// retried initiate call for the same provider checkout cannot create a
/// second row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub wallet_address: String,
    pub package_id: i64,
    pub phone_number: String,
    pub amount_usd: f64,
    pub amount_kes: f64,
    pub status: String,
    pub checkout_request_id: Option<String>,
    pub merchant_request_id: Option<String>,
    pub mpesa_receipt: Option<String>,
    pub result_code: Option<i64>,
    pub result_desc: Option<String>,
    pub referrer_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a transaction row
///
/// The checkout id is optional: the row is inserted before the STK push so
/// that a charge can never land without a record, and the provider ids are
/// attached once the push is accepted.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub wallet_address: String,
    pub package_id: i64,
    pub phone_number: String,
    pub amount_usd: f64,
    pub amount_kes: f64,
    pub checkout_request_id: Option<String>,
    pub merchant_request_id: Option<String>,
    pub referrer_address: Option<String>,
}

/// Aggregated statistics over all transaction rows
#[derive(Debug, Clone, Serialize)]
pub struct TransactionStats {
    pub total_transactions: i64,
    pub pending: i64,
    pub completed: i64,
    pub failed: i64,
    pub timeout: i64,
    pub total_usd_completed: f64,
    pub total_kes_completed: f64,
    pub referred_purchases: i64,
    pub packages: Vec<PackageStats>,
    pub top_referrers: Vec<ReferrerStats>,
}

/// Per-package aggregates over completed transactions
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PackageStats {
    pub package_id: i64,
    pub purchases: i64,
    pub total_usd: f64,
}

/// Per-referrer aggregates over completed referred purchases
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ReferrerStats {
    pub referrer_address: String,
    pub referred_purchases: i64,
    pub total_usd: f64,
}

const TRANSACTION_COLUMNS: &str = "transaction_id, wallet_address, package_id, phone_number, \
     amount_usd, amount_kes, status, checkout_request_id, merchant_request_id, \
     mpesa_receipt, result_code, result_desc, referrer_address, created_at, updated_at";

/// Repository for managing M-Pesa transactions
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new pending transaction.
    ///
    /// Fails with a unique violation if a row already exists for the same
    /// checkout request id.
    pub async fn create(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        let transaction_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query_as::<_, Transaction>(&format!(
            "INSERT INTO mpesa_transactions
             (transaction_id, wallet_address, package_id, phone_number, amount_usd,
              amount_kes, status, checkout_request_id, merchant_request_id,
              referrer_address, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?)
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(&transaction_id)
        .bind(&new.wallet_address)
        .bind(new.package_id)
        .bind(&new.phone_number)
        .bind(new.amount_usd)
        .bind(new.amount_kes)
        .bind(&new.checkout_request_id)
        .bind(&new.merchant_request_id)
        .bind(&new.referrer_address)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Persist the provider's checkout and merchant request ids on a
    /// pending row once the STK push has been accepted.
    ///
    /// The UNIQUE index on `checkout_request_id` rejects a second row
    /// claiming the same checkout.
    pub async fn attach_checkout(
        &self,
        transaction_id: &str,
        checkout_request_id: &str,
        merchant_request_id: Option<&str>,
    ) -> Result<Option<Transaction>, DatabaseError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE mpesa_transactions
             SET checkout_request_id = ?, merchant_request_id = ?, updated_at = ?
             WHERE transaction_id = ? AND status = 'pending'
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(checkout_request_id)
        .bind(merchant_request_id)
        .bind(Utc::now())
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Fail a pending row by its own id. Used when the STK push itself
    /// fails, before any checkout id exists.
    pub async fn mark_failed_by_id(
        &self,
        transaction_id: &str,
        result_desc: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE mpesa_transactions
             SET status = 'failed', result_desc = ?, updated_at = ?
             WHERE transaction_id = ? AND status = 'pending'
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(result_desc)
        .bind(Utc::now())
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Find a transaction by its id
    pub async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS}
             FROM mpesa_transactions
             WHERE transaction_id = ?"
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Find a transaction by its provider checkout request id
    pub async fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS}
             FROM mpesa_transactions
             WHERE checkout_request_id = ?"
        ))
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Mark a pending transaction completed.
    ///
    /// The `status = 'pending'` guard makes terminal states sticky: a row
    /// that already reached completed/failed/timeout is left untouched and
    /// `None` is returned, which callers treat as "already settled".
    pub async fn mark_completed(
        &self,
        checkout_request_id: &str,
        mpesa_receipt: Option<&str>,
        result_code: i64,
        result_desc: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE mpesa_transactions
             SET status = 'completed', mpesa_receipt = ?, result_code = ?,
                 result_desc = ?, updated_at = ?
             WHERE checkout_request_id = ? AND status = 'pending'
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(mpesa_receipt)
        .bind(result_code)
        .bind(result_desc)
        .bind(Utc::now())
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Mark a pending transaction failed with the provider's verdict.
    pub async fn mark_failed(
        &self,
        checkout_request_id: &str,
        result_code: i64,
        result_desc: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE mpesa_transactions
             SET status = 'failed', result_code = ?, result_desc = ?, updated_at = ?
             WHERE checkout_request_id = ? AND status = 'pending'
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(result_code)
        .bind(result_desc)
        .bind(Utc::now())
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Mark a pending transaction timed out (no provider verdict past the
    /// absolute deadline).
    pub async fn mark_timed_out(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE mpesa_transactions
             SET status = 'timeout', result_desc = 'No payment confirmation received',
                 updated_at = ?
             WHERE transaction_id = ? AND status = 'pending'
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Pending transactions created before `cutoff`, oldest first
    pub async fn find_pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS}
             FROM mpesa_transactions
             WHERE status = 'pending' AND created_at < ?
             ORDER BY created_at ASC
             LIMIT ?"
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Transactions for a wallet, newest first
    pub async fn find_by_wallet(
        &self,
        wallet_address: &str,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS}
             FROM mpesa_transactions
             WHERE wallet_address = ?
             ORDER BY created_at DESC
             LIMIT ?"
        ))
        .bind(wallet_address)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Most recent transactions across all wallets
    pub async fn recent(&self, limit: i64) -> Result<Vec<Transaction>, DatabaseError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS}
             FROM mpesa_transactions
             ORDER BY created_at DESC
             LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Aggregate statistics computed in SQL over the live rows, so the
    /// numbers always equal the sums over individual transactions.
    pub async fn stats(&self) -> Result<TransactionStats, DatabaseError> {
        let summary: (i64, i64, i64, i64, i64, f64, f64, i64) = sqlx::query_as(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'timeout' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN amount_usd ELSE 0.0 END), 0.0),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN amount_kes ELSE 0.0 END), 0.0),
                COALESCE(SUM(CASE WHEN status = 'completed'
                              AND referrer_address IS NOT NULL THEN 1 ELSE 0 END), 0)
             FROM mpesa_transactions",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let packages = sqlx::query_as::<_, PackageStats>(
            "SELECT package_id,
                    COUNT(*) AS purchases,
                    COALESCE(SUM(amount_usd), 0) AS total_usd
             FROM mpesa_transactions
             WHERE status = 'completed'
             GROUP BY package_id
             ORDER BY package_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let top_referrers = sqlx::query_as::<_, ReferrerStats>(
            "SELECT referrer_address,
                    COUNT(*) AS referred_purchases,
                    COALESCE(SUM(amount_usd), 0) AS total_usd
             FROM mpesa_transactions
             WHERE status = 'completed' AND referrer_address IS NOT NULL
             GROUP BY referrer_address
             ORDER BY referred_purchases DESC, total_usd DESC
             LIMIT 10",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(TransactionStats {
            total_transactions: summary.0,
            pending: summary.1,
            completed: summary.2,
            failed: summary.3,
            timeout: summary.4,
            total_usd_completed: summary.5,
            total_kes_completed: summary.6,
            referred_purchases: summary.7,
            packages,
            top_referrers,
        })
    }
}

#[async_trait]
impl Repository<Transaction, String> for TransactionRepository {
    async fn find_by_id(&self, id: &String) -> Result<Option<Transaction>, DatabaseError> {
        self.find_by_transaction_id(id).await
    }

    async fn delete(&self, id: &String) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM mpesa_transactions WHERE transaction_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }
}

impl Transaction {
    /// Whether the row has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        PaymentState::parse(&self.status)
            .map(|state| state.is_terminal())
            .unwrap_or(false)
    }
}

impl TransactionStats {
    /// Sanity check used by the stats endpoint: the per-status counts must
    /// partition the total.
    pub fn is_consistent(&self) -> bool {
        self.pending + self.completed + self.failed + self.timeout == self.total_transactions
    }
}
