use crate::database::error::DatabaseError;
use crate::database::repository::Repository;
use crate::payments::types::PaymentState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

/// Payment bridge entity
///
/// Links a completed M-Pesa transaction to its on-chain package purchase.
/// `transaction_id` is unique: one purchase per payment, however many times
/// the callback that created the bridge is replayed.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentBridge {
    pub bridge_id: String,
    pub transaction_id: String,
    pub wallet_address: String,
    pub package_id: i64,
    pub amount_usd: f64,
    pub referrer_address: Option<String>,
    pub status: String,
    pub tx_hash: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const BRIDGE_COLUMNS: &str = "bridge_id, transaction_id, wallet_address, package_id, amount_usd, \
     referrer_address, status, tx_hash, error_message, retry_count, created_at, updated_at";

/// Repository for managing payment bridges
pub struct BridgeRepository {
    pool: SqlitePool,
}

impl BridgeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a pending bridge for a transaction if one does not exist yet.
    ///
    /// `ON CONFLICT DO NOTHING` makes this idempotent; the existing row is
    /// returned either way.
    pub async fn create_if_absent(
        &self,
        transaction_id: &str,
        wallet_address: &str,
        package_id: i64,
        amount_usd: f64,
        referrer_address: Option<&str>,
    ) -> Result<PaymentBridge, DatabaseError> {
        let bridge_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO payment_bridges
             (bridge_id, transaction_id, wallet_address, package_id, amount_usd,
              referrer_address, status, retry_count, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?)
             ON CONFLICT (transaction_id) DO NOTHING",
        )
        .bind(&bridge_id)
        .bind(transaction_id)
        .bind(wallet_address)
        .bind(package_id)
        .bind(amount_usd)
        .bind(referrer_address)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        self.find_by_transaction(transaction_id)
            .await?
            .ok_or_else(|| DatabaseError::from_sqlx(sqlx::Error::RowNotFound))
    }

    /// Find the bridge for a transaction
    pub async fn find_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<PaymentBridge>, DatabaseError> {
        sqlx::query_as::<_, PaymentBridge>(&format!(
            "SELECT {BRIDGE_COLUMNS}
             FROM payment_bridges
             WHERE transaction_id = ?"
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Find a bridge by its own id
    pub async fn find_by_bridge_id(
        &self,
        bridge_id: &str,
    ) -> Result<Option<PaymentBridge>, DatabaseError> {
        sqlx::query_as::<_, PaymentBridge>(&format!(
            "SELECT {BRIDGE_COLUMNS}
             FROM payment_bridges
             WHERE bridge_id = ?"
        ))
        .bind(bridge_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Pending bridges, oldest first
    pub async fn find_pending(&self, limit: i64) -> Result<Vec<PaymentBridge>, DatabaseError> {
        sqlx::query_as::<_, PaymentBridge>(&format!(
            "SELECT {BRIDGE_COLUMNS}
             FROM payment_bridges
             WHERE status = 'pending'
             ORDER BY created_at ASC
             LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Mark a pending bridge completed with the on-chain transaction hash.
    ///
    /// Returns `None` if the bridge was already terminal.
    pub async fn mark_completed(
        &self,
        bridge_id: &str,
        tx_hash: &str,
    ) -> Result<Option<PaymentBridge>, DatabaseError> {
        sqlx::query_as::<_, PaymentBridge>(&format!(
            "UPDATE payment_bridges
             SET status = 'completed', tx_hash = ?, error_message = NULL, updated_at = ?
             WHERE bridge_id = ? AND status = 'pending'
             RETURNING {BRIDGE_COLUMNS}"
        ))
        .bind(tx_hash)
        .bind(Utc::now())
        .bind(bridge_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Record a failed execution attempt, bumping the retry counter.
    ///
    /// The bridge stays pending so the processor can retry it later.
    pub async fn record_failure(
        &self,
        bridge_id: &str,
        error_message: &str,
    ) -> Result<Option<PaymentBridge>, DatabaseError> {
        sqlx::query_as::<_, PaymentBridge>(&format!(
            "UPDATE payment_bridges
             SET retry_count = retry_count + 1, error_message = ?, updated_at = ?
             WHERE bridge_id = ? AND status = 'pending'
             RETURNING {BRIDGE_COLUMNS}"
        ))
        .bind(error_message)
        .bind(Utc::now())
        .bind(bridge_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Mark a pending bridge permanently failed (business error or retries
    /// exhausted).
    pub async fn mark_failed(
        &self,
        bridge_id: &str,
        error_message: &str,
    ) -> Result<Option<PaymentBridge>, DatabaseError> {
        sqlx::query_as::<_, PaymentBridge>(&format!(
            "UPDATE payment_bridges
             SET status = 'failed', error_message = ?, updated_at = ?
             WHERE bridge_id = ? AND status = 'pending'
             RETURNING {BRIDGE_COLUMNS}"
        ))
        .bind(error_message)
        .bind(Utc::now())
        .bind(bridge_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Re-arm a failed bridge for the manual retry endpoint: back to
    /// pending with a fresh retry budget. Completed bridges are left alone.
    pub async fn re_arm(&self, bridge_id: &str) -> Result<Option<PaymentBridge>, DatabaseError> {
        sqlx::query_as::<_, PaymentBridge>(&format!(
            "UPDATE payment_bridges
             SET status = 'pending', retry_count = 0, error_message = NULL, updated_at = ?
             WHERE bridge_id = ? AND status = 'failed'
             RETURNING {BRIDGE_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(bridge_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl Repository<PaymentBridge, String> for BridgeRepository {
    async fn find_by_id(&self, id: &String) -> Result<Option<PaymentBridge>, DatabaseError> {
        self.find_by_bridge_id(id).await
    }

    async fn delete(&self, id: &String) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM payment_bridges WHERE bridge_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }
}

impl PaymentBridge {
    pub fn is_terminal(&self) -> bool {
        PaymentState::parse(&self.status)
            .map(|state| state.is_terminal())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::transaction_repository::{NewTransaction, TransactionRepository};
    use crate::database::{init_pool, init_schema, PoolConfig};

    async fn test_pool() -> SqlitePool {
        let pool = init_pool("sqlite::memory:", Some(PoolConfig::default()))
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    async fn seed_transaction(pool: &SqlitePool, checkout: &str) -> String {
        let repo = TransactionRepository::new(pool.clone());
        let tx = repo
            .create(NewTransaction {
                wallet_address: "0x1111111111111111111111111111111111111111".to_string(),
                package_id: 1,
                phone_number: "254712345678".to_string(),
                amount_usd: 100.0,
                amount_kes: 12900.0,
                checkout_request_id: Some(checkout.to_string()),
                merchant_request_id: None,
                referrer_address: None,
            })
            .await
            .unwrap();
        tx.transaction_id
    }

    #[tokio::test]
    async fn test_create_if_absent_is_idempotent() {
        let pool = test_pool().await;
        let tx_id = seed_transaction(&pool, "ws_CO_100").await;
        let repo = BridgeRepository::new(pool);

        let first = repo
            .create_if_absent(&tx_id, "0x1111111111111111111111111111111111111111", 1, 100.0, None)
            .await
            .unwrap();
        let second = repo
            .create_if_absent(&tx_id, "0x1111111111111111111111111111111111111111", 1, 100.0, None)
            .await
            .unwrap();

        assert_eq!(first.bridge_id, second.bridge_id);
        assert_eq!(first.status, "pending");
    }

    #[tokio::test]
    async fn test_completed_bridge_is_sticky() {
        let pool = test_pool().await;
        let tx_id = seed_transaction(&pool, "ws_CO_101").await;
        let repo = BridgeRepository::new(pool);

        let bridge = repo
            .create_if_absent(&tx_id, "0x1111111111111111111111111111111111111111", 1, 100.0, None)
            .await
            .unwrap();

        let completed = repo.mark_completed(&bridge.bridge_id, "0xdeadbeef").await.unwrap();
        assert!(completed.is_some());

        // A late failure must not regress the completed bridge
        let failed = repo.mark_failed(&bridge.bridge_id, "late error").await.unwrap();
        assert!(failed.is_none());

        // Re-arm only applies to failed bridges
        let rearmed = repo.re_arm(&bridge.bridge_id).await.unwrap();
        assert!(rearmed.is_none());

        let row = repo.find_by_transaction(&tx_id).await.unwrap().unwrap();
        assert_eq!(row.status, "completed");
        assert_eq!(row.tx_hash.as_deref(), Some("0xdeadbeef"));
    }

    #[tokio::test]
    async fn test_record_failure_keeps_bridge_pending() {
        let pool = test_pool().await;
        let tx_id = seed_transaction(&pool, "ws_CO_102").await;
        let repo = BridgeRepository::new(pool);

        let bridge = repo
            .create_if_absent(&tx_id, "0x1111111111111111111111111111111111111111", 1, 100.0, None)
            .await
            .unwrap();

        let after = repo
            .record_failure(&bridge.bridge_id, "rpc timeout")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, "pending");
        assert_eq!(after.retry_count, 1);
        assert_eq!(after.error_message.as_deref(), Some("rpc timeout"));
    }

    #[tokio::test]
    async fn test_re_arm_failed_bridge() {
        let pool = test_pool().await;
        let tx_id = seed_transaction(&pool, "ws_CO_103").await;
        let repo = BridgeRepository::new(pool);

        let bridge = repo
            .create_if_absent(&tx_id, "0x1111111111111111111111111111111111111111", 1, 100.0, None)
            .await
            .unwrap();
        repo.record_failure(&bridge.bridge_id, "rpc timeout").await.unwrap();
        repo.mark_failed(&bridge.bridge_id, "retries exhausted").await.unwrap();

        let rearmed = repo.re_arm(&bridge.bridge_id).await.unwrap().unwrap();
        assert_eq!(rearmed.status, "pending");
        assert_eq!(rearmed.retry_count, 0);
        assert!(rearmed.error_message.is_none());
    }
}
