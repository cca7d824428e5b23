//! Bridge execution worker
//!
//! Drains pending payment bridges by submitting the on-chain purchase.
//! Transient failures (RPC trouble, confirmation timeouts) are retried with
//! per-row exponential backoff; business failures and exhausted retries
//! mark the bridge permanently failed.

use crate::chains::{PackagePurchaser, PurchaseRequest};
use crate::database::bridge_repository::{BridgeRepository, PaymentBridge};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct BridgeProcessorConfig {
    /// How often the worker wakes up to drain pending bridges.
    pub poll_interval: Duration,
    /// Attempts before a bridge is permanently failed.
    pub max_retries: i64,
    /// Base of the exponential backoff between attempts.
    pub base_backoff: Duration,
    /// Maximum bridges fetched per cycle.
    pub batch_size: i64,
}

impl Default for BridgeProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            max_retries: 5,
            base_backoff: Duration::from_secs(30),
            batch_size: 20,
        }
    }
}

impl BridgeProcessorConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("BRIDGE_PROCESSOR_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.max_retries = std::env::var("BRIDGE_PROCESSOR_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.max_retries);
        cfg.base_backoff = Duration::from_secs(
            std::env::var("BRIDGE_PROCESSOR_BASE_BACKOFF_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.base_backoff.as_secs()),
        );
        cfg.batch_size = std::env::var("BRIDGE_PROCESSOR_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

/// Whether a bridge has waited out its backoff window.
///
/// First attempts run immediately; attempt n waits `base * 2^(n-1)` from
/// the last failure.
fn is_ready_for_attempt(
    retry_count: i64,
    last_attempt_at: DateTime<Utc>,
    base_backoff: Duration,
    now: DateTime<Utc>,
) -> bool {
    if retry_count == 0 {
        return true;
    }
    let exponent = (retry_count - 1).min(16) as u32;
    let wait_secs = base_backoff.as_secs().saturating_mul(1u64 << exponent);
    let ready_at = last_attempt_at + chrono::Duration::seconds(wait_secs as i64);
    now >= ready_at
}

pub struct BridgeProcessorWorker {
    pool: SqlitePool,
    purchaser: Arc<dyn PackagePurchaser>,
    config: BridgeProcessorConfig,
}

impl BridgeProcessorWorker {
    pub fn new(
        pool: SqlitePool,
        purchaser: Arc<dyn PackagePurchaser>,
        config: BridgeProcessorConfig,
    ) -> Self {
        Self {
            pool,
            purchaser,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_retries = self.config.max_retries,
            base_backoff_secs = self.config.base_backoff.as_secs(),
            "bridge processor started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("bridge processor stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "bridge processor cycle failed");
                    }
                }
            }
        }

        info!("bridge processor stopped");
    }

    pub async fn run_cycle(&self) -> anyhow::Result<()> {
        let repo = BridgeRepository::new(self.pool.clone());
        let pending = repo.find_pending(self.config.batch_size).await?;
        let now = Utc::now();

        for bridge in pending {
            if !is_ready_for_attempt(
                bridge.retry_count,
                bridge.updated_at,
                self.config.base_backoff,
                now,
            ) {
                continue;
            }

            self.process_bridge(&repo, &bridge).await?;
        }

        Ok(())
    }

    async fn process_bridge(
        &self,
        repo: &BridgeRepository,
        bridge: &PaymentBridge,
    ) -> anyhow::Result<()> {
        let request = PurchaseRequest {
            buyer_address: bridge.wallet_address.clone(),
            package_id: bridge.package_id as u64,
            amount_usd: bridge.amount_usd,
            referrer_address: bridge.referrer_address.clone(),
        };

        match self.purchaser.execute_purchase(request).await {
            Ok(receipt) => {
                repo.mark_completed(&bridge.bridge_id, &receipt.tx_hash).await?;
                info!(
                    bridge_id = %bridge.bridge_id,
                    transaction_id = %bridge.transaction_id,
                    tx_hash = %receipt.tx_hash,
                    block_number = ?receipt.block_number,
                    "on-chain purchase confirmed"
                );
            }
            Err(e) if !e.is_retryable() => {
                // Definite business failure; retrying cannot help
                error!(
                    bridge_id = %bridge.bridge_id,
                    error = %e,
                    "purchase failed permanently"
                );
                repo.mark_failed(&bridge.bridge_id, &e.to_string()).await?;
            }
            Err(e) => {
                let updated = repo.record_failure(&bridge.bridge_id, &e.to_string()).await?;
                let attempts = updated.map(|b| b.retry_count).unwrap_or(bridge.retry_count + 1);
                if attempts >= self.config.max_retries {
                    error!(
                        bridge_id = %bridge.bridge_id,
                        attempts,
                        error = %e,
                        "purchase retries exhausted"
                    );
                    repo.mark_failed(
                        &bridge.bridge_id,
                        &format!("retries exhausted after {} attempts: {}", attempts, e),
                    )
                    .await?;
                } else {
                    warn!(
                        bridge_id = %bridge.bridge_id,
                        attempts,
                        error = %e,
                        "purchase attempt failed, will retry"
                    );
                }
            }
        }

        Ok(())
    }
}
