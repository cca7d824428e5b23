//! Pending-payment timeout monitor
//!
//! Sweeps transactions that have sat in `pending` past the absolute
//! deadline. Each is given one last status query against the provider; a
//! definite verdict settles the row, anything else becomes `timeout`.

use crate::database::bridge_repository::BridgeRepository;
use crate::database::transaction_repository::TransactionRepository;
use crate::payments::provider::StkPushProvider;
use crate::payments::types::{result_codes, StkStatusVerdict};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct TimeoutMonitorConfig {
    /// How often the worker wakes up to sweep.
    pub poll_interval: Duration,
    /// Absolute wall-clock deadline from `created_at`; pending rows older
    /// than this are settled or timed out.
    pub pending_timeout: Duration,
    /// Maximum rows fetched per cycle.
    pub batch_size: i64,
}

impl Default for TimeoutMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            pending_timeout: Duration::from_secs(180),
            batch_size: 100,
        }
    }
}

impl TimeoutMonitorConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("TIMEOUT_MONITOR_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.pending_timeout = Duration::from_secs(
            std::env::var("TIMEOUT_MONITOR_PENDING_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.pending_timeout.as_secs()),
        );
        cfg.batch_size = std::env::var("TIMEOUT_MONITOR_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

pub struct TimeoutMonitorWorker {
    pool: SqlitePool,
    provider: Arc<dyn StkPushProvider>,
    config: TimeoutMonitorConfig,
}

impl TimeoutMonitorWorker {
    pub fn new(
        pool: SqlitePool,
        provider: Arc<dyn StkPushProvider>,
        config: TimeoutMonitorConfig,
    ) -> Self {
        Self {
            pool,
            provider,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            pending_timeout_secs = self.config.pending_timeout.as_secs(),
            "payment timeout monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment timeout monitor stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "timeout monitor cycle failed");
                    }
                }
            }
        }

        info!("payment timeout monitor stopped");
    }

    pub async fn run_cycle(&self) -> anyhow::Result<()> {
        let tx_repo = TransactionRepository::new(self.pool.clone());
        let bridge_repo = BridgeRepository::new(self.pool.clone());

        let deadline = chrono::Duration::from_std(self.config.pending_timeout)?;
        let cutoff = chrono::Utc::now() - deadline;
        let stale = tx_repo
            .find_pending_older_than(cutoff, self.config.batch_size)
            .await?;

        for tx in stale {
            let Some(checkout_id) = tx.checkout_request_id.as_deref() else {
                // Row never got a checkout id; nothing to query
                tx_repo.mark_timed_out(&tx.transaction_id).await?;
                continue;
            };

            match self.provider.query_status(checkout_id).await {
                Ok(StkStatusVerdict::Completed) => {
                    let updated = tx_repo
                        .mark_completed(checkout_id, None, 0, "Confirmed via status query")
                        .await?;
                    if let Some(updated) = updated {
                        bridge_repo
                            .create_if_absent(
                                &updated.transaction_id,
                                &updated.wallet_address,
                                updated.package_id,
                                updated.amount_usd,
                                updated.referrer_address.as_deref(),
                            )
                            .await?;
                        info!(
                            transaction_id = %updated.transaction_id,
                            "late completion found during timeout sweep"
                        );
                    }
                }
                Ok(StkStatusVerdict::Failed {
                    result_code,
                    result_desc,
                }) => {
                    // 1037 is the provider's own timeout verdict
                    if result_code == result_codes::REQUEST_TIMEOUT {
                        tx_repo.mark_timed_out(&tx.transaction_id).await?;
                    } else {
                        tx_repo
                            .mark_failed(checkout_id, result_code, &result_desc)
                            .await?;
                    }
                }
                Ok(StkStatusVerdict::StillPending) => {
                    // Past the deadline with no verdict
                    warn!(
                        transaction_id = %tx.transaction_id,
                        "no payment verdict past deadline, timing out"
                    );
                    tx_repo.mark_timed_out(&tx.transaction_id).await?;
                }
                Err(e) => {
                    warn!(
                        transaction_id = %tx.transaction_id,
                        error = %e,
                        "status query failed during timeout sweep, timing out"
                    );
                    tx_repo.mark_timed_out(&tx.transaction_id).await?;
                }
            }
        }

        Ok(())
    }
}
