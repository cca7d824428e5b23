//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

use crate::chains::PackagePurchaser;
use crate::payments::provider::StkPushProvider;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone)]
pub enum ComponentState {
    Up,
    Down,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    db_pool: sqlx::SqlitePool,
    provider: Arc<dyn StkPushProvider>,
    purchaser: Arc<dyn PackagePurchaser>,
}

impl HealthChecker {
    pub fn new(
        db_pool: sqlx::SqlitePool,
        provider: Arc<dyn StkPushProvider>,
        purchaser: Arc<dyn PackagePurchaser>,
    ) -> Self {
        Self {
            db_pool,
            provider,
            purchaser,
        }
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let mut database_healthy = true;
        let mut externals_healthy = true;

        // Database: the service cannot run without it
        match timeout(Duration::from_secs(5), check_database_health(&self.db_pool)).await {
            Ok(Ok(response_time)) => {
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::up(Some(response_time)),
                );
                info!("Database health check: OK ({}ms)", response_time);
            }
            Ok(Err(e)) => {
                database_healthy = false;
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::down(Some(e.to_string())),
                );
                error!("Database health check failed: {}", e);
            }
            Err(_) => {
                database_healthy = false;
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
                error!("Database health check timed out");
            }
        }

        // M-Pesa provider: degraded while down, payments queue up
        let start = Instant::now();
        match timeout(Duration::from_secs(10), self.provider.health_check()).await {
            Ok(Ok(())) => {
                health_status.checks.insert(
                    "mpesa".to_string(),
                    ComponentHealth::up(Some(start.elapsed().as_millis())),
                );
            }
            Ok(Err(e)) => {
                externals_healthy = false;
                health_status.checks.insert(
                    "mpesa".to_string(),
                    ComponentHealth::down(Some(e.to_string())),
                );
                error!("M-Pesa health check failed: {}", e);
            }
            Err(_) => {
                externals_healthy = false;
                health_status.checks.insert(
                    "mpesa".to_string(),
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
                error!("M-Pesa health check timed out");
            }
        }

        // BSC: degraded while down, bridges retry later
        let start = Instant::now();
        match timeout(Duration::from_secs(10), self.purchaser.health_check()).await {
            Ok(Ok(block_number)) => {
                health_status.checks.insert(
                    "bsc".to_string(),
                    ComponentHealth {
                        status: ComponentState::Up,
                        response_time_ms: Some(start.elapsed().as_millis()),
                        details: Some(format!("block {}", block_number)),
                    },
                );
            }
            Ok(Err(e)) => {
                externals_healthy = false;
                health_status.checks.insert(
                    "bsc".to_string(),
                    ComponentHealth::down(Some(e.to_string())),
                );
                error!("BSC health check failed: {}", e);
            }
            Err(_) => {
                externals_healthy = false;
                health_status.checks.insert(
                    "bsc".to_string(),
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
                error!("BSC health check timed out");
            }
        }

        health_status.status = if !database_healthy {
            HealthState::Unhealthy
        } else if !externals_healthy {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status
    }
}

pub async fn check_database_health(
    pool: &sqlx::SqlitePool,
) -> Result<u128, Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();

    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => Ok(start.elapsed().as_millis()),
        Err(e) => Err(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));
    }
}
