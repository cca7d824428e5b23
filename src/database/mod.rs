pub mod bridge_repository;
pub mod error;
pub mod repository;
pub mod transaction_repository;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{error as log_error, info, warn};

use self::error::DatabaseError;
use crate::config::DatabaseConfig;

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Initialize the database connection pool
pub async fn init_pool(
    database_url: &str,
    config: Option<PoolConfig>,
) -> Result<SqlitePool, DatabaseError> {
    let config = config.unwrap_or_default();

    info!(
        "Initializing database pool: max_connections={}, min_connections={}, connection_timeout={:?}",
        config.max_connections, config.min_connections, config.connection_timeout
    );

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connection_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .map_err(|e| {
            log_error!("Failed to initialize database pool: {}", e);
            DatabaseError::from_sqlx(e)
        })?;

    // Test the connection
    pool.acquire().await.map_err(|e| {
        log_error!("Failed to acquire test connection: {}", e);
        DatabaseError::from_sqlx(e)
    })?;

    info!("Database pool initialized successfully");
    Ok(pool)
}

/// Create the schema if it does not exist.
///
/// The service owns its SQLite file, so the schema is bootstrapped at
/// startup rather than through external migrations.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), DatabaseError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS mpesa_transactions (
            transaction_id      TEXT PRIMARY KEY,
            wallet_address      TEXT NOT NULL,
            package_id          INTEGER NOT NULL,
            phone_number        TEXT NOT NULL,
            amount_usd          REAL NOT NULL,
            amount_kes          REAL NOT NULL,
            status              TEXT NOT NULL DEFAULT 'pending'
                                CHECK (status IN ('pending', 'completed', 'failed', 'timeout')),
            checkout_request_id TEXT UNIQUE,
            merchant_request_id TEXT,
            mpesa_receipt       TEXT,
            result_code         INTEGER,
            result_desc         TEXT,
            referrer_address    TEXT,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS payment_bridges (
            bridge_id        TEXT PRIMARY KEY,
            transaction_id   TEXT NOT NULL UNIQUE
                             REFERENCES mpesa_transactions (transaction_id),
            wallet_address   TEXT NOT NULL,
            package_id       INTEGER NOT NULL,
            amount_usd       REAL NOT NULL,
            referrer_address TEXT,
            status           TEXT NOT NULL DEFAULT 'pending'
                             CHECK (status IN ('pending', 'completed', 'failed')),
            tx_hash          TEXT,
            error_message    TEXT,
            retry_count      INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_mpesa_transactions_wallet
         ON mpesa_transactions (wallet_address)",
    )
    .execute(pool)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_mpesa_transactions_status
         ON mpesa_transactions (status)",
    )
    .execute(pool)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_payment_bridges_status
         ON payment_bridges (status)",
    )
    .execute(pool)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    info!("Database schema ready");
    Ok(())
}

/// Connection pool health check
pub async fn health_check(pool: &SqlitePool) -> Result<(), DatabaseError> {
    let _result = sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!("Health check failed: {}", e);
        DatabaseError::from_sqlx(e)
    })?;

    Ok(())
}

/// Initialize the database pool from application configuration
pub async fn init_pool_from_config(config: &DatabaseConfig) -> Result<SqlitePool, DatabaseError> {
    let pool_config = PoolConfig {
        max_connections: config.max_connections,
        min_connections: config.min_connections,
        connection_timeout: Duration::from_secs(config.connection_timeout),
        idle_timeout: Duration::from_secs(config.idle_timeout.unwrap_or(600)),
        max_lifetime: Duration::from_secs(1800),
    };

    init_pool(&config.url, Some(pool_config)).await
}
