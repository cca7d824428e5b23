use axum::{
    routing::{get, post},
    Json, Router,
};
use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use blockcoop_bridge::api;
use blockcoop_bridge::chains::bsc::BscClient;
use blockcoop_bridge::chains::PackagePurchaser;
use blockcoop_bridge::config::AppConfig;
use blockcoop_bridge::database::bridge_repository::BridgeRepository;
use blockcoop_bridge::database::transaction_repository::TransactionRepository;
use blockcoop_bridge::database::{init_pool_from_config, init_schema};
use blockcoop_bridge::health::{HealthChecker, HealthState, HealthStatus};
use blockcoop_bridge::logging::init_tracing;
use blockcoop_bridge::middleware::logging::{request_logging_middleware, UuidRequestId};
use blockcoop_bridge::payments::provider::StkPushProvider;
use blockcoop_bridge::payments::providers::daraja::{DarajaConfig, DarajaProvider};
use blockcoop_bridge::services::payment_bridge::{BridgeServiceConfig, PaymentBridgeService};
use blockcoop_bridge::workers;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env must be loaded before the subscriber reads LOG_LEVEL/LOG_FORMAT
    dotenv().ok();
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "Starting BlockCoop payment bridge service"
    );

    let config = AppConfig::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        anyhow::anyhow!(e)
    })?;
    config.validate().map_err(|e| {
        error!("Configuration validation failed: {}", e);
        anyhow::anyhow!(e)
    })?;

    info!("Initializing database connection pool...");
    let db_pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        anyhow::anyhow!(e.to_string())
    })?;
    init_schema(&db_pool).await.map_err(|e| {
        error!("Failed to initialize schema: {}", e);
        anyhow::anyhow!(e.to_string())
    })?;
    info!("Database connection pool initialized");

    info!(base_url = %config.mpesa.base_url, "Initializing Daraja client...");
    let provider: Arc<dyn StkPushProvider> = Arc::new(
        DarajaProvider::new(DarajaConfig::from_mpesa_config(&config.mpesa)).map_err(|e| {
            error!("Failed to initialize Daraja client: {}", e);
            anyhow::anyhow!(e.to_string())
        })?,
    );

    info!(
        rpc_url = %config.bsc.rpc_url,
        chain_id = config.bsc.chain_id,
        "Initializing BSC client..."
    );
    let purchaser: Arc<dyn PackagePurchaser> =
        Arc::new(BscClient::new(&config.bsc).map_err(|e| {
            error!("Failed to initialize BSC client: {}", e);
            anyhow::anyhow!(e.to_string())
        })?);

    let transactions = Arc::new(TransactionRepository::new(db_pool.clone()));
    let bridges = Arc::new(BridgeRepository::new(db_pool.clone()));
    let bridge_service = Arc::new(PaymentBridgeService::new(
        transactions,
        bridges,
        provider.clone(),
        BridgeServiceConfig {
            kes_per_usd: config.mpesa.kes_per_usd,
            ..Default::default()
        },
    ));

    let health_checker = HealthChecker::new(db_pool.clone(), provider.clone(), purchaser.clone());

    // Background workers
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);

    let timeout_monitor_enabled = std::env::var("TIMEOUT_MONITOR_ENABLED")
        .unwrap_or_else(|_| "true".to_string())
        .to_lowercase()
        != "false";
    let mut timeout_monitor_handle = None;
    if timeout_monitor_enabled {
        let monitor_config = workers::timeout_monitor::TimeoutMonitorConfig::from_env();
        info!(
            poll_interval_secs = monitor_config.poll_interval.as_secs(),
            pending_timeout_secs = monitor_config.pending_timeout.as_secs(),
            "Starting payment timeout monitor"
        );
        let worker = workers::timeout_monitor::TimeoutMonitorWorker::new(
            db_pool.clone(),
            provider.clone(),
            monitor_config,
        );
        timeout_monitor_handle = Some(tokio::spawn(worker.run(worker_shutdown_rx.clone())));
    } else {
        info!("Payment timeout monitor disabled (TIMEOUT_MONITOR_ENABLED=false)");
    }

    let bridge_processor_enabled = std::env::var("BRIDGE_PROCESSOR_ENABLED")
        .unwrap_or_else(|_| "true".to_string())
        .to_lowercase()
        != "false";
    let mut bridge_processor_handle = None;
    if bridge_processor_enabled {
        let processor_config = workers::bridge_processor::BridgeProcessorConfig::from_env();
        info!(
            poll_interval_secs = processor_config.poll_interval.as_secs(),
            max_retries = processor_config.max_retries,
            "Starting bridge processor"
        );
        let worker = workers::bridge_processor::BridgeProcessorWorker::new(
            db_pool.clone(),
            purchaser.clone(),
            processor_config,
        );
        bridge_processor_handle = Some(tokio::spawn(worker.run(worker_shutdown_rx)));
    } else {
        info!("Bridge processor disabled (BRIDGE_PROCESSOR_ENABLED=false)");
    }

    // Routes
    let payments_state = api::payments::PaymentsState {
        service: bridge_service.clone(),
    };
    let payment_routes = Router::new()
        .route("/api/payments/initiate", post(api::payments::initiate_payment))
        .route("/api/payments/callback", post(api::payments::handle_callback))
        .route(
            "/api/payments/status/{checkout_request_id}",
            get(api::payments::get_payment_status),
        )
        .route(
            "/api/transactions/wallet/{address}",
            get(api::payments::get_wallet_transactions),
        )
        .route("/api/bridge/{transaction_id}", get(api::payments::get_bridge))
        .route(
            "/api/bridge/{transaction_id}/retry",
            post(api::payments::retry_bridge),
        )
        .with_state(payments_state);

    let stats_routes = Router::new()
        .route("/api/stats", get(api::stats::get_stats))
        .with_state(api::stats::StatsState {
            service: bridge_service,
        });

    let package_routes = Router::new()
        .route(
            "/api/packages/split",
            post(api::packages::compute_package_split),
        )
        .with_state(api::packages::PackagesState);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .merge(payment_routes)
        .merge(stats_routes)
        .merge(package_routes)
        .with_state(AppState { health_checker })
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    info!("Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    for handle in [timeout_monitor_handle, bridge_processor_handle]
        .into_iter()
        .flatten()
    {
        if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for worker shutdown");
        }
    }

    info!("Server shutdown complete");

    Ok(())
}

// Application state
#[derive(Clone)]
struct AppState {
    health_checker: HealthChecker,
}

// Handlers
async fn root() -> &'static str {
    "BlockCoop Payment Bridge API"
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    let health_status = state.health_checker.check_health().await;

    if matches!(health_status.status, HealthState::Unhealthy) {
        error!("Health check failed, service unhealthy");
        Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe, checks all dependencies
async fn readiness(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    health(axum::extract::State(state)).await
}

/// Liveness probe, only checks that the process responds
async fn liveness() -> &'static str {
    "OK"
}
