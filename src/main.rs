use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use wakili_pay::api::{self, AppState};
use wakili_pay::config::Config;
use wakili_pay::database::{self, ledger_repository::LedgerRepository, payment_repository::PaymentRepository, PoolConfig};
use wakili_pay::gateway::providers::DarajaGateway;
use wakili_pay::notifications::LogNotificationSink;
use wakili_pay::orchestrator::{OrchestratorConfig, PaymentOrchestrator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting Wakili Pay");
    tracing::info!("Environment: {}", config.server.environment);
    tracing::info!("Gateway: {}", config.gateway.base_url);

    // Database pool
    let pool = database::init_pool(
        &config.database.url,
        Some(PoolConfig {
            max_connections: config.database.max_connections,
            ..PoolConfig::default()
        }),
    )
    .await?;

    // Wire up the orchestrator and its collaborators
    let payments = Arc::new(PaymentRepository::new(pool.clone()));
    let ledger = Arc::new(LedgerRepository::new(pool.clone()));
    let gateway = Arc::new(DarajaGateway::new(config.gateway.clone())?);
    let notifications = Arc::new(LogNotificationSink);

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        payments,
        ledger,
        gateway,
        notifications,
        OrchestratorConfig {
            currency: "KES".to_string(),
            refund_privileged_roles: config.refunds.privileged_roles.clone(),
        },
    ));

    let state = AppState {
        config: config.clone(),
        pool,
        orchestrator,
    };
    let app = api::router(state);

    // Start server
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received, draining connections");
    // Give in-flight callbacks a moment to persist
    tokio::time::sleep(Duration::from_millis(100)).await;
}
