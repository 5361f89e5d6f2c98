use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use loan_fee_api::config::{AppConfig, Environment, PaymentProvider, StorageBackend};
use loan_fee_api::database::connection::get_db_client;
use loan_fee_api::database::transaction_store::{
    InMemoryTransactionStore, MongoTransactionStore, TransactionStore,
};
use loan_fee_api::logging::init_tracing;
use loan_fee_api::routes::build_router;
use loan_fee_api::services::gateway::PaymentGateway;
use loan_fee_api::services::mock_gateway::MockGateway;
use loan_fee_api::services::mpesa_service::MpesaService;
use loan_fee_api::state::AppState;
use loan_fee_api::workers::reconciler::{Reconciler, ReconcilerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(Environment::from_env());

    let config = AppConfig::from_env().context("failed to load configuration")?;
    info!(
        environment = %config.mpesa_environment,
        provider = config.payment_provider.as_str(),
        short_code = %config.mpesa_short_code,
        "Configuration loaded"
    );

    let store = initialize_store(&config).await?;
    let gateway = initialize_gateway(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = Reconciler::new(
        store.clone(),
        gateway.clone(),
        ReconcilerConfig::from(&config),
    );
    let reconciler_handle = tokio::spawn(async move { reconciler.run(shutdown_rx).await });

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("HOST/PORT do not form a socket address")?;
    let app = build_router(AppState::new(config, gateway, store));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = reconciler_handle.await {
        error!(error = %e, "Reconciler task ended abnormally");
    }
    info!("Shutdown complete");
    Ok(())
}

async fn initialize_store(config: &AppConfig) -> anyhow::Result<Arc<dyn TransactionStore>> {
    match config.storage {
        StorageBackend::MongoDb => {
            let db = get_db_client(config)
                .await
                .context("failed to connect to MongoDB")?;
            let store = MongoTransactionStore::new(&db);
            if let Err(e) = store.ensure_indexes().await {
                warn!(error = %e, "Could not ensure transaction indexes");
            }
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory transaction store; data is lost on restart");
            Ok(Arc::new(InMemoryTransactionStore::new()))
        }
    }
}

async fn initialize_gateway(config: &AppConfig) -> anyhow::Result<Arc<dyn PaymentGateway>> {
    match config.payment_provider {
        PaymentProvider::Mock => {
            warn!("Mock payment provider active; no real payments will be collected");
            Ok(Arc::new(MockGateway::new()))
        }
        PaymentProvider::Mpesa => {
            let service = MpesaService::new(config.clone()).context("failed to build M-Pesa client")?;

            if config.is_configured() {
                match service.get_access_token().await {
                    Ok(token) => info!(
                        token_prefix = %token.chars().take(8).collect::<String>(),
                        "M-Pesa credentials verified"
                    ),
                    Err(e) => warn!(error = %e, "M-Pesa token probe failed; will retry on demand"),
                }
            }
            Ok(Arc::new(service))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
