use disaster_service::{
    build_router,
    config::DisasterConfig,
    db::{create_pool, run_migrations},
    services::{
        AssistantProvider, Database, EmailNotifier, GoogleTokenVerifier, InMemoryUsageStore,
        LoggingNotifier, Notifier, OpenAiCompatibleProvider, RedisUsageStore, UsageStore,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::observability::{init_metrics, init_tracing};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    // Load configuration - fail fast if invalid
    let config = DisasterConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting disaster service"
    );

    let pool = create_pool(&config.database)
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid DATABASE_URL: {}", e)))?;
    run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
    let db = Database::new(pool.clone());

    let usage: Arc<dyn UsageStore> = match &config.redis {
        Some(redis) => {
            let store = RedisUsageStore::new(redis).await?;
            tracing::info!("Chat quota counters stored in Redis");
            Arc::new(store)
        }
        None => {
            tracing::info!("REDIS_URL not set, chat quota counters kept in memory");
            Arc::new(InMemoryUsageStore::new())
        }
    };

    let notifier: Arc<dyn Notifier> = if config.smtp.enabled {
        Arc::new(EmailNotifier::new(&config.smtp)?)
    } else {
        tracing::info!("Email notifications disabled, alerts will only be logged");
        Arc::new(LoggingNotifier)
    };

    let verifier = Arc::new(GoogleTokenVerifier::new(&config.google)?);
    let assistant: Arc<dyn AssistantProvider> =
        Arc::new(OpenAiCompatibleProvider::new(&config.assistant)?);
    tracing::info!(model = %assistant.model(), "Assistant backend configured");

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    let state = AppState::new(config, db, verifier, assistant, usage, notifier)?;
    let app = build_router(state);

    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    pool.close();
    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
