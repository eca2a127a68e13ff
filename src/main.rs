//! CaseDesk notification worker
//!
//! Connects the notification store, applies migrations and runs the queue
//! promoter on its cron schedule until shutdown.

use std::sync::Arc;

use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use casedesk_core::clock::SystemClock;
use casedesk_core::config::AppConfig;
use casedesk_core::error::AppError;
use casedesk_database::DatabasePool;
use casedesk_worker::{CronScheduler, JobExecutor, PROMOTION_JOB, QueuePromoter};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Notification worker failed");
        std::process::exit(1);
    }
}

/// Load configuration from `config/` and `CASEDESK__*` variables
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("CASEDESK_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting casedesk-notify v{}", env!("CARGO_PKG_VERSION"));

    let db = DatabasePool::connect(&config.database).await?;
    casedesk_database::migration::run_migrations(db.pool()).await?;
    let store = Arc::new(db.notification_store(&config.notifications));

    let mut executor = JobExecutor::new();
    executor.register(Arc::new(QueuePromoter::new(
        store,
        Arc::new(SystemClock),
        config.notifications.promotion_batch_size,
    )));
    let executor = Arc::new(executor);

    // Release holds that came due while the worker was down.
    if let Err(e) = executor.run(PROMOTION_JOB).await {
        tracing::warn!(error = %e, "Startup promotion run failed");
    }

    let mut scheduler = if config.worker.enabled {
        let scheduler = CronScheduler::new(Arc::clone(&executor)).await?;
        scheduler.register_configured(&config.worker).await?;
        scheduler.start().await?;
        Some(scheduler)
    } else {
        tracing::info!("Worker disabled; not scheduling promotion");
        None
    };

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    if let Some(scheduler) = scheduler.as_mut() {
        scheduler.shutdown().await?;
    }
    db.close().await;

    tracing::info!("casedesk-notify stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
