//! HTLC Swapper - cross-chain atomic swap watcher
//!
//! Reconciles every active swap leg against its chain and composes order
//! outcomes until interrupted.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use htlc_swapper::alert::Alerter;
use htlc_swapper::api::{self, AppState};
use htlc_swapper::chain::ChainManager;
use htlc_swapper::config::{DatabaseConfig, Settings};
use htlc_swapper::metrics::{self, MetricsServer};
use htlc_swapper::scheduler::Scheduler;
use htlc_swapper::screener;
use htlc_swapper::shutdown;
use htlc_swapper::store::{MemoryStore, PgStore, Store};
use htlc_swapper::swap::ChainWatcherFactory;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting HTLC Swapper v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    let store = open_store(&settings.database).await?;

    let chains = Arc::new(ChainManager::new(&settings).await?);
    info!("Chain connections initialized");

    let screener = screener::from_config(&settings.screener)?;
    if screener.is_none() {
        warn!("No screener configured; deposits are not screened");
    }
    let factory = Arc::new(ChainWatcherFactory::new(chains.clone(), &settings, screener));
    let alerter = Arc::new(Alerter::new(
        settings.watcher.instance_id.clone(),
        &settings.alerts,
    ));

    let scheduler = Scheduler::from_settings(&settings, store.clone(), &chains, factory, alerter);
    let (shutdown_handle, shutdown) = shutdown::channel();

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = AppState::new(store.clone(), chains.clone())
            .with_operator_token(settings.api.operator_token.clone());
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let chains = chains.clone();
        let store = store.clone();
        let shutdown = shutdown.clone();
        async move {
            while shutdown.sleep(HEALTH_CHECK_INTERVAL).await {
                let mut healthy = true;
                for (chain, ok) in chains.health_check().await {
                    if !ok {
                        warn!("Chain {} health check failed", chain);
                        healthy = false;
                    }
                }
                if let Err(e) = store.health_check().await {
                    warn!("Store health check failed: {}", e);
                    healthy = false;
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    let scheduler_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { scheduler.run(shutdown).await }
    });

    info!("HTLC Swapper is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    shutdown_signal().await;
    info!("Shutdown signal received, stopping...");
    shutdown_handle.trigger();

    // Loops finish their current tick before exiting
    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task failed: {}", e);
    }
    health_handle.abort();
    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("HTLC Swapper stopped");
    Ok(())
}

async fn open_store(config: &DatabaseConfig) -> Result<Arc<dyn Store>> {
    if config.url.starts_with("memory://") {
        warn!("Using the in-process store; nothing survives a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = PgStore::new(config).await?;
    info!("Database connection established");
    store.run_migrations().await?;
    info!("Database migrations complete");
    Ok(Arc::new(store))
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,htlc_swapper=debug,sqlx=warn,hyper=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
