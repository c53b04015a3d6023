//! NPO Registry server: HTTP API plus the ingestion worker pool

use anyhow::Result;
use npo_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::info;

use npo_server::{
    api,
    config::Config,
    db::{self, PgJobQueue, PgStore},
    features::FeatureState,
    ingest::{IngestConfig, JobContext, JobWorker},
    storage::FileStorage,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let log_config = LogConfig::builder()
        .log_file_prefix("npo-server")
        .filter_directives("npo_server=debug,tower_http=debug,sqlx=warn")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting NPO Registry server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let pool = db::create_pool(&config.database).await?;
    info!("Database connection pool established");

    db::run_migrations(&pool).await?;
    info!("Database migrations completed");

    let ingest_config = Arc::new(IngestConfig::from_env()?);
    let storage = FileStorage::new(config.storage.clone());
    let store = Arc::new(PgStore::new(pool.clone()));
    let queue = Arc::new(PgJobQueue::new(pool.clone(), ingest_config.limits.clone()));

    let workers = if ingest_config.enabled {
        let ctx = JobContext::new(
            store.clone(),
            storage.clone(),
            ingest_config.clone(),
            queue.clone(),
        );
        let handle = JobWorker::new(queue.clone(), ctx).start();
        info!(workers = ingest_config.worker_count, "Ingestion workers started");
        Some(handle)
    } else {
        info!("Ingestion is disabled (INGEST_ENABLED=false)");
        None
    };

    let state = FeatureState {
        db: pool,
        store,
        storage,
        dispatcher: queue,
        ingest: ingest_config,
    };
    let app = api::router(state, &config.cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    if let Some(workers) = workers {
        info!("Waiting for ingestion workers to stop");
        workers.shutdown().await;
    }

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
