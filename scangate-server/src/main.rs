//! # Scangate Server
//!
//! Daemon wiring for the scanning pipeline: loads configuration, opens
//! the database and applies migrations, builds the storage/detector/
//! queue/store stack, and runs the worker pool until interrupted.
//!
//! The HTTP surface lives outside this binary; transports call into
//! [`scangate_core::ScanService`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use scangate_core::detector::{ClamdDetector, Detector};
use scangate_core::queue::{DispatchQueue, SqliteDispatchQueue};
use scangate_core::service::ScanService;
use scangate_core::storage::{FileStorage, LocalFileStorage};
use scangate_core::store::{JobStore, SqliteJobStore};
use scangate_core::worker::WorkerPool;

mod settings;

#[derive(Parser, Debug)]
#[command(name = "scangate-server")]
#[command(about = "Asynchronous malware-scanning pipeline daemon")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "SCANGATE_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Override worker concurrency from the configuration
    #[arg(long, env = "SCANGATE_WORKERS")]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = settings::load(cli.config.as_deref()).context("load configuration")?;
    if let Some(workers) = cli.workers {
        config.worker.concurrency = workers;
    }

    info!(
        database = %config.database.path.display(),
        storage = %config.storage.root.display(),
        workers = config.worker.concurrency,
        "starting scangate"
    );

    let connect_options = SqliteConnectOptions::new()
        .filename(&config.database.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await
        .context("open database")?;

    sqlx::migrate!("../scangate-core/migrations")
        .run(&pool)
        .await
        .context("apply migrations")?;

    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(pool.clone()));
    let queue: Arc<dyn DispatchQueue> = Arc::new(SqliteDispatchQueue::new(
        pool.clone(),
        config.queue.clone(),
        config.retry,
    ));
    let storage: Arc<dyn FileStorage> = Arc::new(LocalFileStorage::new(&config.storage.root));
    let detector: Arc<dyn Detector> = Arc::new(
        ClamdDetector::new(config.detector.clone()).context("configure detector")?,
    );

    let service = ScanService::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&storage),
        Arc::clone(&detector),
        config.queue.clone(),
        config.retry,
    );

    let health = service.health().await;
    if !health.healthy {
        warn!(
            store = health.store,
            queue = health.queue,
            "pipeline starting degraded"
        );
    } else if !health.detector {
        warn!("detector unreachable at startup; scans will retry with backoff");
    } else {
        info!("pipeline healthy");
    }

    let workers = WorkerPool::new(
        store,
        queue,
        storage,
        detector,
        config.worker,
        config.lease,
    );
    workers.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("listen for shutdown signal")?;
    info!("shutdown signal received");

    workers.shutdown().await;
    pool.close().await;
    info!("scangate stopped");
    Ok(())
}
