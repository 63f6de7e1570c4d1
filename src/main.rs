use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tronwatch_indexer::api::AppState;
use tronwatch_indexer::config::{Config, LogConfig, LogFormat};
use tronwatch_indexer::db::{self, EventStore, MemoryStore, PgStore};
use tronwatch_indexer::indexer::client::TronGridClient;
use tronwatch_indexer::indexer::decoder::TransferDecoder;
use tronwatch_indexer::indexer::monitor::BlockMonitor;
use tronwatch_indexer::indexer::processor::BlockProcessor;
use tronwatch_indexer::queue;

fn init_logging(log: &LogConfig) {
    // RUST_LOG wins over the config file
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn open_store(config: &Config) -> eyre::Result<Arc<dyn EventStore>> {
    let Some(url) = config.database.url.as_deref() else {
        tracing::warn!("No database configured, events are kept in memory only");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(url)
        .await
        .map_err(|e| eyre::eyre!("Failed to connect to database: {}", e))?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| eyre::eyre!("Failed to run migrations: {}", e))?;

    tracing::info!("Database migrations complete");
    Ok(Arc::new(PgStore::new(pool)))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    init_logging(&config.log);

    tracing::info!(
        watch_addresses = config.watch_addresses.len(),
        workers = config.monitor.worker_count,
        "Configuration loaded from {}",
        config_path
    );

    let store = open_store(&config).await?;

    let seeded = db::seed_watch_addresses(store.as_ref(), &config.watch_addresses).await?;
    tracing::info!(added = seeded, "Watch addresses seeded");

    let queue = queue::connect(&config.queue).await?;
    let client = Arc::new(TronGridClient::new(&config.trongrid)?);

    let decoder = TransferDecoder::new(
        config.stablecoin.clone(),
        config.monitor.filter_native_transfers,
    );
    let processor = Arc::new(BlockProcessor::new(
        queue.clone(),
        store.clone(),
        decoder,
        &config.monitor,
        &config.queue,
    ));
    let monitor = Arc::new(BlockMonitor::new(
        client.clone(),
        queue.clone(),
        config.monitor.clone(),
    ));

    if config.monitor.start_block_height > 0 {
        monitor.set_last_processed_height(config.monitor.start_block_height - 1);
    }

    processor.start().await;
    monitor.start().await?;

    let shutdown = CancellationToken::new();

    let api_handle = if config.api.enabled {
        let state = AppState {
            store: store.clone(),
            monitor: monitor.clone(),
            processor: processor.clone(),
            client: Some(client.clone()),
            stablecoin: config.stablecoin.clone(),
        };
        let host = config.api.host.clone();
        let port = config.api.port;
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = tronwatch_indexer::api::serve(state, &host, port, shutdown).await {
                tracing::error!(error = %e, "API server failed");
            }
        }))
    } else {
        None
    };

    tracing::info!("Indexer running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping...");

    // The monitor may already have been stopped over the API.
    if let Err(e) = monitor.stop().await {
        tracing::debug!(error = %e, "Monitor stop skipped");
    }
    processor.stop().await;
    shutdown.cancel();

    if let Some(handle) = api_handle {
        let _ = handle.await;
    }

    let stats = processor.stats();
    tracing::info!(
        blocks = stats.processed_count,
        events = stats.events_found_count,
        errors = stats.error_count,
        "Indexer stopped gracefully"
    );
    Ok(())
}
