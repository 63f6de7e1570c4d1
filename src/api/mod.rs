pub mod handlers;
pub mod queries;
pub mod types;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::StablecoinConfig;
use crate::db::EventStore;
use crate::indexer::client::TronGridClient;
use crate::indexer::monitor::BlockMonitor;
use crate::indexer::processor::BlockProcessor;

pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub monitor: Arc<BlockMonitor>,
    pub processor: Arc<BlockProcessor>,
    /// Request counters for `/status`, when blocks come from TronGrid.
    pub client: Option<Arc<TronGridClient>>,
    pub stablecoin: StablecoinConfig,
}

pub fn router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/status", get(handlers::status))
        .route(
            "/api/v1/addresses",
            get(handlers::list_addresses)
                .post(handlers::add_address)
                .delete(handlers::remove_address),
        )
        .route("/api/v1/transfers", get(handlers::list_transfers))
        .route("/api/v1/transfers/{tx_hash}", get(handlers::transfers_by_tx))
        .route(
            "/api/v1/stablecoin/transfers",
            get(handlers::list_stablecoin_transfers),
        )
        .route("/api/v1/stablecoin/stats", get(handlers::stablecoin_stats))
        .route("/api/v1/monitor/start", post(handlers::start_monitor))
        .route("/api/v1/monitor/stop", post(handlers::stop_monitor))
        .route("/api/v1/monitor/sync", post(handlers::sync_monitor))
        .route("/api/v1/monitor/backfill", post(handlers::backfill))
        .route("/api/v1/processor/start", post(handlers::start_processor))
        .route("/api/v1/processor/stop", post(handlers::stop_processor))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
    shutdown: CancellationToken,
) -> eyre::Result<()> {
    let app = router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
