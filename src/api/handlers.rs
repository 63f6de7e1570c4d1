use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

use super::queries;
use super::types::*;
use super::AppState;
use crate::error::ControlError;
use crate::indexer::address::is_valid_display_address;
use crate::indexer::monitor::SyncReport;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn api_error(status: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: msg.into(),
        }),
    )
}

fn internal(e: eyre::Report) -> (StatusCode, Json<ErrorResponse>) {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn control_error(e: ControlError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match e {
        ControlError::AlreadyRunning(_) | ControlError::NotRunning(_) => StatusCode::CONFLICT,
        ControlError::InvalidRange { .. } => StatusCode::BAD_REQUEST,
        ControlError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.to_string())
}

fn parse_address(address: &str) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    let address = address.trim();
    if !is_valid_display_address(address) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Invalid address: {}", address),
        ));
    }
    Ok(address.to_string())
}

fn ok(status: &str) -> Json<ControlResponse> {
    Json(ControlResponse {
        status: status.to_string(),
    })
}

// ============================================================
// Health & Status
// ============================================================

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now(),
    })
}

pub async fn status(State(state): State<Arc<AppState>>) -> ApiResult<StatusResponse> {
    let watch_address_count = state.store.watch_addresses().await.map_err(internal)?.len();

    Ok(Json(StatusResponse {
        monitor: state.monitor.stats().await,
        processor: state.processor.stats(),
        client: state.client.as_ref().map(|c| c.stats()),
        watch_address_count,
    }))
}

// ============================================================
// Watch addresses
// ============================================================

pub async fn list_addresses(State(state): State<Arc<AppState>>) -> ApiResult<AddressesResponse> {
    let addresses = state.store.list_watch_addresses().await.map_err(internal)?;
    Ok(Json(AddressesResponse {
        count: addresses.len(),
        addresses,
    }))
}

pub async fn add_address(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddressRequest>,
) -> ApiResult<AddressChangeResponse> {
    let address = parse_address(&body.address)?;
    let added = state
        .store
        .add_watch_address(&address)
        .await
        .map_err(internal)?;

    if added {
        tracing::info!(%address, "Watch address added");
    }
    Ok(Json(AddressChangeResponse {
        address,
        status: if added { "added" } else { "exists" }.to_string(),
    }))
}

pub async fn remove_address(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AddressRequest>,
) -> ApiResult<AddressChangeResponse> {
    let address = parse_address(&params.address)?;
    let removed = state
        .store
        .remove_watch_address(&address)
        .await
        .map_err(internal)?;

    if !removed {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Address not watched: {}", address),
        ));
    }
    tracing::info!(%address, "Watch address removed");
    Ok(Json(AddressChangeResponse {
        address,
        status: "removed".to_string(),
    }))
}

// ============================================================
// Transfers
// ============================================================

pub async fn list_transfers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> ApiResult<TransfersResponse> {
    let transfers = state
        .store
        .recent_events(params.resolve(), false)
        .await
        .map_err(internal)?;
    Ok(Json(TransfersResponse {
        count: transfers.len(),
        transfers,
    }))
}

pub async fn transfers_by_tx(
    State(state): State<Arc<AppState>>,
    Path(tx_hash): Path<String>,
) -> ApiResult<TransfersResponse> {
    let transfers = state
        .store
        .events_by_tx(&tx_hash)
        .await
        .map_err(internal)?;
    if transfers.is_empty() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("No transfers for transaction {}", tx_hash),
        ));
    }
    Ok(Json(TransfersResponse {
        count: transfers.len(),
        transfers,
    }))
}

pub async fn list_stablecoin_transfers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> ApiResult<TransfersResponse> {
    let transfers = state
        .store
        .recent_events(params.resolve(), true)
        .await
        .map_err(internal)?;
    Ok(Json(TransfersResponse {
        count: transfers.len(),
        transfers,
    }))
}

pub async fn stablecoin_stats(
    State(state): State<Arc<AppState>>,
) -> ApiResult<StablecoinStatsResponse> {
    queries::get_stablecoin_stats(state.store.as_ref(), &state.stablecoin)
        .await
        .map(Json)
        .map_err(internal)
}

// ============================================================
// Control
// ============================================================

pub async fn start_monitor(State(state): State<Arc<AppState>>) -> ApiResult<ControlResponse> {
    state.monitor.start().await.map_err(control_error)?;
    Ok(ok("started"))
}

pub async fn stop_monitor(State(state): State<Arc<AppState>>) -> ApiResult<ControlResponse> {
    state.monitor.stop().await.map_err(control_error)?;
    Ok(ok("stopped"))
}

pub async fn sync_monitor(State(state): State<Arc<AppState>>) -> ApiResult<SyncReport> {
    state
        .monitor
        .sync_to_head()
        .await
        .map(Json)
        .map_err(control_error)
}

pub async fn backfill(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BackfillRequest>,
) -> ApiResult<RangeResponse> {
    let report = state
        .monitor
        .process_historical_range(body.start, body.end)
        .await
        .map_err(control_error)?;
    Ok(Json(RangeResponse {
        start: body.start,
        end: body.end,
        report,
    }))
}

pub async fn start_processor(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    state.processor.start().await;
    ok("started")
}

pub async fn stop_processor(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    state.processor.stop().await;
    ok("stopped")
}
