use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::indexer::client::ClientStats;
use crate::indexer::monitor::{MonitorStats, RangeReport};
use crate::indexer::processor::ProcessorStats;
use crate::indexer::types::{TransferEvent, WatchAddress};

// ============================================================
// Query params / request bodies
// ============================================================

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<i64>,
}

impl LimitParams {
    /// Default 100, capped at 1000.
    pub fn resolve(&self) -> usize {
        self.limit.unwrap_or(100).clamp(1, 1000) as usize
    }
}

#[derive(Debug, Deserialize)]
pub struct AddressRequest {
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct BackfillRequest {
    pub start: i64,
    pub end: i64,
}

// ============================================================
// Health & Status
// ============================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub monitor: MonitorStats,
    pub processor: ProcessorStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientStats>,
    pub watch_address_count: usize,
}

// ============================================================
// Watch addresses
// ============================================================

#[derive(Debug, Serialize)]
pub struct AddressesResponse {
    pub count: usize,
    pub addresses: Vec<WatchAddress>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddressChangeResponse {
    pub address: String,
    pub status: String,
}

// ============================================================
// Transfers
// ============================================================

#[derive(Debug, Serialize)]
pub struct TransfersResponse {
    pub count: usize,
    pub transfers: Vec<TransferEvent>,
}

#[derive(Debug, Serialize)]
pub struct StablecoinStatsResponse {
    pub symbol: String,
    pub contract_address: String,
    /// Number of transfers the aggregates below cover.
    pub sample_size: usize,
    pub total_volume: BigDecimal,
    pub average_amount: Option<BigDecimal>,
    pub min_amount: Option<BigDecimal>,
    pub max_amount: Option<BigDecimal>,
    pub unique_addresses: usize,
    pub recent_transfers: Vec<TransferEvent>,
}

// ============================================================
// Control
// ============================================================

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct RangeResponse {
    pub start: i64,
    pub end: i64,
    #[serde(flatten)]
    pub report: RangeReport,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
