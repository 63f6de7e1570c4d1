use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use super::params::ContractParams;
use super::types::{BlockEnvelope, Contract, ContractKind, Transaction};
use crate::config::TronGridConfig;

/// Anything that can hand out blocks by height. Implementations apply their
/// own timeout and retry and surface a single error once those are exhausted.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn fetch_head(&self) -> eyre::Result<BlockEnvelope>;
    async fn fetch_by_height(&self, height: i64) -> eyre::Result<BlockEnvelope>;
}

#[derive(Debug, Default)]
struct ClientCounters {
    requests: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ClientStats {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
}

/// HTTP client for a TronGrid-compatible full node API.
pub struct TronGridClient {
    http: reqwest::Client,
    base_url: String,
    retry_max: u32,
    retry_delay: Duration,
    counters: ClientCounters,
}

impl TronGridClient {
    pub fn new(config: &TronGridConfig) -> eyre::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(key)
                .map_err(|e| eyre::eyre!("Invalid TronGrid API key: {}", e))?;
            headers.insert("TRON-PRO-API-KEY", value);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| eyre::eyre!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry_max: config.retry_max,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            counters: ClientCounters::default(),
        })
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            request_count: self.counters.requests.load(Ordering::Relaxed),
            success_count: self.counters.successes.load(Ordering::Relaxed),
            error_count: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    async fn get_block(&self, height: Option<i64>) -> eyre::Result<BlockEnvelope> {
        let raw: RawBlock = retry_request(self.retry_max, self.retry_delay, || async move {
            self.counters.requests.fetch_add(1, Ordering::Relaxed);
            let result = self.send(height).await;
            match &result {
                Ok(_) => self.counters.successes.fetch_add(1, Ordering::Relaxed),
                Err(_) => self.counters.errors.fetch_add(1, Ordering::Relaxed),
            };
            result
        })
        .await?;

        raw.into_envelope()
    }

    async fn send(&self, height: Option<i64>) -> eyre::Result<RawBlock> {
        let request = match height {
            None => self.http.get(format!("{}/wallet/getnowblock", self.base_url)),
            Some(num) => self
                .http
                .post(format!("{}/wallet/getblockbynum", self.base_url))
                .json(&serde_json::json!({ "num": num })),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(eyre::eyre!("HTTP {}: {}", status, body));
        }
        Ok(response.json::<RawBlock>().await?)
    }
}

#[async_trait]
impl BlockSource for TronGridClient {
    async fn fetch_head(&self) -> eyre::Result<BlockEnvelope> {
        self.get_block(None).await
    }

    async fn fetch_by_height(&self, height: i64) -> eyre::Result<BlockEnvelope> {
        self.get_block(Some(height))
            .await
            .map_err(|e| eyre::eyre!("Failed to fetch block {}: {}", height, e))
    }
}

/// Retry an async request with a fixed delay between attempts.
/// `retry_max` counts the attempts made after the first one.
pub async fn retry_request<F, Fut, T>(retry_max: u32, delay: Duration, mut f: F) -> eyre::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = eyre::Result<T>>,
{
    for attempt in 0..retry_max {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    retry_max,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "TronGrid request failed, retrying..."
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    f().await
        .map_err(|e| eyre::eyre!("Request failed after {} retries: {}", retry_max, e))
}

// ============================================================
// Wire format
// ============================================================

#[derive(Debug, Deserialize)]
struct RawBlock {
    #[serde(rename = "blockID", default)]
    block_id: String,
    block_header: Option<RawBlockHeader>,
    #[serde(default)]
    transactions: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
struct RawBlockHeader {
    raw_data: RawHeaderData,
}

#[derive(Debug, Deserialize)]
struct RawHeaderData {
    #[serde(default)]
    number: i64,
    #[serde(default)]
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    #[serde(rename = "txID")]
    tx_id: String,
    raw_data: Option<RawTxData>,
}

#[derive(Debug, Deserialize)]
struct RawTxData {
    #[serde(default)]
    contract: Vec<RawContract>,
}

#[derive(Debug, Deserialize)]
struct RawContract {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    parameter: serde_json::Value,
}

impl RawBlock {
    fn into_envelope(self) -> eyre::Result<BlockEnvelope> {
        // The node answers an unknown height with an empty object.
        let header = self
            .block_header
            .ok_or_else(|| eyre::eyre!("block not found"))?;

        let transactions = self
            .transactions
            .into_iter()
            .map(|tx| Transaction {
                id: tx.tx_id,
                contracts: tx
                    .raw_data
                    .map(|data| data.contract)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|c| Contract {
                        kind: ContractKind::from_provider(&c.kind),
                        parameters: ContractParams::new(c.parameter),
                    })
                    .collect(),
            })
            .collect();

        Ok(BlockEnvelope {
            height: header.raw_data.number,
            hash: self.block_id,
            timestamp: header.raw_data.timestamp,
            transactions,
        })
    }
}
