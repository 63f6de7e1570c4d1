use serde::Deserialize;

use crate::indexer::address::is_valid_display_address;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub trongrid: TronGridConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub watch_addresses: Vec<String>,
    #[serde(default)]
    pub stablecoin: StablecoinConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub log: LogConfig,
}

// ============================================================
// Block source
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct TronGridConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_max")]
    pub retry_max: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for TronGridConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            retry_max: default_retry_max(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.trongrid.io".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retry_max() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

// ============================================================
// Storage
// ============================================================

/// Postgres settings. Without a `url` the indexer keeps events in memory.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
    pub redis_url: Option<String>,
    #[serde(default = "default_queue_key")]
    pub key: String,
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            redis_url: None,
            key: default_queue_key(),
            capacity: default_queue_capacity(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
        }
    }
}

fn default_queue_key() -> String {
    "block_queue".to_string()
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_dequeue_timeout_ms() -> u64 {
    5000
}

// ============================================================
// Monitor / worker pool
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Heads above this height are ignored. 0 disables the ceiling.
    #[serde(default)]
    pub max_block_height: i64,
    /// Heads below this height are ignored. 0 disables the floor.
    #[serde(default)]
    pub start_block_height: i64,
    #[serde(default = "default_max_historical_range")]
    pub max_historical_range: i64,
    #[serde(default)]
    pub filter_native_transfers: bool,
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            worker_count: default_worker_count(),
            max_block_height: 0,
            start_block_height: 0,
            max_historical_range: default_max_historical_range(),
            filter_native_transfers: false,
            idle_sleep_ms: default_idle_sleep_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_worker_count() -> usize {
    4
}

fn default_max_historical_range() -> i64 {
    10_000
}

fn default_idle_sleep_ms() -> u64 {
    100
}

// ============================================================
// Tracked stablecoin
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct StablecoinConfig {
    #[serde(default = "default_stablecoin_symbol")]
    pub symbol: String,
    #[serde(default = "default_stablecoin_address")]
    pub contract_address: String,
    #[serde(default = "default_true")]
    pub enable_monitoring: bool,
    #[serde(default = "default_stablecoin_decimals")]
    pub decimals: u32,
}

impl Default for StablecoinConfig {
    fn default() -> Self {
        Self {
            symbol: default_stablecoin_symbol(),
            contract_address: default_stablecoin_address(),
            enable_monitoring: true,
            decimals: default_stablecoin_decimals(),
        }
    }
}

fn default_stablecoin_symbol() -> String {
    "USDT".to_string()
}

fn default_stablecoin_address() -> String {
    "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".to_string()
}

fn default_stablecoin_decimals() -> u32 {
    6
}

fn default_true() -> bool {
    true
}

// ============================================================
// API / logging
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_api_host")]
    pub host: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
            host: default_api_host(),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> eyre::Result<()> {
        if self.trongrid.base_url.trim().is_empty() {
            return Err(eyre::eyre!("trongrid.base_url must not be empty"));
        }
        if self.monitor.poll_interval_ms < 1000 {
            return Err(eyre::eyre!(
                "monitor.poll_interval_ms must be at least 1000, got {}",
                self.monitor.poll_interval_ms
            ));
        }
        if self.monitor.worker_count == 0 {
            return Err(eyre::eyre!("monitor.worker_count must be greater than 0"));
        }
        if self.monitor.max_historical_range <= 0 {
            return Err(eyre::eyre!(
                "monitor.max_historical_range must be greater than 0"
            ));
        }
        if self.queue.capacity == 0 {
            return Err(eyre::eyre!("queue.capacity must be greater than 0"));
        }
        if self.queue.backend == QueueBackend::Redis && self.queue.redis_url.is_none() {
            return Err(eyre::eyre!(
                "queue.redis_url is required when queue.backend = \"redis\""
            ));
        }
        for (i, address) in self.watch_addresses.iter().enumerate() {
            if !is_valid_display_address(address) {
                return Err(eyre::eyre!(
                    "Invalid watch address '{}' (index {})",
                    address,
                    i
                ));
            }
        }
        if !is_valid_display_address(&self.stablecoin.contract_address) {
            return Err(eyre::eyre!(
                "Invalid stablecoin contract address '{}' for {}",
                self.stablecoin.contract_address,
                self.stablecoin.symbol
            ));
        }
        if self.stablecoin.decimals > 36 {
            return Err(eyre::eyre!(
                "stablecoin.decimals must be at most 36, got {}",
                self.stablecoin.decimals
            ));
        }
        Ok(())
    }
}
