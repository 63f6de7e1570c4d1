use std::collections::HashSet;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::EventStore;
use crate::indexer::types::{TokenType, TransferEvent, WatchAddress};

/// Postgres-backed [`EventStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const EVENT_COLUMNS: &str = "tx_hash, contract_index, source, destination, amount, fee, \
     block_height, timestamp_ms, token_type, contract_address, asset_name, \
     is_tracked_stablecoin, usd_value";

type EventRow = (
    String,
    i32,
    String,
    String,
    BigDecimal,
    BigDecimal,
    i64,
    i64,
    String,
    Option<String>,
    Option<String>,
    bool,
    Option<BigDecimal>,
);

fn event_from_row(row: EventRow) -> eyre::Result<TransferEvent> {
    let (
        tx_hash,
        contract_index,
        source,
        destination,
        amount,
        fee,
        block_height,
        timestamp_ms,
        token_type,
        contract_address,
        asset_name,
        is_tracked_stablecoin,
        usd_value,
    ) = row;

    let token_type = TokenType::parse(&token_type)
        .ok_or_else(|| eyre::eyre!("Unknown token type '{}' for tx {}", token_type, tx_hash))?;
    let contract_index = u32::try_from(contract_index)
        .map_err(|_| eyre::eyre!("Negative contract index for tx {}", tx_hash))?;

    Ok(TransferEvent {
        source,
        destination,
        amount,
        fee,
        tx_hash,
        contract_index,
        block_height,
        timestamp_ms,
        token_type,
        contract_address,
        asset_name,
        is_tracked_stablecoin,
        usd_value,
    })
}

#[async_trait]
impl EventStore for PgStore {
    /// Upsert on `(tx_hash, contract_index)` so a redelivered block rewrites
    /// the same rows.
    async fn put_event(&self, event: &TransferEvent) -> eyre::Result<()> {
        let contract_index = i32::try_from(event.contract_index)
            .map_err(|_| eyre::eyre!("Contract index {} out of range", event.contract_index))?;

        sqlx::query(
            "INSERT INTO transfer_events (tx_hash, contract_index, source, destination, amount, fee,
                                          block_height, timestamp_ms, token_type, contract_address,
                                          asset_name, is_tracked_stablecoin, usd_value)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (tx_hash, contract_index) DO UPDATE
             SET source = EXCLUDED.source,
                 destination = EXCLUDED.destination,
                 amount = EXCLUDED.amount,
                 fee = EXCLUDED.fee,
                 block_height = EXCLUDED.block_height,
                 timestamp_ms = EXCLUDED.timestamp_ms,
                 token_type = EXCLUDED.token_type,
                 contract_address = EXCLUDED.contract_address,
                 asset_name = EXCLUDED.asset_name,
                 is_tracked_stablecoin = EXCLUDED.is_tracked_stablecoin,
                 usd_value = EXCLUDED.usd_value",
        )
        .bind(&event.tx_hash)
        .bind(contract_index)
        .bind(&event.source)
        .bind(&event.destination)
        .bind(&event.amount)
        .bind(&event.fee)
        .bind(event.block_height)
        .bind(event.timestamp_ms)
        .bind(event.token_type.as_str())
        .bind(&event.contract_address)
        .bind(&event.asset_name)
        .bind(event.is_tracked_stablecoin)
        .bind(&event.usd_value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn watch_addresses(&self) -> eyre::Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT address FROM watch_addresses")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(a,)| a).collect())
    }

    async fn upsert_address_stats(&self, address: &str, touched_at_ms: i64) -> eyre::Result<()> {
        let touched_at = DateTime::<Utc>::from_timestamp_millis(touched_at_ms);

        // GREATEST skips NULLs, so the first sighting just takes the new time.
        sqlx::query(
            "UPDATE watch_addresses
             SET transfer_count = transfer_count + 1,
                 last_seen = GREATEST(last_seen, $2)
             WHERE address = $1",
        )
        .bind(address)
        .bind(touched_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn add_watch_address(&self, address: &str) -> eyre::Result<bool> {
        let result = sqlx::query(
            "INSERT INTO watch_addresses (address, added_at, transfer_count)
             VALUES ($1, NOW(), 0)
             ON CONFLICT (address) DO NOTHING",
        )
        .bind(address)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_watch_address(&self, address: &str) -> eyre::Result<bool> {
        let result = sqlx::query("DELETE FROM watch_addresses WHERE address = $1")
            .bind(address)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_watch_addresses(&self) -> eyre::Result<Vec<WatchAddress>> {
        let rows: Vec<(String, DateTime<Utc>, Option<DateTime<Utc>>, i64)> = sqlx::query_as(
            "SELECT address, added_at, last_seen, transfer_count
             FROM watch_addresses
             ORDER BY added_at, address",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(address, added_at, last_seen, transfer_count)| WatchAddress {
                address,
                added_at,
                last_seen,
                transfer_count,
            })
            .collect())
    }

    async fn recent_events(
        &self,
        limit: usize,
        stablecoin_only: bool,
    ) -> eyre::Result<Vec<TransferEvent>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS}
             FROM transfer_events
             WHERE ($1 = FALSE OR is_tracked_stablecoin)
             ORDER BY block_height DESC, tx_hash, contract_index
             LIMIT $2"
        ))
        .bind(stablecoin_only)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }

    async fn events_by_tx(&self, tx_hash: &str) -> eyre::Result<Vec<TransferEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS}
             FROM transfer_events
             WHERE tx_hash = $1
             ORDER BY contract_index"
        ))
        .bind(tx_hash)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(token_type: &str, contract_index: i32) -> EventRow {
        (
            "aa".to_string(),
            contract_index,
            "TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV".to_string(),
            "TD5gsCwxykWsLN9aPrq2TAfNjByuZKYp4E".to_string(),
            BigDecimal::from(5),
            BigDecimal::from(0),
            100,
            1_700_000_000_000,
            token_type.to_string(),
            None,
            None,
            false,
            None,
        )
    }

    #[test]
    fn test_event_from_row() {
        let event = event_from_row(row("TRC10", 2)).unwrap();
        assert_eq!(event.token_type, TokenType::FirstClassToken);
        assert_eq!(event.contract_index, 2);
        assert_eq!(event.amount, BigDecimal::from(5));
    }

    #[test]
    fn test_event_from_bad_row() {
        assert!(event_from_row(row("ERC20", 0)).is_err());
        assert!(event_from_row(row("TRX", -1)).is_err());
    }
}
