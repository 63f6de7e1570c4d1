use std::collections::HashSet;

use bigdecimal::BigDecimal;

use super::types::StablecoinStatsResponse;
use crate::config::StablecoinConfig;
use crate::db::EventStore;

/// Aggregates are computed over this many of the most recent transfers.
const STATS_SAMPLE: usize = 1000;
const STATS_RECENT: usize = 10;

pub async fn get_stablecoin_stats(
    store: &dyn EventStore,
    stablecoin: &StablecoinConfig,
) -> eyre::Result<StablecoinStatsResponse> {
    let events = store.recent_events(STATS_SAMPLE, true).await?;

    let mut total = BigDecimal::from(0);
    let mut min: Option<&BigDecimal> = None;
    let mut max: Option<&BigDecimal> = None;
    let mut addresses: HashSet<&str> = HashSet::new();

    for event in &events {
        total += &event.amount;
        min = Some(min.map_or(&event.amount, |m| std::cmp::min(m, &event.amount)));
        max = Some(max.map_or(&event.amount, |m| std::cmp::max(m, &event.amount)));
        addresses.insert(&event.source);
        addresses.insert(&event.destination);
    }

    let average = if events.is_empty() {
        None
    } else {
        Some((&total / BigDecimal::from(events.len() as u64)).round(6))
    };

    Ok(StablecoinStatsResponse {
        symbol: stablecoin.symbol.clone(),
        contract_address: stablecoin.contract_address.clone(),
        sample_size: events.len(),
        average_amount: average,
        min_amount: min.cloned(),
        max_amount: max.cloned(),
        unique_addresses: addresses.len(),
        recent_transfers: events.iter().take(STATS_RECENT).cloned().collect(),
        total_volume: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::indexer::types::{TokenType, TransferEvent};
    use std::str::FromStr;

    fn stable(tx: &str, height: i64, amount: &str, from: &str, to: &str) -> TransferEvent {
        let amount = BigDecimal::from_str(amount).unwrap();
        TransferEvent {
            source: from.to_string(),
            destination: to.to_string(),
            amount: amount.clone(),
            fee: BigDecimal::from(0),
            tx_hash: tx.to_string(),
            contract_index: 0,
            block_height: height,
            timestamp_ms: 0,
            token_type: TokenType::TrackedStablecoin,
            contract_address: Some("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".to_string()),
            asset_name: None,
            is_tracked_stablecoin: true,
            usd_value: Some(amount),
        }
    }

    #[tokio::test]
    async fn test_stats_over_stablecoin_events() {
        let store = MemoryStore::new();
        store.put_event(&stable("a", 1, "10.5", "A", "B")).await.unwrap();
        store.put_event(&stable("b", 2, "1.5", "B", "C")).await.unwrap();
        store.put_event(&stable("c", 3, "3", "A", "C")).await.unwrap();

        let mut native = stable("d", 4, "999", "X", "Y");
        native.is_tracked_stablecoin = false;
        native.token_type = TokenType::Native;
        store.put_event(&native).await.unwrap();

        let stats = get_stablecoin_stats(&store, &StablecoinConfig::default())
            .await
            .unwrap();

        assert_eq!(stats.symbol, "USDT");
        assert_eq!(stats.sample_size, 3);
        assert_eq!(stats.total_volume, BigDecimal::from(15));
        assert_eq!(stats.average_amount, Some(BigDecimal::from(5)));
        assert_eq!(stats.min_amount, Some(BigDecimal::from_str("1.5").unwrap()));
        assert_eq!(stats.max_amount, Some(BigDecimal::from_str("10.5").unwrap()));
        assert_eq!(stats.unique_addresses, 3);
        assert_eq!(stats.recent_transfers[0].tx_hash, "c");
    }

    #[tokio::test]
    async fn test_stats_when_empty() {
        let store = MemoryStore::new();
        let stats = get_stablecoin_stats(&store, &StablecoinConfig::default())
            .await
            .unwrap();
        assert_eq!(stats.sample_size, 0);
        assert!(stats.average_amount.is_none());
        assert!(stats.min_amount.is_none());
        assert!(stats.recent_transfers.is_empty());
    }
}
