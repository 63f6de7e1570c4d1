use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::EventStore;
use crate::indexer::types::{TransferEvent, WatchAddress};

/// Store used when no database is configured. Contents are lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<(String, u32), TransferEvent>>,
    watched: RwLock<HashMap<String, WatchAddress>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(a: &TransferEvent, b: &TransferEvent) -> std::cmp::Ordering {
    b.block_height
        .cmp(&a.block_height)
        .then_with(|| a.tx_hash.cmp(&b.tx_hash))
        .then_with(|| a.contract_index.cmp(&b.contract_index))
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn put_event(&self, event: &TransferEvent) -> eyre::Result<()> {
        let key = (event.tx_hash.clone(), event.contract_index);
        self.events.write().await.insert(key, event.clone());
        Ok(())
    }

    async fn watch_addresses(&self) -> eyre::Result<HashSet<String>> {
        Ok(self.watched.read().await.keys().cloned().collect())
    }

    async fn upsert_address_stats(&self, address: &str, touched_at_ms: i64) -> eyre::Result<()> {
        let touched_at = DateTime::<Utc>::from_timestamp_millis(touched_at_ms);
        if let Some(entry) = self.watched.write().await.get_mut(address) {
            entry.transfer_count += 1;
            entry.last_seen = entry.last_seen.max(touched_at);
        }
        Ok(())
    }

    async fn add_watch_address(&self, address: &str) -> eyre::Result<bool> {
        let mut watched = self.watched.write().await;
        if watched.contains_key(address) {
            return Ok(false);
        }
        watched.insert(address.to_string(), WatchAddress::new(address));
        Ok(true)
    }

    async fn remove_watch_address(&self, address: &str) -> eyre::Result<bool> {
        Ok(self.watched.write().await.remove(address).is_some())
    }

    async fn list_watch_addresses(&self) -> eyre::Result<Vec<WatchAddress>> {
        let mut list: Vec<WatchAddress> = self.watched.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.address.cmp(&b.address)));
        Ok(list)
    }

    async fn recent_events(
        &self,
        limit: usize,
        stablecoin_only: bool,
    ) -> eyre::Result<Vec<TransferEvent>> {
        let events = self.events.read().await;
        let mut matching: Vec<TransferEvent> = events
            .values()
            .filter(|e| !stablecoin_only || e.is_tracked_stablecoin)
            .cloned()
            .collect();
        matching.sort_by(newest_first);
        matching.truncate(limit);
        Ok(matching)
    }

    async fn events_by_tx(&self, tx_hash: &str) -> eyre::Result<Vec<TransferEvent>> {
        let events = self.events.read().await;
        let mut matching: Vec<TransferEvent> = events
            .values()
            .filter(|e| e.tx_hash == tx_hash)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.contract_index);
        Ok(matching)
    }
}
