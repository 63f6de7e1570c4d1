use std::collections::HashSet;

use async_trait::async_trait;

use crate::indexer::types::{TransferEvent, WatchAddress};

pub mod memory;
pub mod repository;

pub use self::memory::MemoryStore;
pub use self::repository::PgStore;

/// Persistence for decoded events and the watch-address registry.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert or overwrite the event keyed by `(tx_hash, contract_index)`.
    async fn put_event(&self, event: &TransferEvent) -> eyre::Result<()>;

    async fn watch_addresses(&self) -> eyre::Result<HashSet<String>>;

    /// Count one transfer against a registered address. Unregistered
    /// addresses are left alone, so a removal is never undone by a late event.
    async fn upsert_address_stats(&self, address: &str, touched_at_ms: i64) -> eyre::Result<()>;

    /// Returns `false` when the address was already registered.
    async fn add_watch_address(&self, address: &str) -> eyre::Result<bool>;

    /// Returns `false` when the address was not registered.
    async fn remove_watch_address(&self, address: &str) -> eyre::Result<bool>;

    async fn list_watch_addresses(&self) -> eyre::Result<Vec<WatchAddress>>;

    /// Newest first, by block height.
    async fn recent_events(
        &self,
        limit: usize,
        stablecoin_only: bool,
    ) -> eyre::Result<Vec<TransferEvent>>;

    async fn events_by_tx(&self, tx_hash: &str) -> eyre::Result<Vec<TransferEvent>>;
}

/// Register every configured address that is not yet known.
pub async fn seed_watch_addresses(store: &dyn EventStore, addresses: &[String]) -> eyre::Result<usize> {
    let mut added = 0;
    for address in addresses {
        if store.add_watch_address(address).await? {
            added += 1;
        }
    }
    Ok(added)
}
