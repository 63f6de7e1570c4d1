use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{QueueBackend, QueueConfig};
use crate::indexer::types::BlockEnvelope;

pub mod memory;
pub mod redis_queue;

pub use self::memory::MemoryQueue;
pub use self::redis_queue::RedisQueue;

/// Bounded FIFO of blocks between the monitor and the workers.
///
/// `enqueue` never waits for room: once the queue is over capacity the oldest
/// entries are dropped. `dequeue` waits up to `timeout` and yields `None` when
/// nothing arrived.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, block: BlockEnvelope) -> eyre::Result<()>;
    async fn dequeue(&self, timeout: Duration) -> eyre::Result<Option<BlockEnvelope>>;
    async fn len(&self) -> eyre::Result<usize>;
    async fn clear(&self) -> eyre::Result<()>;

    async fn is_empty(&self) -> eyre::Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Build the queue selected by `[queue].backend`.
pub async fn connect(config: &QueueConfig) -> eyre::Result<Arc<dyn WorkQueue>> {
    match config.backend {
        QueueBackend::Memory => {
            tracing::info!(capacity = config.capacity, "Using in-memory block queue");
            Ok(Arc::new(MemoryQueue::new(config.capacity)))
        }
        QueueBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| eyre::eyre!("queue.redis_url is not set"))?;
            let queue = RedisQueue::connect(url, &config.key, config.capacity).await?;
            tracing::info!(key = %config.key, capacity = config.capacity, "Using Redis block queue");
            Ok(Arc::new(queue))
        }
    }
}
