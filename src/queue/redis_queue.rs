use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use super::WorkQueue;
use crate::indexer::types::BlockEnvelope;

/// Redis list queue shared between processes.
///
/// Producers `LPUSH` and trim the list to capacity in one transaction, so the
/// tail (oldest) is what gets dropped. Consumers `BRPOP` from the tail.
pub struct RedisQueue {
    connection: MultiplexedConnection,
    // BRPOP parks its connection; keep it off the one producers use.
    pop_connection: Mutex<MultiplexedConnection>,
    key: String,
    capacity: usize,
}

impl RedisQueue {
    pub async fn connect(url: &str, key: &str, capacity: usize) -> eyre::Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| eyre::eyre!("Invalid Redis URL '{}': {}", url, e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| eyre::eyre!("Failed to connect to Redis: {}", e))?;
        let pop_connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| eyre::eyre!("Failed to connect to Redis: {}", e))?;

        Ok(Self {
            connection,
            pop_connection: Mutex::new(pop_connection),
            key: key.to_string(),
            capacity: std::cmp::max(1, capacity),
        })
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn enqueue(&self, block: BlockEnvelope) -> eyre::Result<()> {
        let payload = serde_json::to_string(&block)?;
        let mut conn = self.connection.clone();

        let _: () = redis::pipe()
            .atomic()
            .lpush(&self.key, payload)
            .ignore()
            .ltrim(&self.key, 0, trim_stop(self.capacity))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| eyre::eyre!("Failed to enqueue block {}: {}", block.height, e))?;

        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> eyre::Result<Option<BlockEnvelope>> {
        let mut conn = self.pop_connection.lock().await;

        // A zero BRPOP timeout would block forever.
        let payload: Option<String> = if timeout.is_zero() {
            conn.rpop(&self.key, None).await?
        } else {
            let reply: Option<(String, String)> = redis::cmd("BRPOP")
                .arg(&self.key)
                .arg(timeout.as_secs_f64())
                .query_async(&mut *conn)
                .await?;
            reply.map(|(_, payload)| payload)
        };

        match payload {
            Some(payload) => {
                let block = serde_json::from_str(&payload)
                    .map_err(|e| eyre::eyre!("Malformed block in queue '{}': {}", self.key, e))?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    async fn len(&self) -> eyre::Result<usize> {
        let mut conn = self.connection.clone();
        let len: usize = conn.llen(&self.key).await?;
        Ok(len)
    }

    async fn clear(&self) -> eyre::Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(&self.key).await?;
        Ok(())
    }
}

/// Last index kept by `LTRIM 0 stop`.
fn trim_stop(capacity: usize) -> isize {
    isize::try_from(capacity).unwrap_or(isize::MAX) - 1
}
