use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::WorkQueue;
use crate::indexer::types::BlockEnvelope;

/// Process-local queue. Waiters are woken through a [`Notify`] permit, so an
/// enqueue that lands between a failed pop and the wait is not lost.
pub struct MemoryQueue {
    blocks: Mutex<VecDeque<BlockEnvelope>>,
    notify: Notify,
    capacity: usize,
}

impl MemoryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: std::cmp::max(1, capacity),
        }
    }

    async fn pop_wait(&self) -> BlockEnvelope {
        loop {
            let notified = {
                let mut blocks = self.blocks.lock().await;
                if let Some(block) = blocks.pop_front() {
                    return block;
                }
                self.notify.notified()
            };
            notified.await;
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, block: BlockEnvelope) -> eyre::Result<()> {
        let mut blocks = self.blocks.lock().await;
        blocks.push_back(block);
        while blocks.len() > self.capacity {
            if let Some(dropped) = blocks.pop_front() {
                tracing::warn!(block = dropped.height, "Block queue full, dropped oldest block");
            }
        }
        drop(blocks);
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> eyre::Result<Option<BlockEnvelope>> {
        Ok(tokio::time::timeout(timeout, self.pop_wait()).await.ok())
    }

    async fn len(&self) -> eyre::Result<usize> {
        Ok(self.blocks.lock().await.len())
    }

    async fn clear(&self) -> eyre::Result<()> {
        self.blocks.lock().await.clear();
        Ok(())
    }
}
