use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::decoder::{ContractContext, TransferDecoder};
use super::types::BlockEnvelope;
use crate::config::{MonitorConfig, QueueConfig};
use crate::db::EventStore;
use crate::queue::WorkQueue;

const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize)]
pub struct ProcessorStats {
    pub running: bool,
    pub processed_count: u64,
    pub events_found_count: u64,
    pub error_count: u64,
    pub worker_count: usize,
}

/// Per-block result of [`BlockProcessor::process_block`]. `requeued` is set
/// when the block went back on the queue untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockReport {
    pub events: u64,
    pub errors: u64,
    pub requeued: bool,
}

struct ProcessorInner {
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn EventStore>,
    decoder: TransferDecoder,
    dequeue_timeout: Duration,
    idle_sleep: Duration,
    processed: AtomicU64,
    events_found: AtomicU64,
    errors: AtomicU64,
}

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One queue consumer. Starting a started worker, or stopping a stopped
/// one, does nothing.
pub struct BlockWorker {
    id: usize,
    inner: Arc<ProcessorInner>,
    task: Mutex<Option<RunningTask>>,
}

impl BlockWorker {
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let token = cancel.clone();
        let id = self.id;
        let handle = tokio::spawn(async move { inner.run_worker(id, token).await });

        *task = Some(RunningTask { cancel, handle });
        tracing::debug!(worker = id, "Worker started");
    }

    pub async fn stop(&self) {
        let Some(running) = self.task.lock().await.take() else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            tracing::warn!(worker = self.id, error = %e, "Worker ended abnormally");
        }
        tracing::debug!(worker = self.id, "Worker stopped");
    }
}

/// Fixed-size pool of workers draining the block queue into the event store.
pub struct BlockProcessor {
    inner: Arc<ProcessorInner>,
    workers: Vec<BlockWorker>,
    running: AtomicBool,
}

impl BlockProcessor {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn EventStore>,
        decoder: TransferDecoder,
        monitor: &MonitorConfig,
        queue_config: &QueueConfig,
    ) -> Self {
        let inner = Arc::new(ProcessorInner {
            queue,
            store,
            decoder,
            dequeue_timeout: Duration::from_millis(queue_config.dequeue_timeout_ms),
            idle_sleep: Duration::from_millis(monitor.idle_sleep_ms),
            processed: AtomicU64::new(0),
            events_found: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        });

        let workers = (0..monitor.worker_count)
            .map(|id| BlockWorker {
                id,
                inner: inner.clone(),
                task: Mutex::new(None),
            })
            .collect();

        Self {
            inner,
            workers,
            running: AtomicBool::new(false),
        }
    }

    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("Block processor already running");
            return;
        }
        join_all(self.workers.iter().map(BlockWorker::start)).await;
        tracing::info!(workers = self.workers.len(), "Block processor started");
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        join_all(self.workers.iter().map(BlockWorker::stop)).await;
        tracing::info!("Block processor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            running: self.is_running(),
            processed_count: self.inner.processed.load(Ordering::Relaxed),
            events_found_count: self.inner.events_found.load(Ordering::Relaxed),
            error_count: self.inner.errors.load(Ordering::Relaxed),
            worker_count: self.workers.len(),
        }
    }

    pub fn reset_stats(&self) {
        self.inner.processed.store(0, Ordering::Relaxed);
        self.inner.events_found.store(0, Ordering::Relaxed);
        self.inner.errors.store(0, Ordering::Relaxed);
    }

    /// Decode and persist one block on the caller's task.
    pub async fn process_block(&self, block: &BlockEnvelope) -> BlockReport {
        self.inner.process_block(block).await
    }
}

impl ProcessorInner {
    async fn run_worker(&self, id: usize, cancel: CancellationToken) {
        // A dequeued block is always finished, so stop is only observed
        // between dequeues. The dequeue timeout bounds the stop latency.
        while !cancel.is_cancelled() {
            let pause = match self.queue.dequeue(self.dequeue_timeout).await {
                Ok(Some(block)) => {
                    let report = self.process_block(&block).await;
                    if !report.requeued {
                        tracing::debug!(
                            worker = id,
                            block = block.height,
                            events = report.events,
                            errors = report.errors,
                            "Block processed"
                        );
                        continue;
                    }
                    ERROR_BACKOFF
                }
                Ok(None) => self.idle_sleep,
                Err(e) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(worker = id, error = %e, "Failed to dequeue block");
                    ERROR_BACKOFF
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = cancel.cancelled() => break,
            }
        }

        tracing::debug!(worker = id, "Worker loop exited");
    }

    async fn process_block(&self, block: &BlockEnvelope) -> BlockReport {
        let mut report = BlockReport::default();

        let watched = match self.store.watch_addresses().await {
            Ok(watched) => watched,
            Err(e) => {
                // Without the watch set every filtered event would be lost.
                self.errors.fetch_add(1, Ordering::Relaxed);
                report.errors += 1;
                tracing::error!(
                    block = block.height,
                    error = %e,
                    "Failed to load watch addresses, requeueing block"
                );
                match self.queue.enqueue(block.clone()).await {
                    Ok(()) => report.requeued = true,
                    Err(e) => {
                        tracing::error!(block = block.height, error = %e, "Failed to requeue block")
                    }
                }
                return report;
            }
        };

        for tx in &block.transactions {
            for (index, contract) in tx.contracts.iter().enumerate() {
                let ctx = ContractContext {
                    block,
                    tx,
                    index: u32::try_from(index).unwrap_or(u32::MAX),
                };

                let event = match self.decoder.decode(contract, ctx, &watched) {
                    Ok(Some(event)) => event,
                    Ok(None) => continue,
                    Err(e) => {
                        self.errors.fetch_add(1, Ordering::Relaxed);
                        report.errors += 1;
                        tracing::warn!(
                            block = block.height,
                            tx = %tx.id,
                            contract_index = index,
                            error = %e,
                            "Failed to decode contract"
                        );
                        continue;
                    }
                };

                self.events_found.fetch_add(1, Ordering::Relaxed);
                report.events += 1;

                report.errors += self
                    .touch_watched(&event.source, &event.destination, &watched, block)
                    .await;

                if let Err(e) = self.store.put_event(&event).await {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    report.errors += 1;
                    tracing::error!(
                        block = block.height,
                        tx = %event.tx_hash,
                        contract_index = event.contract_index,
                        error = %e,
                        "Failed to store transfer event"
                    );
                }
            }
        }

        self.processed.fetch_add(1, Ordering::Relaxed);
        report
    }

    async fn touch_watched(
        &self,
        source: &str,
        destination: &str,
        watched: &HashSet<String>,
        block: &BlockEnvelope,
    ) -> u64 {
        let mut endpoints = vec![source];
        if destination != source {
            endpoints.push(destination);
        }

        let mut errors = 0;
        for address in endpoints.into_iter().filter(|a| watched.contains(*a)) {
            if let Err(e) = self
                .store
                .upsert_address_stats(address, block.timestamp)
                .await
            {
                self.errors.fetch_add(1, Ordering::Relaxed);
                errors += 1;
                tracing::warn!(address, error = %e, "Failed to update address stats");
            }
        }
        errors
    }
}
