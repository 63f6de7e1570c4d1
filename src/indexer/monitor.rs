use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::BlockSource;
use crate::config::MonitorConfig;
use crate::error::ControlError;
use crate::queue::WorkQueue;

/// Most heights a single live tick will backfill. Older missed heights are
/// left to `process_historical_range`.
pub const BACKFILL_WINDOW: i64 = 10;

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Head is not past the frontier.
    UpToDate { head: i64 },
    /// Head is outside the configured floor/ceiling.
    OutOfBounds { head: i64 },
    /// Heights `from..=to` were attempted.
    Enqueued { from: i64, to: i64, report: RangeReport },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RangeReport {
    pub enqueued: u64,
    pub failed: u64,
    pub cancelled: bool,
}

/// Result of [`BlockMonitor::sync_to_head`]. `from` is `None` when the
/// frontier was already at the head. `skipped` counts the heights between
/// the old frontier and `from` that were left out to respect the range limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub head: i64,
    pub from: Option<i64>,
    pub skipped: i64,
    #[serde(flatten)]
    pub report: RangeReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub running: bool,
    pub last_processed_height: i64,
    pub processed_count: u64,
    pub error_count: u64,
    pub queue_depth: usize,
    pub poll_interval_ms: u64,
}

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct MonitorInner {
    source: Arc<dyn BlockSource>,
    queue: Arc<dyn WorkQueue>,
    config: MonitorConfig,
    last_processed: AtomicI64,
    processed: AtomicU64,
    errors: AtomicU64,
    running: AtomicBool,
}

/// Polls the chain head, recovers short gaps and feeds the work queue.
pub struct BlockMonitor {
    inner: Arc<MonitorInner>,
    task: Mutex<Option<RunningTask>>,
}

impl BlockMonitor {
    pub fn new(
        source: Arc<dyn BlockSource>,
        queue: Arc<dyn WorkQueue>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                source,
                queue,
                config,
                last_processed: AtomicI64::new(0),
                processed: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                running: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<(), ControlError> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(ControlError::AlreadyRunning("block monitor"));
        }

        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { inner.run(token).await });

        *task = Some(RunningTask { cancel, handle });
        self.inner.running.store(true, Ordering::SeqCst);

        tracing::info!(
            poll_interval_ms = self.inner.config.poll_interval_ms,
            last_processed = self.last_processed_height(),
            "Block monitor started"
        );
        Ok(())
    }

    /// Cancel the polling task and wait for it to finish its current step.
    pub async fn stop(&self) -> Result<(), ControlError> {
        let running = self
            .task
            .lock()
            .await
            .take()
            .ok_or(ControlError::NotRunning("block monitor"))?;

        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            tracing::warn!(error = %e, "Block monitor task ended abnormally");
        }
        self.inner.running.store(false, Ordering::SeqCst);

        tracing::info!("Block monitor stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Run one tick outside the polling loop.
    pub async fn poll_once(&self) -> eyre::Result<PollOutcome> {
        let cancel = self.current_token().await;
        self.inner.poll(&cancel).await
    }

    /// Enqueue every height in `start..=end`, without the live backfill window.
    /// The frontier is left untouched.
    pub async fn process_historical_range(
        &self,
        start: i64,
        end: i64,
    ) -> Result<RangeReport, ControlError> {
        if start < 0 || start > end {
            return Err(ControlError::InvalidRange {
                start,
                end,
                reason: "start must be non-negative and not after end".to_string(),
            });
        }
        let span = end - start + 1;
        if span > self.inner.config.max_historical_range {
            return Err(ControlError::InvalidRange {
                start,
                end,
                reason: format!(
                    "range of {} blocks exceeds the limit of {}",
                    span, self.inner.config.max_historical_range
                ),
            });
        }

        tracing::info!(start, end, "Processing historical range");
        let cancel = self.current_token().await;
        let report = self.inner.enqueue_range(start, end, &cancel).await;
        tracing::info!(
            start,
            end,
            enqueued = report.enqueued,
            failed = report.failed,
            cancelled = report.cancelled,
            "Historical range done"
        );
        Ok(report)
    }

    /// Enqueue everything between the frontier and the current head, then
    /// move the frontier to that head.
    pub async fn sync_to_head(&self) -> Result<SyncReport, ControlError> {
        let head = self.inner.source.fetch_head().await?.height;
        let last = self.last_processed_height();
        if head <= last {
            return Ok(SyncReport {
                head,
                from: None,
                skipped: 0,
                report: RangeReport::default(),
            });
        }

        let limit = self.inner.config.max_historical_range;
        let mut start = last + 1;
        let mut skipped = 0;
        if head - start + 1 > limit {
            let clamped = head - limit + 1;
            skipped = clamped - start;
            tracing::warn!(
                from = start,
                to = head,
                limit,
                skipped,
                "Sync range exceeds limit, syncing most recent blocks only"
            );
            start = clamped;
        }

        tracing::info!(from = start, to = head, "Syncing to head");
        let cancel = self.current_token().await;
        let report = self.inner.enqueue_range(start, head, &cancel).await;
        if !report.cancelled {
            self.inner.last_processed.fetch_max(head, Ordering::SeqCst);
        }
        Ok(SyncReport {
            head,
            from: Some(start),
            skipped,
            report,
        })
    }

    pub fn last_processed_height(&self) -> i64 {
        self.inner.last_processed.load(Ordering::SeqCst)
    }

    /// Explicit reset. The only way the frontier moves backwards.
    pub fn set_last_processed_height(&self, height: i64) {
        self.inner.last_processed.store(height, Ordering::SeqCst);
        tracing::info!(height, "Frontier reset");
    }

    pub fn reset_stats(&self) {
        self.inner.processed.store(0, Ordering::Relaxed);
        self.inner.errors.store(0, Ordering::Relaxed);
    }

    pub async fn stats(&self) -> MonitorStats {
        let queue_depth = match self.inner.queue.len().await {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read queue depth");
                0
            }
        };

        MonitorStats {
            running: self.is_running(),
            last_processed_height: self.last_processed_height(),
            processed_count: self.inner.processed.load(Ordering::Relaxed),
            error_count: self.inner.errors.load(Ordering::Relaxed),
            queue_depth,
            poll_interval_ms: self.inner.config.poll_interval_ms,
        }
    }

    /// The running loop's token, so stop() also interrupts admin work. A
    /// fresh token when idle.
    async fn current_token(&self) -> CancellationToken {
        match self.task.lock().await.as_ref() {
            Some(running) => running.cancel.clone(),
            None => CancellationToken::new(),
        }
    }
}

impl MonitorInner {
    async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => break,
            }

            tokio::select! {
                result = self.poll(&cancel) => {
                    match result {
                        Ok(outcome) => tracing::trace!(?outcome, "Poll complete"),
                        Err(e) => {
                            self.errors.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(error = %e, "Failed to poll chain head");
                        }
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        tracing::debug!("Block monitor loop exited");
    }

    async fn poll(&self, cancel: &CancellationToken) -> eyre::Result<PollOutcome> {
        let head = self.source.fetch_head().await?;
        let head_height = head.height;
        let last = self.last_processed.load(Ordering::SeqCst);

        if head_height <= last {
            return Ok(PollOutcome::UpToDate { head: head_height });
        }

        let above_ceiling =
            self.config.max_block_height > 0 && head_height > self.config.max_block_height;
        let below_floor =
            self.config.start_block_height > 0 && head_height < self.config.start_block_height;
        if above_ceiling || below_floor {
            tracing::debug!(
                head = head_height,
                max_block_height = self.config.max_block_height,
                start_block_height = self.config.start_block_height,
                "Head outside configured bounds, skipping"
            );
            return Ok(PollOutcome::OutOfBounds { head: head_height });
        }

        let gap = head_height - last;
        let outcome = if gap <= 1 {
            let mut report = RangeReport::default();
            match self.queue.enqueue(head).await {
                Ok(()) => {
                    self.processed.fetch_add(1, Ordering::Relaxed);
                    report.enqueued = 1;
                }
                Err(e) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    report.failed = 1;
                    tracing::warn!(block = head_height, error = %e, "Failed to enqueue block");
                }
            }
            PollOutcome::Enqueued {
                from: head_height,
                to: head_height,
                report,
            }
        } else {
            let from = std::cmp::max(last + 1, head_height - (BACKFILL_WINDOW - 1));
            tracing::info!(
                last_processed = last,
                head = head_height,
                from,
                skipped = from - last - 1,
                "Gap detected, backfilling"
            );
            let report = self.enqueue_range(from, head_height, cancel).await;
            PollOutcome::Enqueued {
                from,
                to: head_height,
                report,
            }
        };

        // Heights that failed above are not retried by the live loop.
        self.last_processed.fetch_max(head_height, Ordering::SeqCst);
        Ok(outcome)
    }

    async fn enqueue_range(&self, start: i64, end: i64, cancel: &CancellationToken) -> RangeReport {
        let mut report = RangeReport::default();

        for height in start..=end {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let block = match self.source.fetch_by_height(height).await {
                Ok(block) => block,
                Err(e) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    report.failed += 1;
                    tracing::warn!(block = height, error = %e, "Failed to fetch block, skipping");
                    continue;
                }
            };

            match self.queue.enqueue(block).await {
                Ok(()) => {
                    self.processed.fetch_add(1, Ordering::Relaxed);
                    report.enqueued += 1;
                }
                Err(e) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    report.failed += 1;
                    tracing::warn!(block = height, error = %e, "Failed to enqueue block");
                }
            }
        }

        report
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::indexer::types::BlockEnvelope;
    use crate::queue::MemoryQueue;
    use async_trait::async_trait;
    use std::collections::HashSet;

    /// Block source whose head is set by the test. Heights in `missing`
    /// fail to fetch.
    #[derive(Default)]
    pub struct ScriptedSource {
        pub head: AtomicI64,
        pub missing: std::sync::Mutex<HashSet<i64>>,
        pub fetched: std::sync::Mutex<Vec<i64>>,
    }

    impl ScriptedSource {
        pub fn with_head(head: i64) -> Self {
            let source = Self::default();
            source.head.store(head, Ordering::SeqCst);
            source
        }
    }

    fn empty_block(height: i64) -> BlockEnvelope {
        BlockEnvelope {
            height,
            hash: format!("{:064x}", height),
            timestamp: 1_700_000_000_000 + height * 3000,
            transactions: vec![],
        }
    }

    #[async_trait]
    impl BlockSource for ScriptedSource {
        async fn fetch_head(&self) -> eyre::Result<BlockEnvelope> {
            Ok(empty_block(self.head.load(Ordering::SeqCst)))
        }

        async fn fetch_by_height(&self, height: i64) -> eyre::Result<BlockEnvelope> {
            self.fetched.lock().unwrap().push(height);
            if self.missing.lock().unwrap().contains(&height) {
                return Err(eyre::eyre!("block not found"));
            }
            Ok(empty_block(height))
        }
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            poll_interval_ms: 10,
            ..MonitorConfig::default()
        }
    }

    fn monitor_with(
        source: Arc<ScriptedSource>,
        config: MonitorConfig,
    ) -> (BlockMonitor, Arc<MemoryQueue>) {
        let queue = Arc::new(MemoryQueue::new(1000));
        let monitor = BlockMonitor::new(source, queue.clone(), config);
        (monitor, queue)
    }

    async fn queued_heights(queue: &MemoryQueue) -> Vec<i64> {
        let mut heights = Vec::new();
        while let Some(b) = queue.dequeue(Duration::from_millis(1)).await.unwrap() {
            heights.push(b.height);
        }
        heights
    }

    #[tokio::test]
    async fn test_gap_recovery_is_clamped() {
        let source = Arc::new(ScriptedSource::with_head(115));
        let (monitor, queue) = monitor_with(source.clone(), config());
        monitor.set_last_processed_height(100);

        let outcome = monitor.poll_once().await.unwrap();

        assert!(matches!(
            outcome,
            PollOutcome::Enqueued { from: 106, to: 115, .. }
        ));
        assert_eq!(queued_heights(&queue).await, (106..=115).collect::<Vec<_>>());
        assert_eq!(monitor.last_processed_height(), 115);
        assert_eq!(monitor.stats().await.processed_count, 10);
    }

    #[tokio::test]
    async fn test_small_gap_backfills_everything() {
        let source = Arc::new(ScriptedSource::with_head(104));
        let (monitor, queue) = monitor_with(source, config());
        monitor.set_last_processed_height(100);

        monitor.poll_once().await.unwrap();
        assert_eq!(queued_heights(&queue).await, vec![101, 102, 103, 104]);
    }

    #[tokio::test]
    async fn test_next_block_is_enqueued_directly() {
        let source = Arc::new(ScriptedSource::with_head(101));
        let (monitor, queue) = monitor_with(source.clone(), config());
        monitor.set_last_processed_height(100);

        monitor.poll_once().await.unwrap();

        assert_eq!(queued_heights(&queue).await, vec![101]);
        assert!(source.fetched.lock().unwrap().is_empty());
        assert_eq!(monitor.last_processed_height(), 101);
    }

    #[tokio::test]
    async fn test_head_not_ahead_is_noop() {
        let source = Arc::new(ScriptedSource::with_head(100));
        let (monitor, queue) = monitor_with(source, config());
        monitor.set_last_processed_height(100);

        let outcome = monitor.poll_once().await.unwrap();
        assert_eq!(outcome, PollOutcome::UpToDate { head: 100 });
        assert_eq!(queue.len().await.unwrap(), 0);
        assert_eq!(monitor.last_processed_height(), 100);
    }

    #[tokio::test]
    async fn test_bounds_skip_without_moving_frontier() {
        let source = Arc::new(ScriptedSource::with_head(500));
        let config = MonitorConfig {
            max_block_height: 400,
            ..config()
        };
        let (monitor, queue) = monitor_with(source.clone(), config);
        monitor.set_last_processed_height(100);

        assert_eq!(
            monitor.poll_once().await.unwrap(),
            PollOutcome::OutOfBounds { head: 500 }
        );
        assert_eq!(monitor.last_processed_height(), 100);

        let config = MonitorConfig {
            start_block_height: 1000,
            ..self::config()
        };
        let (monitor, _) = monitor_with(source, config);
        assert_eq!(
            monitor.poll_once().await.unwrap(),
            PollOutcome::OutOfBounds { head: 500 }
        );
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_heights_are_skipped() {
        let source = Arc::new(ScriptedSource::with_head(115));
        source.missing.lock().unwrap().extend([108, 110]);
        let (monitor, queue) = monitor_with(source, config());
        monitor.set_last_processed_height(100);

        let outcome = monitor.poll_once().await.unwrap();

        let PollOutcome::Enqueued { report, .. } = outcome else {
            panic!("expected enqueue, got {:?}", outcome);
        };
        assert_eq!(report.enqueued, 8);
        assert_eq!(report.failed, 2);
        assert_eq!(
            queued_heights(&queue).await,
            vec![106, 107, 109, 111, 112, 113, 114, 115]
        );
        assert_eq!(monitor.last_processed_height(), 115);
        assert_eq!(monitor.stats().await.error_count, 2);
    }

    #[tokio::test]
    async fn test_historical_range_is_not_clamped() {
        let source = Arc::new(ScriptedSource::with_head(1000));
        let (monitor, queue) = monitor_with(source, config());

        let report = monitor.process_historical_range(50, 79).await.unwrap();

        assert_eq!(report.enqueued, 30);
        assert_eq!(queued_heights(&queue).await, (50..=79).collect::<Vec<_>>());
        assert_eq!(monitor.last_processed_height(), 0);
    }

    #[tokio::test]
    async fn test_historical_range_validation() {
        let source = Arc::new(ScriptedSource::with_head(1000));
        let config = MonitorConfig {
            max_historical_range: 100,
            ..config()
        };
        let (monitor, queue) = monitor_with(source, config);

        assert!(matches!(
            monitor.process_historical_range(10, 5).await,
            Err(ControlError::InvalidRange { start: 10, end: 5, .. })
        ));
        assert!(matches!(
            monitor.process_historical_range(1, 101).await,
            Err(ControlError::InvalidRange { .. })
        ));
        assert!(monitor.process_historical_range(1, 100).await.is_ok());
        assert_eq!(queue.len().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_sync_to_head_advances_frontier() {
        let source = Arc::new(ScriptedSource::with_head(130));
        let (monitor, queue) = monitor_with(source, config());
        monitor.set_last_processed_height(100);

        let sync = monitor.sync_to_head().await.unwrap();

        assert_eq!(sync.from, Some(101));
        assert_eq!(sync.skipped, 0);
        assert_eq!(sync.report.enqueued, 30);
        assert_eq!(queue.len().await.unwrap(), 30);
        assert_eq!(monitor.last_processed_height(), 130);

        // Nothing new
        let sync = monitor.sync_to_head().await.unwrap();
        assert_eq!(sync.from, None);
        assert_eq!(sync.report, RangeReport::default());
    }

    #[tokio::test]
    async fn test_sync_to_head_reports_skipped_heights() {
        let source = Arc::new(ScriptedSource::with_head(300));
        let config = MonitorConfig {
            max_historical_range: 100,
            ..config()
        };
        let (monitor, queue) = monitor_with(source, config);
        monitor.set_last_processed_height(10);

        let sync = monitor.sync_to_head().await.unwrap();

        // 11..=200 left out, 201..=300 enqueued
        assert_eq!(sync.from, Some(201));
        assert_eq!(sync.skipped, 190);
        assert_eq!(sync.report.enqueued, 100);
        assert_eq!(queue.len().await.unwrap(), 100);
        assert_eq!(monitor.last_processed_height(), 300);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let source = Arc::new(ScriptedSource::with_head(101));
        let (monitor, queue) = monitor_with(source.clone(), config());
        monitor.set_last_processed_height(100);

        assert!(matches!(
            monitor.stop().await,
            Err(ControlError::NotRunning(_))
        ));

        monitor.start().await.unwrap();
        assert!(monitor.is_running());
        assert!(matches!(
            monitor.start().await,
            Err(ControlError::AlreadyRunning(_))
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        source.head.store(102, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;

        monitor.stop().await.unwrap();
        assert!(!monitor.is_running());
        assert_eq!(queued_heights(&queue).await, vec![101, 102]);
        assert_eq!(monitor.last_processed_height(), 102);

        // Restartable after stop
        monitor.start().await.unwrap();
        monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let source = Arc::new(ScriptedSource::with_head(101));
        let (monitor, _queue) = monitor_with(source, config());
        monitor.set_last_processed_height(100);
        monitor.poll_once().await.unwrap();
        assert_eq!(monitor.stats().await.processed_count, 1);

        monitor.reset_stats();
        let stats = monitor.stats().await;
        assert_eq!(stats.processed_count, 0);
        assert_eq!(stats.error_count, 0);
        assert_eq!(stats.last_processed_height, 101);
    }
}
