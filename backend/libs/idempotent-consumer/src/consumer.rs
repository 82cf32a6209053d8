//! Explicit context object wiring store, queue, stats and worker pool.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use crate::error::IdempotencyResult;
use crate::event::Event;
use crate::metrics::ConsumerMetrics;
use crate::processor::EventProcessor;
use crate::queue::{QueueConfig, WorkQueue};
use crate::stats::{ConsumerStats, StatsSnapshot};
use crate::store::{DedupRecord, DedupStore};

/// Everything an ingress layer needs from the core.
///
/// Built once at process start and shared by reference (or `Arc`); there is
/// no global lookup.
pub struct IdempotentConsumer<S: DedupStore + 'static> {
    store: Arc<S>,
    queue: Arc<WorkQueue>,
    stats: Arc<ConsumerStats>,
    processor: EventProcessor<S>,
}

impl<S: DedupStore + 'static> IdempotentConsumer<S> {
    pub fn new(store: Arc<S>, queue_config: QueueConfig) -> IdempotencyResult<Self> {
        let queue = Arc::new(WorkQueue::new(queue_config)?);
        let stats = Arc::new(ConsumerStats::new());
        Ok(Self::from_parts(store, queue, stats))
    }

    /// Same as [`new`](Self::new) but mirrors counters and queue depth into
    /// Prometheus.
    pub fn with_metrics(
        store: Arc<S>,
        queue_config: QueueConfig,
        metrics: ConsumerMetrics,
    ) -> IdempotencyResult<Self> {
        let queue = Arc::new(WorkQueue::new(queue_config)?.with_metrics(metrics.clone()));
        let stats = Arc::new(ConsumerStats::with_metrics(metrics));
        Ok(Self::from_parts(store, queue, stats))
    }

    pub fn from_parts(store: Arc<S>, queue: Arc<WorkQueue>, stats: Arc<ConsumerStats>) -> Self {
        let processor = EventProcessor::new(store.clone(), queue.clone(), stats.clone());
        Self {
            store,
            queue,
            stats,
            processor,
        }
    }

    pub async fn start(&self, worker_count: usize) -> IdempotencyResult<()> {
        self.processor.start(worker_count).await
    }

    /// Number of running workers (zero before start and after stop)
    pub async fn worker_count(&self) -> usize {
        self.processor.worker_count().await
    }

    /// Close admission, then stop the workers.
    pub async fn stop(&self) {
        self.queue.close().await;
        self.processor.stop().await;
        info!(stats = ?self.stats.snapshot(), "Idempotent consumer stopped");
    }

    /// Admit an event; see [`WorkQueue::submit`]
    pub async fn submit(&self, event: Event) -> IdempotencyResult<()> {
        self.queue.submit(event).await
    }

    /// Wait until every admitted event has been processed, or dropped by
    /// [`stop`](Self::stop)
    pub async fn drain(&self) {
        self.queue.join().await
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn list_topics(&self) -> IdempotencyResult<BTreeSet<String>> {
        self.store.list_topics().await
    }

    pub async fn list_events(&self, topic: Option<&str>) -> IdempotencyResult<Vec<DedupRecord>> {
        self.store.list_events(topic).await
    }

    pub async fn count(&self) -> IdempotencyResult<u64> {
        self.store.count().await
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn stats(&self) -> &Arc<ConsumerStats> {
        &self.stats
    }
}
