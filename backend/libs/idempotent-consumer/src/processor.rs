//! Worker pool applying the idempotency protocol to queued events.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{IdempotencyError, IdempotencyResult};
use crate::event::Event;
use crate::queue::WorkQueue;
use crate::stats::ConsumerStats;
use crate::store::DedupStore;

/// Result of processing an event with idempotency check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingResult {
    /// This call marked the event (first time)
    Success,

    /// Event was already processed before (duplicate)
    AlreadyProcessed,

    /// Store or worker fault; the event was dropped
    Failed(String),
}

impl ProcessingResult {
    /// Check if the event reached a definite outcome (new or duplicate)
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            ProcessingResult::Success | ProcessingResult::AlreadyProcessed
        )
    }

    /// Check if processing failed
    pub fn is_failed(&self) -> bool {
        matches!(self, ProcessingResult::Failed(_))
    }
}

/// Run the idempotency protocol for one dequeued event.
///
/// 1. count the event as received
/// 2. cheap `exists` pre-check; a hit is a duplicate
/// 3. `try_mark` decides: `true` is new, `false` lost a race (duplicate)
///
/// Store faults are logged, counted as failed and the event is dropped
/// without retry; re-publishing is up to the producer. Correctness only
/// depends on step 3, the pre-check may be stale.
pub async fn process_event<S>(
    store: &S,
    stats: &ConsumerStats,
    event: &Event,
    worker_id: usize,
) -> ProcessingResult
where
    S: DedupStore + ?Sized,
{
    stats.record_received();

    match store.exists(&event.topic, &event.event_id).await {
        Ok(true) => {
            stats.record_duplicate();
            debug!(
                worker_id,
                topic = %event.topic,
                event_id = %event.event_id,
                "Duplicate dropped"
            );
            return ProcessingResult::AlreadyProcessed;
        }
        Ok(false) => {}
        Err(e) => return record_fault(stats, event, worker_id, e),
    }

    match store.try_mark(&event.topic, &event.event_id).await {
        Ok(true) => {
            stats.record_unique();
            // Downstream business processing would run here, after the mark
            debug!(
                worker_id,
                topic = %event.topic,
                event_id = %event.event_id,
                source = %event.source,
                "Event processed"
            );
            ProcessingResult::Success
        }
        Ok(false) => {
            stats.record_duplicate();
            warn!(
                worker_id,
                topic = %event.topic,
                event_id = %event.event_id,
                "Duplicate dropped after losing mark race"
            );
            ProcessingResult::AlreadyProcessed
        }
        Err(e) => record_fault(stats, event, worker_id, e),
    }
}

fn record_fault(
    stats: &ConsumerStats,
    event: &Event,
    worker_id: usize,
    err: IdempotencyError,
) -> ProcessingResult {
    stats.record_failure();
    error!(
        worker_id,
        topic = %event.topic,
        event_id = %event.event_id,
        transient = err.is_transient(),
        error = %err,
        "Dedup store fault, event dropped"
    );
    ProcessingResult::Failed(err.to_string())
}

/// Pool of workers draining a [`WorkQueue`].
///
/// Each worker loops {dequeue → protocol → ack} until [`stop`](Self::stop).
/// A fault or panic while processing one event is contained to that event.
pub struct EventProcessor<S: DedupStore + 'static> {
    store: Arc<S>,
    queue: Arc<WorkQueue>,
    stats: Arc<ConsumerStats>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl<S: DedupStore + 'static> EventProcessor<S> {
    pub fn new(store: Arc<S>, queue: Arc<WorkQueue>, stats: Arc<ConsumerStats>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            store,
            queue,
            stats,
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawn `worker_count` workers.
    ///
    /// Fails if the pool is already running, was stopped, or `worker_count`
    /// is zero.
    pub async fn start(&self, worker_count: usize) -> IdempotencyResult<()> {
        if worker_count == 0 {
            return Err(IdempotencyError::Other(anyhow::anyhow!(
                "Worker count must be greater than zero"
            )));
        }

        if self.stopped.load(Ordering::Acquire) {
            return Err(IdempotencyError::Other(anyhow::anyhow!(
                "Event processor was stopped and cannot be restarted"
            )));
        }

        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return Err(IdempotencyError::Other(anyhow::anyhow!(
                "Event processor already running with {} workers",
                workers.len()
            )));
        }

        info!(worker_count, capacity = self.queue.capacity(), "Starting processor workers");

        for worker_id in 0..worker_count {
            let store = self.store.clone();
            let queue = self.queue.clone();
            let stats = self.stats.clone();
            let shutdown = self.shutdown_tx.subscribe();

            workers.push(tokio::spawn(run_worker(
                worker_id, store, queue, stats, shutdown,
            )));
        }

        Ok(())
    }

    /// Signal every worker and wait for in-flight events to finish.
    ///
    /// Events still buffered in the queue are acknowledged and dropped
    /// unprocessed, so [`WorkQueue::join`] returns afterwards. Close the
    /// queue first to keep producers from refilling it. Calling this more
    /// than once is a no-op.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.shutdown_tx.send_replace(true);

        let handles = std::mem::take(&mut *self.workers.lock().await);
        if !handles.is_empty() {
            info!(worker_count = handles.len(), "Stopping processor workers");

            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task terminated abnormally");
                }
            }
        }

        let abandoned = self.queue.discard_pending().await;
        if abandoned > 0 {
            warn!(abandoned, "Buffered events dropped at shutdown");
        }
        info!("Processor workers stopped");
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

async fn run_worker<S: DedupStore + 'static>(
    worker_id: usize,
    store: Arc<S>,
    queue: Arc<WorkQueue>,
    stats: Arc<ConsumerStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id, "Worker started");

    while let Some(event) = queue.dequeue(&mut shutdown).await {
        let outcome = AssertUnwindSafe(process_event(&*store, &stats, &event, worker_id))
            .catch_unwind()
            .await;

        if outcome.is_err() {
            stats.record_failure();
            error!(
                worker_id,
                topic = %event.topic,
                event_id = %event.event_id,
                "Worker panicked while processing event, event dropped"
            );
        }

        queue.ack();
    }

    debug!(worker_id, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_result() {
        assert!(ProcessingResult::Success.is_ok());
        assert!(ProcessingResult::AlreadyProcessed.is_ok());
        assert!(!ProcessingResult::Failed("error".to_string()).is_ok());

        assert!(!ProcessingResult::Success.is_failed());
        assert!(!ProcessingResult::AlreadyProcessed.is_failed());
        assert!(ProcessingResult::Failed("error".to_string()).is_failed());
    }
}
