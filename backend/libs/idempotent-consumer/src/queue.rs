//! Bounded work queue between ingress and the worker pool.
//!
//! Producers call [`WorkQueue::submit`], which never waits longer than the
//! configured admission timeout: a saturated queue is reported as
//! [`IdempotencyError::QueueFull`] instead of buffering without bound.
//! Workers share one receiver and wake on either a new event or the
//! shutdown signal, so stopping does not depend on traffic.
//!
//! Admission and [`WorkQueue::close`] are serialized: once `close` returns,
//! no further event can enter the channel.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, watch, Mutex, Notify, RwLock};
use tracing::debug;

use crate::error::{IdempotencyError, IdempotencyResult};
use crate::event::Event;
use crate::metrics::ConsumerMetrics;

/// Work queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of buffered events (must be > 0)
    pub capacity: usize,
    /// `None` rejects immediately when full; `Some(d)` waits up to `d`
    pub admission_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            admission_timeout: None,
        }
    }
}

/// Bounded FIFO, multi-producer / multi-consumer.
pub struct WorkQueue {
    sender: mpsc::Sender<Event>,
    receiver: Mutex<mpsc::Receiver<Event>>,
    capacity: usize,
    admission_timeout: Option<Duration>,
    /// Admitted events not yet acknowledged
    unfinished: AtomicUsize,
    idle: Notify,
    /// Held shared by `submit`, exclusively by `close`
    admission: RwLock<()>,
    closed: AtomicBool,
    metrics: Option<ConsumerMetrics>,
}

impl WorkQueue {
    pub fn new(config: QueueConfig) -> IdempotencyResult<Self> {
        if config.capacity == 0 {
            return Err(IdempotencyError::Other(anyhow::anyhow!(
                "Queue capacity must be greater than zero"
            )));
        }

        let (sender, receiver) = mpsc::channel(config.capacity);

        Ok(Self {
            sender,
            receiver: Mutex::new(receiver),
            capacity: config.capacity,
            admission_timeout: config.admission_timeout,
            unfinished: AtomicUsize::new(0),
            idle: Notify::new(),
            admission: RwLock::new(()),
            closed: AtomicBool::new(false),
            metrics: None,
        })
    }

    /// Report queue depth to Prometheus
    pub fn with_metrics(mut self, metrics: ConsumerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Admit an event.
    ///
    /// Fails with `QueueFull` when at capacity (after the admission timeout,
    /// if one is configured) and with `QueueClosed` once shutdown started.
    /// A rejected event never reaches a worker.
    pub async fn submit(&self, event: Event) -> IdempotencyResult<()> {
        let _admission = self.admission.read().await;
        if self.is_closed() {
            return Err(IdempotencyError::QueueClosed);
        }

        // Count before sending so a fast worker can never ack first
        self.unfinished.fetch_add(1, Ordering::AcqRel);

        let result = match self.admission_timeout {
            None => self.sender.try_send(event).map_err(|e| match e {
                TrySendError::Full(_) => IdempotencyError::QueueFull {
                    capacity: self.capacity,
                },
                TrySendError::Closed(_) => IdempotencyError::QueueClosed,
            }),
            Some(timeout) => self
                .sender
                .send_timeout(event, timeout)
                .await
                .map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => IdempotencyError::QueueFull {
                        capacity: self.capacity,
                    },
                    SendTimeoutError::Closed(_) => IdempotencyError::QueueClosed,
                }),
        };

        match &result {
            Ok(()) => self.update_depth(),
            Err(e) => {
                debug!(error = %e, "Event not admitted");
                self.ack();
            }
        }

        result
    }

    /// Wait for the next event, or `None` once `shutdown` turns true.
    ///
    /// Cancel-safe: an event is only removed from the channel when it is
    /// returned.
    pub async fn dequeue(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Event> {
        if *shutdown.borrow() {
            return None;
        }

        let event = tokio::select! {
            biased;
            // Only `true` is ever sent, so any change means stop
            _ = shutdown.changed() => None,
            event = async { self.receiver.lock().await.recv().await } => event,
        };

        if event.is_some() {
            self.update_depth();
        }

        event
    }

    /// Mark one dequeued (or rejected) event as finished
    pub fn ack(&self) {
        let previous = self.unfinished.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Wait until every admitted event has been acknowledged
    pub async fn join(&self) {
        loop {
            // Registered on creation, so a notify between the check and the
            // await is not lost
            let notified = self.idle.notified();
            if self.unfinished.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop admitting events. Already buffered events stay readable.
    ///
    /// Waits for submits already past the closed check, including one
    /// blocked on the admission timeout.
    pub async fn close(&self) {
        let _admission = self.admission.write().await;
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(buffered = self.len(), "Work queue closed");
        }
    }

    /// Remove and acknowledge every buffered event without processing it.
    ///
    /// Only meaningful once no worker is reading; returns the number dropped.
    pub async fn discard_pending(&self) -> usize {
        let mut receiver = self.receiver.lock().await;
        let mut discarded = 0;
        while receiver.try_recv().is_ok() {
            discarded += 1;
            self.ack();
        }
        self.update_depth();
        discarded
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Events currently buffered
    pub fn len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admitted events that have not been acknowledged yet
    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::Acquire)
    }

    fn update_depth(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.queue_depth.set(self.len() as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::Arc;

    fn event(id: &str) -> Event {
        Event::new("orders", id, "2024-01-01T00:00:00Z", "test", Map::new())
    }

    fn queue(capacity: usize) -> WorkQueue {
        WorkQueue::new(QueueConfig {
            capacity,
            admission_timeout: None,
        })
        .unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(WorkQueue::new(QueueConfig {
            capacity: 0,
            admission_timeout: None,
        })
        .is_err());
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = queue(4);
        let (_tx, mut shutdown) = watch::channel(false);

        for id in ["a", "b", "c"] {
            queue.submit(event(id)).await.unwrap();
        }
        assert_eq!(queue.len(), 3);

        for id in ["a", "b", "c"] {
            let next = queue.dequeue(&mut shutdown).await.unwrap();
            assert_eq!(next.event_id, id);
            queue.ack();
        }
        assert!(queue.is_empty());
        assert_eq!(queue.unfinished(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_immediately() {
        let queue = queue(2);
        queue.submit(event("1")).await.unwrap();
        queue.submit(event("2")).await.unwrap();

        let started = std::time::Instant::now();
        let err = queue.submit(event("3")).await.unwrap_err();
        assert!(matches!(err, IdempotencyError::QueueFull { capacity: 2 }));
        assert!(started.elapsed() < Duration::from_secs(1));

        // Rejected event is not tracked as unfinished
        assert_eq!(queue.unfinished(), 2);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_admission_timeout_waits_then_rejects() {
        let queue = WorkQueue::new(QueueConfig {
            capacity: 1,
            admission_timeout: Some(Duration::from_millis(50)),
        })
        .unwrap();
        queue.submit(event("1")).await.unwrap();

        let started = std::time::Instant::now();
        let err = queue.submit(event("2")).await.unwrap_err();
        assert!(err.is_backpressure());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_admission_timeout_succeeds_when_drained() {
        let queue = Arc::new(
            WorkQueue::new(QueueConfig {
                capacity: 1,
                admission_timeout: Some(Duration::from_secs(5)),
            })
            .unwrap(),
        );
        queue.submit(event("1")).await.unwrap();

        let consumer = queue.clone();
        let handle = tokio::spawn(async move {
            let (_tx, mut shutdown) = watch::channel(false);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let first = consumer.dequeue(&mut shutdown).await.unwrap();
            consumer.ack();
            first
        });

        queue.submit(event("2")).await.unwrap();
        assert_eq!(handle.await.unwrap().event_id, "1");
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let queue = queue(2);
        queue.close().await;
        let err = queue.submit(event("1")).await.unwrap_err();
        assert!(matches!(err, IdempotencyError::QueueClosed));
    }

    #[tokio::test]
    async fn test_dequeue_returns_on_shutdown() {
        let queue = Arc::new(queue(2));
        let (tx, mut shutdown) = watch::channel(false);

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(&mut shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("dequeue should observe shutdown")
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_join_waits_for_acks() {
        let queue = Arc::new(queue(4));
        queue.submit(event("1")).await.unwrap();
        queue.submit(event("2")).await.unwrap();

        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let (_tx, mut shutdown) = watch::channel(false);
                for _ in 0..2 {
                    queue.dequeue(&mut shutdown).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    queue.ack();
                }
            })
        };

        tokio::time::timeout(Duration::from_secs(2), queue.join())
            .await
            .expect("join should complete after both acks");
        assert_eq!(queue.unfinished(), 0);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_discard_pending_acks_buffered_events() {
        let queue = queue(4);
        for id in ["a", "b", "c"] {
            queue.submit(event(id)).await.unwrap();
        }
        queue.close().await;

        assert_eq!(queue.discard_pending().await, 3);
        assert!(queue.is_empty());
        assert_eq!(queue.unfinished(), 0);

        tokio::time::timeout(Duration::from_secs(1), queue.join())
            .await
            .expect("join should return once leftovers are discarded");
    }

    #[tokio::test]
    async fn test_close_waits_for_in_flight_admission() {
        let queue = Arc::new(
            WorkQueue::new(QueueConfig {
                capacity: 1,
                admission_timeout: Some(Duration::from_secs(5)),
            })
            .unwrap(),
        );
        queue.submit(event("1")).await.unwrap();

        // Blocked waiting for space
        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.submit(event("2")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let closer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.close().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!queue.is_closed());

        let (_tx, mut shutdown) = watch::channel(false);
        assert_eq!(queue.dequeue(&mut shutdown).await.unwrap().event_id, "1");
        queue.ack();

        producer.await.unwrap().unwrap();
        closer.await.unwrap();
        assert!(queue.is_closed());
        assert_eq!(queue.len(), 1);

        let err = queue.submit(event("3")).await.unwrap_err();
        assert!(matches!(err, IdempotencyError::QueueClosed));
    }
}
