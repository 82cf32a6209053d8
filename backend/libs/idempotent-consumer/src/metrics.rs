use prometheus::{IntCounter, IntGauge, Opts};
use tracing::warn;

/// Prometheus mirrors of the consumer counters.
///
/// Registered in the default registry; a second registration with the same
/// service label (e.g. several pools in one test binary) is logged and the
/// unregistered handles keep working.
#[derive(Clone)]
pub struct ConsumerMetrics {
    pub received: IntCounter,
    pub unique_processed: IntCounter,
    pub duplicate_dropped: IntCounter,
    pub failed: IntCounter,
    pub queue_depth: IntGauge,
}

impl ConsumerMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let received = IntCounter::with_opts(
            Opts::new(
                "idempotent_consumer_received_total",
                "Events dequeued by the worker pool",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for idempotent_consumer_received_total");

        let unique_processed = IntCounter::with_opts(
            Opts::new(
                "idempotent_consumer_unique_processed_total",
                "Events marked as processed for the first time",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for idempotent_consumer_unique_processed_total");

        let duplicate_dropped = IntCounter::with_opts(
            Opts::new(
                "idempotent_consumer_duplicate_dropped_total",
                "Events dropped because their dedup key was already marked",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for idempotent_consumer_duplicate_dropped_total");

        let failed = IntCounter::with_opts(
            Opts::new(
                "idempotent_consumer_failed_total",
                "Events dropped after a store or worker fault",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for idempotent_consumer_failed_total");

        let queue_depth = IntGauge::with_opts(
            Opts::new(
                "idempotent_consumer_queue_depth",
                "Events admitted to the work queue and not yet dequeued",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for idempotent_consumer_queue_depth");

        for metric in [
            Box::new(received.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(unique_processed.clone()),
            Box::new(duplicate_dropped.clone()),
            Box::new(failed.clone()),
            Box::new(queue_depth.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register consumer metric: {}", e);
            }
        }

        Self {
            received,
            unique_processed,
            duplicate_dropped,
            failed,
            queue_depth,
        }
    }
}
