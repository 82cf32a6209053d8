//! Events service: HTTP ingress for the idempotent log aggregator.
//!
//! Producers publish events over HTTP; events are admitted to a bounded
//! queue and drained by the `idempotent-consumer` worker pool, which keeps a
//! durable `(topic, event_id)` ledger in SQLite. Reporting endpoints expose
//! counters, processed events and Prometheus metrics.

pub mod config;
pub mod error;
pub mod handlers;
pub mod state;

pub use config::{Config, LogFormat};
pub use error::{AppError, ErrorResponse};
pub use state::AppState;
