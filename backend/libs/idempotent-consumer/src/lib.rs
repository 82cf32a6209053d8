//! # Idempotent Consumer Library
//!
//! Provides at-most-once effective processing for events delivered
//! at-least-once, using a SQLite file as the persistent deduplication ledger.
//! An event is "processed" exactly when its `(topic, event_id)` key is first
//! written to the ledger, and that decision survives restarts and crashes.
//!
//! ## Problem
//!
//! Producers retry, so the same logical event can arrive many times:
//! - **Retries**: a producer re-publishes after a timeout that actually succeeded
//! - **Restarts**: an in-memory "seen" set is lost and events are reprocessed
//! - **Concurrent workers**: two workers pick up copies of one event at once
//!
//! ## Solution
//!
//! - **Bounded queue**: ingress admits events into a fixed-capacity queue and
//!   gets an immediate `QueueFull` rejection when it is saturated
//! - **Worker pool**: N workers drain the queue and run the idempotency protocol
//! - **Atomic mark**: `INSERT ... ON CONFLICT(topic, event_id) DO NOTHING`
//!   decides which copy wins; the cheap `exists` read only saves write attempts
//! - **Counters**: received / unique_processed / duplicate_dropped / failed
//!
//! ## Architecture
//!
//! ```text
//! Ingress → WorkQueue → EventProcessor (N workers) → DedupStore
//!              ↓                ↓                        ↓
//!         QueueFull      ConsumerStats          SQLite (processed_events)
//! ```
//!
//! ## Usage Example
//!
//! ```ignore
//! use idempotent_consumer::{
//!     Event, IdempotentConsumer, QueueConfig, SqliteDedupStore, StoreConfig,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteDedupStore::open(StoreConfig::new("data/dedup.db")).await?);
//! let consumer = IdempotentConsumer::new(store, QueueConfig::default())?;
//! consumer.start(3).await?;
//!
//! let event = Event::new("user.login", "evt-1", "2024-01-01T00:00:00Z", "auth", Default::default());
//! match consumer.submit(event).await {
//!     Ok(()) => println!("accepted"),
//!     Err(e) if e.is_backpressure() => println!("queue full, retry later"),
//!     Err(e) => return Err(e.into()),
//! }
//!
//! consumer.drain().await;
//! println!("{:?}", consumer.snapshot());
//! consumer.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Safety
//!
//! - **10 workers mark the same key**:
//!   - Only 1 `try_mark` returns `true`
//!   - Other 9 return `false` and are counted as duplicates, not errors
//!   - Holds even when the `exists` pre-check is stale or skipped
//!
//! - **Crash after mark**:
//!   - The record is committed (WAL, `synchronous = FULL`) before `true` is returned
//!   - After reopening the same file the key is reported as processed
//!
//! ## Failure Handling
//!
//! - Queue full: reported synchronously to the producer, nothing is counted
//! - Store fault: logged, counted as `failed`, event dropped without retry
//! - Worker panic: caught per event, worker keeps running
//!
//! ## Design Trade-offs
//!
//! ### Pros
//! - ✅ Duplicates suppressed across restarts
//! - ✅ Single arbiter, no distributed locking
//! - ✅ Several producer processes can share one store file
//!
//! ### Cons
//! - ❌ One SQLite write per new event
//! - ❌ Ledger grows without bound (no retention)
//! - ❌ Does not extend to several independent stores

mod consumer;
mod error;
pub mod event;
pub mod metrics;
pub mod processor;
pub mod queue;
pub mod stats;
pub mod store;

pub use consumer::IdempotentConsumer;
pub use error::{IdempotencyError, IdempotencyResult};
pub use event::{Event, EventBatch};
pub use metrics::ConsumerMetrics;
pub use processor::{process_event, EventProcessor, ProcessingResult};
pub use queue::{QueueConfig, WorkQueue};
pub use stats::{ConsumerStats, StatsSnapshot};
pub use store::{DedupRecord, DedupStore, SqliteDedupStore, StoreConfig};
