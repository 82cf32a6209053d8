//! Durable deduplication store.
//!
//! The store is the single authority for "has `(topic, event_id)` been
//! processed". Uniqueness is enforced by a `UNIQUE(topic, event_id)` constraint
//! and `INSERT ... ON CONFLICT DO NOTHING`, so concurrent writers racing on the
//! same key resolve inside SQLite rather than in application code.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{IdempotencyError, IdempotencyResult};
use crate::event::MAX_TOPIC_LEN;

/// Persisted dedup record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub topic: String,
    pub event_id: String,
    /// Set by the store when the record was inserted
    pub processed_at: DateTime<Utc>,
}

/// Contract for the dedup ledger consulted by the worker pool.
///
/// `try_mark` is the only authoritative decision point; `exists` is a cheap
/// pre-check that may be stale under concurrent writers.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Read-only membership test
    async fn exists(&self, topic: &str, event_id: &str) -> IdempotencyResult<bool>;

    /// Atomically insert the key if absent.
    ///
    /// - `Ok(true)` if this call created the record
    /// - `Ok(false)` if the record already existed
    /// - `Err` on store faults (never reported as either outcome)
    async fn try_mark(&self, topic: &str, event_id: &str) -> IdempotencyResult<bool>;

    /// Distinct topics with at least one record
    async fn list_topics(&self) -> IdempotencyResult<BTreeSet<String>>;

    /// Records, newest first, optionally filtered by topic
    async fn list_events(&self, topic: Option<&str>) -> IdempotencyResult<Vec<DedupRecord>>;

    /// Total number of records
    async fn count(&self) -> IdempotencyResult<u64>;
}

/// SQLite store configuration
#[derive(Clone)]
pub struct StoreConfig {
    /// Database file; parent directories are created if missing
    pub path: PathBuf,
    /// Pool size
    pub max_connections: u32,
    /// How long a writer waits for the SQLite write lock before failing
    pub busy_timeout: Duration,
    /// Connection acquisition timeout
    pub acquire_timeout: Duration,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("path", &self.path.display().to_string())
            .field("max_connections", &self.max_connections)
            .field("busy_timeout_ms", &self.busy_timeout.as_millis())
            .field("acquire_timeout_secs", &self.acquire_timeout.as_secs())
            .finish()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/app/data/dedup.db"),
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// File-backed [`DedupStore`] using SQLite in WAL mode.
///
/// Cheap to clone; clones share one connection pool and can be handed to
/// every worker and to the reporting path.
#[derive(Clone)]
pub struct SqliteDedupStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteDedupStore {
    /// Open (or create) the store and initialize the schema.
    ///
    /// Safe to call on an existing file: schema creation is idempotent and
    /// records written before a crash are visible after reopening.
    pub async fn open(config: StoreConfig) -> IdempotencyResult<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
                info!(dir = %parent.display(), "Created database directory");
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            path: config.path.clone(),
        };
        store.init_schema().await?;

        info!(path = %config.path.display(), config = ?config, "Dedup store initialized");

        Ok(store)
    }

    async fn init_schema(&self) -> IdempotencyResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic TEXT NOT NULL,
                event_id TEXT NOT NULL,
                processed_at TEXT NOT NULL,
                UNIQUE(topic, event_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create processed_events table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_processed_events_processed_at
            ON processed_events(processed_at)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create processed_at index")?;

        Ok(())
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete every record
    pub async fn clear(&self) -> IdempotencyResult<u64> {
        let result = sqlx::query("DELETE FROM processed_events")
            .execute(&self.pool)
            .await
            .context("Failed to clear processed events")?;

        info!(deleted = result.rows_affected(), "Dedup store cleared");
        Ok(result.rows_affected())
    }

    /// Close every pooled connection. Further calls fail with `PoolClosed`.
    pub async fn close(&self) {
        self.pool.close().await;
        debug!(path = %self.path.display(), "Dedup store closed");
    }

    fn validate_key(topic: &str, event_id: &str) -> IdempotencyResult<()> {
        if topic.is_empty() {
            return Err(IdempotencyError::InvalidTopic(
                "Topic cannot be empty".to_string(),
            ));
        }

        if topic.chars().count() > MAX_TOPIC_LEN {
            return Err(IdempotencyError::InvalidTopic(format!(
                "Topic too long: {} characters (max {})",
                topic.chars().count(),
                MAX_TOPIC_LEN
            )));
        }

        if event_id.is_empty() {
            return Err(IdempotencyError::InvalidEventId(
                "Event ID cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl DedupStore for SqliteDedupStore {
    async fn exists(&self, topic: &str, event_id: &str) -> IdempotencyResult<bool> {
        Self::validate_key(topic, event_id)?;

        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM processed_events WHERE topic = ?1 AND event_id = ?2
            ) AS present
            "#,
        )
        .bind(topic)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        let present = row.try_get::<i64, _>("present")? != 0;

        if present {
            debug!(topic = %topic, event_id = %event_id, "Event already processed");
        }

        Ok(present)
    }

    async fn try_mark(&self, topic: &str, event_id: &str) -> IdempotencyResult<bool> {
        Self::validate_key(topic, event_id)?;

        // ON CONFLICT DO NOTHING: a losing writer affects 0 rows instead of failing
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (topic, event_id, processed_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (topic, event_id) DO NOTHING
            "#,
        )
        .bind(topic)
        .bind(event_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let was_inserted = result.rows_affected() > 0;

        if was_inserted {
            debug!(topic = %topic, event_id = %event_id, "Event marked as processed");
        } else {
            debug!(
                topic = %topic,
                event_id = %event_id,
                "Event already marked as processed (duplicate)"
            );
        }

        Ok(was_inserted)
    }

    async fn list_topics(&self) -> IdempotencyResult<BTreeSet<String>> {
        let rows = sqlx::query("SELECT DISTINCT topic FROM processed_events")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list topics")?;

        rows.into_iter()
            .map(|row| row.try_get::<String, _>("topic"))
            .collect::<Result<BTreeSet<_>, sqlx::Error>>()
            .map_err(IdempotencyError::from)
    }

    async fn list_events(&self, topic: Option<&str>) -> IdempotencyResult<Vec<DedupRecord>> {
        let rows = match topic {
            Some(topic) => {
                sqlx::query(
                    r#"
                    SELECT topic, event_id, processed_at
                    FROM processed_events
                    WHERE topic = ?1
                    ORDER BY processed_at DESC, id DESC
                    "#,
                )
                .bind(topic)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT topic, event_id, processed_at
                    FROM processed_events
                    ORDER BY processed_at DESC, id DESC
                    "#,
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to list processed events")?;

        let records = rows
            .into_iter()
            .map(|row| {
                Ok(DedupRecord {
                    topic: row.try_get("topic")?,
                    event_id: row.try_get("event_id")?,
                    processed_at: row.try_get("processed_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .context("Failed to parse processed events")?;

        debug!(count = records.len(), topic = ?topic, "Listed processed events");

        Ok(records)
    }

    async fn count(&self) -> IdempotencyResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM processed_events")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count processed events")?;

        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(SqliteDedupStore::validate_key("orders", "event-123").is_ok());
        assert!(SqliteDedupStore::validate_key("t", "a").is_ok());
        assert!(SqliteDedupStore::validate_key(&"t".repeat(255), &"x".repeat(255)).is_ok());

        let err = SqliteDedupStore::validate_key("orders", "").unwrap_err();
        assert!(matches!(err, IdempotencyError::InvalidEventId(_)));

        // event_id has no length cap, TEXT column
        assert!(SqliteDedupStore::validate_key("orders", &"x".repeat(1000)).is_ok());

        let err = SqliteDedupStore::validate_key("", "event-123").unwrap_err();
        assert!(matches!(err, IdempotencyError::InvalidTopic(_)));

        let err = SqliteDedupStore::validate_key(&"t".repeat(256), "event-123").unwrap_err();
        assert!(matches!(err, IdempotencyError::InvalidTopic(_)));
    }

    #[test]
    fn test_config_debug_and_defaults() {
        let config = StoreConfig::new("/tmp/dedup.db");
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.busy_timeout, Duration::from_secs(5));
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("/tmp/dedup.db"));
        assert!(rendered.contains("busy_timeout_ms"));
    }

    #[tokio::test]
    async fn test_open_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data").join("dedup.db");

        let store = SqliteDedupStore::open(StoreConfig::new(&path)).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.count().await.unwrap(), 0);
        store.close().await;
    }

    #[tokio::test]
    async fn test_clear_removes_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteDedupStore::open(StoreConfig::new(dir.path().join("dedup.db")))
            .await
            .unwrap();

        assert!(store.try_mark("a", "1").await.unwrap());
        assert!(store.try_mark("b", "1").await.unwrap());
        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(!store.exists("a", "1").await.unwrap());
        store.close().await;
    }
}
