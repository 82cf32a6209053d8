//! Error types for idempotent consumer library

use thiserror::Error;

/// Result type for idempotency operations
pub type IdempotencyResult<T> = Result<T, IdempotencyError>;

/// Errors that can occur during idempotent event processing
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// Dedup store operation failed (connection, query execution, etc.)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Event ID validation failed (empty, too long)
    #[error("Invalid event ID: {0}")]
    InvalidEventId(String),

    /// Topic validation failed (empty, too long)
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Work queue is at capacity; the event was not admitted
    #[error("Queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Work queue no longer accepts events (shutdown in progress)
    #[error("Queue closed")]
    QueueClosed,

    /// Filesystem error while preparing the store location
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl IdempotencyError {
    /// Check if error is a unique constraint violation on the dedup key
    ///
    /// This is NOT an error condition for the protocol. `try_mark` uses
    /// `ON CONFLICT DO NOTHING` and reads `rows_affected`, so this only shows
    /// up if a caller inserts through a different path.
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            IdempotencyError::Database(sqlx_err) => sqlx_err
                .as_database_error()
                .map(|db_err| db_err.is_unique_violation())
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Check if error is transient (producer may re-publish)
    pub fn is_transient(&self) -> bool {
        match self {
            IdempotencyError::Database(sqlx_err) => {
                if matches!(
                    sqlx_err,
                    sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
                ) {
                    return true;
                }
                // SQLITE_BUSY (5) / SQLITE_LOCKED (6) after the busy timeout expired
                sqlx_err
                    .as_database_error()
                    .and_then(|db_err| db_err.code())
                    .map(|code| code == "5" || code == "6")
                    .unwrap_or(false)
            }
            IdempotencyError::Io(_) => true,
            IdempotencyError::QueueFull { .. } => true,
            _ => false,
        }
    }

    /// Check if error is an admission-time backpressure signal
    pub fn is_backpressure(&self) -> bool {
        matches!(self, IdempotencyError::QueueFull { .. })
    }
}
