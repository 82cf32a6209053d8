use serde::Deserialize;
use std::env;
use std::time::Duration;

use idempotent_consumer::{QueueConfig, StoreConfig};

use crate::error::AppError;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server configuration
    pub host: String,
    pub port: u16,

    // Dedup store
    pub dedup_db_path: String,
    pub db_max_connections: u32,
    pub db_busy_timeout_ms: u64,

    // Work queue and workers
    pub queue_max_size: usize,
    pub consumer_workers: usize,
    /// 0 rejects immediately when the queue is full
    pub admission_timeout_ms: u64,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unparsable values fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: lookup("PORT").and_then(|v| v.parse().ok()).unwrap_or(8080),
            dedup_db_path: lookup("DEDUP_DB_PATH")
                .unwrap_or_else(|| "/app/data/dedup.db".to_string()),
            db_max_connections: lookup("DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
            db_busy_timeout_ms: lookup("DB_BUSY_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
            queue_max_size: lookup("QUEUE_MAX_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            consumer_workers: lookup("CONSUMER_WORKERS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            admission_timeout_ms: lookup("ADMISSION_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            log_level: lookup("RUST_LOG")
                .or_else(|| lookup("LOG_LEVEL"))
                .unwrap_or_else(|| "info".to_string()),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(LogFormat::Text),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.queue_max_size == 0 {
            return Err(AppError::Config(
                "QUEUE_MAX_SIZE must be at least 1".to_string(),
            ));
        }
        if self.consumer_workers == 0 {
            return Err(AppError::Config(
                "CONSUMER_WORKERS must be at least 1".to_string(),
            ));
        }
        if self.dedup_db_path.trim().is_empty() {
            return Err(AppError::Config("DEDUP_DB_PATH must not be empty".to_string()));
        }
        if self.db_max_connections == 0 {
            return Err(AppError::Config(
                "DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            max_connections: self.db_max_connections,
            busy_timeout: Duration::from_millis(self.db_busy_timeout_ms),
            ..StoreConfig::new(&self.dedup_db_path)
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.queue_max_size,
            admission_timeout: (self.admission_timeout_ms > 0)
                .then(|| Duration::from_millis(self.admission_timeout_ms)),
        }
    }
}
