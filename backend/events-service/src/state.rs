use idempotent_consumer::{IdempotentConsumer, SqliteDedupStore};
use std::sync::Arc;

pub type Consumer = IdempotentConsumer<SqliteDedupStore>;

/// Shared application state, built once in `main` and handed to actix as
/// `web::Data`.
#[derive(Clone)]
pub struct AppState {
    pub consumer: Arc<Consumer>,
}

impl AppState {
    pub fn new(consumer: Arc<Consumer>) -> Self {
        Self { consumer }
    }
}
