use actix_web::{web, App, HttpServer};
use anyhow::Context;
use events_service::{handlers, AppState, Config, LogFormat};
use idempotent_consumer::{ConsumerMetrics, IdempotentConsumer, SqliteDedupStore};
use std::sync::Arc;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config);

    tracing::info!(
        host = %config.host,
        port = config.port,
        db_path = %config.dedup_db_path,
        queue_max_size = config.queue_max_size,
        workers = config.consumer_workers,
        "Starting events-service"
    );

    // Dedup ledger
    let store = Arc::new(
        SqliteDedupStore::open(config.store_config())
            .await
            .context("Failed to open dedup store")?,
    );

    // Queue, counters and worker pool
    let metrics = ConsumerMetrics::new("events-service");
    let consumer = Arc::new(IdempotentConsumer::with_metrics(
        store.clone(),
        config.queue_config(),
        metrics,
    )?);
    consumer
        .start(config.consumer_workers)
        .await
        .context("Failed to start consumer workers")?;

    let state = web::Data::new(AppState::new(consumer.clone()));
    let bind_address = config.bind_address();

    tracing::info!("HTTP server listening on {}:{}", bind_address.0, bind_address.1);

    // Runs until SIGINT / SIGTERM
    let server_result = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind(bind_address)
    .context("Failed to bind HTTP server address")?
    .shutdown_timeout(10)
    .run()
    .await;

    tracing::info!("Shutting down events-service");
    consumer.stop().await;
    store.close().await;
    tracing::info!("events-service stopped");

    server_result.context("HTTP server error")
}
