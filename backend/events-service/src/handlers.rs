use actix_web::{get, post, web, HttpResponse};
use idempotent_consumer::{DedupRecord, Event, EventBatch, IdempotencyError};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use validator::Validate;

use crate::error::{AppError, Result};
use crate::state::AppState;

const SERVICE_NAME: &str = "events-service";

/// Request body limit for publish endpoints
const JSON_LIMIT_BYTES: usize = 4 * 1024 * 1024;

#[derive(Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct PublishResponse {
    pub status: &'static str,
    pub event_id: String,
    pub topic: String,
    pub message: &'static str,
}

#[derive(Serialize)]
pub struct BatchResponse {
    pub status: &'static str,
    pub accepted: usize,
    pub rejected: usize,
    pub total: usize,
}

#[derive(Deserialize)]
pub struct EventsQuery {
    pub topic: Option<String>,
}

#[derive(Serialize)]
pub struct EventsResponse {
    pub topic: String,
    pub count: usize,
    pub events: Vec<DedupRecord>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub received: u64,
    pub unique_processed: u64,
    pub duplicate_dropped: u64,
    pub failed: u64,
    pub topics: Vec<String>,
    pub uptime: f64,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub queue_size: usize,
    pub uptime: f64,
}

/// Register every route plus the JSON extractor config on an actix app
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .service(root)
        .service(publish_event)
        .service(publish_batch)
        .service(list_events)
        .service(stats)
        .service(health)
        .service(metrics);
}

/// Malformed bodies are reported as validation errors with the usual error body
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_LIMIT_BYTES)
        .error_handler(|err, _req| AppError::Validation(err.to_string()).into())
}

fn round_uptime(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}

/// GET /
#[get("/")]
pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(ServiceInfo {
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
    })
}

/// POST /publish
/// Validate one event and admit it to the work queue
#[post("/publish")]
pub async fn publish_event(
    state: web::Data<AppState>,
    body: web::Json<Event>,
) -> Result<HttpResponse> {
    let event = body.into_inner();
    event.validate()?;

    let topic = event.topic.clone();
    let event_id = event.event_id.clone();

    if let Err(e) = state.consumer.submit(event).await {
        if e.is_backpressure() {
            error!(topic = %topic, event_id = %event_id, "Queue full, cannot accept more events");
        }
        return Err(e.into());
    }

    info!(topic = %topic, event_id = %event_id, "Event published");

    Ok(HttpResponse::Accepted().json(PublishResponse {
        status: "accepted",
        event_id,
        topic,
        message: "Event queued for processing",
    }))
}

/// POST /publish/batch
/// Admit each event independently; a full or closed queue rejects the event,
/// not the batch, so earlier admissions are always reported
#[post("/publish/batch")]
pub async fn publish_batch(
    state: web::Data<AppState>,
    body: web::Json<EventBatch>,
) -> Result<HttpResponse> {
    let batch = body.into_inner();
    batch.validate()?;

    let total = batch.events.len();
    let mut accepted = 0;
    let mut rejected = 0;

    for event in batch.events {
        let event_id = event.event_id.clone();
        match state.consumer.submit(event).await {
            Ok(()) => accepted += 1,
            Err(e) if e.is_backpressure() => {
                rejected += 1;
                warn!(event_id = %event_id, "Queue full, event rejected");
            }
            Err(IdempotencyError::QueueClosed) => {
                rejected += 1;
                warn!(event_id = %event_id, "Shutting down, event rejected");
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(accepted, rejected, total, "Batch published");

    Ok(HttpResponse::Ok().json(BatchResponse {
        status: "completed",
        accepted,
        rejected,
        total,
    }))
}

/// GET /events?topic=
/// Processed events, newest first
#[get("/events")]
pub async fn list_events(
    state: web::Data<AppState>,
    query: web::Query<EventsQuery>,
) -> Result<HttpResponse> {
    let topic = query.into_inner().topic.filter(|t| !t.is_empty());

    let events = state
        .consumer
        .list_events(topic.as_deref())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to fetch events");
            AppError::from(e)
        })?;

    Ok(HttpResponse::Ok().json(EventsResponse {
        topic: topic.unwrap_or_else(|| "all".to_string()),
        count: events.len(),
        events,
    }))
}

/// GET /stats
#[get("/stats")]
pub async fn stats(state: web::Data<AppState>) -> Result<HttpResponse> {
    let snapshot = state.consumer.snapshot();
    let topics = state.consumer.list_topics().await.map_err(|e| {
        error!(error = %e, "Failed to fetch topics");
        AppError::from(e)
    })?;

    Ok(HttpResponse::Ok().json(StatsResponse {
        received: snapshot.received,
        unique_processed: snapshot.unique_processed,
        duplicate_dropped: snapshot.duplicate_dropped,
        failed: snapshot.failed,
        // BTreeSet iterates in sorted order
        topics: topics.into_iter().collect(),
        uptime: round_uptime(snapshot.uptime_seconds),
    }))
}

/// GET /health
#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        queue_size: state.consumer.queue().len(),
        uptime: round_uptime(state.consumer.snapshot().uptime_seconds),
    })
}

/// GET /metrics
/// Prometheus text exposition of the default registry
#[get("/metrics")]
pub async fn metrics() -> Result<HttpResponse> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| AppError::Internal(format!("Failed to encode metrics: {}", e)))?;

    Ok(HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer))
}
