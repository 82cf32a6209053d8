use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use idempotent_consumer::IdempotencyError;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Queue full, please try again later")]
    QueueFull,

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let code = self.status_code();
        let message = match self {
            AppError::Validation(msg) => msg.clone(),
            _ => self.to_string(),
        };

        HttpResponse::build(code).json(ErrorResponse {
            error: message,
            code: code.as_u16(),
        })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::QueueFull | AppError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IdempotencyError> for AppError {
    fn from(err: IdempotencyError) -> Self {
        match err {
            IdempotencyError::QueueFull { .. } => AppError::QueueFull,
            IdempotencyError::QueueClosed => AppError::ShuttingDown,
            IdempotencyError::InvalidTopic(msg) | IdempotencyError::InvalidEventId(msg) => {
                AppError::Validation(msg)
            }
            IdempotencyError::Database(e) => AppError::Store(e.to_string()),
            IdempotencyError::Io(e) => AppError::Store(e.to_string()),
            IdempotencyError::Other(e) => AppError::Internal(format!("{:#}", e)),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::QueueFull.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            AppError::ShuttingDown.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Store("disk".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_from_idempotency_error() {
        assert!(matches!(
            AppError::from(IdempotencyError::QueueFull { capacity: 10 }),
            AppError::QueueFull
        ));
        assert!(matches!(
            AppError::from(IdempotencyError::QueueClosed),
            AppError::ShuttingDown
        ));
        assert!(matches!(
            AppError::from(IdempotencyError::InvalidEventId("empty".into())),
            AppError::Validation(_)
        ));
    }
}
