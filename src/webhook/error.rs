//! Webhook ingest errors.
//!
//! Every rejection happens before enqueue, so a non-2xx response always means
//! nothing was queued.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use super::signature::SignatureError;
use crate::broker::QueueError;
use crate::event::NotificationError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Authentication failed: {0}")]
    Authentication(#[from] SignatureError),

    #[error("Invalid notification: {0}")]
    Validation(#[from] NotificationError),

    #[error("Failed to enqueue notification: {0}")]
    Enqueue(#[from] QueueError),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl IngestError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Authentication(_) => 4010,
            Self::Validation(_) => 4000,
            Self::Enqueue(_) => 5030,
            Self::Encode(_) => 5000,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AUTHENTICATION_FAILED",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Enqueue(_) => "QUEUE_UNAVAILABLE",
            Self::Encode(_) => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Enqueue(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body of a rejected webhook
#[derive(Debug, Serialize)]
pub struct IngestErrorResponse {
    pub code: i32,
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        // Broker internals stay in the logs
        let message = match &self {
            Self::Enqueue(_) | Self::Encode(_) => "Try again later".to_string(),
            other => other.to_string(),
        };
        let body = IngestErrorResponse {
            code: self.code(),
            error: self.name(),
            message,
        };
        (self.http_status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status() {
        assert_eq!(
            IngestError::from(SignatureError::Mismatch).http_status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            IngestError::from(NotificationError::Json("eof".into())).http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            IngestError::from(QueueError::Unavailable("down".into())).http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_names() {
        assert_eq!(
            IngestError::from(SignatureError::Missing).name(),
            "AUTHENTICATION_FAILED"
        );
        assert_eq!(
            IngestError::from(NotificationError::Field("amount".into())).code(),
            4000
        );
    }
}
