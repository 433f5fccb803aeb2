//! API error types and response formatting.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// API error type that converts to appropriate HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Request conflicts with the job's current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Pipeline or store error.
    #[error("ingest error: {0}")]
    Ingest(#[from] hindsight_ingest::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone())),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg.clone())),
            Self::Ingest(err) => match err {
                hindsight_ingest::Error::JobNotFound(id) => {
                    (StatusCode::NOT_FOUND, "not_found", Some(id.clone()))
                }
                hindsight_ingest::Error::InvalidTransition { .. }
                | hindsight_ingest::Error::AlreadyRunning(_)
                | hindsight_ingest::Error::MissingExtract(_) => {
                    (StatusCode::CONFLICT, "conflict", Some(err.to_string()))
                }
                _ => {
                    tracing::error!(error = %err, "ingest error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal_error",
                        Some("An internal error occurred".to_string()),
                    )
                }
            },
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    Some("An internal error occurred".to_string()),
                )
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Ingest(hindsight_ingest::Error::AlreadyRunning("j".into()))
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Ingest(hindsight_ingest::Error::JobNotFound("j".into()))
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
    }
}
