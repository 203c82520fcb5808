//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how it is
//! rendered to HTTP clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use autorfp_core::ports::PortError;
use tracing::{error, warn};

use crate::config::ConfigError;
use crate::web::response::ErrorBody;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The request was malformed before it reached a use case.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthorized,

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    /// The HTTP status, the machine-readable kind and the message shown to the client.
    fn parts(&self) -> (StatusCode, &'static str, String) {
        const INTERNAL: &str = "An internal error occurred";
        match self {
            ApiError::Validation(message) | ApiError::Port(PortError::Validation(message)) => {
                (StatusCode::BAD_REQUEST, "validation_error", message.clone())
            }
            ApiError::Unauthorized | ApiError::Port(PortError::Unauthorized) => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Authentication required".to_string(),
            ),
            ApiError::Port(PortError::Forbidden(message)) => {
                (StatusCode::FORBIDDEN, "forbidden", message.clone())
            }
            ApiError::Port(PortError::NotFound(message)) => {
                (StatusCode::NOT_FOUND, "not_found", message.clone())
            }
            ApiError::Port(PortError::Conflict(message)) => {
                (StatusCode::CONFLICT, "conflict", message.clone())
            }
            ApiError::Port(PortError::External(_)) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                "An external service failed to process the request".to_string(),
            ),
            ApiError::Port(PortError::Unexpected(_))
            | ApiError::Database(_)
            | ApiError::Config(_)
            | ApiError::Io(_)
            | ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                INTERNAL.to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = self.parts();
        if status.is_server_error() {
            error!(error = %self, %status, "request failed");
        } else {
            warn!(error = %self, %status, "request rejected");
        }

        let body = ErrorBody {
            success: false,
            error: kind.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn render(error: ApiError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn port_errors_map_to_statuses() {
        let cases = [
            (PortError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (PortError::Unauthorized, StatusCode::UNAUTHORIZED),
            (PortError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (PortError::NotFound("gone".into()), StatusCode::NOT_FOUND),
            (PortError::Conflict("dup".into()), StatusCode::CONFLICT),
            (PortError::External("llm".into()), StatusCode::BAD_GATEWAY),
            (PortError::Unexpected("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            let (status, body) = render(ApiError::Port(error)).await;
            assert_eq!(status, expected);
            assert_eq!(body["success"], false);
        }
    }

    #[tokio::test]
    async fn internal_details_are_not_leaked() {
        let (_, body) = render(ApiError::Port(PortError::Unexpected(
            "relation \"users\" does not exist".into(),
        )))
        .await;
        assert_eq!(body["error"], "internal_error");
        assert!(!body["message"].as_str().unwrap().contains("users"));

        let (_, body) = render(ApiError::Port(PortError::External("api key sk-123 rejected".into()))).await;
        assert_eq!(body["error"], "external_service_error");
        assert!(!body["message"].as_str().unwrap().contains("sk-123"));
    }

    #[tokio::test]
    async fn client_errors_keep_their_message() {
        let (_, body) = render(ApiError::Port(PortError::Conflict(
            "An organization must keep at least one owner".into(),
        )))
        .await;
        assert_eq!(body["error"], "conflict");
        assert_eq!(body["message"], "An organization must keep at least one owner");
    }
}
