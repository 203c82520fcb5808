//! services/api/src/web/response.rs
//!
//! The JSON envelope shared by every route.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::ApiError;

/// `{ "success": true, "data": ... }`
#[derive(Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

/// `{ "success": false, "error": "<kind>", "message": "..." }`
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub success: bool,
    /// One of `validation_error`, `unauthorized`, `forbidden`, `not_found`,
    /// `conflict`, `external_service_error`, `internal_error`.
    pub error: String,
    pub message: String,
}

/// A successful response with its status code.
pub struct ApiResponse<T> {
    status: StatusCode,
    data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            data,
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(Envelope {
                success: true,
                data: self.data,
            }),
        )
            .into_response()
    }
}

/// Payload of operations that return nothing but a confirmation.
#[derive(Serialize, ToSchema)]
pub struct Deleted {
    pub deleted: bool,
}

impl Deleted {
    pub fn response() -> ApiResponse<Deleted> {
        ApiResponse::ok(Deleted { deleted: true })
    }
}

/// The result type returned by every handler.
pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;
