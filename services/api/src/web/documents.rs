//! services/api/src/web/documents.rs
//!
//! RFP document upload and retrieval.

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use autorfp_core::domain::Document;
use autorfp_core::{pipeline, questions};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::extract::{CurrentUser, ValidPath};
use crate::web::response::{ApiResponse, ApiResult, ErrorBody};
use crate::web::state::AppState;

const FILE_FIELD: &str = "file";

/// A stored document without its text.
#[derive(Serialize, ToSchema)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub project_id: Uuid,
    pub file_name: String,
    pub page_count: Option<u32>,
    pub content_length: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Document> for DocumentSummary {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id,
            project_id: document.project_id,
            file_name: document.file_name.clone(),
            page_count: document.page_count,
            content_length: document.content.chars().count(),
            created_at: document.created_at,
        }
    }
}

/// A stored document with the text extracted from it.
#[derive(Serialize, ToSchema)]
pub struct DocumentResponse {
    #[serde(flatten)]
    pub summary: DocumentSummary,
    pub content: String,
}

impl From<Document> for DocumentResponse {
    fn from(document: Document) -> Self {
        Self {
            summary: DocumentSummary::from(&document),
            content: document.content,
        }
    }
}

/// Multipart upload form; the binary goes in the `file` field.
#[derive(ToSchema)]
pub struct UploadDocumentForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[utoipa::path(
    get,
    path = "/api/projects/{project_id}/documents",
    tag = "documents",
    params(("project_id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 200, description = "Documents of the project", body = [DocumentSummary]),
        (status = 404, description = "No such project", body = ErrorBody)
    )
)]
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(project_id): ValidPath<Uuid>,
) -> ApiResult<Vec<DocumentSummary>> {
    let documents = questions::list_documents(state.db.as_ref(), user_id, project_id).await?;
    Ok(ApiResponse::ok(documents.iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/api/projects/{project_id}/documents",
    tag = "documents",
    params(("project_id" = Uuid, Path, description = "Project id")),
    request_body(content = UploadDocumentForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Document parsed and stored", body = DocumentResponse),
        (status = 400, description = "Missing or empty file", body = ErrorBody),
        (status = 502, description = "Parsing service failed", body = ErrorBody)
    )
)]
pub async fn upload_document_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(project_id): ValidPath<Uuid>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<DocumentResponse> {
    let mut multipart = multipart.map_err(|e| ApiError::Validation(e.body_text()))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("document")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(e.body_text()))?;
        upload = Some((file_name, data));
        break;
    }

    let (file_name, data) = upload.ok_or_else(|| {
        ApiError::Validation(format!("multipart field '{}' is required", FILE_FIELD))
    })?;
    info!(%project_id, %file_name, bytes = data.len(), "document upload received");

    let document = pipeline::ingest_document(
        state.db.as_ref(),
        state.parser.as_ref(),
        user_id,
        project_id,
        &file_name,
        &data,
    )
    .await?;
    Ok(ApiResponse::created(document.into()))
}

#[utoipa::path(
    get,
    path = "/api/documents/{document_id}",
    tag = "documents",
    params(("document_id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "Document with its text", body = DocumentResponse),
        (status = 404, description = "No such document", body = ErrorBody)
    )
)]
pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(document_id): ValidPath<Uuid>,
) -> ApiResult<DocumentResponse> {
    let document = questions::get_document(state.db.as_ref(), user_id, document_id).await?;
    Ok(ApiResponse::ok(document.into()))
}
