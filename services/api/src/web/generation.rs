//! services/api/src/web/generation.rs
//!
//! Five-stage answer generation, for stored questions and for free text.

use axum::extract::State;
use autorfp_core::pipeline::{self, AnswerValidation, StageReport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::extract::{check_text, CurrentUser, ValidPath, Validate, ValidatedJson};
use crate::web::questions::{AnswerResponse, SourceDto};
use crate::web::response::{ApiResponse, ApiResult, ErrorBody};
use crate::web::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct ValidationResponse {
    pub is_valid: bool,
    pub confidence: f32,
    pub issues: Vec<String>,
    pub revised_answer: Option<String>,
}

impl From<AnswerValidation> for ValidationResponse {
    fn from(v: AnswerValidation) -> Self {
        Self {
            is_valid: v.is_valid,
            confidence: v.confidence,
            issues: v.issues,
            revised_answer: v.revised_answer,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct StageTiming {
    /// `analyze_question`, `search_documents`, `extract_information`,
    /// `synthesize_response` or `validate_answer`.
    pub stage: String,
    pub duration_ms: u64,
}

impl From<StageReport> for StageTiming {
    fn from(report: StageReport) -> Self {
        Self {
            stage: report.stage.to_string(),
            duration_ms: report.duration_ms,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct GenerateAnswerResponse {
    pub answer: AnswerResponse,
    pub validation: ValidationResponse,
    pub stages: Vec<StageTiming>,
}

#[derive(Deserialize, ToSchema)]
pub struct GenerateResponseRequest {
    pub project_id: Uuid,
    pub question: String,
}

impl Validate for GenerateResponseRequest {
    fn validate(&self) -> Result<(), String> {
        check_text("question", &self.question, 4000)
    }
}

#[derive(Serialize, ToSchema)]
pub struct GeneratedResponseBody {
    pub answer: String,
    pub confidence: Option<f32>,
    pub sources: Vec<SourceDto>,
    pub validation: ValidationResponse,
    pub stages: Vec<StageTiming>,
}

#[utoipa::path(
    post,
    path = "/api/questions/{question_id}/generate",
    tag = "generation",
    params(("question_id" = Uuid, Path, description = "Question id")),
    responses(
        (status = 200, description = "Answer generated and saved", body = GenerateAnswerResponse),
        (status = 404, description = "No such question", body = ErrorBody),
        (status = 502, description = "A generation stage failed; nothing was saved", body = ErrorBody)
    )
)]
pub async fn generate_answer_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(question_id): ValidPath<Uuid>,
) -> ApiResult<GenerateAnswerResponse> {
    let outcome = pipeline::generate_answer(
        state.db.as_ref(),
        state.generator.as_ref(),
        user_id,
        question_id,
    )
    .await?;
    Ok(ApiResponse::ok(GenerateAnswerResponse {
        answer: outcome.answer.into(),
        validation: outcome.validation.into(),
        stages: outcome.stages.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/api/generate-response",
    tag = "generation",
    request_body = GenerateResponseRequest,
    responses(
        (status = 200, description = "Generated answer; not stored", body = GeneratedResponseBody),
        (status = 404, description = "No such project", body = ErrorBody),
        (status = 502, description = "A generation stage failed", body = ErrorBody)
    )
)]
pub async fn generate_response_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidatedJson(req): ValidatedJson<GenerateResponseRequest>,
) -> ApiResult<GeneratedResponseBody> {
    let generated = pipeline::generate_response(
        state.db.as_ref(),
        state.generator.as_ref(),
        user_id,
        req.project_id,
        &req.question,
    )
    .await?;
    Ok(ApiResponse::ok(GeneratedResponseBody {
        answer: generated.answer.text,
        confidence: generated.answer.confidence,
        sources: generated.answer.sources.into_iter().map(Into::into).collect(),
        validation: generated.validation.into(),
        stages: generated.stages.into_iter().map(Into::into).collect(),
    }))
}
