//! services/api/src/web/questions.rs
//!
//! Question extraction, project questions and their answers.

use axum::extract::State;
use autorfp_core::domain::{Answer, AnswerDraft, Question, Source};
use autorfp_core::pipeline::{self, ExtractionSource};
use autorfp_core::questions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::extract::{check_text, CurrentUser, ValidPath, Validate, ValidatedJson};
use crate::web::response::{ApiResponse, ApiResult, Deleted, ErrorBody};
use crate::web::state::AppState;

const MAX_INLINE_CONTENT_CHARS: usize = 500_000;
const MAX_ANSWER_CHARS: usize = 20_000;

//=========================================================================================
// Request/Response Types
//=========================================================================================

/// Either an uploaded document of the project, or raw text.
#[derive(Deserialize, ToSchema)]
pub struct ExtractQuestionsRequest {
    pub document_id: Option<Uuid>,
    pub document_name: Option<String>,
    pub content: Option<String>,
}

impl Validate for ExtractQuestionsRequest {
    fn validate(&self) -> Result<(), String> {
        match (&self.document_id, &self.document_name, &self.content) {
            (Some(_), None, None) => Ok(()),
            (None, Some(name), Some(content)) => {
                check_text("document_name", name, 500)?;
                check_text("content", content, MAX_INLINE_CONTENT_CHARS)
            }
            _ => Err("provide either document_id, or document_name and content".to_string()),
        }
    }
}

impl ExtractQuestionsRequest {
    fn into_source(self) -> ExtractionSource {
        match self.document_id {
            Some(document_id) => ExtractionSource::Document(document_id),
            None => ExtractionSource::Inline {
                document_name: self.document_name.unwrap_or_default().trim().to_string(),
                content: self.content.unwrap_or_default(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct SourceDto {
    pub file_name: String,
    pub page_number: Option<u32>,
    pub relevance: Option<f32>,
    pub excerpt: Option<String>,
}

impl From<Source> for SourceDto {
    fn from(source: Source) -> Self {
        Self {
            file_name: source.file_name,
            page_number: source.page_number,
            relevance: source.relevance,
            excerpt: source.excerpt,
        }
    }
}

impl From<SourceDto> for Source {
    fn from(dto: SourceDto) -> Self {
        Self {
            file_name: dto.file_name,
            page_number: dto.page_number,
            relevance: dto.relevance,
            excerpt: dto.excerpt,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct SaveAnswerRequest {
    pub text: String,
    pub confidence: Option<f32>,
    #[serde(default)]
    pub sources: Vec<SourceDto>,
}

impl Validate for SaveAnswerRequest {
    fn validate(&self) -> Result<(), String> {
        check_text("text", &self.text, MAX_ANSWER_CHARS)?;
        if let Some(confidence) = self.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err("confidence must be between 0 and 1".to_string());
            }
        }
        self.sources
            .iter()
            .try_for_each(|s| check_text("sources.file_name", &s.file_name, 500))
    }
}

#[derive(Serialize, ToSchema)]
pub struct AnswerResponse {
    pub question_id: Uuid,
    pub text: String,
    pub confidence: Option<f32>,
    pub sources: Vec<SourceDto>,
    pub updated_at: DateTime<Utc>,
}

impl From<Answer> for AnswerResponse {
    fn from(answer: Answer) -> Self {
        Self {
            question_id: answer.question_id,
            text: answer.text,
            confidence: answer.confidence,
            sources: answer.sources.into_iter().map(Into::into).collect(),
            updated_at: answer.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct QuestionResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Identifier of the question inside the RFP, e.g. `q_3_2`.
    pub reference_id: String,
    pub text: String,
    pub topic: Option<String>,
    pub section_id: Option<String>,
    pub answer: Option<AnswerResponse>,
    pub created_at: DateTime<Utc>,
}

impl From<Question> for QuestionResponse {
    fn from(question: Question) -> Self {
        Self {
            id: question.id,
            project_id: question.project_id,
            reference_id: question.reference_id,
            text: question.text,
            topic: question.topic,
            section_id: question.section_id,
            answer: question.answer.map(Into::into),
            created_at: question.created_at,
        }
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

#[utoipa::path(
    post,
    path = "/api/projects/{project_id}/extract-questions",
    tag = "questions",
    params(("project_id" = Uuid, Path, description = "Project id")),
    request_body = ExtractQuestionsRequest,
    responses(
        (status = 200, description = "Questions extracted and stored", body = [QuestionResponse]),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 502, description = "Language model failed", body = ErrorBody)
    )
)]
pub async fn extract_questions_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(project_id): ValidPath<Uuid>,
    ValidatedJson(req): ValidatedJson<ExtractQuestionsRequest>,
) -> ApiResult<Vec<QuestionResponse>> {
    let extracted = pipeline::extract_questions(
        state.db.as_ref(),
        state.extractor.as_ref(),
        user_id,
        project_id,
        req.into_source(),
    )
    .await?;
    Ok(ApiResponse::ok(extracted.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/api/projects/{project_id}/questions",
    tag = "questions",
    params(("project_id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 200, description = "Questions in document order", body = [QuestionResponse]),
        (status = 404, description = "No such project", body = ErrorBody)
    )
)]
pub async fn list_questions_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(project_id): ValidPath<Uuid>,
) -> ApiResult<Vec<QuestionResponse>> {
    let list = questions::list_questions(state.db.as_ref(), user_id, project_id).await?;
    Ok(ApiResponse::ok(list.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    put,
    path = "/api/questions/{question_id}/answer",
    tag = "questions",
    params(("question_id" = Uuid, Path, description = "Question id")),
    request_body = SaveAnswerRequest,
    responses(
        (status = 200, description = "Answer saved", body = AnswerResponse),
        (status = 404, description = "No such question", body = ErrorBody)
    )
)]
pub async fn save_answer_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(question_id): ValidPath<Uuid>,
    ValidatedJson(req): ValidatedJson<SaveAnswerRequest>,
) -> ApiResult<AnswerResponse> {
    let draft = AnswerDraft {
        text: req.text,
        confidence: req.confidence,
        sources: req.sources.into_iter().map(Into::into).collect(),
    };
    let answer = questions::save_answer(state.db.as_ref(), user_id, question_id, draft).await?;
    Ok(ApiResponse::ok(answer.into()))
}

#[utoipa::path(
    delete,
    path = "/api/questions/{question_id}",
    tag = "questions",
    params(("question_id" = Uuid, Path, description = "Question id")),
    responses(
        (status = 200, description = "Question and its answer deleted", body = Deleted),
        (status = 404, description = "No such question", body = ErrorBody)
    )
)]
pub async fn delete_question_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(question_id): ValidPath<Uuid>,
) -> ApiResult<Deleted> {
    questions::delete_question(state.db.as_ref(), user_id, question_id).await?;
    Ok(Deleted::response())
}
