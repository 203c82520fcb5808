//! services/api/src/web/knowledge_bases.rs
//!
//! Knowledge bases: organization-wide libraries of reusable question/answer pairs.

use axum::extract::State;
use autorfp_core::domain::{
    AnswerChange, KnowledgeBase, KnowledgeBaseChanges, KnowledgeBaseQuestion,
    KnowledgeBaseQuestionChanges, NewKnowledgeBaseQuestion,
};
use autorfp_core::knowledge;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::extract::{
    check_optional_text, check_text, double_option, CurrentUser, ValidPath, Validate, ValidatedJson,
};
use crate::web::response::{ApiResponse, ApiResult, Deleted, ErrorBody};
use crate::web::state::AppState;

const MAX_QUESTION_CHARS: usize = 4000;
const MAX_ANSWER_CHARS: usize = 20_000;
const MAX_TAGS: usize = 20;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateKnowledgeBaseRequest {
    pub name: String,
    pub description: Option<String>,
}

impl Validate for CreateKnowledgeBaseRequest {
    fn validate(&self) -> Result<(), String> {
        check_text("name", &self.name, 200)?;
        check_optional_text("description", self.description.as_deref(), 2000)
    }
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateKnowledgeBaseRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
}

impl Validate for UpdateKnowledgeBaseRequest {
    fn validate(&self) -> Result<(), String> {
        check_optional_text("name", self.name.as_deref(), 200)?;
        check_optional_text("description", self.description.clone().flatten().as_deref(), 2000)
    }
}

#[derive(Deserialize, ToSchema)]
pub struct CreateKnowledgeBaseQuestionRequest {
    pub text: String,
    pub topic: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub answer: Option<String>,
}

impl Validate for CreateKnowledgeBaseQuestionRequest {
    fn validate(&self) -> Result<(), String> {
        check_text("text", &self.text, MAX_QUESTION_CHARS)?;
        check_optional_text("topic", self.topic.as_deref(), 200)?;
        check_tags(&self.tags)?;
        check_optional_text("answer", self.answer.as_deref(), MAX_ANSWER_CHARS)
    }
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateKnowledgeBaseQuestionRequest {
    pub text: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub topic: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    /// Absent keeps the answer, `null` deletes it, a string sets it.
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub answer: Option<Option<String>>,
}

impl Validate for UpdateKnowledgeBaseQuestionRequest {
    fn validate(&self) -> Result<(), String> {
        check_optional_text("text", self.text.as_deref(), MAX_QUESTION_CHARS)?;
        check_optional_text("topic", self.topic.clone().flatten().as_deref(), 200)?;
        if let Some(tags) = &self.tags {
            check_tags(tags)?;
        }
        check_optional_text("answer", self.answer.clone().flatten().as_deref(), MAX_ANSWER_CHARS)
    }
}

impl UpdateKnowledgeBaseQuestionRequest {
    fn into_changes(self) -> KnowledgeBaseQuestionChanges {
        let answer = match self.answer {
            None => AnswerChange::Keep,
            Some(None) => AnswerChange::Clear,
            Some(Some(text)) => AnswerChange::Set(text),
        };
        KnowledgeBaseQuestionChanges {
            text: self.text.map(|t| t.trim().to_string()),
            topic: self.topic,
            tags: self.tags.map(normalize_tags),
            answer,
        }
    }
}

fn check_tags(tags: &[String]) -> Result<(), String> {
    if tags.len() > MAX_TAGS {
        return Err(format!("at most {} tags are allowed", MAX_TAGS));
    }
    tags.iter().try_for_each(|tag| check_text("tags", tag, 64))
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags.iter().map(|t| t.trim().to_lowercase()) {
        if !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    normalized
}

#[derive(Serialize, ToSchema)]
pub struct KnowledgeBaseResponse {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<KnowledgeBase> for KnowledgeBaseResponse {
    fn from(kb: KnowledgeBase) -> Self {
        Self {
            id: kb.id,
            organization_id: kb.organization_id,
            name: kb.name,
            description: kb.description,
            created_at: kb.created_at,
            updated_at: kb.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct KnowledgeBaseAnswerResponse {
    pub text: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct KnowledgeBaseQuestionResponse {
    pub id: Uuid,
    pub knowledge_base_id: Uuid,
    pub text: String,
    pub topic: Option<String>,
    pub tags: Vec<String>,
    pub answer: Option<KnowledgeBaseAnswerResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<KnowledgeBaseQuestion> for KnowledgeBaseQuestionResponse {
    fn from(q: KnowledgeBaseQuestion) -> Self {
        Self {
            id: q.id,
            knowledge_base_id: q.knowledge_base_id,
            text: q.text,
            topic: q.topic,
            tags: q.tags,
            answer: q.answer.map(|a| KnowledgeBaseAnswerResponse {
                text: a.text,
                updated_at: a.updated_at,
            }),
            created_at: q.created_at,
            updated_at: q.updated_at,
        }
    }
}

//=========================================================================================
// Knowledge Base Handlers
//=========================================================================================

#[utoipa::path(
    get,
    path = "/api/organizations/{org_id}/knowledge-bases",
    tag = "knowledge-bases",
    params(("org_id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Knowledge bases of the organization", body = [KnowledgeBaseResponse]),
        (status = 403, description = "Not a member", body = ErrorBody)
    )
)]
pub async fn list_knowledge_bases_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(org_id): ValidPath<Uuid>,
) -> ApiResult<Vec<KnowledgeBaseResponse>> {
    let kbs = knowledge::list_knowledge_bases(state.db.as_ref(), user_id, org_id).await?;
    Ok(ApiResponse::ok(kbs.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/api/organizations/{org_id}/knowledge-bases",
    tag = "knowledge-bases",
    params(("org_id" = Uuid, Path, description = "Organization id")),
    request_body = CreateKnowledgeBaseRequest,
    responses(
        (status = 201, description = "Knowledge base created", body = KnowledgeBaseResponse),
        (status = 403, description = "Not a member", body = ErrorBody)
    )
)]
pub async fn create_knowledge_base_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(org_id): ValidPath<Uuid>,
    ValidatedJson(req): ValidatedJson<CreateKnowledgeBaseRequest>,
) -> ApiResult<KnowledgeBaseResponse> {
    let kb = knowledge::create_knowledge_base(
        state.db.as_ref(),
        user_id,
        org_id,
        &req.name,
        req.description.as_deref(),
    )
    .await?;
    Ok(ApiResponse::created(kb.into()))
}

#[utoipa::path(
    get,
    path = "/api/knowledge-bases/{kb_id}",
    tag = "knowledge-bases",
    params(("kb_id" = Uuid, Path, description = "Knowledge base id")),
    responses(
        (status = 200, description = "Knowledge base", body = KnowledgeBaseResponse),
        (status = 404, description = "No such knowledge base", body = ErrorBody)
    )
)]
pub async fn get_knowledge_base_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(kb_id): ValidPath<Uuid>,
) -> ApiResult<KnowledgeBaseResponse> {
    let kb = knowledge::get_knowledge_base(state.db.as_ref(), user_id, kb_id).await?;
    Ok(ApiResponse::ok(kb.into()))
}

#[utoipa::path(
    patch,
    path = "/api/knowledge-bases/{kb_id}",
    tag = "knowledge-bases",
    params(("kb_id" = Uuid, Path, description = "Knowledge base id")),
    request_body = UpdateKnowledgeBaseRequest,
    responses(
        (status = 200, description = "Knowledge base updated", body = KnowledgeBaseResponse),
        (status = 403, description = "Not a member", body = ErrorBody)
    )
)]
pub async fn update_knowledge_base_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(kb_id): ValidPath<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateKnowledgeBaseRequest>,
) -> ApiResult<KnowledgeBaseResponse> {
    let changes = KnowledgeBaseChanges {
        name: req.name.map(|n| n.trim().to_string()),
        description: req.description,
    };
    let kb = knowledge::update_knowledge_base(state.db.as_ref(), user_id, kb_id, changes).await?;
    Ok(ApiResponse::ok(kb.into()))
}

#[utoipa::path(
    delete,
    path = "/api/knowledge-bases/{kb_id}",
    tag = "knowledge-bases",
    params(("kb_id" = Uuid, Path, description = "Knowledge base id")),
    responses(
        (status = 200, description = "Knowledge base and its questions deleted", body = Deleted),
        (status = 403, description = "Requires admin", body = ErrorBody)
    )
)]
pub async fn delete_knowledge_base_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(kb_id): ValidPath<Uuid>,
) -> ApiResult<Deleted> {
    knowledge::delete_knowledge_base(state.db.as_ref(), user_id, kb_id).await?;
    Ok(Deleted::response())
}

//=========================================================================================
// Knowledge Base Question Handlers
//=========================================================================================

#[utoipa::path(
    get,
    path = "/api/knowledge-bases/{kb_id}/questions",
    tag = "knowledge-bases",
    params(("kb_id" = Uuid, Path, description = "Knowledge base id")),
    responses(
        (status = 200, description = "Questions with their answers", body = [KnowledgeBaseQuestionResponse]),
        (status = 404, description = "No such knowledge base", body = ErrorBody)
    )
)]
pub async fn list_kb_questions_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(kb_id): ValidPath<Uuid>,
) -> ApiResult<Vec<KnowledgeBaseQuestionResponse>> {
    let questions = knowledge::list_questions(state.db.as_ref(), user_id, kb_id).await?;
    Ok(ApiResponse::ok(questions.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/api/knowledge-bases/{kb_id}/questions",
    tag = "knowledge-bases",
    params(("kb_id" = Uuid, Path, description = "Knowledge base id")),
    request_body = CreateKnowledgeBaseQuestionRequest,
    responses(
        (status = 201, description = "Question created", body = KnowledgeBaseQuestionResponse),
        (status = 400, description = "Invalid request", body = ErrorBody)
    )
)]
pub async fn create_kb_question_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(kb_id): ValidPath<Uuid>,
    ValidatedJson(req): ValidatedJson<CreateKnowledgeBaseQuestionRequest>,
) -> ApiResult<KnowledgeBaseQuestionResponse> {
    let question = NewKnowledgeBaseQuestion {
        text: req.text.trim().to_string(),
        topic: req.topic,
        tags: normalize_tags(req.tags),
        answer: req.answer,
    };
    let created = knowledge::create_question(state.db.as_ref(), user_id, kb_id, question).await?;
    Ok(ApiResponse::created(created.into()))
}

#[utoipa::path(
    patch,
    path = "/api/knowledge-bases/{kb_id}/questions/{question_id}",
    tag = "knowledge-bases",
    params(
        ("kb_id" = Uuid, Path, description = "Knowledge base id"),
        ("question_id" = Uuid, Path, description = "Question id")
    ),
    request_body = UpdateKnowledgeBaseQuestionRequest,
    responses(
        (status = 200, description = "Question updated", body = KnowledgeBaseQuestionResponse),
        (status = 404, description = "Question not in this knowledge base", body = ErrorBody)
    )
)]
pub async fn update_kb_question_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath((kb_id, question_id)): ValidPath<(Uuid, Uuid)>,
    ValidatedJson(req): ValidatedJson<UpdateKnowledgeBaseQuestionRequest>,
) -> ApiResult<KnowledgeBaseQuestionResponse> {
    let updated = knowledge::update_question(
        state.db.as_ref(),
        user_id,
        kb_id,
        question_id,
        req.into_changes(),
    )
    .await?;
    Ok(ApiResponse::ok(updated.into()))
}

#[utoipa::path(
    delete,
    path = "/api/knowledge-bases/{kb_id}/questions/{question_id}",
    tag = "knowledge-bases",
    params(
        ("kb_id" = Uuid, Path, description = "Knowledge base id"),
        ("question_id" = Uuid, Path, description = "Question id")
    ),
    responses(
        (status = 200, description = "Question and its answer deleted", body = Deleted),
        (status = 404, description = "Question not in this knowledge base", body = ErrorBody)
    )
)]
pub async fn delete_kb_question_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath((kb_id, question_id)): ValidPath<(Uuid, Uuid)>,
) -> ApiResult<Deleted> {
    knowledge::delete_question(state.db.as_ref(), user_id, kb_id, question_id).await?;
    Ok(Deleted::response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_field_maps_to_answer_change() {
        let keep: UpdateKnowledgeBaseQuestionRequest =
            serde_json::from_str(r#"{"text": "Do you encrypt at rest?"}"#).unwrap();
        assert_eq!(keep.into_changes().answer, AnswerChange::Keep);

        let clear: UpdateKnowledgeBaseQuestionRequest =
            serde_json::from_str(r#"{"answer": null}"#).unwrap();
        assert_eq!(clear.into_changes().answer, AnswerChange::Clear);

        let set: UpdateKnowledgeBaseQuestionRequest =
            serde_json::from_str(r#"{"answer": "Yes, AES-256."}"#).unwrap();
        assert_eq!(
            set.into_changes().answer,
            AnswerChange::Set("Yes, AES-256.".to_string())
        );
    }

    #[test]
    fn tags_are_normalized_and_bounded() {
        assert_eq!(
            normalize_tags(vec![" SSO ".to_string(), "sso".to_string(), "Auth".to_string()]),
            vec!["sso".to_string(), "auth".to_string()]
        );
        let too_many: Vec<String> = (0..=MAX_TAGS).map(|i| format!("t{}", i)).collect();
        assert!(check_tags(&too_many).is_err());
        assert!(check_tags(&["".to_string()]).is_err());
    }
}
