//! services/api/src/web/rest.rs
//!
//! The OpenAPI master definition and the HTTP router.

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};

use crate::web::response::{ApiResponse, ApiResult, Deleted, ErrorBody};
use crate::web::state::AppState;
use crate::web::{
    auth, documents, generation, knowledge_bases, middleware::require_auth, organizations,
    projects, questions,
};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::me_handler,
        organizations::list_organizations_handler,
        organizations::create_organization_handler,
        organizations::get_organization_handler,
        organizations::update_organization_handler,
        organizations::delete_organization_handler,
        organizations::connect_parsing_handler,
        organizations::disconnect_parsing_handler,
        organizations::list_members_handler,
        organizations::add_member_handler,
        organizations::update_member_handler,
        organizations::remove_member_handler,
        projects::list_projects_handler,
        projects::create_project_handler,
        projects::get_project_handler,
        projects::update_project_handler,
        projects::delete_project_handler,
        documents::list_documents_handler,
        documents::upload_document_handler,
        documents::get_document_handler,
        questions::extract_questions_handler,
        questions::list_questions_handler,
        questions::save_answer_handler,
        questions::delete_question_handler,
        generation::generate_answer_handler,
        generation::generate_response_handler,
        knowledge_bases::list_knowledge_bases_handler,
        knowledge_bases::create_knowledge_base_handler,
        knowledge_bases::get_knowledge_base_handler,
        knowledge_bases::update_knowledge_base_handler,
        knowledge_bases::delete_knowledge_base_handler,
        knowledge_bases::list_kb_questions_handler,
        knowledge_bases::create_kb_question_handler,
        knowledge_bases::update_kb_question_handler,
        knowledge_bases::delete_kb_question_handler,
    ),
    components(
        schemas(
            HealthResponse,
            ErrorBody,
            Deleted,
            auth::SignupRequest,
            auth::LoginRequest,
            auth::UserResponse,
            organizations::CreateOrganizationRequest,
            organizations::UpdateOrganizationRequest,
            organizations::OrganizationResponse,
            organizations::ParsingConnectionResponse,
            organizations::ConnectParsingRequest,
            organizations::AddMemberRequest,
            organizations::UpdateMemberRequest,
            organizations::MemberResponse,
            projects::CreateProjectRequest,
            projects::UpdateProjectRequest,
            projects::ProjectResponse,
            documents::DocumentSummary,
            documents::DocumentResponse,
            documents::UploadDocumentForm,
            questions::ExtractQuestionsRequest,
            questions::SaveAnswerRequest,
            questions::SourceDto,
            questions::AnswerResponse,
            questions::QuestionResponse,
            generation::GenerateResponseRequest,
            generation::GenerateAnswerResponse,
            generation::GeneratedResponseBody,
            generation::ValidationResponse,
            generation::StageTiming,
            knowledge_bases::CreateKnowledgeBaseRequest,
            knowledge_bases::UpdateKnowledgeBaseRequest,
            knowledge_bases::KnowledgeBaseResponse,
            knowledge_bases::CreateKnowledgeBaseQuestionRequest,
            knowledge_bases::UpdateKnowledgeBaseQuestionRequest,
            knowledge_bases::KnowledgeBaseQuestionResponse,
            knowledge_bases::KnowledgeBaseAnswerResponse,
        )
    ),
    tags(
        (name = "AutoRFP API", description = "RFP ingestion, question extraction and AI-assisted answering."),
        (name = "auth", description = "Accounts and sessions"),
        (name = "organizations", description = "Organizations and their parsing connection"),
        (name = "members", description = "Organization membership and roles"),
        (name = "projects", description = "RFP projects"),
        (name = "documents", description = "Uploaded RFP documents"),
        (name = "questions", description = "Extracted questions and their answers"),
        (name = "generation", description = "Five-stage answer generation"),
        (name = "knowledge-bases", description = "Reusable question/answer libraries")
    )
)]
pub struct ApiDoc;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /api/health - Liveness probe
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "AutoRFP API",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler() -> ApiResult<HealthResponse> {
    Ok(ApiResponse::ok(HealthResponse { status: "ok".to_string() }))
}

//=========================================================================================
// Router
//=========================================================================================

/// Builds every `/api` route. CORS and the Swagger UI are added by the binary.
pub fn router(state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/auth/signup", post(auth::signup_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/logout", post(auth::logout_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route(
            "/organizations",
            get(organizations::list_organizations_handler)
                .post(organizations::create_organization_handler),
        )
        .route(
            "/organizations/{org_id}",
            get(organizations::get_organization_handler)
                .patch(organizations::update_organization_handler)
                .delete(organizations::delete_organization_handler),
        )
        .route(
            "/organizations/{org_id}/parsing-connection",
            post(organizations::connect_parsing_handler)
                .delete(organizations::disconnect_parsing_handler),
        )
        .route(
            "/organizations/{org_id}/members",
            get(organizations::list_members_handler).post(organizations::add_member_handler),
        )
        .route(
            "/organizations/{org_id}/members/{user_id}",
            patch(organizations::update_member_handler)
                .delete(organizations::remove_member_handler),
        )
        .route(
            "/organizations/{org_id}/projects",
            get(projects::list_projects_handler),
        )
        .route(
            "/organizations/{org_id}/knowledge-bases",
            get(knowledge_bases::list_knowledge_bases_handler)
                .post(knowledge_bases::create_knowledge_base_handler),
        )
        .route("/projects", post(projects::create_project_handler))
        .route(
            "/projects/{project_id}",
            get(projects::get_project_handler)
                .patch(projects::update_project_handler)
                .delete(projects::delete_project_handler),
        )
        .route(
            "/projects/{project_id}/documents",
            get(documents::list_documents_handler).post(documents::upload_document_handler),
        )
        .route(
            "/projects/{project_id}/extract-questions",
            post(questions::extract_questions_handler),
        )
        .route(
            "/projects/{project_id}/questions",
            get(questions::list_questions_handler),
        )
        .route("/documents/{document_id}", get(documents::get_document_handler))
        .route(
            "/questions/{question_id}",
            delete(questions::delete_question_handler),
        )
        .route(
            "/questions/{question_id}/answer",
            put(questions::save_answer_handler),
        )
        .route(
            "/questions/{question_id}/generate",
            post(generation::generate_answer_handler),
        )
        .route("/generate-response", post(generation::generate_response_handler))
        .route(
            "/knowledge-bases/{kb_id}",
            get(knowledge_bases::get_knowledge_base_handler)
                .patch(knowledge_bases::update_knowledge_base_handler)
                .delete(knowledge_bases::delete_knowledge_base_handler),
        )
        .route(
            "/knowledge-bases/{kb_id}/questions",
            get(knowledge_bases::list_kb_questions_handler)
                .post(knowledge_bases::create_kb_question_handler),
        )
        .route(
            "/knowledge-bases/{kb_id}/questions/{question_id}",
            patch(knowledge_bases::update_kb_question_handler)
                .delete(knowledge_bases::delete_kb_question_handler),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .nest("/api", public_routes.merge(protected_routes))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
