//! services/api/src/web/projects.rs
//!
//! Project endpoints. Projects live inside an organization and hold the
//! documents and questions of one RFP.

use axum::extract::State;
use autorfp_core::domain::{Project, ProjectChanges};
use autorfp_core::tenancy;
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

#[derive(Deserialize, ToSchema)]
pub struct CreateProjectRequest {
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

impl Validate for CreateProjectRequest {
    fn validate(&self) -> Result<(), String> {
        check_text("name", &self.name, 200)?;
        check_optional_text("description", self.description.as_deref(), 2000)
    }
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    /// `null` clears the description.
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
}

impl Validate for UpdateProjectRequest {
    fn validate(&self) -> Result<(), String> {
        check_optional_text("name", self.name.as_deref(), 200)?;
        check_optional_text("description", self.description.clone().flatten().as_deref(), 2000)
    }
}

#[derive(Serialize, ToSchema)]
pub struct ProjectResponse {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Project> for ProjectResponse {
    fn from(project: Project) -> Self {
        Self {
            id: project.id,
            organization_id: project.organization_id,
            name: project.name,
            description: project.description,
            created_at: project.created_at,
            updated_at: project.updated_at,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/organizations/{org_id}/projects",
    tag = "projects",
    params(("org_id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Projects of the organization", body = [ProjectResponse]),
        (status = 403, description = "Not a member", body = ErrorBody),
        (status = 404, description = "No such organization", body = ErrorBody)
    )
)]
pub async fn list_projects_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(org_id): ValidPath<Uuid>,
) -> ApiResult<Vec<ProjectResponse>> {
    let projects = tenancy::list_projects(state.db.as_ref(), user_id, org_id).await?;
    Ok(ApiResponse::ok(projects.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/api/projects",
    tag = "projects",
    request_body = CreateProjectRequest,
    responses(
        (status = 201, description = "Project created", body = ProjectResponse),
        (status = 403, description = "Not a member", body = ErrorBody),
        (status = 404, description = "No such organization", body = ErrorBody)
    )
)]
pub async fn create_project_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidatedJson(req): ValidatedJson<CreateProjectRequest>,
) -> ApiResult<ProjectResponse> {
    let project = tenancy::create_project(
        state.db.as_ref(),
        user_id,
        req.organization_id,
        &req.name,
        req.description.as_deref(),
    )
    .await?;
    Ok(ApiResponse::created(project.into()))
}

#[utoipa::path(
    get,
    path = "/api/projects/{project_id}",
    tag = "projects",
    params(("project_id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project", body = ProjectResponse),
        (status = 403, description = "Not a member", body = ErrorBody),
        (status = 404, description = "No such project", body = ErrorBody)
    )
)]
pub async fn get_project_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(project_id): ValidPath<Uuid>,
) -> ApiResult<ProjectResponse> {
    let project = tenancy::get_project(state.db.as_ref(), user_id, project_id).await?;
    Ok(ApiResponse::ok(project.into()))
}

#[utoipa::path(
    patch,
    path = "/api/projects/{project_id}",
    tag = "projects",
    params(("project_id" = Uuid, Path, description = "Project id")),
    request_body = UpdateProjectRequest,
    responses(
        (status = 200, description = "Project updated", body = ProjectResponse),
        (status = 403, description = "Requires admin", body = ErrorBody),
        (status = 404, description = "No such project", body = ErrorBody)
    )
)]
pub async fn update_project_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(project_id): ValidPath<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateProjectRequest>,
) -> ApiResult<ProjectResponse> {
    let changes = ProjectChanges {
        name: req.name.map(|n| n.trim().to_string()),
        description: req.description,
    };
    let project = tenancy::update_project(state.db.as_ref(), user_id, project_id, changes).await?;
    Ok(ApiResponse::ok(project.into()))
}

#[utoipa::path(
    delete,
    path = "/api/projects/{project_id}",
    tag = "projects",
    params(("project_id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project, its documents and questions deleted", body = Deleted),
        (status = 403, description = "Requires admin", body = ErrorBody),
        (status = 404, description = "No such project", body = ErrorBody)
    )
)]
pub async fn delete_project_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(project_id): ValidPath<Uuid>,
) -> ApiResult<Deleted> {
    tenancy::delete_project(state.db.as_ref(), user_id, project_id).await?;
    Ok(Deleted::response())
}
