//! services/api/src/web/organizations.rs
//!
//! Organization, membership and parsing-connection endpoints.

use axum::extract::State;
use autorfp_core::domain::{
    Member, Organization, OrganizationChanges, OrganizationMembership, ParsingConnection, Role,
};
use autorfp_core::tenancy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::auth::UserResponse;
use crate::web::extract::{
    check_optional_text, check_text, double_option, parse_role, CurrentUser, ValidPath, Validate,
    ValidatedJson,
};
use crate::web::response::{ApiResponse, ApiResult, Deleted, ErrorBody};
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateOrganizationRequest {
    pub name: String,
    /// Derived from the name when omitted.
    pub slug: Option<String>,
    pub description: Option<String>,
}

impl Validate for CreateOrganizationRequest {
    fn validate(&self) -> Result<(), String> {
        check_text("name", &self.name, 200)?;
        check_optional_text("slug", self.slug.as_deref(), 64)?;
        check_optional_text("description", self.description.as_deref(), 2000)
    }
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateOrganizationRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
    /// `null` clears the description.
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
}

impl Validate for UpdateOrganizationRequest {
    fn validate(&self) -> Result<(), String> {
        check_optional_text("name", self.name.as_deref(), 200)?;
        check_optional_text("slug", self.slug.as_deref(), 64)?;
        check_optional_text("description", self.description.clone().flatten().as_deref(), 2000)
    }
}

#[derive(Deserialize, ToSchema)]
pub struct AddMemberRequest {
    pub email: String,
    /// `member` (default), `admin` or `owner`.
    pub role: Option<String>,
}

impl Validate for AddMemberRequest {
    fn validate(&self) -> Result<(), String> {
        check_text("email", &self.email, 320)
    }
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateMemberRequest {
    pub role: String,
}

impl Validate for UpdateMemberRequest {
    fn validate(&self) -> Result<(), String> {
        check_text("role", &self.role, 16)
    }
}

#[derive(Deserialize, ToSchema)]
pub struct ConnectParsingRequest {
    pub project_id: String,
    pub project_name: Option<String>,
}

impl Validate for ConnectParsingRequest {
    fn validate(&self) -> Result<(), String> {
        check_text("project_id", &self.project_id, 200)?;
        check_optional_text("project_name", self.project_name.as_deref(), 200)
    }
}

#[derive(Serialize, ToSchema)]
pub struct ParsingConnectionResponse {
    pub project_id: String,
    pub project_name: Option<String>,
    pub connected_at: DateTime<Utc>,
}

impl From<ParsingConnection> for ParsingConnectionResponse {
    fn from(connection: ParsingConnection) -> Self {
        Self {
            project_id: connection.project_id,
            project_name: connection.project_name,
            connected_at: connection.connected_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct OrganizationResponse {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub parsing_connection: Option<ParsingConnectionResponse>,
    /// The caller's role, when known.
    pub role: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrganizationResponse {
    fn new(organization: Organization, role: Option<Role>) -> Self {
        Self {
            id: organization.id,
            name: organization.name,
            slug: organization.slug,
            description: organization.description,
            parsing_connection: organization.parsing.map(Into::into),
            role: role.map(|r| r.to_string()),
            created_at: organization.created_at,
            updated_at: organization.updated_at,
        }
    }
}

impl From<OrganizationMembership> for OrganizationResponse {
    fn from(membership: OrganizationMembership) -> Self {
        Self::new(membership.organization, Some(membership.role))
    }
}

#[derive(Serialize, ToSchema)]
pub struct MemberResponse {
    pub user: UserResponse,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

impl From<Member> for MemberResponse {
    fn from(member: Member) -> Self {
        Self {
            user: member.user.into(),
            role: member.role.to_string(),
            joined_at: member.joined_at,
        }
    }
}

//=========================================================================================
// Organization Handlers
//=========================================================================================

#[utoipa::path(
    get,
    path = "/api/organizations",
    tag = "organizations",
    responses(
        (status = 200, description = "Organizations the caller belongs to", body = [OrganizationResponse]),
        (status = 401, description = "Not signed in", body = ErrorBody)
    )
)]
pub async fn list_organizations_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> ApiResult<Vec<OrganizationResponse>> {
    let memberships = tenancy::list_organizations(state.db.as_ref(), user_id).await?;
    Ok(ApiResponse::ok(memberships.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/api/organizations",
    tag = "organizations",
    request_body = CreateOrganizationRequest,
    responses(
        (status = 201, description = "Organization created; the caller is its owner", body = OrganizationResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 409, description = "Slug already taken", body = ErrorBody)
    )
)]
pub async fn create_organization_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidatedJson(req): ValidatedJson<CreateOrganizationRequest>,
) -> ApiResult<OrganizationResponse> {
    let organization = tenancy::create_organization(
        state.db.as_ref(),
        user_id,
        &req.name,
        req.slug.as_deref(),
        req.description.as_deref(),
    )
    .await?;
    Ok(ApiResponse::created(OrganizationResponse::new(
        organization,
        Some(Role::Owner),
    )))
}

#[utoipa::path(
    get,
    path = "/api/organizations/{org_id}",
    tag = "organizations",
    params(("org_id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Organization", body = OrganizationResponse),
        (status = 403, description = "Not a member", body = ErrorBody),
        (status = 404, description = "No such organization", body = ErrorBody)
    )
)]
pub async fn get_organization_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(org_id): ValidPath<Uuid>,
) -> ApiResult<OrganizationResponse> {
    let membership = tenancy::get_organization(state.db.as_ref(), user_id, org_id).await?;
    Ok(ApiResponse::ok(membership.into()))
}

#[utoipa::path(
    patch,
    path = "/api/organizations/{org_id}",
    tag = "organizations",
    params(("org_id" = Uuid, Path, description = "Organization id")),
    request_body = UpdateOrganizationRequest,
    responses(
        (status = 200, description = "Organization updated", body = OrganizationResponse),
        (status = 403, description = "Requires admin", body = ErrorBody),
        (status = 409, description = "Slug already taken", body = ErrorBody)
    )
)]
pub async fn update_organization_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(org_id): ValidPath<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateOrganizationRequest>,
) -> ApiResult<OrganizationResponse> {
    let changes = OrganizationChanges {
        name: req.name.map(|n| n.trim().to_string()),
        slug: req.slug.map(|s| s.trim().to_string()),
        description: req.description,
    };
    let organization =
        tenancy::update_organization(state.db.as_ref(), user_id, org_id, changes).await?;
    let role = state.db.get_member_role(org_id, user_id).await?;
    Ok(ApiResponse::ok(OrganizationResponse::new(organization, role)))
}

#[utoipa::path(
    delete,
    path = "/api/organizations/{org_id}",
    tag = "organizations",
    params(("org_id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Organization and all its data deleted", body = Deleted),
        (status = 403, description = "Requires owner", body = ErrorBody)
    )
)]
pub async fn delete_organization_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(org_id): ValidPath<Uuid>,
) -> ApiResult<Deleted> {
    tenancy::delete_organization(state.db.as_ref(), user_id, org_id).await?;
    Ok(Deleted::response())
}

//=========================================================================================
// Parsing Connection Handlers
//=========================================================================================

#[utoipa::path(
    post,
    path = "/api/organizations/{org_id}/parsing-connection",
    tag = "organizations",
    params(("org_id" = Uuid, Path, description = "Organization id")),
    request_body = ConnectParsingRequest,
    responses(
        (status = 200, description = "Parsing project connected", body = OrganizationResponse),
        (status = 403, description = "Requires admin", body = ErrorBody)
    )
)]
pub async fn connect_parsing_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(org_id): ValidPath<Uuid>,
    ValidatedJson(req): ValidatedJson<ConnectParsingRequest>,
) -> ApiResult<OrganizationResponse> {
    let organization = tenancy::connect_parsing_service(
        state.db.as_ref(),
        user_id,
        org_id,
        req.project_id.trim(),
        req.project_name.as_deref(),
    )
    .await?;
    let role = state.db.get_member_role(org_id, user_id).await?;
    Ok(ApiResponse::ok(OrganizationResponse::new(organization, role)))
}

#[utoipa::path(
    delete,
    path = "/api/organizations/{org_id}/parsing-connection",
    tag = "organizations",
    params(("org_id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Parsing project disconnected", body = OrganizationResponse),
        (status = 403, description = "Requires admin", body = ErrorBody)
    )
)]
pub async fn disconnect_parsing_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(org_id): ValidPath<Uuid>,
) -> ApiResult<OrganizationResponse> {
    let organization =
        tenancy::disconnect_parsing_service(state.db.as_ref(), user_id, org_id).await?;
    let role = state.db.get_member_role(org_id, user_id).await?;
    Ok(ApiResponse::ok(OrganizationResponse::new(organization, role)))
}

//=========================================================================================
// Member Handlers
//=========================================================================================

#[utoipa::path(
    get,
    path = "/api/organizations/{org_id}/members",
    tag = "members",
    params(("org_id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Members with their roles", body = [MemberResponse]),
        (status = 403, description = "Not a member", body = ErrorBody)
    )
)]
pub async fn list_members_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(org_id): ValidPath<Uuid>,
) -> ApiResult<Vec<MemberResponse>> {
    let members = tenancy::list_members(state.db.as_ref(), user_id, org_id).await?;
    Ok(ApiResponse::ok(members.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/api/organizations/{org_id}/members",
    tag = "members",
    params(("org_id" = Uuid, Path, description = "Organization id")),
    request_body = AddMemberRequest,
    responses(
        (status = 201, description = "Member added", body = MemberResponse),
        (status = 403, description = "Requires admin, or owner to grant owner", body = ErrorBody),
        (status = 404, description = "No user with that email", body = ErrorBody),
        (status = 409, description = "Already a member", body = ErrorBody)
    )
)]
pub async fn add_member_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ValidPath(org_id): ValidPath<Uuid>,
    ValidatedJson(req): ValidatedJson<AddMemberRequest>,
) -> ApiResult<MemberResponse> {
    let role = match req.role.as_deref() {
        Some(role) => parse_role(role)?,
        None => Role::Member,
    };
    let member = tenancy::add_member(state.db.as_ref(), user_id, org_id, &req.email, role).await?;
    Ok(ApiResponse::created(member.into()))
}

#[utoipa::path(
    patch,
    path = "/api/organizations/{org_id}/members/{user_id}",
    tag = "members",
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("user_id" = Uuid, Path, description = "Member's user id")
    ),
    request_body = UpdateMemberRequest,
    responses(
        (status = 200, description = "Role changed", body = MemberResponse),
        (status = 403, description = "Insufficient role", body = ErrorBody),
        (status = 409, description = "Would leave the organization without an owner", body = ErrorBody)
    )
)]
pub async fn update_member_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    ValidPath((org_id, target)): ValidPath<(Uuid, Uuid)>,
    ValidatedJson(req): ValidatedJson<UpdateMemberRequest>,
) -> ApiResult<MemberResponse> {
    let role = parse_role(&req.role)?;
    let member =
        tenancy::update_member_role(state.db.as_ref(), actor, org_id, target, role).await?;
    Ok(ApiResponse::ok(member.into()))
}

#[utoipa::path(
    delete,
    path = "/api/organizations/{org_id}/members/{user_id}",
    tag = "members",
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("user_id" = Uuid, Path, description = "Member's user id")
    ),
    responses(
        (status = 200, description = "Member removed", body = Deleted),
        (status = 403, description = "Insufficient role", body = ErrorBody),
        (status = 409, description = "Would leave the organization without an owner", body = ErrorBody)
    )
)]
pub async fn remove_member_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    ValidPath((org_id, target)): ValidPath<(Uuid, Uuid)>,
) -> ApiResult<Deleted> {
    tenancy::remove_member(state.db.as_ref(), actor, org_id, target).await?;
    Ok(Deleted::response())
}
