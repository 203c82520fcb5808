//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user signup, login, logout and the current user.

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use autorfp_core::domain::User;
use autorfp_core::ports::PortError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::extract::{check_optional_text, check_text, CurrentUser, Validate, ValidatedJson};
use crate::web::response::{ApiResponse, ApiResult, ErrorBody};
use crate::web::state::AppState;

const SESSION_COOKIE: &str = "session";
const MIN_PASSWORD_CHARS: usize = 8;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

impl Validate for SignupRequest {
    fn validate(&self) -> Result<(), String> {
        check_email(&self.email)?;
        if self.password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_CHARS
            ));
        }
        check_optional_text("name", self.name.as_deref(), 200)
    }
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), String> {
        check_email(&self.email)?;
        check_text("password", &self.password, 1024)
    }
}

#[derive(Serialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            created_at: user.created_at,
        }
    }
}

fn check_email(email: &str) -> Result<(), String> {
    check_text("email", email, 320)?;
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err("email must be a valid address".to_string()),
    }
}

//=========================================================================================
// Session Cookie Helpers
//=========================================================================================

/// Reads the session id from the `Cookie` header.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|c| c.trim().strip_prefix("session="))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn session_cookie(session_id: &str, ttl: Duration) -> String {
    format!(
        "{}={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE,
        session_id,
        ttl.num_seconds()
    )
}

fn with_cookie(mut response: Response, cookie: &str) -> Result<Response, ApiError> {
    let value = HeaderValue::from_str(cookie).map_err(|e| ApiError::Internal(e.to_string()))?;
    response.headers_mut().insert(header::SET_COOKIE, value);
    Ok(response)
}

async fn start_session(state: &AppState, user_id: Uuid) -> Result<String, ApiError> {
    let auth_session_id = Uuid::new_v4().to_string();
    let ttl = Duration::days(state.config.session_ttl_days);

    state
        .db
        .create_auth_session(&auth_session_id, user_id, Utc::now() + ttl)
        .await?;
    Ok(session_cookie(&auth_session_id, ttl))
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /api/auth/signup - Create a new user account
#[utoipa::path(
    post,
    path = "/api/auth/signup",
    tag = "auth",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created and signed in", body = UserResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody)
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<SignupRequest>,
) -> Result<Response, ApiError> {
    // 1. Hash the password
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            ApiError::Internal("Failed to hash password".to_string())
        })?
        .to_string();

    // 2. Create user in database
    let name = req.name.as_deref().map(str::trim);
    let user = state
        .db
        .create_user_with_email(req.email.trim(), &password_hash, name)
        .await?;
    info!(user_id = %user.id, "user signed up");

    // 3. Start a session and set the cookie
    let cookie = start_session(&state, user.id).await?;
    with_cookie(
        ApiResponse::created(UserResponse::from(user)).into_response(),
        &cookie,
    )
}

/// POST /api/auth/login - Login with existing account
#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = UserResponse),
        (status = 401, description = "Invalid credentials", body = ErrorBody)
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Response, ApiError> {
    // 1. Get user by email
    let user_creds = match state.db.get_user_by_email(req.email.trim()).await {
        Ok(creds) => creds,
        Err(PortError::NotFound(_)) => return Err(ApiError::Unauthorized),
        Err(e) => return Err(e.into()),
    };

    // 2. Verify password
    let parsed_hash = PasswordHash::new(&user_creds.hashed_password).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        ApiError::Internal("Authentication error".to_string())
    })?;
    let valid = Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .is_ok();
    if !valid {
        return Err(ApiError::Unauthorized);
    }

    // 3. Start a session and set the cookie
    let user = state.db.get_user(user_creds.user_id).await?;
    let cookie = start_session(&state, user.id).await?;
    with_cookie(ApiResponse::ok(UserResponse::from(user)).into_response(), &cookie)
}

/// POST /api/auth/logout - Logout and invalidate session
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Session cleared")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Some(auth_session_id) = session_id_from_headers(&headers) {
        state.db.delete_auth_session(&auth_session_id).await?;
    }

    let cookie = session_cookie("", Duration::zero());
    with_cookie(
        ApiResponse::ok(serde_json::json!({ "logged_out": true })).into_response(),
        &cookie,
    )
}

/// GET /api/auth/me - The signed-in user
#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not signed in", body = ErrorBody)
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> ApiResult<UserResponse> {
    let user = state.db.get_user(user_id).await?;
    Ok(ApiResponse::ok(user.into()))
}
