//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use autorfp_core::ports::PortError;
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use crate::web::auth::session_id_from_headers;
use crate::web::state::AppState;

/// Middleware that validates the auth session cookie and extracts the user_id.
///
/// If valid, inserts the user_id into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized. Store failures pass through as 500.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_session_id =
        session_id_from_headers(req.headers()).ok_or(ApiError::Unauthorized)?;

    let user_id = state
        .db
        .validate_auth_session(&auth_session_id)
        .await
        .map_err(session_error)?;

    req.extensions_mut().insert(user_id);
    Ok(next.run(req).await)
}

/// Unknown or expired sessions are 401; anything else is a store failure.
fn session_error(error: PortError) -> ApiError {
    match error {
        PortError::Unauthorized | PortError::NotFound(_) => {
            debug!("Rejected auth session: {:?}", error);
            ApiError::Unauthorized
        }
        other => ApiError::Port(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_sessions_are_unauthorized() {
        assert!(matches!(session_error(PortError::Unauthorized), ApiError::Unauthorized));
        assert!(matches!(
            session_error(PortError::NotFound("session".to_string())),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            session_error(PortError::Unexpected("connection refused".to_string())),
            ApiError::Port(PortError::Unexpected(_))
        ));
    }
}
