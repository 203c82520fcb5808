//! services/api/src/web/extract.rs
//!
//! Request extractors: the authenticated user, path ids and schema-checked JSON bodies.

use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::http::request::Parts;
use axum::Json;
use autorfp_core::domain::Role;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::future;
use uuid::Uuid;

use crate::error::ApiError;

/// Field-level checks run on every request body before it reaches a use case.
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// Rejects blank strings and strings over `max_chars`.
pub fn check_text(field: &str, value: &str, max_chars: usize) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} must not be empty", field));
    }
    if value.chars().count() > max_chars {
        return Err(format!("{} must be at most {} characters", field, max_chars));
    }
    Ok(())
}

/// Like [`check_text`] for optional fields; `None` passes.
pub fn check_optional_text(field: &str, value: Option<&str>, max_chars: usize) -> Result<(), String> {
    match value {
        Some(value) => check_text(field, value, max_chars),
        None => Ok(()),
    }
}

/// Deserializes a nullable PATCH field: absent is `None`, `null` is `Some(None)`.
/// Pair with `#[serde(default)]`.
pub fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Parses a role name from a request body.
pub fn parse_role(role: &str) -> Result<Role, ApiError> {
    role.parse::<Role>().map_err(ApiError::Validation)
}

/// A JSON body that deserialized and passed [`Validate`].
#[derive(Debug)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
        value.validate().map_err(ApiError::Validation)?;
        Ok(Self(value))
    }
}

/// Path parameters whose rejection is rendered in the error envelope.
#[derive(Debug)]
pub struct ValidPath<T>(pub T);

impl<T, S> FromRequestParts<S> for ValidPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// The user id that `require_auth` resolved from the session cookie.
#[derive(Debug, Copy, Clone)]
pub struct CurrentUser(pub Uuid);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let res = parts
            .extensions
            .get::<Uuid>()
            .copied()
            .map(CurrentUser)
            .ok_or(ApiError::Unauthorized);
        future::ready(res)
    }
}
