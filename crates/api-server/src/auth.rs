//! Caller identity. The gateway verifies the identity token and forwards the
//! user id in a trusted header.

use crate::error::ApiError;
use crate::rest::AppState;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

/// Verified caller id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(state.identity_header.as_ref())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| AuthenticatedUser(v.to_string()))
            .ok_or(ApiError::Unauthenticated)
    }
}
