//! Organization lifecycle endpoints.

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::rest::{AppState, ErrorResponse, MessageResponse};
use axum::extract::{Path, State};
use axum::Json;

/// POST /v1/organizations/{org_id}/unlink: Disconnect the point-of-sale provider.
#[utoipa::path(
    post,
    path = "/v1/organizations/{org_id}/unlink",
    tag = "Organizations",
    params(("org_id" = String, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Provider unlinked", body = MessageResponse),
        (status = 404, description = "Unknown organization", body = ErrorResponse),
        (status = 412, description = "Caller is not the owner", body = ErrorResponse),
    )
)]
pub async fn unlink_organization(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(org_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let organization = state.organizations.unlink(&org_id, &user_id).await?;
    Ok(Json(MessageResponse {
        message: format!("Organization {} unlinked", organization.id),
    }))
}
