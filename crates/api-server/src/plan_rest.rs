//! Plan and reward endpoints for the calling user.

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::rest::{AppState, ErrorResponse};
use axum::extract::{Path, State};
use axum::Json;
use perk_core::ledger::{Plan, Reward};
use perk_core::PerkError;

/// GET /v1/plans/{org_id}: The caller's plan with an organization.
#[utoipa::path(
    get,
    path = "/v1/plans/{org_id}",
    tag = "Plans",
    params(("org_id" = String, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Current plan", body = Plan),
        (status = 404, description = "No plan yet", body = ErrorResponse),
    )
)]
pub async fn get_plan(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(org_id): Path<String>,
) -> Result<Json<Plan>, ApiError> {
    let plan = state
        .ledger
        .get(&user_id, &org_id)
        .await?
        .ok_or_else(|| PerkError::NotFound(format!("plan for organization {org_id}")))?;
    Ok(Json(plan))
}

/// GET /v1/plans/{org_id}/rewards: Rewards issued against the caller's plan.
#[utoipa::path(
    get,
    path = "/v1/plans/{org_id}/rewards",
    tag = "Plans",
    params(("org_id" = String, Path, description = "Organization id")),
    responses((status = 200, description = "Issued rewards, oldest first", body = [Reward]))
)]
pub async fn list_rewards(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(org_id): Path<String>,
) -> Result<Json<Vec<Reward>>, ApiError> {
    Ok(Json(state.ledger.rewards(&user_id, &org_id).await?))
}

/// POST /v1/plans/{org_id}/rewards/{reward_id}/redeem: Redeem one reward.
#[utoipa::path(
    post,
    path = "/v1/plans/{org_id}/rewards/{reward_id}/redeem",
    tag = "Plans",
    params(
        ("org_id" = String, Path, description = "Organization id"),
        ("reward_id" = String, Path, description = "Reward row id"),
    ),
    responses(
        (status = 200, description = "Reward redeemed", body = Reward),
        (status = 404, description = "Unknown plan or reward", body = ErrorResponse),
        (status = 412, description = "Already redeemed", body = ErrorResponse),
    )
)]
pub async fn redeem_reward(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path((org_id, reward_id)): Path<(String, String)>,
) -> Result<Json<Reward>, ApiError> {
    Ok(Json(state.ledger.redeem(&user_id, &org_id, &reward_id).await?))
}
