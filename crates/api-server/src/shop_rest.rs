//! Shop discovery endpoint.

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::rest::{AppState, ErrorResponse};
use axum::extract::{Query, State};
use axum::Json;
use perk_core::discovery::{NearbyPage, NearbyParams};

/// GET /v1/shops/nearby: Active shops near a point, nearest or most liked first.
#[utoipa::path(
    get,
    path = "/v1/shops/nearby",
    tag = "Shops",
    params(NearbyParams),
    responses(
        (status = 200, description = "One page of nearby shops", body = NearbyPage),
        (status = 400, description = "Invalid coordinates or radius", body = ErrorResponse),
    )
)]
pub async fn nearby_shops(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Query(params): Query<NearbyParams>,
) -> Result<Json<NearbyPage>, ApiError> {
    Ok(Json(state.discovery.find_nearby(&user_id, &params).await?))
}
