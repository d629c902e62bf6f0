//! Visit recording endpoint.

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::rest::{AppState, ErrorResponse};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use perk_core::visit::VisitRequest;
use perk_visits::VisitOutcome;
use serde::Serialize;
use utoipa::ToSchema;

pub const NO_RECENT_ORDER: &str = "No recent order found within the specified time frame";

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VisitResponse {
    pub message: String,
    pub visit_id: String,
}

/// POST /v1/visits: Record a visit proven by a recent point-of-sale order.
#[utoipa::path(
    post,
    path = "/v1/visits",
    tag = "Visits",
    params(VisitRequest),
    request_body(content = VisitRequest, description = "Claim fields, as an alternative to the query string", content_type = "application/json"),
    responses(
        (status = 200, description = "Visit recorded", body = VisitResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "No caller identity", body = ErrorResponse),
        (status = 404, description = "Unknown shop or no qualifying order", body = ErrorResponse),
        (status = 412, description = "Organization not linked", body = ErrorResponse),
        (status = 502, description = "Point-of-sale provider failure", body = ErrorResponse),
    )
)]
pub async fn record_visit(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Query(query): Query<VisitRequest>,
    body: Option<Json<VisitRequest>>,
) -> Result<Response, ApiError> {
    let request = match body {
        Some(Json(body)) => query.or(body),
        None => query,
    };
    let outcome = state.pipeline.record_visit(Some(&user_id), &request).await?;

    Ok(match outcome {
        VisitOutcome::Recorded { visit_id, .. } => Json(VisitResponse {
            message: "Visit recorded".to_string(),
            visit_id,
        })
        .into_response(),
        VisitOutcome::AlreadyRecorded { visit_id } => Json(VisitResponse {
            message: "Visit already recorded".to_string(),
            visit_id,
        })
        .into_response(),
        VisitOutcome::NoQualifyingOrder => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: NO_RECENT_ORDER.to_string(),
            }),
        )
            .into_response(),
    })
}
