//! The one place domain errors become HTTP responses.

use crate::rest::ErrorResponse;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use perk_core::PerkError;
use tracing::error;

const GENERIC_FAILURE: &str = "Internal error, please retry later";
const UPSTREAM_FAILURE: &str = "Point-of-sale provider is unavailable, please retry later";

#[derive(Debug)]
pub enum ApiError {
    /// No caller identity on the request.
    Unauthenticated,
    Domain(PerkError),
}

impl From<PerkError> for ApiError {
    fn from(err: PerkError) -> Self {
        ApiError::Domain(err)
    }
}

impl ApiError {
    /// Status and client-facing text. Server-side failures never echo the
    /// inner error.
    fn parts(&self) -> (StatusCode, String) {
        let err = match self {
            ApiError::Unauthenticated => {
                return (StatusCode::UNAUTHORIZED, "Authentication required".to_string())
            }
            ApiError::Domain(err) => err,
        };
        match err {
            PerkError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            PerkError::NotFound(what) => (StatusCode::NOT_FOUND, format!("Not found: {what}")),
            PerkError::PreconditionFailed(msg) => (StatusCode::PRECONDITION_FAILED, msg.clone()),
            PerkError::UpstreamProvider(_) => (StatusCode::BAD_GATEWAY, UPSTREAM_FAILURE.to_string()),
            PerkError::Storage(_)
            | PerkError::StorageConflict(_)
            | PerkError::Config(_)
            | PerkError::LedgerReconciliation { .. }
            | PerkError::Serialization(_)
            | PerkError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.parts();
        if let ApiError::Domain(err) = &self {
            metrics::counter!("api.errors", "kind" => err.kind()).increment(1);
            if status.is_server_error() {
                error!(kind = err.kind(), error = %err, "Request failed");
            }
        }
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
