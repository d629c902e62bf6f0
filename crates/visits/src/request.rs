//! Boundary validation for visit claims.

use chrono::{DateTime, Utc};
use perk_core::visit::VisitRequest;
use perk_core::{PerkError, PerkResult};

const MAX_SHOP_ID_LEN: usize = 256;

/// A visit claim that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitClaim {
    pub user_id: String,
    pub shop_id: String,
    pub claimed_at: DateTime<Utc>,
}

/// Require a caller identity, a shop id and an RFC 3339 instant.
pub fn validate(user_id: Option<&str>, request: &VisitRequest) -> PerkResult<VisitClaim> {
    let user_id = user_id
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| PerkError::InvalidRequest("an authenticated user is required".to_string()))?;

    let shop_id = request
        .shop_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PerkError::InvalidRequest("shop_id is required".to_string()))?;
    if shop_id.len() > MAX_SHOP_ID_LEN {
        return Err(PerkError::InvalidRequest(format!(
            "shop_id exceeds {MAX_SHOP_ID_LEN} characters"
        )));
    }

    let raw_timestamp = request
        .timestamp
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PerkError::InvalidRequest("timestamp is required".to_string()))?;
    let claimed_at = DateTime::parse_from_rfc3339(raw_timestamp)
        .map_err(|e| PerkError::InvalidRequest(format!("timestamp '{raw_timestamp}' is not a valid instant: {e}")))?
        .with_timezone(&Utc);

    Ok(VisitClaim {
        user_id: user_id.to_string(),
        shop_id: shop_id.to_string(),
        claimed_at,
    })
}
