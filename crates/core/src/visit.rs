//! Visits and the point-of-sale orders that prove them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::types::{Organization, ProgramFlags, Shop};

/// Raw visit claim as received at the boundary, from the query string or a
/// JSON body. Validated by the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct VisitRequest {
    pub shop_id: Option<String>,
    /// RFC 3339 instant the user claims to have been in the shop. In a query
    /// string a `+` offset must be percent-encoded (`%2B02:00`).
    pub timestamp: Option<String>,
}

impl VisitRequest {
    /// Fill fields missing here from `other`.
    pub fn or(self, other: VisitRequest) -> VisitRequest {
        VisitRequest {
            shop_id: self.shop_id.or(other.shop_id),
            timestamp: self.timestamp.or(other.timestamp),
        }
    }
}

/// Immutable record of a confirmed visit.
///
/// The `*_at_visit` flags are a snapshot of the organization's programs when
/// the visit was recorded, so later toggles do not rewrite history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Visit {
    pub id: String,
    pub user_id: String,
    pub shop_id: String,
    pub org_id: String,
    pub order_id: String,
    pub visit_timestamp: DateTime<Utc>,
    /// Minor currency units.
    pub total: Option<i64>,
    pub loyalty_active_at_visit: bool,
    pub milestone_active_at_visit: bool,
}

impl Visit {
    pub fn record(
        user_id: &str,
        shop: &Shop,
        organization: &Organization,
        order: &Order,
        visit_timestamp: DateTime<Utc>,
    ) -> Self {
        let flags = organization.program_flags();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            shop_id: shop.id.clone(),
            org_id: organization.id.clone(),
            order_id: order.id.clone(),
            visit_timestamp,
            total: order.total_minor_units,
            loyalty_active_at_visit: flags.loyalty_active,
            milestone_active_at_visit: flags.milestone_active,
        }
    }

    pub fn snapshot_flags(&self) -> ProgramFlags {
        ProgramFlags {
            loyalty_active: self.loyalty_active_at_visit,
            milestone_active: self.milestone_active_at_visit,
        }
    }
}

/// A point-of-sale transaction as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: String,
    pub location_id: String,
    pub created_at: DateTime<Utc>,
    pub total_minor_units: Option<i64>,
    #[serde(default)]
    pub refunds: Vec<OrderRefund>,
}

impl Order {
    /// Any refund voids the order for visit purposes.
    pub fn is_refunded(&self) -> bool {
        !self.refunds.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderRefund {
    pub id: String,
    #[serde(default)]
    pub amount_minor_units: Option<i64>,
}
