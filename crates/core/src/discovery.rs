//! Shop discovery: geo-query candidates and their enriched projections.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Result ordering for nearby-shop queries.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    /// Nearest first.
    #[default]
    Distance,
    /// Most liked first, ties broken by distance.
    Popularity,
}

/// Raw nearby-shop query parameters as received at the boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NearbyParams {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Meters.
    pub radius: Option<f64>,
    /// Zero-based.
    pub page: Option<u32>,
    pub limit: Option<u32>,
    #[param(inline)]
    pub rank: Option<RankBy>,
}

/// Validated nearby-shop query.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: f64,
    /// Zero-based.
    pub page: u32,
    pub limit: u32,
    pub rank_by: RankBy,
    pub user_id: String,
}

impl NearbyQuery {
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.limit)
    }
}

/// One row from the relational geo index.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyCandidate {
    pub shop_id: String,
    pub org_id: String,
    pub distance_meters: f64,
    pub liked: bool,
    pub like_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShopProjection {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[schema(value_type = Option<Object>)]
    pub shop_hours: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrgProjection {
    pub id: String,
    pub name: String,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NearbyShop {
    pub shop: ShopProjection,
    pub organization: OrgProjection,
    pub distance_meters: f64,
    pub liked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NearbyPage {
    pub results: Vec<NearbyShop>,
    pub page: u32,
    /// Signalled by a full page of candidates, not by an exact count.
    pub has_more: bool,
}
