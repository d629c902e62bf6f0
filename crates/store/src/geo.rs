//! Relational mirror of organizations and shops, used for geo queries.

use async_trait::async_trait;
use perk_core::discovery::{NearbyCandidate, NearbyQuery};
use perk_core::PerkResult;

/// Geography-indexed view of active shops. Eventually consistent with the
/// document store.
#[async_trait]
pub trait GeoIndex: Send + Sync {
    /// Active shops of active organizations within the query radius, ranked
    /// and paged per the query.
    async fn nearby(&self, query: &NearbyQuery) -> PerkResult<Vec<NearbyCandidate>>;

    /// Mirror an organization's active flag.
    async fn set_org_active(&self, org_id: &str, active: bool) -> PerkResult<()>;
}

const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Great-circle distance in meters.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
}
