//! Nearby-shop discovery: one geo query, then per-result enrichment from the
//! document store with bounded concurrency.

use futures::stream::{self, StreamExt};
use perk_core::config::DiscoveryConfig;
use perk_core::discovery::{
    NearbyCandidate, NearbyPage, NearbyParams, NearbyQuery, NearbyShop, OrgProjection, ShopProjection,
};
use perk_core::{PerkError, PerkResult};
use perk_store::{GeoIndex, OrganizationStore, ShopStore};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ShopDiscovery {
    geo: Arc<dyn GeoIndex>,
    shops: Arc<dyn ShopStore>,
    organizations: Arc<dyn OrganizationStore>,
    config: DiscoveryConfig,
}

impl ShopDiscovery {
    pub fn new(
        geo: Arc<dyn GeoIndex>,
        shops: Arc<dyn ShopStore>,
        organizations: Arc<dyn OrganizationStore>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            geo,
            shops,
            organizations,
            config: config.clone(),
        }
    }

    /// Validate raw parameters, filling defaults and clamping the page size.
    pub fn query(&self, user_id: &str, params: &NearbyParams) -> PerkResult<NearbyQuery> {
        let latitude = params
            .lat
            .ok_or_else(|| PerkError::InvalidRequest("lat is required".to_string()))?;
        let longitude = params
            .lon
            .ok_or_else(|| PerkError::InvalidRequest("lon is required".to_string()))?;
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(PerkError::InvalidRequest(format!("lat {latitude} is out of range")));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(PerkError::InvalidRequest(format!("lon {longitude} is out of range")));
        }

        let radius_meters = params.radius.unwrap_or(self.config.default_radius_meters);
        if !radius_meters.is_finite() || radius_meters <= 0.0 {
            return Err(PerkError::InvalidRequest("radius must be a positive number of meters".to_string()));
        }

        let limit = params
            .limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit.max(1));

        Ok(NearbyQuery {
            latitude,
            longitude,
            radius_meters,
            page: params.page.unwrap_or(0),
            limit,
            rank_by: params.rank.unwrap_or_default(),
            user_id: user_id.to_string(),
        })
    }

    /// Ranked page of active shops near the caller. Results whose enrichment
    /// fails are dropped; the rest keep their rank order.
    pub async fn find_nearby(&self, user_id: &str, params: &NearbyParams) -> PerkResult<NearbyPage> {
        let query = self.query(user_id, params)?;
        let candidates = self.geo.nearby(&query).await?;
        let has_more = candidates.len() == query.limit as usize;
        let fetched = candidates.len();

        let results: Vec<NearbyShop> = stream::iter(candidates)
            .map(|candidate| self.enrich(candidate))
            .buffered(self.config.enrichment_concurrency.max(1))
            .filter_map(|enriched| async move { enriched })
            .collect()
            .await;

        debug!(
            user_id = %user_id,
            page = query.page,
            rank_by = ?query.rank_by,
            candidates = fetched,
            returned = results.len(),
            "Nearby shops resolved"
        );

        Ok(NearbyPage {
            results,
            page: query.page,
            has_more,
        })
    }

    async fn enrich(&self, candidate: NearbyCandidate) -> Option<NearbyShop> {
        let (shop, organization) = futures::join!(
            self.shops.get_shop(&candidate.shop_id),
            self.organizations.get_organization(&candidate.org_id)
        );

        let (shop, organization) = match (shop, organization) {
            (Ok(Some(shop)), Ok(Some(organization))) => (shop, organization),
            (Err(err), _) | (_, Err(err)) => {
                metrics::counter!("discovery.enrichment_dropped", "reason" => "error").increment(1);
                warn!(shop_id = %candidate.shop_id, org_id = %candidate.org_id, error = %err, "Dropping nearby result");
                return None;
            }
            _ => {
                metrics::counter!("discovery.enrichment_dropped", "reason" => "missing").increment(1);
                debug!(shop_id = %candidate.shop_id, org_id = %candidate.org_id, "Nearby result has no document");
                return None;
            }
        };

        // The geo mirror lags the document store.
        if !shop.active || !organization.active {
            metrics::counter!("discovery.enrichment_dropped", "reason" => "inactive").increment(1);
            return None;
        }

        Some(NearbyShop {
            shop: ShopProjection {
                id: shop.id,
                name: shop.name,
                latitude: shop.latitude,
                longitude: shop.longitude,
                shop_hours: shop.shop_hours,
            },
            organization: OrgProjection {
                id: organization.id,
                name: organization.name,
                images: organization.images,
            },
            distance_meters: candidate.distance_meters,
            liked: candidate.liked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use perk_core::discovery::RankBy;
    use perk_core::types::{Organization, Shop};
    use perk_store::{MemoryGeoIndex, MemoryStore};

    /// Shop store that fails reads for one shop id.
    struct FlakyShops {
        inner: Arc<MemoryStore>,
        failing: String,
    }

    #[async_trait]
    impl ShopStore for FlakyShops {
        async fn get_shop(&self, shop_id: &str) -> PerkResult<Option<Shop>> {
            if shop_id == self.failing {
                return Err(PerkError::Storage("read timed out".into()));
            }
            self.inner.get_shop(shop_id).await
        }

        async fn put_shop(&self, shop: &Shop) -> PerkResult<()> {
            self.inner.put_shop(shop).await
        }
    }

    fn shop(id: &str, org_id: &str, latitude: f64) -> Shop {
        Shop {
            id: id.into(),
            org_id: org_id.into(),
            name: format!("{id} shop"),
            latitude,
            longitude: -73.0,
            shop_hours: None,
            square_location_id: None,
            active: true,
        }
    }

    async fn seeded() -> (Arc<MemoryStore>, Arc<MemoryGeoIndex>) {
        let store = Arc::new(MemoryStore::new());
        let geo = Arc::new(MemoryGeoIndex::new());
        for (org_id, name) in [("o1", "Cafe One"), ("o2", "Cafe Two")] {
            let mut org = Organization::onboard(org_id, "owner", name);
            org.active = true;
            org.images = vec![format!("{org_id}.png")];
            store.put_organization(&org).await.unwrap();
            geo.index_organization(org_id, true);
        }
        for s in [shop("s1", "o1", 40.001), shop("s2", "o2", 40.01), shop("s3", "o1", 40.02)] {
            store.put_shop(&s).await.unwrap();
            geo.index_shop(&s);
        }
        (store, geo)
    }

    fn config() -> DiscoveryConfig {
        DiscoveryConfig {
            max_limit: 2,
            ..DiscoveryConfig::default()
        }
    }

    fn params() -> NearbyParams {
        NearbyParams {
            lat: Some(40.0),
            lon: Some(-73.0),
            ..NearbyParams::default()
        }
    }

    #[tokio::test]
    async fn test_nearest_first_with_projections() {
        let (store, geo) = seeded().await;
        let discovery = ShopDiscovery::new(geo, store.clone(), store, &DiscoveryConfig::default());

        let page = discovery.find_nearby("u1", &params()).await.unwrap();
        let ids: Vec<&str> = page.results.iter().map(|r| r.shop.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
        assert_eq!(page.results[0].organization.name, "Cafe One");
        assert_eq!(page.results[0].organization.images, vec!["o1.png".to_string()]);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_limit_clamped_and_has_more() {
        let (store, geo) = seeded().await;
        let discovery = ShopDiscovery::new(geo, store.clone(), store, &config());

        let mut p = params();
        p.limit = Some(100);
        let page = discovery.find_nearby("u1", &p).await.unwrap();
        assert_eq!(page.results.len(), 2);
        assert!(page.has_more);

        p.page = Some(1);
        let next = discovery.find_nearby("u1", &p).await.unwrap();
        assert_eq!(next.results.len(), 1);
        assert_eq!(next.results[0].shop.id, "s3");
        assert!(!next.has_more);
    }

    #[tokio::test]
    async fn test_failed_enrichment_dropped_not_fatal() {
        let (store, geo) = seeded().await;
        let shops = Arc::new(FlakyShops {
            inner: store.clone(),
            failing: "s2".into(),
        });
        let discovery = ShopDiscovery::new(geo, shops, store, &DiscoveryConfig::default());

        let page = discovery.find_nearby("u1", &params()).await.unwrap();
        let ids: Vec<&str> = page.results.iter().map(|r| r.shop.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s3"]);
    }

    #[tokio::test]
    async fn test_stale_mirror_inactive_org_dropped() {
        let (store, geo) = seeded().await;
        let mut org = store.get_organization("o2").await.unwrap().unwrap();
        org.active = false;
        store.put_organization(&org).await.unwrap();
        let discovery = ShopDiscovery::new(geo, store.clone(), store, &DiscoveryConfig::default());

        let page = discovery.find_nearby("u1", &params()).await.unwrap();
        assert!(page.results.iter().all(|r| r.organization.id == "o1"));
        assert_eq!(page.results.len(), 2);
    }

    #[tokio::test]
    async fn test_popularity_ranking() {
        let (store, geo) = seeded().await;
        geo.like("u1", "o2");
        let discovery = ShopDiscovery::new(geo, store.clone(), store, &DiscoveryConfig::default());

        let mut p = params();
        p.rank = Some(RankBy::Popularity);
        let page = discovery.find_nearby("u1", &p).await.unwrap();
        assert_eq!(page.results[0].shop.id, "s2");
        assert!(page.results[0].liked);
    }

    #[test]
    fn test_query_validation() {
        let store = Arc::new(MemoryStore::new());
        let discovery = ShopDiscovery::new(Arc::new(MemoryGeoIndex::new()), store.clone(), store, &config());

        let q = discovery.query("u1", &params()).unwrap();
        assert_eq!(q.radius_meters, 5000.0);
        assert_eq!(q.limit, 2);
        assert_eq!(q.rank_by, RankBy::Distance);

        for bad in [
            NearbyParams { lat: None, ..params() },
            NearbyParams { lat: Some(91.0), ..params() },
            NearbyParams { lon: Some(-181.0), ..params() },
            NearbyParams { radius: Some(0.0), ..params() },
            NearbyParams { lat: Some(f64::NAN), ..params() },
        ] {
            assert!(matches!(discovery.query("u1", &bad), Err(PerkError::InvalidRequest(_))));
        }
    }
}
