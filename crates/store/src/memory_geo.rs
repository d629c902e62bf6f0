//! In-memory geo index using great-circle distance. Development and tests.

use crate::geo::{haversine_meters, GeoIndex};
use async_trait::async_trait;
use dashmap::DashMap;
use perk_core::discovery::{NearbyCandidate, NearbyQuery, RankBy};
use perk_core::types::Shop;
use perk_core::PerkResult;
use std::cmp::Ordering;
use std::collections::HashSet;

struct IndexedShop {
    org_id: String,
    latitude: f64,
    longitude: f64,
    active: bool,
}

#[derive(Default)]
pub struct MemoryGeoIndex {
    shops: DashMap<String, IndexedShop>,
    org_active: DashMap<String, bool>,
    likes: DashMap<String, HashSet<String>>,
}

impl MemoryGeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_shop(&self, shop: &Shop) {
        self.shops.insert(
            shop.id.clone(),
            IndexedShop {
                org_id: shop.org_id.clone(),
                latitude: shop.latitude,
                longitude: shop.longitude,
                active: shop.active,
            },
        );
    }

    pub fn index_organization(&self, org_id: &str, active: bool) {
        self.org_active.insert(org_id.to_string(), active);
    }

    pub fn like(&self, user_id: &str, org_id: &str) {
        self.likes
            .entry(org_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    pub fn is_org_active(&self, org_id: &str) -> bool {
        self.org_active.get(org_id).map(|r| *r.value()).unwrap_or(false)
    }
}

#[async_trait]
impl GeoIndex for MemoryGeoIndex {
    async fn nearby(&self, query: &NearbyQuery) -> PerkResult<Vec<NearbyCandidate>> {
        let mut candidates: Vec<NearbyCandidate> = self
            .shops
            .iter()
            .filter(|entry| entry.value().active && self.is_org_active(&entry.value().org_id))
            .filter_map(|entry| {
                let shop = entry.value();
                let distance = haversine_meters(query.latitude, query.longitude, shop.latitude, shop.longitude);
                if distance > query.radius_meters {
                    return None;
                }
                let (liked, like_count) = self
                    .likes
                    .get(&shop.org_id)
                    .map(|users| (users.contains(&query.user_id), users.len() as u64))
                    .unwrap_or((false, 0));
                Some(NearbyCandidate {
                    shop_id: entry.key().clone(),
                    org_id: shop.org_id.clone(),
                    distance_meters: distance,
                    liked,
                    like_count,
                })
            })
            .collect();

        let by_distance = |a: &NearbyCandidate, b: &NearbyCandidate| {
            a.distance_meters
                .partial_cmp(&b.distance_meters)
                .unwrap_or(Ordering::Equal)
        };
        match query.rank_by {
            RankBy::Distance => candidates.sort_by(by_distance),
            RankBy::Popularity => candidates.sort_by(|a, b| {
                b.like_count.cmp(&a.like_count).then_with(|| by_distance(a, b))
            }),
        }

        Ok(candidates
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn set_org_active(&self, org_id: &str, active: bool) -> PerkResult<()> {
        self.index_organization(org_id, active);
        Ok(())
    }
}
