//! In-memory document store backed by DashMap.
//!
//! Same API surface as the DynamoDB backend, for development and testing.

use crate::documents::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use perk_core::ledger::{LedgerDelta, Plan, Reward};
use perk_core::types::{Organization, Shop};
use perk_core::visit::Visit;
use perk_core::{PerkError, PerkResult};
use tracing::info;

/// Thread-safe in-memory store for organizations, shops, visits, plans and rewards.
pub struct MemoryStore {
    organizations: DashMap<String, Organization>,
    shops: DashMap<String, Shop>,
    visits: DashMap<String, Visit>,
    visits_by_order: DashMap<String, String>,
    plans: DashMap<(String, String), Plan>,
    rewards: DashMap<String, Reward>,
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("Document store initialized (in-memory, development mode)");
        Self {
            organizations: DashMap::new(),
            shops: DashMap::new(),
            visits: DashMap::new(),
            visits_by_order: DashMap::new(),
            plans: DashMap::new(),
            rewards: DashMap::new(),
        }
    }

    pub fn visit_count(&self) -> usize {
        self.visits.len()
    }

    pub fn plan_count(&self) -> usize {
        self.plans.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn plan_key(user_id: &str, org_id: &str) -> (String, String) {
    (user_id.to_string(), org_id.to_string())
}

// ─── Organizations & Shops ─────────────────────────────────────────────────

#[async_trait]
impl OrganizationStore for MemoryStore {
    async fn get_organization(&self, org_id: &str) -> PerkResult<Option<Organization>> {
        Ok(self.organizations.get(org_id).map(|r| r.value().clone()))
    }

    async fn put_organization(&self, organization: &Organization) -> PerkResult<()> {
        self.organizations
            .insert(organization.id.clone(), organization.clone());
        Ok(())
    }

    async fn unlink_organization(&self, org_id: &str) -> PerkResult<Option<Organization>> {
        Ok(self.organizations.get_mut(org_id).map(|mut entry| {
            entry.value_mut().unlink();
            entry.value().clone()
        }))
    }
}

#[async_trait]
impl ShopStore for MemoryStore {
    async fn get_shop(&self, shop_id: &str) -> PerkResult<Option<Shop>> {
        Ok(self.shops.get(shop_id).map(|r| r.value().clone()))
    }

    async fn put_shop(&self, shop: &Shop) -> PerkResult<()> {
        self.shops.insert(shop.id.clone(), shop.clone());
        Ok(())
    }
}

// ─── Visits ────────────────────────────────────────────────────────────────

#[async_trait]
impl VisitStore for MemoryStore {
    async fn insert_visit(&self, visit: &Visit) -> PerkResult<InsertOutcome> {
        if let Some(existing) = self.visits.get(&visit.id) {
            return Ok(InsertOutcome::Duplicate(existing.value().clone()));
        }

        // The order slot stays locked until the visit itself is stored, so a
        // racing insert for the same order always finds the winner.
        match self.visits_by_order.entry(visit.order_id.clone()) {
            Entry::Occupied(slot) => {
                let existing = self
                    .visits
                    .get(slot.get())
                    .map(|r| r.value().clone())
                    .ok_or_else(|| {
                        PerkError::Storage(format!(
                            "order {} indexed to missing visit {}",
                            visit.order_id,
                            slot.get()
                        ))
                    })?;
                Ok(InsertOutcome::Duplicate(existing))
            }
            Entry::Vacant(slot) => {
                match self.visits.entry(visit.id.clone()) {
                    Entry::Occupied(existing) => {
                        return Ok(InsertOutcome::Duplicate(existing.get().clone()))
                    }
                    Entry::Vacant(v) => {
                        v.insert(visit.clone());
                    }
                }
                slot.insert(visit.id.clone());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn get_visit(&self, visit_id: &str) -> PerkResult<Option<Visit>> {
        Ok(self.visits.get(visit_id).map(|r| r.value().clone()))
    }

    async fn visit_for_order(&self, order_id: &str) -> PerkResult<Option<Visit>> {
        let Some(visit_id) = self.visits_by_order.get(order_id).map(|r| r.value().clone()) else {
            return Ok(None);
        };
        Ok(self.visits.get(&visit_id).map(|r| r.value().clone()))
    }
}

// ─── Plans & Rewards ───────────────────────────────────────────────────────

#[async_trait]
impl PlanStore for MemoryStore {
    async fn get_plan(&self, user_id: &str, org_id: &str) -> PerkResult<Option<Plan>> {
        Ok(self
            .plans
            .get(&plan_key(user_id, org_id))
            .map(|r| r.value().clone()))
    }

    async fn create_plan_if_absent(&self, plan: Plan) -> PerkResult<Plan> {
        let key = plan_key(&plan.user_id, &plan.org_id);
        Ok(self.plans.entry(key).or_insert(plan).value().clone())
    }

    async fn increment_plan(
        &self,
        user_id: &str,
        org_id: &str,
        delta: LedgerDelta,
    ) -> PerkResult<Option<Plan>> {
        Ok(self
            .plans
            .get_mut(&plan_key(user_id, org_id))
            .map(|mut entry| {
                entry.value_mut().apply(delta);
                entry.value().clone()
            }))
    }
}

#[async_trait]
impl RewardStore for MemoryStore {
    async fn put_reward(&self, reward: &Reward) -> PerkResult<()> {
        self.rewards.insert(reward.id.clone(), reward.clone());
        Ok(())
    }

    async fn rewards_for_plan(&self, plan_id: &str) -> PerkResult<Vec<Reward>> {
        let mut rewards: Vec<Reward> = self
            .rewards
            .iter()
            .filter(|r| r.value().plan_id == plan_id)
            .map(|r| r.value().clone())
            .collect();
        rewards.sort_by(|a, b| a.issued_at.cmp(&b.issued_at));
        Ok(rewards)
    }

    async fn redeem_reward(
        &self,
        plan_id: &str,
        reward_row_id: &str,
        at: DateTime<Utc>,
    ) -> PerkResult<RedeemOutcome> {
        let Some(mut entry) = self.rewards.get_mut(reward_row_id) else {
            return Ok(RedeemOutcome::Missing);
        };
        let reward = entry.value_mut();
        if reward.plan_id != plan_id {
            return Ok(RedeemOutcome::Missing);
        }
        if !reward.active {
            return Ok(RedeemOutcome::AlreadyRedeemed);
        }
        reward.active = false;
        reward.redeemed_at = Some(at);
        Ok(RedeemOutcome::Redeemed(reward.clone()))
    }
}
