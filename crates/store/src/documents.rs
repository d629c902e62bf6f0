//! Document-store seams. Point reads, writes and conditional updates by key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use perk_core::ledger::{LedgerDelta, Plan, Reward};
use perk_core::types::{Organization, Shop};
use perk_core::visit::Visit;
use perk_core::PerkResult;

#[async_trait]
pub trait OrganizationStore: Send + Sync {
    async fn get_organization(&self, org_id: &str) -> PerkResult<Option<Organization>>;

    async fn put_organization(&self, organization: &Organization) -> PerkResult<()>;

    /// Clear provider tokens and set `linked = false`, `active = false`.
    /// Returns the updated record, or `None` if it does not exist.
    async fn unlink_organization(&self, org_id: &str) -> PerkResult<Option<Organization>>;
}

#[async_trait]
pub trait ShopStore: Send + Sync {
    async fn get_shop(&self, shop_id: &str) -> PerkResult<Option<Shop>>;

    async fn put_shop(&self, shop: &Shop) -> PerkResult<()>;
}

/// Result of an append to the visit store.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// A visit with the same id or the same order already exists. Nothing was
    /// overwritten; the existing record is returned.
    Duplicate(Visit),
}

#[async_trait]
pub trait VisitStore: Send + Sync {
    /// Append-only insert. Never overwrites.
    async fn insert_visit(&self, visit: &Visit) -> PerkResult<InsertOutcome>;

    async fn get_visit(&self, visit_id: &str) -> PerkResult<Option<Visit>>;

    async fn visit_for_order(&self, order_id: &str) -> PerkResult<Option<Visit>>;
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn get_plan(&self, user_id: &str, org_id: &str) -> PerkResult<Option<Plan>>;

    /// Insert `plan` unless a plan for its (user, org) pair exists. Either
    /// way, returns the stored plan.
    async fn create_plan_if_absent(&self, plan: Plan) -> PerkResult<Plan>;

    /// Atomically add `delta` to current and lifetime counters. `Ok(None)`
    /// when no plan exists for the pair. Concurrency conflicts surface as
    /// `PerkError::StorageConflict`.
    async fn increment_plan(
        &self,
        user_id: &str,
        org_id: &str,
        delta: LedgerDelta,
    ) -> PerkResult<Option<Plan>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RedeemOutcome {
    Redeemed(Reward),
    AlreadyRedeemed,
    Missing,
}

#[async_trait]
pub trait RewardStore: Send + Sync {
    async fn put_reward(&self, reward: &Reward) -> PerkResult<()>;

    async fn rewards_for_plan(&self, plan_id: &str) -> PerkResult<Vec<Reward>>;

    /// Conditional flip from active to redeemed.
    async fn redeem_reward(
        &self,
        plan_id: &str,
        reward_row_id: &str,
        at: DateTime<Utc>,
    ) -> PerkResult<RedeemOutcome>;
}
