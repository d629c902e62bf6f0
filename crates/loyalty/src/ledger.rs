//! Reward ledger: one plan per (user, organization), incremented atomically
//! by the store, plus the rewards issued against it.

use crate::rules::{unlocked_rewards, Unlocked};
use chrono::Utc;
use perk_core::ledger::{LedgerDelta, Plan, Reward};
use perk_core::types::Organization;
use perk_core::{PerkError, PerkResult};
use perk_store::{PlanStore, RedeemOutcome, RewardStore};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Plan after an accrual, and the rewards the accrual unlocked.
#[derive(Debug, Clone, PartialEq)]
pub struct Accrual {
    pub plan: Plan,
    pub issued: Vec<Reward>,
}

pub struct RewardLedger {
    plans: Arc<dyn PlanStore>,
    rewards: Arc<dyn RewardStore>,
    max_attempts: u32,
}

impl RewardLedger {
    pub fn new(plans: Arc<dyn PlanStore>, rewards: Arc<dyn RewardStore>, max_attempts: u32) -> Self {
        Self {
            plans,
            rewards,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn get(&self, user_id: &str, org_id: &str) -> PerkResult<Option<Plan>> {
        self.plans.get_plan(user_id, org_id).await
    }

    /// Idempotent. Concurrent callers all observe the single stored plan.
    pub async fn create_if_absent(&self, user_id: &str, org_id: &str) -> PerkResult<Plan> {
        self.plans.create_plan_if_absent(Plan::new(user_id, org_id)).await
    }

    /// Add `delta` to the plan for (user, organization), creating the plan on
    /// first accrual, then issue any rewards the new totals unlock.
    ///
    /// Only `StorageConflict` is retried, up to the configured attempt bound.
    pub async fn apply_delta(
        &self,
        user_id: &str,
        organization: &Organization,
        delta: LedgerDelta,
    ) -> PerkResult<Accrual> {
        let org_id = organization.id.as_str();
        let mut conflicts = 0u32;
        let mut created = false;

        let plan = loop {
            match self.plans.increment_plan(user_id, org_id, delta).await {
                Ok(Some(plan)) => break plan,
                Ok(None) if !created => {
                    let plan = self.create_if_absent(user_id, org_id).await?;
                    debug!(user_id = %user_id, org_id = %org_id, plan_id = %plan.plan_id, "Plan opened on first accrual");
                    created = true;
                }
                Ok(None) => {
                    return Err(PerkError::Storage(format!(
                        "plan for user {user_id} org {org_id} missing after create"
                    )));
                }
                Err(PerkError::StorageConflict(reason)) => {
                    conflicts += 1;
                    if conflicts >= self.max_attempts {
                        return Err(PerkError::StorageConflict(format!(
                            "gave up after {conflicts} attempts: {reason}"
                        )));
                    }
                    metrics::counter!("ledger.conflict_retries").increment(1);
                    warn!(user_id = %user_id, org_id = %org_id, attempt = conflicts, reason = %reason, "Ledger increment conflicted, retrying");
                }
                Err(err) => return Err(err),
            }
        };

        let before = previous_totals(&plan, delta);
        let issued = self
            .issue(&plan, unlocked_rewards(organization, &before, &plan))
            .await;

        debug!(
            user_id = %user_id,
            org_id = %org_id,
            visits = plan.visits,
            points = plan.points,
            issued = issued.len(),
            "Ledger updated"
        );
        Ok(Accrual { plan, issued })
    }

    // Counters are already committed, so a failed issue is logged rather than
    // surfaced.
    async fn issue(&self, plan: &Plan, unlocked: Vec<Unlocked>) -> Vec<Reward> {
        let mut issued = Vec::with_capacity(unlocked.len());
        for Unlocked { reward_id, category } in unlocked {
            let reward = Reward::issue(&plan.plan_id, &reward_id, category);
            match self.rewards.put_reward(&reward).await {
                Ok(()) => {
                    metrics::counter!("ledger.rewards_issued", "category" => category.as_str()).increment(1);
                    info!(plan_id = %plan.plan_id, reward_id = %reward_id, category = category.as_str(), "Reward issued");
                    issued.push(reward);
                }
                Err(err) => {
                    metrics::counter!("ledger.reward_issue_failed").increment(1);
                    error!(plan_id = %plan.plan_id, reward_id = %reward_id, error = %err, "Failed to issue reward");
                }
            }
        }
        issued
    }

    /// Rewards issued against the caller's plan. Empty when no plan exists.
    pub async fn rewards(&self, user_id: &str, org_id: &str) -> PerkResult<Vec<Reward>> {
        match self.get(user_id, org_id).await? {
            Some(plan) => self.rewards.rewards_for_plan(&plan.plan_id).await,
            None => Ok(Vec::new()),
        }
    }

    /// Flip one reward from active to redeemed. Plan counters are untouched.
    pub async fn redeem(&self, user_id: &str, org_id: &str, reward_row_id: &str) -> PerkResult<Reward> {
        let plan = self
            .get(user_id, org_id)
            .await?
            .ok_or_else(|| PerkError::NotFound(format!("no plan for organization {org_id}")))?;

        match self
            .rewards
            .redeem_reward(&plan.plan_id, reward_row_id, Utc::now())
            .await?
        {
            RedeemOutcome::Redeemed(reward) => {
                metrics::counter!("ledger.rewards_redeemed", "category" => reward.category.as_str()).increment(1);
                info!(plan_id = %plan.plan_id, reward = %reward_row_id, "Reward redeemed");
                Ok(reward)
            }
            RedeemOutcome::AlreadyRedeemed => Err(PerkError::PreconditionFailed(format!(
                "reward {reward_row_id} was already redeemed"
            ))),
            RedeemOutcome::Missing => Err(PerkError::NotFound(format!("reward {reward_row_id}"))),
        }
    }
}

/// Lifetime totals just before an atomic increment of `delta` produced `after`.
fn previous_totals(after: &Plan, delta: LedgerDelta) -> Plan {
    let mut before = after.clone();
    before.visits_total = after.visits_total.saturating_sub(delta.visits);
    before.points_total = after.points_total.saturating_sub(delta.points);
    before.visits = after.visits.saturating_sub(delta.visits);
    before.points = after.points.saturating_sub(delta.points);
    before
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use perk_core::ledger::RewardCategory;
    use perk_core::types::{LoyaltyProgram, LoyaltyTier};
    use perk_store::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Reports a conflict for the first `conflicts` increments.
    struct ContendedPlans {
        inner: Arc<MemoryStore>,
        conflicts: AtomicU32,
        increments: AtomicU32,
    }

    #[async_trait]
    impl PlanStore for ContendedPlans {
        async fn get_plan(&self, user_id: &str, org_id: &str) -> PerkResult<Option<Plan>> {
            self.inner.get_plan(user_id, org_id).await
        }

        async fn create_plan_if_absent(&self, plan: Plan) -> PerkResult<Plan> {
            self.inner.create_plan_if_absent(plan).await
        }

        async fn increment_plan(&self, user_id: &str, org_id: &str, delta: LedgerDelta) -> PerkResult<Option<Plan>> {
            self.increments.fetch_add(1, Ordering::SeqCst);
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(PerkError::StorageConflict("contended".into()));
            }
            self.inner.increment_plan(user_id, org_id, delta).await
        }
    }

    fn org() -> Organization {
        let mut org = Organization::onboard("o1", "owner", "Cafe");
        org.loyalty_active = true;
        org.loyalty_config = LoyaltyProgram {
            tiers: vec![LoyaltyTier { visits: 2, rewards: vec!["free-coffee".into()] }],
        };
        org
    }

    fn ledger_over(store: Arc<MemoryStore>) -> RewardLedger {
        RewardLedger::new(store.clone(), store, 3)
    }

    #[tokio::test]
    async fn test_first_accrual_creates_plan() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger_over(store.clone());

        let accrual = ledger
            .apply_delta("u1", &org(), LedgerDelta { visits: 1, points: 25 })
            .await
            .unwrap();
        assert_eq!(accrual.plan.visits, 1);
        assert_eq!(accrual.plan.points_total, 25);
        assert!(accrual.issued.is_empty());
        assert_eq!(store.plan_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_delta_still_opens_plan() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger_over(store.clone());

        let accrual = ledger.apply_delta("u1", &org(), LedgerDelta::default()).await.unwrap();
        assert_eq!(accrual.plan.visits_total, 0);
        assert!(ledger.get("u1", "o1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_conflicts_retried_within_bound() {
        let store = Arc::new(MemoryStore::new());
        let plans = Arc::new(ContendedPlans {
            inner: store.clone(),
            conflicts: AtomicU32::new(2),
            increments: AtomicU32::new(0),
        });
        let ledger = RewardLedger::new(plans.clone(), store.clone(), 3);

        let accrual = ledger
            .apply_delta("u1", &org(), LedgerDelta { visits: 1, points: 0 })
            .await
            .unwrap();
        assert_eq!(accrual.plan.visits, 1);
        // Two conflicts, one missing-plan, one success.
        assert_eq!(plans.increments.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_conflicts_exhaust_attempts() {
        let store = Arc::new(MemoryStore::new());
        let plans = Arc::new(ContendedPlans {
            inner: store.clone(),
            conflicts: AtomicU32::new(10),
            increments: AtomicU32::new(0),
        });
        let ledger = RewardLedger::new(plans.clone(), store.clone(), 3);

        let err = ledger
            .apply_delta("u1", &org(), LedgerDelta { visits: 1, points: 0 })
            .await
            .unwrap_err();
        assert!(matches!(err, PerkError::StorageConflict(_)));
        assert_eq!(plans.increments.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_tier_crossing_issues_reward_once() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger_over(store);
        let org = org();
        let visit = LedgerDelta { visits: 1, points: 0 };

        assert!(ledger.apply_delta("u1", &org, visit).await.unwrap().issued.is_empty());
        let second = ledger.apply_delta("u1", &org, visit).await.unwrap();
        assert_eq!(second.issued.len(), 1);
        assert_eq!(second.issued[0].reward_id, "free-coffee");
        assert_eq!(second.issued[0].category, RewardCategory::Loyalty);
        assert!(ledger.apply_delta("u1", &org, visit).await.unwrap().issued.is_empty());

        assert_eq!(ledger.rewards("u1", "o1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_redeem_leaves_counters_alone() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger_over(store);
        let org = org();
        let visit = LedgerDelta { visits: 1, points: 0 };
        ledger.apply_delta("u1", &org, visit).await.unwrap();
        let reward = ledger.apply_delta("u1", &org, visit).await.unwrap().issued.remove(0);

        let redeemed = ledger.redeem("u1", "o1", &reward.id).await.unwrap();
        assert!(!redeemed.active);

        let plan = ledger.get("u1", "o1").await.unwrap().unwrap();
        assert_eq!((plan.visits, plan.visits_total), (2, 2));

        let again = ledger.redeem("u1", "o1", &reward.id).await.unwrap_err();
        assert!(matches!(again, PerkError::PreconditionFailed(_)));
        let unknown = ledger.redeem("u1", "o1", "nope").await.unwrap_err();
        assert!(matches!(unknown, PerkError::NotFound(_)));
        let no_plan = ledger.redeem("u2", "o1", &reward.id).await.unwrap_err();
        assert!(matches!(no_plan, PerkError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rewards_empty_without_plan() {
        let ledger = ledger_over(Arc::new(MemoryStore::new()));
        assert!(ledger.rewards("u1", "o1").await.unwrap().is_empty());
    }
}
