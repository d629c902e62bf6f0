//! Reward ledger types: one plan per (user, organization) and the rewards
//! issued against it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Per (user, organization) accrual record.
///
/// Lifetime totals only grow; current counters are never larger than them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Plan {
    pub plan_id: String,
    pub user_id: String,
    pub org_id: String,
    /// Redeemable loyalty counter.
    pub visits: u64,
    pub visits_total: u64,
    /// Redeemable milestone counter.
    pub points: u64,
    pub points_total: u64,
    pub start_date: DateTime<Utc>,
}

impl Plan {
    pub fn new(user_id: &str, org_id: &str) -> Self {
        Self {
            plan_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            org_id: org_id.to_string(),
            visits: 0,
            visits_total: 0,
            points: 0,
            points_total: 0,
            start_date: Utc::now(),
        }
    }

    /// Increment counters. Saturates rather than wrapping.
    pub fn apply(&mut self, delta: LedgerDelta) {
        self.visits = self.visits.saturating_add(delta.visits);
        self.visits_total = self.visits_total.saturating_add(delta.visits);
        self.points = self.points.saturating_add(delta.points);
        self.points_total = self.points_total.saturating_add(delta.points);
    }

    pub fn is_consistent(&self) -> bool {
        self.visits_total >= self.visits && self.points_total >= self.points
    }
}

/// Increment produced by the accrual rules. Never negative.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerDelta {
    /// 0 or 1.
    pub visits: u64,
    pub points: u64,
}

impl LedgerDelta {
    pub fn is_empty(&self) -> bool {
        self.visits == 0 && self.points == 0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RewardCategory {
    Loyalty,
    Milestone,
}

impl RewardCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardCategory::Loyalty => "loyalty",
            RewardCategory::Milestone => "milestone",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "loyalty" => Some(RewardCategory::Loyalty),
            "milestone" => Some(RewardCategory::Milestone),
            _ => None,
        }
    }
}

/// A reward issued against a plan. Flips from active to redeemed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Reward {
    /// Row id.
    pub id: String,
    pub plan_id: String,
    /// Catalog id from the organization's program config.
    pub reward_id: String,
    pub category: RewardCategory,
    pub active: bool,
    pub issued_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl Reward {
    pub fn issue(plan_id: &str, reward_id: &str, category: RewardCategory) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            plan_id: plan_id.to_string(),
            reward_id: reward_id.to_string(),
            category,
            active: true,
            issued_at: Utc::now(),
            redeemed_at: None,
        }
    }
}
