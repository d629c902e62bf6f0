//! Accrual rules: pure functions from a visit to a ledger increment, and from
//! a counter movement to the rewards it unlocks. No I/O.

use perk_core::config::VisitConfig;
use perk_core::ledger::{LedgerDelta, Plan, RewardCategory};
use perk_core::types::{Organization, ProgramFlags};
use perk_core::visit::Visit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualRules {
    minor_units_per_point: u64,
}

impl Default for AccrualRules {
    fn default() -> Self {
        Self::new(100)
    }
}

impl AccrualRules {
    /// A ratio of zero is treated as one.
    pub fn new(minor_units_per_point: u32) -> Self {
        Self {
            minor_units_per_point: u64::from(minor_units_per_point.max(1)),
        }
    }

    pub fn from_config(config: &VisitConfig) -> Self {
        Self::new(config.minor_units_per_point)
    }

    pub fn minor_units_per_point(&self) -> u64 {
        self.minor_units_per_point
    }

    /// Increment for one visit. Loyalty and milestone fire independently.
    /// An absent or negative total still counts as a visit but earns no points.
    pub fn compute_delta(&self, total_minor_units: Option<i64>, flags: ProgramFlags) -> LedgerDelta {
        let visits = u64::from(flags.loyalty_active);
        let points = if flags.milestone_active {
            let total = total_minor_units.unwrap_or(0).max(0) as u64;
            total / self.minor_units_per_point
        } else {
            0
        };
        LedgerDelta { visits, points }
    }

    /// Increment derived from the flags captured on the visit, not the
    /// organization's current ones.
    pub fn delta_for_visit(&self, visit: &Visit) -> LedgerDelta {
        self.compute_delta(visit.total, visit.snapshot_flags())
    }
}

/// A reward to issue: catalog id plus the program that unlocked it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unlocked {
    pub reward_id: String,
    pub category: RewardCategory,
}

/// Rewards unlocked by moving lifetime counters from `before` to `after`.
///
/// Every reward of a newly reached loyalty tier is unlocked. A newly crossed
/// milestone threshold unlocks its first reward option.
pub fn unlocked_rewards(organization: &Organization, before: &Plan, after: &Plan) -> Vec<Unlocked> {
    let mut unlocked = Vec::new();

    for tier in &organization.loyalty_config.tiers {
        if before.visits_total < tier.visits && tier.visits <= after.visits_total {
            unlocked.extend(tier.rewards.iter().map(|reward_id| Unlocked {
                reward_id: reward_id.clone(),
                category: RewardCategory::Loyalty,
            }));
        }
    }

    for threshold in &organization.milestone_config.thresholds {
        if before.points_total < threshold.points && threshold.points <= after.points_total {
            if let Some(reward_id) = threshold.reward_options.first() {
                unlocked.push(Unlocked {
                    reward_id: reward_id.clone(),
                    category: RewardCategory::Milestone,
                });
            }
        }
    }

    unlocked
}
