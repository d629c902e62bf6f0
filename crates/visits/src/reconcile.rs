//! Out-of-band repair for visits whose ledger update failed.

use perk_core::ledger::Plan;
use perk_core::{PerkError, PerkResult};
use perk_loyalty::{AccrualRules, RewardLedger};
use perk_store::{OrganizationStore, VisitStore};
use std::sync::Arc;
use tracing::info;

pub struct LedgerReconciler {
    visits: Arc<dyn VisitStore>,
    organizations: Arc<dyn OrganizationStore>,
    ledger: Arc<RewardLedger>,
    rules: AccrualRules,
}

impl LedgerReconciler {
    pub fn new(
        visits: Arc<dyn VisitStore>,
        organizations: Arc<dyn OrganizationStore>,
        ledger: Arc<RewardLedger>,
        rules: AccrualRules,
    ) -> Self {
        Self {
            visits,
            organizations,
            ledger,
            rules,
        }
    }

    /// Re-apply a stored visit's accrual, using the program flags captured on
    /// the visit. Not idempotent: replay only visits reported as
    /// `LedgerReconciliation`.
    pub async fn replay(&self, visit_id: &str) -> PerkResult<Plan> {
        let visit = self
            .visits
            .get_visit(visit_id)
            .await?
            .ok_or_else(|| PerkError::NotFound(format!("visit {visit_id}")))?;
        let organization = self
            .organizations
            .get_organization(&visit.org_id)
            .await?
            .ok_or_else(|| PerkError::NotFound(format!("organization {}", visit.org_id)))?;

        let delta = self.rules.delta_for_visit(&visit);
        let accrual = self
            .ledger
            .apply_delta(&visit.user_id, &organization, delta)
            .await?;

        metrics::counter!("ledger.reconciled").increment(1);
        info!(
            visit_id = %visit.id,
            user_id = %visit.user_id,
            org_id = %visit.org_id,
            visits = delta.visits,
            points = delta.points,
            "Ledger reconciled from stored visit"
        );
        Ok(accrual.plan)
    }
}
