//! Visit pipeline: validates a claim, proves it against a point-of-sale order,
//! appends the visit and accrues the ledger.
//!
//! Stages run strictly in order. Nothing is written before `RecordingVisit`;
//! a ledger failure after the visit is stored is surfaced for reconciliation
//! and never rolls the visit back.

use crate::request::{validate, VisitClaim};
use chrono::{DateTime, Utc};
use perk_core::config::AppConfig;
use perk_core::ledger::Plan;
use perk_core::types::{Organization, Shop};
use perk_core::visit::{Order, Visit, VisitRequest};
use perk_core::{PerkError, PerkResult};
use perk_loyalty::{AccrualRules, RewardLedger};
use perk_pos::{OrderVerifier, PosProvider};
use perk_secrets::CredentialResolver;
use perk_store::{InsertOutcome, OrganizationStore, ShopStore, VisitStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitStage {
    Validating,
    ResolvingContext,
    VerifyingOrder,
    RecordingVisit,
    UpdatingLedger,
}

impl VisitStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitStage::Validating => "validating",
            VisitStage::ResolvingContext => "resolving_context",
            VisitStage::VerifyingOrder => "verifying_order",
            VisitStage::RecordingVisit => "recording_visit",
            VisitStage::UpdatingLedger => "updating_ledger",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VisitOutcome {
    Recorded { visit_id: String, plan: Plan },
    /// No unrefunded order inside the look-back window. Nothing was written.
    NoQualifyingOrder,
    /// The caller's visit for this order already exists.
    AlreadyRecorded { visit_id: String },
}

/// Collaborators the pipeline drives.
pub struct VisitDeps {
    pub shops: Arc<dyn ShopStore>,
    pub organizations: Arc<dyn OrganizationStore>,
    pub visits: Arc<dyn VisitStore>,
    pub credentials: Arc<CredentialResolver>,
    pub provider: Arc<dyn PosProvider>,
    pub ledger: Arc<RewardLedger>,
}

struct StageError {
    stage: VisitStage,
    error: PerkError,
}

trait AtStage<T> {
    fn at(self, stage: VisitStage) -> Result<T, StageError>;
}

impl<T> AtStage<T> for PerkResult<T> {
    fn at(self, stage: VisitStage) -> Result<T, StageError> {
        self.map_err(|error| StageError { stage, error })
    }
}

pub struct VisitPipeline {
    shops: Arc<dyn ShopStore>,
    organizations: Arc<dyn OrganizationStore>,
    visits: Arc<dyn VisitStore>,
    credentials: Arc<CredentialResolver>,
    verifier: OrderVerifier,
    ledger: Arc<RewardLedger>,
    rules: AccrualRules,
    token_key_ref: String,
    search_timeout: Duration,
    provider_retries: u32,
}

impl VisitPipeline {
    pub fn new(deps: VisitDeps, config: &AppConfig) -> Self {
        info!(
            lookback_minutes = config.visits.lookback_minutes,
            search_timeout_ms = config.visits.order_search_timeout_ms,
            provider = deps.provider.name(),
            "Visit pipeline initialized"
        );
        Self {
            shops: deps.shops,
            organizations: deps.organizations,
            visits: deps.visits,
            credentials: deps.credentials,
            verifier: OrderVerifier::new(deps.provider, config.visits.lookback_minutes),
            ledger: deps.ledger,
            rules: AccrualRules::from_config(&config.visits),
            token_key_ref: config.secrets.token_key_ref.clone(),
            search_timeout: Duration::from_millis(config.visits.order_search_timeout_ms),
            provider_retries: config.visits.provider_retries,
        }
    }

    /// Record a visit for `user_id` and accrue the ledger.
    pub async fn record_visit(
        &self,
        user_id: Option<&str>,
        request: &VisitRequest,
    ) -> PerkResult<VisitOutcome> {
        match self.run(user_id, request).await {
            Ok(outcome) => {
                let label = match &outcome {
                    VisitOutcome::Recorded { .. } => "visits.recorded",
                    VisitOutcome::NoQualifyingOrder => "visits.no_qualifying_order",
                    VisitOutcome::AlreadyRecorded { .. } => "visits.already_recorded",
                };
                metrics::counter!(label).increment(1);
                Ok(outcome)
            }
            Err(StageError { stage, error }) => {
                metrics::counter!("visits.failed", "stage" => stage.as_str(), "kind" => error.kind()).increment(1);
                if error.is_client_error() {
                    debug!(stage = stage.as_str(), error = %error, "Visit rejected");
                } else {
                    warn!(stage = stage.as_str(), error = %error, "Visit failed");
                }
                Err(error)
            }
        }
    }

    async fn run(&self, user_id: Option<&str>, request: &VisitRequest) -> Result<VisitOutcome, StageError> {
        let claim = validate(user_id, request).at(VisitStage::Validating)?;

        let (shop, organization) = self.resolve_context(&claim).await.at(VisitStage::ResolvingContext)?;

        let orders = self
            .verify_orders(&shop, &organization, claim.claimed_at)
            .await
            .at(VisitStage::VerifyingOrder)?;
        let order = match self
            .first_uncredited(&claim.user_id, &orders)
            .await
            .at(VisitStage::VerifyingOrder)?
        {
            Uncredited::Order(order) => order,
            Uncredited::NoneQualifying => {
                debug!(user_id = %claim.user_id, shop_id = %shop.id, "No recent order found");
                return Ok(VisitOutcome::NoQualifyingOrder);
            }
            Uncredited::CreditedToCaller(visit_id) => {
                debug!(user_id = %claim.user_id, shop_id = %shop.id, visit_id = %visit_id, "Recent order already credited to caller");
                return Ok(VisitOutcome::AlreadyRecorded { visit_id });
            }
        };

        let candidate = Visit::record(&claim.user_id, &shop, &organization, order, claim.claimed_at);
        let visit = match self
            .visits
            .insert_visit(&candidate)
            .await
            .at(VisitStage::RecordingVisit)?
        {
            InsertOutcome::Inserted => candidate,
            InsertOutcome::Duplicate(existing) if existing.id == candidate.id => {
                debug!(visit_id = %existing.id, "Visit already stored, continuing with stored record");
                existing
            }
            InsertOutcome::Duplicate(existing) if existing.user_id == claim.user_id => {
                // Concurrent claim by the same caller won the order.
                return Ok(VisitOutcome::AlreadyRecorded { visit_id: existing.id });
            }
            InsertOutcome::Duplicate(_) => {
                debug!(user_id = %claim.user_id, order_id = %order.id, "Order credited to another user");
                return Ok(VisitOutcome::NoQualifyingOrder);
            }
        };

        let delta = self.rules.delta_for_visit(&visit);
        let accrual = match self.ledger.apply_delta(&visit.user_id, &organization, delta).await {
            Ok(accrual) => accrual,
            Err(err) => {
                metrics::counter!("ledger.reconciliation_needed").increment(1);
                error!(
                    visit_id = %visit.id,
                    org_id = %visit.org_id,
                    user_id = %visit.user_id,
                    error = %err,
                    "Visit recorded but ledger update failed; reconciliation needed"
                );
                return Err(StageError {
                    stage: VisitStage::UpdatingLedger,
                    error: PerkError::LedgerReconciliation {
                        visit_id: visit.id,
                        org_id: visit.org_id,
                        user_id: visit.user_id,
                        reason: err.to_string(),
                    },
                });
            }
        };

        info!(
            visit_id = %visit.id,
            user_id = %visit.user_id,
            org_id = %visit.org_id,
            order_id = %visit.order_id,
            visits = accrual.plan.visits,
            points = accrual.plan.points,
            rewards_issued = accrual.issued.len(),
            "Visit recorded"
        );
        Ok(VisitOutcome::Recorded {
            visit_id: visit.id,
            plan: accrual.plan,
        })
    }

    async fn resolve_context(&self, claim: &VisitClaim) -> PerkResult<(Shop, Organization)> {
        let shop = self
            .shops
            .get_shop(&claim.shop_id)
            .await?
            .ok_or_else(|| PerkError::NotFound(format!("shop {}", claim.shop_id)))?;
        let organization = self
            .organizations
            .get_organization(&shop.org_id)
            .await?
            .ok_or_else(|| PerkError::NotFound(format!("organization {}", shop.org_id)))?;

        if !organization.is_linked() {
            return Err(PerkError::PreconditionFailed(format!(
                "organization {} is not linked to a point-of-sale provider",
                organization.id
            )));
        }
        if organization.provider.is_expired(Utc::now()) {
            return Err(PerkError::PreconditionFailed(format!(
                "point-of-sale authorization for organization {} has expired",
                organization.id
            )));
        }
        Ok((shop, organization))
    }

    async fn verify_orders(
        &self,
        shop: &Shop,
        organization: &Organization,
        claimed_at: DateTime<Utc>,
    ) -> PerkResult<Vec<Order>> {
        let ciphertext = organization.provider.access_token.as_deref().unwrap_or_default();
        let token = self.credentials.decrypt_token(ciphertext, &self.token_key_ref).await?;

        let attempts = self.provider_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let search = self.verifier.qualifying_orders(&token, shop, claimed_at);
            let result = match tokio::time::timeout(self.search_timeout, search).await {
                Ok(result) => result,
                Err(_) => Err(PerkError::UpstreamProvider(format!(
                    "order search timed out after {}ms",
                    self.search_timeout.as_millis()
                ))),
            };
            match result {
                Err(PerkError::UpstreamProvider(reason)) if attempt < attempts => {
                    warn!(shop_id = %shop.id, attempt = attempt, reason = %reason, "Order search failed, retrying");
                }
                other => return other,
            }
        }
    }

    /// Newest order with no visit credited to it yet. Orders credited to
    /// other users count as not qualifying.
    async fn first_uncredited<'a>(&self, user_id: &str, orders: &'a [Order]) -> PerkResult<Uncredited<'a>> {
        let mut callers_newest = None;
        for order in orders {
            match self.visits.visit_for_order(&order.id).await? {
                None => return Ok(Uncredited::Order(order)),
                Some(visit) if visit.user_id == user_id => {
                    callers_newest.get_or_insert(visit.id);
                }
                Some(_) => {}
            }
        }
        Ok(callers_newest
            .map(Uncredited::CreditedToCaller)
            .unwrap_or(Uncredited::NoneQualifying))
    }
}

enum Uncredited<'a> {
    Order(&'a Order),
    NoneQualifying,
    /// Every qualifying order is credited; the newest one to the caller.
    CreditedToCaller(String),
}
