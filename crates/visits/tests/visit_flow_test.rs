//! End-to-end visit scenarios over the in-memory backends with a scripted
//! point-of-sale provider.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use perk_core::config::AppConfig;
use perk_core::ledger::{LedgerDelta, Plan};
use perk_core::types::{LoyaltyProgram, LoyaltyTier, Organization, ProviderLink, Shop};
use perk_core::visit::{Order, OrderRefund, Visit, VisitRequest};
use perk_core::{PerkError, PerkResult};
use perk_loyalty::{AccrualRules, RewardLedger};
use perk_pos::ScriptedPosProvider;
use perk_secrets::{CredentialResolver, KeyCache, PassthroughDecryptor, StaticSecretStore};
use perk_store::{
    InsertOutcome, MemoryGeoIndex, MemoryStore, OrganizationStore, PlanStore, ShopStore, VisitStore,
};
use perk_visits::{LedgerReconciler, OrganizationService, VisitDeps, VisitOutcome, VisitPipeline};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const CLAIMED: &str = "2024-01-01T12:00:00Z";

/// Plan store whose writes fail until healed.
struct BrokenPlans {
    inner: Arc<MemoryStore>,
    healthy: AtomicBool,
}

impl BrokenPlans {
    fn check(&self) -> PerkResult<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PerkError::Storage("plans table unavailable".into()))
        }
    }
}

#[async_trait]
impl PlanStore for BrokenPlans {
    async fn get_plan(&self, user_id: &str, org_id: &str) -> PerkResult<Option<Plan>> {
        self.inner.get_plan(user_id, org_id).await
    }

    async fn create_plan_if_absent(&self, plan: Plan) -> PerkResult<Plan> {
        self.check()?;
        self.inner.create_plan_if_absent(plan).await
    }

    async fn increment_plan(&self, user_id: &str, org_id: &str, delta: LedgerDelta) -> PerkResult<Option<Plan>> {
        self.check()?;
        self.inner.increment_plan(user_id, org_id, delta).await
    }
}

/// How a visit insert loses its order slot.
enum Race {
    /// The candidate itself was already stored by an earlier attempt, with
    /// the order total the store holds.
    SameRecord { stored_total: i64 },
    /// Another claim by `user_id` stored a different visit for the order.
    OtherVisit { user_id: &'static str },
}

/// Visit store whose inserts always find the order already taken.
struct RacedVisits {
    inner: Arc<MemoryStore>,
    race: Race,
}

#[async_trait]
impl VisitStore for RacedVisits {
    async fn insert_visit(&self, visit: &Visit) -> PerkResult<InsertOutcome> {
        let existing = match &self.race {
            Race::SameRecord { stored_total } => Visit {
                total: Some(*stored_total),
                ..visit.clone()
            },
            Race::OtherVisit { user_id } => Visit {
                id: format!("{}-winner", visit.order_id),
                user_id: user_id.to_string(),
                ..visit.clone()
            },
        };
        self.inner.insert_visit(&existing).await?;
        Ok(InsertOutcome::Duplicate(existing))
    }

    async fn get_visit(&self, visit_id: &str) -> PerkResult<Option<Visit>> {
        self.inner.get_visit(visit_id).await
    }

    async fn visit_for_order(&self, order_id: &str) -> PerkResult<Option<Visit>> {
        self.inner.visit_for_order(order_id).await
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    provider: Arc<ScriptedPosProvider>,
    geo: Arc<MemoryGeoIndex>,
    ledger: Arc<RewardLedger>,
    credentials: Arc<CredentialResolver>,
    pipeline: VisitPipeline,
    config: AppConfig,
}

impl Harness {
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(store.clone(), store.clone(), store, AppConfig::default()).await
    }

    async fn with_plans(plans: Arc<dyn PlanStore>, store: Arc<MemoryStore>) -> Self {
        Self::build(store.clone(), plans, store, AppConfig::default()).await
    }

    async fn with_race(race: Race) -> Self {
        let store = Arc::new(MemoryStore::new());
        let visits = Arc::new(RacedVisits {
            inner: store.clone(),
            race,
        });
        Self::build(store.clone(), store, visits, AppConfig::default()).await
    }

    async fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(store.clone(), store.clone(), store, config).await
    }

    async fn build(
        store: Arc<MemoryStore>,
        plans: Arc<dyn PlanStore>,
        visits: Arc<dyn VisitStore>,
        config: AppConfig,
    ) -> Self {
        let secrets = Arc::new(StaticSecretStore::new());
        secrets.insert(
            &config.secrets.provider_secret_ref,
            r#"{"client_id":"sq-app","client_secret":"sq-secret"}"#,
        );
        let credentials = Arc::new(CredentialResolver::new(
            secrets,
            Arc::new(PassthroughDecryptor),
            Arc::new(KeyCache::new()),
        ));
        let provider = Arc::new(ScriptedPosProvider::new());
        let ledger = Arc::new(RewardLedger::new(plans, store.clone(), config.visits.ledger_max_attempts));
        let geo = Arc::new(MemoryGeoIndex::new());

        let pipeline = VisitPipeline::new(
            VisitDeps {
                shops: store.clone(),
                organizations: store.clone(),
                visits,
                credentials: credentials.clone(),
                provider: provider.clone(),
                ledger: ledger.clone(),
            },
            &config,
        );

        let shop = shop();
        store.put_shop(&shop).await.unwrap();
        store.put_organization(&organization()).await.unwrap();
        geo.index_shop(&shop);
        geo.index_organization("O1", true);

        Self {
            store,
            provider,
            geo,
            ledger,
            credentials,
            pipeline,
            config,
        }
    }

    async fn update_org(&self, change: impl FnOnce(&mut Organization)) {
        let mut org = self.store.get_organization("O1").await.unwrap().unwrap();
        change(&mut org);
        self.store.put_organization(&org).await.unwrap();
    }

    async fn claim(&self, user_id: &str) -> PerkResult<VisitOutcome> {
        self.pipeline.record_visit(Some(user_id), &request(CLAIMED)).await
    }

    fn reconciler(&self) -> LedgerReconciler {
        LedgerReconciler::new(
            self.store.clone(),
            self.store.clone(),
            self.ledger.clone(),
            AccrualRules::from_config(&self.config.visits),
        )
    }

    fn organizations(&self) -> OrganizationService {
        OrganizationService::new(
            self.store.clone(),
            self.geo.clone(),
            self.credentials.clone(),
            self.provider.clone(),
            &self.config.secrets,
        )
    }
}

fn claimed() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

fn request(timestamp: &str) -> VisitRequest {
    VisitRequest {
        shop_id: Some("S1".into()),
        timestamp: Some(timestamp.into()),
    }
}

fn organization() -> Organization {
    let mut org = Organization::onboard("O1", "owner-1", "Corner Cafe");
    org.provider = ProviderLink {
        access_token: Some(hex::encode("sq-access-token")),
        refresh_token: Some(hex::encode("sq-refresh-token")),
        expires_at: Some(Utc::now() + Duration::days(30)),
        linked: true,
    };
    org.active = true;
    org.loyalty_active = true;
    org.milestone_active = true;
    org
}

fn shop() -> Shop {
    Shop {
        id: "S1".into(),
        org_id: "O1".into(),
        name: "Main St".into(),
        latitude: 40.7128,
        longitude: -74.006,
        shop_hours: None,
        square_location_id: Some("LOC1".into()),
        active: true,
    }
}

fn order(id: &str, created_at: DateTime<Utc>, total: i64, refunded: bool) -> Order {
    Order {
        id: id.into(),
        location_id: "LOC1".into(),
        created_at,
        total_minor_units: Some(total),
        refunds: if refunded {
            vec![OrderRefund {
                id: format!("{id}-r"),
                amount_minor_units: Some(total),
            }]
        } else {
            Vec::new()
        },
    }
}

fn recorded_visit_id(outcome: VisitOutcome) -> String {
    match outcome {
        VisitOutcome::Recorded { visit_id, .. } => visit_id,
        other => panic!("expected a recorded visit, got {other:?}"),
    }
}

#[tokio::test]
async fn test_recorded_visit_creates_plan() {
    let h = Harness::new().await;
    h.provider.add_order(order("ord-1", claimed() - Duration::seconds(90), 2500, false));

    let outcome = h.claim("user-1").await.unwrap();
    let VisitOutcome::Recorded { visit_id, plan } = outcome else {
        panic!("expected a recorded visit");
    };
    assert_eq!((plan.visits, plan.visits_total), (1, 1));
    assert_eq!((plan.points, plan.points_total), (25, 25));

    let visit = h.store.get_visit(&visit_id).await.unwrap().unwrap();
    assert_eq!(visit.order_id, "ord-1");
    assert_eq!(visit.total, Some(2500));
    assert!(visit.loyalty_active_at_visit);
    assert!(visit.milestone_active_at_visit);
    assert_eq!(h.ledger.get("user-1", "O1").await.unwrap().unwrap(), plan);
}

#[tokio::test]
async fn test_only_refunded_order_writes_nothing() {
    let h = Harness::new().await;
    h.provider.add_order(order("ord-1", claimed() - Duration::seconds(30), 2500, true));

    assert_eq!(h.claim("user-1").await.unwrap(), VisitOutcome::NoQualifyingOrder);
    assert_eq!(h.store.visit_count(), 0);
    assert_eq!(h.store.plan_count(), 0);
}

#[tokio::test]
async fn test_order_outside_window_is_not_found() {
    let h = Harness::new().await;
    h.provider.add_order(order("ord-1", claimed() - Duration::minutes(3) - Duration::seconds(1), 2500, false));

    assert_eq!(h.claim("user-1").await.unwrap(), VisitOutcome::NoQualifyingOrder);
    assert_eq!(h.store.visit_count(), 0);
}

#[tokio::test]
async fn test_unlinked_organization_never_searches() {
    let h = Harness::new().await;
    h.update_org(|org| org.provider.linked = false).await;
    h.provider.add_order(order("ord-1", claimed() - Duration::seconds(30), 2500, false));

    let err = h.claim("user-1").await.unwrap_err();
    assert!(matches!(err, PerkError::PreconditionFailed(_)));
    assert_eq!(h.provider.searches(), 0);
    assert_eq!(h.store.visit_count(), 0);
}

#[tokio::test]
async fn test_expired_token_never_searches() {
    let h = Harness::new().await;
    h.update_org(|org| org.provider.expires_at = Some(Utc::now() - Duration::minutes(1))).await;

    let err = h.claim("user-1").await.unwrap_err();
    assert!(matches!(err, PerkError::PreconditionFailed(_)));
    assert_eq!(h.provider.searches(), 0);
}

#[tokio::test]
async fn test_unknown_shop_and_bad_input() {
    let h = Harness::new().await;

    let missing = VisitRequest {
        shop_id: Some("nope".into()),
        timestamp: Some(CLAIMED.into()),
    };
    let err = h.pipeline.record_visit(Some("user-1"), &missing).await.unwrap_err();
    assert!(matches!(err, PerkError::NotFound(_)));

    let err = h.pipeline.record_visit(Some("user-1"), &request("noon")).await.unwrap_err();
    assert!(matches!(err, PerkError::InvalidRequest(_)));

    let err = h.pipeline.record_visit(None, &request(CLAIMED)).await.unwrap_err();
    assert!(matches!(err, PerkError::InvalidRequest(_)));
    assert_eq!(h.provider.searches(), 0);
}

#[tokio::test]
async fn test_ledger_failure_keeps_visit_and_reports_ids() {
    let store = Arc::new(MemoryStore::new());
    let plans = Arc::new(BrokenPlans {
        inner: store.clone(),
        healthy: AtomicBool::new(false),
    });
    let h = Harness::with_plans(plans.clone(), store).await;
    h.provider.add_order(order("ord-1", claimed() - Duration::seconds(30), 2500, false));

    let err = h.claim("user-1").await.unwrap_err();
    let PerkError::LedgerReconciliation { visit_id, org_id, user_id, .. } = err else {
        panic!("expected reconciliation error");
    };
    assert_eq!(org_id, "O1");
    assert_eq!(user_id, "user-1");

    assert!(h.store.get_visit(&visit_id).await.unwrap().is_some());
    assert!(h.ledger.get("user-1", "O1").await.unwrap().is_none());

    // The organization turns loyalty off before the repair runs; the visit's
    // snapshot still earns the visit credit.
    h.update_org(|org| {
        org.loyalty_active = false;
        org.milestone_active = false;
    })
    .await;
    plans.healthy.store(true, Ordering::SeqCst);

    let plan = h.reconciler().replay(&visit_id).await.unwrap();
    assert_eq!((plan.visits, plan.points), (1, 25));
}

#[tokio::test]
async fn test_snapshot_survives_program_toggle() {
    let h = Harness::new().await;
    h.provider.add_order(order("ord-1", claimed() - Duration::seconds(30), 900, false));

    let visit_id = recorded_visit_id(h.claim("user-1").await.unwrap());
    h.update_org(|org| org.loyalty_active = false).await;

    let visit = h.store.get_visit(&visit_id).await.unwrap().unwrap();
    assert!(visit.loyalty_active_at_visit);
    let delta = AccrualRules::from_config(&h.config.visits).delta_for_visit(&visit);
    assert_eq!(delta, LedgerDelta { visits: 1, points: 9 });
}

#[tokio::test]
async fn test_upstream_failure_retried_once() {
    let h = Harness::new().await;
    h.provider.add_order(order("ord-1", claimed() - Duration::seconds(30), 2500, false));
    h.provider.fail_next(1);

    recorded_visit_id(h.claim("user-1").await.unwrap());
    assert_eq!(h.provider.searches(), 2);
}

#[tokio::test]
async fn test_upstream_failure_surfaces_after_retry() {
    let h = Harness::new().await;
    h.provider.add_order(order("ord-1", claimed() - Duration::seconds(30), 2500, false));
    h.provider.fail_next(2);

    let err = h.claim("user-1").await.unwrap_err();
    assert!(matches!(err, PerkError::UpstreamProvider(_)));
    assert_eq!(h.provider.searches(), 2);
    assert_eq!(h.store.visit_count(), 0);
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let mut config = AppConfig::default();
    config.visits.order_search_timeout_ms = 50;
    let h = Harness::with_config(config).await;
    h.provider.add_order(order("ord-1", claimed() - Duration::seconds(30), 2500, false));
    h.provider.set_delay(std::time::Duration::from_millis(500));

    let err = h.claim("user-1").await.unwrap_err();
    assert!(matches!(err, PerkError::UpstreamProvider(_)));
    assert_eq!(h.provider.searches(), 2);
    assert_eq!(h.store.visit_count(), 0);
}

#[tokio::test]
async fn test_timeout_then_success_on_retry() {
    let mut config = AppConfig::default();
    config.visits.order_search_timeout_ms = 50;
    let h = Harness::with_config(config).await;
    h.provider.add_order(order("ord-1", claimed() - Duration::seconds(30), 2500, false));
    h.provider.set_delay(std::time::Duration::from_millis(500));

    // Only the first search is slow.
    let provider = h.provider.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        provider.set_delay(std::time::Duration::ZERO);
    });

    recorded_visit_id(h.claim("user-1").await.unwrap());
    assert_eq!(h.provider.searches(), 2);
}

#[tokio::test]
async fn test_each_order_credits_one_visit() {
    let h = Harness::new().await;
    h.provider.add_order(order("ord-old", claimed() - Duration::seconds(100), 1000, false));
    h.provider.add_order(order("ord-new", claimed() - Duration::seconds(10), 1000, false));

    let first = recorded_visit_id(h.claim("user-1").await.unwrap());
    let second = recorded_visit_id(h.claim("user-1").await.unwrap());
    assert_ne!(first, second);
    assert_eq!(h.store.get_visit(&first).await.unwrap().unwrap().order_id, "ord-new");
    assert_eq!(h.store.get_visit(&second).await.unwrap().unwrap().order_id, "ord-old");

    // Orders credited to someone else do not qualify, and their visit ids
    // are not disclosed.
    assert_eq!(h.claim("user-2").await.unwrap(), VisitOutcome::NoQualifyingOrder);

    // The original claimant gets their newest visit back.
    match h.claim("user-1").await.unwrap() {
        VisitOutcome::AlreadyRecorded { visit_id } => assert_eq!(visit_id, first),
        other => panic!("expected already recorded, got {other:?}"),
    }

    let plan = h.ledger.get("user-1", "O1").await.unwrap().unwrap();
    assert_eq!((plan.visits, plan.points), (2, 20));
    assert!(h.ledger.get("user-2", "O1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_tier_reward_issued_on_visit() {
    let h = Harness::new().await;
    h.update_org(|org| {
        org.loyalty_config = LoyaltyProgram {
            tiers: vec![LoyaltyTier {
                visits: 1,
                rewards: vec!["welcome-drink".into()],
            }],
        };
    })
    .await;
    h.provider.add_order(order("ord-1", claimed() - Duration::seconds(30), 400, false));

    recorded_visit_id(h.claim("user-1").await.unwrap());

    let rewards = h.ledger.rewards("user-1", "O1").await.unwrap();
    assert_eq!(rewards.len(), 1);
    assert_eq!(rewards[0].reward_id, "welcome-drink");
    assert!(rewards[0].active);
}

#[tokio::test]
async fn test_unlink_revokes_and_hides_organization() {
    let h = Harness::new().await;
    let service = h.organizations();

    let err = service.unlink("O1", "someone-else").await.unwrap_err();
    assert!(matches!(err, PerkError::PreconditionFailed(_)));
    assert!(h.geo.is_org_active("O1"));

    let unlinked = service.unlink("O1", "owner-1").await.unwrap();
    assert!(!unlinked.is_linked());
    assert!(!unlinked.active);
    assert_eq!(h.provider.revocations(), 1);
    assert!(!h.geo.is_org_active("O1"));

    let err = h.claim("user-1").await.unwrap_err();
    assert!(matches!(err, PerkError::PreconditionFailed(_)));

    // Unlinking again skips the revoke.
    service.unlink("O1", "owner-1").await.unwrap();
    assert_eq!(h.provider.revocations(), 1);
}

#[tokio::test]
async fn test_stored_record_with_same_id_is_accrued() {
    let h = Harness::with_race(Race::SameRecord { stored_total: 5000 }).await;
    h.provider.add_order(order("ord-1", claimed() - Duration::seconds(30), 2500, false));

    let VisitOutcome::Recorded { visit_id, plan } = h.claim("user-1").await.unwrap() else {
        panic!("expected a recorded visit");
    };
    // Points follow the stored visit, not the fresh candidate.
    assert_eq!((plan.visits, plan.points), (1, 50));
    assert_eq!(h.store.get_visit(&visit_id).await.unwrap().unwrap().total, Some(5000));
}

#[tokio::test]
async fn test_order_lost_to_another_user_is_not_qualifying() {
    let h = Harness::with_race(Race::OtherVisit { user_id: "user-2" }).await;
    h.provider.add_order(order("ord-1", claimed() - Duration::seconds(30), 2500, false));

    assert_eq!(h.claim("user-1").await.unwrap(), VisitOutcome::NoQualifyingOrder);
    assert!(h.ledger.get("user-1", "O1").await.unwrap().is_none());
    assert!(h.ledger.get("user-2", "O1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_order_lost_to_own_concurrent_claim() {
    let h = Harness::with_race(Race::OtherVisit { user_id: "user-1" }).await;
    h.provider.add_order(order("ord-1", claimed() - Duration::seconds(30), 2500, false));

    assert_eq!(
        h.claim("user-1").await.unwrap(),
        VisitOutcome::AlreadyRecorded {
            visit_id: "ord-1-winner".into()
        }
    );
    assert!(h.ledger.get("user-1", "O1").await.unwrap().is_none());
}
