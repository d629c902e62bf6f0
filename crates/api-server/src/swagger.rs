//! OpenAPI document served at `/api-docs/openapi.json`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Perk API",
        version = "0.1.0",
        description = "Multi-tenant loyalty rewards.\n\nCustomers record visits proven by point-of-sale orders, accrue visits and points per organization, redeem rewards and discover nearby shops.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Visits", description = "Visit recording against recent orders"),
        (name = "Plans", description = "Per-organization plans and issued rewards"),
        (name = "Shops", description = "Nearby shop discovery"),
        (name = "Organizations", description = "Point-of-sale link lifecycle"),
        (name = "Operations", description = "Health, readiness and liveness probes"),
    ),
    paths(
        crate::visit_rest::record_visit,
        crate::plan_rest::get_plan,
        crate::plan_rest::list_rewards,
        crate::plan_rest::redeem_reward,
        crate::shop_rest::nearby_shops,
        crate::org_rest::unlink_organization,
        crate::rest::health_check,
        crate::rest::readiness,
        crate::rest::liveness,
    ),
    components(schemas(
        perk_core::ledger::Plan,
        perk_core::ledger::Reward,
        perk_core::ledger::RewardCategory,
        perk_core::discovery::RankBy,
        perk_core::discovery::NearbyPage,
        perk_core::discovery::NearbyShop,
        perk_core::discovery::ShopProjection,
        perk_core::discovery::OrgProjection,
        perk_core::visit::VisitRequest,
        crate::visit_rest::VisitResponse,
        crate::rest::ErrorResponse,
        crate::rest::MessageResponse,
        crate::rest::HealthResponse,
    ))
)]
pub struct ApiDoc;
