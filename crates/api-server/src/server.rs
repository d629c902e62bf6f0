//! API server: REST routes, OpenAPI docs and the Prometheus exporter.

use crate::rest::{self, AppState};
use crate::swagger::ApiDoc;
use crate::{org_rest, plan_rest, shop_rest, visit_rest};
use axum::routing::{get, post};
use axum::Router;
use perk_core::config::AppConfig;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

/// Full route table over `state`, middleware included.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Visits
        .route("/v1/visits", post(visit_rest::record_visit))
        // Plans
        .route("/v1/plans/:org_id", get(plan_rest::get_plan))
        .route("/v1/plans/:org_id/rewards", get(plan_rest::list_rewards))
        .route(
            "/v1/plans/:org_id/rewards/:reward_id/redeem",
            post(plan_rest::redeem_reward),
        )
        // Shops
        .route("/v1/shops/nearby", get(shop_rest::nearby_shops))
        // Organizations
        .route(
            "/v1/organizations/:org_id/unlink",
            post(org_rest::unlink_organization),
        )
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Serve the REST API until the listener fails.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);
        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Install the Prometheus recorder with its own HTTP listener.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
