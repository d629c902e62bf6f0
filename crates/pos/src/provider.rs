//! Point-of-sale provider seam.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use perk_core::visit::Order;
use perk_core::PerkResult;
use perk_secrets::ProviderKeys;

/// Trait for point-of-sale provider clients. Failures surface as
/// `PerkError::UpstreamProvider`.
#[async_trait]
pub trait PosProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Orders at `location_id` created inside `window`, newest first.
    async fn search_orders(
        &self,
        access_token: &str,
        location_id: &str,
        window: &LookbackWindow,
    ) -> PerkResult<Vec<Order>>;

    /// Revoke a tenant's access token using the application credentials.
    async fn revoke_access(&self, keys: &ProviderKeys, access_token: &str) -> PerkResult<()>;
}

/// Closed interval `[end - W, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookbackWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl LookbackWindow {
    pub fn ending_at(end: DateTime<Utc>, width: Duration) -> Self {
        Self {
            start: end - width,
            end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}
