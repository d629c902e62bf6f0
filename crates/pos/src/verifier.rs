//! Order verification: proves a claimed visit against a real, recent,
//! unrefunded point-of-sale order.

use crate::provider::{LookbackWindow, PosProvider};
use chrono::{DateTime, Duration, Utc};
use perk_core::types::Shop;
use perk_core::visit::Order;
use perk_core::{PerkError, PerkResult};
use std::sync::Arc;
use tracing::debug;

/// Outcome of an order lookup. `NotFound` is an expected result, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderLookup {
    Found(Order),
    NotFound,
}

pub struct OrderVerifier {
    provider: Arc<dyn PosProvider>,
    lookback: Duration,
}

impl OrderVerifier {
    pub fn new(provider: Arc<dyn PosProvider>, lookback_minutes: u32) -> Self {
        Self {
            provider,
            lookback: Duration::minutes(i64::from(lookback_minutes)),
        }
    }

    pub fn window(&self, claimed: DateTime<Utc>) -> LookbackWindow {
        LookbackWindow::ending_at(claimed, self.lookback)
    }

    /// Every unrefunded order inside the window, newest first.
    pub async fn qualifying_orders(
        &self,
        access_token: &str,
        shop: &Shop,
        claimed: DateTime<Utc>,
    ) -> PerkResult<Vec<Order>> {
        let location_id = shop
            .square_location_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                PerkError::PreconditionFailed(format!(
                    "shop {} has no point-of-sale location",
                    shop.id
                ))
            })?;

        let window = self.window(claimed);
        metrics::counter!("pos.search.requests", "provider" => self.provider.name()).increment(1);

        let orders = self
            .provider
            .search_orders(access_token, location_id, &window)
            .await
            .map_err(|e| {
                metrics::counter!("pos.search.errors", "provider" => self.provider.name()).increment(1);
                e
            })?;
        let returned = orders.len();

        // The provider filters too; the window is re-checked here because it
        // is the fraud control.
        let mut qualifying: Vec<Order> = orders
            .into_iter()
            .filter(|o| o.location_id == location_id)
            .filter(|o| window.contains(o.created_at))
            .filter(|o| !o.is_refunded())
            .collect();
        qualifying.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        debug!(
            shop_id = %shop.id,
            location_id = location_id,
            returned = returned,
            qualifying = qualifying.len(),
            window_start = %window.start,
            window_end = %window.end,
            "Order search complete"
        );

        Ok(qualifying)
    }

    /// Most recent unrefunded order inside the window.
    pub async fn find_recent_order(
        &self,
        access_token: &str,
        shop: &Shop,
        claimed: DateTime<Utc>,
    ) -> PerkResult<OrderLookup> {
        let orders = self.qualifying_orders(access_token, shop, claimed).await?;
        Ok(orders
            .into_iter()
            .next()
            .map(OrderLookup::Found)
            .unwrap_or(OrderLookup::NotFound))
    }
}
