//! Scripted provider for development mode and tests.
//!
//! Returns every order seeded for a location, in insertion order, leaving
//! window and refund enforcement to the verifier.

use crate::provider::{LookbackWindow, PosProvider};
use async_trait::async_trait;
use dashmap::DashMap;
use perk_core::visit::Order;
use perk_core::{PerkError, PerkResult};
use perk_secrets::ProviderKeys;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
pub struct ScriptedPosProvider {
    orders: DashMap<String, Vec<Order>>,
    pending_failures: AtomicUsize,
    delay_ms: AtomicU64,
    searches: AtomicUsize,
    revocations: AtomicUsize,
}

impl ScriptedPosProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_order(&self, order: Order) {
        self.orders
            .entry(order.location_id.clone())
            .or_default()
            .push(order);
    }

    /// Fail the next `count` searches with an upstream error.
    pub fn fail_next(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Sleep before answering each search.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn revocations(&self) -> usize {
        self.revocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PosProvider for ScriptedPosProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn search_orders(
        &self,
        _access_token: &str,
        location_id: &str,
        window: &LookbackWindow,
    ) -> PerkResult<Vec<Order>> {
        self.searches.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let failing = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PerkError::UpstreamProvider("scripted failure".to_string()));
        }

        let orders = self
            .orders
            .get(location_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        debug!(location_id = location_id, start = %window.start, end = %window.end, count = orders.len(), "Scripted order search");
        Ok(orders)
    }

    async fn revoke_access(&self, _keys: &ProviderKeys, _access_token: &str) -> PerkResult<()> {
        self.revocations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
