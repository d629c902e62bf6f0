//! Append-only visit records.

use super::*;
use crate::documents::{InsertOutcome, VisitStore};
use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{Put, TransactWriteItem};
use perk_core::visit::Visit;
use tracing::{debug, warn};

fn order_guard_key(order_id: &str) -> String {
    format!("order#{order_id}")
}

fn visit_to_item(visit: &Visit) -> Item {
    let mut item = Item::new();
    item.insert("id".into(), s(&visit.id));
    item.insert("user_id".into(), s(&visit.user_id));
    item.insert("shop_id".into(), s(&visit.shop_id));
    item.insert("org_id".into(), s(&visit.org_id));
    item.insert("order_id".into(), s(&visit.order_id));
    item.insert("visit_timestamp".into(), time(visit.visit_timestamp));
    put_opt(&mut item, "total", visit.total.map(n));
    item.insert("loyalty_active_at_visit".into(), flag(visit.loyalty_active_at_visit));
    item.insert("milestone_active_at_visit".into(), flag(visit.milestone_active_at_visit));
    item
}

fn visit_from_item(item: &Item) -> PerkResult<Visit> {
    Ok(Visit {
        id: req_s(item, "id")?,
        user_id: req_s(item, "user_id")?,
        shop_id: req_s(item, "shop_id")?,
        org_id: req_s(item, "org_id")?,
        order_id: req_s(item, "order_id")?,
        visit_timestamp: req_time(item, "visit_timestamp")?,
        total: opt_n(item, "total"),
        loyalty_active_at_visit: get_flag(item, "loyalty_active_at_visit"),
        milestone_active_at_visit: get_flag(item, "milestone_active_at_visit"),
    })
}

fn guarded_put(table: &str, item: Item) -> PerkResult<TransactWriteItem> {
    let put = Put::builder()
        .table_name(table)
        .set_item(Some(item))
        .condition_expression("attribute_not_exists(id)")
        .build()
        .map_err(|e| storage("build visit put", e))?;
    Ok(TransactWriteItem::builder().put(put).build())
}

impl DynamoStore {
    async fn get_visit_item(&self, id: &str) -> PerkResult<Option<Item>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.visits_table)
            .key("id", s(id))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| storage("get visit", DisplayErrorContext(e)))?;
        Ok(output.item().cloned())
    }
}

#[async_trait]
impl VisitStore for DynamoStore {
    async fn insert_visit(&self, visit: &Visit) -> PerkResult<InsertOutcome> {
        let mut guard = Item::new();
        guard.insert("id".into(), s(order_guard_key(&visit.order_id)));
        guard.insert("visit_id".into(), s(&visit.id));

        let result = self
            .client
            .transact_write_items()
            .transact_items(guarded_put(&self.visits_table, visit_to_item(visit))?)
            .transact_items(guarded_put(&self.visits_table, guard)?)
            .send()
            .await;

        let err = match result {
            Ok(_) => {
                debug!(visit_id = %visit.id, order_id = %visit.order_id, "Visit stored");
                return Ok(InsertOutcome::Inserted);
            }
            Err(err) => err,
        };

        let canceled = err
            .as_service_error()
            .map(|e| e.is_transaction_canceled_exception())
            .unwrap_or(false);
        if !canceled {
            return Err(storage("insert visit", DisplayErrorContext(err)));
        }

        // A condition failed: either this id or this order is already taken.
        if let Some(existing) = self.get_visit(&visit.id).await? {
            return Ok(InsertOutcome::Duplicate(existing));
        }
        if let Some(existing) = self.visit_for_order(&visit.order_id).await? {
            return Ok(InsertOutcome::Duplicate(existing));
        }

        warn!(visit_id = %visit.id, "Visit transaction canceled without a conflicting record");
        Err(PerkError::StorageConflict(format!(
            "visit {} insert canceled: {}",
            visit.id,
            DisplayErrorContext(err)
        )))
    }

    async fn get_visit(&self, visit_id: &str) -> PerkResult<Option<Visit>> {
        self.get_visit_item(visit_id)
            .await?
            .as_ref()
            .map(visit_from_item)
            .transpose()
    }

    async fn visit_for_order(&self, order_id: &str) -> PerkResult<Option<Visit>> {
        let Some(guard) = self.get_visit_item(&order_guard_key(order_id)).await? else {
            return Ok(None);
        };
        let visit_id = req_s(&guard, "visit_id")?;
        self.get_visit(&visit_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_visit_item_round_trip_keeps_missing_total() {
        let visit = Visit {
            id: "v1".into(),
            user_id: "u1".into(),
            shop_id: "s1".into(),
            org_id: "o1".into(),
            order_id: "ord-1".into(),
            visit_timestamp: Utc::now(),
            total: None,
            loyalty_active_at_visit: true,
            milestone_active_at_visit: false,
        };
        let item = visit_to_item(&visit);
        assert!(!item.contains_key("total"));

        let back = visit_from_item(&item).unwrap();
        assert_eq!(back.total, None);
        assert!(back.loyalty_active_at_visit);
        assert_eq!(order_guard_key(&back.order_id), "order#ord-1");
    }
}
