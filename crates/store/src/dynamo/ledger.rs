//! Plans and rewards.

use super::*;
use crate::documents::{PlanStore, RedeemOutcome, RewardStore};
use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::ReturnValue;
use perk_core::ledger::{LedgerDelta, Plan, Reward, RewardCategory};
use tracing::debug;

fn plan_to_item(plan: &Plan) -> Item {
    let mut item = Item::new();
    item.insert("user_id".into(), s(&plan.user_id));
    item.insert("org_id".into(), s(&plan.org_id));
    item.insert("plan_id".into(), s(&plan.plan_id));
    item.insert("visits".into(), n(plan.visits));
    item.insert("visits_total".into(), n(plan.visits_total));
    item.insert("points".into(), n(plan.points));
    item.insert("points_total".into(), n(plan.points_total));
    item.insert("start_date".into(), time(plan.start_date));
    item
}

fn plan_from_item(item: &Item) -> PerkResult<Plan> {
    Ok(Plan {
        plan_id: req_s(item, "plan_id")?,
        user_id: req_s(item, "user_id")?,
        org_id: req_s(item, "org_id")?,
        visits: opt_n(item, "visits").unwrap_or(0),
        visits_total: opt_n(item, "visits_total").unwrap_or(0),
        points: opt_n(item, "points").unwrap_or(0),
        points_total: opt_n(item, "points_total").unwrap_or(0),
        start_date: req_time(item, "start_date")?,
    })
}

fn reward_to_item(reward: &Reward) -> Item {
    let mut item = Item::new();
    item.insert("plan_id".into(), s(&reward.plan_id));
    item.insert("id".into(), s(&reward.id));
    item.insert("reward_id".into(), s(&reward.reward_id));
    item.insert("category".into(), s(reward.category.as_str()));
    item.insert("active".into(), n(u8::from(reward.active)));
    item.insert("issued_at".into(), time(reward.issued_at));
    put_opt(&mut item, "redeemed_at", reward.redeemed_at.map(time));
    item
}

fn reward_from_item(item: &Item) -> PerkResult<Reward> {
    let raw_category = req_s(item, "category")?;
    let category = RewardCategory::parse(&raw_category)
        .ok_or_else(|| PerkError::Storage(format!("unknown reward category '{raw_category}'")))?;
    Ok(Reward {
        id: req_s(item, "id")?,
        plan_id: req_s(item, "plan_id")?,
        reward_id: req_s(item, "reward_id")?,
        category,
        active: opt_n::<u8>(item, "active").unwrap_or(0) == 1,
        issued_at: req_time(item, "issued_at")?,
        redeemed_at: opt_time(item, "redeemed_at"),
    })
}

#[async_trait]
impl PlanStore for DynamoStore {
    async fn get_plan(&self, user_id: &str, org_id: &str) -> PerkResult<Option<Plan>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.plans_table)
            .key("user_id", s(user_id))
            .key("org_id", s(org_id))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| storage("get plan", DisplayErrorContext(e)))?;

        output.item().map(plan_from_item).transpose()
    }

    async fn create_plan_if_absent(&self, plan: Plan) -> PerkResult<Plan> {
        let result = self
            .client
            .put_item()
            .table_name(&self.plans_table)
            .set_item(Some(plan_to_item(&plan)))
            .condition_expression("attribute_not_exists(user_id)")
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!(user_id = %plan.user_id, org_id = %plan.org_id, plan_id = %plan.plan_id, "Plan created");
                Ok(plan)
            }
            Err(err) => {
                let exists = err
                    .as_service_error()
                    .map(|e| e.is_conditional_check_failed_exception())
                    .unwrap_or(false);
                if !exists {
                    return Err(storage("create plan", DisplayErrorContext(err)));
                }
                self.get_plan(&plan.user_id, &plan.org_id)
                    .await?
                    .ok_or_else(|| {
                        PerkError::StorageConflict(format!(
                            "plan for user {} org {} vanished after conditional create",
                            plan.user_id, plan.org_id
                        ))
                    })
            }
        }
    }

    async fn increment_plan(
        &self,
        user_id: &str,
        org_id: &str,
        delta: LedgerDelta,
    ) -> PerkResult<Option<Plan>> {
        // One ADD expression moves current and lifetime counters together.
        let result = self
            .client
            .update_item()
            .table_name(&self.plans_table)
            .key("user_id", s(user_id))
            .key("org_id", s(org_id))
            .update_expression("ADD visits :v, visits_total :v, points :p, points_total :p")
            .condition_expression("attribute_exists(user_id)")
            .expression_attribute_values(":v", n(delta.visits))
            .expression_attribute_values(":p", n(delta.points))
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        let err = match result {
            Ok(output) => return output.attributes().map(plan_from_item).transpose(),
            Err(err) => err,
        };

        let (missing, conflict) = err
            .as_service_error()
            .map(|e| (e.is_conditional_check_failed_exception(), e.is_transaction_conflict_exception()))
            .unwrap_or((false, false));
        if missing {
            Ok(None)
        } else if conflict {
            Err(PerkError::StorageConflict(format!(
                "plan {user_id}/{org_id}: {}",
                DisplayErrorContext(err)
            )))
        } else {
            Err(storage("increment plan", DisplayErrorContext(err)))
        }
    }
}

#[async_trait]
impl RewardStore for DynamoStore {
    async fn put_reward(&self, reward: &Reward) -> PerkResult<()> {
        self.client
            .put_item()
            .table_name(&self.rewards_table)
            .set_item(Some(reward_to_item(reward)))
            .send()
            .await
            .map_err(|e| storage("put reward", DisplayErrorContext(e)))?;
        Ok(())
    }

    async fn rewards_for_plan(&self, plan_id: &str) -> PerkResult<Vec<Reward>> {
        let mut rewards = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let output = self
                .client
                .query()
                .table_name(&self.rewards_table)
                .key_condition_expression("plan_id = :plan")
                .expression_attribute_values(":plan", s(plan_id))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| storage("query rewards", DisplayErrorContext(e)))?;

            for item in output.items() {
                rewards.push(reward_from_item(item)?);
            }

            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        rewards.sort_by(|a, b| a.issued_at.cmp(&b.issued_at));
        Ok(rewards)
    }

    async fn redeem_reward(
        &self,
        plan_id: &str,
        reward_row_id: &str,
        at: DateTime<Utc>,
    ) -> PerkResult<RedeemOutcome> {
        let result = self
            .client
            .update_item()
            .table_name(&self.rewards_table)
            .key("plan_id", s(plan_id))
            .key("id", s(reward_row_id))
            .update_expression("SET active = :zero, redeemed_at = :at")
            .condition_expression("active = :one")
            .expression_attribute_values(":zero", n(0u8))
            .expression_attribute_values(":one", n(1u8))
            .expression_attribute_values(":at", time(at))
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        let err = match result {
            Ok(output) => {
                return match output.attributes() {
                    Some(item) => Ok(RedeemOutcome::Redeemed(reward_from_item(item)?)),
                    None => Err(PerkError::Storage(format!(
                        "redeem of reward {reward_row_id} returned no attributes"
                    ))),
                };
            }
            Err(err) => err,
        };

        let condition_failed = err
            .as_service_error()
            .map(|e| e.is_conditional_check_failed_exception())
            .unwrap_or(false);
        if !condition_failed {
            return Err(storage("redeem reward", DisplayErrorContext(err)));
        }

        let existing = self
            .client
            .get_item()
            .table_name(&self.rewards_table)
            .key("plan_id", s(plan_id))
            .key("id", s(reward_row_id))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| storage("get reward", DisplayErrorContext(e)))?;

        Ok(match existing.item() {
            Some(_) => RedeemOutcome::AlreadyRedeemed,
            None => RedeemOutcome::Missing,
        })
    }
}
