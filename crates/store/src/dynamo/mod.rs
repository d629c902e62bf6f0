//! DynamoDB document store.
//!
//! Table schemas:
//! - organizations: PK `id`
//! - shops: PK `id`
//! - visits: PK `id`; an `order#{order_id}` guard item per visit enforces
//!   one visit per point-of-sale order
//! - plans: PK `user_id`, SK `org_id`
//! - rewards: PK `plan_id`, SK `id`; `active` is 1 (redeemable) or 0 (redeemed)

mod catalog;
mod ledger;
mod visits;

use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use perk_core::config::StorageConfig;
use perk_core::{PerkError, PerkResult};
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use tracing::info;

type Item = HashMap<String, AttributeValue>;

/// DynamoDB implementation of every document-store trait.
pub struct DynamoStore {
    client: Client,
    organizations_table: String,
    shops_table: String,
    visits_table: String,
    plans_table: String,
    rewards_table: String,
}

impl DynamoStore {
    pub fn new(config: &StorageConfig, sdk_config: &aws_config::SdkConfig) -> Self {
        let client = if let Some(endpoint) = config.endpoint_url.as_deref() {
            let dynamo_config = aws_sdk_dynamodb::config::Builder::from(sdk_config)
                .endpoint_url(endpoint)
                .build();
            Client::from_conf(dynamo_config)
        } else {
            Client::new(sdk_config)
        };

        info!(
            organizations = %config.organizations_table,
            shops = %config.shops_table,
            visits = %config.visits_table,
            plans = %config.plans_table,
            rewards = %config.rewards_table,
            "Connected to DynamoDB document store"
        );

        Self {
            client,
            organizations_table: config.organizations_table.clone(),
            shops_table: config.shops_table.clone(),
            visits_table: config.visits_table.clone(),
            plans_table: config.plans_table.clone(),
            rewards_table: config.rewards_table.clone(),
        }
    }
}

// ─── Attribute Helpers ──────────────────────────────────────────────────────

fn storage(context: &str, err: impl Display) -> PerkError {
    PerkError::Storage(format!("{context}: {err}"))
}

fn s(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}

fn n(value: impl ToString) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

fn flag(value: bool) -> AttributeValue {
    AttributeValue::Bool(value)
}

fn time(value: DateTime<Utc>) -> AttributeValue {
    AttributeValue::S(value.to_rfc3339())
}

fn put_opt(item: &mut Item, key: &str, value: Option<AttributeValue>) {
    if let Some(value) = value {
        item.insert(key.to_string(), value);
    }
}

fn opt_s(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).cloned()
}

fn req_s(item: &Item, key: &str) -> PerkResult<String> {
    opt_s(item, key).ok_or_else(|| PerkError::Storage(format!("item is missing string attribute '{key}'")))
}

fn opt_n<T: FromStr>(item: &Item, key: &str) -> Option<T> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|raw| raw.parse().ok())
}

fn req_n<T: FromStr>(item: &Item, key: &str) -> PerkResult<T> {
    opt_n(item, key).ok_or_else(|| PerkError::Storage(format!("item is missing numeric attribute '{key}'")))
}

fn get_flag(item: &Item, key: &str) -> bool {
    item.get(key)
        .and_then(|v| v.as_bool().ok())
        .copied()
        .unwrap_or(false)
}

fn opt_time(item: &Item, key: &str) -> Option<DateTime<Utc>> {
    opt_s(item, key)
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn req_time(item: &Item, key: &str) -> PerkResult<DateTime<Utc>> {
    opt_time(item, key).ok_or_else(|| PerkError::Storage(format!("item is missing timestamp attribute '{key}'")))
}
