//! Organizations and shops.

use super::*;
use crate::documents::{OrganizationStore, ShopStore};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::ReturnValue;
use perk_core::types::{Organization, ProviderLink, Shop};
use tracing::debug;

fn organization_to_item(org: &Organization) -> PerkResult<Item> {
    let mut item = Item::new();
    item.insert("id".into(), s(&org.id));
    item.insert("owner_id".into(), s(&org.owner_id));
    item.insert("name".into(), s(&org.name));
    item.insert(
        "images".into(),
        AttributeValue::L(org.images.iter().map(s).collect()),
    );
    put_opt(&mut item, "access_token", org.provider.access_token.as_ref().map(s));
    put_opt(&mut item, "refresh_token", org.provider.refresh_token.as_ref().map(s));
    put_opt(&mut item, "expires_at", org.provider.expires_at.map(time));
    item.insert("linked".into(), flag(org.provider.linked));
    put_opt(
        &mut item,
        "payment_provider_customer_id",
        org.payment_provider_customer_id.as_ref().map(s),
    );
    item.insert("active".into(), flag(org.active));
    item.insert("loyalty_active".into(), flag(org.loyalty_active));
    item.insert("milestone_active".into(), flag(org.milestone_active));
    item.insert("loyalty_config".into(), s(serde_json::to_string(&org.loyalty_config)?));
    item.insert("milestone_config".into(), s(serde_json::to_string(&org.milestone_config)?));
    Ok(item)
}

fn organization_from_item(item: &Item) -> PerkResult<Organization> {
    let images = item
        .get("images")
        .and_then(|v| v.as_l().ok())
        .map(|list| list.iter().filter_map(|v| v.as_s().ok().cloned()).collect())
        .unwrap_or_default();
    let loyalty_config = match opt_s(item, "loyalty_config") {
        Some(raw) => serde_json::from_str(&raw)?,
        None => Default::default(),
    };
    let milestone_config = match opt_s(item, "milestone_config") {
        Some(raw) => serde_json::from_str(&raw)?,
        None => Default::default(),
    };

    Ok(Organization {
        id: req_s(item, "id")?,
        owner_id: req_s(item, "owner_id")?,
        name: opt_s(item, "name").unwrap_or_default(),
        images,
        provider: ProviderLink {
            access_token: opt_s(item, "access_token"),
            refresh_token: opt_s(item, "refresh_token"),
            expires_at: opt_time(item, "expires_at"),
            linked: get_flag(item, "linked"),
        },
        payment_provider_customer_id: opt_s(item, "payment_provider_customer_id"),
        active: get_flag(item, "active"),
        loyalty_active: get_flag(item, "loyalty_active"),
        milestone_active: get_flag(item, "milestone_active"),
        loyalty_config,
        milestone_config,
    })
}

fn shop_to_item(shop: &Shop) -> PerkResult<Item> {
    let mut item = Item::new();
    item.insert("id".into(), s(&shop.id));
    item.insert("org_id".into(), s(&shop.org_id));
    item.insert("name".into(), s(&shop.name));
    item.insert("latitude".into(), n(shop.latitude));
    item.insert("longitude".into(), n(shop.longitude));
    if let Some(hours) = &shop.shop_hours {
        item.insert("shop_hours".into(), s(serde_json::to_string(hours)?));
    }
    put_opt(&mut item, "square_location_id", shop.square_location_id.as_ref().map(s));
    item.insert("active".into(), flag(shop.active));
    Ok(item)
}

fn shop_from_item(item: &Item) -> PerkResult<Shop> {
    let shop_hours = match opt_s(item, "shop_hours") {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };
    Ok(Shop {
        id: req_s(item, "id")?,
        org_id: req_s(item, "org_id")?,
        name: opt_s(item, "name").unwrap_or_default(),
        latitude: req_n(item, "latitude")?,
        longitude: req_n(item, "longitude")?,
        shop_hours,
        square_location_id: opt_s(item, "square_location_id"),
        active: get_flag(item, "active"),
    })
}

#[async_trait]
impl OrganizationStore for DynamoStore {
    async fn get_organization(&self, org_id: &str) -> PerkResult<Option<Organization>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.organizations_table)
            .key("id", s(org_id))
            .send()
            .await
            .map_err(|e| storage("get organization", aws_sdk_dynamodb::error::DisplayErrorContext(e)))?;

        output.item().map(organization_from_item).transpose()
    }

    async fn put_organization(&self, organization: &Organization) -> PerkResult<()> {
        self.client
            .put_item()
            .table_name(&self.organizations_table)
            .set_item(Some(organization_to_item(organization)?))
            .send()
            .await
            .map_err(|e| storage("put organization", aws_sdk_dynamodb::error::DisplayErrorContext(e)))?;
        Ok(())
    }

    async fn unlink_organization(&self, org_id: &str) -> PerkResult<Option<Organization>> {
        let result = self
            .client
            .update_item()
            .table_name(&self.organizations_table)
            .key("id", s(org_id))
            .update_expression(
                "SET linked = :off, active = :off REMOVE access_token, refresh_token, expires_at",
            )
            .condition_expression("attribute_exists(id)")
            .expression_attribute_values(":off", flag(false))
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        match result {
            Ok(output) => {
                debug!(org_id = org_id, "Organization unlinked in document store");
                output.attributes().map(organization_from_item).transpose()
            }
            Err(err) => {
                let missing = err
                    .as_service_error()
                    .map(|e| e.is_conditional_check_failed_exception())
                    .unwrap_or(false);
                if missing {
                    Ok(None)
                } else {
                    Err(storage("unlink organization", aws_sdk_dynamodb::error::DisplayErrorContext(err)))
                }
            }
        }
    }
}

#[async_trait]
impl ShopStore for DynamoStore {
    async fn get_shop(&self, shop_id: &str) -> PerkResult<Option<Shop>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.shops_table)
            .key("id", s(shop_id))
            .send()
            .await
            .map_err(|e| storage("get shop", aws_sdk_dynamodb::error::DisplayErrorContext(e)))?;

        output.item().map(shop_from_item).transpose()
    }

    async fn put_shop(&self, shop: &Shop) -> PerkResult<()> {
        self.client
            .put_item()
            .table_name(&self.shops_table)
            .set_item(Some(shop_to_item(shop)?))
            .send()
            .await
            .map_err(|e| storage("put shop", aws_sdk_dynamodb::error::DisplayErrorContext(e)))?;
        Ok(())
    }
}
