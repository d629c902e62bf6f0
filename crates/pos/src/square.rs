//! Square REST client: order search and token revocation.

use crate::provider::{LookbackWindow, PosProvider};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use perk_core::config::SquareConfig;
use perk_core::visit::{Order, OrderRefund};
use perk_core::{PerkError, PerkResult};
use perk_secrets::ProviderKeys;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct SquareClient {
    http: reqwest::Client,
    base_url: String,
    api_version: String,
    search_limit: u32,
}

impl SquareClient {
    pub fn new(config: &SquareConfig) -> PerkResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| PerkError::Config(format!("failed to build Square HTTP client: {e}")))?;

        info!(base_url = %config.base_url, api_version = %config.api_version, "Square client initialized");

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            search_limit: config.search_limit,
        })
    }

    fn search_body<'a>(&self, location_id: &'a str, window: &LookbackWindow) -> SearchOrdersRequest<'a> {
        SearchOrdersRequest {
            location_ids: [location_id],
            query: SearchQuery {
                filter: SearchFilter {
                    date_time_filter: DateTimeFilter {
                        created_at: TimeRange {
                            start_at: window.start.to_rfc3339_opts(SecondsFormat::Millis, true),
                            end_at: window.end.to_rfc3339_opts(SecondsFormat::Millis, true),
                        },
                    },
                },
                sort: SearchSort {
                    sort_field: "CREATED_AT",
                    sort_order: "DESC",
                },
            },
            limit: self.search_limit,
            return_entries: false,
        }
    }
}

fn upstream(context: &str, err: reqwest::Error) -> PerkError {
    if err.is_timeout() {
        PerkError::UpstreamProvider(format!("{context}: request timed out"))
    } else {
        PerkError::UpstreamProvider(format!("{context}: {err}"))
    }
}

#[async_trait]
impl PosProvider for SquareClient {
    fn name(&self) -> &'static str {
        "square"
    }

    async fn search_orders(
        &self,
        access_token: &str,
        location_id: &str,
        window: &LookbackWindow,
    ) -> PerkResult<Vec<Order>> {
        let url = format!("{}/v2/orders/search", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .header("Square-Version", &self.api_version)
            .json(&self.search_body(location_id, window))
            .send()
            .await
            .map_err(|e| upstream("order search", e))?;

        let status = response.status();
        let body: SearchOrdersResponse = response
            .json()
            .await
            .map_err(|e| upstream("order search response", e))?;

        if !status.is_success() || !body.errors.is_empty() {
            let codes: Vec<&str> = body.errors.iter().map(|e| e.code.as_str()).collect();
            warn!(status = %status, codes = ?codes, location_id = location_id, "Square order search rejected");
            return Err(PerkError::UpstreamProvider(format!(
                "order search returned {status} {codes:?}"
            )));
        }

        debug!(location_id = location_id, count = body.orders.len(), "Square orders returned");
        Ok(body.orders.into_iter().map(SquareOrder::into_order).collect())
    }

    async fn revoke_access(&self, keys: &ProviderKeys, access_token: &str) -> PerkResult<()> {
        let url = format!("{}/oauth2/revoke", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Client {}", keys.client_secret))
            .header("Square-Version", &self.api_version)
            .json(&RevokeTokenRequest {
                client_id: &keys.client_id,
                access_token,
            })
            .send()
            .await
            .map_err(|e| upstream("token revoke", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PerkError::UpstreamProvider(format!("token revoke returned {status}")));
        }
        Ok(())
    }
}

// ─── Wire Types ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SearchOrdersRequest<'a> {
    location_ids: [&'a str; 1],
    query: SearchQuery,
    limit: u32,
    return_entries: bool,
}

#[derive(Debug, Serialize)]
struct SearchQuery {
    filter: SearchFilter,
    sort: SearchSort,
}

#[derive(Debug, Serialize)]
struct SearchFilter {
    date_time_filter: DateTimeFilter,
}

#[derive(Debug, Serialize)]
struct DateTimeFilter {
    created_at: TimeRange,
}

#[derive(Debug, Serialize)]
struct TimeRange {
    start_at: String,
    end_at: String,
}

#[derive(Debug, Serialize)]
struct SearchSort {
    sort_field: &'static str,
    sort_order: &'static str,
}

#[derive(Debug, Serialize)]
struct RevokeTokenRequest<'a> {
    client_id: &'a str,
    access_token: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct SearchOrdersResponse {
    #[serde(default)]
    orders: Vec<SquareOrder>,
    #[serde(default)]
    errors: Vec<SquareApiError>,
}

#[derive(Debug, Deserialize)]
struct SquareApiError {
    #[serde(default)]
    code: String,
}

#[derive(Debug, Deserialize)]
struct SquareOrder {
    id: String,
    location_id: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    total_money: Option<Money>,
    #[serde(default)]
    refunds: Vec<SquareRefund>,
}

#[derive(Debug, Deserialize)]
struct Money {
    #[serde(default)]
    amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SquareRefund {
    id: String,
    #[serde(default)]
    amount_money: Option<Money>,
}

impl SquareOrder {
    fn into_order(self) -> Order {
        Order {
            id: self.id,
            location_id: self.location_id,
            created_at: self.created_at,
            total_minor_units: self.total_money.and_then(|m| m.amount),
            refunds: self
                .refunds
                .into_iter()
                .map(|r| OrderRefund {
                    id: r.id,
                    amount_minor_units: r.amount_money.and_then(|m| m.amount),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_search_body_shape() {
        let client = SquareClient::new(&SquareConfig::default()).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let window = LookbackWindow::ending_at(end, chrono::Duration::minutes(3));

        let body = serde_json::to_value(client.search_body("LOC1", &window)).unwrap();
        assert_eq!(body["location_ids"][0], "LOC1");
        assert_eq!(
            body["query"]["filter"]["date_time_filter"]["created_at"]["start_at"],
            "2024-01-01T11:57:00.000Z"
        );
        assert_eq!(
            body["query"]["filter"]["date_time_filter"]["created_at"]["end_at"],
            "2024-01-01T12:00:00.000Z"
        );
        assert_eq!(body["query"]["sort"]["sort_field"], "CREATED_AT");
        assert_eq!(body["query"]["sort"]["sort_order"], "DESC");
        assert_eq!(body["limit"], 20);
    }

    #[test]
    fn test_response_conversion() {
        let raw = r#"{
            "orders": [
                {
                    "id": "ord-1",
                    "location_id": "LOC1",
                    "created_at": "2024-01-01T11:58:30.000Z",
                    "total_money": {"amount": 2500, "currency": "USD"},
                    "state": "COMPLETED"
                },
                {
                    "id": "ord-2",
                    "location_id": "LOC1",
                    "created_at": "2024-01-01T11:59:00Z",
                    "refunds": [{"id": "r-1", "amount_money": {"amount": 500, "currency": "USD"}}]
                }
            ]
        }"#;
        let parsed: SearchOrdersResponse = serde_json::from_str(raw).unwrap();
        let orders: Vec<Order> = parsed.orders.into_iter().map(SquareOrder::into_order).collect();

        assert_eq!(orders[0].total_minor_units, Some(2500));
        assert!(!orders[0].is_refunded());
        assert_eq!(orders[1].total_minor_units, None);
        assert!(orders[1].is_refunded());
        assert_eq!(orders[1].refunds[0].amount_minor_units, Some(500));
    }

    #[test]
    fn test_empty_response_has_no_orders() {
        let parsed: SearchOrdersResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.orders.is_empty());
        assert!(parsed.errors.is_empty());
    }
}
