//! Alpaca REST adapter for the broker port.
//!
//! Transport only: maps the subset of the Alpaca trading API the engine
//! consumes onto [`BrokerPort`]. Retry policy lives at the cycle level, so
//! this adapter reports failures rather than retrying.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{BrokerError, BrokerPort, OrderQueryStatus};
use crate::models::{Activity, ActivityPage, BrokerOrder, BrokerPosition};

/// Alpaca connection configuration.
#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    /// Trading API base URL (paper or live).
    pub base_url: String,
    /// API key.
    pub api_key: String,
    /// API secret.
    pub api_secret: String,
    /// Per-request timeout.
    pub timeout: std::time::Duration,
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://paper-api.alpaca.markets".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            timeout: std::time::Duration::from_secs(10),
        }
    }
}

/// Alpaca implementation of [`BrokerPort`].
#[derive(Debug, Clone)]
pub struct AlpacaBrokerAdapter {
    client: Client,
    config: AlpacaConfig,
}

impl AlpacaBrokerAdapter {
    /// Create a new adapter.
    ///
    /// # Errors
    ///
    /// Returns an error when credentials are missing or the HTTP client
    /// cannot be constructed.
    pub fn new(config: AlpacaConfig) -> Result<Self, BrokerError> {
        if config.api_key.is_empty() || config.api_secret.is_empty() {
            return Err(BrokerError::Auth {
                message: "missing API credentials".to_string(),
            });
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BrokerError::Network {
                message: e.to_string(),
            })?;
        Ok(Self { client, config })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, BrokerError> {
        let url = format!("{}{path}", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .header("APCA-API-KEY-ID", &self.config.api_key)
            .header("APCA-API-SECRET-KEY", &self.config.api_secret)
            .query(query)
            .send()
            .await
            .map_err(|e| BrokerError::Network {
                message: e.to_string(),
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(BrokerError::Auth {
                    message: format!("{path}: {}", response.status()),
                });
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(BrokerError::RateLimited {
                    message: path.to_string(),
                });
            }
            status if !status.is_success() => {
                return Err(BrokerError::Network {
                    message: format!("{path}: {status}"),
                });
            }
            _ => {}
        }

        response.json::<T>().await.map_err(|e| BrokerError::InvalidPayload {
            message: format!("{path}: {e}"),
        })
    }
}

#[async_trait]
impl BrokerPort for AlpacaBrokerAdapter {
    async fn get_orders(
        &self,
        status: OrderQueryStatus,
        limit: usize,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<BrokerOrder>, BrokerError> {
        let mut query = vec![
            ("status", status.as_str().to_string()),
            ("limit", limit.to_string()),
            ("direction", "asc".to_string()),
        ];
        if let Some(after) = after {
            query.push(("updated_after", after.to_rfc3339()));
        }
        let orders: Vec<AlpacaOrder> = self.get_json("/v2/orders", &query).await?;
        Ok(orders.into_iter().map(AlpacaOrder::into_broker_order).collect())
    }

    async fn get_order_by_client_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<BrokerOrder>, BrokerError> {
        let query = vec![("client_order_id", client_order_id.to_string())];
        match self
            .get_json::<AlpacaOrder>("/v2/orders:by_client_order_id", &query)
            .await
        {
            Ok(order) => Ok(Some(order.into_broker_order())),
            // Alpaca reports an unknown client order ID as 404.
            Err(BrokerError::Network { message }) if message.contains("404") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_account_activities(
        &self,
        activity_type: &str,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
        page_size: usize,
        page_token: Option<String>,
    ) -> Result<ActivityPage, BrokerError> {
        let mut query = vec![
            ("after", after.to_rfc3339()),
            ("until", until.to_rfc3339()),
            ("page_size", page_size.to_string()),
            ("direction", "asc".to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("page_token", token));
        }
        let path = format!("/v2/account/activities/{activity_type}");
        let raw: Vec<AlpacaActivity> = self.get_json(&path, &query).await?;

        // Alpaca pages by activity ID: the last ID of a full page is the
        // cursor for the next one.
        let next_page_token = if raw.len() == page_size {
            raw.last().map(|a| a.id.clone())
        } else {
            None
        };
        let activities = raw.into_iter().map(AlpacaActivity::into_activity).collect();
        Ok(ActivityPage {
            activities,
            next_page_token,
        })
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let positions: Vec<AlpacaPosition> = self.get_json("/v2/positions", &[]).await?;
        Ok(positions
            .into_iter()
            .map(|p| BrokerPosition {
                symbol: p.symbol,
                qty: p.qty,
                avg_entry_price: p.avg_entry_price,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AlpacaOrder {
    id: String,
    client_order_id: String,
    symbol: String,
    status: String,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    filled_qty: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    filled_avg_price: Option<Decimal>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    filled_at: Option<DateTime<Utc>>,
}

impl AlpacaOrder {
    fn into_broker_order(self) -> BrokerOrder {
        BrokerOrder {
            broker_order_id: self.id,
            client_order_id: self.client_order_id,
            symbol: self.symbol,
            status: self.status,
            filled_qty: self.filled_qty.unwrap_or(Decimal::ZERO),
            filled_avg_price: self.filled_avg_price,
            updated_at: self.updated_at,
            created_at: self.created_at,
            filled_at: self.filled_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AlpacaActivity {
    id: String,
    activity_type: String,
    order_id: String,
    symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
    transaction_time: DateTime<Utc>,
}

impl AlpacaActivity {
    fn into_activity(self) -> Activity {
        Activity {
            id: self.id,
            activity_type: self.activity_type,
            broker_order_id: self.order_id,
            symbol: self.symbol,
            qty: self.qty,
            price: self.price,
            transaction_time: self.transaction_time,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AlpacaPosition {
    symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    avg_entry_price: Decimal,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn adapter_for(server: &MockServer) -> AlpacaBrokerAdapter {
        AlpacaBrokerAdapter::new(AlpacaConfig {
            base_url: server.uri(),
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let result = AlpacaBrokerAdapter::new(AlpacaConfig::default());
        assert!(matches!(result, Err(BrokerError::Auth { .. })));
    }

    #[tokio::test]
    async fn test_get_orders_parses_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/orders"))
            .and(query_param("status", "open"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "id": "bkr-1",
                "client_order_id": "ord-1",
                "symbol": "AAPL",
                "status": "partially_filled",
                "filled_qty": "40",
                "filled_avg_price": "189.20",
                "created_at": "2024-01-02T14:30:00Z",
                "updated_at": "2024-01-02T14:35:00Z",
                "filled_at": null
            }])))
            .mount(&server)
            .await;

        let orders = adapter_for(&server)
            .get_orders(OrderQueryStatus::Open, 500, None)
            .await
            .unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].client_order_id, "ord-1");
        assert_eq!(orders[0].filled_qty, dec!(40));
        assert!(orders[0].updated_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_client_order_id_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/orders:by_client_order_id"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let found = adapter_for(&server)
            .get_order_by_client_id("ghost")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_auth_failure_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/positions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = adapter_for(&server).get_positions().await;
        assert!(matches!(result, Err(BrokerError::Auth { .. })));
    }

    #[tokio::test]
    async fn test_full_activity_page_yields_cursor() {
        let server = MockServer::start().await;
        let body: Vec<_> = (0..2)
            .map(|i| {
                serde_json::json!({
                    "id": format!("act-{i}"),
                    "activity_type": "FILL",
                    "order_id": "bkr-1",
                    "symbol": "AAPL",
                    "qty": "50",
                    "price": "189.20",
                    "transaction_time": "2024-01-02T14:35:00Z"
                })
            })
            .collect();
        Mock::given(method("GET"))
            .and(path("/v2/account/activities/FILL"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let page = adapter_for(&server)
            .get_account_activities("FILL", Utc::now(), Utc::now(), 2, None)
            .await
            .unwrap();
        assert_eq!(page.activities.len(), 2);
        assert_eq!(page.next_page_token.as_deref(), Some("act-1"));
    }
}
