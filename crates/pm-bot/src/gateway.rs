//! Outbound trading gateway contracts.
//!
//! The `TradingGateway` trait abstracts the three calls the engine makes:
//! order submission, batched position query, and market-constraints
//! lookup. `HttpGateway` is the live REST implementation; tests swap in a
//! mock. Retries belong to callers (rules treat a failure as "try again
//! next tick"), so the gateway never retries internally.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use pm_core::{OrderType, PositionSide, Side};

/// Default request timeout for gateway calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the trading gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The venue rejected the request (validation failure).
    #[error("venue rejected the request: {message} (status {status})")]
    Venue { status: u16, message: String },

    /// The bearer token was missing or invalid.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Network-level failure (or venue-side 5xx).
    #[error("transport error: {0}")]
    Transport(String),

    /// Response arrived but could not be decoded.
    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// True for failures where nothing reached the venue's matching
    /// logic for certain.
    pub fn is_transport(&self) -> bool {
        matches!(self, GatewayError::Transport(_))
    }
}

/// One order, built immediately before submission and then discarded.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// Client-side request ID for log correlation.
    pub request_id: String,
    /// Token being traded.
    pub token_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub order_type: OrderType,
    /// Routing/proxy address the venue settles against.
    pub proxy_address: String,
}

/// Acknowledgement of an accepted order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderAck {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub filled_price: Option<Decimal>,
    #[serde(default)]
    pub filled_size: Option<Decimal>,
}

/// Venue-imposed limits for one token.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketConstraints {
    /// Minimum order size in shares.
    pub minimum_order_size: Decimal,
    /// Price increment, when the venue reports one.
    #[serde(default)]
    pub minimum_tick_size: Option<Decimal>,
}

/// The engine's view of the outside trading world.
#[async_trait]
pub trait TradingGateway: Send + Sync + 'static {
    /// Submit one order. Never retried internally.
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError>;

    /// Fetch current holdings for the given outcomes of one market.
    async fn fetch_positions(
        &self,
        condition_id: &str,
        outcomes: &[String],
    ) -> Result<Vec<PositionSide>, GatewayError>;

    /// Fetch venue limits for one token.
    async fn market_constraints(&self, token_id: &str)
        -> Result<MarketConstraints, GatewayError>;
}

#[derive(Serialize)]
struct OrderBody<'a> {
    token_id: &'a str,
    side: &'a str,
    price: Decimal,
    size: Decimal,
    order_type: String,
    proxy_address: &'a str,
}

#[derive(Serialize)]
struct PositionsBody<'a> {
    condition_id: &'a str,
    outcomes: &'a [String],
}

#[derive(Deserialize)]
struct PositionsResponse {
    sides: Vec<PositionSide>,
}

/// REST implementation of the trading gateway.
pub struct HttpGateway {
    http: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpGateway {
    /// Create a gateway client against `base_url`.
    ///
    /// The bearer token is optional here; submissions without one are
    /// stopped earlier by the order gate, and the venue answers 401 for
    /// anything that slips through.
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn read_failure(status: StatusCode, response: reqwest::Response) -> GatewayError {
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Unauthorized(body),
            s if s.is_client_error() => GatewayError::Venue {
                status: s.as_u16(),
                message: body,
            },
            s => GatewayError::Transport(format!("status {s}: {body}")),
        }
    }
}

#[async_trait]
impl TradingGateway for HttpGateway {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError> {
        let body = OrderBody {
            token_id: &request.token_id,
            side: match request.side {
                Side::Buy => "BUY",
                Side::Sell => "SELL",
            },
            price: request.price,
            size: request.size,
            order_type: request.order_type.to_string(),
            proxy_address: &request.proxy_address,
        };

        debug!(
            request_id = %request.request_id,
            token = %request.token_id,
            side = %request.side,
            "submitting order"
        );

        let response = self
            .request(self.http.post(format!("{}/orders", self.base_url)))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::read_failure(status, response).await);
        }

        response
            .json::<OrderAck>()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))
    }

    async fn fetch_positions(
        &self,
        condition_id: &str,
        outcomes: &[String],
    ) -> Result<Vec<PositionSide>, GatewayError> {
        let body = PositionsBody {
            condition_id,
            outcomes,
        };

        let response = self
            .request(self.http.post(format!("{}/positions/market", self.base_url)))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::read_failure(status, response).await);
        }

        response
            .json::<PositionsResponse>()
            .await
            .map(|r| r.sides)
            .map_err(|e| GatewayError::Malformed(e.to_string()))
    }

    async fn market_constraints(
        &self,
        token_id: &str,
    ) -> Result<MarketConstraints, GatewayError> {
        let response = self
            .request(self.http.get(format!("{}/market/{token_id}", self.base_url)))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::read_failure(status, response).await);
        }

        response
            .json::<MarketConstraints>()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_body_serialization() {
        let body = OrderBody {
            token_id: "token1",
            side: "BUY",
            price: dec!(0.45),
            size: dec!(22.2),
            order_type: OrderType::Gtc.to_string(),
            proxy_address: "0xproxy",
        };

        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"side\":\"BUY\""));
        assert!(json.contains("\"order_type\":\"GTC\""));
        assert!(json.contains("\"proxy_address\":\"0xproxy\""));
    }

    #[test]
    fn test_order_ack_tolerates_partial_payloads() {
        let ack: OrderAck = serde_json::from_str("{}").unwrap();
        assert!(ack.order_id.is_none());

        let ack: OrderAck =
            serde_json::from_str(r#"{"order_id": "o1", "filled_price": "0.45"}"#).unwrap();
        assert_eq!(ack.order_id.as_deref(), Some("o1"));
        assert_eq!(ack.filled_price, Some(dec!(0.45)));
        assert!(ack.filled_size.is_none());
    }

    #[test]
    fn test_market_constraints_parsing() {
        let constraints: MarketConstraints =
            serde_json::from_str(r#"{"minimum_order_size": "5", "minimum_tick_size": "0.01"}"#)
                .unwrap();
        assert_eq!(constraints.minimum_order_size, dec!(5));
        assert_eq!(constraints.minimum_tick_size, Some(dec!(0.01)));

        let constraints: MarketConstraints =
            serde_json::from_str(r#"{"minimum_order_size": 1}"#).unwrap();
        assert_eq!(constraints.minimum_order_size, dec!(1));
        assert!(constraints.minimum_tick_size.is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let gateway = HttpGateway::new("http://localhost:8000/api/", None);
        assert_eq!(gateway.base_url, "http://localhost:8000/api");
    }

    #[test]
    fn test_transport_classification() {
        let err = GatewayError::Transport("connection refused".to_string());
        assert!(err.is_transport());
        let err = GatewayError::Venue {
            status: 400,
            message: "bad price".to_string(),
        };
        assert!(!err.is_transport());
    }
}
