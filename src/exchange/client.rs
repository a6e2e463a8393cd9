//! REST client for the exchange.
//!
//! Public endpoints carry market data; order endpoints are signed with
//! HMAC-SHA256 over the query string.

use crate::config::ExchangeConfig;
use crate::exchange::traits::{ExecutionClient, MarketData};
use crate::exchange::types::*;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Response, StatusCode};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

/// Thin REST wrapper over the exchange HTTP API.
pub struct ExchangeClient {
    http: Client,
    base_url: String,
    api_key: String,
    secret_key: String,
}

impl ExchangeClient {
    /// Create a new client from configuration.
    pub fn new(config: &ExchangeConfig) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Get current timestamp in milliseconds.
    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as u64
    }

    fn map_transport(err: reqwest::Error) -> ExchangeError {
        if err.is_timeout() {
            ExchangeError::Timeout
        } else {
            ExchangeError::Transport(err.to_string())
        }
    }

    /// Classify a non-2xx response into the error taxonomy.
    async fn classify(response: Response) -> ExchangeError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match status {
            StatusCode::TOO_MANY_REQUESTS => ExchangeError::RateLimited,
            StatusCode::REQUEST_TIMEOUT => ExchangeError::Timeout,
            _ if body.contains("insufficient") => ExchangeError::InsufficientBalance,
            _ if body.contains("unknown market") || body.contains("invalid symbol") => {
                ExchangeError::InvalidMarket(body)
            }
            _ if status.is_client_error() => ExchangeError::Rejected(body),
            _ => ExchangeError::Http {
                status: status.as_u16(),
                body,
            },
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, ExchangeError> {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(Self::map_transport)?;

        if !response.status().is_success() {
            return Err(Self::classify(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ExchangeError::Parse(e.to_string()))
    }

    async fn signed_request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        query: String,
        body: Option<&NewOrder>,
    ) -> Result<T, ExchangeError> {
        let query = if query.is_empty() {
            format!("timestamp={}", Self::timestamp())
        } else {
            format!("{}&timestamp={}", query, Self::timestamp())
        };
        let signature = self.sign(&query);
        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query, signature
        );

        let mut request = self
            .http
            .request(method, &url)
            .header("X-API-KEY", &self.api_key);
        if let Some(order) = body {
            request = request.json(order);
        }

        let response = request.send().await.map_err(Self::map_transport)?;

        if !response.status().is_success() {
            return Err(Self::classify(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ExchangeError::Parse(e.to_string()))
    }
}

#[async_trait]
impl MarketData for ExchangeClient {
    #[instrument(skip(self))]
    async fn list_markets(&self) -> Result<Vec<MarketInfo>, ExchangeError> {
        let markets: Vec<MarketInfo> = self.get_json("/v1/markets", "").await?;
        debug!(count = markets.len(), "Fetched market list");
        Ok(markets)
    }

    #[instrument(skip(self))]
    async fn get_candles(
        &self,
        symbol: &str,
        unit_minutes: u32,
        count: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let query = format!(
            "symbol={}&unit={}&count={}",
            urlencoding::encode(symbol),
            unit_minutes,
            count
        );
        // The API returns newest-first; the engine wants chronological order.
        let mut candles: Vec<Candle> = self.get_json("/v1/candles", &query).await?;
        candles.reverse();
        Ok(candles)
    }

    #[instrument(skip(self))]
    async fn get_order_book(&self, symbol: &str) -> Result<OrderBook, ExchangeError> {
        let query = format!("symbol={}", urlencoding::encode(symbol));
        self.get_json("/v1/orderbook", &query).await
    }
}

#[async_trait]
impl ExecutionClient for ExchangeClient {
    #[instrument(skip(self, order), fields(symbol = %order.symbol, side = ?order.side))]
    async fn submit(&self, order: &NewOrder) -> Result<OrderAck, ExchangeError> {
        self.signed_request(reqwest::Method::POST, "/v1/orders", String::new(), Some(order))
            .await
    }

    #[instrument(skip(self))]
    async fn cancel(&self, order_id: &str) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .signed_request(
                reqwest::Method::DELETE,
                &format!("/v1/orders/{}", urlencoding::encode(order_id)),
                String::new(),
                None,
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_status(&self, order_id: &str) -> Result<OrderState, ExchangeError> {
        self.signed_request(
            reqwest::Method::GET,
            &format!("/v1/orders/{}", urlencoding::encode(order_id)),
            String::new(),
            None,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ExchangeClient {
        ExchangeClient::new(&ExchangeConfig {
            base_url: server.uri(),
            api_key: "key".to_string(),
            secret_key: "secret".to_string(),
            timeout_secs: 5,
            max_concurrent_requests: 3,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_markets_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"symbol": "KRW-BTC", "quoteVolume24h": "9000000000", "status": "TRADING"},
                {"symbol": "KRW-DOGE", "quoteVolume24h": "1000", "status": "HALTED"}
            ])))
            .mount(&server)
            .await;

        let markets = client_for(&server).list_markets().await.unwrap();
        assert_eq!(markets.len(), 2);
        assert!(markets[0].is_trading());
        assert!(!markets[1].is_trading());
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/markets"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client_for(&server).list_markets().await.unwrap_err();
        assert!(matches!(err, ExchangeError::RateLimited));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_candles_are_reversed_to_chronological() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/candles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"timestamp": "2024-03-04T01:05:00Z", "open": "101", "high": "102",
                 "low": "100", "close": "101.5", "volume": "10"},
                {"timestamp": "2024-03-04T01:00:00Z", "open": "100", "high": "101",
                 "low": "99", "close": "101", "volume": "12"}
            ])))
            .mount(&server)
            .await;

        let candles = client_for(&server)
            .get_candles("KRW-BTC", 5, 2)
            .await
            .unwrap();
        assert_eq!(candles.len(), 2);
        assert!(candles[0].timestamp < candles[1].timestamp);
    }
}
