//! Capability traits consumed by the engine core.
//!
//! `MarketData` supplies read-only market state; `ExecutionClient` carries
//! order flow. The live REST client implements both; paper trading swaps in
//! a simulated `ExecutionClient` while keeping the same market data source.

use crate::exchange::types::{
    Candle, ExchangeError, MarketInfo, NewOrder, OrderAck, OrderBook, OrderState,
};
use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

/// Read-only market data capability.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MarketData: Send + Sync {
    /// List all markets with their 24h quote volume.
    async fn list_markets(&self) -> Result<Vec<MarketInfo>, ExchangeError>;

    /// Fetch the most recent `count` candles, oldest first.
    async fn get_candles(
        &self,
        symbol: &str,
        unit_minutes: u32,
        count: u32,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Fetch the current order book for a market.
    async fn get_order_book(&self, symbol: &str) -> Result<OrderBook, ExchangeError>;
}

/// Order placement and lifecycle capability.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Submit a new order; returns the exchange order id.
    async fn submit(&self, order: &NewOrder) -> Result<OrderAck, ExchangeError>;

    /// Cancel an open order.
    async fn cancel(&self, order_id: &str) -> Result<(), ExchangeError>;

    /// Fetch the current state of an order.
    async fn get_status(&self, order_id: &str) -> Result<OrderState, ExchangeError>;
}
