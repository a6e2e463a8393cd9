//! Type definitions for the exchange capability layer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by exchange capabilities.
///
/// The retryable/terminal split drives call-site policy: transient failures
/// are retried or the market is skipped for the cycle, terminal ones surface
/// as failed intents.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited by exchange")]
    RateLimited,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("exchange returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("unknown market: {0}")]
    InvalidMarket(String),
    #[error("failed to parse exchange response: {0}")]
    Parse(String),
}

impl ExchangeError {
    /// Whether a retry with backoff is worthwhile.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::RateLimited | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Rejected(_)
            | Self::InsufficientBalance
            | Self::InvalidMarket(_)
            | Self::Parse(_) => false,
        }
    }
}

/// Tradable market listing entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketInfo {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub quote_volume_24h: Decimal,
    pub status: String,
}

impl MarketInfo {
    pub fn is_trading(&self) -> bool {
        self.status == "TRADING"
    }
}

/// A single OHLCV bar.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
}

/// One price level of the order book.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookLevel {
    #[serde(with = "rust_decimal::serde::str")]
    pub bid_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub bid_size: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub ask_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub ask_size: Decimal,
}

/// Order-book snapshot (best levels first).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBook {
    pub symbol: String,
    pub levels: Vec<OrderBookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.levels.first().map(|l| l.bid_price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.levels.first().map(|l| l.ask_price)
    }

    /// Total resting size across both sides of the visible book.
    pub fn total_depth(&self) -> Decimal {
        self.levels
            .iter()
            .map(|l| l.bid_size + l.ask_size)
            .sum()
    }
}

/// Immutable per-cycle view of one market.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    /// Latest traded price (close of the most recent candle)
    pub price: Decimal,
    /// Volume of the most recent candle
    pub last_volume: Decimal,
    /// Chronologically ordered candles (oldest first)
    pub candles: Vec<Candle>,
    pub book: OrderBook,
    pub captured_at: DateTime<Utc>,
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Order type. Stop-loss and take-profit orders rest until their trigger
/// price trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    TakeProfit,
}

/// Order lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

/// New order request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Limit price; ignored for market orders
    pub price: Option<Decimal>,
    /// Trigger price for stop-loss / take-profit orders
    pub trigger_price: Option<Decimal>,
    pub client_order_id: Option<String>,
}

/// Acknowledgement returned on submission.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: String,
    pub status: OrderStatus,
}

/// Point-in-time order state from the exchange.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderState {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    /// Volume-weighted fill price; zero until the first fill
    #[serde(with = "rust_decimal::serde::str")]
    pub avg_price: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_retryable_classification() {
        assert!(ExchangeError::Timeout.is_retryable());
        assert!(ExchangeError::RateLimited.is_retryable());
        assert!(ExchangeError::Http { status: 503, body: String::new() }.is_retryable());
        assert!(!ExchangeError::Http { status: 400, body: String::new() }.is_retryable());
        assert!(!ExchangeError::InsufficientBalance.is_retryable());
        assert!(!ExchangeError::InvalidMarket("X".into()).is_retryable());
    }

    #[test]
    fn test_order_book_helpers() {
        let book = OrderBook {
            symbol: "KRW-ETH".to_string(),
            levels: vec![
                OrderBookLevel {
                    bid_price: dec!(99),
                    bid_size: dec!(2),
                    ask_price: dec!(101),
                    ask_size: dec!(3),
                },
                OrderBookLevel {
                    bid_price: dec!(98),
                    bid_size: dec!(5),
                    ask_price: dec!(102),
                    ask_size: dec!(1),
                },
            ],
        };

        assert_eq!(book.best_bid(), Some(dec!(99)));
        assert_eq!(book.best_ask(), Some(dec!(101)));
        assert_eq!(book.total_depth(), dec!(11));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Submitted.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }
}
