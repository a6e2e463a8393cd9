//! Simulated execution for paper trading.
//!
//! Implements `ExecutionClient` against the latest scanned prices with a
//! configurable slippage and taker-fee model. Market orders fill immediately;
//! stop-loss and take-profit orders rest until `update_price` observes their
//! trigger trading.

use crate::exchange::traits::ExecutionClient;
use crate::exchange::types::*;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct PaperOrder {
    request: NewOrder,
    status: OrderStatus,
    executed_qty: Decimal,
    avg_price: Decimal,
}

/// In-process execution venue for paper mode.
pub struct PaperExchange {
    orders: RwLock<HashMap<String, PaperOrder>>,
    prices: RwLock<HashMap<String, Decimal>>,
    order_seq: AtomicU64,
    slippage_bp: Decimal,
    fee_rate: Decimal,
    fees_paid: RwLock<Decimal>,
}

impl PaperExchange {
    pub fn new(slippage_bp: Decimal, fee_rate: Decimal) -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            prices: RwLock::new(HashMap::new()),
            order_seq: AtomicU64::new(1),
            slippage_bp,
            fee_rate,
            fees_paid: RwLock::new(Decimal::ZERO),
        }
    }

    /// Push the latest observed price for a market and sweep resting
    /// trigger orders against it.
    pub async fn update_price(&self, symbol: &str, price: Decimal) {
        self.prices
            .write()
            .await
            .insert(symbol.to_string(), price);

        let mut orders = self.orders.write().await;
        let mut fees = self.fees_paid.write().await;
        for (order_id, order) in orders.iter_mut() {
            if order.status != OrderStatus::Submitted || order.request.symbol != symbol {
                continue;
            }
            let Some(trigger) = order.request.trigger_price else {
                continue;
            };
            if !Self::trigger_crossed(&order.request, trigger, price) {
                continue;
            }

            let fill_price = self.filled_price(order.request.side, trigger);
            order.status = OrderStatus::Filled;
            order.executed_qty = order.request.quantity;
            order.avg_price = fill_price;
            *fees += fill_price * order.request.quantity * self.fee_rate;

            info!(
                order_id = %order_id,
                symbol = %symbol,
                kind = ?order.request.order_type,
                trigger = %trigger,
                fill_price = %fill_price,
                "Paper trigger order filled"
            );
        }
    }

    /// Total simulated taker fees paid so far.
    pub async fn fees_paid(&self) -> Decimal {
        *self.fees_paid.read().await
    }

    fn trigger_crossed(request: &NewOrder, trigger: Decimal, price: Decimal) -> bool {
        match (request.order_type, request.side) {
            // Protective stop on a long (sell) fires as price falls through it;
            // on a short (buy) as price rises through it.
            (OrderType::StopLoss, OrderSide::Sell) => price <= trigger,
            (OrderType::StopLoss, OrderSide::Buy) => price >= trigger,
            // Take-profit is the mirror image.
            (OrderType::TakeProfit, OrderSide::Sell) => price >= trigger,
            (OrderType::TakeProfit, OrderSide::Buy) => price <= trigger,
            _ => false,
        }
    }

    /// Apply directional slippage: buys fill above, sells below.
    fn filled_price(&self, side: OrderSide, reference: Decimal) -> Decimal {
        let slip = reference * self.slippage_bp / dec!(10000);
        match side {
            OrderSide::Buy => reference + slip,
            OrderSide::Sell => reference - slip,
        }
    }

    fn next_order_id(&self) -> String {
        format!("paper-{}", self.order_seq.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ExecutionClient for PaperExchange {
    async fn submit(&self, order: &NewOrder) -> Result<OrderAck, ExchangeError> {
        let order_id = self.next_order_id();

        let paper = match order.order_type {
            OrderType::Market | OrderType::Limit => {
                let reference = match order.order_type {
                    OrderType::Limit => order
                        .price
                        .ok_or_else(|| ExchangeError::Rejected("limit order without price".into()))?,
                    _ => {
                        let prices = self.prices.read().await;
                        *prices
                            .get(&order.symbol)
                            .ok_or_else(|| ExchangeError::InvalidMarket(order.symbol.clone()))?
                    }
                };
                let fill_price = self.filled_price(order.side, reference);
                *self.fees_paid.write().await +=
                    fill_price * order.quantity * self.fee_rate;

                debug!(
                    order_id = %order_id,
                    symbol = %order.symbol,
                    side = ?order.side,
                    qty = %order.quantity,
                    fill_price = %fill_price,
                    "Paper order filled"
                );

                PaperOrder {
                    request: order.clone(),
                    status: OrderStatus::Filled,
                    executed_qty: order.quantity,
                    avg_price: fill_price,
                }
            }
            OrderType::StopLoss | OrderType::TakeProfit => {
                if order.trigger_price.is_none() {
                    return Err(ExchangeError::Rejected(
                        "trigger order without trigger price".into(),
                    ));
                }
                PaperOrder {
                    request: order.clone(),
                    status: OrderStatus::Submitted,
                    executed_qty: Decimal::ZERO,
                    avg_price: Decimal::ZERO,
                }
            }
        };

        let status = paper.status;
        self.orders.write().await.insert(order_id.clone(), paper);

        Ok(OrderAck { order_id, status })
    }

    async fn cancel(&self, order_id: &str) -> Result<(), ExchangeError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| ExchangeError::Rejected(format!("unknown order {order_id}")))?;

        if order.status.is_terminal() {
            return Err(ExchangeError::Rejected(format!(
                "order {order_id} already {:?}",
                order.status
            )));
        }

        order.status = OrderStatus::Cancelled;
        Ok(())
    }

    async fn get_status(&self, order_id: &str) -> Result<OrderState, ExchangeError> {
        let orders = self.orders.read().await;
        let order = orders
            .get(order_id)
            .ok_or_else(|| ExchangeError::Rejected(format!("unknown order {order_id}")))?;

        Ok(OrderState {
            order_id: order_id.to_string(),
            symbol: order.request.symbol.clone(),
            side: order.request.side,
            status: order.status,
            executed_qty: order.executed_qty,
            avg_price: order.avg_price,
        })
    }
}
