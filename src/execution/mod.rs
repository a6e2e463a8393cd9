//! Order execution and position management.
//!
//! Turns an approved sized instruction into an entry order plus an OCO-like
//! bracket (stop-loss and take-profit) once the entry fills. Transient
//! submit failures retry with bounded backoff; terminal rejections surface
//! as a failed intent without touching risk state. The same code path runs
//! against the live client and the paper venue.

use crate::config::ExecutionConfig;
use crate::exchange::traits::ExecutionClient;
use crate::exchange::types::{
    ExchangeError, NewOrder, OrderState, OrderStatus, OrderType,
};
use crate::risk::SizedOrder;
use crate::signals::{Direction, StrategyKind};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How a position left the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

/// Terminal fill event reported to the risk layer.
#[derive(Debug, Clone)]
pub struct PositionClosed {
    pub symbol: String,
    pub strategy: StrategyKind,
    pub direction: Direction,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub reason: ExitReason,
    pub closed_at: DateTime<Utc>,
}

/// Result of attempting one approved intent.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Entered {
        symbol: String,
        order_id: String,
        fill_price: Decimal,
        quantity: Decimal,
    },
    Failed {
        symbol: String,
        reason: String,
        retryable: bool,
    },
}

/// An open position with its resting bracket orders.
#[derive(Debug, Clone)]
struct ManagedPosition {
    symbol: String,
    strategy: StrategyKind,
    direction: Direction,
    quantity: Decimal,
    entry_price: Decimal,
    stop_order_id: String,
    tp_order_id: String,
    opened_at: DateTime<Utc>,
}

/// Drives order lifecycle against an `ExecutionClient`.
pub struct OrderExecutor {
    client: Arc<dyn ExecutionClient>,
    config: ExecutionConfig,
    positions: HashMap<String, ManagedPosition>,
}

impl OrderExecutor {
    pub fn new(client: Arc<dyn ExecutionClient>, config: ExecutionConfig) -> Self {
        Self {
            client,
            config,
            positions: HashMap::new(),
        }
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn open_positions(&self) -> usize {
        self.positions.len()
    }

    /// Markets currently holding an open position.
    pub fn position_symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    /// Execute an approved sized order: entry, then bracket exits.
    pub async fn execute(&mut self, order: &SizedOrder) -> ExecutionOutcome {
        let symbol = order.intent.symbol.clone();
        if self.has_position(&symbol) {
            return ExecutionOutcome::Failed {
                symbol,
                reason: "position already open".to_string(),
                retryable: false,
            };
        }

        let entry = NewOrder {
            symbol: symbol.clone(),
            side: order.intent.direction.entry_side(),
            order_type: OrderType::Market,
            quantity: order.quantity,
            price: None,
            trigger_price: None,
            client_order_id: None,
        };

        let ack = match self.submit_with_retry(&entry).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(%symbol, error = %e, "Entry order failed");
                return ExecutionOutcome::Failed {
                    symbol,
                    reason: e.to_string(),
                    retryable: e.is_retryable(),
                };
            }
        };

        let fill = match self.wait_for_fill(&ack.order_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(%symbol, order_id = %ack.order_id, error = %e, "Entry did not fill");
                return ExecutionOutcome::Failed {
                    symbol,
                    reason: e.to_string(),
                    retryable: e.is_retryable(),
                };
            }
        };

        info!(
            %symbol,
            order_id = %ack.order_id,
            fill_price = %fill.avg_price,
            quantity = %fill.executed_qty,
            "Entry filled"
        );

        match self
            .place_bracket(order, fill.executed_qty)
            .await
        {
            Ok((stop_order_id, tp_order_id)) => {
                self.positions.insert(
                    symbol.clone(),
                    ManagedPosition {
                        symbol: symbol.clone(),
                        strategy: order.intent.strategy,
                        direction: order.intent.direction,
                        quantity: fill.executed_qty,
                        entry_price: fill.avg_price,
                        stop_order_id,
                        tp_order_id,
                        opened_at: Utc::now(),
                    },
                );
                ExecutionOutcome::Entered {
                    symbol,
                    order_id: ack.order_id,
                    fill_price: fill.avg_price,
                    quantity: fill.executed_qty,
                }
            }
            Err(e) => {
                // A naked position without its stop is worse than no
                // position: flatten immediately.
                error!(%symbol, error = %e, "Bracket placement failed, flattening entry");
                let unwind = NewOrder {
                    symbol: symbol.clone(),
                    side: order.intent.direction.exit_side(),
                    order_type: OrderType::Market,
                    quantity: fill.executed_qty,
                    price: None,
                    trigger_price: None,
                    client_order_id: None,
                };
                if let Err(unwind_err) = self.submit_with_retry(&unwind).await {
                    error!(
                        %symbol,
                        error = %unwind_err,
                        "CRITICAL: failed to flatten unprotected position"
                    );
                }
                ExecutionOutcome::Failed {
                    symbol,
                    reason: format!("bracket placement failed: {e}"),
                    retryable: false,
                }
            }
        }
    }

    /// Submit the paired stop-loss / take-profit exits.
    async fn place_bracket(
        &self,
        order: &SizedOrder,
        quantity: Decimal,
    ) -> Result<(String, String), ExchangeError> {
        let exit_side = order.intent.direction.exit_side();

        let stop = NewOrder {
            symbol: order.intent.symbol.clone(),
            side: exit_side,
            order_type: OrderType::StopLoss,
            quantity,
            price: None,
            trigger_price: Some(order.intent.stop_price),
            client_order_id: None,
        };
        let stop_ack = self.submit_with_retry(&stop).await?;

        let tp = NewOrder {
            symbol: order.intent.symbol.clone(),
            side: exit_side,
            order_type: OrderType::TakeProfit,
            quantity,
            price: None,
            trigger_price: Some(order.take_profit),
            client_order_id: None,
        };
        let tp_ack = match self.submit_with_retry(&tp).await {
            Ok(ack) => ack,
            Err(e) => {
                // Don't leave a lone stop behind
                let _ = self.client.cancel(&stop_ack.order_id).await;
                return Err(e);
            }
        };

        Ok((stop_ack.order_id, tp_ack.order_id))
    }

    /// Poll open positions' exit orders; a filled exit cancels its sibling
    /// and yields a close event.
    pub async fn manage_positions(&mut self) -> Vec<PositionClosed> {
        let mut closed = Vec::new();

        let symbols: Vec<String> = self.positions.keys().cloned().collect();
        for symbol in symbols {
            let Some(position) = self.positions.get(&symbol) else {
                continue;
            };

            let stop_state = self.client.get_status(&position.stop_order_id).await;
            let tp_state = self.client.get_status(&position.tp_order_id).await;

            let (filled_exit, sibling_id, reason) = match (&stop_state, &tp_state) {
                (Ok(stop), _) if stop.status == OrderStatus::Filled => (
                    stop.clone(),
                    position.tp_order_id.clone(),
                    ExitReason::StopLoss,
                ),
                (_, Ok(tp)) if tp.status == OrderStatus::Filled => (
                    tp.clone(),
                    position.stop_order_id.clone(),
                    ExitReason::TakeProfit,
                ),
                _ => continue,
            };

            if let Err(e) = self.client.cancel(&sibling_id).await {
                // The sibling may have raced to a terminal state; log and move on
                warn!(%symbol, order_id = %sibling_id, error = %e, "Sibling cancel failed");
            }

            let position = self
                .positions
                .remove(&symbol)
                .expect("position present in loop");

            let exit_price = filled_exit.avg_price;
            let pnl = match position.direction {
                Direction::Long => (exit_price - position.entry_price) * position.quantity,
                Direction::Short => (position.entry_price - exit_price) * position.quantity,
            };

            info!(
                %symbol,
                ?reason,
                entry = %position.entry_price,
                exit = %exit_price,
                %pnl,
                held_secs = (Utc::now() - position.opened_at).num_seconds(),
                "Position closed"
            );

            closed.push(PositionClosed {
                symbol: position.symbol,
                strategy: position.strategy,
                direction: position.direction,
                quantity: position.quantity,
                entry_price: position.entry_price,
                exit_price,
                pnl,
                reason,
                closed_at: Utc::now(),
            });
        }

        closed
    }

    /// Submit with bounded linear backoff; only transient errors retry.
    async fn submit_with_retry(
        &self,
        order: &NewOrder,
    ) -> Result<crate::exchange::types::OrderAck, ExchangeError> {
        let mut last_error = None;

        for attempt in 1..=self.config.max_retries {
            match self.client.submit(order).await {
                Ok(ack) => return Ok(ack),
                Err(e) if e.is_retryable() => {
                    warn!(
                        symbol = %order.symbol,
                        attempt,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "Order submit failed, retrying"
                    );
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(ExchangeError::Timeout))
    }

    /// Poll an order until it fills or the configured timeout elapses; a
    /// timed-out entry is cancelled rather than left working.
    async fn wait_for_fill(&self, order_id: &str) -> Result<OrderState, ExchangeError> {
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.order_timeout_secs);
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            let state = self.client.get_status(order_id).await?;
            match state.status {
                OrderStatus::Filled => return Ok(state),
                OrderStatus::Rejected => {
                    return Err(ExchangeError::Rejected(format!("order {order_id} rejected")))
                }
                OrderStatus::Cancelled => {
                    return Err(ExchangeError::Rejected(format!("order {order_id} cancelled")))
                }
                _ => {}
            }

            if tokio::time::Instant::now() >= deadline {
                let _ = self.client.cancel(order_id).await;
                return Err(ExchangeError::Timeout);
            }
            tokio::time::sleep(poll).await;
        }
    }
}
