//! Account-level risk gate.
//!
//! `RiskManager` is the single writer of `RiskState`: every trade intent
//! passes through `assess`, and every position close passes through
//! `on_position_closed`, one fill at a time. Circuit breakers: a daily
//! drawdown stop that halts the session, and a per-market consecutive-loss
//! counter.

use crate::config::RiskConfig;
use crate::execution::PositionClosed;
use crate::persistence::RiskJournal;
use crate::signals::{Direction, TradeIntent};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

/// Process-wide risk state for one trading session.
#[derive(Debug, Clone)]
pub struct RiskState {
    pub session_date: NaiveDate,
    pub day_start_equity: Decimal,
    pub equity: Decimal,
    pub daily_realized_pnl: Decimal,
    pub trading_halted: bool,
    pub trades_today: u32,
    pub losing_trades_today: u32,
    /// Per-market consecutive losing closes this session
    pub consecutive_losses: HashMap<String, u32>,
}

impl RiskState {
    pub fn new_session(session_date: NaiveDate, equity: Decimal) -> Self {
        Self {
            session_date,
            day_start_equity: equity,
            equity,
            daily_realized_pnl: Decimal::ZERO,
            trading_halted: false,
            trades_today: 0,
            losing_trades_today: 0,
            consecutive_losses: HashMap::new(),
        }
    }
}

/// Why an intent was refused. A rejection is a normal decision outcome,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskRejection {
    TradingHalted,
    ConsecutiveLosses { symbol: String, count: u32 },
    InvalidStop,
    BelowMinimum { notional: Decimal },
    AboveMaximum { notional: Decimal },
}

impl fmt::Display for RiskRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TradingHalted => write!(f, "daily drawdown stop active"),
            Self::ConsecutiveLosses { symbol, count } => {
                write!(f, "{symbol} has {count} consecutive losses")
            }
            Self::InvalidStop => write!(f, "stop price equals entry price"),
            Self::BelowMinimum { notional } => {
                write!(f, "notional {notional} below exchange minimum")
            }
            Self::AboveMaximum { notional } => {
                write!(f, "notional {notional} above position cap")
            }
        }
    }
}

/// An approved, sized order instruction.
#[derive(Debug, Clone)]
pub struct SizedOrder {
    pub intent: TradeIntent,
    pub quantity: Decimal,
    pub notional: Decimal,
    /// Money at risk between entry and stop
    pub risk_amount: Decimal,
    pub take_profit: Decimal,
}

/// Outcome of the risk gate.
#[derive(Debug, Clone)]
pub enum RiskVerdict {
    Approved(Box<SizedOrder>),
    Rejected(RiskRejection),
}

/// Sole authority over `RiskState`.
pub struct RiskManager {
    config: RiskConfig,
    state: RiskState,
    journal: Option<RiskJournal>,
}

impl RiskManager {
    /// Start a manager for the given session, restoring journaled state for
    /// the same date if present (so a mid-session restart keeps the halt
    /// flag and loss counters).
    pub fn new(
        config: RiskConfig,
        session_date: NaiveDate,
        starting_equity: Decimal,
        journal: Option<RiskJournal>,
    ) -> Self {
        let state = journal
            .as_ref()
            .and_then(|j| j.load_state(session_date).ok().flatten())
            .map(|restored| {
                info!(
                    date = %session_date,
                    equity = %restored.equity,
                    halted = restored.trading_halted,
                    "Restored risk state from journal"
                );
                restored
            })
            .unwrap_or_else(|| RiskState::new_session(session_date, starting_equity));

        Self {
            config,
            state,
            journal,
        }
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    /// Reset for a new trading session. Clears the halt flag and all
    /// counters; equity carries over as the new day-start baseline.
    pub fn start_session(&mut self, session_date: NaiveDate) {
        if session_date == self.state.session_date {
            return;
        }
        let equity = self.state.equity;
        self.state = RiskState::new_session(session_date, equity);
        self.persist();
        info!(date = %session_date, %equity, "Risk state reset for new session");
    }

    /// Gate a trade intent: halt check, loss-streak check, then sizing.
    pub fn assess(&self, intent: &TradeIntent) -> RiskVerdict {
        if self.state.trading_halted {
            return RiskVerdict::Rejected(RiskRejection::TradingHalted);
        }

        let streak = self
            .state
            .consecutive_losses
            .get(&intent.symbol)
            .copied()
            .unwrap_or(0);
        if streak >= self.config.max_consecutive_losses {
            return RiskVerdict::Rejected(RiskRejection::ConsecutiveLosses {
                symbol: intent.symbol.clone(),
                count: streak,
            });
        }

        let risk_per_unit = (intent.entry_price - intent.stop_price).abs();
        if risk_per_unit <= Decimal::ZERO {
            return RiskVerdict::Rejected(RiskRejection::InvalidStop);
        }

        let risk_amount = self.state.equity * self.config.per_trade_risk_pct;
        let quantity = (risk_amount / risk_per_unit).round_dp(4);
        let notional = quantity * intent.entry_price;

        if notional < self.config.min_position_value {
            return RiskVerdict::Rejected(RiskRejection::BelowMinimum { notional });
        }
        if notional > self.config.max_position_value {
            return RiskVerdict::Rejected(RiskRejection::AboveMaximum { notional });
        }

        let reward = risk_per_unit * self.config.target_r_multiple;
        let take_profit = match intent.direction {
            Direction::Long => intent.entry_price + reward,
            Direction::Short => intent.entry_price - reward,
        };

        RiskVerdict::Approved(Box::new(SizedOrder {
            intent: intent.clone(),
            quantity,
            notional,
            risk_amount: quantity * risk_per_unit,
            take_profit,
        }))
    }

    /// Account for a realized position close. Processed one fill at a time;
    /// returns true when this fill tripped the daily drawdown stop.
    pub fn on_position_closed(&mut self, event: &PositionClosed) -> bool {
        self.state.daily_realized_pnl += event.pnl;
        self.state.equity += event.pnl;
        self.state.trades_today += 1;

        let is_win = event.pnl > Decimal::ZERO;
        let counter = self
            .state
            .consecutive_losses
            .entry(event.symbol.clone())
            .or_insert(0);
        if is_win {
            *counter = 0;
        } else {
            *counter += 1;
            self.state.losing_trades_today += 1;
            if *counter >= self.config.max_consecutive_losses {
                warn!(
                    symbol = %event.symbol,
                    losses = *counter,
                    "Market refused for the rest of the session after consecutive losses"
                );
            }
        }

        let halt_threshold = -(self.state.day_start_equity * self.config.daily_drawdown_stop_pct);
        let halted_now = !self.state.trading_halted
            && self.state.daily_realized_pnl <= halt_threshold;
        if halted_now {
            self.state.trading_halted = true;
            warn!(
                daily_pnl = %self.state.daily_realized_pnl,
                threshold = %halt_threshold,
                "Daily drawdown stop hit; trading halted for the session"
            );
        }

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_trade(event) {
                warn!(error = %e, "Failed to journal closed trade");
            }
        }
        self.persist();

        info!(
            symbol = %event.symbol,
            pnl = %event.pnl,
            daily_pnl = %self.state.daily_realized_pnl,
            equity = %self.state.equity,
            halted = self.state.trading_halted,
            "Position close accounted"
        );

        halted_now
    }

    fn persist(&self) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.save_state(&self.state) {
                warn!(error = %e, "Failed to persist risk state");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExitReason;
    use crate::signals::StrategyKind;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn test_config() -> RiskConfig {
        RiskConfig {
            starting_equity: dec!(10000),
            per_trade_risk_pct: dec!(0.004),
            daily_drawdown_stop_pct: dec!(0.01),
            max_consecutive_losses: 2,
            min_position_value: dec!(100),
            max_position_value: dec!(100_000),
            target_r_multiple: dec!(1.5),
        }
    }

    fn manager() -> RiskManager {
        RiskManager::new(
            test_config(),
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            dec!(10000),
            None,
        )
    }

    fn intent(symbol: &str, entry: Decimal, stop: Decimal) -> TradeIntent {
        TradeIntent {
            symbol: symbol.to_string(),
            strategy: StrategyKind::Breakout,
            direction: if stop < entry {
                Direction::Long
            } else {
                Direction::Short
            },
            entry_price: entry,
            stop_price: stop,
            triggered_at: Utc::now(),
        }
    }

    fn losing_close(symbol: &str, pnl: Decimal) -> PositionClosed {
        PositionClosed {
            symbol: symbol.to_string(),
            strategy: StrategyKind::Breakout,
            direction: Direction::Long,
            quantity: dec!(1),
            entry_price: dec!(100),
            exit_price: dec!(100) + pnl,
            pnl,
            reason: ExitReason::StopLoss,
            closed_at: Utc::now(),
        }
    }

    #[test]
    fn test_sizing_targets_fixed_risk() {
        let manager = manager();
        // Risk 0.4% of 10000 = 40; entry-stop distance 2 -> qty 20
        let verdict = manager.assess(&intent("KRW-ETH", dec!(100), dec!(98)));
        match verdict {
            RiskVerdict::Approved(order) => {
                assert_eq!(order.quantity, dec!(20));
                assert_eq!(order.notional, dec!(2000));
                assert_eq!(order.risk_amount, dec!(40));
                assert_eq!(order.take_profit, dec!(103)); // 1.5R above entry
            }
            RiskVerdict::Rejected(r) => panic!("unexpected rejection: {r}"),
        }
    }

    #[test]
    fn test_short_take_profit_below_entry() {
        let manager = manager();
        let verdict = manager.assess(&intent("KRW-ETH", dec!(100), dec!(102)));
        match verdict {
            RiskVerdict::Approved(order) => assert_eq!(order.take_profit, dec!(97)),
            RiskVerdict::Rejected(r) => panic!("unexpected rejection: {r}"),
        }
    }

    #[test]
    fn test_tiny_notional_rejected() {
        let mut config = test_config();
        config.min_position_value = dec!(5000);
        let manager = RiskManager::new(
            config,
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            dec!(10000),
            None,
        );
        // qty 20 * 100 = 2000 < 5000
        let verdict = manager.assess(&intent("KRW-ETH", dec!(100), dec!(98)));
        assert!(matches!(
            verdict,
            RiskVerdict::Rejected(RiskRejection::BelowMinimum { .. })
        ));
    }

    #[test]
    fn test_oversized_notional_rejected() {
        let manager = manager();
        // Tight stop: qty = 40 / 0.01 = 4000, notional 400k > 100k cap
        let verdict = manager.assess(&intent("KRW-ETH", dec!(100), dec!(99.99)));
        assert!(matches!(
            verdict,
            RiskVerdict::Rejected(RiskRejection::AboveMaximum { .. })
        ));
    }

    #[test]
    fn test_zero_stop_distance_rejected() {
        let manager = manager();
        let verdict = manager.assess(&intent("KRW-ETH", dec!(100), dec!(100)));
        assert!(matches!(
            verdict,
            RiskVerdict::Rejected(RiskRejection::InvalidStop)
        ));
    }

    #[test]
    fn test_two_consecutive_losses_refuse_the_market() {
        let mut manager = manager();
        manager.on_position_closed(&losing_close("KRW-ETH", dec!(-10)));
        // One loss: still tradable
        assert!(matches!(
            manager.assess(&intent("KRW-ETH", dec!(100), dec!(98))),
            RiskVerdict::Approved(_)
        ));

        manager.on_position_closed(&losing_close("KRW-ETH", dec!(-10)));
        assert!(matches!(
            manager.assess(&intent("KRW-ETH", dec!(100), dec!(98))),
            RiskVerdict::Rejected(RiskRejection::ConsecutiveLosses { count: 2, .. })
        ));

        // Other markets unaffected
        assert!(matches!(
            manager.assess(&intent("KRW-SOL", dec!(100), dec!(98))),
            RiskVerdict::Approved(_)
        ));
    }

    #[test]
    fn test_winning_close_resets_streak() {
        let mut manager = manager();
        manager.on_position_closed(&losing_close("KRW-ETH", dec!(-10)));
        manager.on_position_closed(&losing_close("KRW-ETH", dec!(25)));
        manager.on_position_closed(&losing_close("KRW-ETH", dec!(-10)));

        // Streak is 1, not 3
        assert!(matches!(
            manager.assess(&intent("KRW-ETH", dec!(100), dec!(98))),
            RiskVerdict::Approved(_)
        ));
    }

    #[test]
    fn test_exact_drawdown_threshold_halts_everything() {
        let mut manager = manager();
        // 1% of 10000 = 100, reached exactly across two losses
        assert!(!manager.on_position_closed(&losing_close("KRW-ETH", dec!(-60))));
        let halted_now = manager.on_position_closed(&losing_close("KRW-SOL", dec!(-40)));
        assert!(halted_now);
        assert!(manager.state().trading_halted);

        // The very next intent for any market is rejected
        assert!(matches!(
            manager.assess(&intent("KRW-ADA", dec!(100), dec!(98))),
            RiskVerdict::Rejected(RiskRejection::TradingHalted)
        ));
    }

    #[test]
    fn test_halt_clears_on_new_session() {
        let mut manager = manager();
        manager.on_position_closed(&losing_close("KRW-ETH", dec!(-100)));
        assert!(manager.state().trading_halted);

        manager.start_session(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert!(!manager.state().trading_halted);
        // Equity carries over as the new baseline
        assert_eq!(manager.state().day_start_equity, dec!(9900));
        assert!(manager.state().consecutive_losses.is_empty());
    }
}
