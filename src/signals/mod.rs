//! Per-market signal state machines and the engine that coordinates them.
//!
//! One machine per (market, strategy). Machines advance on each cycle's
//! snapshot and emit at most one trade intent per market per cycle;
//! simultaneous triggers resolve by fixed priority (breakout > pullback >
//! sweep). A machine is terminal on `Closed` and is only rebuilt when the
//! market re-enters the candidate set.

pub mod breakout;
pub mod sweep;
pub mod vwap_pullback;

use crate::config::SignalsConfig;
use crate::exchange::types::{MarketSnapshot, OrderSide};
use crate::features::FeatureVector;
use crate::scanner::Candidate;
use crate::session::SessionWindow;
use anyhow::Result;
use breakout::BreakoutState;
use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use sweep::SweepState;
use tracing::{debug, info};
use vwap_pullback::PullbackState;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Side of the entry order.
    pub fn entry_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Side of the exit (stop / take-profit) orders.
    pub fn exit_side(self) -> OrderSide {
        self.entry_side().opposite()
    }
}

/// Strategy tag; declaration order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StrategyKind {
    Breakout,
    VwapPullback,
    Sweep,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Breakout => write!(f, "breakout"),
            Self::VwapPullback => write!(f, "vwap_pullback"),
            Self::Sweep => write!(f, "sweep"),
        }
    }
}

/// Lifecycle of one (market, strategy) machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalPhase {
    Idle,
    Armed,
    Triggered,
    Active,
    Closed,
}

/// A strategy's trigger output, before engine-level arbitration.
#[derive(Debug, Clone, Copy)]
pub struct Trigger {
    pub direction: Direction,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
}

/// An entry request handed to the risk gate.
#[derive(Debug, Clone)]
pub struct TradeIntent {
    pub symbol: String,
    pub strategy: StrategyKind,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub triggered_at: DateTime<Utc>,
}

/// Everything a strategy sees on one update.
pub struct StrategyContext<'a> {
    pub snapshot: &'a MarketSnapshot,
    pub features: &'a FeatureVector,
    pub now_local: DateTime<FixedOffset>,
}

/// The three per-market machines, in priority order.
struct MarketMachines {
    breakout: BreakoutState,
    pullback: PullbackState,
    sweep: SweepState,
}

impl MarketMachines {
    fn any_committed(&self) -> bool {
        [self.breakout.phase, self.pullback.phase, self.sweep.phase]
            .iter()
            .any(|p| matches!(*p, SignalPhase::Triggered | SignalPhase::Active))
    }

    fn has_active(&self) -> bool {
        [self.breakout.phase, self.pullback.phase, self.sweep.phase]
            .iter()
            .any(|p| *p == SignalPhase::Active)
    }

    fn phase_mut(&mut self, strategy: StrategyKind) -> &mut SignalPhase {
        match strategy {
            StrategyKind::Breakout => &mut self.breakout.phase,
            StrategyKind::VwapPullback => &mut self.pullback.phase,
            StrategyKind::Sweep => &mut self.sweep.phase,
        }
    }

    fn committed_strategy(&self) -> Option<StrategyKind> {
        for (kind, phase) in [
            (StrategyKind::Breakout, self.breakout.phase),
            (StrategyKind::VwapPullback, self.pullback.phase),
            (StrategyKind::Sweep, self.sweep.phase),
        ] {
            if matches!(phase, SignalPhase::Triggered | SignalPhase::Active) {
                return Some(kind);
            }
        }
        None
    }
}

/// Owns all signal state; entries live only while their market is a
/// candidate (or holds an open position).
pub struct SignalEngine {
    config: SignalsConfig,
    box_window: SessionWindow,
    machines: HashMap<String, MarketMachines>,
}

impl SignalEngine {
    pub fn new(config: SignalsConfig) -> Result<Self> {
        let box_window = SessionWindow::parse(&config.breakout.box_window)?;
        Ok(Self {
            config,
            box_window,
            machines: HashMap::new(),
        })
    }

    /// Create machines for new candidates and drop machines for markets that
    /// left the shortlist (unless they hold an open position).
    pub fn sync_candidates(&mut self, candidates: &[Candidate]) {
        for candidate in candidates {
            self.machines.entry(candidate.symbol.clone()).or_insert_with(|| {
                debug!(symbol = %candidate.symbol, "Creating signal machines");
                MarketMachines {
                    breakout: BreakoutState::new(self.config.breakout.clone(), self.box_window),
                    pullback: PullbackState::new(self.config.vwap_pullback.clone()),
                    sweep: SweepState::new(self.config.sweep.clone()),
                }
            });
        }

        self.machines.retain(|symbol, machines| {
            let keep = candidates.iter().any(|c| &c.symbol == symbol) || machines.has_active();
            if !keep {
                debug!(%symbol, "Dropping signal machines for departed candidate");
            }
            keep
        });
    }

    /// Advance all machines for one candidate; returns at most one intent.
    pub fn evaluate(
        &mut self,
        candidate: &Candidate,
        now_local: DateTime<FixedOffset>,
    ) -> Option<TradeIntent> {
        let machines = self.machines.get_mut(&candidate.symbol)?;

        // One commitment per market: nothing new while an intent is pending
        // execution or a position is open.
        if machines.any_committed() {
            return None;
        }

        let ctx = StrategyContext {
            snapshot: &candidate.snapshot,
            features: &candidate.features,
            now_local,
        };

        let mut triggers: Vec<(StrategyKind, Trigger)> = Vec::new();
        if let Some(t) = machines.breakout.update(&ctx) {
            triggers.push((StrategyKind::Breakout, t));
        }
        if let Some(t) = machines.pullback.update(&ctx) {
            triggers.push((StrategyKind::VwapPullback, t));
        }
        if let Some(t) = machines.sweep.update(&ctx) {
            triggers.push((StrategyKind::Sweep, t));
        }

        let (winner, trigger) = triggers
            .iter()
            .min_by_key(|(kind, _)| *kind)
            .copied()?;

        // Losing simultaneous triggers are spent; they re-arm only through a
        // fresh machine on candidacy re-entry.
        for (kind, _) in triggers {
            if kind != winner {
                *machines.phase_mut(kind) = SignalPhase::Closed;
            }
        }

        info!(
            symbol = %candidate.symbol,
            strategy = %winner,
            direction = ?trigger.direction,
            entry = %trigger.entry_price,
            stop = %trigger.stop_price,
            "Signal triggered"
        );

        Some(TradeIntent {
            symbol: candidate.symbol.clone(),
            strategy: winner,
            direction: trigger.direction,
            entry_price: trigger.entry_price,
            stop_price: trigger.stop_price,
            triggered_at: Utc::now(),
        })
    }

    /// Entry filled: the triggered machine now tracks an open position.
    pub fn mark_active(&mut self, symbol: &str) {
        if let Some(machines) = self.machines.get_mut(symbol) {
            if let Some(strategy) = machines.committed_strategy() {
                *machines.phase_mut(strategy) = SignalPhase::Active;
            }
        }
    }

    /// Intent rejected or execution failed: the trigger is spent.
    pub fn mark_invalidated(&mut self, symbol: &str) {
        if let Some(machines) = self.machines.get_mut(symbol) {
            if let Some(strategy) = machines.committed_strategy() {
                *machines.phase_mut(strategy) = SignalPhase::Closed;
            }
        }
    }

    /// Position flattened: terminal for this candidacy.
    pub fn on_position_closed(&mut self, symbol: &str) {
        self.mark_invalidated(symbol);
    }

    /// Session over: discard everything that is not an open position.
    pub fn on_session_end(&mut self) {
        let before = self.machines.len();
        self.machines.retain(|_, machines| machines.has_active());
        debug!(
            discarded = before - self.machines.len(),
            "Session end: non-active signal state discarded"
        );
    }

    pub fn tracked_markets(&self) -> usize {
        self.machines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::{Candle, OrderBook, OrderBookLevel};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    pub(crate) fn kst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    pub(crate) fn local(h: u32, m: u32) -> DateTime<FixedOffset> {
        kst()
            .with_ymd_and_hms(2024, 3, 4, h, m, 0)
            .unwrap()
    }

    pub(crate) fn bar(
        at: DateTime<FixedOffset>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Candle {
        Candle {
            timestamp: at.with_timezone(&Utc),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub(crate) fn snapshot_from(symbol: &str, candles: Vec<Candle>) -> MarketSnapshot {
        let last = candles.last().expect("candles");
        MarketSnapshot {
            symbol: symbol.to_string(),
            price: last.close,
            last_volume: last.volume,
            captured_at: last.timestamp,
            candles,
            book: OrderBook {
                symbol: symbol.to_string(),
                levels: vec![OrderBookLevel {
                    bid_price: dec!(99),
                    bid_size: dec!(10),
                    ask_price: dec!(101),
                    ask_size: dec!(10),
                }],
            },
        }
    }

    pub(crate) fn features_fixture(price: Decimal, vwap: Decimal, atr: Decimal) -> FeatureVector {
        FeatureVector {
            price,
            rvol: dec!(2.5),
            rs: dec!(0.02),
            session_vwap: vwap,
            atr,
            ema_fast: price,
            ema_slow: price - dec!(1),
            trend: price > vwap,
            spread_bp: dec!(2),
            depth_score: dec!(0.5),
            rvol_norm: dec!(0.75),
            rs_norm: dec!(0.66),
            score: dec!(0.8),
        }
    }

    fn candidate_with(
        symbol: &str,
        candles: Vec<Candle>,
        features: FeatureVector,
    ) -> Candidate {
        Candidate {
            symbol: symbol.to_string(),
            snapshot: snapshot_from(symbol, candles),
            features,
        }
    }

    /// Box 09:00-10:00 at 100..102, then a confirmed breakout bar.
    fn breakout_candidate(symbol: &str) -> Candidate {
        let mut candles = Vec::new();
        for i in 0..12 {
            let at = local(9, i * 5);
            candles.push(bar(at, dec!(101), dec!(102), dec!(100), dec!(101), dec!(10)));
        }
        // 10:05 bar closes well above box high + 0.1*ATR on 3x volume
        candles.push(bar(local(10, 5), dec!(102), dec!(105), dec!(102), dec!(104), dec!(30)));

        let features = features_fixture(dec!(104), dec!(101), dec!(2));
        candidate_with(symbol, candles, features)
    }

    #[test]
    fn test_sync_creates_and_drops_machines() {
        let mut engine = SignalEngine::new(SignalsConfig::default()).unwrap();
        let a = breakout_candidate("KRW-AAA");
        let b = breakout_candidate("KRW-BBB");

        engine.sync_candidates(&[a.clone(), b.clone()]);
        assert_eq!(engine.tracked_markets(), 2);

        engine.sync_candidates(&[a]);
        assert_eq!(engine.tracked_markets(), 1);
    }

    #[test]
    fn test_breakout_triggers_once_and_only_once() {
        let mut engine = SignalEngine::new(SignalsConfig::default()).unwrap();
        let candidate = breakout_candidate("KRW-ETH");
        engine.sync_candidates(std::slice::from_ref(&candidate));

        let intent = engine.evaluate(&candidate, local(10, 5)).expect("trigger");
        assert_eq!(intent.strategy, StrategyKind::Breakout);
        assert_eq!(intent.direction, Direction::Long);
        assert_eq!(intent.stop_price, dec!(100)); // opposite box bound

        // Same data again: machine is committed, nothing new fires
        assert!(engine.evaluate(&candidate, local(10, 10)).is_none());
    }

    #[test]
    fn test_rejected_intent_never_refires_within_candidacy() {
        let mut engine = SignalEngine::new(SignalsConfig::default()).unwrap();
        let candidate = breakout_candidate("KRW-ETH");
        engine.sync_candidates(std::slice::from_ref(&candidate));

        engine.evaluate(&candidate, local(10, 5)).expect("trigger");
        engine.mark_invalidated("KRW-ETH");

        assert!(engine.evaluate(&candidate, local(10, 10)).is_none());

        // Leaving and re-entering candidacy rebuilds the machine
        engine.sync_candidates(&[]);
        engine.sync_candidates(std::slice::from_ref(&candidate));
        assert!(engine.evaluate(&candidate, local(10, 15)).is_some());
    }

    #[test]
    fn test_active_position_survives_candidacy_exit_and_session_end() {
        let mut engine = SignalEngine::new(SignalsConfig::default()).unwrap();
        let candidate = breakout_candidate("KRW-ETH");
        engine.sync_candidates(std::slice::from_ref(&candidate));
        engine.evaluate(&candidate, local(10, 5)).expect("trigger");
        engine.mark_active("KRW-ETH");

        engine.sync_candidates(&[]);
        assert_eq!(engine.tracked_markets(), 1);

        engine.on_session_end();
        assert_eq!(engine.tracked_markets(), 1);

        engine.on_position_closed("KRW-ETH");
        engine.sync_candidates(&[]);
        assert_eq!(engine.tracked_markets(), 0);
    }

    #[test]
    fn test_session_end_discards_armed_machines() {
        let mut engine = SignalEngine::new(SignalsConfig::default()).unwrap();
        // Box formed but no breakout bar yet: machine ends the cycle Armed
        let mut candles = Vec::new();
        for i in 0..12 {
            candles.push(bar(local(9, i * 5), dec!(101), dec!(102), dec!(100), dec!(101), dec!(10)));
        }
        candles.push(bar(local(10, 5), dec!(101), dec!(101.5), dec!(100.5), dec!(101), dec!(10)));
        let candidate = candidate_with(
            "KRW-ETH",
            candles,
            features_fixture(dec!(101), dec!(101), dec!(2)),
        );

        engine.sync_candidates(std::slice::from_ref(&candidate));
        assert!(engine.evaluate(&candidate, local(10, 5)).is_none());

        engine.on_session_end();
        assert_eq!(engine.tracked_markets(), 0);
    }
}
