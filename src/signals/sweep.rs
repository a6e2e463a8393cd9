//! Liquidity-sweep reversal strategy.
//!
//! Watches recent swing highs/lows. A bar that penetrates a swing level by
//! an ATR-scaled distance and then closes back inside it (on the same bar
//! or the next) is treated as a failed breakout and faded.

use crate::config::SweepConfig;
use crate::exchange::types::Candle;
use crate::signals::{Direction, SignalPhase, StrategyContext, Trigger};
use rust_decimal::Decimal;
use tracing::debug;

/// A penetration awaiting recovery confirmation.
#[derive(Debug, Clone, Copy)]
struct PendingSweep {
    /// The swept swing level
    level: Decimal,
    /// Reversal direction if the sweep recovers
    direction: Direction,
    /// Furthest price beyond the level (becomes the stop)
    extreme: Decimal,
    /// Bars since the penetration bar
    bars_waited: usize,
}

/// One market's sweep machine.
pub struct SweepState {
    config: SweepConfig,
    pub phase: SignalPhase,
    pending: Option<PendingSweep>,
    /// Timestamp of the last candle processed, to advance bar counts only
    /// on new bars.
    last_bar_seen: Option<chrono::DateTime<chrono::Utc>>,
}

impl SweepState {
    pub fn new(config: SweepConfig) -> Self {
        Self {
            config,
            phase: SignalPhase::Idle,
            pending: None,
            last_bar_seen: None,
        }
    }

    pub fn update(&mut self, ctx: &StrategyContext<'_>) -> Option<Trigger> {
        if !self.config.enabled {
            return None;
        }
        if !matches!(self.phase, SignalPhase::Idle | SignalPhase::Armed) {
            return None;
        }

        let candles = &ctx.snapshot.candles;
        let current = candles.last()?;
        let is_new_bar = self.last_bar_seen != Some(current.timestamp);
        self.last_bar_seen = Some(current.timestamp);

        let penetration = self.config.penetration_atr_mult * ctx.features.atr;

        if let Some(mut pending) = self.pending.take() {
            if is_new_bar {
                pending.bars_waited += 1;
            }

            // Update the sweep extreme while price stays beyond the level
            match pending.direction {
                Direction::Long => pending.extreme = pending.extreme.min(current.low),
                Direction::Short => pending.extreme = pending.extreme.max(current.high),
            }

            let recovered = match pending.direction {
                Direction::Long => current.close > pending.level,
                Direction::Short => current.close < pending.level,
            };

            if recovered {
                self.phase = SignalPhase::Triggered;
                debug!(
                    symbol = %ctx.snapshot.symbol,
                    direction = ?pending.direction,
                    level = %pending.level,
                    extreme = %pending.extreme,
                    "Sweep recovered, fading the move"
                );
                return Some(Trigger {
                    direction: pending.direction,
                    entry_price: current.close,
                    stop_price: pending.extreme,
                });
            }

            // Recovery allowed on the penetration bar or the next one only
            if pending.bars_waited < 1 {
                self.pending = Some(pending);
            } else {
                self.phase = SignalPhase::Idle;
            }
            return None;
        }

        // No pending sweep: look for a fresh penetration of a swing level.
        // Levels come from completed bars only.
        let history = &candles[..candles.len() - 1];
        let (swing_high, swing_low) = swing_levels(
            history,
            self.config.swing_lookback,
            self.config.pivot_strength,
        );

        if let Some(low) = swing_low {
            if current.low < low - penetration {
                if current.close > low {
                    // Swept and recovered within the same bar
                    self.phase = SignalPhase::Triggered;
                    return Some(Trigger {
                        direction: Direction::Long,
                        entry_price: current.close,
                        stop_price: current.low,
                    });
                }
                self.pending = Some(PendingSweep {
                    level: low,
                    direction: Direction::Long,
                    extreme: current.low,
                    bars_waited: 0,
                });
                self.phase = SignalPhase::Armed;
                return None;
            }
        }

        if let Some(high) = swing_high {
            if current.high > high + penetration {
                if current.close < high {
                    self.phase = SignalPhase::Triggered;
                    return Some(Trigger {
                        direction: Direction::Short,
                        entry_price: current.close,
                        stop_price: current.high,
                    });
                }
                self.pending = Some(PendingSweep {
                    level: high,
                    direction: Direction::Short,
                    extreme: current.high,
                    bars_waited: 0,
                });
                self.phase = SignalPhase::Armed;
            }
        }

        None
    }
}

/// Most recent swing high and low: a pivot needs `strength` lower highs
/// (or higher lows) on each side, searched over the trailing `lookback` bars.
pub fn swing_levels(
    candles: &[Candle],
    lookback: usize,
    strength: usize,
) -> (Option<Decimal>, Option<Decimal>) {
    if candles.len() < strength * 2 + 1 {
        return (None, None);
    }

    let start = candles.len().saturating_sub(lookback);
    let window = &candles[start..];

    let mut swing_high = None;
    let mut swing_low = None;

    for i in strength..window.len() - strength {
        let bar = &window[i];
        let neighbors = window[i - strength..i]
            .iter()
            .chain(window[i + 1..=i + strength].iter());

        let mut is_high = true;
        let mut is_low = true;
        for other in neighbors {
            if other.high >= bar.high {
                is_high = false;
            }
            if other.low <= bar.low {
                is_low = false;
            }
        }

        // Later pivots overwrite earlier ones: most recent level wins
        if is_high {
            swing_high = Some(bar.high);
        }
        if is_low {
            swing_low = Some(bar.low);
        }
    }

    (swing_high, swing_low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::tests::{bar, features_fixture, local, snapshot_from};
    use rust_decimal_macros::dec;

    /// History with a clear swing low at 95 (bar 5) and swing high at 108
    /// (bar 10), followed by drifting closes around 100.
    fn base_history() -> Vec<Candle> {
        let shape = [
            (100, 101, 99),
            (100, 101, 98),
            (99, 100, 97),
            (98, 99, 96),
            (97, 98, 96),
            (96, 97, 95), // swing low pivot at 95
            (98, 99, 97),
            (100, 103, 99),
            (102, 105, 101),
            (104, 107, 103),
            (105, 108, 104), // swing high pivot at 108
            (104, 106, 103),
            (103, 105, 102),
            (102, 104, 101),
            (101, 103, 100),
        ];
        shape
            .iter()
            .enumerate()
            .map(|(i, (open, high, low))| {
                let minutes = (i as u32) * 5;
                bar(
                    local(9 + minutes / 60, minutes % 60),
                    Decimal::from(*open as u64),
                    Decimal::from(*high as u64),
                    Decimal::from(*low as u64),
                    Decimal::from(*open as u64),
                    dec!(10),
                )
            })
            .collect()
    }

    #[test]
    fn test_swing_levels_found() {
        let history = base_history();
        let (high, low) = swing_levels(&history, 50, 2);
        assert_eq!(high, Some(dec!(108)));
        assert_eq!(low, Some(dec!(95)));
    }

    #[test]
    fn test_same_bar_sweep_and_recovery_triggers_long() {
        let mut state = SweepState::new(SweepConfig::default());
        let mut candles = base_history();
        // Penetrates 95 by more than 0.05*ATR(2)=0.1 and closes back above it
        candles.push(bar(local(10, 20), dec!(96), dec!(97), dec!(94.5), dec!(96), dec!(25)));
        let snapshot = snapshot_from("KRW-ETH", candles);
        let features = features_fixture(dec!(96), dec!(100), dec!(2));
        let ctx = StrategyContext {
            snapshot: &snapshot,
            features: &features,
            now_local: local(10, 20),
        };

        let trigger = state.update(&ctx).expect("sweep reversal");
        assert_eq!(trigger.direction, Direction::Long);
        assert_eq!(trigger.entry_price, dec!(96));
        assert_eq!(trigger.stop_price, dec!(94.5));
        assert_eq!(state.phase, SignalPhase::Triggered);
    }

    #[test]
    fn test_next_bar_recovery_triggers() {
        let mut state = SweepState::new(SweepConfig::default());

        // Bar 1: penetrates and closes below the level -> pending
        let mut candles = base_history();
        candles.push(bar(local(10, 20), dec!(96), dec!(96), dec!(94), dec!(94.5), dec!(25)));
        let snapshot = snapshot_from("KRW-ETH", candles.clone());
        let features = features_fixture(dec!(94.5), dec!(100), dec!(2));
        let ctx = StrategyContext {
            snapshot: &snapshot,
            features: &features,
            now_local: local(10, 20),
        };
        assert!(state.update(&ctx).is_none());
        assert_eq!(state.phase, SignalPhase::Armed);

        // Bar 2: closes back above 95 -> long with stop at the sweep low
        candles.push(bar(local(10, 25), dec!(94.5), dec!(96.5), dec!(93.8), dec!(96), dec!(30)));
        let snapshot = snapshot_from("KRW-ETH", candles);
        let features = features_fixture(dec!(96), dec!(100), dec!(2));
        let ctx = StrategyContext {
            snapshot: &snapshot,
            features: &features,
            now_local: local(10, 25),
        };
        let trigger = state.update(&ctx).expect("recovery");
        assert_eq!(trigger.direction, Direction::Long);
        assert_eq!(trigger.stop_price, dec!(93.8)); // extreme across both bars
    }

    #[test]
    fn test_no_recovery_expires_after_next_bar() {
        let mut state = SweepState::new(SweepConfig::default());

        let mut candles = base_history();
        candles.push(bar(local(10, 20), dec!(96), dec!(96), dec!(94), dec!(94.5), dec!(25)));
        let snapshot = snapshot_from("KRW-ETH", candles.clone());
        let features = features_fixture(dec!(94.5), dec!(100), dec!(2));
        let ctx = StrategyContext {
            snapshot: &snapshot,
            features: &features,
            now_local: local(10, 20),
        };
        state.update(&ctx);

        // Next bar keeps closing below the level: pending expires
        candles.push(bar(local(10, 25), dec!(94.5), dec!(94.8), dec!(93), dec!(93.5), dec!(10)));
        let snapshot = snapshot_from("KRW-ETH", candles);
        let features = features_fixture(dec!(93.5), dec!(100), dec!(2));
        let ctx = StrategyContext {
            snapshot: &snapshot,
            features: &features,
            now_local: local(10, 25),
        };
        assert!(state.update(&ctx).is_none());
        assert_eq!(state.phase, SignalPhase::Idle);
    }

    #[test]
    fn test_short_sweep_of_swing_high() {
        let mut state = SweepState::new(SweepConfig::default());
        let mut candles = base_history();
        // Spikes through 108 and closes back below it
        candles.push(bar(local(10, 20), dec!(107), dec!(109.5), dec!(106), dec!(107), dec!(25)));
        let snapshot = snapshot_from("KRW-ETH", candles);
        let features = features_fixture(dec!(107), dec!(100), dec!(2));
        let ctx = StrategyContext {
            snapshot: &snapshot,
            features: &features,
            now_local: local(10, 20),
        };

        let trigger = state.update(&ctx).expect("short sweep");
        assert_eq!(trigger.direction, Direction::Short);
        assert_eq!(trigger.stop_price, dec!(109.5));
    }
}
