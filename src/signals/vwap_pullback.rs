//! Session-VWAP pullback strategy.
//!
//! Arms once price has extended a configured distance away from session VWAP
//! with EMA alignment; triggers when price pulls back into the VWAP band,
//! expecting continuation in the prior trend direction.

use crate::config::VwapPullbackConfig;
use crate::signals::{Direction, SignalPhase, StrategyContext, Trigger};
use rust_decimal::Decimal;
use tracing::debug;

/// One market's pullback machine.
pub struct PullbackState {
    config: VwapPullbackConfig,
    pub phase: SignalPhase,
    bias: Option<Direction>,
    /// Furthest close from VWAP observed while armed
    extreme: Option<Decimal>,
}

impl PullbackState {
    pub fn new(config: VwapPullbackConfig) -> Self {
        Self {
            config,
            phase: SignalPhase::Idle,
            bias: None,
            extreme: None,
        }
    }

    pub fn update(&mut self, ctx: &StrategyContext<'_>) -> Option<Trigger> {
        if !self.config.enabled {
            return None;
        }

        let f = ctx.features;
        let price = ctx.snapshot.price;
        let vwap = f.session_vwap;
        if vwap <= Decimal::ZERO {
            return None;
        }

        // Signed extension of price from VWAP, as a fraction of VWAP
        let extension = (price - vwap) / vwap;

        match self.phase {
            SignalPhase::Idle => {
                let bias = if f.ema_fast > f.ema_slow && extension >= self.config.min_pullback_pct
                {
                    Direction::Long
                } else if f.ema_fast < f.ema_slow && -extension >= self.config.min_pullback_pct {
                    Direction::Short
                } else {
                    return None;
                };

                debug!(
                    symbol = %ctx.snapshot.symbol,
                    ?bias,
                    %extension,
                    "Pullback armed"
                );
                self.phase = SignalPhase::Armed;
                self.bias = Some(bias);
                self.extreme = Some(price);
                None
            }
            SignalPhase::Armed => {
                let bias = self.bias?;

                // Track the furthest excursion away from VWAP
                let extreme = self.extreme.get_or_insert(price);
                match bias {
                    Direction::Long => *extreme = (*extreme).max(price),
                    Direction::Short => *extreme = (*extreme).min(price),
                }
                let extreme = *extreme;

                let peak_extension = ((extreme - vwap) / vwap).abs();
                if peak_extension > self.config.max_pullback_pct {
                    // Moved too far from VWAP; a return now is a trend break,
                    // not a pullback entry.
                    self.phase = SignalPhase::Idle;
                    self.bias = None;
                    self.extreme = None;
                    return None;
                }

                if self.config.require_ema_alignment {
                    let aligned = match bias {
                        Direction::Long => f.ema_fast > f.ema_slow,
                        Direction::Short => f.ema_fast < f.ema_slow,
                    };
                    if !aligned {
                        self.phase = SignalPhase::Idle;
                        self.bias = None;
                        self.extreme = None;
                        return None;
                    }
                }

                let band = self.config.zone_atr_mult * f.atr;
                if (price - vwap).abs() > band {
                    return None;
                }
                if peak_extension < self.config.min_pullback_pct {
                    return None;
                }

                self.phase = SignalPhase::Triggered;
                let stop_offset = self.config.stop_atr_mult * f.atr;
                let stop_price = match bias {
                    Direction::Long => vwap - stop_offset,
                    Direction::Short => vwap + stop_offset,
                };

                Some(Trigger {
                    direction: bias,
                    entry_price: price,
                    stop_price,
                })
            }
            _ => None,
        }
    }
}
