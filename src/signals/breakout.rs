//! Opening-range breakout strategy.
//!
//! The box is the high/low formed during the configured opening window.
//! After the window closes the machine arms; a close beyond the box bound
//! plus an ATR buffer, on spiked volume, triggers with the stop at the
//! opposite bound.

use crate::config::BreakoutConfig;
use crate::session::SessionWindow;
use crate::signals::{Direction, SignalPhase, StrategyContext, Trigger};
use crate::utils::decimal::mean;
use rust_decimal::Decimal;
use tracing::debug;

/// Opening-range box accumulated for the current session.
#[derive(Debug, Clone, Copy)]
struct RangeBox {
    high: Decimal,
    low: Decimal,
    bars: usize,
}

/// One market's breakout machine.
pub struct BreakoutState {
    config: BreakoutConfig,
    window: SessionWindow,
    pub phase: SignalPhase,
    boxed: Option<RangeBox>,
}

impl BreakoutState {
    pub fn new(config: BreakoutConfig, window: SessionWindow) -> Self {
        Self {
            config,
            window,
            phase: SignalPhase::Idle,
            boxed: None,
        }
    }

    pub fn update(&mut self, ctx: &StrategyContext<'_>) -> Option<Trigger> {
        if !self.config.enabled {
            return None;
        }

        if self.phase == SignalPhase::Idle {
            self.boxed = self.build_box(ctx);
            let past_window = ctx.now_local.time() >= self.window.end;
            if past_window {
                match self.boxed {
                    Some(boxed) => {
                        debug!(
                            symbol = %ctx.snapshot.symbol,
                            high = %boxed.high,
                            low = %boxed.low,
                            bars = boxed.bars,
                            "Opening range armed"
                        );
                        self.phase = SignalPhase::Armed;
                    }
                    // No bars fell inside today's window; nothing to break out of.
                    None => return None,
                }
            }
        }

        if self.phase != SignalPhase::Armed {
            return None;
        }

        let boxed = self.boxed?;
        let close = ctx.snapshot.price;
        let buffer = self.config.breakout_atr_mult * ctx.features.atr;

        let direction = if close > boxed.high + buffer {
            Direction::Long
        } else if close < boxed.low - buffer {
            Direction::Short
        } else {
            return None;
        };

        if !self.volume_confirmed(ctx) {
            return None;
        }

        self.phase = SignalPhase::Triggered;
        let stop_price = match direction {
            Direction::Long => boxed.low,
            Direction::Short => boxed.high,
        };

        Some(Trigger {
            direction,
            entry_price: close,
            stop_price,
        })
    }

    /// Box over candles whose local time falls inside the opening window of
    /// the current local date. Rebuilt each cycle so a machine created after
    /// the window still sees the full range.
    fn build_box(&self, ctx: &StrategyContext<'_>) -> Option<RangeBox> {
        let offset = *ctx.now_local.offset();
        let today = ctx.now_local.date_naive();

        let mut boxed: Option<RangeBox> = None;
        for candle in &ctx.snapshot.candles {
            let local = candle.timestamp.with_timezone(&offset);
            if local.date_naive() != today || !self.window.contains(local.time()) {
                continue;
            }
            boxed = Some(match boxed {
                None => RangeBox {
                    high: candle.high,
                    low: candle.low,
                    bars: 1,
                },
                Some(b) => RangeBox {
                    high: b.high.max(candle.high),
                    low: b.low.min(candle.low),
                    bars: b.bars + 1,
                },
            });
        }
        boxed
    }

    /// Latest bar volume at least `volume_spike_mult` times the recent average.
    fn volume_confirmed(&self, ctx: &StrategyContext<'_>) -> bool {
        let candles = &ctx.snapshot.candles;
        if candles.len() < 2 {
            return false;
        }

        let prior: Vec<Decimal> = candles[..candles.len() - 1]
            .iter()
            .rev()
            .take(self.config.volume_lookback)
            .map(|c| c.volume)
            .collect();
        let baseline = mean(&prior);
        if baseline <= Decimal::ZERO {
            return false;
        }

        ctx.snapshot.last_volume >= self.config.volume_spike_mult * baseline
    }
}
