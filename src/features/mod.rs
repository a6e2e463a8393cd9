//! Streaming feature computation for scanned markets.
//!
//! Converts a market snapshot (plus the benchmark's candles) into the fixed
//! feature vector used for filtering, scoring, and signal evaluation: RVOL,
//! relative strength, session VWAP, ATR, EMA trend, spread, and order-book
//! depth. Every ratio treats a zero denominator as "feature unavailable"
//! rather than propagating infinity.

use crate::config::ScannerConfig;
use crate::exchange::types::{Candle, MarketSnapshot, OrderBook};
use crate::utils::decimal::{clamp, mean, simple_return};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

/// A market is silently excluded from candidacy when its features cannot be
/// computed; none of these variants are operator-facing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeatureError {
    #[error("insufficient history: need {needed} bars, got {got}")]
    InsufficientHistory { needed: usize, got: usize },
    #[error("volume baseline is zero")]
    ZeroVolumeBaseline,
    #[error("no traded volume since session open")]
    NoSessionVolume,
    #[error("order book is empty or crossed")]
    BadOrderBook,
}

/// Per-market, per-cycle derived values.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    pub price: Decimal,
    /// Latest window volume over the prior-window average
    pub rvol: Decimal,
    /// Market return minus benchmark return over the lookback
    pub rs: Decimal,
    pub session_vwap: Decimal,
    pub atr: Decimal,
    pub ema_fast: Decimal,
    pub ema_slow: Decimal,
    /// EMA fast above slow and price above session VWAP
    pub trend: bool,
    pub spread_bp: Decimal,
    /// Log-normalized order-book depth in [0, 1]
    pub depth_score: Decimal,
    pub rvol_norm: Decimal,
    pub rs_norm: Decimal,
    /// Composite candidate score
    pub score: Decimal,
}

/// Technical feature calculation engine.
pub struct FeatureEngine {
    config: ScannerConfig,
}

impl FeatureEngine {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Compute the full feature vector for one market.
    ///
    /// `benchmark_candles` must use the same candle unit as the snapshot;
    /// `session_open` anchors the session VWAP.
    pub fn compute(
        &self,
        snapshot: &MarketSnapshot,
        benchmark_candles: &[Candle],
        session_open: DateTime<Utc>,
    ) -> Result<FeatureVector, FeatureError> {
        let candles = &snapshot.candles;
        let rs_periods = (self.config.rs_window_minutes / self.config.candle_unit_minutes) as usize;
        let needed = (self.config.rvol_window + 1)
            .max(self.config.ema_slow)
            .max(rs_periods + 1);

        if candles.len() < needed {
            return Err(FeatureError::InsufficientHistory {
                needed,
                got: candles.len(),
            });
        }

        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<Decimal> = candles.iter().map(|c| c.volume).collect();
        let benchmark_closes: Vec<Decimal> = benchmark_candles.iter().map(|c| c.close).collect();

        let price = snapshot.price;
        let rvol = rvol(&volumes, self.config.rvol_window)?;
        let rs = relative_strength(&closes, &benchmark_closes, rs_periods);
        let session_vwap = session_vwap(candles, session_open)?;
        let atr = atr(candles, 14);
        let ema_fast = *ema(&closes, self.config.ema_fast)
            .last()
            .unwrap_or(&price);
        let ema_slow = *ema(&closes, self.config.ema_slow)
            .last()
            .unwrap_or(&price);
        let trend = ema_fast > ema_slow && price > session_vwap;
        let spread_bp = spread_bp(&snapshot.book)?;
        let depth_score = depth_score(&snapshot.book, self.config.depth_log_scale);

        let rvol_norm = normalize_rvol(rvol, self.config.rvol_norm_cap);
        let rs_norm = normalize_rs(rs, self.config.rs_norm_cap);
        let score = self.composite_score(rs_norm, rvol_norm, trend, depth_score);

        Ok(FeatureVector {
            price,
            rvol,
            rs,
            session_vwap,
            atr,
            ema_fast,
            ema_slow,
            trend,
            spread_bp,
            depth_score,
            rvol_norm,
            rs_norm,
            score,
        })
    }

    /// Weighted composite of the normalized sub-scores.
    pub fn composite_score(
        &self,
        rs_norm: Decimal,
        rvol_norm: Decimal,
        trend: bool,
        depth_score: Decimal,
    ) -> Decimal {
        let w = &self.config.score_weights;
        let trend_value = if trend { Decimal::ONE } else { Decimal::ZERO };
        w.rs * rs_norm + w.rvol * rvol_norm + w.trend * trend_value + w.depth * depth_score
    }
}

/// Relative volume: latest window over the mean of the prior `window` windows.
///
/// The current (possibly partial) bar is the numerator; the baseline excludes
/// it. A flat series yields exactly 1.0.
pub fn rvol(volumes: &[Decimal], window: usize) -> Result<Decimal, FeatureError> {
    if volumes.len() < window + 1 {
        return Err(FeatureError::InsufficientHistory {
            needed: window + 1,
            got: volumes.len(),
        });
    }

    let recent = volumes[volumes.len() - 1];
    let baseline = mean(&volumes[volumes.len() - 1 - window..volumes.len() - 1]);

    if baseline <= Decimal::ZERO {
        return Err(FeatureError::ZeroVolumeBaseline);
    }

    Ok(recent / baseline)
}

/// Return over the trailing `periods` bars; zero when history is short or the
/// start price is zero.
pub fn trailing_return(closes: &[Decimal], periods: usize) -> Decimal {
    if closes.len() < periods + 1 {
        return Decimal::ZERO;
    }
    let start = closes[closes.len() - 1 - periods];
    let end = closes[closes.len() - 1];
    simple_return(start, end)
}

/// Relative strength: market return minus benchmark return over the same
/// lookback.
pub fn relative_strength(
    closes: &[Decimal],
    benchmark_closes: &[Decimal],
    periods: usize,
) -> Decimal {
    trailing_return(closes, periods) - trailing_return(benchmark_closes, periods)
}

/// Session VWAP: Σ(close·volume) / Σ(volume) over candles since session open.
pub fn session_vwap(
    candles: &[Candle],
    session_open: DateTime<Utc>,
) -> Result<Decimal, FeatureError> {
    let mut pv = Decimal::ZERO;
    let mut v = Decimal::ZERO;

    for candle in candles.iter().filter(|c| c.timestamp >= session_open) {
        pv += candle.close * candle.volume;
        v += candle.volume;
    }

    if v <= Decimal::ZERO {
        return Err(FeatureError::NoSessionVolume);
    }

    Ok(pv / v)
}

/// Exponential moving average over the full series.
pub fn ema(values: &[Decimal], period: usize) -> Vec<Decimal> {
    if values.is_empty() || period == 0 {
        return Vec::new();
    }

    let alpha = Decimal::from(2) / Decimal::from(period as u64 + 1);
    let mut out = Vec::with_capacity(values.len());
    let mut current = values[0];
    out.push(current);

    for value in &values[1..] {
        current = alpha * *value + (Decimal::ONE - alpha) * current;
        out.push(current);
    }

    out
}

/// Average true range: simple average of TR over the trailing `period` bars.
/// Falls back to the mean high-low range when history is short.
pub fn atr(candles: &[Candle], period: usize) -> Decimal {
    if candles.is_empty() {
        return Decimal::ZERO;
    }
    if candles.len() < 2 {
        return candles[0].high - candles[0].low;
    }

    let mut true_ranges = Vec::with_capacity(candles.len() - 1);
    for pair in candles.windows(2) {
        let prev_close = pair[0].close;
        let bar = &pair[1];
        let tr = (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs());
        true_ranges.push(tr);
    }

    let tail = if true_ranges.len() >= period {
        &true_ranges[true_ranges.len() - period..]
    } else {
        &true_ranges[..]
    };
    mean(tail)
}

/// Bid-ask spread in basis points off the mid price.
pub fn spread_bp(book: &OrderBook) -> Result<Decimal, FeatureError> {
    let (bid, ask) = match (book.best_bid(), book.best_ask()) {
        (Some(b), Some(a)) if b > Decimal::ZERO && a >= b => (b, a),
        _ => return Err(FeatureError::BadOrderBook),
    };

    let mid = (bid + ask) / dec!(2);
    Ok((ask - bid) / mid * dec!(10000))
}

/// Order-book depth normalized to [0, 1] on a log scale.
pub fn depth_score(book: &OrderBook, log_scale: f64) -> Decimal {
    let total = book.total_depth();
    if total <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    // Depth is a unitless score, not an accounting quantity; the log lives
    // in f64.
    let depth = total.to_f64().unwrap_or(0.0);
    let normalized = ((1.0 + depth).ln() / log_scale).clamp(0.0, 1.0);
    Decimal::from_f64_retain(normalized)
        .unwrap_or(Decimal::ZERO)
        .round_dp(6)
}

/// Map raw RVOL into [0, 1]: 1.0 at `cap`, 0 at or below 1.0.
pub fn normalize_rvol(rvol: Decimal, cap: Decimal) -> Decimal {
    if cap <= Decimal::ONE {
        return Decimal::ZERO;
    }
    clamp((rvol - Decimal::ONE) / (cap - Decimal::ONE), Decimal::ZERO, Decimal::ONE)
}

/// Map raw RS into [-1, 1]: ±`cap` return maps to ±1.
pub fn normalize_rs(rs: Decimal, cap: Decimal) -> Decimal {
    if cap <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    clamp(rs / cap, -Decimal::ONE, Decimal::ONE)
}
