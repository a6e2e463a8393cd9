//! Market scanner: bounded-concurrency polling, filtering, and ranking.
//!
//! Each cycle enumerates eligible markets, fetches snapshots through a
//! semaphore-bounded worker pool, computes features, applies the hard
//! filters, and returns the top-K candidates. A single market's failure
//! never aborts the scan; it is counted and skipped.

use crate::config::ScannerConfig;
use crate::exchange::traits::MarketData;
use crate::exchange::types::{Candle, ExchangeError, MarketSnapshot};
use crate::features::{FeatureEngine, FeatureVector};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

/// A shortlisted market with its per-cycle snapshot and features.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub symbol: String,
    pub snapshot: MarketSnapshot,
    pub features: FeatureVector,
}

/// Why markets fell out of a cycle, for the per-cycle summary log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectCounts {
    pub fetch_failed: usize,
    pub feature_unavailable: usize,
    pub low_rvol: usize,
    pub wide_spread: usize,
    pub no_trend: usize,
    pub low_score: usize,
}

/// Outcome of one scan cycle.
#[derive(Debug)]
pub struct ScanReport {
    pub candidates: Vec<Candidate>,
    /// Markets that passed the volume floor and were fetched
    pub scanned: usize,
    pub rejected: RejectCounts,
    /// Benchmark candles for the cycle (reused by downstream consumers)
    pub benchmark_candles: Vec<Candle>,
}

/// Scans all tradable markets and emits a ranked candidate shortlist.
pub struct Scanner {
    market_data: Arc<dyn MarketData>,
    engine: FeatureEngine,
    config: ScannerConfig,
    fetch_pool: Arc<Semaphore>,
}

impl Scanner {
    pub fn new(
        market_data: Arc<dyn MarketData>,
        config: ScannerConfig,
        max_concurrent_requests: usize,
    ) -> Self {
        Self {
            market_data,
            engine: FeatureEngine::new(config.clone()),
            fetch_pool: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
            config,
        }
    }

    /// Run one scan cycle.
    ///
    /// Errors only when the market list or benchmark history cannot be
    /// fetched at all; per-market failures are absorbed into the report.
    #[instrument(skip(self), fields(benchmark = %self.config.rs_benchmark))]
    pub async fn scan(&self, session_open: DateTime<Utc>) -> Result<ScanReport, ExchangeError> {
        let markets = self.market_data.list_markets().await?;
        let mut eligible: Vec<String> = markets
            .iter()
            .filter(|m| m.is_trading() && m.quote_volume_24h >= self.config.min_volume_24h)
            .map(|m| m.symbol.clone())
            .collect();

        // Highest-volume markets first; symbol order breaks volume ties so a
        // repeated scan over unchanged data visits the same set.
        eligible.sort_by(|a, b| {
            let va = markets.iter().find(|m| &m.symbol == a).map(|m| m.quote_volume_24h);
            let vb = markets.iter().find(|m| &m.symbol == b).map(|m| m.quote_volume_24h);
            vb.cmp(&va).then_with(|| a.cmp(b))
        });
        eligible.truncate(self.config.max_markets_to_scan);

        let benchmark_candles = self
            .market_data
            .get_candles(
                &self.config.rs_benchmark,
                self.config.candle_unit_minutes,
                self.config.candle_count,
            )
            .await?;

        let scanned = eligible.len();
        let snapshots = self.fetch_snapshots(eligible).await;

        let mut rejected = RejectCounts::default();
        let mut candidates = Vec::new();

        for (symbol, result) in snapshots {
            let snapshot = match result {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(%symbol, error = %e, "Snapshot fetch failed, skipping market this cycle");
                    rejected.fetch_failed += 1;
                    continue;
                }
            };

            let features = match self
                .engine
                .compute(&snapshot, &benchmark_candles, session_open)
            {
                Ok(features) => features,
                Err(e) => {
                    debug!(%symbol, reason = %e, "Features unavailable");
                    rejected.feature_unavailable += 1;
                    continue;
                }
            };

            if features.rvol < self.config.rvol_threshold {
                rejected.low_rvol += 1;
                continue;
            }
            if features.spread_bp > self.config.spread_bp_max {
                rejected.wide_spread += 1;
                continue;
            }
            if self.config.require_trend && !features.trend {
                rejected.no_trend += 1;
                continue;
            }
            if features.score < self.config.min_score {
                rejected.low_score += 1;
                continue;
            }

            candidates.push(Candidate {
                symbol,
                snapshot,
                features,
            });
        }

        let candidates = rank_candidates(candidates, self.config.candidate_count);

        info!(
            scanned,
            qualified = candidates.len(),
            fetch_failed = rejected.fetch_failed,
            feature_unavailable = rejected.feature_unavailable,
            low_rvol = rejected.low_rvol,
            wide_spread = rejected.wide_spread,
            no_trend = rejected.no_trend,
            low_score = rejected.low_score,
            "Market scan complete"
        );

        Ok(ScanReport {
            candidates,
            scanned,
            rejected,
            benchmark_candles,
        })
    }

    /// Fetch snapshots for all markets through the bounded pool, each under
    /// its own timeout.
    async fn fetch_snapshots(
        &self,
        symbols: Vec<String>,
    ) -> Vec<(String, Result<MarketSnapshot, ExchangeError>)> {
        let timeout = Duration::from_secs(self.config.fetch_timeout_secs);
        let unit = self.config.candle_unit_minutes;
        let count = self.config.candle_count;

        let tasks = symbols.into_iter().map(|symbol| {
            let market_data = Arc::clone(&self.market_data);
            let pool = Arc::clone(&self.fetch_pool);
            tokio::spawn(async move {
                let _permit = pool.acquire_owned().await.expect("semaphore never closed");
                let result =
                    tokio::time::timeout(timeout, fetch_snapshot(&*market_data, &symbol, unit, count))
                        .await
                        .unwrap_or(Err(ExchangeError::Timeout));
                (symbol, result)
            })
        });

        join_all(tasks)
            .await
            .into_iter()
            .filter_map(|joined| joined.ok())
            .collect()
    }
}

/// Assemble an immutable snapshot from candles and the order book.
async fn fetch_snapshot(
    market_data: &dyn MarketData,
    symbol: &str,
    unit_minutes: u32,
    count: u32,
) -> Result<MarketSnapshot, ExchangeError> {
    let candles = market_data.get_candles(symbol, unit_minutes, count).await?;
    let book = market_data.get_order_book(symbol).await?;

    let last = candles
        .last()
        .ok_or_else(|| ExchangeError::Parse(format!("empty candle response for {symbol}")))?;

    Ok(MarketSnapshot {
        symbol: symbol.to_string(),
        price: last.close,
        last_volume: last.volume,
        candles: candles.clone(),
        book,
        captured_at: Utc::now(),
    })
}

/// Rank by descending score; ties by tighter spread, then symbol.
pub fn rank_candidates(mut candidates: Vec<Candidate>, count: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.features
            .score
            .cmp(&a.features.score)
            .then_with(|| {
                a.features
                    .spread_bp
                    .partial_cmp(&b.features.spread_bp)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    candidates.truncate(count);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScannerConfig;
    use crate::exchange::traits::MockMarketData;
    use crate::exchange::types::{MarketInfo, OrderBook, OrderBookLevel};
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn test_config() -> ScannerConfig {
        ScannerConfig {
            candle_unit_minutes: 5,
            candle_count: 20,
            min_volume_24h: dec!(1_000_000),
            max_markets_to_scan: 10,
            rvol_threshold: dec!(2),
            rvol_window: 5,
            spread_bp_max: dec!(5),
            rs_window_minutes: 15,
            rs_benchmark: "KRW-BTC".to_string(),
            ema_fast: 3,
            ema_slow: 5,
            require_trend: false,
            min_score: Decimal::ZERO,
            ..ScannerConfig::default()
        }
    }

    fn ts(i: usize) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 1, 0, 0).unwrap()
            + chrono::Duration::minutes(5 * i as i64)
    }

    /// Rising closes with a final volume spike; qualifies under test_config.
    fn hot_candles() -> Vec<Candle> {
        (0..12)
            .map(|i| {
                let close = dec!(100) + Decimal::from(i as u64);
                Candle {
                    timestamp: ts(i),
                    open: close,
                    high: close + dec!(1),
                    low: close - dec!(1),
                    close,
                    volume: if i == 11 { dec!(30) } else { dec!(10) },
                }
            })
            .collect()
    }

    fn flat_benchmark() -> Vec<Candle> {
        (0..12)
            .map(|i| Candle {
                timestamp: ts(i),
                open: dec!(50000),
                high: dec!(50001),
                low: dec!(49999),
                close: dec!(50000),
                volume: dec!(100),
            })
            .collect()
    }

    fn tight_book(symbol: &str) -> OrderBook {
        OrderBook {
            symbol: symbol.to_string(),
            levels: vec![OrderBookLevel {
                bid_price: dec!(9999),
                bid_size: dec!(50),
                ask_price: dec!(10001),
                ask_size: dec!(50),
            }],
        }
    }

    fn market(symbol: &str, volume: Decimal) -> MarketInfo {
        MarketInfo {
            symbol: symbol.to_string(),
            quote_volume_24h: volume,
            status: "TRADING".to_string(),
        }
    }

    fn feature_fixture(score: Decimal, spread_bp: Decimal) -> FeatureVector {
        FeatureVector {
            price: dec!(100),
            rvol: dec!(3),
            rs: dec!(0.03),
            session_vwap: dec!(99),
            atr: dec!(1),
            ema_fast: dec!(100),
            ema_slow: dec!(99),
            trend: true,
            spread_bp,
            depth_score: dec!(0.5),
            rvol_norm: dec!(1),
            rs_norm: dec!(1),
            score,
        }
    }

    fn candidate_fixture(symbol: &str, score: Decimal, spread_bp: Decimal) -> Candidate {
        Candidate {
            symbol: symbol.to_string(),
            snapshot: MarketSnapshot {
                symbol: symbol.to_string(),
                price: dec!(100),
                last_volume: dec!(30),
                candles: hot_candles(),
                book: tight_book(symbol),
                captured_at: ts(11),
            },
            features: feature_fixture(score, spread_bp),
        }
    }

    #[test]
    fn test_rank_orders_by_score_then_spread_then_symbol() {
        let ranked = rank_candidates(
            vec![
                candidate_fixture("KRW-CCC", dec!(0.8), dec!(3)),
                candidate_fixture("KRW-BBB", dec!(0.9), dec!(4)),
                candidate_fixture("KRW-AAA", dec!(0.9), dec!(2)),
                candidate_fixture("KRW-DDD", dec!(0.9), dec!(2)),
            ],
            3,
        );

        let symbols: Vec<&str> = ranked.iter().map(|c| c.symbol.as_str()).collect();
        // Same score: tighter spread wins; same spread: symbol order
        assert_eq!(symbols, vec!["KRW-AAA", "KRW-DDD", "KRW-BBB"]);
    }

    #[test]
    fn test_rank_never_exceeds_count() {
        let ranked = rank_candidates(
            (0..10)
                .map(|i| candidate_fixture(&format!("KRW-M{i:02}"), dec!(0.7), dec!(2)))
                .collect(),
            3,
        );
        assert_eq!(ranked.len(), 3);
    }

    #[tokio::test]
    async fn test_scan_excludes_failed_market_and_keeps_rest() {
        let mut mock = MockMarketData::new();

        mock.expect_list_markets().returning(|| {
            Ok(vec![
                market("KRW-ETH", dec!(9_000_000)),
                market("KRW-SOL", dec!(8_000_000)),
                market("KRW-DUST", dec!(10)), // below volume floor, never fetched
            ])
        });

        mock.expect_get_candles()
            .withf(|symbol, _, _| symbol == "KRW-BTC")
            .returning(|_, _, _| Ok(flat_benchmark()));
        mock.expect_get_candles()
            .withf(|symbol, _, _| symbol == "KRW-ETH")
            .returning(|_, _, _| Ok(hot_candles()));
        mock.expect_get_candles()
            .withf(|symbol, _, _| symbol == "KRW-SOL")
            .returning(|_, _, _| Err(ExchangeError::Timeout));

        mock.expect_get_order_book()
            .withf(|symbol| symbol == "KRW-ETH")
            .returning(|s| Ok(tight_book(s)));

        let scanner = Scanner::new(Arc::new(mock), test_config(), 2);
        let report = scanner.scan(ts(0)).await.unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.rejected.fetch_failed, 1);
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.candidates[0].symbol, "KRW-ETH");
        assert_eq!(report.candidates[0].features.rvol, dec!(3));
    }

    #[tokio::test]
    async fn test_scan_filters_low_rvol() {
        let mut mock = MockMarketData::new();

        mock.expect_list_markets()
            .returning(|| Ok(vec![market("KRW-ETH", dec!(9_000_000))]));
        mock.expect_get_candles()
            .withf(|symbol, _, _| symbol == "KRW-BTC")
            .returning(|_, _, _| Ok(flat_benchmark()));
        // Uniform volume: rvol = 1.0, below the 2.0 threshold
        mock.expect_get_candles()
            .withf(|symbol, _, _| symbol == "KRW-ETH")
            .returning(|_, _, _| {
                Ok(hot_candles()
                    .into_iter()
                    .map(|mut c| {
                        c.volume = dec!(10);
                        c
                    })
                    .collect())
            });
        mock.expect_get_order_book()
            .returning(|s| Ok(tight_book(s)));

        let scanner = Scanner::new(Arc::new(mock), test_config(), 2);
        let report = scanner.scan(ts(0)).await.unwrap();

        assert!(report.candidates.is_empty());
        assert_eq!(report.rejected.low_rvol, 1);
    }
}
