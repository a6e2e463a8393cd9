//! Configuration management for the trading engine.
//!
//! Loads settings from environment variables and config files.

use crate::session::SessionWindow;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Exchange connection settings
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Scanner thresholds and scoring
    #[serde(default)]
    pub scanner: ScannerConfig,
    /// Signal strategy parameters
    #[serde(default)]
    pub signals: SignalsConfig,
    /// Risk management parameters
    #[serde(default)]
    pub risk: RiskConfig,
    /// Order execution parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Session windows and loop cadence
    #[serde(default)]
    pub session: SessionConfig,
    /// Notification delivery
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Path to the SQLite risk journal
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// REST API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    /// Concurrent request cap for the scan worker pool
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

/// Composite score weights. Must sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_weight_rs")]
    pub rs: Decimal,
    #[serde(default = "default_weight_rvol")]
    pub rvol: Decimal,
    #[serde(default = "default_weight_trend")]
    pub trend: Decimal,
    #[serde(default = "default_weight_depth")]
    pub depth: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Candle unit in minutes
    #[serde(default = "default_candle_unit")]
    pub candle_unit_minutes: u32,
    /// Number of candles fetched per market
    #[serde(default = "default_candle_count")]
    pub candle_count: u32,
    /// Minimum 24h quote volume for a market to be scanned
    #[serde(default = "default_min_volume_24h")]
    pub min_volume_24h: Decimal,
    /// Cap on markets fetched per cycle (rate-limit protection)
    #[serde(default = "default_max_markets_to_scan")]
    pub max_markets_to_scan: usize,
    /// RVOL hard filter
    #[serde(default = "default_rvol_threshold")]
    pub rvol_threshold: Decimal,
    /// RVOL baseline window (prior equal-length windows)
    #[serde(default = "default_rvol_window")]
    pub rvol_window: usize,
    /// Maximum bid-ask spread in basis points
    #[serde(default = "default_spread_bp_max")]
    pub spread_bp_max: Decimal,
    /// Relative-strength lookback in minutes
    #[serde(default = "default_rs_window_minutes")]
    pub rs_window_minutes: u32,
    /// Benchmark symbol for relative strength
    #[serde(default = "default_rs_benchmark")]
    pub rs_benchmark: String,
    /// Fast EMA period for the trend flag
    #[serde(default = "default_ema_fast")]
    pub ema_fast: usize,
    /// Slow EMA period for the trend flag
    #[serde(default = "default_ema_slow")]
    pub ema_slow: usize,
    /// Require trend = 1 to qualify
    #[serde(default = "default_require_trend")]
    pub require_trend: bool,
    /// Minimum composite score to qualify
    #[serde(default = "default_min_score")]
    pub min_score: Decimal,
    /// Number of top candidates returned per cycle
    #[serde(default = "default_candidate_count")]
    pub candidate_count: usize,
    /// RVOL value that maps to rvol_norm = 1.0
    #[serde(default = "default_rvol_norm_cap")]
    pub rvol_norm_cap: Decimal,
    /// RS value (as a return) that maps to rs_norm = 1.0
    #[serde(default = "default_rs_norm_cap")]
    pub rs_norm_cap: Decimal,
    /// Log-scale divisor for order-book depth normalization
    #[serde(default = "default_depth_log_scale")]
    pub depth_log_scale: f64,
    /// Per-market fetch timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub score_weights: ScoreWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakoutConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Opening-range window, exchange-local "HH:MM-HH:MM"
    #[serde(default = "default_box_window")]
    pub box_window: String,
    /// ATR multiplier added beyond the box bound for confirmation
    #[serde(default = "default_breakout_atr_mult")]
    pub breakout_atr_mult: Decimal,
    /// Volume spike multiple vs. recent average required at the trigger
    #[serde(default = "default_orb_volume_spike_mult")]
    pub volume_spike_mult: Decimal,
    /// Bars of volume history used for the spike baseline
    #[serde(default = "default_volume_lookback")]
    pub volume_lookback: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VwapPullbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Entry band half-width around session VWAP, in ATRs
    #[serde(default = "default_zone_atr_mult")]
    pub zone_atr_mult: Decimal,
    /// Stop distance beyond VWAP, in ATRs
    #[serde(default = "default_stop_atr_mult")]
    pub stop_atr_mult: Decimal,
    /// Minimum extension away from VWAP before a pullback arms (fraction)
    #[serde(default = "default_min_pullback_pct")]
    pub min_pullback_pct: Decimal,
    /// Maximum extension; larger moves are treated as trend breaks
    #[serde(default = "default_max_pullback_pct")]
    pub max_pullback_pct: Decimal,
    /// Require EMA fast > slow alignment in the entry direction
    #[serde(default = "default_true")]
    pub require_ema_alignment: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bars scanned for swing highs/lows
    #[serde(default = "default_swing_lookback")]
    pub swing_lookback: usize,
    /// Bars on each side required to confirm a pivot
    #[serde(default = "default_pivot_strength")]
    pub pivot_strength: usize,
    /// Minimum penetration beyond the swing level, in ATRs
    #[serde(default = "default_penetration_atr_mult")]
    pub penetration_atr_mult: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsConfig {
    #[serde(default)]
    pub breakout: BreakoutConfig,
    #[serde(default)]
    pub vwap_pullback: VwapPullbackConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Paper-mode account equity baseline at first session start
    #[serde(default = "default_starting_equity")]
    pub starting_equity: Decimal,
    /// Per-trade risk as a fraction of account equity
    #[serde(default = "default_per_trade_risk_pct")]
    pub per_trade_risk_pct: Decimal,
    /// Daily drawdown stop as a fraction of day-start equity
    #[serde(default = "default_daily_drawdown_stop_pct")]
    pub daily_drawdown_stop_pct: Decimal,
    /// Consecutive losing closes before a market is refused
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    /// Exchange minimum order notional
    #[serde(default = "default_min_position_value")]
    pub min_position_value: Decimal,
    /// Hard cap on a single position's notional
    #[serde(default = "default_max_position_value")]
    pub max_position_value: Decimal,
    /// Take-profit distance as a multiple of the risk distance
    #[serde(default = "default_target_r_multiple")]
    pub target_r_multiple: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Simulated slippage in basis points (paper mode)
    #[serde(default = "default_slippage_bp")]
    pub slippage_bp: Decimal,
    /// Taker fee rate applied to simulated fills
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
    /// Seconds to wait for an entry fill before cancelling
    #[serde(default = "default_order_timeout")]
    pub order_timeout_secs: u64,
    /// Order status poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Submit retry attempts for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Trading windows, exchange-local "HH:MM-HH:MM"
    #[serde(default = "default_session_windows")]
    pub windows: Vec<String>,
    /// Exchange-local offset from UTC in hours
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i8,
    /// Seconds between scan cycles inside a window
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    /// Seconds between window checks while idle
    #[serde(default = "default_idle_interval")]
    pub idle_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Webhook URL for event delivery; notifications disabled when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
}

// Default value functions

fn default_database_path() -> String {
    "data/risk_journal.db".to_string()
}

fn default_base_url() -> String {
    "https://api.exchange.example.com".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_concurrent_requests() -> usize {
    3 // Conservative: respects typical public-endpoint rate limits
}

fn default_weight_rs() -> Decimal {
    Decimal::new(40, 2) // 0.40
}

fn default_weight_rvol() -> Decimal {
    Decimal::new(30, 2) // 0.30
}

fn default_weight_trend() -> Decimal {
    Decimal::new(20, 2) // 0.20
}

fn default_weight_depth() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_candle_unit() -> u32 {
    5
}

fn default_candle_count() -> u32 {
    200
}

fn default_min_volume_24h() -> Decimal {
    Decimal::new(5_000_000_000, 0) // quote-currency daily volume floor
}

fn default_max_markets_to_scan() -> usize {
    50
}

fn default_rvol_threshold() -> Decimal {
    Decimal::new(2, 0) // 2.0
}

fn default_rvol_window() -> usize {
    20
}

fn default_spread_bp_max() -> Decimal {
    Decimal::new(5, 0) // 5 bp
}

fn default_rs_window_minutes() -> u32 {
    60
}

fn default_rs_benchmark() -> String {
    "KRW-BTC".to_string()
}

fn default_ema_fast() -> usize {
    20
}

fn default_ema_slow() -> usize {
    50
}

fn default_require_trend() -> bool {
    true
}

fn default_min_score() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_candidate_count() -> usize {
    3
}

fn default_rvol_norm_cap() -> Decimal {
    Decimal::new(3, 0) // RVOL 3.0 maps to 1.0
}

fn default_rs_norm_cap() -> Decimal {
    Decimal::new(3, 2) // +3% return maps to 1.0
}

fn default_depth_log_scale() -> f64 {
    10.0
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_box_window() -> String {
    "09:00-10:00".to_string()
}

fn default_breakout_atr_mult() -> Decimal {
    Decimal::new(1, 1) // 0.1
}

fn default_orb_volume_spike_mult() -> Decimal {
    Decimal::new(15, 1) // 1.5
}

fn default_volume_lookback() -> usize {
    20
}

fn default_zone_atr_mult() -> Decimal {
    Decimal::new(25, 2) // 0.25
}

fn default_stop_atr_mult() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_min_pullback_pct() -> Decimal {
    Decimal::new(5, 3) // 0.005 = 0.5%
}

fn default_max_pullback_pct() -> Decimal {
    Decimal::new(2, 2) // 0.02 = 2%
}

fn default_swing_lookback() -> usize {
    50
}

fn default_pivot_strength() -> usize {
    2
}

fn default_penetration_atr_mult() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_starting_equity() -> Decimal {
    Decimal::new(1_000_000, 0)
}

fn default_per_trade_risk_pct() -> Decimal {
    Decimal::new(4, 3) // 0.004 = 0.4%
}

fn default_daily_drawdown_stop_pct() -> Decimal {
    Decimal::new(1, 2) // 0.01 = 1%
}

fn default_max_consecutive_losses() -> u32 {
    2
}

fn default_min_position_value() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_max_position_value() -> Decimal {
    Decimal::new(500_000, 0)
}

fn default_target_r_multiple() -> Decimal {
    Decimal::new(15, 1) // 1.5 R
}

fn default_slippage_bp() -> Decimal {
    Decimal::new(2, 0) // 2 bp
}

fn default_fee_rate() -> Decimal {
    Decimal::new(5, 4) // 0.05% taker
}

fn default_order_timeout() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_retries() -> u8 {
    3
}

fn default_session_windows() -> Vec<String> {
    vec!["09:10-13:00".to_string(), "17:10-19:00".to_string()]
}

fn default_utc_offset_hours() -> i8 {
    9
}

fn default_scan_interval() -> u64 {
    300
}

fn default_idle_interval() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("ORB"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values. Failures here abort startup.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.risk.starting_equity > Decimal::ZERO,
            "starting_equity must be positive"
        );

        anyhow::ensure!(
            self.risk.per_trade_risk_pct > Decimal::ZERO
                && self.risk.per_trade_risk_pct < Decimal::new(5, 2),
            "per_trade_risk_pct must be between 0 and 0.05"
        );

        anyhow::ensure!(
            self.risk.daily_drawdown_stop_pct > Decimal::ZERO
                && self.risk.daily_drawdown_stop_pct <= Decimal::new(10, 2),
            "daily_drawdown_stop_pct must be between 0 and 0.10"
        );

        anyhow::ensure!(
            self.risk.max_consecutive_losses >= 1,
            "max_consecutive_losses must be at least 1"
        );

        anyhow::ensure!(
            self.risk.min_position_value < self.risk.max_position_value,
            "min_position_value must be below max_position_value"
        );

        let w = &self.scanner.score_weights;
        anyhow::ensure!(
            w.rs + w.rvol + w.trend + w.depth == Decimal::ONE,
            "score weights must sum to 1"
        );

        anyhow::ensure!(
            self.scanner.candidate_count >= 1,
            "candidate_count must be at least 1"
        );

        anyhow::ensure!(
            self.scanner.ema_fast < self.scanner.ema_slow,
            "ema_fast must be shorter than ema_slow"
        );

        anyhow::ensure!(
            self.scanner.rvol_norm_cap > Decimal::ONE,
            "rvol_norm_cap must exceed 1"
        );

        anyhow::ensure!(
            self.scanner.rs_norm_cap > Decimal::ZERO,
            "rs_norm_cap must be positive"
        );

        anyhow::ensure!(
            !self.session.windows.is_empty(),
            "at least one session window is required"
        );

        for window in &self.session.windows {
            SessionWindow::parse(window)
                .with_context(|| format!("invalid session window '{window}'"))?;
        }

        SessionWindow::parse(&self.signals.breakout.box_window)
            .with_context(|| "invalid breakout box_window")?;

        anyhow::ensure!(
            self.signals.vwap_pullback.min_pullback_pct
                < self.signals.vwap_pullback.max_pullback_pct,
            "min_pullback_pct must be below max_pullback_pct"
        );

        anyhow::ensure!(
            self.signals.sweep.pivot_strength >= 1
                && self.signals.sweep.swing_lookback > self.signals.sweep.pivot_strength * 2,
            "swing_lookback must exceed twice the pivot strength"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            scanner: ScannerConfig::default(),
            signals: SignalsConfig::default(),
            risk: RiskConfig::default(),
            execution: ExecutionConfig::default(),
            session: SessionConfig::default(),
            notify: NotifyConfig::default(),
            database_path: default_database_path(),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            secret_key: String::new(),
            timeout_secs: default_request_timeout(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            rs: default_weight_rs(),
            rvol: default_weight_rvol(),
            trend: default_weight_trend(),
            depth: default_weight_depth(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            candle_unit_minutes: default_candle_unit(),
            candle_count: default_candle_count(),
            min_volume_24h: default_min_volume_24h(),
            max_markets_to_scan: default_max_markets_to_scan(),
            rvol_threshold: default_rvol_threshold(),
            rvol_window: default_rvol_window(),
            spread_bp_max: default_spread_bp_max(),
            rs_window_minutes: default_rs_window_minutes(),
            rs_benchmark: default_rs_benchmark(),
            ema_fast: default_ema_fast(),
            ema_slow: default_ema_slow(),
            require_trend: default_require_trend(),
            min_score: default_min_score(),
            candidate_count: default_candidate_count(),
            rvol_norm_cap: default_rvol_norm_cap(),
            rs_norm_cap: default_rs_norm_cap(),
            depth_log_scale: default_depth_log_scale(),
            fetch_timeout_secs: default_fetch_timeout(),
            score_weights: ScoreWeights::default(),
        }
    }
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            box_window: default_box_window(),
            breakout_atr_mult: default_breakout_atr_mult(),
            volume_spike_mult: default_orb_volume_spike_mult(),
            volume_lookback: default_volume_lookback(),
        }
    }
}

impl Default for VwapPullbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            zone_atr_mult: default_zone_atr_mult(),
            stop_atr_mult: default_stop_atr_mult(),
            min_pullback_pct: default_min_pullback_pct(),
            max_pullback_pct: default_max_pullback_pct(),
            require_ema_alignment: true,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            swing_lookback: default_swing_lookback(),
            pivot_strength: default_pivot_strength(),
            penetration_atr_mult: default_penetration_atr_mult(),
        }
    }
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            breakout: BreakoutConfig::default(),
            vwap_pullback: VwapPullbackConfig::default(),
            sweep: SweepConfig::default(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            starting_equity: default_starting_equity(),
            per_trade_risk_pct: default_per_trade_risk_pct(),
            daily_drawdown_stop_pct: default_daily_drawdown_stop_pct(),
            max_consecutive_losses: default_max_consecutive_losses(),
            min_position_value: default_min_position_value(),
            max_position_value: default_max_position_value(),
            target_r_multiple: default_target_r_multiple(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_bp: default_slippage_bp(),
            fee_rate: default_fee_rate(),
            order_timeout_secs: default_order_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            windows: default_session_windows(),
            utc_offset_hours: default_utc_offset_hours(),
            scan_interval_secs: default_scan_interval(),
            idle_interval_secs: default_idle_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_weights_rejected() {
        let mut config = Config::default();
        config.scanner.score_weights.rs = Decimal::new(90, 2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_session_window_rejected() {
        let mut config = Config::default();
        config.session.windows = vec!["25:00-26:00".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_pullback_bounds_rejected() {
        let mut config = Config::default();
        config.signals.vwap_pullback.min_pullback_pct = Decimal::new(5, 2);
        assert!(config.validate().is_err());
    }
}
