//! # ORB Trader
//!
//! A rule-based intraday momentum trading engine for crypto markets.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Exchange capability layer (REST client, paper fills, traits)
//! - `features`: Streaming feature computation (RVOL, RS, session VWAP, trend)
//! - `scanner`: Bounded-concurrency market scanning and candidate ranking
//! - `signals`: Per-market signal state machines (breakout, pullback, sweep)
//! - `risk`: Account-level risk gate, sizing, and circuit breakers
//! - `execution`: Order lifecycle, bracket exits, and fill reporting
//! - `notify`: Fire-and-forget event notifications
//! - `persistence`: SQLite journal for risk state and closed trades
//! - `session`: Trading-session windows and the session clock
//! - `utils`: Shared decimal arithmetic helpers

pub mod config;
pub mod exchange;
pub mod execution;
pub mod features;
pub mod notify;
pub mod persistence;
pub mod risk;
pub mod scanner;
pub mod session;
pub mod signals;
pub mod utils;

pub use config::Config;
