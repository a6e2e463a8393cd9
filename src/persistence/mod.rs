//! SQLite journal for risk state and closed trades.
//!
//! Persists per-session risk state so a restart inside a trading session
//! does not forget the halt flag or per-market loss counters, plus a trade
//! history table for end-of-day review.

use crate::execution::PositionClosed;
use crate::risk::RiskState;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// SQLite-backed risk journal.
pub struct RiskJournal {
    conn: Connection,
}

impl RiskJournal {
    /// Open (and initialize) the journal database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {parent:?}"))?;
            }
        }

        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let journal = Self { conn };
        journal.init_schema()?;

        info!("Risk journal initialized at {:?}", db_path.as_ref());
        Ok(journal)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- One row per trading session
            CREATE TABLE IF NOT EXISTS daily_risk (
                session_date TEXT PRIMARY KEY,
                day_start_equity TEXT NOT NULL,
                equity TEXT NOT NULL,
                daily_realized_pnl TEXT NOT NULL,
                trading_halted INTEGER NOT NULL,
                trades_today INTEGER NOT NULL,
                losing_trades_today INTEGER NOT NULL
            );

            -- Per-market consecutive-loss counters for a session
            CREATE TABLE IF NOT EXISTS market_risk (
                session_date TEXT NOT NULL,
                symbol TEXT NOT NULL,
                consecutive_losses INTEGER NOT NULL,
                PRIMARY KEY (session_date, symbol)
            );

            -- Closed trade history
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                closed_at TEXT NOT NULL,
                symbol TEXT NOT NULL,
                strategy TEXT NOT NULL,
                direction TEXT NOT NULL,
                quantity TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                pnl TEXT NOT NULL,
                reason TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_closed_at ON trades(closed_at);
            CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol);
            "#,
        )
        .context("Failed to initialize journal schema")?;

        Ok(())
    }

    /// Upsert the session's risk state and loss counters.
    pub fn save_state(&self, state: &RiskState) -> Result<()> {
        let date = state.session_date.to_string();

        self.conn
            .execute(
                r#"
                INSERT INTO daily_risk (
                    session_date, day_start_equity, equity, daily_realized_pnl,
                    trading_halted, trades_today, losing_trades_today
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(session_date) DO UPDATE SET
                    day_start_equity = excluded.day_start_equity,
                    equity = excluded.equity,
                    daily_realized_pnl = excluded.daily_realized_pnl,
                    trading_halted = excluded.trading_halted,
                    trades_today = excluded.trades_today,
                    losing_trades_today = excluded.losing_trades_today
                "#,
                params![
                    date,
                    state.day_start_equity.to_string(),
                    state.equity.to_string(),
                    state.daily_realized_pnl.to_string(),
                    state.trading_halted as i64,
                    state.trades_today,
                    state.losing_trades_today,
                ],
            )
            .context("Failed to save daily risk state")?;

        self.conn
            .execute(
                "DELETE FROM market_risk WHERE session_date = ?1",
                params![date],
            )
            .context("Failed to clear market risk rows")?;

        for (symbol, losses) in &state.consecutive_losses {
            self.conn
                .execute(
                    "INSERT INTO market_risk (session_date, symbol, consecutive_losses)
                     VALUES (?1, ?2, ?3)",
                    params![date, symbol, losses],
                )
                .context("Failed to save market risk row")?;
        }

        Ok(())
    }

    /// Load the risk state for a session date, if one was journaled.
    pub fn load_state(&self, session_date: NaiveDate) -> Result<Option<RiskState>> {
        let date = session_date.to_string();

        let row = self
            .conn
            .query_row(
                r#"
                SELECT day_start_equity, equity, daily_realized_pnl,
                       trading_halted, trades_today, losing_trades_today
                FROM daily_risk WHERE session_date = ?1
                "#,
                params![date],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, u32>(5)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query daily risk state")?;

        let Some((start, equity, pnl, halted, trades, losing)) = row else {
            return Ok(None);
        };

        let mut consecutive_losses = HashMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT symbol, consecutive_losses FROM market_risk WHERE session_date = ?1")
            .context("Failed to prepare market risk query")?;
        let rows = stmt
            .query_map(params![date], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
            })
            .context("Failed to query market risk rows")?;
        for row in rows {
            let (symbol, losses) = row.context("Failed to read market risk row")?;
            consecutive_losses.insert(symbol, losses);
        }

        Ok(Some(RiskState {
            session_date,
            day_start_equity: parse_decimal(&start)?,
            equity: parse_decimal(&equity)?,
            daily_realized_pnl: parse_decimal(&pnl)?,
            trading_halted: halted != 0,
            trades_today: trades,
            losing_trades_today: losing,
            consecutive_losses,
        }))
    }

    /// Append a closed trade to the history.
    pub fn record_trade(&self, event: &PositionClosed) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO trades (
                    closed_at, symbol, strategy, direction, quantity,
                    entry_price, exit_price, pnl, reason
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    event.closed_at.to_rfc3339(),
                    event.symbol,
                    event.strategy.to_string(),
                    format!("{:?}", event.direction),
                    event.quantity.to_string(),
                    event.entry_price.to_string(),
                    event.exit_price.to_string(),
                    event.pnl.to_string(),
                    format!("{:?}", event.reason),
                ],
            )
            .context("Failed to record trade")?;

        Ok(())
    }

    /// Count of journaled trades for a session date (for status reporting).
    pub fn trade_count(&self, session_date: NaiveDate) -> Result<u32> {
        let prefix = format!("{session_date}%");
        let count: u32 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM trades WHERE closed_at LIKE ?1",
                params![prefix],
                |row| row.get(0),
            )
            .context("Failed to count trades")?;
        Ok(count)
    }
}

fn parse_decimal(text: &str) -> Result<Decimal> {
    Decimal::from_str(text).with_context(|| format!("Invalid decimal in journal: {text}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn temp_db(name: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("orb_trader_test_{name}_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn test_state_round_trip_preserves_halt_and_counters() {
        let path = temp_db("round_trip");
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        {
            let journal = RiskJournal::new(&path).unwrap();
            let mut state = RiskState::new_session(date, dec!(10000));
            state.equity = dec!(9890);
            state.daily_realized_pnl = dec!(-110);
            state.trading_halted = true;
            state.trades_today = 4;
            state.losing_trades_today = 3;
            state.consecutive_losses.insert("KRW-ETH".to_string(), 2);
            journal.save_state(&state).unwrap();
        }

        // Fresh connection, as after a process restart
        let journal = RiskJournal::new(&path).unwrap();
        let restored = journal.load_state(date).unwrap().expect("state persisted");

        assert!(restored.trading_halted);
        assert_eq!(restored.equity, dec!(9890));
        assert_eq!(restored.daily_realized_pnl, dec!(-110));
        assert_eq!(restored.consecutive_losses.get("KRW-ETH"), Some(&2));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_date_loads_none() {
        let path = temp_db("missing");
        let journal = RiskJournal::new(&path).unwrap();
        let state = journal
            .load_state(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap())
            .unwrap();
        assert!(state.is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_save_is_idempotent_per_date() {
        let path = temp_db("idempotent");
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let journal = RiskJournal::new(&path).unwrap();

        let mut state = RiskState::new_session(date, dec!(10000));
        journal.save_state(&state).unwrap();
        state.equity = dec!(10100);
        journal.save_state(&state).unwrap();

        let restored = journal.load_state(date).unwrap().unwrap();
        assert_eq!(restored.equity, dec!(10100));
        let _ = std::fs::remove_file(&path);
    }
}
