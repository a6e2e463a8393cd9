//! Trading-session windows and the session clock.
//!
//! All window times are exchange-local; the clock converts from UTC using the
//! configured fixed offset.

use crate::config::SessionConfig;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

/// A single start-end trading window within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SessionWindow {
    /// Parse a window from "HH:MM-HH:MM".
    pub fn parse(raw: &str) -> Result<Self> {
        let (start, end) = raw
            .split_once('-')
            .with_context(|| format!("window '{raw}' is not 'HH:MM-HH:MM'"))?;

        let start = NaiveTime::parse_from_str(start.trim(), "%H:%M")
            .with_context(|| format!("invalid start time in '{raw}'"))?;
        let end = NaiveTime::parse_from_str(end.trim(), "%H:%M")
            .with_context(|| format!("invalid end time in '{raw}'"))?;

        if start >= end {
            bail!("window '{raw}' must start before it ends");
        }

        Ok(Self { start, end })
    }

    /// Whether a local time falls inside this window (start inclusive, end exclusive).
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }
}

/// Answers "is the engine live right now" and tracks session rollover.
#[derive(Debug, Clone)]
pub struct SessionClock {
    windows: Vec<SessionWindow>,
    offset: FixedOffset,
}

impl SessionClock {
    /// Build a clock from validated session configuration.
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let windows = config
            .windows
            .iter()
            .map(|w| SessionWindow::parse(w))
            .collect::<Result<Vec<_>>>()?;

        let offset = FixedOffset::east_opt(i32::from(config.utc_offset_hours) * 3600)
            .context("utc_offset_hours out of range")?;

        Ok(Self { windows, offset })
    }

    /// Current exchange-local time.
    pub fn local_now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    /// Convert a UTC instant to exchange-local time.
    pub fn to_local(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.offset)
    }

    /// Whether the given UTC instant falls inside any trading window.
    pub fn in_window(&self, at: DateTime<Utc>) -> bool {
        let local = self.to_local(at).time();
        self.windows.iter().any(|w| w.contains(local))
    }

    /// The trading date (exchange-local) an instant belongs to.
    pub fn session_date(&self, at: DateTime<Utc>) -> NaiveDate {
        self.to_local(at).date_naive()
    }

    /// Session VWAP anchor: local midnight of the trading date, as UTC.
    pub fn session_open(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = self.session_date(at);
        let midnight = date.and_time(NaiveTime::MIN);
        self.offset
            .from_local_datetime(&midnight)
            .single()
            .unwrap_or_else(|| self.offset.from_utc_datetime(&midnight))
            .with_timezone(&Utc)
    }

    pub fn windows(&self) -> &[SessionWindow] {
        &self.windows
    }
}
