use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{Result, TradeError};
use crate::models::Granularity;

/// Per-instrument-type contract parameters and session layout.
///
/// Keyed by instrument type, the leading letters of the instrument code
/// (`rb2410` trades as type `rb`). `stop` holds one (hour, minute) entry per
/// active session.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentSpec {
    pub exchange: String,
    pub morning: bool,
    pub night: bool,
    pub stop: Vec<(u32, u32)>,
    pub value_per_point: f64,
    pub point_change: f64,
}

impl InstrumentSpec {
    /// Stop times with their hour/minute ranges checked.
    ///
    /// An out-of-range stop is a configuration defect; it must surface
    /// before any bot or replay starts, not as a panic or a stop timer that
    /// never fires.
    pub fn validated_stops(&self) -> Result<&[(u32, u32)]> {
        for &(hour, minute) in &self.stop {
            if hour > 23 || minute > 59 {
                return Err(TradeError::InvalidSession(format!(
                    "stop time {hour:02}:{minute:02} is out of range"
                )));
            }
        }
        Ok(&self.stop)
    }
}

/// Map of instrument type to its contract spec.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstrumentMap {
    #[serde(flatten)]
    entries: HashMap<String, InstrumentSpec>,
}

impl InstrumentMap {
    pub fn new(entries: HashMap<String, InstrumentSpec>) -> Self {
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Resolves an instrument code like `rb2410` to its type's spec.
    pub fn lookup(&self, instrument: &str) -> Result<&InstrumentSpec> {
        let kind = instrument_type(instrument)?;
        self.entries
            .get(kind)
            .ok_or_else(|| TradeError::UnsupportedInstrumentType(kind.to_string()))
    }

    pub fn insert(&mut self, kind: impl Into<String>, spec: InstrumentSpec) {
        self.entries.insert(kind.into(), spec);
    }
}

/// Extracts the leading alphabetic type prefix of an instrument code.
///
/// The code must be letters followed by at least one digit.
pub fn instrument_type(instrument: &str) -> Result<&str> {
    let split = instrument
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(instrument.len());
    let (kind, rest) = instrument.split_at(split);
    if kind.is_empty() || rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
        return Err(TradeError::InstrumentNotFound(instrument.to_string()));
    }
    Ok(kind)
}

/// Strategy wiring loaded from the strategy config file.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Registry identifier of the strategy implementation.
    pub class: String,
    /// Polling interval of the live loop, e.g. "1s" or "5min".
    pub interval: String,
    pub watchlist: Vec<String>,
    /// Instruments replayed in backtests; defaults to the watchlist.
    #[serde(default)]
    pub backtestlist: Option<Vec<String>>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl StrategyConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn timestep(&self) -> Result<Duration> {
        parse_interval(&self.interval)
    }

    pub fn backtest_instruments(&self) -> &[String] {
        self.backtestlist.as_deref().unwrap_or(&self.watchlist)
    }
}

/// Parses an interval like "0.5s", "30s", "5min" or "1h" into a duration.
pub fn parse_interval(text: &str) -> Result<Duration> {
    let invalid = || TradeError::InvalidInterval(text.to_string());
    let (value, unit) = text
        .char_indices()
        .find(|(_, c)| c.is_ascii_alphabetic())
        .map(|(i, _)| text.split_at(i))
        .ok_or_else(invalid)?;
    let value: f64 = value.parse().map_err(|_| invalid())?;
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid());
    }
    let unit_secs = match unit {
        "s" => 1.0,
        "min" | "m" => 60.0,
        "h" => 3600.0,
        _ => return Err(invalid()),
    };
    Ok(Duration::from_millis((value * unit_secs * 1000.0).round() as u64))
}

/// Replay window and simulation step for a backtest run.
#[derive(Debug, Clone, Deserialize)]
pub struct BacktestConfig {
    pub start_date: String,
    pub end_date: String,
    pub step: String,
    pub start_balance: f64,
}

impl BacktestConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn start(&self) -> Result<NaiveDate> {
        parse_date(&self.start_date)
    }

    pub fn end(&self) -> Result<NaiveDate> {
        parse_date(&self.end_date)
    }

    pub fn step_granularity(&self) -> Result<Granularity> {
        self.step.parse()
    }
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%d/%m/%Y")
        .map_err(|_| TradeError::InvalidSession(format!("unparseable date '{text}'")))
}
