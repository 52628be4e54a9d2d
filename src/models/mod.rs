use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::TradeError;

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument: String,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Which rolling buffer a granularity is served from.
///
/// Sub-minute granularities resample from the second buffer, which holds one
/// trading hour of 1s bars. Minute and hour granularities resample from the
/// minute buffer, which holds one trading day of 1min bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferClass {
    Second,
    Minute,
}

/// Supported candle granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    HalfSecond,
    OneSecond,
    FiveSeconds,
    OneMinute,
    OneHour,
}

impl Granularity {
    /// Bar width as a wall-clock duration.
    pub fn interval(&self) -> Duration {
        match self {
            Granularity::HalfSecond => Duration::from_millis(500),
            Granularity::OneSecond => Duration::from_secs(1),
            Granularity::FiveSeconds => Duration::from_secs(5),
            Granularity::OneMinute => Duration::from_secs(60),
            Granularity::OneHour => Duration::from_secs(3600),
        }
    }

    /// Bar width in milliseconds, used for bucket alignment.
    pub fn interval_millis(&self) -> i64 {
        self.interval().as_millis() as i64
    }

    pub fn buffer_class(&self) -> BufferClass {
        match self {
            Granularity::HalfSecond | Granularity::OneSecond | Granularity::FiveSeconds => {
                BufferClass::Second
            }
            Granularity::OneMinute | Granularity::OneHour => BufferClass::Minute,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::HalfSecond => "0.5s",
            Granularity::OneSecond => "1s",
            Granularity::FiveSeconds => "5s",
            Granularity::OneMinute => "1min",
            Granularity::OneHour => "1h",
        }
    }
}

impl FromStr for Granularity {
    type Err = TradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0.5s" => Ok(Granularity::HalfSecond),
            "1s" => Ok(Granularity::OneSecond),
            "5s" => Ok(Granularity::FiveSeconds),
            "1min" => Ok(Granularity::OneMinute),
            "1h" => Ok(Granularity::OneHour),
            other => Err(TradeError::UnsupportedGranularity(other.to_string())),
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of an order or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

/// Whether an order opens a new position or closes an existing one.
///
/// Exchange order codes map 1 to open and 4 to close; any other code is
/// rejected at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Offset {
    Open,
    Close,
}

impl Offset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Offset::Open => "open",
            Offset::Close => "close",
        }
    }
}

impl TryFrom<u8> for Offset {
    type Error = TradeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Offset::Open),
            4 => Ok(Offset::Close),
            other => Err(TradeError::InvalidOffset(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceType {
    Limit,
    Market,
}

/// An order as submitted by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub instrument: String,
    pub exchange: String,
    pub timestamp: NaiveDateTime,
    pub direction: Direction,
    pub offset: Offset,
    pub price: f64,
    pub volume: f64,
    pub stop_price: Option<f64>,
    pub price_type: PriceType,
}

/// Open volume on each side of the book for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub long_volume: f64,
    pub long_enter: f64,
    pub short_volume: f64,
    pub short_enter: f64,
}

impl PositionSnapshot {
    pub fn is_flat(&self) -> bool {
        self.long_volume == 0.0 && self.short_volume == 0.0
    }
}
