use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::error::{Result, TradeError};
use crate::market::HistorySource;
use crate::models::{Candle, Granularity};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Flat-file history for the backtest binary.
///
/// Expects `<dir>/<instrument>_<granularity>.csv` with a header row and
/// `timestamp,open,high,low,close,volume` columns, rows ascending. A missing
/// file means no recorded data for that instrument and granularity.
pub struct CsvHistory {
    dir: PathBuf,
}

impl CsvHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn parse_row(&self, instrument: &str, line: &str, lineno: usize) -> Result<Candle> {
        let bad = |what: &str| {
            TradeError::DataUnavailable(format!(
                "{instrument} csv line {lineno}: {what} in '{line}'"
            ))
        };
        let mut fields = line.split(',');
        let mut next = |what: &'static str| fields.next().ok_or_else(|| bad(what));

        let timestamp = NaiveDateTime::parse_from_str(next("timestamp")?.trim(), TIMESTAMP_FORMAT)
            .map_err(|_| bad("unparseable timestamp"))?;
        let mut num = |what: &'static str| -> Result<f64> {
            next(what)?.trim().parse().map_err(|_| bad(what))
        };
        Ok(Candle {
            instrument: instrument.to_string(),
            timestamp,
            open: num("open")?,
            high: num("high")?,
            low: num("low")?,
            close: num("close")?,
            volume: num("volume")?,
        })
    }
}

impl HistorySource for CsvHistory {
    fn fetch_candles_in_range(
        &self,
        instrument: &str,
        granularity: Granularity,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<Vec<Candle>>> {
        let path = self.dir.join(format!("{instrument}_{granularity}.csv"));
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no csv history file");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut rows = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if i == 0 || line.trim().is_empty() {
                continue;
            }
            let candle = self.parse_row(instrument, &line, i + 1)?;
            if candle.timestamp >= start && candle.timestamp < end {
                rows.push(candle);
            }
        }
        Ok(Some(rows))
    }
}
