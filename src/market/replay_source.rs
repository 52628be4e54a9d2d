use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{Result, TradeError};
use crate::market::{CandleBuffer, HistorySource, MarketDataSource};
use crate::models::{Candle, Granularity};

/// Candle source for one replayed instrument.
///
/// Serves strategy reads out of a `CandleBuffer` whose windows the replay
/// loop refills as simulated time advances. A window the history has no rows
/// for is loaded as empty so reads yield empty Vecs instead of failing.
pub struct ReplaySource {
    instrument: String,
    history: Arc<dyn HistorySource>,
    buffer: Mutex<CandleBuffer>,
}

impl ReplaySource {
    pub fn new(instrument: impl Into<String>, history: Arc<dyn HistorySource>) -> Self {
        Self {
            instrument: instrument.into(),
            history,
            buffer: Mutex::new(CandleBuffer::new()),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Close of the newest loaded row, used as the forced-close price.
    pub fn latest_close(&self) -> Option<f64> {
        self.buffer.lock().unwrap().latest_close()
    }

    /// Loads the 1min window covering `date` into the minute buffer.
    pub fn fill_day(&self, date: NaiveDate) -> Result<()> {
        let start = date.and_hms_opt(0, 0, 0).expect("midnight exists");
        let end = start + chrono::Duration::days(1);
        let rows = self
            .history
            .fetch_candles_in_range(&self.instrument, Granularity::OneMinute, start, end)?
            .unwrap_or_default();
        self.buffer
            .lock()
            .unwrap()
            .set_minute_window(date, rows);
        Ok(())
    }

    /// Loads the 1s window covering the hour at `hour_start`.
    pub fn fill_hour(&self, hour_start: NaiveDateTime) -> Result<()> {
        let end = hour_start + chrono::Duration::hours(1);
        let rows = self
            .history
            .fetch_candles_in_range(&self.instrument, Granularity::OneSecond, hour_start, end)?
            .unwrap_or_default();
        self.buffer
            .lock()
            .unwrap()
            .set_second_window(hour_start, rows);
        Ok(())
    }
}

impl MarketDataSource for ReplaySource {
    fn candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
        as_of: NaiveDateTime,
    ) -> Result<Vec<Candle>> {
        if instrument != self.instrument {
            return Err(TradeError::InstrumentNotFound(instrument.to_string()));
        }
        self.buffer.lock().unwrap().get(granularity, count, as_of)
    }
}
