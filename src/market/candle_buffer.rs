use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{Result, TradeError};
use crate::models::{BufferClass, Candle, Granularity};

/// Resamples ascending raw candles into `granularity` buckets.
///
/// Bucket keys are epoch milliseconds aligned down to the bar width. Within a
/// bucket: open is the first row, high the max, low the min, close the last,
/// volume the sum. Buckets with no rows are absent from the output, and
/// resampling output at its own granularity is a fixed point.
pub fn resample(candles: &[Candle], granularity: Granularity) -> Vec<Candle> {
    let step = granularity.interval_millis();
    let mut out: Vec<Candle> = Vec::new();
    let mut current: Option<(i64, Candle)> = None;

    for candle in candles {
        let ms = candle.timestamp.and_utc().timestamp_millis();
        let bucket = ms.div_euclid(step) * step;
        match current.as_mut() {
            Some((key, agg)) if *key == bucket => {
                agg.high = agg.high.max(candle.high);
                agg.low = agg.low.min(candle.low);
                agg.close = candle.close;
                agg.volume += candle.volume;
            }
            _ => {
                if let Some((_, done)) = current.take() {
                    out.push(done);
                }
                let ts = chrono::DateTime::from_timestamp_millis(bucket)
                    .map(|dt| dt.naive_utc())
                    .unwrap_or(candle.timestamp);
                current = Some((
                    bucket,
                    Candle {
                        instrument: candle.instrument.clone(),
                        timestamp: ts,
                        open: candle.open,
                        high: candle.high,
                        low: candle.low,
                        close: candle.close,
                        volume: candle.volume,
                    },
                ));
            }
        }
    }
    if let Some((_, done)) = current.take() {
        out.push(done);
    }
    out
}

#[derive(Debug)]
struct Window<K> {
    key: K,
    candles: Vec<Candle>,
}

/// Per-instrument windowed candle cache.
///
/// Holds at most one second-level table (the active trading hour of 1s bars)
/// and one minute-level table (the active trading day of 1min bars). Windows
/// are replaced wholesale by the refill operations, never patched in place.
#[derive(Debug, Default)]
pub struct CandleBuffer {
    seconds: Option<Window<NaiveDateTime>>,
    minutes: Option<Window<NaiveDate>>,
}

impl CandleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the second-level window for the hour starting at `hour_start`.
    pub fn set_second_window(&mut self, hour_start: NaiveDateTime, candles: Vec<Candle>) {
        self.seconds = Some(Window {
            key: hour_start,
            candles,
        });
    }

    /// Replaces the minute-level window for `date`.
    pub fn set_minute_window(&mut self, date: NaiveDate, candles: Vec<Candle>) {
        self.minutes = Some(Window { key: date, candles });
    }

    pub fn second_window_key(&self) -> Option<NaiveDateTime> {
        self.seconds.as_ref().map(|w| w.key)
    }

    pub fn minute_window_key(&self) -> Option<NaiveDate> {
        self.minutes.as_ref().map(|w| w.key)
    }

    /// Close of the newest row across both windows, if any is loaded.
    pub fn latest_close(&self) -> Option<f64> {
        fn newest(w: Option<&Vec<Candle>>) -> Option<&Candle> {
            w.and_then(|rows| rows.last())
        }
        let second = newest(self.seconds.as_ref().map(|w| &w.candles));
        let minute = newest(self.minutes.as_ref().map(|w| &w.candles));
        match (second, minute) {
            (Some(s), Some(m)) => Some(if s.timestamp >= m.timestamp { s.close } else { m.close }),
            (Some(s), None) => Some(s.close),
            (None, Some(m)) => Some(m.close),
            (None, None) => None,
        }
    }

    /// Serves the last `count` bars at `granularity` ending at `as_of`.
    ///
    /// Reads before any window is loaded fail with `DataUnavailable` so the
    /// caller refills instead of acting on a silently empty view. Fewer than
    /// `count` rows in the filtered span is not an error.
    pub fn get(
        &self,
        granularity: Granularity,
        count: usize,
        as_of: NaiveDateTime,
    ) -> Result<Vec<Candle>> {
        let rows = match granularity.buffer_class() {
            BufferClass::Second => &self.seconds.as_ref().ok_or_else(|| {
                TradeError::DataUnavailable("second buffer not filled".to_string())
            })?.candles,
            BufferClass::Minute => &self.minutes.as_ref().ok_or_else(|| {
                TradeError::DataUnavailable("minute buffer not filled".to_string())
            })?.candles,
        };

        let span = granularity.interval() * count as u32;
        let from = as_of - chrono::Duration::from_std(span).unwrap_or(chrono::Duration::zero());
        let window: Vec<Candle> = rows
            .iter()
            .filter(|c| c.timestamp >= from && c.timestamp <= as_of)
            .cloned()
            .collect();

        let mut resampled = resample(&window, granularity);
        if resampled.len() > count {
            resampled.drain(..resampled.len() - count);
        }
        Ok(resampled)
    }
}
