use chrono::NaiveDateTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::market::HistorySource;
use crate::models::{Candle, Granularity};

/// Deterministic history for tests and demo runs.
///
/// Prices are a pure function of the timestamp, so overlapping fetches (the
/// same hour pulled for the second buffer and again inside a day pull for
/// the minute buffer) always agree.
pub struct SyntheticHistory {
    base_price: f64,
}

impl SyntheticHistory {
    pub fn new(base_price: f64) -> Self {
        Self { base_price }
    }

    fn price_at(&self, ms: i64) -> f64 {
        let t = ms as f64 / 1000.0;
        self.base_price + 8.0 * (t / 3600.0).sin() + 2.0 * (t / 180.0).sin() + 0.5 * (t / 7.0).sin()
    }

    fn candle(&self, instrument: &str, ts: NaiveDateTime, step_ms: i64) -> Candle {
        let ms = ts.and_utc().timestamp_millis();
        let open = self.price_at(ms);
        let close = self.price_at(ms + step_ms);
        Candle {
            instrument: instrument.to_string(),
            timestamp: ts,
            open,
            high: open.max(close) + 0.25,
            low: open.min(close) - 0.25,
            close,
            volume: 1.0 + (ms / step_ms).rem_euclid(5) as f64,
        }
    }
}

impl HistorySource for SyntheticHistory {
    fn fetch_candles_in_range(
        &self,
        instrument: &str,
        granularity: Granularity,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<Vec<Candle>>> {
        let step_ms = granularity.interval_millis();
        let mut rows = Vec::new();
        let mut ts = start;
        while ts < end {
            rows.push(self.candle(instrument, ts, step_ms));
            ts += chrono::Duration::milliseconds(step_ms);
        }
        Ok(Some(rows))
    }
}

/// Seeded random-walk candle series for resampling tests.
pub fn random_walk(
    seed: u64,
    instrument: &str,
    start: NaiveDateTime,
    granularity: Granularity,
    count: usize,
) -> Vec<Candle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let step_ms = granularity.interval_millis();
    let mut price = 100.0 + rng.gen_range(-5.0..5.0);
    let mut rows = Vec::with_capacity(count);
    for i in 0..count {
        let open = price;
        price += rng.gen_range(-0.5..0.5);
        let close = price;
        rows.push(Candle {
            instrument: instrument.to_string(),
            timestamp: start + chrono::Duration::milliseconds(step_ms * i as i64),
            open,
            high: open.max(close) + rng.gen_range(0.0..0.3),
            low: open.min(close) - rng.gen_range(0.0..0.3),
            close,
            volume: rng.gen_range(1.0..20.0),
        });
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::candle_buffer::resample;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 7)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_overlapping_fetches_agree() {
        let history = SyntheticHistory::new(100.0);
        let hour = history
            .fetch_candles_in_range("rb2410", Granularity::OneSecond, ts(9, 0, 0), ts(10, 0, 0))
            .unwrap()
            .unwrap();
        let slice = history
            .fetch_candles_in_range("rb2410", Granularity::OneSecond, ts(9, 30, 0), ts(9, 31, 0))
            .unwrap()
            .unwrap();
        assert_eq!(&hour[1800..1860], slice.as_slice());
    }

    #[test]
    fn test_random_walk_is_reproducible() {
        let a = random_walk(42, "rb2410", ts(9, 0, 0), Granularity::OneSecond, 100);
        let b = random_walk(42, "rb2410", ts(9, 0, 0), Granularity::OneSecond, 100);
        assert_eq!(a, b);
        let c = random_walk(43, "rb2410", ts(9, 0, 0), Granularity::OneSecond, 100);
        assert_ne!(a, c);
    }

    #[test]
    fn test_resampled_walk_preserves_totals() {
        let rows = random_walk(7, "rb2410", ts(9, 0, 0), Granularity::OneSecond, 600);
        let bars = resample(&rows, Granularity::OneMinute);
        assert_eq!(bars.len(), 10);

        let raw_volume: f64 = rows.iter().map(|c| c.volume).sum();
        let bar_volume: f64 = bars.iter().map(|c| c.volume).sum();
        assert!((raw_volume - bar_volume).abs() < 1e-9);
        assert_eq!(bars[0].open, rows[0].open);
        assert_eq!(bars[9].close, rows[599].close);
    }
}
