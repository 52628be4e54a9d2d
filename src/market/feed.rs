use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::market::candle_buffer::resample;
use crate::market::{MarketDataSource, StreamingClient};
use crate::models::{Candle, Granularity};

/// A parsed tick from the streaming connection.
#[derive(Debug, Clone)]
pub struct MarketEvent {
    pub instrument: String,
    pub candle: Candle,
}

/// Live market-data source fed by a bounded event mailbox.
///
/// Incoming 1s candles accumulate in a per-instrument rolling window. Reads
/// that the window covers are resampled locally; anything else is fetched
/// from the streaming client. While the connection is down, or when the
/// client has nothing, reads yield an empty Vec and the strategy skips the
/// tick.
pub struct LiveSource {
    client: Arc<dyn StreamingClient>,
    windows: Mutex<HashMap<String, VecDeque<Candle>>>,
    window_capacity: usize,
}

impl LiveSource {
    pub fn new(client: Arc<dyn StreamingClient>, window_capacity: usize) -> Self {
        Self {
            client,
            windows: Mutex::new(HashMap::new()),
            window_capacity,
        }
    }

    /// Drains the mailbox into the rolling windows until the sender closes.
    pub fn spawn_pump(
        self: Arc<Self>,
        mut events: mpsc::Receiver<MarketEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let source = self;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                source.push(event);
            }
            debug!("market event mailbox closed");
        })
    }

    fn push(&self, event: MarketEvent) {
        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(event.instrument).or_default();
        if let Some(last) = window.back() {
            if event.candle.timestamp <= last.timestamp {
                // out-of-order tick, the stream occasionally replays a bar
                return;
            }
        }
        window.push_back(event.candle);
        while window.len() > self.window_capacity {
            window.pop_front();
        }
    }

    fn from_window(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
        as_of: NaiveDateTime,
    ) -> Option<Vec<Candle>> {
        let span = granularity.interval() * count as u32;
        let from = as_of - chrono::Duration::from_std(span).ok()?;

        let windows = self.windows.lock().unwrap();
        let window = windows.get(instrument)?;
        let oldest = window.front()?.timestamp;
        if oldest > from {
            // window does not reach back far enough, fall through to the client
            return None;
        }

        let rows: Vec<Candle> = window
            .iter()
            .filter(|c| c.timestamp >= from && c.timestamp <= as_of)
            .cloned()
            .collect();
        let mut bars = resample(&rows, granularity);
        if bars.len() > count {
            bars.drain(..bars.len() - count);
        }
        Some(bars)
    }
}

impl MarketDataSource for LiveSource {
    fn candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
        as_of: NaiveDateTime,
    ) -> Result<Vec<Candle>> {
        if let Some(bars) = self.from_window(instrument, granularity, count, as_of) {
            return Ok(bars);
        }
        if !self.client.connection_ready() {
            warn!(instrument, "stream not ready, serving empty candle window");
            return Ok(Vec::new());
        }
        Ok(self
            .client
            .fetch_candles(instrument, granularity, count)?
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TradeError;
    use crate::models::{Order, PositionSnapshot};
    use chrono::NaiveDate;

    struct StubClient {
        ready: bool,
        response: Option<Vec<Candle>>,
    }

    impl crate::market::HistorySource for StubClient {
        fn fetch_candles_in_range(
            &self,
            _instrument: &str,
            _granularity: Granularity,
            _start: NaiveDateTime,
            _end: NaiveDateTime,
        ) -> Result<Option<Vec<Candle>>> {
            Ok(self.response.clone())
        }
    }

    impl StreamingClient for StubClient {
        fn connection_ready(&self) -> bool {
            self.ready
        }

        fn fetch_candles(
            &self,
            _instrument: &str,
            _granularity: Granularity,
            _count: usize,
        ) -> Result<Option<Vec<Candle>>> {
            Ok(self.response.clone())
        }

        fn position(&self, _instrument: &str) -> Result<PositionSnapshot> {
            Ok(PositionSnapshot::default())
        }

        fn submit_order(&self, _order: &Order) -> Result<()> {
            Ok(())
        }

        fn relog(&self) -> Result<()> {
            Err(TradeError::ConnectionTimeout)
        }
    }

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 7)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn candle(t: NaiveDateTime, price: f64) -> Candle {
        Candle {
            instrument: "rb2410".to_string(),
            timestamp: t,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1.0,
        }
    }

    #[test]
    fn test_not_ready_yields_empty() {
        let client = Arc::new(StubClient {
            ready: false,
            response: None,
        });
        let source = LiveSource::new(client, 16);
        let bars = source
            .candles("rb2410", Granularity::OneSecond, 5, ts(9, 0, 5))
            .unwrap();
        assert!(bars.is_empty());
    }

    #[test]
    fn test_none_response_yields_empty() {
        let client = Arc::new(StubClient {
            ready: true,
            response: None,
        });
        let source = LiveSource::new(client, 16);
        let bars = source
            .candles("rb2410", Granularity::OneSecond, 5, ts(9, 0, 5))
            .unwrap();
        assert!(bars.is_empty());
    }

    #[test]
    fn test_window_serves_covered_reads() {
        let client = Arc::new(StubClient {
            ready: false,
            response: None,
        });
        let source = LiveSource::new(client, 64);
        for i in 0..30 {
            source.push(MarketEvent {
                instrument: "rb2410".to_string(),
                candle: candle(ts(9, 0, i), 100.0 + i as f64),
            });
        }

        // covered by the window even though the client is down
        let bars = source
            .candles("rb2410", Granularity::OneSecond, 5, ts(9, 0, 29))
            .unwrap();
        assert_eq!(bars.len(), 5);
        assert_eq!(bars.last().unwrap().close, 129.0);
    }

    #[test]
    fn test_out_of_order_tick_dropped() {
        let client = Arc::new(StubClient {
            ready: false,
            response: None,
        });
        let source = LiveSource::new(client, 64);
        source.push(MarketEvent {
            instrument: "rb2410".to_string(),
            candle: candle(ts(9, 0, 10), 100.0),
        });
        source.push(MarketEvent {
            instrument: "rb2410".to_string(),
            candle: candle(ts(9, 0, 9), 99.0),
        });
        let windows = source.windows.lock().unwrap();
        assert_eq!(windows.get("rb2410").unwrap().len(), 1);
    }
}
