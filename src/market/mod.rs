pub mod candle_buffer;
pub mod csv;
pub mod feed;
pub mod replay_source;

pub use candle_buffer::CandleBuffer;
pub use csv::CsvHistory;
pub use feed::{LiveSource, MarketEvent};
pub use replay_source::ReplaySource;

use chrono::NaiveDateTime;

use crate::error::Result;
use crate::models::{Candle, Granularity, Order, PositionSnapshot};

/// Read access to historical candles.
///
/// `Ok(None)` means the source has no data at all for the window, which
/// callers treat as "nothing happened here" rather than a failure.
pub trait HistorySource: Send + Sync {
    fn fetch_candles_in_range(
        &self,
        instrument: &str,
        granularity: Granularity,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<Vec<Candle>>>;
}

/// The external streaming/broker client surface.
///
/// Implemented outside this crate by the actual exchange connection. Reads
/// while the connection is not ready return empty results, not errors.
pub trait StreamingClient: HistorySource {
    fn connection_ready(&self) -> bool;

    fn fetch_candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
    ) -> Result<Option<Vec<Candle>>>;

    fn position(&self, instrument: &str) -> Result<PositionSnapshot>;

    fn submit_order(&self, order: &Order) -> Result<()>;

    fn relog(&self) -> Result<()>;
}

/// Uniform candle reads for strategies, backed by a buffer or a live feed.
///
/// Returning fewer than `count` candles is legal; strategies skip the tick
/// when they cannot compute their features.
pub trait MarketDataSource: Send + Sync {
    fn candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
        as_of: NaiveDateTime,
    ) -> Result<Vec<Candle>>;
}
