pub mod backtest;
pub mod live;

pub use backtest::BacktestBroker;
pub use live::LiveBroker;

use chrono::{NaiveDateTime, Timelike};

use crate::error::{Result, TradeError};
use crate::models::{Candle, Granularity, Order, PositionSnapshot};

/// The order/position/market surface a strategy sees.
///
/// One implementation replays history, one fronts the live streaming client;
/// strategies cannot tell them apart.
pub trait Broker: Send + Sync {
    /// Last `count` candles at `granularity` ending at `as_of`. Short or
    /// empty results mean insufficient data, not failure.
    fn get_candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
        as_of: NaiveDateTime,
        cut_to_session: bool,
    ) -> Result<Vec<Candle>>;

    fn place_order(&self, order: Order) -> Result<()>;

    fn get_position(&self, instrument: &str) -> Result<PositionSnapshot>;

    /// Re-establishes the upstream connection where one exists.
    fn relog(&self) -> Result<()>;

    /// Force-closes everything held on `instrument` at the current price.
    fn clear_positions(&self, instrument: &str) -> Result<()>;
}

fn in_morning_session(hour: u32) -> bool {
    (8..=16).contains(&hour)
}

fn in_night_session(hour: u32) -> bool {
    (20..=23).contains(&hour) || hour <= 5
}

/// Restricts a candle series that straddles the day and night sessions to
/// the block matching the as-of hour.
///
/// Morning rows fall in 08:00-16:59, night rows in 20:00-05:59. A series
/// containing only one block passes through unchanged; a series matching
/// neither block is unusable.
pub fn cut_to_session(rows: Vec<Candle>, as_of: NaiveDateTime) -> Result<Vec<Candle>> {
    let morning: Vec<Candle> = rows
        .iter()
        .filter(|c| in_morning_session(c.timestamp.hour()))
        .cloned()
        .collect();
    let night: Vec<Candle> = rows
        .iter()
        .filter(|c| in_night_session(c.timestamp.hour()))
        .cloned()
        .collect();

    match (morning.is_empty(), night.is_empty()) {
        (false, true) => Ok(morning),
        (true, false) => Ok(night),
        (false, false) => {
            if in_morning_session(as_of.hour()) {
                Ok(morning)
            } else {
                Ok(night)
            }
        }
        (true, true) => {
            if rows.is_empty() {
                Ok(rows)
            } else {
                Err(TradeError::DataUnavailable(
                    "candles fall outside both trading sessions".to_string(),
                ))
            }
        }
    }
}
