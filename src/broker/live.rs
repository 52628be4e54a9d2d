use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::broker::{cut_to_session, Broker};
use crate::error::{Result, TradeError};
use crate::market::{LiveSource, MarketDataSource, StreamingClient};
use crate::models::{Candle, Direction, Granularity, Offset, Order, PositionSnapshot, PriceType};
use crate::report::RunLog;

/// Broker fronting the external streaming client.
///
/// Reads go through the `LiveSource` rolling window, orders and position
/// queries go straight to the client. Every accepted order is appended to
/// the run log before submission.
pub struct LiveBroker {
    client: Arc<dyn StreamingClient>,
    source: Arc<LiveSource>,
    run_log: Arc<RunLog>,
}

impl LiveBroker {
    pub fn new(client: Arc<dyn StreamingClient>, source: Arc<LiveSource>, run_log: Arc<RunLog>) -> Self {
        Self {
            client,
            source,
            run_log,
        }
    }

    fn latest_close(&self, instrument: &str, as_of: NaiveDateTime) -> Result<Option<f64>> {
        let bars = self
            .source
            .candles(instrument, Granularity::OneSecond, 1, as_of)?;
        Ok(bars.last().map(|c| c.close))
    }

    fn closing_order(
        instrument: &str,
        exchange: &str,
        direction: Direction,
        price: f64,
        volume: f64,
        now: NaiveDateTime,
    ) -> Order {
        Order {
            instrument: instrument.to_string(),
            exchange: exchange.to_string(),
            timestamp: now,
            direction,
            offset: Offset::Close,
            price,
            volume,
            stop_price: None,
            price_type: PriceType::Market,
        }
    }
}

impl Broker for LiveBroker {
    fn get_candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
        as_of: NaiveDateTime,
        session_cut: bool,
    ) -> Result<Vec<Candle>> {
        let bars = self.source.candles(instrument, granularity, count, as_of)?;
        if session_cut {
            cut_to_session(bars, as_of)
        } else {
            Ok(bars)
        }
    }

    fn place_order(&self, order: Order) -> Result<()> {
        self.run_log.record_order(&order)?;
        self.client.submit_order(&order)
    }

    fn get_position(&self, instrument: &str) -> Result<PositionSnapshot> {
        self.client.position(instrument)
    }

    fn relog(&self) -> Result<()> {
        self.client.relog()
    }

    fn clear_positions(&self, instrument: &str) -> Result<()> {
        let position = self.client.position(instrument)?;
        if position.is_flat() {
            return Ok(());
        }

        let now = chrono::Local::now().naive_local();
        let Some(price) = self.latest_close(instrument, now)? else {
            warn!(instrument, "no price available to clear positions");
            return Err(TradeError::DataUnavailable(format!(
                "no close price for {instrument}"
            )));
        };

        info!(instrument, price, "submitting forced close orders");
        if position.long_volume > 0.0 {
            // a close-short order unwinds the long book
            self.place_order(Self::closing_order(
                instrument,
                "",
                Direction::Short,
                price,
                position.long_volume,
                now,
            ))?;
        }
        if position.short_volume > 0.0 {
            self.place_order(Self::closing_order(
                instrument,
                "",
                Direction::Long,
                price,
                position.short_volume,
                now,
            ))?;
        }
        Ok(())
    }
}
