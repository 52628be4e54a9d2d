use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::broker::{cut_to_session, Broker};
use crate::error::{Result, TradeError};
use crate::ledger::PositionLedger;
use crate::market::{HistorySource, MarketDataSource, ReplaySource};
use crate::models::{Candle, Granularity, Order, PositionSnapshot};
use crate::report::RunLog;

struct InstrumentSlot {
    source: ReplaySource,
    ledger: Mutex<PositionLedger>,
    last_price: Mutex<f64>,
}

/// Broker for replayed runs.
///
/// Each registered instrument gets an independent slot: its own replay
/// buffer, ledger, and last seen price. Slots never share candle state, so
/// replay tasks for different instruments can run in parallel.
pub struct BacktestBroker {
    slots: RwLock<HashMap<String, Arc<InstrumentSlot>>>,
    run_log: Arc<RunLog>,
}

impl BacktestBroker {
    pub fn new(run_log: Arc<RunLog>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            run_log,
        }
    }

    pub fn register_instrument(
        &self,
        ledger: PositionLedger,
        history: Arc<dyn HistorySource>,
    ) {
        let instrument = ledger.instrument().to_string();
        let slot = Arc::new(InstrumentSlot {
            source: ReplaySource::new(instrument.clone(), history),
            ledger: Mutex::new(ledger),
            last_price: Mutex::new(0.0),
        });
        self.slots.write().unwrap().insert(instrument, slot);
    }

    fn slot(&self, instrument: &str) -> Result<Arc<InstrumentSlot>> {
        self.slots
            .read()
            .unwrap()
            .get(instrument)
            .cloned()
            .ok_or_else(|| TradeError::InstrumentNotFound(instrument.to_string()))
    }

    /// Reloads the instrument's minute buffer with `date`'s 1min candles.
    pub fn fill_minute_buffer(&self, instrument: &str, date: NaiveDate) -> Result<()> {
        let slot = self.slot(instrument)?;
        slot.source.fill_day(date)?;
        self.note_close(&slot);
        Ok(())
    }

    /// Reloads the instrument's second buffer with the hour at `hour_start`.
    pub fn fill_second_buffer(&self, instrument: &str, hour_start: NaiveDateTime) -> Result<()> {
        let slot = self.slot(instrument)?;
        slot.source.fill_hour(hour_start)?;
        self.note_close(&slot);
        Ok(())
    }

    fn note_close(&self, slot: &InstrumentSlot) {
        if let Some(close) = slot.source.latest_close() {
            *slot.last_price.lock().unwrap() = close;
        }
    }

    pub fn ledger_summary(&self, instrument: &str) -> Result<(f64, f64)> {
        let slot = self.slot(instrument)?;
        let ledger = slot.ledger.lock().unwrap();
        Ok((ledger.balance(), ledger.points()))
    }
}

impl Broker for BacktestBroker {
    fn get_candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
        as_of: NaiveDateTime,
        session_cut: bool,
    ) -> Result<Vec<Candle>> {
        let slot = self.slot(instrument)?;
        let bars = slot.source.candles(instrument, granularity, count, as_of)?;
        if session_cut {
            cut_to_session(bars, as_of)
        } else {
            Ok(bars)
        }
    }

    fn place_order(&self, order: Order) -> Result<()> {
        let slot = self.slot(&order.instrument)?;
        self.run_log.record_order(&order)?;
        *slot.last_price.lock().unwrap() = order.price;
        let result = slot.ledger.lock().unwrap().apply_order(&order);
        result
    }

    fn get_position(&self, instrument: &str) -> Result<PositionSnapshot> {
        let slot = self.slot(instrument)?;
        let snapshot = slot.ledger.lock().unwrap().snapshot();
        Ok(snapshot)
    }

    fn relog(&self) -> Result<()> {
        Ok(())
    }

    fn clear_positions(&self, instrument: &str) -> Result<()> {
        let slot = self.slot(instrument)?;
        let price = *slot.last_price.lock().unwrap();
        debug!(instrument, price, "clearing replayed positions");
        slot.ledger.lock().unwrap().clear_positions(price);
        Ok(())
    }
}
