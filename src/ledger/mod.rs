use tracing::info;

use crate::error::{Result, TradeError};
use crate::models::{Direction, Offset, Order, PositionSnapshot};

/// Position and P&L state for one instrument.
///
/// One live entry price per side. `point_change` is the instrument's minimum
/// price increment; profits are normalized to points before they hit the
/// balance, so `points` accumulates tick-sized moves and
/// `balance` moves by `points * value_per_point * volume`.
#[derive(Debug, Clone)]
pub struct PositionLedger {
    instrument: String,
    balance: f64,
    value_per_point: f64,
    point_change: f64,
    long_position: f64,
    short_position: f64,
    long_enter_price: f64,
    short_enter_price: f64,
    points: f64,
}

impl PositionLedger {
    pub fn new(
        instrument: impl Into<String>,
        start_balance: f64,
        value_per_point: f64,
        point_change: f64,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            balance: start_balance,
            value_per_point,
            point_change,
            long_position: 0.0,
            short_position: 0.0,
            long_enter_price: 0.0,
            short_enter_price: 0.0,
            points: 0.0,
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn points(&self) -> f64 {
        self.points
    }

    /// Applies one executed order to the books.
    ///
    /// Opens set the side's entry price and add volume; a second open on a
    /// side still holding volume must arrive at the same price, since the
    /// model keeps a single entry price per side. Closes realize P&L against
    /// the opposite side's entry price. Any negative counter afterwards is a
    /// strategy defect and fails the run for this instrument.
    pub fn apply_order(&mut self, order: &Order) -> Result<()> {
        let mut profit = 0.0;
        match (order.offset, order.direction) {
            (Offset::Open, Direction::Long) => {
                if self.long_position > 0.0 && self.long_enter_price != order.price {
                    return self.invalid_position();
                }
                self.long_enter_price = order.price;
                self.long_position += order.volume;
            }
            (Offset::Open, Direction::Short) => {
                if self.short_position > 0.0 && self.short_enter_price != order.price {
                    return self.invalid_position();
                }
                self.short_enter_price = order.price;
                self.short_position += order.volume;
            }
            (Offset::Close, Direction::Long) => {
                self.short_position -= order.volume;
                profit = self.short_enter_price - order.price;
            }
            (Offset::Close, Direction::Short) => {
                self.long_position -= order.volume;
                profit = order.price - self.long_enter_price;
            }
        }

        if self.long_position < 0.0 || self.short_position < 0.0 {
            return self.invalid_position();
        }

        profit /= self.point_change;
        self.balance += profit * self.value_per_point * order.volume;
        self.points += profit;
        Ok(())
    }

    /// Force-closes both sides at `clear_price` with the regular profit
    /// formulas, then zeroes the counters.
    pub fn clear_positions(&mut self, clear_price: f64) {
        if self.long_position > 0.0 {
            let profit = (clear_price - self.long_enter_price) / self.point_change;
            self.balance += profit * self.value_per_point * self.long_position;
            self.points += profit;
            self.long_position = 0.0;
            info!(
                instrument = %self.instrument,
                clear_price,
                "force-closed long side"
            );
        }
        if self.short_position > 0.0 {
            let profit = (self.short_enter_price - clear_price) / self.point_change;
            self.balance += profit * self.value_per_point * self.short_position;
            self.points += profit;
            self.short_position = 0.0;
            info!(
                instrument = %self.instrument,
                clear_price,
                "force-closed short side"
            );
        }
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            long_volume: self.long_position,
            long_enter: self.long_enter_price,
            short_volume: self.short_position,
            short_enter: self.short_enter_price,
        }
    }

    fn invalid_position(&self) -> Result<()> {
        Err(TradeError::InvalidPosition {
            instrument: self.instrument.clone(),
            long: self.long_position,
            short: self.short_position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceType;
    use chrono::NaiveDate;

    fn order(direction: Direction, offset: Offset, price: f64, volume: f64) -> Order {
        Order {
            instrument: "rb2410".to_string(),
            exchange: "SHFE".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2025, 7, 7)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
            direction,
            offset,
            price,
            volume,
            stop_price: None,
            price_type: PriceType::Limit,
        }
    }

    fn ledger() -> PositionLedger {
        PositionLedger::new("rb2410", 10000.0, 10.0, 1.0)
    }

    #[test]
    fn test_long_round_trip_profit() {
        // open long at 100, close at 105: +5 points, +5*10*2 balance
        let mut lg = ledger();
        lg.apply_order(&order(Direction::Long, Offset::Open, 100.0, 2.0)).unwrap();
        lg.apply_order(&order(Direction::Short, Offset::Close, 105.0, 2.0)).unwrap();
        assert_eq!(lg.balance(), 10000.0 + 5.0 * 10.0 * 2.0);
        assert_eq!(lg.points(), 5.0);
        assert!(lg.snapshot().is_flat());
    }

    #[test]
    fn test_short_round_trip_with_point_change() {
        // point_change 2: a 4-price-unit move is 2 points
        let mut lg = PositionLedger::new("rb2410", 0.0, 10.0, 2.0);
        lg.apply_order(&order(Direction::Short, Offset::Open, 100.0, 1.0)).unwrap();
        lg.apply_order(&order(Direction::Long, Offset::Close, 96.0, 1.0)).unwrap();
        assert_eq!(lg.points(), 2.0);
        assert_eq!(lg.balance(), 2.0 * 10.0);
    }

    #[test]
    fn test_close_more_than_open_is_invalid() {
        let mut lg = ledger();
        lg.apply_order(&order(Direction::Long, Offset::Open, 100.0, 1.0)).unwrap();
        let err = lg
            .apply_order(&order(Direction::Short, Offset::Close, 101.0, 2.0))
            .unwrap_err();
        assert!(matches!(err, TradeError::InvalidPosition { .. }));
    }

    #[test]
    fn test_close_without_open_is_invalid() {
        let mut lg = ledger();
        let err = lg
            .apply_order(&order(Direction::Long, Offset::Close, 101.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, TradeError::InvalidPosition { .. }));
    }

    #[test]
    fn test_reopen_same_price_adds_volume() {
        let mut lg = ledger();
        lg.apply_order(&order(Direction::Long, Offset::Open, 100.0, 1.0)).unwrap();
        lg.apply_order(&order(Direction::Long, Offset::Open, 100.0, 2.0)).unwrap();
        assert_eq!(lg.snapshot().long_volume, 3.0);
    }

    #[test]
    fn test_reopen_different_price_is_invalid() {
        let mut lg = ledger();
        lg.apply_order(&order(Direction::Long, Offset::Open, 100.0, 1.0)).unwrap();
        let err = lg
            .apply_order(&order(Direction::Long, Offset::Open, 101.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, TradeError::InvalidPosition { .. }));
    }

    #[test]
    fn test_clear_then_reopen_round_trip() {
        let mut lg = ledger();
        lg.apply_order(&order(Direction::Long, Offset::Open, 100.0, 2.0)).unwrap();
        lg.apply_order(&order(Direction::Short, Offset::Open, 110.0, 1.0)).unwrap();
        lg.clear_positions(104.0);

        // long: +4 points * 2 vol, short: +6 points * 1 vol
        assert_eq!(lg.points(), 4.0 + 6.0);
        assert_eq!(lg.balance(), 10000.0 + 4.0 * 10.0 * 2.0 + 6.0 * 10.0);
        assert!(lg.snapshot().is_flat());

        // books accept fresh opens after a clear
        lg.apply_order(&order(Direction::Long, Offset::Open, 104.0, 1.0)).unwrap();
        assert_eq!(lg.snapshot().long_volume, 1.0);
    }

    #[test]
    fn test_clear_normalizes_by_point_change() {
        let mut lg = PositionLedger::new("rb2410", 0.0, 10.0, 2.0);
        lg.apply_order(&order(Direction::Long, Offset::Open, 100.0, 1.0)).unwrap();
        lg.clear_positions(104.0);
        assert_eq!(lg.points(), 2.0);
        assert_eq!(lg.balance(), 2.0 * 10.0);
    }

    #[test]
    fn test_clear_when_flat_is_noop() {
        let mut lg = ledger();
        lg.clear_positions(123.0);
        assert_eq!(lg.balance(), 10000.0);
        assert_eq!(lg.points(), 0.0);
    }
}
