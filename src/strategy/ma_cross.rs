use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::debug;

use crate::broker::Broker;
use crate::models::{Direction, Granularity, Offset, Order, PriceType};
use crate::strategy::{Strategy, StrategyContext};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Params {
    fast_period: usize,
    slow_period: usize,
    volume: f64,
    lookback: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            fast_period: 5,
            slow_period: 20,
            volume: 1.0,
            lookback: 30,
        }
    }
}

/// Dual-EMA crossover.
///
/// Features come from 1min candles; the acting price is the latest 1s close.
/// Holds at most one position at a time and flips on the opposite cross.
pub struct MaCross {
    instrument: String,
    exchange: String,
    broker: Arc<dyn Broker>,
    params: Params,
    side: Option<Direction>,
    enter_price: f64,
    last_price: Option<f64>,
}

impl MaCross {
    pub fn from_context(ctx: StrategyContext) -> anyhow::Result<Self> {
        let params: Params = serde_json::from_value(ctx.parameters)?;
        if params.fast_period == 0 || params.slow_period <= params.fast_period {
            anyhow::bail!(
                "ma_cross needs 0 < fast_period < slow_period, got {} and {}",
                params.fast_period,
                params.slow_period
            );
        }
        Ok(Self {
            instrument: ctx.instrument,
            exchange: ctx.exchange,
            broker: ctx.broker,
            params,
            side: None,
            enter_price: 0.0,
            last_price: None,
        })
    }

    fn order(&self, now: NaiveDateTime, direction: Direction, offset: Offset, price: f64) -> Order {
        Order {
            instrument: self.instrument.clone(),
            exchange: self.exchange.clone(),
            timestamp: now,
            direction,
            offset,
            price,
            volume: self.params.volume,
            stop_price: None,
            price_type: PriceType::Limit,
        }
    }

    fn closing_direction(side: Direction) -> Direction {
        // a close order names the opposite direction of the book it unwinds
        match side {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

fn ema(closes: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(closes.len());
    let mut value = match closes.first() {
        Some(first) => *first,
        None => return out,
    };
    for close in closes {
        value = alpha * close + (1.0 - alpha) * value;
        out.push(value);
    }
    out
}

impl Strategy for MaCross {
    fn name(&self) -> &str {
        "ma_cross"
    }

    fn generate_signal(&mut self, now: NaiveDateTime) -> anyhow::Result<Vec<Order>> {
        let minutes = self.broker.get_candles(
            &self.instrument,
            Granularity::OneMinute,
            self.params.lookback,
            now,
            false,
        )?;
        if minutes.len() < self.params.slow_period {
            return Ok(Vec::new());
        }

        let seconds =
            self.broker
                .get_candles(&self.instrument, Granularity::OneSecond, 1, now, false)?;
        let Some(price) = seconds.last().map(|c| c.close) else {
            return Ok(Vec::new());
        };
        self.last_price = Some(price);

        let closes: Vec<f64> = minutes.iter().map(|c| c.close).collect();
        let fast = ema(&closes, self.params.fast_period);
        let slow = ema(&closes, self.params.slow_period);
        let n = closes.len();
        let crossed_up = fast[n - 1] > slow[n - 1] && fast[n - 2] <= slow[n - 2];
        let crossed_down = fast[n - 1] < slow[n - 1] && fast[n - 2] >= slow[n - 2];

        let mut orders = Vec::new();
        let target = if crossed_up {
            Some(Direction::Long)
        } else if crossed_down {
            Some(Direction::Short)
        } else {
            None
        };
        let Some(target) = target else {
            return Ok(orders);
        };
        if self.side == Some(target) {
            return Ok(orders);
        }

        if let Some(side) = self.side.take() {
            orders.push(self.order(now, Self::closing_direction(side), Offset::Close, price));
        }
        debug!(instrument = %self.instrument, ?target, price, "ema cross");
        orders.push(self.order(now, target, Offset::Open, price));
        self.side = Some(target);
        self.enter_price = price;
        Ok(orders)
    }

    fn reset(&mut self, now: NaiveDateTime) -> anyhow::Result<()> {
        if let Some(side) = self.side.take() {
            let price = self.last_price.unwrap_or(self.enter_price);
            let order = self.order(now, Self::closing_direction(side), Offset::Close, price);
            self.broker.place_order(order)?;
        }
        self.last_price = None;
        Ok(())
    }
}
