use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDateTime};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::broker::Broker;
use crate::strategy::Strategy;

const STOP_POLL: Duration = Duration::from_secs(30);
const STOP_HOLD: Duration = Duration::from_secs(80);
const WEEKEND_NAP: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Idle,
    Running,
    StopRequested,
    Stopped,
}

/// One strategy instance bound to one instrument.
pub struct Bot {
    instrument: String,
    strategy: Box<dyn Strategy>,
    broker: Arc<dyn Broker>,
    state: BotState,
}

impl Bot {
    pub fn new(instrument: impl Into<String>, strategy: Box<dyn Strategy>, broker: Arc<dyn Broker>) -> Self {
        Self {
            instrument: instrument.into(),
            strategy,
            broker,
            state: BotState::Idle,
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn state(&self) -> BotState {
        self.state
    }

    /// One tick: ask the strategy for orders and forward them in sequence.
    ///
    /// Strategy and order errors are not caught here; they end this bot's
    /// run and surface to the orchestrator.
    pub fn update(&mut self, now: NaiveDateTime) -> anyhow::Result<()> {
        let orders = self.strategy.generate_signal(now)?;
        for order in orders {
            self.broker.place_order(order)?;
        }
        Ok(())
    }

    /// Runs the strategy's end-of-day hook.
    pub fn reset(&mut self, now: NaiveDateTime) -> anyhow::Result<()> {
        self.strategy.reset(now)
    }

    /// Live loop: tick at `timestep` until the stop signal flips.
    ///
    /// The stop signal is only observed at tick boundaries; a tick in
    /// progress always completes.
    pub async fn run(
        mut self,
        timestep: Duration,
        stop: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        self.state = BotState::Running;
        info!(instrument = %self.instrument, strategy = self.strategy.name(), "bot running");

        let mut ticker = tokio::time::interval(timestep);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if *stop.borrow() {
                self.state = BotState::StopRequested;
                break;
            }
            let now = chrono::Local::now().naive_local();
            if let Err(e) = self.update(now) {
                self.state = BotState::Stopped;
                return Err(e);
            }
        }

        let now = chrono::Local::now().naive_local();
        self.reset(now)?;
        self.state = BotState::Stopped;
        info!(instrument = %self.instrument, "bot stopped");
        Ok(())
    }
}

/// True when `now` falls in the 60 s window leading up to any stop time.
pub fn within_stop_window(now: NaiveDateTime, stop_times: &[(u32, u32)]) -> bool {
    stop_times.iter().any(|&(hour, minute)| {
        let Some(target) = now.date().and_hms_opt(hour, minute, 0) else {
            return false;
        };
        let target = if target < now {
            target + chrono::Duration::days(1)
        } else {
            target
        };
        (now - target).num_seconds().abs() < 60
    })
}

/// Watches the clock and fires the bot's stop signal near a session stop.
///
/// Polls every 30 s on weekdays, naps an hour on weekends. After firing it
/// holds 80 s so the same window cannot trigger twice, then returns; the
/// orchestrator aborts timers that never fire.
pub async fn session_stop_timer(stop_times: Vec<(u32, u32)>, stop_tx: Arc<watch::Sender<bool>>) {
    loop {
        let now = chrono::Local::now().naive_local();
        if now.weekday().num_days_from_monday() >= 5 {
            tokio::time::sleep(WEEKEND_NAP).await;
            continue;
        }
        if within_stop_window(now, &stop_times) {
            info!(time = %now.format("%Y-%m-%d %H:%M:%S"), "session stop window reached, closing bot");
            if stop_tx.send(true).is_err() {
                warn!("stop signal receiver already gone");
            }
            tokio::time::sleep(STOP_HOLD).await;
            return;
        }
        tokio::time::sleep(STOP_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Order;
    use crate::strategy::Strategy;
    use chrono::NaiveDate;

    struct MockBroker;

    impl Broker for MockBroker {
        fn get_candles(
            &self,
            _instrument: &str,
            _granularity: crate::models::Granularity,
            _count: usize,
            _as_of: NaiveDateTime,
            _session_cut: bool,
        ) -> crate::error::Result<Vec<crate::models::Candle>> {
            Ok(Vec::new())
        }

        fn place_order(&self, _order: Order) -> crate::error::Result<()> {
            Ok(())
        }

        fn get_position(
            &self,
            _instrument: &str,
        ) -> crate::error::Result<crate::models::PositionSnapshot> {
            Ok(crate::models::PositionSnapshot::default())
        }

        fn relog(&self) -> crate::error::Result<()> {
            Ok(())
        }

        fn clear_positions(&self, _instrument: &str) -> crate::error::Result<()> {
            Ok(())
        }
    }

    struct CountingStrategy {
        ticks: usize,
        fail_on: Option<usize>,
    }

    impl Strategy for CountingStrategy {
        fn name(&self) -> &str {
            "counting"
        }

        fn generate_signal(&mut self, _now: NaiveDateTime) -> anyhow::Result<Vec<Order>> {
            self.ticks += 1;
            if self.fail_on == Some(self.ticks) {
                anyhow::bail!("scripted failure");
            }
            Ok(Vec::new())
        }

        fn reset(&mut self, _now: NaiveDateTime) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 7)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_within_stop_window() {
        let stops = [(14, 57), (22, 57)];
        assert!(within_stop_window(ts(14, 56, 30), &stops));
        assert!(within_stop_window(ts(22, 56, 1), &stops));
        // exactly at the stop time
        assert!(within_stop_window(ts(14, 57, 0), &stops));
        // outside the leading minute
        assert!(!within_stop_window(ts(14, 55, 30), &stops));
        assert!(!within_stop_window(ts(14, 58, 0), &stops));
        assert!(!within_stop_window(ts(10, 0, 0), &stops));
    }

    #[tokio::test]
    async fn test_run_stops_on_signal() {
        let bot = Bot::new(
            "rb2410",
            Box::new(CountingStrategy {
                ticks: 0,
                fail_on: None,
            }),
            Arc::new(MockBroker),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(bot.run(Duration::from_millis(5), rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_surfaces_strategy_error() {
        let bot = Bot::new(
            "rb2410",
            Box::new(CountingStrategy {
                ticks: 0,
                fail_on: Some(2),
            }),
            Arc::new(MockBroker),
        );
        let (_tx, rx) = watch::channel(false);
        let result = bot.run(Duration::from_millis(5), rx).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_update_counts_ticks() {
        let mut bot = Bot::new(
            "rb2410",
            Box::new(CountingStrategy {
                ticks: 0,
                fail_on: None,
            }),
            Arc::new(MockBroker),
        );
        assert_eq!(bot.state(), BotState::Idle);
        bot.update(ts(9, 30, 0)).unwrap();
        bot.update(ts(9, 30, 1)).unwrap();
    }
}
