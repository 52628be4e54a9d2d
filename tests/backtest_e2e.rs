use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime};

use futuresbot::backtest::SyntheticHistory;
use futuresbot::broker::{BacktestBroker, Broker};
use futuresbot::config::{BacktestConfig, InstrumentMap, InstrumentSpec, StrategyConfig};
use futuresbot::models::{Direction, Granularity, Offset, Order, PriceType};
use futuresbot::orchestrator::{Orchestrator, TradeSpan};
use futuresbot::report::{MemorySink, RunLog};
use futuresbot::strategy::{Strategy, StrategyContext, StrategyRegistry};

/// Opens one long at a scripted price on the first tick of every date and
/// closes it at a scripted price in the end-of-day reset, so the final
/// balance is computable by hand.
struct Scripted {
    instrument: String,
    exchange: String,
    broker: Arc<dyn Broker>,
    open_price: f64,
    close_price: f64,
    holding: bool,
    last_date: Option<NaiveDate>,
}

impl Scripted {
    fn order(
        &self,
        now: NaiveDateTime,
        direction: Direction,
        offset: Offset,
        price: f64,
    ) -> Order {
        Order {
            instrument: self.instrument.clone(),
            exchange: self.exchange.clone(),
            timestamp: now,
            direction,
            offset,
            price,
            volume: 1.0,
            stop_price: None,
            price_type: PriceType::Limit,
        }
    }
}

impl Strategy for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate_signal(&mut self, now: NaiveDateTime) -> anyhow::Result<Vec<Order>> {
        // prove the replay buffers are loaded for every tick
        let seconds =
            self.broker
                .get_candles(&self.instrument, Granularity::OneSecond, 1, now, false)?;
        anyhow::ensure!(!seconds.is_empty(), "no second candle at {now}");
        let minutes =
            self.broker
                .get_candles(&self.instrument, Granularity::OneMinute, 5, now, false)?;
        anyhow::ensure!(!minutes.is_empty(), "no minute candles at {now}");

        if self.last_date != Some(now.date()) {
            self.last_date = Some(now.date());
            self.holding = true;
            return Ok(vec![self.order(
                now,
                Direction::Long,
                Offset::Open,
                self.open_price,
            )]);
        }
        Ok(Vec::new())
    }

    fn reset(&mut self, now: NaiveDateTime) -> anyhow::Result<()> {
        if self.holding {
            self.holding = false;
            self.broker.place_order(self.order(
                now,
                Direction::Short,
                Offset::Close,
                self.close_price,
            ))?;
        }
        Ok(())
    }
}

fn instrument_map() -> InstrumentMap {
    let mut map = InstrumentMap::default();
    map.insert(
        "rb",
        InstrumentSpec {
            exchange: "SHFE".to_string(),
            morning: true,
            night: false,
            stop: vec![(14, 57)],
            value_per_point: 10.0,
            point_change: 1.0,
        },
    );
    map
}

#[tokio::test]
async fn test_backtest_replay_end_to_end() {
    let registry = {
        let mut registry = StrategyRegistry::new();
        registry.register("scripted", |ctx: StrategyContext| {
            Ok(Box::new(Scripted {
                instrument: ctx.instrument,
                exchange: ctx.exchange,
                broker: ctx.broker,
                open_price: 100.0,
                close_price: 103.0,
                holding: false,
                last_date: None,
            }) as Box<dyn Strategy>)
        });
        registry
    };

    let strategy_config = StrategyConfig {
        class: "scripted".to_string(),
        interval: "5s".to_string(),
        watchlist: vec!["rb2410".to_string()],
        backtestlist: None,
        parameters: serde_json::json!({}),
    };
    // Friday 2025-07-04 through Monday 2025-07-07, spanning a weekend
    let backtest_config = BacktestConfig {
        start_date: "4/7/2025".to_string(),
        end_date: "7/7/2025".to_string(),
        step: "5s".to_string(),
        start_balance: 10000.0,
    };

    let sink = MemorySink::default();
    let lines = sink.lines_handle();
    let run_log = Arc::new(RunLog::new(Box::new(sink)));
    let broker = Arc::new(BacktestBroker::new(Arc::clone(&run_log)));
    let history = Arc::new(SyntheticHistory::new(3500.0));

    let orchestrator = Orchestrator::new(instrument_map(), registry, TradeSpan::Within);
    orchestrator
        .run_backtest(
            &strategy_config,
            &backtest_config,
            Arc::clone(&broker),
            history,
            run_log,
        )
        .await
        .unwrap();

    // two weekdays, one 3-point round trip of volume 1 each
    let (balance, points) = broker.ledger_summary("rb2410").unwrap();
    assert_eq!(points, 6.0);
    assert_eq!(balance, 10000.0 + 2.0 * 3.0 * 10.0);
    assert!(broker.get_position("rb2410").unwrap().is_flat());

    let lines = lines.lock().unwrap();
    let order_lines: Vec<&String> = lines.iter().filter(|l| l.contains(',')).collect();
    assert_eq!(order_lines.len(), 4);

    for line in &order_lines {
        let timestamp = line.split(',').next().unwrap();
        let parsed = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S").unwrap();
        // Saturday and Sunday never trade
        assert!(parsed.weekday().num_days_from_monday() < 5, "order on weekend: {line}");
        // all ticks fall inside the morning session window
        let t = parsed.time();
        assert!(
            t >= chrono::NaiveTime::from_hms_opt(9, 1, 0).unwrap()
                && t <= chrono::NaiveTime::from_hms_opt(14, 57, 0).unwrap(),
            "order outside session: {line}"
        );
    }
    assert!(order_lines[0].starts_with("2025-07-04 09:01:00,rb2410,open,long,100"));
    assert!(order_lines[1].starts_with("2025-07-04 14:57:00,rb2410,close,short,103"));

    let summary: Vec<&String> = lines.iter().filter(|l| l.starts_with("rb2410-")).collect();
    assert_eq!(summary.as_slice(), ["rb2410-balance:10060-profit:6"]);
}
