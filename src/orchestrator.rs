use std::sync::Arc;
use std::time::Duration;

use chrono::Timelike;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::backtest::{run_replay, session_windows};
use crate::bot::{session_stop_timer, Bot};
use crate::broker::{BacktestBroker, Broker};
use crate::config::{BacktestConfig, InstrumentMap, StrategyConfig};
use crate::error::{Result, TradeError};
use crate::ledger::PositionLedger;
use crate::market::HistorySource;
use crate::report::RunLog;
use crate::strategy::{StrategyContext, StrategyRegistry};

/// Whether positions may carry across a session boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSpan {
    Within,
    Across,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketSession {
    Morning,
    Night,
}

/// Maps the wall-clock hour to the trading session it belongs to.
pub fn market_session(hour: u32) -> Result<MarketSession> {
    if hour > 7 && hour < 16 {
        Ok(MarketSession::Morning)
    } else if hour > 19 || hour < 4 {
        Ok(MarketSession::Night)
    } else {
        Err(TradeError::InvalidSession(format!(
            "no trading session contains hour {hour}"
        )))
    }
}

/// Builds, runs, and tears down the per-instrument bots.
pub struct Orchestrator {
    instrument_map: InstrumentMap,
    registry: StrategyRegistry,
    span: TradeSpan,
    settle_delay: Duration,
}

impl Orchestrator {
    pub fn new(instrument_map: InstrumentMap, registry: StrategyRegistry, span: TradeSpan) -> Self {
        Self {
            instrument_map,
            registry,
            span,
            settle_delay: Duration::from_secs(1),
        }
    }

    /// Pause after clearing a stopped bot's positions, before handling the
    /// next completion.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    fn build_bot(
        &self,
        instrument: &str,
        config: &StrategyConfig,
        broker: &Arc<dyn Broker>,
    ) -> Result<Bot> {
        let spec = self.instrument_map.lookup(instrument)?;
        let strategy = self.registry.build(
            &config.class,
            StrategyContext {
                instrument: instrument.to_string(),
                exchange: spec.exchange.clone(),
                point_change: spec.point_change,
                parameters: config.parameters.clone(),
                broker: Arc::clone(broker),
            },
        )?;
        Ok(Bot::new(instrument, strategy, Arc::clone(broker)))
    }

    /// Runs the live session derived from the wall clock.
    pub async fn run_live(
        &self,
        config: &StrategyConfig,
        broker: Arc<dyn Broker>,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let session = market_session(chrono::Local::now().hour())?;
        self.run_live_at(session, config, broker, shutdown).await
    }

    /// Runs all watchlist bots trading in `session` until their stop timers
    /// or the global shutdown signal fire.
    ///
    /// Every bot is built before anything spawns, so a bad configuration
    /// aborts the whole run instead of leaving a partial fleet.
    pub async fn run_live_at(
        &self,
        session: MarketSession,
        config: &StrategyConfig,
        broker: Arc<dyn Broker>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let timestep = config.timestep()?;

        let mut prepared = Vec::new();
        for instrument in &config.watchlist {
            let spec = self.instrument_map.lookup(instrument)?;
            let stop_times = spec.validated_stops()?.to_vec();
            let trades_now = match session {
                MarketSession::Morning => spec.morning,
                MarketSession::Night => spec.night,
            };
            if !trades_now {
                info!(instrument = %instrument, ?session, "instrument closed this session, skipping");
                continue;
            }
            let bot = self.build_bot(instrument, config, &broker)?;
            prepared.push((bot, stop_times));
        }

        let mut bots = JoinSet::new();
        let mut timers = Vec::new();
        let mut stop_senders = Vec::new();
        for (bot, stop_times) in prepared {
            let instrument = bot.instrument().to_string();
            let (tx, rx) = watch::channel(false);
            let tx = Arc::new(tx);
            timers.push(tokio::spawn(session_stop_timer(stop_times, Arc::clone(&tx))));
            stop_senders.push(Arc::clone(&tx));
            bots.spawn(async move { (instrument, bot.run(timestep, rx).await) });
        }
        info!(count = bots.len(), ?session, "bots spawned");

        // fan the global shutdown out to every bot's stop channel
        let forwarder = tokio::spawn(async move {
            if shutdown.changed().await.is_ok() && *shutdown.borrow() {
                for tx in &stop_senders {
                    let _ = tx.send(true);
                }
            }
        });

        while let Some(joined) = bots.join_next().await {
            let instrument = match joined {
                Ok((instrument, Ok(()))) => {
                    info!(instrument = %instrument, "bot stopped cleanly");
                    instrument
                }
                Ok((instrument, Err(e))) => {
                    error!(instrument = %instrument, error = %e, "bot terminated abnormally");
                    instrument
                }
                Err(join_error) => {
                    error!(error = %join_error, "bot task panicked");
                    continue;
                }
            };
            if self.span == TradeSpan::Within {
                if let Err(e) = broker.clear_positions(&instrument) {
                    warn!(instrument = %instrument, error = %e, "failed to clear positions");
                }
                tokio::time::sleep(self.settle_delay).await;
            }
        }

        forwarder.abort();
        for timer in timers {
            timer.abort();
        }
        info!("all bots joined, exiting live run");
        Ok(())
    }

    /// Replays every backtest instrument across the configured date range.
    ///
    /// Configuration is validated for all instruments before any replay
    /// starts. Each instrument replays in its own blocking task against its
    /// own buffers and ledger; one summary line per instrument goes to the
    /// run log at the end.
    pub async fn run_backtest(
        &self,
        config: &StrategyConfig,
        backtest: &BacktestConfig,
        broker: Arc<BacktestBroker>,
        history: Arc<dyn HistorySource>,
        run_log: Arc<RunLog>,
    ) -> anyhow::Result<()> {
        let start = backtest.start()?;
        let end = backtest.end()?;
        let step = backtest.step_granularity()?;

        let broker_dyn: Arc<dyn Broker> = broker.clone();
        let mut prepared = Vec::new();
        for instrument in config.backtest_instruments() {
            let spec = self.instrument_map.lookup(instrument)?;
            let windows = session_windows(spec)?;
            broker.register_instrument(
                PositionLedger::new(
                    instrument.clone(),
                    backtest.start_balance,
                    spec.value_per_point,
                    spec.point_change,
                ),
                Arc::clone(&history),
            );
            let bot = self.build_bot(instrument, config, &broker_dyn)?;
            prepared.push((bot, windows));
        }

        let mut replays = JoinSet::new();
        for (mut bot, windows) in prepared {
            let broker = Arc::clone(&broker);
            replays.spawn_blocking(move || {
                let instrument = bot.instrument().to_string();
                let result = run_replay(&mut bot, &broker, start, end, &windows, step);
                (instrument, result)
            });
        }

        let mut failures = 0;
        while let Some(joined) = replays.join_next().await {
            match joined {
                Ok((instrument, Ok(()))) => {
                    let (balance, points) = broker.ledger_summary(&instrument)?;
                    run_log.record_summary(&instrument, balance, points)?;
                }
                Ok((instrument, Err(e))) => {
                    error!(instrument = %instrument, error = %e, "replay failed");
                    failures += 1;
                }
                Err(join_error) => {
                    error!(error = %join_error, "replay task panicked");
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            anyhow::bail!("{failures} replay(s) failed");
        }
        Ok(())
    }
}
