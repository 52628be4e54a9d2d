use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use futuresbot::broker::BacktestBroker;
use futuresbot::config::{BacktestConfig, InstrumentMap, StrategyConfig};
use futuresbot::market::CsvHistory;
use futuresbot::orchestrator::{Orchestrator, TradeSpan};
use futuresbot::report::{FileSink, RunLog};
use futuresbot::strategy::StrategyRegistry;

#[derive(Parser)]
#[command(name = "futuresbot", about = "Futures strategy engine")]
struct Cli {
    /// Instrument map file (toml/yaml/json)
    #[arg(long, default_value = "config/instrument_map.toml")]
    instrument_map: PathBuf,

    /// Strategy configuration file
    #[arg(long, default_value = "config/strategy.toml")]
    strategy: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay the configured strategy over recorded candles
    Backtest {
        /// Backtest configuration file
        #[arg(long, default_value = "config/backtest.toml")]
        config: PathBuf,

        /// Directory of <instrument>_<granularity>.csv files
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Order and summary log destination
        #[arg(long, default_value = "backtest_result/overall.txt")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let instrument_map = InstrumentMap::load(&cli.instrument_map)?;
    let strategy_config = StrategyConfig::load(&cli.strategy)?;

    match cli.command {
        Command::Backtest {
            config,
            data_dir,
            output,
        } => {
            let backtest_config = BacktestConfig::load(&config)?;
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let run_log = Arc::new(RunLog::new(Box::new(FileSink::open(&output)?)));
            let broker = Arc::new(BacktestBroker::new(Arc::clone(&run_log)));
            let history = Arc::new(CsvHistory::new(data_dir));

            let orchestrator = Orchestrator::new(
                instrument_map,
                StrategyRegistry::builtin(),
                TradeSpan::Within,
            );
            orchestrator
                .run_backtest(&strategy_config, &backtest_config, broker, history, run_log)
                .await?;
        }
    }

    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "futuresbot=info".into()),
        )
        .init();
}
