use thiserror::Error;

/// Errors produced by the trading core.
///
/// Ledger invariant violations (`InvalidPosition`, `InvalidOffset`) are fatal
/// to the run for that instrument: they indicate a strategy or
/// order-construction defect, not a transient condition. Configuration
/// problems (`UnsupportedGranularity`, `UnsupportedInstrumentType`,
/// `InvalidSession`) surface before any bot is spawned.
#[derive(Debug, Error)]
pub enum TradeError {
    #[error("unsupported granularity '{0}'")]
    UnsupportedGranularity(String),

    #[error("invalid order offset code {0}")]
    InvalidOffset(u8),

    #[error("invalid position for {instrument}: long {long}, short {short}")]
    InvalidPosition {
        instrument: String,
        long: f64,
        short: f64,
    },

    #[error("instrument '{0}' not found")]
    InstrumentNotFound(String),

    #[error("unsupported instrument type '{0}'")]
    UnsupportedInstrumentType(String),

    #[error("connection to the market data stream timed out")]
    ConnectionTimeout,

    #[error("strategy initialization failed: {0}")]
    StrategyInitialization(String),

    #[error("invalid session configuration: {0}")]
    InvalidSession(String),

    #[error("invalid interval '{0}'")]
    InvalidInterval(String),

    #[error("market data unavailable: {0}")]
    DataUnavailable(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TradeError>;
