pub mod ma_cross;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::broker::Broker;
use crate::error::{Result, TradeError};
use crate::models::Order;

/// Base trait for all trading strategies.
///
/// A strategy owns its per-instrument state; the bot calls `generate_signal`
/// once per tick with the current (real or simulated) time and forwards the
/// returned orders unchanged and in order.
pub trait Strategy: Send {
    /// Strategy identifier, used in logs.
    fn name(&self) -> &str;

    /// Produce the orders for one tick. Errors are fatal to the bot.
    fn generate_signal(&mut self, now: NaiveDateTime) -> anyhow::Result<Vec<Order>>;

    /// End-of-day hook: close any open position at the last known price and
    /// drop transient state.
    fn reset(&mut self, now: NaiveDateTime) -> anyhow::Result<()>;
}

/// Everything a strategy constructor needs for one instrument.
#[derive(Clone)]
pub struct StrategyContext {
    pub instrument: String,
    pub exchange: String,
    pub point_change: f64,
    pub parameters: serde_json::Value,
    pub broker: Arc<dyn Broker>,
}

type Constructor = Box<dyn Fn(StrategyContext) -> anyhow::Result<Box<dyn Strategy>> + Send + Sync>;

/// Maps strategy identifiers to constructors.
///
/// Strategies are compiled in and registered at startup; an unknown
/// identifier aborts the run before any bot spawns.
#[derive(Default)]
pub struct StrategyRegistry {
    constructors: HashMap<String, Constructor>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all built-in strategies.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("ma_cross", |ctx| {
            Ok(Box::new(ma_cross::MaCross::from_context(ctx)?) as Box<dyn Strategy>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(StrategyContext) -> anyhow::Result<Box<dyn Strategy>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn build(&self, name: &str, context: StrategyContext) -> Result<Box<dyn Strategy>> {
        let constructor = self.constructors.get(name).ok_or_else(|| {
            TradeError::StrategyInitialization(format!("unknown strategy '{name}'"))
        })?;
        constructor(context).map_err(|e| {
            TradeError::StrategyInitialization(format!("constructing '{name}': {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BacktestBroker;
    use crate::report::{MemorySink, RunLog};

    fn context() -> StrategyContext {
        let log = Arc::new(RunLog::new(Box::new(MemorySink::default())));
        StrategyContext {
            instrument: "rb2410".to_string(),
            exchange: "SHFE".to_string(),
            point_change: 1.0,
            parameters: serde_json::json!({}),
            broker: Arc::new(BacktestBroker::new(log)),
        }
    }

    #[test]
    fn test_unknown_strategy_fails() {
        let registry = StrategyRegistry::builtin();
        let err = registry
            .build("no_such_thing", context())
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, TradeError::StrategyInitialization(_)));
    }

    #[test]
    fn test_builtin_ma_cross_builds() {
        let registry = StrategyRegistry::builtin();
        let strategy = registry.build("ma_cross", context()).unwrap();
        assert_eq!(strategy.name(), "ma_cross");
    }

    #[test]
    fn test_constructor_failure_maps_to_initialization_error() {
        let mut registry = StrategyRegistry::new();
        registry.register("broken", |_| anyhow::bail!("bad parameters"));
        let err = registry.build("broken", context()).map(|_| ()).unwrap_err();
        assert!(matches!(err, TradeError::StrategyInitialization(_)));
    }
}
