// Core modules
pub mod backtest;
pub mod bot;
pub mod broker;
pub mod config;
pub mod error;
pub mod ledger;
pub mod market;
pub mod models;
pub mod orchestrator;
pub mod report;
pub mod strategy;

// Re-export commonly used types
pub use error::{Result, TradeError};
pub use models::*;
pub use strategy::Strategy;
