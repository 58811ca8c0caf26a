//! Cross-Exchange Spot Arbitrage Engine
//!
//! Polls and streams spot prices from several exchanges into a shared price
//! table, detects fee-adjusted arbitrage opportunities between venues, and
//! executes two-leg buy/sell trades with full audit records.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod exchanges;
pub mod history;
pub mod market;
pub mod service;
pub mod strategy;
pub mod trading;
pub mod utils;

// Re-export commonly used types
pub use config::{BotConfig, TradingMode};
pub use exchanges::{ExchangeAdapter, ExchangeId, ExchangeRegistry, Symbol};
pub use history::{TradeHistoryStore, TradeRecord, TradeStatus};
pub use market::{PriceBook, PriceQuote, PriceSnapshot};
pub use service::ArbitrageService;
pub use strategy::{FeeSchedule, Opportunity, OpportunityDetector};
pub use trading::{TradeErrorKind, TradeExecutor, TradeResult};

/// Result type used throughout the application
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the arbitrage system
#[derive(thiserror::Error, Debug)]
pub enum ArbError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Data parsing error
    #[error("Data parsing error: {0}")]
    DataParsing(String),

    /// Symbol mapping error
    #[error("Symbol error: {0}")]
    Symbol(String),

    /// Trading error
    #[error("Trading error: {0}")]
    Trading(String),

    /// Trade history persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Timeout error
    #[error("Timeout error: {0}")]
    Timeout(String),
}

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
