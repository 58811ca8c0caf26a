//! Trade execution: the two-leg executor, transfer bridge and statistics

pub mod executor;
pub mod stats;
pub mod transfer;

pub use executor::{ExecutionOptions, TradeExecutor};
pub use stats::{StatsSnapshot, TradeStats};
pub use transfer::{transfer_asset, TransferStatus};

use crate::exchanges::OrderFill;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a trade failed.
///
/// The first five kinds are clean failures: no order was filled and all
/// balances are untouched. The last two occur after the buy leg filled, so
/// funds sit split across exchanges until reconciled by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeErrorKind {
    /// Pre-trade validation failed
    Validation,
    /// Price refresh before the trade failed
    PriceFetch,
    /// Balance lookup failed
    BalanceFetch,
    /// Not enough balance to fund the trade
    InsufficientBalance,
    /// The buy order was rejected or errored
    BuyOrderFailed,
    /// The cross-exchange transfer did not credit in time
    TransferTimeout,
    /// The sell order was rejected or errored after a filled buy
    SellOrderFailed,
}

impl TradeErrorKind {
    /// True when the buy leg filled but the trade did not finish, leaving
    /// funds split across exchanges
    pub fn is_partial_failure(&self) -> bool {
        matches!(
            self,
            TradeErrorKind::TransferTimeout | TradeErrorKind::SellOrderFailed
        )
    }
}

impl std::fmt::Display for TradeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TradeErrorKind::Validation => "validation",
            TradeErrorKind::PriceFetch => "price_fetch",
            TradeErrorKind::BalanceFetch => "balance_fetch",
            TradeErrorKind::InsufficientBalance => "insufficient_balance",
            TradeErrorKind::BuyOrderFailed => "buy_order_failed",
            TradeErrorKind::TransferTimeout => "transfer_timeout",
            TradeErrorKind::SellOrderFailed => "sell_order_failed",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of one execution attempt.
///
/// Execution never returns an `Err`; every failure mode is folded into the
/// `Failed` variant so callers always get a value they can log, persist
/// and render.
#[derive(Debug, Clone, Serialize)]
pub enum TradeResult {
    /// Both legs filled
    Completed {
        /// Trade id shared with the persisted record
        trade_id: Uuid,
        /// Realized profit in quote currency
        actual_profit: Decimal,
        /// Realized profit as a percent of the buy cost
        actual_profit_percent: Decimal,
        /// Buy leg fill
        buy_fill: OrderFill,
        /// Sell leg fill
        sell_fill: OrderFill,
        /// Wall-clock duration of the attempt
        execution_time_ms: u64,
    },
    /// The attempt ended without both legs filling
    Failed {
        /// Trade id shared with the persisted record
        trade_id: Uuid,
        /// Failure classification
        kind: TradeErrorKind,
        /// Human-readable description
        message: String,
        /// Wall-clock duration of the attempt
        execution_time_ms: u64,
    },
}

impl TradeResult {
    /// Whether both legs filled
    pub fn is_completed(&self) -> bool {
        matches!(self, TradeResult::Completed { .. })
    }

    /// Trade id of the attempt
    pub fn trade_id(&self) -> Uuid {
        match self {
            TradeResult::Completed { trade_id, .. } => *trade_id,
            TradeResult::Failed { trade_id, .. } => *trade_id,
        }
    }

    /// Realized profit, `None` for failed trades
    pub fn profit(&self) -> Option<Decimal> {
        match self {
            TradeResult::Completed { actual_profit, .. } => Some(*actual_profit),
            TradeResult::Failed { .. } => None,
        }
    }
}
