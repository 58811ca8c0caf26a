//! Aggregate execution statistics
//!
//! One instance is created per service and handed to the executor; nothing
//! here is global, so tests and embedders can run several engines side by
//! side without shared state.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Default, Clone)]
struct Counters {
    total_trades: u64,
    successful_trades: u64,
    total_profit: Decimal,
}

/// Mutex-guarded trade counters, shared via `Arc`
#[derive(Debug, Default)]
pub struct TradeStats {
    counters: Mutex<Counters>,
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Attempts, completed or failed
    pub total_trades: u64,
    /// Attempts where both legs filled
    pub successful_trades: u64,
    /// Successful fraction of all attempts, zero when none ran
    pub success_rate: Decimal,
    /// Realized profit across successful trades, in quote currency
    pub total_profit: Decimal,
}

impl TradeStats {
    /// Fresh counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a completed trade and its realized profit
    pub fn record_success(&self, profit: Decimal) {
        let mut counters = self.lock();
        counters.total_trades += 1;
        counters.successful_trades += 1;
        counters.total_profit += profit;
    }

    /// Count a failed trade
    pub fn record_failure(&self) {
        self.lock().total_trades += 1;
    }

    /// Current counter values
    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = self.lock().clone();
        let success_rate = if counters.total_trades == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(counters.successful_trades) / Decimal::from(counters.total_trades)
        };
        StatsSnapshot {
            total_trades: counters.total_trades,
            successful_trades: counters.successful_trades,
            success_rate,
            total_profit: counters.total_profit,
        }
    }

    // Counters must stay usable even after a panicking holder poisoned
    // the lock.
    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
