//! Taker fee schedule and fee-adjusted profit arithmetic

use crate::config::BotConfig;
use crate::exchanges::{ExchangeId, ExchangeRegistry};
use indexmap::IndexMap;
use rust_decimal::Decimal;

/// Taker fee fraction per exchange, fixed for the lifetime of a detection
/// cycle. Only exchanges present in the schedule take part in detection.
#[derive(Debug, Clone, Default)]
pub struct FeeSchedule {
    fees: IndexMap<ExchangeId, Decimal>,
}

impl FeeSchedule {
    /// Empty schedule
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule covering every adapter in the registry
    pub fn from_registry(registry: &ExchangeRegistry) -> Self {
        let mut schedule = Self::new();
        for adapter in registry.adapters() {
            schedule.fees.insert(adapter.id(), adapter.taker_fee());
        }
        schedule
    }

    /// Schedule for every enabled exchange in the configuration
    pub fn from_config(config: &BotConfig) -> Self {
        let mut schedule = Self::new();
        for name in &config.exchanges.enabled {
            if let (Ok(id), Some(exchange)) = (name.parse(), config.exchanges.get(name)) {
                schedule.fees.insert(id, exchange.fees.taker_fee);
            }
        }
        schedule
    }

    /// Add or replace one exchange's fee (builder style)
    pub fn with_fee(mut self, exchange: ExchangeId, taker_fee: Decimal) -> Self {
        self.fees.insert(exchange, taker_fee);
        self
    }

    /// Taker fee for an exchange, `None` when it is not in the schedule
    pub fn taker_fee(&self, exchange: ExchangeId) -> Option<Decimal> {
        self.fees.get(&exchange).copied()
    }

    /// Exchanges covered by the schedule
    pub fn exchanges(&self) -> impl Iterator<Item = ExchangeId> + '_ {
        self.fees.keys().copied()
    }

    /// Number of covered exchanges
    pub fn len(&self) -> usize {
        self.fees.len()
    }

    /// Whether the schedule is empty
    pub fn is_empty(&self) -> bool {
        self.fees.is_empty()
    }
}

/// Price spread before fees, relative to the buy price.
///
/// `None` when the buy price is not positive.
pub fn gross_spread_fraction(buy_price: Decimal, sell_price: Decimal) -> Option<Decimal> {
    if buy_price <= Decimal::ZERO {
        return None;
    }
    Some((sell_price - buy_price) / buy_price)
}

/// Net profit fraction for buying at `buy_price` and selling at
/// `sell_price` with taker fees applied to both legs:
///
/// ```text
/// (sell_price * (1 - sell_fee) - buy_price * (1 + buy_fee))
///         / (buy_price * (1 + buy_fee))
/// ```
///
/// The denominator is the fee-inclusive buy cost, so the fraction is the
/// return on capital actually spent. `None` when that cost is not positive.
pub fn net_profit_fraction(
    buy_price: Decimal,
    sell_price: Decimal,
    buy_fee: Decimal,
    sell_fee: Decimal,
) -> Option<Decimal> {
    let buy_cost = buy_price * (Decimal::ONE + buy_fee);
    if buy_cost <= Decimal::ZERO {
        return None;
    }
    let sell_proceeds = sell_price * (Decimal::ONE - sell_fee);
    Some((sell_proceeds - buy_cost) / buy_cost)
}
