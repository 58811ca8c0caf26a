//! Fee-adjusted opportunity detection over a price snapshot
//!
//! The detector is pure: it reads an immutable snapshot, never performs IO
//! and never fails. Symbols without enough data are skipped, so a thin or
//! empty table simply yields an empty result.

use crate::config::DetectorConfig;
use crate::exchanges::{ExchangeId, Symbol};
use crate::market::{PriceQuote, PriceSnapshot};
use crate::strategy::fees::{gross_spread_fraction, net_profit_fraction, FeeSchedule};
use crate::utils::metric_names;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

/// A profitable buy/sell pairing for one symbol
#[derive(Debug, Clone, Serialize)]
pub struct Opportunity {
    /// Symbol to trade
    pub symbol: Symbol,
    /// Exchange to buy on
    pub buy_exchange: ExchangeId,
    /// Exchange to sell on
    pub sell_exchange: ExchangeId,
    /// Last price on the buy exchange
    pub buy_price: Decimal,
    /// Last price on the sell exchange
    pub sell_price: Decimal,
    /// Taker fee fraction on the buy leg
    pub buy_fee_fraction: Decimal,
    /// Taker fee fraction on the sell leg
    pub sell_fee_fraction: Decimal,
    /// Raw price spread before fees, relative to the buy price
    pub gross_spread_fraction: Decimal,
    /// Profit fraction after both taker fees, relative to fee-inclusive cost
    pub net_profit_fraction: Decimal,
    /// Net profit in quote currency for the configured capital
    pub net_profit_quote: Decimal,
    /// Capital the sizing below assumes, in quote currency
    pub capital_amount: Decimal,
    /// Base quantity affordable with the capital, floored to precision
    pub quantity: Decimal,
    /// Detection timestamp
    pub detected_at: DateTime<Utc>,
}

/// Scans snapshots for the best cross-exchange pairing per symbol
#[derive(Debug, Clone)]
pub struct OpportunityDetector {
    min_profit_threshold: Decimal,
    capital_amount: Decimal,
    max_update_age_ms: u64,
    quantity_precision: u32,
}

impl OpportunityDetector {
    /// Detector from configuration. Sizing uses the default precision;
    /// the executor re-floors to the buy venue's own precision before
    /// placing orders.
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            min_profit_threshold: config.min_profit_threshold,
            capital_amount: config.capital_amount,
            max_update_age_ms: config.max_update_age_ms,
            quantity_precision: crate::config::ConfigDefaults::QUANTITY_PRECISION,
        }
    }

    /// Detector with explicit parameters
    pub fn with_params(
        min_profit_threshold: Decimal,
        capital_amount: Decimal,
        max_update_age_ms: u64,
    ) -> Self {
        Self {
            min_profit_threshold,
            capital_amount,
            max_update_age_ms,
            quantity_precision: crate::config::ConfigDefaults::QUANTITY_PRECISION,
        }
    }

    /// Override the sizing precision
    pub fn with_precision(mut self, quantity_precision: u32) -> Self {
        self.quantity_precision = quantity_precision;
        self
    }

    /// Find the single best opportunity per symbol.
    ///
    /// A venue takes part only when its quote is fresh at `now` and its
    /// exchange appears in the fee schedule. Fewer than two eligible venues
    /// means the symbol is skipped. Results hold at most one entry per
    /// symbol and are ordered by net profit descending, then symbol
    /// ascending.
    pub fn detect(
        &self,
        snapshot: &PriceSnapshot,
        symbols: &[Symbol],
        fees: &FeeSchedule,
        now: DateTime<Utc>,
    ) -> Vec<Opportunity> {
        let mut opportunities = Vec::new();

        for symbol in symbols {
            let mut venues: Vec<(&PriceQuote, Decimal)> = snapshot
                .values()
                .filter(|quote| &quote.symbol == symbol)
                .filter(|quote| quote.price > Decimal::ZERO)
                .filter(|quote| !quote.is_stale(now, self.max_update_age_ms))
                .filter_map(|quote| fees.taker_fee(quote.exchange).map(|fee| (quote, fee)))
                .collect();
            if venues.len() < 2 {
                continue;
            }
            // Snapshot iteration order is arbitrary; fix it so equal-profit
            // pairings resolve the same way every cycle.
            venues.sort_by_key(|(quote, _)| quote.exchange);

            let mut best: Option<Opportunity> = None;
            for (buy_quote, buy_fee) in &venues {
                for (sell_quote, sell_fee) in &venues {
                    if buy_quote.exchange == sell_quote.exchange {
                        continue;
                    }
                    let net = match net_profit_fraction(
                        buy_quote.price,
                        sell_quote.price,
                        *buy_fee,
                        *sell_fee,
                    ) {
                        Some(net) => net,
                        None => continue,
                    };
                    if net < self.min_profit_threshold {
                        continue;
                    }
                    let better = match &best {
                        Some(current) => net > current.net_profit_fraction,
                        None => true,
                    };
                    if better {
                        best = Some(self.build(
                            symbol, buy_quote, sell_quote, *buy_fee, *sell_fee, net, now,
                        ));
                    }
                }
            }

            if let Some(opportunity) = best {
                debug!(
                    symbol = %opportunity.symbol,
                    buy = %opportunity.buy_exchange,
                    sell = %opportunity.sell_exchange,
                    net = %opportunity.net_profit_fraction,
                    "Opportunity detected"
                );
                opportunities.push(opportunity);
            }
        }

        opportunities.sort_by(|a, b| {
            b.net_profit_fraction
                .cmp(&a.net_profit_fraction)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        if !opportunities.is_empty() {
            metrics::counter!(
                metric_names::OPPORTUNITIES_TOTAL,
                opportunities.len() as u64
            );
        }
        opportunities
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        symbol: &Symbol,
        buy: &PriceQuote,
        sell: &PriceQuote,
        buy_fee: Decimal,
        sell_fee: Decimal,
        net: Decimal,
        now: DateTime<Utc>,
    ) -> Opportunity {
        Opportunity {
            symbol: symbol.clone(),
            buy_exchange: buy.exchange,
            sell_exchange: sell.exchange,
            buy_price: buy.price,
            sell_price: sell.price,
            buy_fee_fraction: buy_fee,
            sell_fee_fraction: sell_fee,
            gross_spread_fraction: gross_spread_fraction(buy.price, sell.price)
                .unwrap_or(Decimal::ZERO),
            net_profit_fraction: net,
            net_profit_quote: self.capital_amount * net,
            capital_amount: self.capital_amount,
            quantity: sized_quantity(self.capital_amount, buy.price, self.quantity_precision),
            detected_at: now,
        }
    }
}

/// Base quantity affordable with `capital` at `price`, floored (never
/// rounded up) to `precision` decimal places
pub fn sized_quantity(capital: Decimal, price: Decimal, precision: u32) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (capital / price).trunc_with_scale(precision)
}
