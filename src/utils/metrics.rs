//! Metrics registry and Prometheus exporter

use crate::{ArbError, Result};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Metric names emitted across the engine
pub mod metric_names {
    /// Quotes ingested into the price table, labeled by exchange
    pub const PRICE_UPDATES_TOTAL: &str = "arb_price_updates_total";
    /// Opportunities that cleared the profit threshold
    pub const OPPORTUNITIES_TOTAL: &str = "arb_opportunities_detected_total";
    /// Execution attempts, labeled by result and failure kind
    pub const TRADES_TOTAL: &str = "arb_trades_total";
    /// Realized profit per completed trade, in quote currency
    pub const TRADE_PROFIT: &str = "arb_trade_profit_quote";
    /// Transfer waits that elapsed without a credited deposit
    pub const TRANSFER_TIMEOUTS_TOTAL: &str = "arb_transfer_timeouts_total";
}

/// Install the Prometheus exporter on `listen` and describe every metric.
///
/// Must run inside a tokio runtime; the exporter serves `/metrics` on its
/// own task.
pub fn init_metrics(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen.parse().map_err(|e| {
        ArbError::Config(format!("Invalid metrics listen address '{}': {}", listen, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ArbError::Config(format!("Cannot install metrics exporter: {}", e)))?;

    describe_counter!(
        metric_names::PRICE_UPDATES_TOTAL,
        Unit::Count,
        "Price quotes ingested into the shared price table"
    );
    describe_counter!(
        metric_names::OPPORTUNITIES_TOTAL,
        Unit::Count,
        "Arbitrage opportunities at or above the profit threshold"
    );
    describe_counter!(
        metric_names::TRADES_TOTAL,
        Unit::Count,
        "Trade execution attempts by result"
    );
    describe_histogram!(
        metric_names::TRADE_PROFIT,
        "Realized profit per completed trade in quote currency"
    );
    describe_counter!(
        metric_names::TRANSFER_TIMEOUTS_TOTAL,
        Unit::Count,
        "Cross-exchange transfer waits that timed out"
    );

    Ok(())
}
