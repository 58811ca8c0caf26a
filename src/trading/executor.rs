//! Two-leg trade execution
//!
//! Runs one detected opportunity through a fixed sequence: validate,
//! refresh prices, persist a pending record, check balances, buy, bridge
//! the asset to the sell venue, sell, settle. Every exit path folds into a
//! [`TradeResult`] value and leaves exactly one persisted record behind;
//! nothing here panics or returns `Err` to the caller.

use crate::config::{BotConfig, BridgeMode, TradingMode, TransferConfig};
use crate::exchanges::{ExchangeAdapter, ExchangeId, ExchangeRegistry, OrderFill, OrderSide, Symbol};
use crate::history::{TradeHistoryStore, TradeRecord, TradeStatus, TradeUpdate};
use crate::strategy::detector::sized_quantity;
use crate::strategy::{net_profit_fraction, Opportunity};
use crate::trading::{transfer_asset, TradeErrorKind, TradeResult, TradeStats, TransferStatus};
use crate::utils::metric_names;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Per-call knobs for one execution attempt
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Initiating user, recorded for audit
    pub user_id: Option<String>,
    /// Capital override; the opportunity's sizing capital when `None`
    pub capital_amount: Option<Decimal>,
    /// Synthesize fills at refreshed prices instead of placing orders
    pub dry_run: bool,
}

/// Executes opportunities against the current exchange registry
pub struct TradeExecutor {
    registry: Arc<RwLock<ExchangeRegistry>>,
    history: Arc<dyn TradeHistoryStore>,
    stats: Arc<TradeStats>,
    min_profit_threshold: Decimal,
    min_trade_quote: Decimal,
    balance_fraction: Decimal,
    bridge_mode: BridgeMode,
    transfer: TransferConfig,
}

impl TradeExecutor {
    /// Executor wired to a registry, history store and stats sink
    pub fn new(
        config: &BotConfig,
        registry: Arc<RwLock<ExchangeRegistry>>,
        history: Arc<dyn TradeHistoryStore>,
        stats: Arc<TradeStats>,
    ) -> Self {
        Self {
            registry,
            history,
            stats,
            min_profit_threshold: config.detector.min_profit_threshold,
            min_trade_quote: config.execution.min_trade_usdt,
            balance_fraction: config.execution.balance_fraction,
            bridge_mode: config.execution.bridge_mode,
            transfer: config.transfer.clone(),
        }
    }

    /// Execute one opportunity end to end.
    ///
    /// Always returns a [`TradeResult`]; failures are classified by
    /// [`TradeErrorKind`] and the partial-failure kinds mean the buy leg
    /// already filled.
    pub async fn execute(
        &self,
        opportunity: &Opportunity,
        options: &ExecutionOptions,
    ) -> TradeResult {
        let trade_id = Uuid::new_v4();
        let started = Instant::now();
        let symbol = opportunity.symbol.clone();

        let (mode, buy_adapter, sell_adapter) = {
            let registry = self.registry.read().await;
            (
                registry.mode(),
                registry.get(opportunity.buy_exchange),
                registry.get(opportunity.sell_exchange),
            )
        };

        let mut capital = options.capital_amount.unwrap_or(opportunity.capital_amount);
        let mut record = TradeRecord::pending(
            trade_id,
            opportunity,
            capital,
            options.user_id.clone(),
            mode,
            options.dry_run,
        );
        let mut persisted = false;

        info!(
            trade_id = %trade_id,
            symbol = %symbol,
            buy = %opportunity.buy_exchange,
            sell = %opportunity.sell_exchange,
            mode = %mode,
            dry_run = options.dry_run,
            "Executing trade"
        );

        // Validate
        let buy_adapter = match buy_adapter {
            Some(adapter) => adapter,
            None => {
                return self
                    .fail(
                        record,
                        persisted,
                        TradeErrorKind::Validation,
                        format!("Buy exchange {} is not registered", opportunity.buy_exchange),
                        started,
                    )
                    .await
            }
        };
        let sell_adapter = match sell_adapter {
            Some(adapter) => adapter,
            None => {
                return self
                    .fail(
                        record,
                        persisted,
                        TradeErrorKind::Validation,
                        format!("Sell exchange {} is not registered", opportunity.sell_exchange),
                        started,
                    )
                    .await
            }
        };
        if opportunity.net_profit_fraction < self.min_profit_threshold {
            return self
                .fail(
                    record,
                    persisted,
                    TradeErrorKind::Validation,
                    format!(
                        "Net profit {} below the minimum threshold {}",
                        opportunity.net_profit_fraction, self.min_profit_threshold
                    ),
                    started,
                )
                .await;
        }
        if capital < self.min_trade_quote {
            return self
                .fail(
                    record,
                    persisted,
                    TradeErrorKind::Validation,
                    format!(
                        "Capital {} {} below the minimum trade size {}",
                        capital,
                        symbol.quote(),
                        self.min_trade_quote
                    ),
                    started,
                )
                .await;
        }
        if !buy_adapter.supports_pair(&symbol) || !sell_adapter.supports_pair(&symbol) {
            return self
                .fail(
                    record,
                    persisted,
                    TradeErrorKind::Validation,
                    format!("{} is not tradable on both exchanges", symbol),
                    started,
                )
                .await;
        }
        if !options.dry_run {
            for adapter in [&buy_adapter, &sell_adapter] {
                if !adapter.is_trading_enabled() {
                    return self
                        .fail(
                            record,
                            persisted,
                            TradeErrorKind::Validation,
                            format!(
                                "Trading is disabled on {} (missing credentials)",
                                adapter.id()
                            ),
                            started,
                        )
                        .await;
                }
            }
        }

        // Refresh prices and re-size
        let buy_price = match buy_adapter.ticker_price(&symbol).await {
            Ok(price) if price > Decimal::ZERO => price,
            Ok(price) => {
                return self
                    .fail(
                        record,
                        persisted,
                        TradeErrorKind::PriceFetch,
                        format!("Non-positive buy price {} on {}", price, buy_adapter.id()),
                        started,
                    )
                    .await
            }
            Err(e) => {
                return self
                    .fail(
                        record,
                        persisted,
                        TradeErrorKind::PriceFetch,
                        format!("Buy-side price refresh on {} failed: {}", buy_adapter.id(), e),
                        started,
                    )
                    .await
            }
        };
        let sell_price = match sell_adapter.ticker_price(&symbol).await {
            Ok(price) if price > Decimal::ZERO => price,
            Ok(price) => {
                return self
                    .fail(
                        record,
                        persisted,
                        TradeErrorKind::PriceFetch,
                        format!("Non-positive sell price {} on {}", price, sell_adapter.id()),
                        started,
                    )
                    .await
            }
            Err(e) => {
                return self
                    .fail(
                        record,
                        persisted,
                        TradeErrorKind::PriceFetch,
                        format!(
                            "Sell-side price refresh on {} failed: {}",
                            sell_adapter.id(),
                            e
                        ),
                        started,
                    )
                    .await
            }
        };

        let buy_fee = buy_adapter.taker_fee();
        let sell_fee = sell_adapter.taker_fee();
        let precision = buy_adapter.quantity_precision(&symbol);
        let mut quantity = sized_quantity(capital, buy_price, precision);
        if quantity <= Decimal::ZERO {
            return self
                .fail(
                    record,
                    persisted,
                    TradeErrorKind::Validation,
                    format!(
                        "Capital {} buys no tradable quantity of {} at {}",
                        capital, symbol, buy_price
                    ),
                    started,
                )
                .await;
        }

        record.buy_price = buy_price;
        record.sell_price = sell_price;
        record.quantity = quantity;
        if let Some(net) = net_profit_fraction(buy_price, sell_price, buy_fee, sell_fee) {
            record.expected_profit = capital * net;
            record.expected_profit_percent = net * Decimal::ONE_HUNDRED;
        }

        // Persist the pending record before any order leaves the process.
        // Persistence failure is logged, not fatal.
        match self.history.save(&record).await {
            Ok(()) => persisted = true,
            Err(e) => {
                warn!(trade_id = %trade_id, error = %e, "Failed to persist pending trade record")
            }
        }

        if options.dry_run {
            let buy_fill = synthetic_fill(
                opportunity.buy_exchange,
                &symbol,
                OrderSide::Buy,
                quantity,
                buy_price,
            );
            let sell_fill = synthetic_fill(
                opportunity.sell_exchange,
                &symbol,
                OrderSide::Sell,
                quantity,
                sell_price,
            );
            return self
                .settle(
                    record, persisted, buy_fill, sell_fill, buy_price, sell_price, buy_fee,
                    sell_fee, started,
                )
                .await;
        }

        // Balance check
        let quote_balance = match buy_adapter.balance(symbol.quote()).await {
            Ok(balance) => balance,
            Err(e) => {
                return self
                    .fail(
                        record,
                        persisted,
                        TradeErrorKind::BalanceFetch,
                        format!("Balance lookup on {} failed: {}", buy_adapter.id(), e),
                        started,
                    )
                    .await
            }
        };
        if quote_balance.free < capital {
            if mode.is_live() {
                return self
                    .fail(
                        record,
                        persisted,
                        TradeErrorKind::InsufficientBalance,
                        format!(
                            "{} free {} {} is less than the required {}",
                            buy_adapter.id(),
                            quote_balance.free,
                            symbol.quote(),
                            capital
                        ),
                        started,
                    )
                    .await;
            }
            // Sandbox balances are small; shrink the trade instead of
            // failing, down to the configured floor.
            let adjusted = quote_balance.free * self.balance_fraction;
            if adjusted < self.min_trade_quote {
                return self
                    .fail(
                        record,
                        persisted,
                        TradeErrorKind::InsufficientBalance,
                        format!(
                            "{} free {} {} cannot fund even the minimum trade size {}",
                            buy_adapter.id(),
                            quote_balance.free,
                            symbol.quote(),
                            self.min_trade_quote
                        ),
                        started,
                    )
                    .await;
            }
            info!(
                trade_id = %trade_id,
                requested = %capital,
                adjusted = %adjusted,
                "Shrinking capital to fit available sandbox balance"
            );
            capital = adjusted;
            quantity = sized_quantity(capital, buy_price, precision);
            if quantity <= Decimal::ZERO {
                return self
                    .fail(
                        record,
                        persisted,
                        TradeErrorKind::InsufficientBalance,
                        format!("Adjusted capital {} buys no tradable quantity", capital),
                        started,
                    )
                    .await;
            }
            record.capital_amount = capital;
            record.quantity = quantity;
        }
        if self.bridge_mode == BridgeMode::Transfer && !mode.is_live() {
            // A sandbox transfer that times out still runs the sell leg, so
            // the sell venue must already hold base inventory. Live trades
            // receive the base asset through the bridge itself, so no
            // inventory is required up front.
            let base_balance = match sell_adapter.balance(symbol.base()).await {
                Ok(balance) => balance,
                Err(e) => {
                    return self
                        .fail(
                            record,
                            persisted,
                            TradeErrorKind::BalanceFetch,
                            format!("Balance lookup on {} failed: {}", sell_adapter.id(), e),
                            started,
                        )
                        .await
                }
            };
            if base_balance.free < quantity {
                return self
                    .fail(
                        record,
                        persisted,
                        TradeErrorKind::InsufficientBalance,
                        format!(
                            "{} free {} {} is less than the sell quantity {}",
                            sell_adapter.id(),
                            base_balance.free,
                            symbol.base(),
                            quantity
                        ),
                        started,
                    )
                    .await;
            }
        }

        // Buy leg
        let buy_fill = match buy_adapter
            .place_market_order(&symbol, OrderSide::Buy, quantity)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                return self
                    .fail(
                        record,
                        persisted,
                        TradeErrorKind::BuyOrderFailed,
                        format!("Buy order on {} failed: {}", buy_adapter.id(), e),
                        started,
                    )
                    .await
            }
        };
        record.buy_order_response = Some(buy_fill.raw.clone());
        let acquired = buy_fill.filled_quantity.unwrap_or(quantity);
        info!(
            trade_id = %trade_id,
            order_id = %buy_fill.order_id,
            quantity = %acquired,
            "Buy leg filled"
        );

        // Bridge
        if self.bridge_mode == BridgeMode::Transfer {
            let timeout_ms = self.transfer.timeout_ms(mode);
            let poll_ms = self.transfer.poll_interval_ms(mode);
            match transfer_asset(
                buy_adapter.as_ref(),
                sell_adapter.as_ref(),
                symbol.base(),
                acquired,
                timeout_ms,
                poll_ms,
            )
            .await
            {
                Ok(TransferStatus::Completed) => {}
                Ok(TransferStatus::TimedOut) => {
                    if mode.is_live() {
                        return self
                            .fail(
                                record,
                                persisted,
                                TradeErrorKind::TransferTimeout,
                                format!(
                                    "Buy leg filled {} {} on {}, but the transfer to {} did not credit within {}ms",
                                    acquired,
                                    symbol.base(),
                                    buy_adapter.id(),
                                    sell_adapter.id(),
                                    timeout_ms
                                ),
                                started,
                            )
                            .await;
                    }
                    warn!(
                        trade_id = %trade_id,
                        "Transfer wait timed out in sandbox mode, proceeding with the sell leg"
                    );
                }
                Err(e) => {
                    return self
                        .fail(
                            record,
                            persisted,
                            TradeErrorKind::TransferTimeout,
                            format!(
                                "Buy leg filled {} {} on {}, but the transfer bridge failed: {}",
                                acquired,
                                symbol.base(),
                                buy_adapter.id(),
                                e
                            ),
                            started,
                        )
                        .await
                }
            }
        }

        // Sell leg, floored to the sell venue's own precision
        let sell_quantity = acquired.trunc_with_scale(sell_adapter.quantity_precision(&symbol));
        let sell_fill = match sell_adapter
            .place_market_order(&symbol, OrderSide::Sell, sell_quantity)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                return self
                    .fail(
                        record,
                        persisted,
                        TradeErrorKind::SellOrderFailed,
                        format!(
                            "Buy leg filled {} {} on {}, but the sell order on {} failed: {}",
                            acquired,
                            symbol.base(),
                            buy_adapter.id(),
                            sell_adapter.id(),
                            e
                        ),
                        started,
                    )
                    .await
            }
        };
        info!(
            trade_id = %trade_id,
            order_id = %sell_fill.order_id,
            quantity = %sell_fill.filled_quantity.unwrap_or(sell_quantity),
            "Sell leg filled"
        );

        self.settle(
            record, persisted, buy_fill, sell_fill, buy_price, sell_price, buy_fee, sell_fee,
            started,
        )
        .await
    }

    /// Finalize a completed trade: settlement math, record update, stats
    #[allow(clippy::too_many_arguments)]
    async fn settle(
        &self,
        mut record: TradeRecord,
        persisted: bool,
        buy_fill: OrderFill,
        sell_fill: OrderFill,
        estimated_buy_price: Decimal,
        estimated_sell_price: Decimal,
        buy_fee: Decimal,
        sell_fee: Decimal,
        started: Instant,
    ) -> TradeResult {
        // Prefer actual fill figures, fall back to the pre-trade estimate
        // when the venue has not reported them yet
        let bought = buy_fill
            .filled_quantity
            .unwrap_or(buy_fill.requested_quantity);
        let buy_price = buy_fill.average_price.unwrap_or(estimated_buy_price);
        let sold = sell_fill
            .filled_quantity
            .unwrap_or(sell_fill.requested_quantity);
        let sell_price = sell_fill.average_price.unwrap_or(estimated_sell_price);

        let buy_total = leg_total(buy_price, bought, buy_fee, buy_fill.fee, OrderSide::Buy);
        let sell_total = leg_total(sell_price, sold, sell_fee, sell_fill.fee, OrderSide::Sell);
        let actual_profit = sell_total - buy_total;
        let actual_profit_percent = if buy_total > Decimal::ZERO {
            actual_profit / buy_total * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        let execution_time_ms = started.elapsed().as_millis() as u64;

        record.status = TradeStatus::Completed;
        record.buy_price = buy_price;
        record.sell_price = sell_price;
        record.quantity = bought;
        record.actual_profit = Some(actual_profit);
        record.actual_profit_percent = Some(actual_profit_percent);
        record.execution_time_ms = Some(execution_time_ms);
        record.buy_order_response = Some(buy_fill.raw.clone());
        record.sell_order_response = Some(sell_fill.raw.clone());
        self.persist_terminal(&record, persisted).await;

        self.stats.record_success(actual_profit);
        metrics::increment_counter!(metric_names::TRADES_TOTAL, "result" => "completed");
        metrics::histogram!(
            metric_names::TRADE_PROFIT,
            actual_profit.to_f64().unwrap_or(0.0)
        );
        info!(
            trade_id = %record.trade_id,
            profit = %actual_profit,
            profit_percent = %actual_profit_percent,
            execution_time_ms,
            "Trade completed"
        );

        TradeResult::Completed {
            trade_id: record.trade_id,
            actual_profit,
            actual_profit_percent,
            buy_fill,
            sell_fill,
            execution_time_ms,
        }
    }

    /// Finalize a failed trade: record update, stats, classified logging
    async fn fail(
        &self,
        mut record: TradeRecord,
        persisted: bool,
        kind: TradeErrorKind,
        message: String,
        started: Instant,
    ) -> TradeResult {
        let execution_time_ms = started.elapsed().as_millis() as u64;
        if kind.is_partial_failure() {
            error!(
                trade_id = %record.trade_id,
                kind = %kind,
                message = %message,
                "Trade failed after the buy leg; funds are split across exchanges and need manual reconciliation"
            );
        } else {
            warn!(trade_id = %record.trade_id, kind = %kind, message = %message, "Trade failed");
        }

        record.apply(&TradeUpdate::failed(kind, message.clone(), execution_time_ms));
        self.persist_terminal(&record, persisted).await;

        self.stats.record_failure();
        metrics::increment_counter!(
            metric_names::TRADES_TOTAL,
            "result" => "failed",
            "kind" => kind.to_string()
        );

        TradeResult::Failed {
            trade_id: record.trade_id,
            kind,
            message,
            execution_time_ms,
        }
    }

    /// Write the terminal state, via update when the pending record made it
    /// to the store and via save when it did not
    async fn persist_terminal(&self, record: &TradeRecord, persisted: bool) {
        let result = if persisted {
            self.history
                .update(record.trade_id, &terminal_update(record))
                .await
        } else {
            self.history.save(record).await
        };
        if let Err(e) = result {
            warn!(
                trade_id = %record.trade_id,
                error = %e,
                "Failed to persist terminal trade record"
            );
        }
    }
}

/// Quote-currency total of one leg: notional plus fee for buys, minus fee
/// for sells. The venue-reported fee wins over the taker-fraction estimate.
fn leg_total(
    price: Decimal,
    quantity: Decimal,
    fee_fraction: Decimal,
    reported_fee: Option<Decimal>,
    side: OrderSide,
) -> Decimal {
    let notional = price * quantity;
    let fee = reported_fee.unwrap_or(notional * fee_fraction);
    match side {
        OrderSide::Buy => notional + fee,
        OrderSide::Sell => notional - fee,
    }
}

fn terminal_update(record: &TradeRecord) -> TradeUpdate {
    TradeUpdate {
        status: Some(record.status),
        buy_price: Some(record.buy_price),
        sell_price: Some(record.sell_price),
        quantity: Some(record.quantity),
        capital_amount: Some(record.capital_amount),
        actual_profit: record.actual_profit,
        actual_profit_percent: record.actual_profit_percent,
        error_kind: record.error_kind,
        error_message: record.error_message.clone(),
        execution_time_ms: record.execution_time_ms,
        buy_order_response: record.buy_order_response.clone(),
        sell_order_response: record.sell_order_response.clone(),
    }
}

fn synthetic_fill(
    exchange: ExchangeId,
    symbol: &Symbol,
    side: OrderSide,
    quantity: Decimal,
    price: Decimal,
) -> OrderFill {
    OrderFill {
        order_id: format!("dry-{}", Uuid::new_v4()),
        exchange,
        symbol: symbol.clone(),
        side,
        requested_quantity: quantity,
        filled_quantity: Some(quantity),
        average_price: Some(price),
        fee: None,
        raw: serde_json::json!({ "dryRun": true }),
        timestamp: Utc::now(),
    }
}
