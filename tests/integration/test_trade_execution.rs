//! Executor scenarios over scripted venues: both legs, partial failures,
//! precision flooring, the transfer bridge and dry runs

use crate::{executor_fixture, opportunity, stub_config, transfer_config, StubExchange};
use rust_decimal_macros::dec;
use spot_arbitrage::exchanges::{DepositStatus, ExchangeAdapter, OrderSide};
use spot_arbitrage::history::TradeStatus;
use spot_arbitrage::trading::ExecutionOptions;
use spot_arbitrage::{ExchangeId, TradeErrorKind, TradeHistoryStore, TradingMode};
use std::sync::Arc;

fn funded_buy_venue() -> StubExchange {
    StubExchange::new(ExchangeId::Binance)
        .with_price("BTC/USDT", dec!(50000))
        .with_balance("USDT", dec!(1000))
}

fn sell_venue() -> StubExchange {
    StubExchange::new(ExchangeId::Bybit).with_price("BTC/USDT", dec!(50200))
}

#[tokio::test]
async fn test_detected_opportunity_executes_both_legs() {
    let buy = Arc::new(funded_buy_venue());
    let sell = Arc::new(sell_venue());
    let adapters: Vec<Arc<dyn ExchangeAdapter>> = vec![buy.clone(), sell.clone()];
    let fixture = executor_fixture(&stub_config(), TradingMode::Testnet, adapters);

    let opp = opportunity(
        "BTC/USDT",
        ExchangeId::Binance,
        dec!(50000),
        ExchangeId::Bybit,
        dec!(50200),
        dec!(100),
    );
    let result = fixture
        .executor
        .execute(&opp, &ExecutionOptions::default())
        .await;

    assert!(result.is_completed());
    assert_eq!(result.profit(), Some(dec!(0.1996)));
    assert_eq!(buy.orders_for(OrderSide::Buy), vec![dec!(0.002)]);
    assert_eq!(sell.orders_for(OrderSide::Sell), vec![dec!(0.002)]);

    let records = fixture.history.list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TradeStatus::Completed);
    assert_eq!(records[0].actual_profit, Some(dec!(0.1996)));

    let stats = fixture.stats.snapshot();
    assert_eq!(stats.total_trades, 1);
    assert_eq!(stats.successful_trades, 1);
}

#[tokio::test]
async fn test_two_executions_issue_distinct_trade_ids() {
    let buy = Arc::new(funded_buy_venue());
    let sell = Arc::new(sell_venue());
    let adapters: Vec<Arc<dyn ExchangeAdapter>> = vec![buy.clone(), sell.clone()];
    let fixture = executor_fixture(&stub_config(), TradingMode::Testnet, adapters);

    let opp = opportunity(
        "BTC/USDT",
        ExchangeId::Binance,
        dec!(50000),
        ExchangeId::Bybit,
        dec!(50200),
        dec!(100),
    );
    let first = fixture
        .executor
        .execute(&opp, &ExecutionOptions::default())
        .await;
    let second = fixture
        .executor
        .execute(&opp, &ExecutionOptions::default())
        .await;

    assert!(first.is_completed());
    assert!(second.is_completed());
    assert_ne!(first.trade_id(), second.trade_id());

    let records = fixture.history.list().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_ne!(records[0].trade_id, records[1].trade_id);
}

#[tokio::test]
async fn test_sell_rejection_records_partial_failure() {
    let buy = Arc::new(funded_buy_venue());
    let sell = Arc::new(sell_venue().rejecting(OrderSide::Sell, "balance insufficient"));
    let adapters: Vec<Arc<dyn ExchangeAdapter>> = vec![buy.clone(), sell.clone()];
    let fixture = executor_fixture(&stub_config(), TradingMode::Testnet, adapters);

    let opp = opportunity(
        "BTC/USDT",
        ExchangeId::Binance,
        dec!(50000),
        ExchangeId::Bybit,
        dec!(50200),
        dec!(100),
    );
    let result = fixture
        .executor
        .execute(&opp, &ExecutionOptions::default())
        .await;

    match result {
        spot_arbitrage::TradeResult::Failed { kind, message, .. } => {
            assert_eq!(kind, TradeErrorKind::SellOrderFailed);
            assert!(message.contains("Buy leg filled"));
            assert!(message.contains("balance insufficient"));
        }
        other => panic!("expected a failed trade, got {:?}", other),
    }

    // The buy leg went through before the sell was rejected
    assert_eq!(buy.order_count(), 1);
    assert_eq!(sell.order_count(), 0);

    let records = fixture.history.list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TradeStatus::Failed);
    assert_eq!(records[0].error_kind, Some(TradeErrorKind::SellOrderFailed));
    assert!(records[0].buy_order_response.is_some());
    assert!(records[0].sell_order_response.is_none());
}

#[tokio::test]
async fn test_disabled_trading_blocks_live_orders() {
    let buy = Arc::new(funded_buy_venue().without_trading());
    let sell = Arc::new(sell_venue());
    let adapters: Vec<Arc<dyn ExchangeAdapter>> = vec![buy.clone(), sell.clone()];
    let fixture = executor_fixture(&stub_config(), TradingMode::Live, adapters);

    let opp = opportunity(
        "BTC/USDT",
        ExchangeId::Binance,
        dec!(50000),
        ExchangeId::Bybit,
        dec!(50200),
        dec!(100),
    );
    let result = fixture
        .executor
        .execute(&opp, &ExecutionOptions::default())
        .await;

    match result {
        spot_arbitrage::TradeResult::Failed { kind, message, .. } => {
            assert_eq!(kind, TradeErrorKind::Validation);
            assert!(message.contains("Trading is disabled"));
        }
        other => panic!("expected a failed trade, got {:?}", other),
    }
    assert_eq!(buy.order_count(), 0);
    assert_eq!(sell.order_count(), 0);

    let records = fixture.history.list().await.unwrap();
    assert_eq!(records[0].error_kind, Some(TradeErrorKind::Validation));
}

#[tokio::test]
async fn test_sell_quantity_floors_to_venue_precision() {
    let buy = Arc::new(
        StubExchange::new(ExchangeId::Binance)
            .with_price("BTC/USDT", dec!(30000))
            .with_balance("USDT", dec!(1000)),
    );
    let sell = Arc::new(
        StubExchange::new(ExchangeId::Bybit)
            .with_price("BTC/USDT", dec!(30200))
            .with_precision(4),
    );
    let adapters: Vec<Arc<dyn ExchangeAdapter>> = vec![buy.clone(), sell.clone()];
    let fixture = executor_fixture(&stub_config(), TradingMode::Testnet, adapters);

    let opp = opportunity(
        "BTC/USDT",
        ExchangeId::Binance,
        dec!(30000),
        ExchangeId::Bybit,
        dec!(30200),
        dec!(100),
    );
    let result = fixture
        .executor
        .execute(&opp, &ExecutionOptions::default())
        .await;

    assert!(result.is_completed());
    assert_eq!(buy.orders_for(OrderSide::Buy), vec![dec!(0.00333333)]);
    assert_eq!(sell.orders_for(OrderSide::Sell), vec![dec!(0.0033)]);
}

#[tokio::test]
async fn test_transfer_bridge_credits_then_sells() {
    let buy = Arc::new(funded_buy_venue());
    let sell = Arc::new(
        sell_venue()
            .with_balance("BTC", dec!(1))
            .with_deposit(
                Some(&StubExchange::withdrawal_tx_id(ExchangeId::Binance)),
                dec!(0.002),
                DepositStatus::Completed,
            ),
    );
    let adapters: Vec<Arc<dyn ExchangeAdapter>> = vec![buy.clone(), sell.clone()];
    let fixture = executor_fixture(&transfer_config(), TradingMode::Testnet, adapters);

    let opp = opportunity(
        "BTC/USDT",
        ExchangeId::Binance,
        dec!(50000),
        ExchangeId::Bybit,
        dec!(50200),
        dec!(100),
    );
    let result = fixture
        .executor
        .execute(&opp, &ExecutionOptions::default())
        .await;

    assert!(result.is_completed());
    let withdrawals = buy.withdrawal_requests();
    assert_eq!(withdrawals.len(), 1);
    assert_eq!(withdrawals[0].amount, dec!(0.002));
    assert_eq!(withdrawals[0].address, "bybit-addr");
    assert_eq!(sell.orders_for(OrderSide::Sell), vec![dec!(0.002)]);
}

#[tokio::test]
async fn test_transfer_timeout_in_sandbox_proceeds_with_sell() {
    let buy = Arc::new(funded_buy_venue());
    // No deposit ever shows up on the sell venue
    let sell = Arc::new(sell_venue().with_balance("BTC", dec!(1)));
    let adapters: Vec<Arc<dyn ExchangeAdapter>> = vec![buy.clone(), sell.clone()];
    let fixture = executor_fixture(&transfer_config(), TradingMode::Testnet, adapters);

    let opp = opportunity(
        "BTC/USDT",
        ExchangeId::Binance,
        dec!(50000),
        ExchangeId::Bybit,
        dec!(50200),
        dec!(100),
    );
    let result = fixture
        .executor
        .execute(&opp, &ExecutionOptions::default())
        .await;

    assert!(result.is_completed());
    assert_eq!(sell.order_count(), 1);
}

#[tokio::test]
async fn test_dry_run_places_no_orders() {
    let buy = Arc::new(StubExchange::new(ExchangeId::Binance).with_price("BTC/USDT", dec!(50000)));
    let sell = Arc::new(sell_venue());
    let adapters: Vec<Arc<dyn ExchangeAdapter>> = vec![buy.clone(), sell.clone()];
    let fixture = executor_fixture(&stub_config(), TradingMode::Testnet, adapters);

    let opp = opportunity(
        "BTC/USDT",
        ExchangeId::Binance,
        dec!(50000),
        ExchangeId::Bybit,
        dec!(50200),
        dec!(100),
    );
    let options = ExecutionOptions {
        dry_run: true,
        ..Default::default()
    };
    let result = fixture.executor.execute(&opp, &options).await;

    assert!(result.is_completed());
    assert_eq!(result.profit(), Some(dec!(0.1996)));
    assert_eq!(buy.order_count(), 0);
    assert_eq!(sell.order_count(), 0);

    let records = fixture.history.list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].dry_run);
    assert_eq!(records[0].status, TradeStatus::Completed);
}
