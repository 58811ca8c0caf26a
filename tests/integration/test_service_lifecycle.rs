//! Service facade lifecycle: history persistence across restarts, mode
//! switching and the stats surface.
//!
//! These tests run against the real adapters built from the default
//! configuration. Without credentials every validation gate fails before
//! any request leaves the process, so no network access is needed.

use crate::{opportunity, stub_config};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spot_arbitrage::trading::ExecutionOptions;
use spot_arbitrage::{
    ArbitrageService, ExchangeId, TradeErrorKind, TradeResult, TradeStatus, TradingMode,
};
use tempfile::tempdir;

fn narrow_spread_opportunity() -> spot_arbitrage::Opportunity {
    let mut opp = opportunity(
        "BTC/USDT",
        ExchangeId::Binance,
        dec!(50000),
        ExchangeId::Bybit,
        dec!(50060),
        dec!(100),
    );
    // Spread inside fees: force the figure the detector would never emit
    opp.net_profit_fraction = dec!(0.0001);
    opp
}

#[tokio::test]
async fn test_validation_failure_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let mut config = stub_config();
    config.storage.history_path = Some(dir.path().join("history.jsonl"));

    let opp = opportunity(
        "BTC/USDT",
        ExchangeId::Binance,
        dec!(50000),
        ExchangeId::Bybit,
        dec!(50200),
        dec!(100),
    );

    {
        let service = ArbitrageService::new(config.clone()).await.unwrap();
        let result = service
            .execute_trade(&opp, &ExecutionOptions::default())
            .await;

        match result {
            TradeResult::Failed { kind, message, .. } => {
                assert_eq!(kind, TradeErrorKind::Validation);
                assert!(message.contains("Trading is disabled"));
            }
            other => panic!("expected a failed trade, got {:?}", other),
        }
        assert_eq!(service.trade_history().await.unwrap().len(), 1);
    }

    // A fresh service on the same file sees the persisted record
    let reopened = ArbitrageService::new(config).await.unwrap();
    let records = reopened.trade_history().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TradeStatus::Failed);
    assert_eq!(records[0].error_kind, Some(TradeErrorKind::Validation));
}

#[tokio::test]
async fn test_below_threshold_rejected_with_distinct_reason() {
    let service = ArbitrageService::new(stub_config()).await.unwrap();

    let result = service
        .execute_trade(&narrow_spread_opportunity(), &ExecutionOptions::default())
        .await;

    match result {
        TradeResult::Failed { kind, message, .. } => {
            assert_eq!(kind, TradeErrorKind::Validation);
            assert!(message.contains("below the minimum threshold"));
        }
        other => panic!("expected a failed trade, got {:?}", other),
    }
}

#[tokio::test]
async fn test_mode_switch_reinitializes_every_adapter() {
    let service = ArbitrageService::new(stub_config()).await.unwrap();
    assert_eq!(service.trading_mode().await, TradingMode::Testnet);
    for capability in service.capabilities().await {
        assert!(capability.testnet);
    }

    service.set_trading_mode(TradingMode::Live).await.unwrap();

    assert_eq!(service.trading_mode().await, TradingMode::Live);
    let capabilities = service.capabilities().await;
    assert_eq!(capabilities.len(), 2);
    for capability in capabilities {
        assert!(!capability.testnet);
    }
    assert_eq!(service.symbols().len(), 2);
}

#[tokio::test]
async fn test_stats_count_failed_attempts() {
    let service = ArbitrageService::new(stub_config()).await.unwrap();

    let result = service
        .execute_trade(&narrow_spread_opportunity(), &ExecutionOptions::default())
        .await;
    assert!(!result.is_completed());

    let stats = service.stats().await;
    assert_eq!(stats.total_trades, 1);
    assert_eq!(stats.successful_trades, 0);
    assert_eq!(stats.success_rate, Decimal::ZERO);
    assert_eq!(stats.total_profit, Decimal::ZERO);
    assert_eq!(stats.mode, TradingMode::Testnet);
}
