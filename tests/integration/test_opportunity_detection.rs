//! Detection driven by a registry of scripted venues: adapter fees and
//! polled prices flow into the detector exactly as they do in the service

use crate::StubExchange;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use spot_arbitrage::exchanges::ExchangeAdapter;
use spot_arbitrage::strategy::{net_profit_fraction, FeeSchedule, OpportunityDetector};
use spot_arbitrage::{ExchangeId, ExchangeRegistry, PriceBook, PriceQuote, Symbol, TradingMode};
use std::sync::Arc;

fn registry_of(adapters: Vec<Arc<dyn ExchangeAdapter>>) -> ExchangeRegistry {
    ExchangeRegistry::from_adapters(TradingMode::Testnet, adapters)
}

async fn poll_into(registry: &ExchangeRegistry, book: &PriceBook, symbols: &[Symbol]) {
    for adapter in registry.adapters() {
        for symbol in symbols {
            if !adapter.supports_pair(symbol) {
                continue;
            }
            let price = adapter.ticker_price(symbol).await.unwrap();
            book.insert(PriceQuote::new(adapter.id(), symbol.clone(), price));
        }
    }
}

fn detector() -> OpportunityDetector {
    OpportunityDetector::with_params(dec!(0.001), dec!(100), 30_000)
}

#[tokio::test]
async fn test_detects_route_across_polled_registry() {
    let registry = registry_of(vec![
        Arc::new(StubExchange::new(ExchangeId::Binance).with_price("BTC/USDT", dec!(50000))),
        Arc::new(StubExchange::new(ExchangeId::Kucoin).with_price("BTC/USDT", dec!(50050))),
        Arc::new(StubExchange::new(ExchangeId::Bybit).with_price("BTC/USDT", dec!(50200))),
    ]);
    let book = PriceBook::new();
    let symbols: Vec<Symbol> = vec!["BTC/USDT".parse().unwrap()];
    poll_into(&registry, &book, &symbols).await;

    let fees = FeeSchedule::from_registry(&registry);
    let opportunities = detector().detect(&book.snapshot(), &symbols, &fees, Utc::now());

    assert_eq!(opportunities.len(), 1);
    let best = &opportunities[0];
    assert_eq!(best.buy_exchange, ExchangeId::Binance);
    assert_eq!(best.sell_exchange, ExchangeId::Bybit);
    assert_eq!(best.quantity, dec!(0.002));
    assert_eq!(best.buy_fee_fraction, dec!(0.001));
}

#[tokio::test]
async fn test_single_venue_cannot_arbitrage() {
    let registry = registry_of(vec![Arc::new(
        StubExchange::new(ExchangeId::Binance).with_price("BTC/USDT", dec!(50000)),
    )]);
    let book = PriceBook::new();
    let symbols: Vec<Symbol> = vec!["BTC/USDT".parse().unwrap()];
    poll_into(&registry, &book, &symbols).await;

    let fees = FeeSchedule::from_registry(&registry);
    let opportunities = detector().detect(&book.snapshot(), &symbols, &fees, Utc::now());

    assert!(opportunities.is_empty());
}

#[tokio::test]
async fn test_stale_quote_drops_its_venue() {
    let registry = registry_of(vec![
        Arc::new(StubExchange::new(ExchangeId::Binance).with_price("BTC/USDT", dec!(50000))),
        Arc::new(StubExchange::new(ExchangeId::Bybit).with_price("BTC/USDT", dec!(50200))),
    ]);
    let book = PriceBook::new();
    let symbols: Vec<Symbol> = vec!["BTC/USDT".parse().unwrap()];
    poll_into(&registry, &book, &symbols).await;

    // Overwrite the sell side with a quote observed beyond the age limit
    let now = Utc::now();
    book.insert(PriceQuote::observed(
        ExchangeId::Bybit,
        symbols[0].clone(),
        dec!(50200),
        now - Duration::milliseconds(30_001),
    ));

    let fees = FeeSchedule::from_registry(&registry);
    let opportunities = detector().detect(&book.snapshot(), &symbols, &fees, now);

    assert!(opportunities.is_empty());
}

#[tokio::test]
async fn test_adapter_fee_feeds_detection() {
    let registry = registry_of(vec![
        Arc::new(StubExchange::new(ExchangeId::Binance).with_price("BTC/USDT", dec!(50000))),
        Arc::new(
            StubExchange::new(ExchangeId::Bybit)
                .with_price("BTC/USDT", dec!(50200))
                .with_fee(dec!(0.002)),
        ),
    ]);
    let book = PriceBook::new();
    let symbols: Vec<Symbol> = vec!["BTC/USDT".parse().unwrap()];
    poll_into(&registry, &book, &symbols).await;

    let fees = FeeSchedule::from_registry(&registry);
    let opportunities = detector().detect(&book.snapshot(), &symbols, &fees, Utc::now());

    assert_eq!(opportunities.len(), 1);
    let best = &opportunities[0];
    assert_eq!(best.sell_fee_fraction, dec!(0.002));
    assert_eq!(
        best.net_profit_fraction,
        net_profit_fraction(dec!(50000), dec!(50200), dec!(0.001), dec!(0.002)).unwrap()
    );
}

#[tokio::test]
async fn test_spread_inside_fees_is_ignored() {
    let registry = registry_of(vec![
        Arc::new(StubExchange::new(ExchangeId::Binance).with_price("BTC/USDT", dec!(50000))),
        Arc::new(StubExchange::new(ExchangeId::Bybit).with_price("BTC/USDT", dec!(50050))),
    ]);
    let book = PriceBook::new();
    let symbols: Vec<Symbol> = vec!["BTC/USDT".parse().unwrap()];
    poll_into(&registry, &book, &symbols).await;

    let fees = FeeSchedule::from_registry(&registry);
    let opportunities = detector().detect(&book.snapshot(), &symbols, &fees, Utc::now());

    assert!(opportunities.is_empty());
}
