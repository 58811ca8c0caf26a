//! Market data: the shared last-price table and its ingestion transports
//!
//! Every transport (REST pollers, websocket streams) funnels quotes through
//! one mpsc channel into the [`PriceBook`]. The detector never touches the
//! live table directly; it works on an immutable [`PriceSnapshot`] taken at
//! the start of each cycle.

pub mod feed;
pub mod stream;

use crate::config::TradingMode;
use crate::exchanges::{ExchangeId, Symbol};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One observed last price for a symbol on an exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Exchange the price was observed on
    pub exchange: ExchangeId,
    /// Canonical symbol
    pub symbol: Symbol,
    /// Last traded price in quote currency
    pub price: Decimal,
    /// Observation timestamp
    pub observed_at: DateTime<Utc>,
}

impl PriceQuote {
    /// Quote observed now
    pub fn new(exchange: ExchangeId, symbol: Symbol, price: Decimal) -> Self {
        Self {
            exchange,
            symbol,
            price,
            observed_at: Utc::now(),
        }
    }

    /// Quote with an explicit observation time
    pub fn observed(
        exchange: ExchangeId,
        symbol: Symbol,
        price: Decimal,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            exchange,
            symbol,
            price,
            observed_at,
        }
    }

    /// Milliseconds elapsed since the observation. Quotes from a skewed
    /// clock can sit in the future; those report zero age.
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.observed_at)
            .num_milliseconds()
            .max(0)
    }

    /// A quote is stale once it is strictly older than `max_age_ms`
    pub fn is_stale(&self, now: DateTime<Utc>, max_age_ms: u64) -> bool {
        self.age_ms(now) > max_age_ms as i64
    }
}

/// Immutable copy of the price table, keyed by venue
pub type PriceSnapshot = HashMap<(ExchangeId, Symbol), PriceQuote>;

/// Concurrent last-price table, last write wins per (exchange, symbol)
#[derive(Debug, Default)]
pub struct PriceBook {
    quotes: DashMap<(ExchangeId, Symbol), PriceQuote>,
}

impl PriceBook {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a quote, replacing any previous one for the same venue
    pub fn insert(&self, quote: PriceQuote) {
        self.quotes
            .insert((quote.exchange, quote.symbol.clone()), quote);
    }

    /// Latest quote for one venue
    pub fn get(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<PriceQuote> {
        self.quotes
            .get(&(exchange, symbol.clone()))
            .map(|entry| entry.value().clone())
    }

    /// Copy the whole table. Readers work on the copy, so a slow detection
    /// cycle never blocks ingestion.
    pub fn snapshot(&self) -> PriceSnapshot {
        self.quotes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Drop every quote. Used when the trading mode changes so prices from
    /// the previous environment cannot leak into the next detection cycle.
    pub fn clear(&self) {
        self.quotes.clear();
    }

    /// Number of venues with a quote
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    /// Whether the table holds no quotes
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

/// Service-level view of one venue for status output
#[derive(Debug, Clone, Serialize)]
pub struct VenuePrice {
    /// Exchange identity
    pub exchange: ExchangeId,
    /// Canonical symbol
    pub symbol: Symbol,
    /// Last price
    pub price: Decimal,
    /// Age of the quote in milliseconds
    pub age_ms: i64,
    /// Trading mode the quote was collected under
    pub mode: TradingMode,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn symbol() -> Symbol {
        "BTC/USDT".parse().unwrap()
    }

    #[test]
    fn test_staleness_boundary() {
        let now = Utc::now();
        let quote = PriceQuote::observed(
            ExchangeId::Binance,
            symbol(),
            dec!(50000),
            now - Duration::milliseconds(30_000),
        );

        // Exactly at the limit is still fresh, one past it is not
        assert!(!quote.is_stale(now, 30_000));
        assert!(quote.is_stale(now, 29_999));
    }

    #[test]
    fn test_future_quote_is_fresh() {
        let now = Utc::now();
        let quote = PriceQuote::observed(
            ExchangeId::Binance,
            symbol(),
            dec!(50000),
            now + Duration::seconds(5),
        );

        assert_eq!(quote.age_ms(now), 0);
        assert!(!quote.is_stale(now, 1));
    }

    #[test]
    fn test_last_write_wins() {
        let book = PriceBook::new();
        book.insert(PriceQuote::new(ExchangeId::Binance, symbol(), dec!(50000)));
        book.insert(PriceQuote::new(ExchangeId::Binance, symbol(), dec!(50100)));

        assert_eq!(book.len(), 1);
        let quote = book.get(ExchangeId::Binance, &symbol()).unwrap();
        assert_eq!(quote.price, dec!(50100));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let book = PriceBook::new();
        book.insert(PriceQuote::new(ExchangeId::Binance, symbol(), dec!(50000)));

        let snapshot = book.snapshot();
        book.insert(PriceQuote::new(ExchangeId::Binance, symbol(), dec!(51000)));
        book.insert(PriceQuote::new(ExchangeId::Bybit, symbol(), dec!(50900)));

        assert_eq!(snapshot.len(), 1);
        let key = (ExchangeId::Binance, symbol());
        assert_eq!(snapshot[&key].price, dec!(50000));
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn test_clear_empties_table() {
        let book = PriceBook::new();
        book.insert(PriceQuote::new(ExchangeId::Binance, symbol(), dec!(50000)));
        book.insert(PriceQuote::new(ExchangeId::Bybit, symbol(), dec!(50100)));

        book.clear();
        assert!(book.is_empty());
        assert!(book.get(ExchangeId::Binance, &symbol()).is_none());
    }
}
