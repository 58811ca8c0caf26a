//! Price ingestion tasks: REST pollers and the single table writer
//!
//! Pollers resolve their adapter from the registry on every cycle, so a
//! trading-mode switch redirects them to the new endpoints without a
//! restart. The ingest task is the only writer of the [`PriceBook`].

use crate::config::TradingMode;
use crate::exchanges::{ExchangeId, ExchangeRegistry, Symbol};
use crate::market::{PriceBook, PriceQuote};
use crate::utils::metric_names;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Channel capacity between transports and the ingest task
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// Running ingestion tasks for one trading mode
pub struct FeedHandle {
    mode: TradingMode,
    tasks: Vec<JoinHandle<()>>,
}

impl FeedHandle {
    /// Trading mode the feeds were started under
    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    /// Attach another transport task to this handle's lifetime
    pub fn push(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Abort every ingestion task
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start pollers for every registered exchange plus the table writer.
///
/// Returns the handle owning the spawned tasks plus a sender for extra
/// transports (e.g. a websocket stream) feeding the same table. Dropping
/// the handle stops ingestion.
pub async fn start_feeds(
    registry: Arc<RwLock<ExchangeRegistry>>,
    book: Arc<PriceBook>,
    symbols: Vec<Symbol>,
    poll_interval_ms: u64,
) -> (FeedHandle, mpsc::Sender<PriceQuote>) {
    let (tx, rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
    let mut tasks = vec![spawn_ingest(book, rx)];

    let guard = registry.read().await;
    let mode = guard.mode();
    let ids = guard.ids();
    drop(guard);

    for id in ids {
        tasks.push(spawn_poller(
            registry.clone(),
            id,
            symbols.clone(),
            poll_interval_ms,
            tx.clone(),
        ));
    }

    (FeedHandle { mode, tasks }, tx)
}

/// Spawn the task draining the update channel into the price table
pub fn spawn_ingest(book: Arc<PriceBook>, mut updates: mpsc::Receiver<PriceQuote>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(quote) = updates.recv().await {
            metrics::increment_counter!(
                metric_names::PRICE_UPDATES_TOTAL,
                "exchange" => quote.exchange.as_str()
            );
            book.insert(quote);
        }
        debug!("Price update channel closed, ingest task exiting");
    })
}

/// Spawn a REST polling task for one exchange.
///
/// Each cycle fetches every configured symbol; a failed fetch is logged and
/// skipped so one flaky venue cannot stall the rest. The task ends when the
/// ingest side hangs up or the exchange disappears from the registry.
pub fn spawn_poller(
    registry: Arc<RwLock<ExchangeRegistry>>,
    exchange: ExchangeId,
    symbols: Vec<Symbol>,
    poll_interval_ms: u64,
    tx: mpsc::Sender<PriceQuote>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(poll_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let adapter = match registry.read().await.get(exchange) {
                Some(adapter) => adapter,
                None => {
                    debug!(exchange = %exchange, "Exchange no longer registered, poller exiting");
                    return;
                }
            };

            for symbol in &symbols {
                if !adapter.supports_pair(symbol) {
                    continue;
                }
                match adapter.ticker_price(symbol).await {
                    Ok(price) => {
                        let quote = PriceQuote::new(exchange, symbol.clone(), price);
                        if tx.send(quote).await.is_err() {
                            debug!(exchange = %exchange, "Ingest channel closed, poller exiting");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(exchange = %exchange, symbol = %symbol, error = %e, "Price poll failed");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::{
        AssetBalance, DepositAddress, DepositRecord, ExchangeAdapter, OrderFill, OrderSide,
        WithdrawReceipt, WithdrawRequest,
    };
    use crate::{ArbError, Result};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct FixedPriceExchange {
        id: ExchangeId,
        price: Decimal,
    }

    #[async_trait]
    impl ExchangeAdapter for FixedPriceExchange {
        fn id(&self) -> ExchangeId {
            self.id
        }

        fn taker_fee(&self) -> Decimal {
            dec!(0.001)
        }

        fn is_trading_enabled(&self) -> bool {
            false
        }

        fn supports_pair(&self, _symbol: &Symbol) -> bool {
            true
        }

        fn quantity_precision(&self, _symbol: &Symbol) -> u32 {
            8
        }

        async fn ticker_price(&self, _symbol: &Symbol) -> Result<Decimal> {
            Ok(self.price)
        }

        async fn balance(&self, _asset: &str) -> Result<AssetBalance> {
            Err(ArbError::Trading("not supported in this test".to_string()).into())
        }

        async fn place_market_order(
            &self,
            _symbol: &Symbol,
            _side: OrderSide,
            _quantity: Decimal,
        ) -> Result<OrderFill> {
            Err(ArbError::Trading("not supported in this test".to_string()).into())
        }

        async fn deposit_address(&self, _asset: &str) -> Result<DepositAddress> {
            Err(ArbError::Trading("not supported in this test".to_string()).into())
        }

        async fn withdraw(&self, _request: &WithdrawRequest) -> Result<WithdrawReceipt> {
            Err(ArbError::Trading("not supported in this test".to_string()).into())
        }

        async fn deposits(&self, _asset: &str) -> Result<Vec<DepositRecord>> {
            Err(ArbError::Trading("not supported in this test".to_string()).into())
        }
    }

    fn test_registry(prices: Vec<(ExchangeId, Decimal)>) -> Arc<RwLock<ExchangeRegistry>> {
        let adapters = prices
            .into_iter()
            .map(|(id, price)| {
                Arc::new(FixedPriceExchange { id, price }) as Arc<dyn ExchangeAdapter>
            })
            .collect();
        Arc::new(RwLock::new(ExchangeRegistry::from_adapters(
            TradingMode::Testnet,
            adapters,
        )))
    }

    #[tokio::test]
    async fn test_ingest_applies_last_write() {
        let book = Arc::new(PriceBook::new());
        let (tx, rx) = mpsc::channel(8);
        let task = spawn_ingest(book.clone(), rx);

        let symbol: Symbol = "BTC/USDT".parse().unwrap();
        tx.send(PriceQuote::new(ExchangeId::Binance, symbol.clone(), dec!(50000)))
            .await
            .unwrap();
        tx.send(PriceQuote::new(ExchangeId::Binance, symbol.clone(), dec!(50050)))
            .await
            .unwrap();
        drop(tx);
        task.await.unwrap();

        let quote = book.get(ExchangeId::Binance, &symbol).unwrap();
        assert_eq!(quote.price, dec!(50050));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_feeds_book() {
        let registry = test_registry(vec![
            (ExchangeId::Binance, dec!(50000)),
            (ExchangeId::Bybit, dec!(50100)),
        ]);
        let book = Arc::new(PriceBook::new());
        let symbols: Vec<Symbol> = vec!["BTC/USDT".parse().unwrap()];

        let (mut handle, _tx) = start_feeds(registry, book.clone(), symbols.clone(), 100).await;
        tokio::time::sleep(Duration::from_millis(350)).await;
        handle.shutdown();

        assert_eq!(book.len(), 2);
        let binance = book.get(ExchangeId::Binance, &symbols[0]).unwrap();
        assert_eq!(binance.price, dec!(50000));
        let bybit = book.get(ExchangeId::Bybit, &symbols[0]).unwrap();
        assert_eq!(bybit.price, dec!(50100));
    }
}
