//! Service facade: one object wiring configuration, adapters, market data,
//! detection, execution and history together
//!
//! Embedders and the CLI talk to [`ArbitrageService`] only. All state is
//! owned here and handed down explicitly; there are no globals, so several
//! services can coexist in one process.

use crate::config::{BotConfig, TradingMode};
use crate::exchanges::{ExchangeCapability, ExchangeId, ExchangeRegistry, Symbol};
use crate::history::{JsonlHistory, MemoryHistory, TradeHistoryStore, TradeRecord};
use crate::market::feed::{start_feeds, FeedHandle};
use crate::market::stream::spawn_binance_stream;
use crate::market::{PriceBook, PriceQuote, VenuePrice};
use crate::strategy::{FeeSchedule, Opportunity, OpportunityDetector};
use crate::trading::{ExecutionOptions, TradeExecutor, TradeResult, TradeStats};
use crate::{log_trade, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Aggregate statistics exposed by the service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    /// Execution attempts, completed or failed
    pub total_trades: u64,
    /// Attempts where both legs filled
    pub successful_trades: u64,
    /// Successful fraction of all attempts
    pub success_rate: Decimal,
    /// Realized profit across successful trades
    pub total_profit: Decimal,
    /// Current trading mode
    pub mode: TradingMode,
}

/// The arbitrage engine behind one configuration
pub struct ArbitrageService {
    config: BotConfig,
    registry: Arc<RwLock<ExchangeRegistry>>,
    book: Arc<PriceBook>,
    history: Arc<dyn TradeHistoryStore>,
    stats: Arc<TradeStats>,
    executor: TradeExecutor,
    detector: OpportunityDetector,
    symbols: Vec<Symbol>,
    feeds: Mutex<Option<FeedHandle>>,
}

impl ArbitrageService {
    /// Build the service: validate the configuration, initialize adapters
    /// for the configured mode and open the history store.
    pub async fn new(config: BotConfig) -> Result<Self> {
        config.validate()?;

        let symbols: Vec<Symbol> = config
            .detector
            .symbols
            .iter()
            .map(|s| s.parse())
            .collect::<std::result::Result<_, _>>()?;

        let registry = Arc::new(RwLock::new(ExchangeRegistry::from_config(
            &config,
            config.trading_mode,
        )?));

        let history: Arc<dyn TradeHistoryStore> = match &config.storage.history_path {
            Some(path) => {
                info!(path = %path.display(), "Opening trade history");
                Arc::new(JsonlHistory::open(path).await?)
            }
            None => Arc::new(MemoryHistory::new()),
        };

        let stats = Arc::new(TradeStats::new());
        let executor = TradeExecutor::new(&config, registry.clone(), history.clone(), stats.clone());
        let detector = OpportunityDetector::new(&config.detector);

        Ok(Self {
            config,
            registry,
            book: Arc::new(PriceBook::new()),
            history,
            stats,
            executor,
            detector,
            symbols,
            feeds: Mutex::new(None),
        })
    }

    /// Current trading mode
    pub async fn trading_mode(&self) -> TradingMode {
        self.registry.read().await.mode()
    }

    /// Capability summary of every registered exchange
    pub async fn capabilities(&self) -> Vec<ExchangeCapability> {
        self.registry.read().await.capabilities()
    }

    /// Symbols the service watches
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Trade history store backing this service
    pub fn history(&self) -> Arc<dyn TradeHistoryStore> {
        self.history.clone()
    }

    /// Start continuous price ingestion: one REST poller per exchange and,
    /// when Binance is registered, its websocket stream. Replaces any
    /// feeds already running.
    pub async fn start_feeds(&self) {
        let mut slot = self.feeds.lock().await;
        *slot = Some(self.spawn_feeds().await);
    }

    /// Stop price ingestion
    pub async fn stop_feeds(&self) {
        *self.feeds.lock().await = None;
    }

    async fn spawn_feeds(&self) -> FeedHandle {
        let (mut handle, tx) = start_feeds(
            self.registry.clone(),
            self.book.clone(),
            self.symbols.clone(),
            self.config.detector.poll_interval_ms,
        )
        .await;

        // Binance also streams; the other venues stay on REST polling
        let has_binance = self
            .registry
            .read()
            .await
            .get(ExchangeId::Binance)
            .is_some();
        if has_binance {
            if let Some(exchange) = self.config.exchanges.get("binance") {
                if let Some(url) = exchange.connection.websocket_url(handle.mode()) {
                    let mut natives: HashMap<String, Symbol> = HashMap::new();
                    for (canonical, native) in &exchange.symbols {
                        match canonical.parse::<Symbol>() {
                            Ok(symbol) if self.symbols.contains(&symbol) => {
                                natives.insert(native.clone(), symbol);
                            }
                            _ => {}
                        }
                    }
                    if !natives.is_empty() {
                        handle.push(spawn_binance_stream(url.to_string(), natives, tx.clone()));
                    }
                }
            }
        }

        info!(mode = %handle.mode(), symbols = self.symbols.len(), "Price feeds started");
        handle
    }

    /// Fetch every watched price once over REST and load the table.
    ///
    /// Returns the number of quotes recorded. Used by one-shot commands
    /// that cannot wait for the polling cadence.
    pub async fn refresh_prices_once(&self) -> usize {
        let adapters: Vec<_> = {
            let registry = self.registry.read().await;
            registry.adapters().cloned().collect()
        };

        let mut recorded = 0;
        for adapter in adapters {
            for symbol in &self.symbols {
                if !adapter.supports_pair(symbol) {
                    continue;
                }
                match adapter.ticker_price(symbol).await {
                    Ok(price) => {
                        self.book
                            .insert(PriceQuote::new(adapter.id(), symbol.clone(), price));
                        recorded += 1;
                    }
                    Err(e) => {
                        warn!(exchange = %adapter.id(), symbol = %symbol, error = %e, "Price fetch failed")
                    }
                }
            }
        }
        recorded
    }

    /// Latest table contents for status output
    pub async fn venue_prices(&self) -> Vec<VenuePrice> {
        let mode = self.trading_mode().await;
        let now = Utc::now();
        let mut prices: Vec<VenuePrice> = self
            .book
            .snapshot()
            .into_values()
            .map(|quote| VenuePrice {
                exchange: quote.exchange,
                symbol: quote.symbol.clone(),
                price: quote.price,
                age_ms: quote.age_ms(now),
                mode,
            })
            .collect();
        prices.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.exchange.cmp(&b.exchange)));
        prices
    }

    /// Detect opportunities over the current price table.
    ///
    /// Works on a snapshot; never fails. An empty or stale table yields an
    /// empty list.
    pub async fn detect_opportunities(&self) -> Vec<Opportunity> {
        let fees = FeeSchedule::from_registry(&*self.registry.read().await);
        let snapshot = self.book.snapshot();
        self.detector
            .detect(&snapshot, &self.symbols, &fees, Utc::now())
    }

    /// Execute one opportunity
    pub async fn execute_trade(
        &self,
        opportunity: &Opportunity,
        options: &ExecutionOptions,
    ) -> TradeResult {
        let result = self.executor.execute(opportunity, options).await;
        if self.config.monitoring.enable_trade_logging {
            match &result {
                TradeResult::Completed {
                    trade_id,
                    actual_profit,
                    actual_profit_percent,
                    ..
                } => {
                    log_trade!(
                        info,
                        trade_id,
                        opportunity.symbol,
                        "completed",
                        profit = %actual_profit,
                        profit_percent = %actual_profit_percent,
                    );
                }
                TradeResult::Failed {
                    trade_id,
                    kind,
                    message,
                    ..
                } => {
                    log_trade!(
                        warn,
                        trade_id,
                        opportunity.symbol,
                        "failed",
                        kind = %kind,
                        message = %message,
                    );
                }
            }
        }
        result
    }

    /// Detect and execute the best current opportunity, optionally
    /// restricted to one symbol. `Ok(None)` when nothing qualifies.
    pub async fn execute_best(
        &self,
        symbol: Option<&Symbol>,
        options: &ExecutionOptions,
    ) -> Result<Option<TradeResult>> {
        let opportunities = self.detect_opportunities().await;
        let best = opportunities
            .into_iter()
            .find(|o| symbol.map_or(true, |s| &o.symbol == s));
        match best {
            Some(opportunity) => {
                let result = self.execute_trade(&opportunity, options).await;
                Ok(Some(result))
            }
            None => Ok(None),
        }
    }

    /// Aggregate statistics plus the current mode
    pub async fn stats(&self) -> ServiceStats {
        let snapshot = self.stats.snapshot();
        ServiceStats {
            total_trades: snapshot.total_trades,
            successful_trades: snapshot.successful_trades,
            success_rate: snapshot.success_rate,
            total_profit: snapshot.total_profit,
            mode: self.trading_mode().await,
        }
    }

    /// All persisted trade records
    pub async fn trade_history(&self) -> Result<Vec<TradeRecord>> {
        self.history.list().await
    }

    /// Switch trading mode.
    ///
    /// Rebuilds the whole registry so every adapter re-initializes against
    /// the new endpoints, clears the price table so quotes from the old
    /// environment cannot feed the next detection cycle, and restarts the
    /// feeds if they were running.
    pub async fn set_trading_mode(&self, mode: TradingMode) -> Result<()> {
        let rebuilt = ExchangeRegistry::from_config(&self.config, mode)?;
        {
            let mut registry = self.registry.write().await;
            *registry = rebuilt;
        }
        self.book.clear();

        let mut feeds = self.feeds.lock().await;
        if feeds.is_some() {
            *feeds = None;
            *feeds = Some(self.spawn_feeds().await);
        }
        info!(mode = %mode, "Trading mode switched, all adapters reinitialized");
        Ok(())
    }
}
