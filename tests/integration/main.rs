//! Integration tests exercising detection, execution and the service facade
//! against scriptable in-process exchanges

mod test_opportunity_detection;
mod test_service_lifecycle;
mod test_trade_execution;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spot_arbitrage::config::BridgeMode;
use spot_arbitrage::exchanges::{
    AssetBalance, DepositAddress, DepositRecord, DepositStatus, ExchangeAdapter, ExchangeId,
    OrderFill, OrderSide, Symbol, WithdrawReceipt, WithdrawRequest,
};
use spot_arbitrage::history::MemoryHistory;
use spot_arbitrage::strategy::net_profit_fraction;
use spot_arbitrage::trading::TradeStats;
use spot_arbitrage::{
    ArbError, BotConfig, ExchangeRegistry, Opportunity, Result, TradeExecutor, TradingMode,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// Scriptable exchange used in place of the real adapters.
///
/// Prices, balances and deposit history are fixed up front; every order and
/// withdrawal is recorded for later assertions.
pub struct StubExchange {
    id: ExchangeId,
    fee: Decimal,
    trading_enabled: bool,
    precision: u32,
    prices: Mutex<HashMap<Symbol, Decimal>>,
    balances: Mutex<HashMap<String, Decimal>>,
    reject: Mutex<Option<(OrderSide, String)>>,
    orders: Mutex<Vec<(OrderSide, Decimal)>>,
    withdrawals: Mutex<Vec<WithdrawRequest>>,
    deposit_log: Mutex<Vec<DepositRecord>>,
}

impl StubExchange {
    pub fn new(id: ExchangeId) -> Self {
        Self {
            id,
            fee: dec!(0.001),
            trading_enabled: true,
            precision: 8,
            prices: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            reject: Mutex::new(None),
            orders: Mutex::new(Vec::new()),
            withdrawals: Mutex::new(Vec::new()),
            deposit_log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_price(self, symbol: &str, price: Decimal) -> Self {
        let symbol: Symbol = symbol.parse().unwrap();
        self.prices.lock().unwrap().insert(symbol, price);
        self
    }

    pub fn with_balance(self, asset: &str, free: Decimal) -> Self {
        self.balances.lock().unwrap().insert(asset.to_string(), free);
        self
    }

    pub fn with_fee(mut self, fee: Decimal) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    pub fn without_trading(mut self) -> Self {
        self.trading_enabled = false;
        self
    }

    /// Reject every order on one side with the given exchange message
    pub fn rejecting(self, side: OrderSide, message: &str) -> Self {
        *self.reject.lock().unwrap() = Some((side, message.to_string()));
        self
    }

    /// Script a deposit the exchange will report from `deposits()`
    pub fn with_deposit(self, tx_id: Option<&str>, amount: Decimal, status: DepositStatus) -> Self {
        self.deposit_log.lock().unwrap().push(DepositRecord {
            tx_id: tx_id.map(str::to_string),
            asset: "BTC".to_string(),
            amount,
            status,
            timestamp: Utc::now(),
        });
        self
    }

    /// Transaction ID this stub stamps on withdrawals
    pub fn withdrawal_tx_id(id: ExchangeId) -> String {
        format!("tx-{}", id.as_str())
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub fn orders_for(&self, side: OrderSide) -> Vec<Decimal> {
        self.orders
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == side)
            .map(|(_, q)| *q)
            .collect()
    }

    pub fn withdrawal_requests(&self) -> Vec<WithdrawRequest> {
        self.withdrawals.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeAdapter for StubExchange {
    fn id(&self) -> ExchangeId {
        self.id
    }

    fn taker_fee(&self) -> Decimal {
        self.fee
    }

    fn is_trading_enabled(&self) -> bool {
        self.trading_enabled
    }

    fn supports_pair(&self, symbol: &Symbol) -> bool {
        self.prices.lock().unwrap().contains_key(symbol)
    }

    fn quantity_precision(&self, _symbol: &Symbol) -> u32 {
        self.precision
    }

    async fn ticker_price(&self, symbol: &Symbol) -> Result<Decimal> {
        self.prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| ArbError::DataParsing(format!("No price for {}", symbol)).into())
    }

    async fn balance(&self, asset: &str) -> Result<AssetBalance> {
        let free = self
            .balances
            .lock()
            .unwrap()
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO);
        Ok(AssetBalance {
            asset: asset.to_string(),
            free,
            locked: Decimal::ZERO,
        })
    }

    async fn place_market_order(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderFill> {
        if let Some((rejected_side, message)) = self.reject.lock().unwrap().clone() {
            if rejected_side == side {
                return Err(ArbError::Trading(message).into());
            }
        }

        let price = self.ticker_price(symbol).await?;
        let mut orders = self.orders.lock().unwrap();
        orders.push((side, quantity));

        Ok(OrderFill {
            order_id: format!("{}-{}", self.id.as_str(), orders.len()),
            exchange: self.id,
            symbol: symbol.clone(),
            side,
            requested_quantity: quantity,
            filled_quantity: Some(quantity),
            average_price: Some(price),
            fee: None,
            raw: serde_json::json!({ "stub": self.id.as_str() }),
            timestamp: Utc::now(),
        })
    }

    async fn deposit_address(&self, asset: &str) -> Result<DepositAddress> {
        Ok(DepositAddress {
            asset: asset.to_string(),
            address: format!("{}-addr", self.id.as_str()),
            tag: None,
        })
    }

    async fn withdraw(&self, request: &WithdrawRequest) -> Result<WithdrawReceipt> {
        let mut withdrawals = self.withdrawals.lock().unwrap();
        withdrawals.push(request.clone());
        Ok(WithdrawReceipt {
            withdrawal_id: format!("w-{}", withdrawals.len()),
            tx_id: Some(Self::withdrawal_tx_id(self.id)),
        })
    }

    async fn deposits(&self, _asset: &str) -> Result<Vec<DepositRecord>> {
        Ok(self.deposit_log.lock().unwrap().clone())
    }
}

/// Configuration tuned so stub scenarios clear every validation gate
pub fn stub_config() -> BotConfig {
    let mut config = BotConfig::default();
    config.detector.min_profit_threshold = dec!(0.001);
    config.detector.capital_amount = dec!(100);
    config.execution.min_trade_usdt = dec!(10);
    config.transfer.testnet_timeout_ms = 50;
    config.transfer.testnet_poll_interval_ms = 10;
    config
}

/// Executor over stub adapters with an in-memory history store
pub struct ExecutorFixture {
    pub executor: TradeExecutor,
    pub history: Arc<MemoryHistory>,
    pub stats: Arc<TradeStats>,
}

pub fn executor_fixture(
    config: &BotConfig,
    mode: TradingMode,
    adapters: Vec<Arc<dyn ExchangeAdapter>>,
) -> ExecutorFixture {
    let registry = Arc::new(RwLock::new(ExchangeRegistry::from_adapters(mode, adapters)));
    let history = Arc::new(MemoryHistory::new());
    let stats = Arc::new(TradeStats::new());
    let executor = TradeExecutor::new(config, registry, history.clone(), stats.clone());
    ExecutorFixture {
        executor,
        history,
        stats,
    }
}

/// Hand-built opportunity with internally consistent profit figures
pub fn opportunity(
    symbol: &str,
    buy: ExchangeId,
    buy_price: Decimal,
    sell: ExchangeId,
    sell_price: Decimal,
    capital: Decimal,
) -> Opportunity {
    let fee = dec!(0.001);
    let net = net_profit_fraction(buy_price, sell_price, fee, fee).unwrap();
    let quantity = (capital / buy_price).trunc_with_scale(8);
    Opportunity {
        symbol: symbol.parse().unwrap(),
        buy_exchange: buy,
        sell_exchange: sell,
        buy_price,
        sell_price,
        buy_fee_fraction: fee,
        sell_fee_fraction: fee,
        gross_spread_fraction: (sell_price - buy_price) / buy_price,
        net_profit_fraction: net,
        net_profit_quote: net * capital,
        capital_amount: capital,
        quantity,
        detected_at: Utc::now(),
    }
}

/// Transfer-bridge variant of the stub configuration
pub fn transfer_config() -> BotConfig {
    let mut config = stub_config();
    config.execution.bridge_mode = BridgeMode::Transfer;
    config
}

#[cfg(test)]
mod harness_tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_exchange_fills_at_scripted_price() {
        let stub = StubExchange::new(ExchangeId::Binance).with_price("BTC/USDT", dec!(50000));
        let symbol: Symbol = "BTC/USDT".parse().unwrap();

        let fill = stub
            .place_market_order(&symbol, OrderSide::Buy, dec!(0.002))
            .await
            .unwrap();

        assert_eq!(fill.average_price, Some(dec!(50000)));
        assert_eq!(fill.filled_quantity, Some(dec!(0.002)));
        assert_eq!(stub.order_count(), 1);
        assert_eq!(stub.orders_for(OrderSide::Buy), vec![dec!(0.002)]);
    }

    #[tokio::test]
    async fn test_stub_exchange_rejects_scripted_side_only() {
        let stub = StubExchange::new(ExchangeId::Bybit)
            .with_price("BTC/USDT", dec!(50200))
            .rejecting(OrderSide::Sell, "insufficient liquidity");
        let symbol: Symbol = "BTC/USDT".parse().unwrap();

        let err = stub
            .place_market_order(&symbol, OrderSide::Sell, dec!(0.002))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("insufficient liquidity"));

        stub.place_market_order(&symbol, OrderSide::Buy, dec!(0.002))
            .await
            .unwrap();
        assert_eq!(stub.order_count(), 1);
    }
}
