//! Exchange adapter trait and common order/balance/transfer types

use crate::exchanges::{ExchangeId, Symbol};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Normalized capability surface of one spot exchange.
///
/// One implementation per exchange; the detector and executor depend only on
/// this trait, never on a concrete exchange type. Implementations retry
/// transient REST failures internally with bounded backoff; an `Err` from
/// any method means the retry budget is already spent.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Exchange identity
    fn id(&self) -> ExchangeId;

    /// Taker fee fraction charged on market orders
    fn taker_fee(&self) -> Decimal;

    /// Whether API credentials are configured, i.e. orders can be placed
    fn is_trading_enabled(&self) -> bool;

    /// Whether the exchange lists this canonical pair
    fn supports_pair(&self, symbol: &Symbol) -> bool;

    /// Quantity precision in decimal places for a pair
    fn quantity_precision(&self, symbol: &Symbol) -> u32;

    /// Current ticker price for a pair
    async fn ticker_price(&self, symbol: &Symbol) -> Result<Decimal>;

    /// Balance for a single asset
    async fn balance(&self, asset: &str) -> Result<AssetBalance>;

    /// Place a market order and return the (possibly still settling) fill
    async fn place_market_order(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderFill>;

    /// Deposit address for an asset on this exchange
    async fn deposit_address(&self, asset: &str) -> Result<DepositAddress>;

    /// Initiate a withdrawal to an external address
    async fn withdraw(&self, request: &WithdrawRequest) -> Result<WithdrawReceipt>;

    /// Recent deposit records for an asset, newest first
    async fn deposits(&self, asset: &str) -> Result<Vec<DepositRecord>>;
}

/// Account balance for a single asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetBalance {
    /// Asset symbol
    pub asset: String,
    /// Available balance
    pub free: Decimal,
    /// Balance locked in open orders
    pub locked: Decimal,
}

impl AssetBalance {
    /// Zero balance for an asset, used when the exchange omits the row
    pub fn zero(asset: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            free: Decimal::ZERO,
            locked: Decimal::ZERO,
        }
    }

    /// Total balance (free + locked)
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    /// Buy order
    Buy,
    /// Sell order
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Result of a market order.
///
/// Spot exchanges settle market fills asynchronously; `filled_quantity` and
/// `average_price` are `None` when the fill details were not yet available,
/// and callers fall back to their pre-trade estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFill {
    /// Exchange order ID
    pub order_id: String,
    /// Exchange the order was placed on
    pub exchange: ExchangeId,
    /// Canonical pair
    pub symbol: Symbol,
    /// Order side
    pub side: OrderSide,
    /// Quantity requested
    pub requested_quantity: Decimal,
    /// Quantity actually filled, if reported
    pub filled_quantity: Option<Decimal>,
    /// Average fill price, if reported
    pub average_price: Option<Decimal>,
    /// Fee charged, in quote currency, if reported
    pub fee: Option<Decimal>,
    /// Raw exchange response, kept for audit
    pub raw: serde_json::Value,
    /// Placement timestamp
    pub timestamp: DateTime<Utc>,
}

/// Deposit address on an exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositAddress {
    /// Asset the address accepts
    pub asset: String,
    /// On-chain address
    pub address: String,
    /// Memo/tag for chains that require one
    pub tag: Option<String>,
}

/// Withdrawal request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    /// Asset to withdraw
    pub asset: String,
    /// Amount in asset units
    pub amount: Decimal,
    /// Destination address
    pub address: String,
    /// Destination memo/tag, if the chain requires one
    pub tag: Option<String>,
    /// Network/chain selector, where the exchange needs one
    pub network: Option<String>,
}

/// Acknowledgment of an initiated withdrawal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawReceipt {
    /// Exchange-side withdrawal ID
    pub withdrawal_id: String,
    /// On-chain transaction ID, once the exchange knows it
    pub tx_id: Option<String>,
}

/// One entry from an exchange's deposit history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRecord {
    /// On-chain transaction ID
    pub tx_id: Option<String>,
    /// Deposited asset
    pub asset: String,
    /// Deposited amount
    pub amount: Decimal,
    /// Deposit status
    pub status: DepositStatus,
    /// Credit timestamp
    pub timestamp: DateTime<Utc>,
}

/// Deposit status, normalized across exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositStatus {
    /// Seen but not yet credited
    Pending,
    /// Credited and spendable
    Completed,
    /// Rejected or reversed
    Failed,
}

impl std::fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepositStatus::Pending => write!(f, "PENDING"),
            DepositStatus::Completed => write!(f, "COMPLETED"),
            DepositStatus::Failed => write!(f, "FAILED"),
        }
    }
}
