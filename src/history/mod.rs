//! Trade history persistence
//!
//! Every execution attempt produces exactly one [`TradeRecord`]. Records
//! are written in a pending state before any order is placed and updated to
//! a terminal state afterwards, so a crash between the two legs still
//! leaves an audit trail. Persistence failures never abort a trade; the
//! executor logs them and carries on.

use crate::config::TradingMode;
use crate::exchanges::{ExchangeId, Symbol};
use crate::strategy::Opportunity;
use crate::trading::TradeErrorKind;
use crate::{ArbError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle state of a trade record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    /// Recorded, orders not yet (fully) placed
    Pending,
    /// Both legs filled
    Completed,
    /// Terminally failed; `error_kind` says where
    Failed,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeStatus::Pending => write!(f, "pending"),
            TradeStatus::Completed => write!(f, "completed"),
            TradeStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Full audit record of one execution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Unique id, generated when execution starts
    pub trade_id: Uuid,
    /// Initiating user, when the trigger carries one
    pub user_id: Option<String>,
    /// Symbol traded
    pub symbol: Symbol,
    /// Exchange of the buy leg
    pub buy_exchange: ExchangeId,
    /// Exchange of the sell leg
    pub sell_exchange: ExchangeId,
    /// Buy price the trade was sized with
    pub buy_price: Decimal,
    /// Sell price the trade was sized with
    pub sell_price: Decimal,
    /// Base quantity
    pub quantity: Decimal,
    /// Capital committed, in quote currency
    pub capital_amount: Decimal,
    /// Profit expected at detection time, in quote currency
    pub expected_profit: Decimal,
    /// Expected profit percent of committed capital
    pub expected_profit_percent: Decimal,
    /// Realized profit, set on completion
    pub actual_profit: Option<Decimal>,
    /// Realized profit percent, set on completion
    pub actual_profit_percent: Option<Decimal>,
    /// Lifecycle state
    pub status: TradeStatus,
    /// Failure classification, set when `status` is failed
    pub error_kind: Option<TradeErrorKind>,
    /// Human-readable failure description
    pub error_message: Option<String>,
    /// Mode the trade ran under
    pub trading_mode: TradingMode,
    /// Fills synthesized without placing orders
    pub dry_run: bool,
    /// Record creation time
    pub created_at: DateTime<Utc>,
    /// Wall-clock duration of the attempt
    pub execution_time_ms: Option<u64>,
    /// Raw buy order response for audit
    pub buy_order_response: Option<serde_json::Value>,
    /// Raw sell order response for audit
    pub sell_order_response: Option<serde_json::Value>,
}

impl TradeRecord {
    /// Pending record for an opportunity about to be executed
    pub fn pending(
        trade_id: Uuid,
        opportunity: &Opportunity,
        capital_amount: Decimal,
        user_id: Option<String>,
        trading_mode: TradingMode,
        dry_run: bool,
    ) -> Self {
        Self {
            trade_id,
            user_id,
            symbol: opportunity.symbol.clone(),
            buy_exchange: opportunity.buy_exchange,
            sell_exchange: opportunity.sell_exchange,
            buy_price: opportunity.buy_price,
            sell_price: opportunity.sell_price,
            quantity: opportunity.quantity,
            capital_amount,
            expected_profit: capital_amount * opportunity.net_profit_fraction,
            expected_profit_percent: opportunity.net_profit_fraction * Decimal::ONE_HUNDRED,
            actual_profit: None,
            actual_profit_percent: None,
            status: TradeStatus::Pending,
            error_kind: None,
            error_message: None,
            trading_mode,
            dry_run,
            created_at: Utc::now(),
            execution_time_ms: None,
            buy_order_response: None,
            sell_order_response: None,
        }
    }

    /// Apply a partial update in place
    pub fn apply(&mut self, update: &TradeUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(buy_price) = update.buy_price {
            self.buy_price = buy_price;
        }
        if let Some(sell_price) = update.sell_price {
            self.sell_price = sell_price;
        }
        if let Some(quantity) = update.quantity {
            self.quantity = quantity;
        }
        if let Some(capital_amount) = update.capital_amount {
            self.capital_amount = capital_amount;
        }
        if let Some(actual_profit) = update.actual_profit {
            self.actual_profit = Some(actual_profit);
        }
        if let Some(actual_profit_percent) = update.actual_profit_percent {
            self.actual_profit_percent = Some(actual_profit_percent);
        }
        if let Some(error_kind) = update.error_kind {
            self.error_kind = Some(error_kind);
        }
        if let Some(ref error_message) = update.error_message {
            self.error_message = Some(error_message.clone());
        }
        if let Some(execution_time_ms) = update.execution_time_ms {
            self.execution_time_ms = Some(execution_time_ms);
        }
        if let Some(ref response) = update.buy_order_response {
            self.buy_order_response = Some(response.clone());
        }
        if let Some(ref response) = update.sell_order_response {
            self.sell_order_response = Some(response.clone());
        }
    }
}

/// Partial update applied to an existing record. `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeUpdate {
    /// New lifecycle state
    pub status: Option<TradeStatus>,
    /// Refreshed buy price
    pub buy_price: Option<Decimal>,
    /// Refreshed sell price
    pub sell_price: Option<Decimal>,
    /// Re-sized quantity
    pub quantity: Option<Decimal>,
    /// Adjusted capital
    pub capital_amount: Option<Decimal>,
    /// Realized profit
    pub actual_profit: Option<Decimal>,
    /// Realized profit percent
    pub actual_profit_percent: Option<Decimal>,
    /// Failure classification
    pub error_kind: Option<TradeErrorKind>,
    /// Failure description
    pub error_message: Option<String>,
    /// Attempt duration
    pub execution_time_ms: Option<u64>,
    /// Raw buy order response
    pub buy_order_response: Option<serde_json::Value>,
    /// Raw sell order response
    pub sell_order_response: Option<serde_json::Value>,
}

impl TradeUpdate {
    /// Update marking a trade failed
    pub fn failed(kind: TradeErrorKind, message: String, execution_time_ms: u64) -> Self {
        Self {
            status: Some(TradeStatus::Failed),
            error_kind: Some(kind),
            error_message: Some(message),
            execution_time_ms: Some(execution_time_ms),
            ..Self::default()
        }
    }
}

/// Persistence surface for trade records
#[async_trait]
pub trait TradeHistoryStore: Send + Sync {
    /// Persist a new record
    async fn save(&self, record: &TradeRecord) -> Result<()>;

    /// Apply a partial update to an existing record
    async fn update(&self, trade_id: Uuid, update: &TradeUpdate) -> Result<()>;

    /// Fetch one record
    async fn get(&self, trade_id: Uuid) -> Result<Option<TradeRecord>>;

    /// All records in insertion order
    async fn list(&self) -> Result<Vec<TradeRecord>>;
}

/// In-memory store, the default when no history path is configured
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: RwLock<IndexMap<Uuid, TradeRecord>>,
}

impl MemoryHistory {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeHistoryStore for MemoryHistory {
    async fn save(&self, record: &TradeRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.trade_id, record.clone());
        Ok(())
    }

    async fn update(&self, trade_id: Uuid, update: &TradeUpdate) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get_mut(&trade_id) {
            Some(record) => {
                record.apply(update);
                Ok(())
            }
            None => Err(ArbError::Storage(format!("Unknown trade {}", trade_id)).into()),
        }
    }

    async fn get(&self, trade_id: Uuid) -> Result<Option<TradeRecord>> {
        Ok(self.records.read().await.get(&trade_id).cloned())
    }

    async fn list(&self) -> Result<Vec<TradeRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

/// Append-only JSON Lines store.
///
/// Every save and update appends the full record as one line; on open the
/// last line per trade id wins. The file is therefore crash-tolerant at
/// the cost of growing until compacted externally.
#[derive(Debug)]
pub struct JsonlHistory {
    path: PathBuf,
    cache: RwLock<IndexMap<Uuid, TradeRecord>>,
}

impl JsonlHistory {
    /// Open a store, loading any existing records from `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ArbError::Storage(format!("Cannot create history directory: {}", e))
                })?;
            }
        }

        let mut cache = IndexMap::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                for (number, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<TradeRecord>(line) {
                        Ok(record) => {
                            cache.insert(record.trade_id, record);
                        }
                        Err(e) => {
                            warn!(line = number + 1, error = %e, "Skipping corrupt history line");
                        }
                    }
                }
                debug!(path = %path.display(), records = cache.len(), "Loaded trade history");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(
                    ArbError::Storage(format!("Cannot read history file: {}", e)).into(),
                );
            }
        }

        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    async fn append(&self, record: &TradeRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| ArbError::Storage(format!("Cannot serialize trade record: {}", e)))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| ArbError::Storage(format!("Cannot open history file: {}", e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| ArbError::Storage(format!("Cannot append trade record: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| ArbError::Storage(format!("Cannot flush history file: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl TradeHistoryStore for JsonlHistory {
    async fn save(&self, record: &TradeRecord) -> Result<()> {
        // Cache first so a failed append still leaves the trade visible
        self.cache
            .write()
            .await
            .insert(record.trade_id, record.clone());
        self.append(record).await
    }

    async fn update(&self, trade_id: Uuid, update: &TradeUpdate) -> Result<()> {
        let updated = {
            let mut cache = self.cache.write().await;
            match cache.get_mut(&trade_id) {
                Some(record) => {
                    record.apply(update);
                    record.clone()
                }
                None => {
                    return Err(ArbError::Storage(format!("Unknown trade {}", trade_id)).into())
                }
            }
        };
        self.append(&updated).await
    }

    async fn get(&self, trade_id: Uuid) -> Result<Option<TradeRecord>> {
        Ok(self.cache.read().await.get(&trade_id).cloned())
    }

    async fn list(&self) -> Result<Vec<TradeRecord>> {
        Ok(self.cache.read().await.values().cloned().collect())
    }
}
