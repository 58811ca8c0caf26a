//! Exchange adapters and registry

pub mod binance;
pub mod bybit;
pub mod kucoin;
pub mod registry;
pub mod symbols;
pub mod traits;

pub use binance::BinanceAdapter;
pub use bybit::BybitAdapter;
pub use kucoin::KucoinAdapter;
pub use registry::{ExchangeCapability, ExchangeRegistry};
pub use symbols::{Symbol, SymbolMap};
pub use traits::{
    AssetBalance, DepositAddress, DepositRecord, DepositStatus, ExchangeAdapter, OrderFill,
    OrderSide, WithdrawReceipt, WithdrawRequest,
};

use crate::config::{ExchangeConfig, LimitsConfig, TradingMode};
use crate::{ArbError, Result};
use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Supported exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    /// Binance spot
    Binance,
    /// Bybit spot (v5 API)
    Bybit,
    /// KuCoin spot
    Kucoin,
}

impl ExchangeId {
    /// All known exchanges
    pub const ALL: [ExchangeId; 3] = [ExchangeId::Binance, ExchangeId::Bybit, ExchangeId::Kucoin];

    /// Lowercase name as used in configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Bybit => "bybit",
            ExchangeId::Kucoin => "kucoin",
        }
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = ArbError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binance" => Ok(ExchangeId::Binance),
            "bybit" => Ok(ExchangeId::Bybit),
            "kucoin" => Ok(ExchangeId::Kucoin),
            _ => Err(ArbError::Config(format!("Unknown exchange: {}", s))),
        }
    }
}

/// Factory for creating exchange adapters
pub struct AdapterFactory;

impl AdapterFactory {
    /// Create an adapter for the given exchange in the given trading mode
    pub fn create(
        id: ExchangeId,
        config: &ExchangeConfig,
        mode: TradingMode,
    ) -> Result<Arc<dyn ExchangeAdapter>> {
        let adapter: Arc<dyn ExchangeAdapter> = match id {
            ExchangeId::Binance => Arc::new(BinanceAdapter::new(config, mode)?),
            ExchangeId::Bybit => Arc::new(BybitAdapter::new(config, mode)?),
            ExchangeId::Kucoin => Arc::new(KucoinAdapter::new(config, mode)?),
        };
        Ok(adapter)
    }
}

/// Whether a failed call is worth retrying (network-level trouble, not a
/// rejection the exchange will repeat)
fn is_transient(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ArbError>(),
        Some(ArbError::Connection(_)) | Some(ArbError::Timeout(_))
    )
}

/// Run a REST call with the exchange's bounded retry budget.
///
/// Transient failures back off exponentially with jitter; rejections and
/// parse errors surface immediately.
pub(crate) async fn retry_request<T, F, Fut>(
    limits: &LimitsConfig,
    exchange: ExchangeId,
    operation: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < limits.max_retries && is_transient(&err) => {
                let jitter = rand::thread_rng().gen_range(0..=limits.retry_delay_ms / 2);
                let delay = limits.retry_delay_ms * 2u64.pow(attempt) + jitter;
                warn!(
                    exchange = %exchange,
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay,
                    error = %err,
                    "Transient exchange error, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Map a reqwest transport error onto the crate taxonomy
pub(crate) fn request_error(exchange: ExchangeId, context: &str, err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        ArbError::Timeout(format!("{}: {} timed out: {}", exchange, context, err)).into()
    } else {
        ArbError::Connection(format!("{}: {} failed: {}", exchange, context, err)).into()
    }
}

/// Decode a REST response body, classifying HTTP failures as transient
/// (server trouble, throttling) or terminal (request rejected)
pub(crate) async fn parse_response<T: DeserializeOwned>(
    exchange: ExchangeId,
    context: &str,
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        response.json::<T>().await.map_err(|e| {
            ArbError::DataParsing(format!(
                "{}: failed to parse {} response: {}",
                exchange, context, e
            ))
            .into()
        })
    } else if status.is_server_error() || matches!(status.as_u16(), 408 | 429) {
        Err(ArbError::Connection(format!("{}: {} returned status {}", exchange, context, status)).into())
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(ArbError::Trading(format!("{}: {} rejected ({}): {}", exchange, context, status, body)).into())
    }
}

/// Parse an exchange-reported decimal string
pub(crate) fn parse_decimal(value: &str, context: &str) -> Result<Decimal> {
    value.trim().parse::<Decimal>().map_err(|e| {
        ArbError::DataParsing(format!("Invalid decimal '{}' in {}: {}", value, context, e)).into()
    })
}

/// Parse an epoch-milliseconds timestamp
pub(crate) fn timestamp_from_millis(ms: i64, context: &str) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ArbError::DataParsing(format!("Invalid timestamp {} in {}", ms, context)).into())
}
