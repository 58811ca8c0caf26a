//! Configuration management module

pub mod settings;

pub use settings::*;

use crate::exchanges::ExchangeId;
use crate::{ArbError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Main configuration structure for the arbitrage system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Trading mode all adapters are initialized with
    pub trading_mode: TradingMode,
    /// Opportunity detection configuration
    pub detector: DetectorConfig,
    /// Trade execution configuration
    pub execution: ExecutionConfig,
    /// Cross-exchange transfer configuration
    pub transfer: TransferConfig,
    /// Monitoring configuration
    pub monitoring: MonitoringConfig,
    /// Trade history storage configuration
    pub storage: StorageConfig,
    /// Exchange configuration
    pub exchanges: ExchangeListConfig,
}

/// Trading mode: which set of endpoints and credentials adapters use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// Exchange sandbox endpoints
    Testnet,
    /// Production endpoints
    Live,
}

impl TradingMode {
    /// True for the production mode
    pub fn is_live(&self) -> bool {
        matches!(self, TradingMode::Live)
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Testnet => write!(f, "testnet"),
            TradingMode::Live => write!(f, "live"),
        }
    }
}

impl FromStr for TradingMode {
    type Err = ArbError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "testnet" => Ok(TradingMode::Testnet),
            "live" => Ok(TradingMode::Live),
            _ => Err(ArbError::Config(format!("Unknown trading mode: {}", s))),
        }
    }
}

/// How the two legs of a trade are bridged (spec'd as an explicit choice,
/// never inferred from the opportunity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeMode {
    /// Sell from the sell exchange's existing inventory right after the buy
    Simultaneous,
    /// Withdraw the purchased asset to the sell exchange, wait for the
    /// deposit to complete, then sell
    Transfer,
}

impl std::fmt::Display for BridgeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeMode::Simultaneous => write!(f, "simultaneous"),
            BridgeMode::Transfer => write!(f, "transfer"),
        }
    }
}

/// Opportunity detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Canonical symbols to scan (e.g. "BTC/USDT")
    pub symbols: Vec<String>,
    /// Minimum net profit fraction for an opportunity to qualify (inclusive)
    pub min_profit_threshold: Decimal,
    /// Default trade size in quote currency
    pub capital_amount: Decimal,
    /// Quotes older than this are excluded from detection
    pub max_update_age_ms: u64,
    /// REST price polling interval per exchange
    pub poll_interval_ms: u64,
}

/// Trade execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Bridge strategy between the buy and sell legs
    pub bridge_mode: BridgeMode,
    /// Dust floor: trades with an estimated value below this are rejected
    pub min_trade_usdt: Decimal,
    /// Testnet capital adjustment: fraction of the free quote balance a
    /// trade may be shrunk to instead of failing outright
    pub balance_fraction: Decimal,
}

/// Cross-exchange transfer wait configuration. Testnet and live must use
/// different horizons: seconds in test, minutes in production.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Deposit wait timeout in live mode
    pub live_timeout_ms: u64,
    /// Deposit poll interval in live mode
    pub live_poll_interval_ms: u64,
    /// Deposit wait timeout in testnet mode
    pub testnet_timeout_ms: u64,
    /// Deposit poll interval in testnet mode
    pub testnet_poll_interval_ms: u64,
}

impl TransferConfig {
    /// Deposit wait timeout for the given mode
    pub fn timeout_ms(&self, mode: TradingMode) -> u64 {
        match mode {
            TradingMode::Live => self.live_timeout_ms,
            TradingMode::Testnet => self.testnet_timeout_ms,
        }
    }

    /// Deposit poll interval for the given mode
    pub fn poll_interval_ms(&self, mode: TradingMode) -> u64 {
        match mode {
            TradingMode::Live => self.live_poll_interval_ms,
            TradingMode::Testnet => self.testnet_poll_interval_ms,
        }
    }
}

/// Monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable the Prometheus metrics exporter
    pub enable_metrics: bool,
    /// Listen address for the metrics endpoint
    pub metrics_listen: String,
    /// Log every executed trade at info level
    pub enable_trade_logging: bool,
}

/// Trade history storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Append-only JSONL history file; in-memory store when unset
    #[serde(default)]
    pub history_path: Option<std::path::PathBuf>,
}

/// Exchange list configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeListConfig {
    /// Enabled exchanges by name
    pub enabled: Vec<String>,
    /// Binance configuration
    #[serde(default)]
    pub binance: Option<ExchangeConfig>,
    /// Bybit configuration
    #[serde(default)]
    pub bybit: Option<ExchangeConfig>,
    /// KuCoin configuration
    #[serde(default)]
    pub kucoin: Option<ExchangeConfig>,
}

impl ExchangeListConfig {
    /// Configuration block for an exchange by name, if present
    pub fn get(&self, name: &str) -> Option<&ExchangeConfig> {
        match name {
            "binance" => self.binance.as_ref(),
            "bybit" => self.bybit.as_ref(),
            "kucoin" => self.kucoin.as_ref(),
            _ => None,
        }
    }
}

/// Individual exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Connection settings
    pub connection: ConnectionConfig,
    /// Authentication settings
    pub auth: AuthConfig,
    /// Fee settings
    pub fees: FeeConfig,
    /// Rate limits and sizing constraints
    pub limits: LimitsConfig,
    /// Canonical symbol -> exchange-native symbol
    pub symbols: HashMap<String, String>,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// REST API URL
    pub rest_url: String,
    /// WebSocket URL, for exchanges with a streaming feed
    #[serde(default)]
    pub websocket_url: Option<String>,
    /// Testnet REST API URL
    #[serde(default)]
    pub testnet_rest_url: Option<String>,
    /// Testnet WebSocket URL
    #[serde(default)]
    pub testnet_websocket_url: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl ConnectionConfig {
    /// REST base URL for the given mode, falling back to the live URL when
    /// no testnet variant is configured
    pub fn rest_url(&self, mode: TradingMode) -> &str {
        match mode {
            TradingMode::Testnet => self.testnet_rest_url.as_deref().unwrap_or(&self.rest_url),
            TradingMode::Live => &self.rest_url,
        }
    }

    /// WebSocket URL for the given mode, if any
    pub fn websocket_url(&self, mode: TradingMode) -> Option<&str> {
        match mode {
            TradingMode::Testnet => self
                .testnet_websocket_url
                .as_deref()
                .or(self.websocket_url.as_deref()),
            TradingMode::Live => self.websocket_url.as_deref(),
        }
    }
}

/// Authentication configuration. Values support `${VAR}` expansion from the
/// environment so secrets never live in the file itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// API key
    #[serde(default)]
    pub api_key: String,
    /// Secret key
    #[serde(default)]
    pub secret_key: String,
    /// API passphrase (KuCoin)
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl AuthConfig {
    /// Whether credentials are present; trading is disabled without them
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }
}

/// Fee configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Taker fee fraction charged on market orders
    pub taker_fee: Decimal,
}

/// Limits and sizing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Transient-error retry budget for REST calls
    pub max_retries: u32,
    /// Base delay between retries
    pub retry_delay_ms: u64,
    /// Quantity precision (decimal places) per canonical symbol; symbols
    /// not listed use [`ConfigDefaults::QUANTITY_PRECISION`]
    #[serde(default)]
    pub quantity_precision: HashMap<String, u32>,
}

impl BotConfig {
    /// Load configuration from a TOML file, expanding `${VAR}` references in
    /// credential fields from the environment
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ArbError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: BotConfig = toml::from_str(&content)
            .map_err(|e| ArbError::Config(format!("Failed to parse config: {}", e)))?;

        config.expand_env_vars()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.detector.symbols.is_empty() {
            return Err(ArbError::Config("At least one symbol is required".to_string()).into());
        }

        for symbol in &self.detector.symbols {
            ConfigValidator::validate_symbol(symbol)?;
        }

        ConfigValidator::validate_fraction(self.detector.min_profit_threshold, "min_profit_threshold")?;
        ConfigValidator::validate_positive(self.detector.capital_amount, "capital_amount")?;
        ConfigValidator::validate_positive(self.execution.min_trade_usdt, "min_trade_usdt")?;
        ConfigValidator::validate_fraction(self.execution.balance_fraction, "balance_fraction")?;

        if self.detector.max_update_age_ms == 0 {
            return Err(ArbError::Config("max_update_age_ms must be greater than 0".to_string()).into());
        }

        if self.transfer.live_timeout_ms == 0 || self.transfer.testnet_timeout_ms == 0 {
            return Err(ArbError::Config("Transfer timeouts must be greater than 0".to_string()).into());
        }

        if self.exchanges.enabled.len() < 2 {
            return Err(ArbError::Config(
                "At least two exchanges required for arbitrage".to_string(),
            )
            .into());
        }

        for name in &self.exchanges.enabled {
            let exchange = self.exchanges.get(name).ok_or_else(|| {
                ArbError::Config(format!("Exchange '{}' is enabled but not configured", name))
            })?;

            ConfigValidator::validate_url(&exchange.connection.rest_url, "rest_url")?;
            ConfigValidator::validate_fraction(exchange.fees.taker_fee, "taker_fee")?;

            // Every scanned symbol must have a declared native mapping;
            // adapters never derive symbols by string surgery at call time.
            for symbol in &self.detector.symbols {
                if !exchange.symbols.contains_key(symbol) {
                    return Err(ArbError::Config(format!(
                        "Exchange '{}' has no symbol mapping for '{}'",
                        name, symbol
                    ))
                    .into());
                }
            }
        }

        Ok(())
    }

    fn expand_env_vars(&mut self) -> Result<()> {
        for exchange in [
            self.exchanges.binance.as_mut(),
            self.exchanges.bybit.as_mut(),
            self.exchanges.kucoin.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            exchange.auth.api_key = EnvExpander::expand_lenient(&exchange.auth.api_key);
            exchange.auth.secret_key = EnvExpander::expand_lenient(&exchange.auth.secret_key);
            if let Some(passphrase) = exchange.auth.passphrase.take() {
                exchange.auth.passphrase = Some(EnvExpander::expand_lenient(&passphrase));
            }
        }
        Ok(())
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Testnet,
            detector: DetectorConfig {
                symbols: vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()],
                min_profit_threshold: ConfigDefaults::min_profit_threshold(),
                capital_amount: ConfigDefaults::capital_amount(),
                max_update_age_ms: ConfigDefaults::MAX_UPDATE_AGE_MS,
                poll_interval_ms: ConfigDefaults::POLL_INTERVAL_MS,
            },
            execution: ExecutionConfig {
                bridge_mode: BridgeMode::Simultaneous,
                min_trade_usdt: ConfigDefaults::min_trade_usdt(),
                balance_fraction: ConfigDefaults::balance_fraction(),
            },
            transfer: TransferConfig {
                live_timeout_ms: ConfigDefaults::LIVE_TRANSFER_TIMEOUT_MS,
                live_poll_interval_ms: ConfigDefaults::LIVE_TRANSFER_POLL_MS,
                testnet_timeout_ms: ConfigDefaults::TESTNET_TRANSFER_TIMEOUT_MS,
                testnet_poll_interval_ms: ConfigDefaults::TESTNET_TRANSFER_POLL_MS,
            },
            monitoring: MonitoringConfig {
                enable_metrics: false,
                metrics_listen: "127.0.0.1:9301".to_string(),
                enable_trade_logging: true,
            },
            storage: StorageConfig { history_path: None },
            exchanges: ExchangeListConfig {
                enabled: vec!["binance".to_string(), "bybit".to_string()],
                binance: Some(ExchangeConfig::default_for(ExchangeId::Binance)),
                bybit: Some(ExchangeConfig::default_for(ExchangeId::Bybit)),
                kucoin: None,
            },
        }
    }
}

impl ExchangeConfig {
    /// Default configuration block for an exchange (public endpoints, no
    /// credentials, default symbol maps for BTC/ETH against USDT)
    pub fn default_for(id: ExchangeId) -> Self {
        let (rest_url, websocket_url, native): (&str, Option<&str>, fn(&str, &str) -> String) =
            match id {
                ExchangeId::Binance => (
                    "https://api.binance.com",
                    Some("wss://stream.binance.com:9443"),
                    |base, quote| format!("{}{}", base, quote),
                ),
                ExchangeId::Bybit => ("https://api.bybit.com", None, |base, quote| {
                    format!("{}{}", base, quote)
                }),
                ExchangeId::Kucoin => ("https://api.kucoin.com", None, |base, quote| {
                    format!("{}-{}", base, quote)
                }),
            };

        let mut symbols = HashMap::new();
        for (base, quote) in [("BTC", "USDT"), ("ETH", "USDT")] {
            symbols.insert(format!("{}/{}", base, quote), native(base, quote));
        }

        Self {
            connection: ConnectionConfig {
                rest_url: rest_url.to_string(),
                websocket_url: websocket_url.map(str::to_string),
                testnet_rest_url: None,
                testnet_websocket_url: None,
                timeout_secs: ConfigDefaults::CONNECTION_TIMEOUT_SECS,
            },
            auth: AuthConfig {
                api_key: String::new(),
                secret_key: String::new(),
                passphrase: None,
            },
            fees: FeeConfig {
                taker_fee: ConfigDefaults::taker_fee(),
            },
            limits: LimitsConfig {
                max_retries: ConfigDefaults::MAX_RETRIES,
                retry_delay_ms: ConfigDefaults::RETRY_DELAY_MS,
                quantity_precision: HashMap::new(),
            },
            symbols,
        }
    }
}
