//! Settings helpers: environment expansion, validation, defaults

use crate::{ArbError, Result};
use rust_decimal::Decimal;
use std::env;

/// Environment variable expansion for config values
pub struct EnvExpander;

impl EnvExpander {
    /// Expand `${VAR}` references from the environment, erroring on any
    /// variable that is not set
    pub fn expand(value: &str) -> Result<String> {
        let mut result = String::with_capacity(value.len());
        let mut chars = value.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch == '$' && chars.peek() == Some(&'{') {
                chars.next();
                let var_name: String = chars.by_ref().take_while(|&c| c != '}').collect();
                let var_value = env::var(&var_name).map_err(|_| {
                    ArbError::Config(format!("Environment variable '{}' not found", var_name))
                })?;
                result.push_str(&var_value);
            } else {
                result.push(ch);
            }
        }

        Ok(result)
    }

    /// Expand `${VAR}` references, leaving unset variables empty. Used for
    /// credentials so a public-data run works without any keys exported.
    pub fn expand_lenient(value: &str) -> String {
        let mut result = String::with_capacity(value.len());
        let mut chars = value.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch == '$' && chars.peek() == Some(&'{') {
                chars.next();
                let var_name: String = chars.by_ref().take_while(|&c| c != '}').collect();
                if let Ok(var_value) = env::var(&var_name) {
                    result.push_str(&var_value);
                }
            } else {
                result.push(ch);
            }
        }

        result
    }
}

/// Configuration validation helpers
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a URL (http, https, ws, wss)
    pub fn validate_url(url: &str, field: &str) -> Result<()> {
        if url.is_empty() {
            return Err(ArbError::Config(format!("{} cannot be empty", field)).into());
        }

        let parsed = url::Url::parse(url)
            .map_err(|e| ArbError::Config(format!("Invalid {}: {}", field, e)))?;

        match parsed.scheme() {
            "http" | "https" | "ws" | "wss" => Ok(()),
            scheme => {
                Err(ArbError::Config(format!("Unsupported scheme '{}' in {}", scheme, field)).into())
            }
        }
    }

    /// Validate a fraction in the range [0, 1)
    pub fn validate_fraction(value: Decimal, field: &str) -> Result<()> {
        if value < Decimal::ZERO || value >= Decimal::ONE {
            return Err(
                ArbError::Config(format!("{} must be in [0, 1), got {}", field, value)).into(),
            );
        }
        Ok(())
    }

    /// Validate a strictly positive decimal
    pub fn validate_positive(value: Decimal, field: &str) -> Result<()> {
        if value <= Decimal::ZERO {
            return Err(
                ArbError::Config(format!("{} must be positive, got {}", field, value)).into(),
            );
        }
        Ok(())
    }

    /// Validate a canonical "BASE/QUOTE" symbol
    pub fn validate_symbol(symbol: &str) -> Result<()> {
        let parts: Vec<&str> = symbol.split('/').collect();
        if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(ArbError::Config(format!(
                "Invalid symbol '{}', expected BASE/QUOTE",
                symbol
            ))
            .into());
        }
        Ok(())
    }
}

/// Default configuration values
pub struct ConfigDefaults;

impl ConfigDefaults {
    /// Default quote staleness horizon
    pub const MAX_UPDATE_AGE_MS: u64 = 30_000;
    /// Default REST polling interval
    pub const POLL_INTERVAL_MS: u64 = 2_000;
    /// Default quantity precision in decimal places
    pub const QUANTITY_PRECISION: u32 = 8;
    /// Default REST retry budget
    pub const MAX_RETRIES: u32 = 3;
    /// Default base retry delay
    pub const RETRY_DELAY_MS: u64 = 500;
    /// Default request timeout
    pub const CONNECTION_TIMEOUT_SECS: u64 = 10;
    /// Default live deposit wait timeout (10 minutes)
    pub const LIVE_TRANSFER_TIMEOUT_MS: u64 = 600_000;
    /// Default live deposit poll interval
    pub const LIVE_TRANSFER_POLL_MS: u64 = 15_000;
    /// Default testnet deposit wait timeout
    pub const TESTNET_TRANSFER_TIMEOUT_MS: u64 = 5_000;
    /// Default testnet deposit poll interval
    pub const TESTNET_TRANSFER_POLL_MS: u64 = 500;

    /// Default minimum profit threshold (0.1%)
    pub fn min_profit_threshold() -> Decimal {
        Decimal::new(1, 3)
    }

    /// Default capital per trade in quote currency
    pub fn capital_amount() -> Decimal {
        Decimal::new(100, 0)
    }

    /// Default dust floor in quote currency
    pub fn min_trade_usdt() -> Decimal {
        Decimal::new(10, 0)
    }

    /// Default testnet balance shrink fraction (90%)
    pub fn balance_fraction() -> Decimal {
        Decimal::new(9, 1)
    }

    /// Default taker fee (0.1%)
    pub fn taker_fee() -> Decimal {
        Decimal::new(1, 3)
    }
}
