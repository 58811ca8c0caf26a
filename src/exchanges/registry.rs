//! Exchange registry: the set of live adapters for the current trading mode

use crate::config::{BotConfig, TradingMode};
use crate::exchanges::{AdapterFactory, ExchangeAdapter, ExchangeId};
use crate::{ArbError, Result};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Capability summary for one registered adapter
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeCapability {
    /// Exchange identity
    pub exchange: ExchangeId,
    /// Present in the enabled set
    pub enabled: bool,
    /// Credentials configured, orders possible
    pub trading_enabled: bool,
    /// Running against sandbox endpoints
    pub testnet: bool,
    /// Taker fee fraction
    pub fee_fraction: Decimal,
}

/// Holds one adapter per enabled exchange, all built for the same trading
/// mode. Switching modes replaces the whole registry, so every adapter is
/// re-initialized against the new endpoints at once.
pub struct ExchangeRegistry {
    mode: TradingMode,
    adapters: IndexMap<ExchangeId, Arc<dyn ExchangeAdapter>>,
}

impl std::fmt::Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRegistry")
            .field("mode", &self.mode)
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExchangeRegistry {
    /// Build adapters for every enabled exchange, in configuration order
    pub fn from_config(config: &BotConfig, mode: TradingMode) -> Result<Self> {
        let mut adapters = IndexMap::new();
        for name in &config.exchanges.enabled {
            let id: ExchangeId = name.parse()?;
            let exchange_config = config.exchanges.get(name).ok_or_else(|| {
                ArbError::Config(format!("Exchange '{}' is enabled but not configured", name))
            })?;

            let adapter = AdapterFactory::create(id, exchange_config, mode)?;
            info!(
                exchange = %id,
                mode = %mode,
                trading_enabled = adapter.is_trading_enabled(),
                "Initialized exchange adapter"
            );
            adapters.insert(id, adapter);
        }

        if adapters.len() < 2 {
            return Err(ArbError::Config(
                "At least two exchanges required for arbitrage".to_string(),
            )
            .into());
        }

        Ok(Self { mode, adapters })
    }

    /// Assemble a registry from pre-built adapters (embedding and tests)
    pub fn from_adapters(mode: TradingMode, adapters: Vec<Arc<dyn ExchangeAdapter>>) -> Self {
        Self {
            mode,
            adapters: adapters.into_iter().map(|a| (a.id(), a)).collect(),
        }
    }

    /// Trading mode all registered adapters were built for
    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    /// Adapter for an exchange, if enabled
    pub fn get(&self, id: ExchangeId) -> Option<Arc<dyn ExchangeAdapter>> {
        self.adapters.get(&id).cloned()
    }

    /// Adapter for an exchange, erroring when it is not enabled
    pub fn get_or_err(&self, id: ExchangeId) -> Result<Arc<dyn ExchangeAdapter>> {
        self.get(id)
            .ok_or_else(|| ArbError::Config(format!("Exchange '{}' is not enabled", id)).into())
    }

    /// Enabled exchange ids, in configuration order
    pub fn ids(&self) -> Vec<ExchangeId> {
        self.adapters.keys().copied().collect()
    }

    /// All registered adapters, in configuration order
    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn ExchangeAdapter>> {
        self.adapters.values()
    }

    /// Capability summary for every registered adapter
    pub fn capabilities(&self) -> Vec<ExchangeCapability> {
        self.adapters
            .values()
            .map(|adapter| ExchangeCapability {
                exchange: adapter.id(),
                enabled: true,
                trading_enabled: adapter.is_trading_enabled(),
                testnet: self.mode == TradingMode::Testnet,
                fee_fraction: adapter.taker_fee(),
            })
            .collect()
    }

    /// Number of registered adapters
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_from_default_config() {
        let config = BotConfig::default();
        let registry = ExchangeRegistry::from_config(&config, TradingMode::Testnet).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec![ExchangeId::Binance, ExchangeId::Bybit]);
        assert_eq!(registry.mode(), TradingMode::Testnet);
        assert!(registry.get(ExchangeId::Binance).is_some());
        assert!(registry.get(ExchangeId::Kucoin).is_none());
        assert!(registry.get_or_err(ExchangeId::Kucoin).is_err());
    }

    #[test]
    fn test_capabilities_reflect_credentials_and_mode() {
        let config = BotConfig::default();
        let registry = ExchangeRegistry::from_config(&config, TradingMode::Testnet).unwrap();

        for capability in registry.capabilities() {
            assert!(capability.enabled);
            assert!(capability.testnet);
            // Default config carries no credentials
            assert!(!capability.trading_enabled);
        }
    }

    #[test]
    fn test_registry_rejects_single_exchange() {
        let mut config = BotConfig::default();
        config.exchanges.enabled = vec!["binance".to_string()];

        assert!(ExchangeRegistry::from_config(&config, TradingMode::Testnet).is_err());
    }

    #[test]
    fn test_registry_rejects_unconfigured_exchange() {
        let mut config = BotConfig::default();
        config.exchanges.enabled.push("kucoin".to_string());
        config.exchanges.kucoin = None;

        let err = ExchangeRegistry::from_config(&config, TradingMode::Testnet)
            .unwrap_err()
            .to_string();
        assert!(err.contains("not configured"));
    }
}
