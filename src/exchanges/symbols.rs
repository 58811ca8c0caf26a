//! Canonical trading symbols and per-exchange symbol mapping

use crate::exchanges::ExchangeId;
use crate::{ArbError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// A canonical trading pair, written `BASE/QUOTE` (e.g. `BTC/USDT`).
///
/// Exchange-native spellings ("BTCUSDT", "BTC-USDT") never leave the adapter
/// layer; everything above it speaks canonical symbols.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol {
    base: String,
    quote: String,
}

impl Symbol {
    /// Create a symbol from base and quote assets
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// Base asset (the asset being bought/sold)
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Quote asset (the asset trades are priced in)
    pub fn quote(&self) -> &str {
        &self.quote
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for Symbol {
    type Err = ArbError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| ArbError::Symbol(format!("Expected BASE/QUOTE, got '{}'", s)))?;
        if base.is_empty() || quote.is_empty() {
            return Err(ArbError::Symbol(format!("Expected BASE/QUOTE, got '{}'", s)));
        }
        Ok(Symbol::new(base, quote))
    }
}

impl TryFrom<String> for Symbol {
    type Error = ArbError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Symbol> for String {
    fn from(s: Symbol) -> Self {
        s.to_string()
    }
}

/// Declarative canonical-to-native symbol table for one exchange.
///
/// Built once from configuration and validated at startup; adapters look
/// native spellings up here instead of rewriting strings at call time.
#[derive(Debug, Clone)]
pub struct SymbolMap {
    exchange: ExchangeId,
    native: IndexMap<Symbol, String>,
}

impl SymbolMap {
    /// Build a symbol map from the configured canonical -> native entries
    pub fn from_config(exchange: ExchangeId, entries: &HashMap<String, String>) -> Result<Self> {
        let mut pairs: Vec<(Symbol, String)> = Vec::with_capacity(entries.len());
        for (canonical, native) in entries {
            let symbol: Symbol = canonical.parse()?;
            if native.is_empty() {
                return Err(ArbError::Symbol(format!(
                    "Empty native symbol for {} on {}",
                    canonical, exchange
                ))
                .into());
            }
            pairs.push((symbol, native.clone()));
        }
        // Deterministic order regardless of the HashMap the config parser built
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self {
            exchange,
            native: pairs.into_iter().collect(),
        })
    }

    /// Exchange this map belongs to
    pub fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    /// Native spelling for a canonical symbol
    pub fn native(&self, symbol: &Symbol) -> Result<&str> {
        self.native
            .get(symbol)
            .map(String::as_str)
            .ok_or_else(|| {
                ArbError::Symbol(format!("{} has no mapping for {}", self.exchange, symbol))
            })
            .map_err(Into::into)
    }

    /// Whether the exchange lists this pair
    pub fn supports(&self, symbol: &Symbol) -> bool {
        self.native.contains_key(symbol)
    }

    /// Mapped canonical symbols, in deterministic order
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.native.keys()
    }

    /// Number of mapped pairs
    pub fn len(&self) -> usize {
        self.native.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.native.is_empty()
    }
}
