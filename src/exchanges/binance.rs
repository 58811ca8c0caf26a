//! Binance spot adapter
//!
//! Covers `/api/v3` market and trading endpoints plus the `/sapi/v1/capital`
//! transfer surface. Signed requests follow Binance's scheme: HMAC-SHA256
//! over the query string, hex-encoded, appended as `signature`.

use crate::config::{ConfigDefaults, ExchangeConfig, LimitsConfig, TradingMode};
use crate::exchanges::{
    parse_decimal, parse_response, request_error, retry_request, timestamp_from_millis,
    AssetBalance, DepositAddress, DepositRecord, DepositStatus, ExchangeAdapter, ExchangeId,
    OrderFill, OrderSide, Symbol, SymbolMap, WithdrawReceipt, WithdrawRequest,
};
use crate::{ArbError, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Binance spot exchange adapter
pub struct BinanceAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    taker_fee: Decimal,
    limits: LimitsConfig,
    symbols: SymbolMap,
}

impl BinanceAdapter {
    /// Create a Binance adapter for the given trading mode
    pub fn new(config: &ExchangeConfig, mode: TradingMode) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.connection.timeout_secs))
            .build()
            .map_err(|e| ArbError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.connection.rest_url(mode).trim_end_matches('/').to_string(),
            api_key: config.auth.api_key.clone(),
            secret_key: config.auth.secret_key.clone(),
            taker_fee: config.fees.taker_fee,
            limits: config.limits.clone(),
            symbols: SymbolMap::from_config(ExchangeId::Binance, &config.symbols)?,
        })
    }

    fn require_credentials(&self) -> Result<()> {
        if self.api_key.is_empty() || self.secret_key.is_empty() {
            return Err(ArbError::Config("Binance API credentials not configured".to_string()).into());
        }
        Ok(())
    }

    fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| ArbError::Config(format!("Invalid Binance secret key: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_query(&self, params: &[(&str, String)]) -> Result<String> {
        self.require_credentials()?;

        let mut query: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!(
            "timestamp={}&recvWindow=5000",
            Utc::now().timestamp_millis()
        ));

        let signature = self.sign(&query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    async fn get_public<T: DeserializeOwned>(&self, context: &str, path_query: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path_query);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error(ExchangeId::Binance, context, e))?;
        parse_response(ExchangeId::Binance, context, response).await
    }

    async fn get_signed<T: DeserializeOwned>(
        &self,
        context: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}?{}", self.base_url, path, self.signed_query(params)?);
        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| request_error(ExchangeId::Binance, context, e))?;
        parse_response(ExchangeId::Binance, context, response).await
    }

    async fn post_signed<T: DeserializeOwned>(
        &self,
        context: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}?{}", self.base_url, path, self.signed_query(params)?);
        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| request_error(ExchangeId::Binance, context, e))?;
        parse_response(ExchangeId::Binance, context, response).await
    }

    async fn ticker_once(&self, native: &str) -> Result<Decimal> {
        let ticker: BinanceTicker = self
            .get_public("ticker", &format!("/api/v3/ticker/price?symbol={}", native))
            .await?;
        parse_decimal(&ticker.price, "Binance ticker price")
    }

    async fn account_once(&self) -> Result<BinanceAccount> {
        self.get_signed("account", "/api/v3/account", &[]).await
    }

    fn fill_from_response(
        symbol: &Symbol,
        side: OrderSide,
        requested: Decimal,
        raw: serde_json::Value,
    ) -> Result<OrderFill> {
        let parsed: BinanceOrderResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ArbError::DataParsing(format!("Binance order response: {}", e)))?;

        let executed = parse_decimal(&parsed.executed_qty, "Binance executedQty")?;
        let quote_spent = parse_decimal(&parsed.cummulative_quote_qty, "Binance cummulativeQuoteQty")?;

        let (filled_quantity, average_price) = if executed > Decimal::ZERO {
            (Some(executed), Some(quote_spent / executed))
        } else {
            (None, None)
        };

        Ok(OrderFill {
            order_id: parsed.order_id.to_string(),
            exchange: ExchangeId::Binance,
            symbol: symbol.clone(),
            side,
            requested_quantity: requested,
            filled_quantity,
            average_price,
            fee: fee_from_fills(&parsed.fills, symbol.quote()),
            raw,
            timestamp: Utc::now(),
        })
    }
}

/// Sum the per-fill commissions when they are all charged in the quote
/// asset; mixed-asset commissions are not comparable, so report none.
fn fee_from_fills(fills: &[BinanceFillLine], quote_asset: &str) -> Option<Decimal> {
    if fills.is_empty() {
        return None;
    }
    let mut total = Decimal::ZERO;
    for line in fills {
        if line.commission_asset != quote_asset {
            return None;
        }
        total += line.commission.parse::<Decimal>().ok()?;
    }
    Some(total)
}

fn deposit_status(code: i64) -> DepositStatus {
    match code {
        1 => DepositStatus::Completed,
        0 | 6 => DepositStatus::Pending,
        _ => DepositStatus::Failed,
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn id(&self) -> ExchangeId {
        ExchangeId::Binance
    }

    fn taker_fee(&self) -> Decimal {
        self.taker_fee
    }

    fn is_trading_enabled(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }

    fn supports_pair(&self, symbol: &Symbol) -> bool {
        self.symbols.supports(symbol)
    }

    fn quantity_precision(&self, symbol: &Symbol) -> u32 {
        self.limits
            .quantity_precision
            .get(&symbol.to_string())
            .copied()
            .unwrap_or(ConfigDefaults::QUANTITY_PRECISION)
    }

    async fn ticker_price(&self, symbol: &Symbol) -> Result<Decimal> {
        let native = self.symbols.native(symbol)?.to_string();
        retry_request(&self.limits, ExchangeId::Binance, "ticker", || {
            self.ticker_once(&native)
        })
        .await
    }

    async fn balance(&self, asset: &str) -> Result<AssetBalance> {
        let account =
            retry_request(&self.limits, ExchangeId::Binance, "balance", || self.account_once())
                .await?;

        match account
            .balances
            .into_iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
        {
            Some(row) => Ok(AssetBalance {
                asset: row.asset,
                free: parse_decimal(&row.free, "Binance balance free")?,
                locked: parse_decimal(&row.locked, "Binance balance locked")?,
            }),
            None => Ok(AssetBalance::zero(asset)),
        }
    }

    async fn place_market_order(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderFill> {
        let native = self.symbols.native(symbol)?;
        let params = [
            ("symbol", native.to_string()),
            ("side", side.to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("newOrderRespType", "FULL".to_string()),
        ];

        debug!(symbol = %symbol, side = %side, quantity = %quantity, "Placing Binance market order");
        let raw: serde_json::Value = self.post_signed("order", "/api/v3/order", &params).await?;
        Self::fill_from_response(symbol, side, quantity, raw)
    }

    async fn deposit_address(&self, asset: &str) -> Result<DepositAddress> {
        let params = [("coin", asset.to_string())];
        let response: BinanceDepositAddress =
            retry_request(&self.limits, ExchangeId::Binance, "deposit_address", || {
                self.get_signed("deposit_address", "/sapi/v1/capital/deposit/address", &params)
            })
            .await?;

        Ok(DepositAddress {
            asset: asset.to_string(),
            address: response.address,
            tag: response.tag.filter(|t| !t.is_empty()),
        })
    }

    async fn withdraw(&self, request: &WithdrawRequest) -> Result<WithdrawReceipt> {
        let mut params = vec![
            ("coin", request.asset.clone()),
            ("address", request.address.clone()),
            ("amount", request.amount.normalize().to_string()),
        ];
        if let Some(tag) = &request.tag {
            params.push(("addressTag", tag.clone()));
        }
        if let Some(network) = &request.network {
            params.push(("network", network.clone()));
        }

        debug!(asset = %request.asset, amount = %request.amount, "Initiating Binance withdrawal");
        let response: BinanceWithdrawResponse = self
            .post_signed("withdraw", "/sapi/v1/capital/withdraw/apply", &params)
            .await?;

        Ok(WithdrawReceipt {
            withdrawal_id: response.id,
            tx_id: None,
        })
    }

    async fn deposits(&self, asset: &str) -> Result<Vec<DepositRecord>> {
        let params = [("coin", asset.to_string())];
        let rows: Vec<BinanceDepositRow> =
            retry_request(&self.limits, ExchangeId::Binance, "deposits", || {
                self.get_signed("deposits", "/sapi/v1/capital/deposit/hisrec", &params)
            })
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(DepositRecord {
                tx_id: row.tx_id.filter(|t| !t.is_empty()),
                asset: row.coin,
                amount: parse_decimal(&row.amount, "Binance deposit amount")?,
                status: deposit_status(row.status),
                timestamp: timestamp_from_millis(row.insert_time, "Binance deposit insertTime")?,
            });
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }
}

// Binance API response types

#[derive(Debug, Deserialize)]
struct BinanceTicker {
    price: String,
}

#[derive(Debug, Deserialize)]
struct BinanceAccount {
    balances: Vec<BinanceBalanceRow>,
}

#[derive(Debug, Deserialize)]
struct BinanceBalanceRow {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceOrderResponse {
    order_id: u64,
    executed_qty: String,
    cummulative_quote_qty: String,
    #[serde(default)]
    fills: Vec<BinanceFillLine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceFillLine {
    commission: String,
    commission_asset: String,
}

#[derive(Debug, Deserialize)]
struct BinanceDepositAddress {
    address: String,
    #[serde(default)]
    tag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BinanceWithdrawResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceDepositRow {
    #[serde(default)]
    tx_id: Option<String>,
    coin: String,
    amount: String,
    status: i64,
    insert_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> ExchangeConfig {
        let mut config = ExchangeConfig::default_for(ExchangeId::Binance);
        config.connection.rest_url = base_url.to_string();
        config.auth.api_key = "test-key".to_string();
        config.auth.secret_key = "test-secret".to_string();
        config.limits.retry_delay_ms = 1;
        config
    }

    #[tokio::test]
    async fn test_ticker_price() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "BTCUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "symbol": "BTCUSDT",
                "price": "50123.45"
            })))
            .mount(&server)
            .await;

        let adapter = BinanceAdapter::new(&test_config(&server.uri()), TradingMode::Live).unwrap();
        let price = adapter.ticker_price(&Symbol::new("BTC", "USDT")).await.unwrap();
        assert_eq!(price, dec!(50123.45));
    }

    #[tokio::test]
    async fn test_ticker_retries_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "symbol": "BTCUSDT",
                "price": "50000"
            })))
            .mount(&server)
            .await;

        let adapter = BinanceAdapter::new(&test_config(&server.uri()), TradingMode::Live).unwrap();
        let price = adapter.ticker_price(&Symbol::new("BTC", "USDT")).await.unwrap();
        assert_eq!(price, dec!(50000));
    }

    #[tokio::test]
    async fn test_balance_missing_asset_is_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/account"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "balances": [
                    {"asset": "USDT", "free": "1000.0", "locked": "0.0"}
                ]
            })))
            .mount(&server)
            .await;

        let adapter = BinanceAdapter::new(&test_config(&server.uri()), TradingMode::Live).unwrap();
        let balance = adapter.balance("BTC").await.unwrap();
        assert_eq!(balance.free, Decimal::ZERO);

        let usdt = adapter.balance("usdt").await.unwrap();
        assert_eq!(usdt.free, dec!(1000.0));
    }

    #[tokio::test]
    async fn test_signed_call_requires_credentials() {
        let mut config = test_config("https://api.binance.com");
        config.auth.api_key.clear();
        config.auth.secret_key.clear();

        let adapter = BinanceAdapter::new(&config, TradingMode::Live).unwrap();
        assert!(!adapter.is_trading_enabled());

        let err = adapter.balance("USDT").await.unwrap_err().to_string();
        assert!(err.contains("credentials"));
    }

    #[test]
    fn test_fill_parsing_with_fills() {
        let raw = json!({
            "symbol": "BTCUSDT",
            "orderId": 12345,
            "executedQty": "0.00400000",
            "cummulativeQuoteQty": "200.00000000",
            "status": "FILLED",
            "fills": [
                {"price": "50000.0", "qty": "0.004", "commission": "0.2", "commissionAsset": "USDT"}
            ]
        });

        let symbol = Symbol::new("BTC", "USDT");
        let fill =
            BinanceAdapter::fill_from_response(&symbol, OrderSide::Buy, dec!(0.004), raw).unwrap();

        assert_eq!(fill.order_id, "12345");
        assert_eq!(fill.filled_quantity, Some(dec!(0.004)));
        assert_eq!(fill.average_price, Some(dec!(50000)));
        assert_eq!(fill.fee, Some(dec!(0.2)));
    }

    #[test]
    fn test_fill_parsing_unfilled_reports_none() {
        let raw = json!({
            "orderId": 99,
            "executedQty": "0.00000000",
            "cummulativeQuoteQty": "0.00000000",
            "fills": []
        });

        let symbol = Symbol::new("BTC", "USDT");
        let fill =
            BinanceAdapter::fill_from_response(&symbol, OrderSide::Sell, dec!(0.004), raw).unwrap();

        assert_eq!(fill.filled_quantity, None);
        assert_eq!(fill.average_price, None);
        assert_eq!(fill.fee, None);
        assert_eq!(fill.requested_quantity, dec!(0.004));
    }

    #[test]
    fn test_fee_ignored_when_mixed_assets() {
        let fills = vec![
            BinanceFillLine {
                commission: "0.1".to_string(),
                commission_asset: "USDT".to_string(),
            },
            BinanceFillLine {
                commission: "0.000001".to_string(),
                commission_asset: "BNB".to_string(),
            },
        ];
        assert_eq!(fee_from_fills(&fills, "USDT"), None);
    }

    #[test]
    fn test_deposit_status_mapping() {
        assert_eq!(deposit_status(1), DepositStatus::Completed);
        assert_eq!(deposit_status(0), DepositStatus::Pending);
        assert_eq!(deposit_status(6), DepositStatus::Pending);
        assert_eq!(deposit_status(7), DepositStatus::Failed);
    }
}
