//! Bybit spot adapter (v5 unified API)
//!
//! All v5 responses arrive in a `retCode`/`retMsg`/`result` envelope;
//! authenticated calls sign `timestamp + api_key + recv_window + payload`
//! with HMAC-SHA256 and carry the signature in `X-BAPI-SIGN`.

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
use serde_json::json;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: &str = "5000";

/// Bybit spot exchange adapter
pub struct BybitAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    taker_fee: Decimal,
    limits: LimitsConfig,
    symbols: SymbolMap,
}

impl BybitAdapter {
    /// Create a Bybit adapter for the given trading mode
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
            symbols: SymbolMap::from_config(ExchangeId::Bybit, &config.symbols)?,
        })
    }

    fn require_credentials(&self) -> Result<()> {
        if self.api_key.is_empty() || self.secret_key.is_empty() {
            return Err(ArbError::Config("Bybit API credentials not configured".to_string()).into());
        }
        Ok(())
    }

    fn sign_payload(&self, timestamp: i64, payload: &str) -> Result<String> {
        let prehash = format!("{}{}{}{}", timestamp, self.api_key, RECV_WINDOW, payload);
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| ArbError::Config(format!("Invalid Bybit secret key: {}", e)))?;
        mac.update(prehash.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn get_public<T: DeserializeOwned>(&self, context: &str, path_query: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path_query);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error(ExchangeId::Bybit, context, e))?;
        let envelope: BybitEnvelope<T> = parse_response(ExchangeId::Bybit, context, response).await?;
        unwrap_envelope(context, envelope)
    }

    async fn get_signed<T: DeserializeOwned>(
        &self,
        context: &str,
        path: &str,
        query: &str,
    ) -> Result<T> {
        self.require_credentials()?;
        let timestamp = Utc::now().timestamp_millis();
        let signature = self.sign_payload(timestamp, query)?;

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let response = self
            .client
            .get(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .send()
            .await
            .map_err(|e| request_error(ExchangeId::Bybit, context, e))?;
        let envelope: BybitEnvelope<T> = parse_response(ExchangeId::Bybit, context, response).await?;
        unwrap_envelope(context, envelope)
    }

    async fn post_signed<T: DeserializeOwned>(
        &self,
        context: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        self.require_credentials()?;
        let timestamp = Utc::now().timestamp_millis();
        // The signature covers the exact body bytes sent, so serialize once
        let body_str = body.to_string();
        let signature = self.sign_payload(timestamp, &body_str)?;

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await
            .map_err(|e| request_error(ExchangeId::Bybit, context, e))?;
        let envelope: BybitEnvelope<T> = parse_response(ExchangeId::Bybit, context, response).await?;
        unwrap_envelope(context, envelope)
    }

    async fn ticker_once(&self, native: &str) -> Result<Decimal> {
        let result: BybitTickerResult = self
            .get_public(
                "ticker",
                &format!("/v5/market/tickers?category=spot&symbol={}", native),
            )
            .await?;
        let row = result.list.into_iter().next().ok_or_else(|| {
            ArbError::DataParsing(format!("Bybit ticker returned no rows for {}", native))
        })?;
        parse_decimal(&row.last_price, "Bybit lastPrice")
    }

    async fn balance_once(&self, asset: &str) -> Result<AssetBalance> {
        let query = format!("accountType=UNIFIED&coin={}", asset.to_uppercase());
        let result: BybitWalletResult = self
            .get_signed("balance", "/v5/account/wallet-balance", &query)
            .await?;

        let row = result
            .list
            .into_iter()
            .flat_map(|account| account.coin)
            .find(|c| c.coin.eq_ignore_ascii_case(asset));

        match row {
            Some(c) => {
                let total = decimal_or_zero(&c.wallet_balance, "Bybit walletBalance")?;
                let locked = decimal_or_zero(&c.locked, "Bybit locked")?;
                Ok(AssetBalance {
                    asset: c.coin,
                    free: total - locked,
                    locked,
                })
            }
            None => Ok(AssetBalance::zero(asset)),
        }
    }

    /// Fetch fill details for a just-placed order. Spot market fills settle
    /// asynchronously; `None` means the caller should use its estimate.
    async fn fetch_fill(&self, order_id: &str) -> Result<Option<(Decimal, Option<Decimal>)>> {
        let query = format!("category=spot&orderId={}", order_id);
        let result: BybitOrderListResult = self
            .get_signed("order_status", "/v5/order/realtime", &query)
            .await?;

        let row = match result.list.into_iter().next() {
            Some(row) => row,
            None => return Ok(None),
        };

        let qty = decimal_or_zero(&row.cum_exec_qty, "Bybit cumExecQty")?;
        if qty <= Decimal::ZERO {
            return Ok(None);
        }
        let avg = match row.avg_price.as_deref() {
            Some(s) if !s.trim().is_empty() => Some(parse_decimal(s, "Bybit avgPrice")?),
            _ => None,
        };
        Ok(Some((qty, avg)))
    }
}

fn decimal_or_zero(value: &str, context: &str) -> Result<Decimal> {
    if value.trim().is_empty() {
        return Ok(Decimal::ZERO);
    }
    parse_decimal(value, context)
}

fn unwrap_envelope<T>(context: &str, envelope: BybitEnvelope<T>) -> Result<T> {
    match envelope.ret_code {
        0 => envelope.result.ok_or_else(|| {
            ArbError::DataParsing(format!("Bybit {} returned empty result", context)).into()
        }),
        // 10006: rate limited; 10016: internal server error
        10006 | 10016 => Err(ArbError::Connection(format!(
            "Bybit {} unavailable ({}): {}",
            context, envelope.ret_code, envelope.ret_msg
        ))
        .into()),
        code => Err(ArbError::Trading(format!(
            "Bybit {} rejected ({}): {}",
            context, code, envelope.ret_msg
        ))
        .into()),
    }
}

fn deposit_record_status(code: i64) -> DepositStatus {
    match code {
        3 => DepositStatus::Completed,
        4 => DepositStatus::Failed,
        _ => DepositStatus::Pending,
    }
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    fn id(&self) -> ExchangeId {
        ExchangeId::Bybit
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
        retry_request(&self.limits, ExchangeId::Bybit, "ticker", || {
            self.ticker_once(&native)
        })
        .await
    }

    async fn balance(&self, asset: &str) -> Result<AssetBalance> {
        retry_request(&self.limits, ExchangeId::Bybit, "balance", || {
            self.balance_once(asset)
        })
        .await
    }

    async fn place_market_order(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderFill> {
        let native = self.symbols.native(symbol)?;
        let side_str = match side {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        };
        let body = json!({
            "category": "spot",
            "symbol": native,
            "side": side_str,
            "orderType": "Market",
            "qty": quantity.normalize().to_string(),
            "marketUnit": "baseCoin",
        });

        debug!(symbol = %symbol, side = %side, quantity = %quantity, "Placing Bybit market order");
        let raw: serde_json::Value = self.post_signed("order", "/v5/order/create", &body).await?;
        let create: BybitOrderCreate = serde_json::from_value(raw.clone())
            .map_err(|e| ArbError::DataParsing(format!("Bybit order response: {}", e)))?;

        let (filled_quantity, average_price) = match self.fetch_fill(&create.order_id).await {
            Ok(Some((qty, avg))) => (Some(qty), avg),
            Ok(None) => (None, None),
            Err(e) => {
                debug!(order_id = %create.order_id, error = %e, "Bybit fill lookup failed, using estimate");
                (None, None)
            }
        };

        Ok(OrderFill {
            order_id: create.order_id,
            exchange: ExchangeId::Bybit,
            symbol: symbol.clone(),
            side,
            requested_quantity: quantity,
            filled_quantity,
            average_price,
            fee: None,
            raw,
            timestamp: Utc::now(),
        })
    }

    async fn deposit_address(&self, asset: &str) -> Result<DepositAddress> {
        let query = format!("coin={}", asset.to_uppercase());
        let result: BybitDepositAddressResult =
            retry_request(&self.limits, ExchangeId::Bybit, "deposit_address", || {
                self.get_signed("deposit_address", "/v5/asset/deposit/query-address", &query)
            })
            .await?;

        let chain = result.chains.into_iter().next().ok_or_else(|| {
            ArbError::DataParsing(format!("Bybit returned no deposit chains for {}", asset))
        })?;

        Ok(DepositAddress {
            asset: asset.to_string(),
            address: chain.address_deposit,
            tag: if chain.tag_deposit.is_empty() {
                None
            } else {
                Some(chain.tag_deposit)
            },
        })
    }

    async fn withdraw(&self, request: &WithdrawRequest) -> Result<WithdrawReceipt> {
        let mut body = json!({
            "coin": request.asset,
            "address": request.address,
            "amount": request.amount.normalize().to_string(),
            "timestamp": Utc::now().timestamp_millis(),
        });
        if let Some(tag) = &request.tag {
            body["tag"] = json!(tag);
        }
        if let Some(network) = &request.network {
            body["chain"] = json!(network);
        }

        debug!(asset = %request.asset, amount = %request.amount, "Initiating Bybit withdrawal");
        let result: BybitWithdrawResult = self
            .post_signed("withdraw", "/v5/asset/withdraw/create", &body)
            .await?;

        Ok(WithdrawReceipt {
            withdrawal_id: result.id,
            tx_id: None,
        })
    }

    async fn deposits(&self, asset: &str) -> Result<Vec<DepositRecord>> {
        let query = format!("coin={}", asset.to_uppercase());
        let result: BybitDepositListResult =
            retry_request(&self.limits, ExchangeId::Bybit, "deposits", || {
                self.get_signed("deposits", "/v5/asset/deposit/query-record", &query)
            })
            .await?;

        let mut records = Vec::with_capacity(result.rows.len());
        for row in result.rows {
            // Pending rows have no success time yet
            let timestamp = if row.success_at.trim().is_empty() {
                timestamp_from_millis(0, "Bybit deposit successAt")?
            } else {
                let ms: i64 = row.success_at.trim().parse().map_err(|_| {
                    ArbError::DataParsing(format!("Invalid Bybit successAt '{}'", row.success_at))
                })?;
                timestamp_from_millis(ms, "Bybit deposit successAt")?
            };

            records.push(DepositRecord {
                tx_id: if row.tx_id.is_empty() { None } else { Some(row.tx_id) },
                asset: row.coin,
                amount: parse_decimal(&row.amount, "Bybit deposit amount")?,
                status: deposit_record_status(row.status),
                timestamp,
            });
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }
}

// Bybit v5 response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitEnvelope<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct BybitTickerResult {
    list: Vec<BybitTickerRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitTickerRow {
    last_price: String,
}

#[derive(Debug, Deserialize)]
struct BybitWalletResult {
    list: Vec<BybitWalletAccount>,
}

#[derive(Debug, Deserialize)]
struct BybitWalletAccount {
    coin: Vec<BybitCoinRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitCoinRow {
    coin: String,
    wallet_balance: String,
    #[serde(default)]
    locked: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitOrderCreate {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct BybitOrderListResult {
    list: Vec<BybitOrderRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitOrderRow {
    cum_exec_qty: String,
    #[serde(default)]
    avg_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BybitDepositAddressResult {
    chains: Vec<BybitChainRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitChainRow {
    address_deposit: String,
    #[serde(default)]
    tag_deposit: String,
}

#[derive(Debug, Deserialize)]
struct BybitWithdrawResult {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BybitDepositListResult {
    rows: Vec<BybitDepositRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitDepositRow {
    #[serde(rename = "txID", default)]
    tx_id: String,
    #[serde(default)]
    coin: String,
    amount: String,
    status: i64,
    #[serde(default)]
    success_at: String,
}
