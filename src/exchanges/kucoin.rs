//! KuCoin spot adapter
//!
//! KuCoin wraps everything in a `code`/`data` envelope and signs
//! `timestamp + method + path + body` with HMAC-SHA256, base64-encoded.
//! Key-version 2 additionally signs the API passphrase, so a passphrase is
//! required for any authenticated call.

use crate::config::{ConfigDefaults, ExchangeConfig, LimitsConfig, TradingMode};
use crate::exchanges::{
    parse_decimal, parse_response, request_error, retry_request, timestamp_from_millis,
    AssetBalance, DepositAddress, DepositRecord, DepositStatus, ExchangeAdapter, ExchangeId,
    OrderFill, OrderSide, Symbol, SymbolMap, WithdrawReceipt, WithdrawRequest,
};
use crate::{ArbError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const API_KEY_VERSION: &str = "2";

/// KuCoin spot exchange adapter
pub struct KucoinAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    passphrase: Option<String>,
    taker_fee: Decimal,
    limits: LimitsConfig,
    symbols: SymbolMap,
}

impl KucoinAdapter {
    /// Create a KuCoin adapter for the given trading mode
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
            passphrase: config.auth.passphrase.clone().filter(|p| !p.is_empty()),
            taker_fee: config.fees.taker_fee,
            limits: config.limits.clone(),
            symbols: SymbolMap::from_config(ExchangeId::Kucoin, &config.symbols)?,
        })
    }

    fn signed_headers(
        &self,
        method: &str,
        path_with_query: &str,
        body: &str,
    ) -> Result<Vec<(&'static str, String)>> {
        if self.api_key.is_empty() || self.secret_key.is_empty() {
            return Err(ArbError::Config("KuCoin API credentials not configured".to_string()).into());
        }
        let passphrase = self.passphrase.as_deref().ok_or_else(|| {
            ArbError::Config("KuCoin API passphrase not configured".to_string())
        })?;

        let timestamp = Utc::now().timestamp_millis().to_string();
        let prehash = format!("{}{}{}{}", timestamp, method, path_with_query, body);

        Ok(vec![
            ("KC-API-KEY", self.api_key.clone()),
            ("KC-API-SIGN", base64_hmac(&self.secret_key, &prehash)?),
            ("KC-API-TIMESTAMP", timestamp),
            ("KC-API-PASSPHRASE", base64_hmac(&self.secret_key, passphrase)?),
            ("KC-API-KEY-VERSION", API_KEY_VERSION.to_string()),
        ])
    }

    async fn get_public<T: DeserializeOwned>(&self, context: &str, path_query: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path_query);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error(ExchangeId::Kucoin, context, e))?;
        let envelope: KucoinEnvelope<T> = parse_response(ExchangeId::Kucoin, context, response).await?;
        unwrap_envelope(context, envelope)
    }

    async fn get_signed<T: DeserializeOwned>(&self, context: &str, path_query: &str) -> Result<T> {
        let headers = self.signed_headers("GET", path_query, "")?;
        let mut request = self.client.get(format!("{}{}", self.base_url, path_query));
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| request_error(ExchangeId::Kucoin, context, e))?;
        let envelope: KucoinEnvelope<T> = parse_response(ExchangeId::Kucoin, context, response).await?;
        unwrap_envelope(context, envelope)
    }

    async fn post_signed<T: DeserializeOwned>(
        &self,
        context: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        // The signature covers the exact body bytes sent, so serialize once
        let body_str = body.to_string();
        let headers = self.signed_headers("POST", path, &body_str)?;
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .body(body_str);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| request_error(ExchangeId::Kucoin, context, e))?;
        let envelope: KucoinEnvelope<T> = parse_response(ExchangeId::Kucoin, context, response).await?;
        unwrap_envelope(context, envelope)
    }

    async fn ticker_once(&self, native: &str) -> Result<Decimal> {
        let level1: KucoinLevel1 = self
            .get_public(
                "ticker",
                &format!("/api/v1/market/orderbook/level1?symbol={}", native),
            )
            .await?;
        parse_decimal(&level1.price, "KuCoin ticker price")
    }

    async fn balance_once(&self, asset: &str) -> Result<AssetBalance> {
        let rows: Vec<KucoinAccountRow> = self
            .get_signed(
                "balance",
                &format!("/api/v1/accounts?currency={}&type=trade", asset.to_uppercase()),
            )
            .await?;

        let mut free = Decimal::ZERO;
        let mut locked = Decimal::ZERO;
        let mut found = false;
        for row in rows {
            if row.currency.eq_ignore_ascii_case(asset) {
                free += parse_decimal(&row.available, "KuCoin available")?;
                locked += parse_decimal(&row.holds, "KuCoin holds")?;
                found = true;
            }
        }

        if found {
            Ok(AssetBalance {
                asset: asset.to_uppercase(),
                free,
                locked,
            })
        } else {
            Ok(AssetBalance::zero(asset))
        }
    }

    /// Fetch fill details for a just-placed order; `None` when the order has
    /// not dealt yet and the caller should use its estimate.
    async fn fetch_fill(&self, order_id: &str) -> Result<Option<(Decimal, Decimal)>> {
        let detail: KucoinOrderDetail = self
            .get_signed("order_status", &format!("/api/v1/orders/{}", order_id))
            .await?;

        let size = parse_decimal(&detail.deal_size, "KuCoin dealSize")?;
        if size <= Decimal::ZERO {
            return Ok(None);
        }
        let funds = parse_decimal(&detail.deal_funds, "KuCoin dealFunds")?;
        Ok(Some((size, funds / size)))
    }
}

fn base64_hmac(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ArbError::Config(format!("Invalid KuCoin secret key: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

fn unwrap_envelope<T>(context: &str, envelope: KucoinEnvelope<T>) -> Result<T> {
    let msg = envelope.msg.unwrap_or_default();
    match envelope.code.as_str() {
        "200000" => envelope.data.ok_or_else(|| {
            ArbError::DataParsing(format!("KuCoin {} returned empty data", context)).into()
        }),
        "429000" => {
            Err(ArbError::Connection(format!("KuCoin {} throttled: {}", context, msg)).into())
        }
        code => Err(ArbError::Trading(format!(
            "KuCoin {} rejected ({}): {}",
            context, code, msg
        ))
        .into()),
    }
}

fn deposit_record_status(status: &str) -> DepositStatus {
    match status {
        "SUCCESS" => DepositStatus::Completed,
        "FAILURE" => DepositStatus::Failed,
        _ => DepositStatus::Pending,
    }
}

/// KuCoin reports wallet transaction ids as `txid@chain`
fn strip_chain_suffix(wallet_tx_id: &str) -> Option<String> {
    let tx = wallet_tx_id.split('@').next().unwrap_or_default();
    if tx.is_empty() {
        None
    } else {
        Some(tx.to_string())
    }
}

#[async_trait]
impl ExchangeAdapter for KucoinAdapter {
    fn id(&self) -> ExchangeId {
        ExchangeId::Kucoin
    }

    fn taker_fee(&self) -> Decimal {
        self.taker_fee
    }

    fn is_trading_enabled(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty() && self.passphrase.is_some()
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
        retry_request(&self.limits, ExchangeId::Kucoin, "ticker", || {
            self.ticker_once(&native)
        })
        .await
    }

    async fn balance(&self, asset: &str) -> Result<AssetBalance> {
        retry_request(&self.limits, ExchangeId::Kucoin, "balance", || {
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
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        };
        let body = json!({
            "clientOid": uuid::Uuid::new_v4().to_string(),
            "side": side_str,
            "symbol": native,
            "type": "market",
            "size": quantity.normalize().to_string(),
        });

        debug!(symbol = %symbol, side = %side, quantity = %quantity, "Placing KuCoin market order");
        let raw: serde_json::Value = self.post_signed("order", "/api/v1/orders", &body).await?;
        let create: KucoinOrderCreate = serde_json::from_value(raw.clone())
            .map_err(|e| ArbError::DataParsing(format!("KuCoin order response: {}", e)))?;

        let (filled_quantity, average_price) = match self.fetch_fill(&create.order_id).await {
            Ok(Some((qty, avg))) => (Some(qty), Some(avg)),
            Ok(None) => (None, None),
            Err(e) => {
                debug!(order_id = %create.order_id, error = %e, "KuCoin fill lookup failed, using estimate");
                (None, None)
            }
        };

        Ok(OrderFill {
            order_id: create.order_id,
            exchange: ExchangeId::Kucoin,
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
        let path = format!("/api/v1/deposit-addresses?currency={}", asset.to_uppercase());
        let response: KucoinDepositAddress =
            retry_request(&self.limits, ExchangeId::Kucoin, "deposit_address", || {
                self.get_signed("deposit_address", &path)
            })
            .await?;

        Ok(DepositAddress {
            asset: asset.to_string(),
            address: response.address,
            tag: response.memo.filter(|m| !m.is_empty()),
        })
    }

    async fn withdraw(&self, request: &WithdrawRequest) -> Result<WithdrawReceipt> {
        let mut body = json!({
            "currency": request.asset,
            "address": request.address,
            "amount": request.amount.normalize().to_string(),
        });
        if let Some(tag) = &request.tag {
            body["memo"] = json!(tag);
        }
        if let Some(network) = &request.network {
            body["chain"] = json!(network);
        }

        debug!(asset = %request.asset, amount = %request.amount, "Initiating KuCoin withdrawal");
        let response: KucoinWithdrawResponse = self
            .post_signed("withdraw", "/api/v1/withdrawals", &body)
            .await?;

        Ok(WithdrawReceipt {
            withdrawal_id: response.withdrawal_id,
            tx_id: None,
        })
    }

    async fn deposits(&self, asset: &str) -> Result<Vec<DepositRecord>> {
        let path = format!("/api/v1/deposits?currency={}", asset.to_uppercase());
        let page: KucoinDepositPage =
            retry_request(&self.limits, ExchangeId::Kucoin, "deposits", || {
                self.get_signed("deposits", &path)
            })
            .await?;

        let mut records = Vec::with_capacity(page.items.len());
        for item in page.items {
            records.push(DepositRecord {
                tx_id: strip_chain_suffix(&item.wallet_tx_id),
                asset: item.currency,
                amount: parse_decimal(&item.amount, "KuCoin deposit amount")?,
                status: deposit_record_status(&item.status),
                timestamp: timestamp_from_millis(item.created_at, "KuCoin deposit createdAt")?,
            });
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }
}

// KuCoin API response types

#[derive(Debug, Deserialize)]
struct KucoinEnvelope<T> {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct KucoinLevel1 {
    price: String,
}

#[derive(Debug, Deserialize)]
struct KucoinAccountRow {
    currency: String,
    available: String,
    holds: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KucoinOrderCreate {
    order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KucoinOrderDetail {
    deal_size: String,
    deal_funds: String,
}

#[derive(Debug, Deserialize)]
struct KucoinDepositAddress {
    address: String,
    #[serde(default)]
    memo: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KucoinWithdrawResponse {
    withdrawal_id: String,
}

#[derive(Debug, Deserialize)]
struct KucoinDepositPage {
    #[serde(default)]
    items: Vec<KucoinDepositItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KucoinDepositItem {
    #[serde(default)]
    wallet_tx_id: String,
    currency: String,
    amount: String,
    status: String,
    created_at: i64,
}
