//! Binance websocket market stream
//!
//! Subscribes to the combined miniTicker stream and forwards close prices
//! into the shared update channel. One connection per run; if the stream
//! drops, the REST pollers keep the table alive and the error is logged.

use crate::exchanges::{ExchangeId, Symbol};
use crate::market::PriceQuote;
use crate::{ArbError, Result};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Combined-stream frame: `{"stream":"btcusdt@miniTicker","data":{...}}`
#[derive(Debug, Deserialize)]
struct StreamFrame {
    data: MiniTicker,
}

/// The fields of a miniTicker event this feed consumes
#[derive(Debug, Deserialize)]
struct MiniTicker {
    /// Native symbol, e.g. "BTCUSDT"
    #[serde(rename = "s")]
    symbol: String,
    /// Close price
    #[serde(rename = "c")]
    close: String,
}

/// Combined-stream URL for a set of native symbols
pub fn combined_stream_url(websocket_url: &str, native_symbols: &[String]) -> String {
    let streams: Vec<String> = native_symbols
        .iter()
        .map(|native| format!("{}@miniTicker", native.to_lowercase()))
        .collect();
    format!(
        "{}/stream?streams={}",
        websocket_url.trim_end_matches('/'),
        streams.join("/")
    )
}

/// Parse one text frame into a quote.
///
/// `natives` maps the exchange-native symbol to its canonical form. Frames
/// for unknown symbols and frames that do not parse yield `None`.
fn parse_mini_ticker(raw: &str, natives: &HashMap<String, Symbol>) -> Option<PriceQuote> {
    let frame: StreamFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "Skipping unparseable stream frame");
            return None;
        }
    };

    let symbol = natives.get(&frame.data.symbol)?;
    let price: Decimal = match frame.data.close.parse() {
        Ok(price) => price,
        Err(_) => {
            warn!(symbol = %frame.data.symbol, raw = %frame.data.close, "Unparseable close price");
            return None;
        }
    };

    Some(PriceQuote::new(ExchangeId::Binance, symbol.clone(), price))
}

/// Spawn the stream task. It runs until the connection closes, the server
/// errors, or the ingest channel hangs up. Reconnection is left to the
/// caller restarting the feeds.
pub fn spawn_binance_stream(
    websocket_url: String,
    natives: HashMap<String, Symbol>,
    tx: mpsc::Sender<PriceQuote>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match run_stream(&websocket_url, &natives, &tx).await {
            Ok(()) => info!("Binance market stream closed"),
            Err(e) => warn!(error = %e, "Binance market stream failed"),
        }
    })
}

async fn run_stream(
    url: &str,
    natives: &HashMap<String, Symbol>,
    tx: &mpsc::Sender<PriceQuote>,
) -> Result<()> {
    let native_symbols: Vec<String> = natives.keys().cloned().collect();
    let stream_url = combined_stream_url(url, &native_symbols);

    let (ws, _) = connect_async(&stream_url)
        .await
        .map_err(|e| ArbError::Connection(format!("Binance stream connect failed: {}", e)))?;
    info!(url = %stream_url, "Connected to Binance market stream");

    let (mut write, mut read) = ws.split();
    while let Some(message) = read.next().await {
        let message =
            message.map_err(|e| ArbError::Connection(format!("Binance stream error: {}", e)))?;
        match message {
            Message::Text(text) => {
                if let Some(quote) = parse_mini_ticker(&text, natives) {
                    if tx.send(quote).await.is_err() {
                        debug!("Ingest channel closed, stream task exiting");
                        return Ok(());
                    }
                }
            }
            Message::Ping(payload) => {
                if write.send(Message::Pong(payload)).await.is_err() {
                    return Err(ArbError::Connection(
                        "Binance stream pong failed".to_string(),
                    )
                    .into());
                }
            }
            Message::Close(_) => return Ok(()),
            _ => {}
        }
    }

    Ok(())
}
