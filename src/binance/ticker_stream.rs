// =============================================================================
// Ticker Stream — !ticker@arr WebSocket ingest
// =============================================================================
//
// The exchange pushes a JSON array of per-symbol 24h ticker objects with all
// numeric fields as strings. The stream runs until disconnect or error, then
// returns so the caller can reconnect after the fixed delay. Malformed
// payloads are logged and skipped without touching state.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::{Deserialize, Deserializer};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::market::Ticker;

pub const DEFAULT_STREAM_URL: &str = "wss://fstream.binance.com/ws/!ticker@arr";

/// Fixed reconnect backoff used by the caller's loop.
pub const RECONNECT_DELAY_SECS: u64 = 5;

/// Wire shape of one element of the ticker array.
#[derive(Debug, Deserialize)]
struct RawTicker {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c", deserialize_with = "de_str_f64")]
    last_price: f64,
    #[serde(rename = "p", deserialize_with = "de_str_f64")]
    price_change: f64,
    #[serde(rename = "P", deserialize_with = "de_str_f64")]
    price_change_percent: f64,
    #[serde(rename = "o", deserialize_with = "de_str_f64")]
    open_price: f64,
    #[serde(rename = "h", deserialize_with = "de_str_f64")]
    high_price: f64,
    #[serde(rename = "l", deserialize_with = "de_str_f64")]
    low_price: f64,
    #[serde(rename = "v", deserialize_with = "de_str_f64")]
    volume: f64,
    #[serde(rename = "q", deserialize_with = "de_str_f64")]
    quote_volume: f64,
    #[serde(rename = "n", default)]
    trade_count: u64,
    #[serde(rename = "E", default)]
    event_time: i64,
}

impl From<RawTicker> for Ticker {
    fn from(raw: RawTicker) -> Self {
        Ticker {
            symbol: raw.symbol,
            last_price: raw.last_price,
            price_change: raw.price_change,
            price_change_percent: raw.price_change_percent,
            open_price: raw.open_price,
            high_price: raw.high_price,
            low_price: raw.low_price,
            volume: raw.volume,
            quote_volume: raw.quote_volume,
            trade_count: raw.trade_count,
            event_time: raw.event_time,
        }
    }
}

/// Numeric fields arrive as strings; accept a bare number too.
fn de_str_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(f64),
        Str(String),
    }

    match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s.parse::<f64>().map_err(serde::de::Error::custom),
    }
}

/// Parse one stream message into a ticker batch.
fn parse_ticker_batch(text: &str) -> Result<Vec<Ticker>> {
    let raw: Vec<RawTicker> =
        serde_json::from_str(text).context("failed to parse ticker array")?;
    Ok(raw.into_iter().map(Ticker::from).collect())
}

/// Connect to the ticker stream at `url` and feed every batch into
/// `on_batch`. Returns on disconnect or read error so the caller can
/// reconnect after [`RECONNECT_DELAY_SECS`].
pub async fn run_ticker_stream<F>(url: &str, on_batch: F) -> Result<()>
where
    F: Fn(Vec<Ticker>),
{
    info!(url = %url, "connecting to ticker WebSocket");

    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to ticker WebSocket")?;

    info!("ticker WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_ticker_batch(&text) {
                        Ok(batch) => {
                            debug!(count = batch.len(), "ticker batch received");
                            on_batch(batch);
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse ticker message");
                        }
                    }
                }
                // Ping/Pong/Binary/Close frames are handled by tungstenite.
            }
            Some(Err(e)) => {
                error!(error = %e, "ticker WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!("ticker WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_batch_ok() {
        let json = r#"[
            {
                "e": "24hrTicker", "E": 1700000000123, "s": "BTCUSDT",
                "p": "250.10", "P": "0.68", "o": "36770.00", "c": "37020.10",
                "h": "37100.00", "l": "36500.00", "v": "12345.6",
                "q": "456789012.3", "n": 987654
            },
            {
                "e": "24hrTicker", "E": 1700000000123, "s": "ETHUSDT",
                "p": "-12.5", "P": "-0.62", "o": "2012.5", "c": "2000.0",
                "h": "2050.0", "l": "1990.0", "v": "54321.0",
                "q": "109876543.2", "n": 456789
            }
        ]"#;

        let batch = parse_ticker_batch(json).expect("should parse");
        assert_eq!(batch.len(), 2);

        let btc = &batch[0];
        assert_eq!(btc.symbol, "BTCUSDT");
        assert!((btc.last_price - 37020.10).abs() < 1e-9);
        assert!((btc.price_change_percent - 0.68).abs() < 1e-9);
        assert_eq!(btc.trade_count, 987654);
        assert_eq!(btc.event_time, 1700000000123);

        let eth = &batch[1];
        assert!(eth.price_change_percent < 0.0);
    }

    #[test]
    fn parse_batch_rejects_garbage() {
        assert!(parse_ticker_batch("not json").is_err());
        assert!(parse_ticker_batch(r#"{"e":"24hrTicker"}"#).is_err());
    }

    #[test]
    fn parse_batch_accepts_bare_numbers() {
        let json = r#"[{ "s": "XUSDT", "c": 1.5, "p": 0.1, "P": 7.1,
            "o": 1.4, "h": 1.6, "l": 1.3, "v": 10.0, "q": 15.0,
            "n": 5, "E": 1 }]"#;
        let batch = parse_ticker_batch(json).unwrap();
        assert_eq!(batch[0].last_price, 1.5);
    }

    #[test]
    fn empty_array_is_empty_batch() {
        assert!(parse_ticker_batch("[]").unwrap().is_empty());
    }
}
