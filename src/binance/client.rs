// =============================================================================
// Binance Futures REST Client — public market-data endpoints
// =============================================================================
//
// The radar consumes public endpoints only: funding (premiumIndex), open
// interest, and klines. Every request rides the client's 10-second deadline;
// an expired deadline surfaces as an error the calling detector absorbs.
//
// Open-interest queries across the symbol universe are issued in groups of
// ten with a 100 ms inter-group gap to stay inside exchange request-weight
// limits.

use anyhow::{Context, Result};
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::indicators::rsi::{latest_rsi, RSI_PERIOD};
use crate::market::Candle;

/// Symbols per open-interest request group.
const OI_BATCH_SIZE: usize = 10;
/// Pause between open-interest groups.
const OI_BATCH_GAP_MS: u64 = 100;

/// Current funding data for one perpetual contract.
#[derive(Debug, Clone)]
pub struct FundingRate {
    pub symbol: String,
    /// Raw rate as a decimal (0.0001 = 0.01%).
    pub rate: f64,
    pub next_funding_time: i64,
    pub mark_price: f64,
}

/// One open-interest observation.
#[derive(Debug, Clone)]
pub struct OpenInterestPoint {
    pub symbol: String,
    pub open_interest: f64,
    pub ts: i64,
}

/// REST client for the futures API.
#[derive(Clone)]
pub struct FuturesClient {
    client: reqwest::Client,
    base_url: String,
}

impl FuturesClient {
    pub fn new() -> Self {
        Self::with_base_url("https://fapi.binance.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    // -------------------------------------------------------------------------
    // Funding
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/premiumIndex — funding rate and mark price for every
    /// perpetual symbol in one call.
    pub async fn funding_rates(&self) -> Result<Vec<FundingRate>> {
        let url = format!("{}/fapi/v1/premiumIndex", self.base_url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/premiumIndex request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse premiumIndex response")?;

        if !status.is_success() {
            anyhow::bail!("premiumIndex returned {}: {}", status, body);
        }

        let arr = body
            .as_array()
            .context("premiumIndex response is not an array")?;

        let mut rates = Vec::with_capacity(arr.len());
        for entry in arr {
            let symbol = match entry["symbol"].as_str() {
                Some(s) => s.to_string(),
                None => continue,
            };
            let rate = parse_str_f64(&entry["lastFundingRate"]).unwrap_or(0.0);
            let mark_price = parse_str_f64(&entry["markPrice"]).unwrap_or(0.0);
            let next_funding_time = entry["nextFundingTime"].as_i64().unwrap_or(0);

            rates.push(FundingRate {
                symbol,
                rate,
                next_funding_time,
                mark_price,
            });
        }

        debug!(count = rates.len(), "funding rates fetched");
        Ok(rates)
    }

    // -------------------------------------------------------------------------
    // Open interest
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/openInterest for one symbol.
    pub async fn open_interest(&self, symbol: &str) -> Result<OpenInterestPoint> {
        let url = format!("{}/fapi/v1/openInterest?symbol={}", self.base_url, symbol);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET open interest for {symbol}"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse openInterest response")?;

        if !status.is_success() {
            anyhow::bail!("openInterest returned {}: {}", status, body);
        }

        let open_interest = parse_str_f64(&body["openInterest"])
            .context("openInterest field missing or malformed")?;
        let ts = body["time"].as_i64().unwrap_or(0);

        Ok(OpenInterestPoint {
            symbol: symbol.to_string(),
            open_interest,
            ts,
        })
    }

    /// Open interest across many symbols: groups of [`OI_BATCH_SIZE`] queried
    /// concurrently, [`OI_BATCH_GAP_MS`] between groups. Per-symbol failures
    /// are logged and skipped.
    pub async fn open_interest_batch(&self, symbols: &[String]) -> Vec<OpenInterestPoint> {
        let mut points = Vec::with_capacity(symbols.len());

        for (i, group) in symbols.chunks(OI_BATCH_SIZE).enumerate() {
            if i > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(OI_BATCH_GAP_MS)).await;
            }

            let futures = group.iter().map(|sym| self.open_interest(sym));
            for (sym, result) in group.iter().zip(join_all(futures).await) {
                match result {
                    Ok(point) => points.push(point),
                    Err(e) => warn!(symbol = %sym, error = %e, "open interest fetch failed"),
                }
            }
        }

        debug!(
            requested = symbols.len(),
            fetched = points.len(),
            "open interest batch complete"
        );
        points
    }

    // -------------------------------------------------------------------------
    // Klines
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/klines — closed candles, oldest first. The trailing
    /// in-progress bar is dropped.
    ///
    /// Array indices:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
    ///   [6] closeTime, [7] quoteAssetVolume
    pub async fn klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/klines request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;

        if !status.is_success() {
            anyhow::bail!("klines returned {}: {}", status, body);
        }

        let raw = body.as_array().context("klines response is not an array")?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut candles = Vec::with_capacity(raw.len());

        for entry in raw {
            let arr = match entry.as_array() {
                Some(a) if a.len() >= 8 => a,
                _ => {
                    warn!("skipping malformed kline entry");
                    continue;
                }
            };

            let open_time = arr[0].as_i64().unwrap_or(0);
            let close_time = arr[6].as_i64().unwrap_or(0);
            // Only closed bars enter indicator math.
            if close_time > now_ms {
                continue;
            }

            let mut candle = Candle::new(
                open_time,
                parse_str_f64(&arr[1])?,
                parse_str_f64(&arr[2])?,
                parse_str_f64(&arr[3])?,
                parse_str_f64(&arr[4])?,
                parse_str_f64(&arr[5])?,
                close_time,
            );
            candle.quote_volume = parse_str_f64(&arr[7]).unwrap_or(0.0);
            candles.push(candle);
        }

        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    /// Latest Wilder RSI(14) for `symbol` at `interval`, computed from a
    /// 100-bar kline fetch. `None` when the series is too short.
    pub async fn symbol_rsi(&self, symbol: &str, interval: &str) -> Result<Option<f64>> {
        let candles = self.klines(symbol, interval, 100).await?;
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        Ok(latest_rsi(&closes, RSI_PERIOD))
    }
}

impl Default for FuturesClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuturesClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// -------------------------------------------------------------------------
// Helpers
// -------------------------------------------------------------------------

/// The exchange sends numeric values as JSON strings; accept either.
pub(crate) fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_str_f64_accepts_both_shapes() {
        assert_eq!(parse_str_f64(&serde_json::json!("37000.5")).unwrap(), 37000.5);
        assert_eq!(parse_str_f64(&serde_json::json!(42.0)).unwrap(), 42.0);
        assert!(parse_str_f64(&serde_json::json!(null)).is_err());
        assert!(parse_str_f64(&serde_json::json!("abc")).is_err());
    }

    #[test]
    fn oi_batch_constants_match_discipline() {
        assert_eq!(OI_BATCH_SIZE, 10);
        assert_eq!(OI_BATCH_GAP_MS, 100);
    }
}
