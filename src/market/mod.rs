// =============================================================================
// Market data primitives
// =============================================================================

pub mod data_store;

pub use data_store::{DataStore, SymbolState, Ticker};

use serde::{Deserialize, Serialize};

/// A single OHLCV candle fetched from the exchange kline endpoint.
///
/// Only closed bars are returned by the REST client; the in-progress bar is
/// dropped at parse time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
}

impl Candle {
    pub fn new(
        open_time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        close_time: i64,
    ) -> Self {
        Self {
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
            quote_volume: 0.0,
        }
    }

    /// Typical price (H + L + C) / 3, the VWAP input.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Percent change over this bar.
    pub fn change_pct(&self) -> f64 {
        if self.open == 0.0 {
            0.0
        } else {
            (self.close - self.open) / self.open * 100.0
        }
    }
}
