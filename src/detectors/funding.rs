// =============================================================================
// Funding Detector — perpetual funding-rate regimes
// =============================================================================
//
// Funding rates are periodic payments between long and short holders that
// anchor the perpetual to spot; their sign says who is paying whom. Reads
// are contrarian: crowded positive funding is a short setup, crowded
// negative funding a long setup.
//
// Thresholds (rate as percent):
//   |rate| > 0.1                      => Extreme (sign decides which)
//   rate < -0.05 and 24h change < -5  => Long squeeze
//   rate >  0.05 and 24h change >  5  => Short squeeze

use std::collections::HashMap;

use anyhow::Result;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::binance::FuturesClient;
use crate::clock::Clock;
use crate::market::DataStore;
use crate::types::{Direction, FundingSignal};

use super::magnitude_desc;

#[derive(Debug, Clone, Serialize)]
pub struct FundingAlert {
    pub symbol: String,
    /// Funding rate as percent (raw rate * 100).
    pub rate_pct: f64,
    pub signal: FundingSignal,
    /// Magnitude band in [0, 100]; the fusion engine's funding strength.
    pub strength: f64,
    pub change_24h: f64,
    pub next_funding_time: i64,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct FundingDetector {
    clock: Clock,
    /// Latest raw rate per symbol (percent), kept even when no alert fires.
    rates: RwLock<HashMap<String, f64>>,
    alerts: RwLock<Vec<FundingAlert>>,
}

impl FundingDetector {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            rates: RwLock::new(HashMap::new()),
            alerts: RwLock::new(Vec::new()),
        }
    }

    /// Fetch all funding rates and rebuild the alert cache. On failure the
    /// previous cache stays authoritative.
    pub async fn update(&self, client: &FuturesClient, store: &DataStore) -> Result<()> {
        let rates = client.funding_rates().await?;
        let now = self.clock.now_ms();

        let mut latest = HashMap::with_capacity(rates.len());
        let mut alerts = Vec::new();

        for rate in rates {
            let rate_pct = rate.rate * 100.0;
            latest.insert(rate.symbol.clone(), rate_pct);

            let change_24h = store
                .current(&rate.symbol)
                .map(|t| t.price_change_percent)
                .unwrap_or(0.0);

            let signal = classify(rate_pct, change_24h);
            if signal == FundingSignal::Neutral {
                continue;
            }

            alerts.push(FundingAlert {
                symbol: rate.symbol,
                rate_pct,
                signal,
                strength: strength_band(rate_pct),
                change_24h,
                next_funding_time: rate.next_funding_time,
                direction: contrarian_direction(signal),
                timestamp: now,
            });
        }

        alerts.sort_by(|a, b| {
            magnitude_desc(a.rate_pct, b.rate_pct).then_with(|| a.symbol.cmp(&b.symbol))
        });

        debug!(count = alerts.len(), "funding alerts rebuilt");
        *self.rates.write() = latest;
        *self.alerts.write() = alerts;
        Ok(())
    }

    pub fn detect(&self) -> Vec<FundingAlert> {
        self.alerts.read().clone()
    }

    /// Latest rate (percent) for a symbol, alert or not.
    pub fn rate_for(&self, symbol: &str) -> Option<f64> {
        self.rates.read().get(symbol).copied()
    }

    /// (signal, strength, direction) for the fusion engine; `None` until the
    /// symbol has been fetched at least once.
    pub fn signal_for(&self, symbol: &str) -> Option<(FundingSignal, f64, Direction)> {
        let rate_pct = self.rate_for(symbol)?;
        let alert = self.alerts.read().iter().find(|a| a.symbol == symbol).cloned();
        Some(match alert {
            Some(a) => (a.signal, a.strength, a.direction),
            None => (FundingSignal::Neutral, strength_band(rate_pct), Direction::Neutral),
        })
    }
}

fn classify(rate_pct: f64, change_24h: f64) -> FundingSignal {
    if rate_pct > 0.1 {
        FundingSignal::ExtremePositive
    } else if rate_pct < -0.1 {
        FundingSignal::ExtremeNegative
    } else if rate_pct < -0.05 && change_24h < -5.0 {
        FundingSignal::LongSqueeze
    } else if rate_pct > 0.05 && change_24h > 5.0 {
        FundingSignal::ShortSqueeze
    } else {
        FundingSignal::Neutral
    }
}

/// Contrarian: crowded longs (positive funding) read bearish and vice versa.
fn contrarian_direction(signal: FundingSignal) -> Direction {
    match signal {
        FundingSignal::ExtremePositive | FundingSignal::ShortSqueeze => Direction::Short,
        FundingSignal::ExtremeNegative | FundingSignal::LongSqueeze => Direction::Long,
        FundingSignal::Neutral => Direction::Neutral,
    }
}

/// Magnitude bands on |rate| percent.
fn strength_band(rate_pct: f64) -> f64 {
    let mag = rate_pct.abs();
    if mag >= 0.3 {
        100.0
    } else if mag >= 0.2 {
        85.0
    } else if mag >= 0.1 {
        70.0
    } else if mag >= 0.05 {
        50.0
    } else {
        25.0
    }
}
