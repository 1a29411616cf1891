// =============================================================================
// Range Detector — wide 24h trading ranges and position within them
// =============================================================================

use serde::Serialize;

use crate::clock::Clock;
use crate::config::RangeConfig;
use crate::market::DataStore;
use crate::types::Direction;

use super::magnitude_desc;

/// Fraction of the range counted as "near" either extreme.
const NEAR_BAND: f64 = 0.2;
/// Percent distance from an extreme that counts as breaking it.
const BREAK_BAND_PCT: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RangePosition {
    Breaking,
    NearHigh,
    NearLow,
    Middle,
}

#[derive(Debug, Clone, Serialize)]
pub struct RangeAlert {
    pub symbol: String,
    /// (high - low) / open, percent.
    pub range_pct: f64,
    pub high: f64,
    pub low: f64,
    pub last_price: f64,
    pub position: RangePosition,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct RangeDetector {
    min_range: f64,
    clock: Clock,
}

impl RangeDetector {
    pub fn new(config: &RangeConfig, clock: Clock) -> Self {
        Self {
            min_range: config.min_range,
            clock,
        }
    }

    pub fn detect(&self, store: &DataStore) -> Vec<RangeAlert> {
        let now = self.clock.now_ms();
        let mut alerts = Vec::new();

        for state in store.all_states() {
            let t = &state.current;
            if t.open_price == 0.0 || t.high_price <= t.low_price {
                continue;
            }

            let range_pct = (t.high_price - t.low_price) / t.open_price * 100.0;
            if range_pct < self.min_range {
                continue;
            }

            let (position, direction) =
                classify_position(t.last_price, t.high_price, t.low_price);

            alerts.push(RangeAlert {
                symbol: state.symbol.clone(),
                range_pct,
                high: t.high_price,
                low: t.low_price,
                last_price: t.last_price,
                position,
                direction,
                timestamp: now,
            });
        }

        alerts.sort_by(|a, b| {
            magnitude_desc(a.range_pct, b.range_pct).then_with(|| a.symbol.cmp(&b.symbol))
        });
        alerts
    }

    /// Fractional position of the last price inside the 24h range, for the
    /// feature vector. 0 = at the low, 1 = at the high.
    pub fn price_position(store: &DataStore, symbol: &str) -> Option<f64> {
        let t = store.current(symbol)?;
        let span = t.high_price - t.low_price;
        if span <= 0.0 {
            return None;
        }
        Some(((t.last_price - t.low_price) / span).clamp(0.0, 1.0))
    }
}

/// Position classification. Breaking an extreme wins over the near bands.
fn classify_position(last: f64, high: f64, low: f64) -> (RangePosition, Direction) {
    let span = high - low;
    let frac = ((last - low) / span).clamp(0.0, 1.0);

    let breaking_high = high > 0.0 && (high - last).abs() / high * 100.0 <= BREAK_BAND_PCT;
    let breaking_low = low > 0.0 && (last - low).abs() / low * 100.0 <= BREAK_BAND_PCT;

    if breaking_high {
        (RangePosition::Breaking, Direction::Long)
    } else if breaking_low {
        (RangePosition::Breaking, Direction::Short)
    } else if frac >= 1.0 - NEAR_BAND {
        (RangePosition::NearHigh, Direction::Long)
    } else if frac <= NEAR_BAND {
        (RangePosition::NearLow, Direction::Short)
    } else {
        (RangePosition::Middle, Direction::Neutral)
    }
}
