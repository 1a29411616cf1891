// =============================================================================
// Liquidation Detector — inferred forced-liquidation pressure
// =============================================================================
//
// There is no liquidation feed here: estimates are inferred from public
// ticker movement and volume, and are approximate by construction. A sharp
// move on heavy volume implies forced closures at roughly
//   notional = 24h quote volume * |move %| / 100 * 0.3
// Events accumulate per symbol over a five-minute window and the window
// total sets the intensity band.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;

use crate::clock::Clock;
use crate::market::DataStore;
use crate::types::Direction;

use super::magnitude_desc;

/// Price-history points the move is measured over.
const MOVE_POINTS: usize = 10;
/// Minimum |move| percent to infer liquidations.
const MIN_MOVE_PCT: f64 = 1.0;
/// Minimum 24h quote volume.
const MIN_VOLUME: f64 = 5_000_000.0;
/// Estimated share of the implied flow that was forced.
const LIQUIDATION_SHARE: f64 = 0.3;
/// Accumulation window.
const WINDOW_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiquidationIntensity {
    Extreme,
    High,
    Medium,
    Low,
}

impl LiquidationIntensity {
    fn from_total(total: f64) -> Self {
        if total >= 5_000_000.0 {
            Self::Extreme
        } else if total >= 1_000_000.0 {
            Self::High
        } else if total >= 500_000.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LiquidationAlert {
    pub symbol: String,
    /// Estimated notional forced over the window.
    pub window_total: f64,
    /// Latest single-event estimate.
    pub last_event: f64,
    pub move_pct: f64,
    pub intensity: LiquidationIntensity,
    /// Sign of the move: a down move liquidates longs and reads short.
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct LiquidationDetector {
    clock: Clock,
    /// (estimated notional, signed move %, ts) events per symbol.
    events: RwLock<HashMap<String, VecDeque<(f64, f64, i64)>>>,
}

impl LiquidationDetector {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            events: RwLock::new(HashMap::new()),
        }
    }

    /// Scan for new implied liquidation events. Driven on a fast cadence.
    pub fn update(&self, store: &DataStore) {
        let now = self.clock.now_ms();
        let mut events = self.events.write();

        for state in store.all_states() {
            let Some(move_pct) = state.recent_move_pct(MOVE_POINTS) else {
                continue;
            };
            if move_pct.abs() <= MIN_MOVE_PCT || state.current.quote_volume <= MIN_VOLUME {
                continue;
            }

            let notional =
                state.current.quote_volume * (move_pct.abs() / 100.0) * LIQUIDATION_SHARE;

            let ring = events.entry(state.symbol.clone()).or_default();
            // One event per timestamp; a rescan in the same window tick
            // replaces rather than double-counts.
            if ring.back().map(|&(_, _, ts)| ts) == Some(now) {
                ring.pop_back();
            }
            ring.push_back((notional, move_pct, now));
        }

        // Expire events beyond the window.
        for ring in events.values_mut() {
            while let Some(&(_, _, ts)) = ring.front() {
                if now - ts <= WINDOW_MS {
                    break;
                }
                ring.pop_front();
            }
        }
        events.retain(|_, ring| !ring.is_empty());
    }

    pub fn detect(&self) -> Vec<LiquidationAlert> {
        let now = self.clock.now_ms();
        let events = self.events.read();
        let mut alerts = Vec::new();

        for (symbol, ring) in events.iter() {
            let in_window: Vec<&(f64, f64, i64)> =
                ring.iter().filter(|&&(_, _, ts)| now - ts <= WINDOW_MS).collect();
            let Some(&&(last_event, move_pct, _)) = in_window.last() else {
                continue;
            };
            let window_total: f64 = in_window.iter().map(|&&(n, _, _)| n).sum();

            alerts.push(LiquidationAlert {
                symbol: symbol.clone(),
                window_total,
                last_event,
                move_pct,
                intensity: LiquidationIntensity::from_total(window_total),
                direction: Direction::from_sign(move_pct),
                timestamp: now,
            });
        }

        alerts.sort_by(|a, b| {
            magnitude_desc(a.window_total, b.window_total).then_with(|| a.symbol.cmp(&b.symbol))
        });
        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Ticker;

    fn ticker(symbol: &str, price: f64, qv: f64, event_time: i64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: price,
            price_change: 0.0,
            price_change_percent: 0.0,
            open_price: price,
            high_price: price,
            low_price: price,
            volume: 0.0,
            quote_volume: qv,
            trade_count: 0,
            event_time,
        }
    }

    fn rig() -> (LiquidationDetector, DataStore, Clock) {
        let clock = Clock::manual(0);
        (
            LiquidationDetector::new(clock.clone()),
            DataStore::new(clock.clone(), 5, 60),
            clock,
        )
    }

    #[test]
    fn sharp_drop_on_heavy_volume_is_detected() {
        let (det, store, clock) = rig();
        // Build a 10-point history falling 2%.
        for i in 0..10i64 {
            clock.advance(1_000);
            let price = 100.0 - 0.2 * i as f64;
            store.update(&[ticker("AAAUSDT", price, 10_000_000.0, i + 1)]);
        }
        det.update(&store);

        let alerts = det.detect();
        assert_eq!(alerts.len(), 1);
        let a = &alerts[0];
        assert_eq!(a.direction, Direction::Short);
        // ~1.8% move on 10M volume * 0.3 => ~54K.
        assert!(a.window_total > 40_000.0 && a.window_total < 70_000.0, "{}", a.window_total);
        assert_eq!(a.intensity, LiquidationIntensity::Low);
    }

    #[test]
    fn small_move_or_thin_volume_is_ignored() {
        let (det, store, clock) = rig();
        for i in 0..10i64 {
            clock.advance(1_000);
            // 0.5% total move — under the floor.
            store.update(&[ticker("AAAUSDT", 100.0 - 0.005 * i as f64, 10_000_000.0, i + 1)]);
            // Big move but 1M volume — under the floor.
            store.update(&[ticker("BBBUSDT", 100.0 - 0.3 * i as f64, 1_000_000.0, i + 1)]);
        }
        det.update(&store);
        assert!(det.detect().is_empty());
    }

    #[test]
    fn window_expiry_drops_old_events() {
        let (det, store, clock) = rig();
        for i in 0..10i64 {
            clock.advance(1_000);
            store.update(&[ticker("AAAUSDT", 100.0 - 0.2 * i as f64, 10_000_000.0, i + 1)]);
        }
        det.update(&store);
        assert_eq!(det.detect().len(), 1);

        // Advance past the window; the fresh update trims the price history
        // to a single point, so no new event forms and the old one expires.
        clock.advance(WINDOW_MS + 1_000);
        store.update(&[ticker("AAAUSDT", 98.2, 10_000_000.0, 100)]);
        det.update(&store);
        assert!(det.detect().is_empty());
    }

    #[test]
    fn intensity_bands() {
        assert_eq!(LiquidationIntensity::from_total(6e6), LiquidationIntensity::Extreme);
        assert_eq!(LiquidationIntensity::from_total(2e6), LiquidationIntensity::High);
        assert_eq!(LiquidationIntensity::from_total(6e5), LiquidationIntensity::Medium);
        assert_eq!(LiquidationIntensity::from_total(1e5), LiquidationIntensity::Low);
    }
}
