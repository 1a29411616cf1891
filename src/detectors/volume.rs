// =============================================================================
// Volume Detector — flow-rate spikes from cumulative 24h volume
// =============================================================================
//
// The exchange reports cumulative 24h quote volume, so consecutive snapshot
// deltas approximate flow rate. That proxy is inexact near the UTC-midnight
// rollover when the 24h window slides past its own start.
//
// Per symbol the detector keeps the last 60 snapshots. The spike test
// compares the per-step rate over the 10 most recent snapshots against the
// rate over the 20 snapshots before them.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;

use crate::clock::Clock;
use crate::config::VolumeConfig;
use crate::market::{DataStore, Ticker};
use crate::types::Direction;

use super::magnitude_desc;

/// Snapshots retained per symbol.
const TRACKING_DEPTH: usize = 60;
/// Recent window length.
const RECENT_WINDOW: usize = 10;
/// Baseline window length (immediately preceding the recent window).
const BASELINE_WINDOW: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct VolumeAlert {
    pub symbol: String,
    /// recentRate / avgRate.
    pub multiplier: f64,
    pub recent_rate: f64,
    pub avg_rate: f64,
    pub quote_volume_24h: f64,
    pub change_24h: f64,
    pub direction: Direction,
    pub last_price: f64,
    pub timestamp: i64,
}

pub struct VolumeDetector {
    spike_multiplier: f64,
    min_quote_volume: f64,
    clock: Clock,
    snapshots: RwLock<HashMap<String, VecDeque<f64>>>,
}

impl VolumeDetector {
    pub fn new(config: &VolumeConfig, clock: Clock) -> Self {
        Self {
            spike_multiplier: config.spike_multiplier,
            min_quote_volume: config.min_quote_volume,
            clock,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    /// Record one cumulative-volume snapshot per ticker. Driven by the
    /// scheduler on every ingested batch.
    pub fn update_volume_tracking(&self, batch: &[Ticker]) {
        let mut snapshots = self.snapshots.write();
        for ticker in batch {
            let ring = snapshots
                .entry(ticker.symbol.clone())
                .or_insert_with(|| VecDeque::with_capacity(TRACKING_DEPTH + 1));
            ring.push_back(ticker.quote_volume);
            while ring.len() > TRACKING_DEPTH {
                ring.pop_front();
            }
        }
    }

    pub fn detect(&self, store: &DataStore) -> Vec<VolumeAlert> {
        let now = self.clock.now_ms();
        let snapshots = self.snapshots.read();
        let mut alerts = Vec::new();

        for (symbol, ring) in snapshots.iter() {
            let Some((multiplier, recent_rate, avg_rate)) = spike_ratio(ring) else {
                continue;
            };
            if multiplier < self.spike_multiplier {
                continue;
            }

            let Some(ticker) = store.current(symbol) else {
                continue;
            };
            // The floor is strict: a symbol exactly at it is excluded.
            if ticker.quote_volume <= self.min_quote_volume {
                continue;
            }

            alerts.push(VolumeAlert {
                symbol: symbol.clone(),
                multiplier,
                recent_rate,
                avg_rate,
                quote_volume_24h: ticker.quote_volume,
                change_24h: ticker.price_change_percent,
                direction: Direction::from_sign(ticker.price_change_percent),
                last_price: ticker.last_price,
                timestamp: now,
            });
        }

        alerts.sort_by(|a, b| {
            magnitude_desc(a.multiplier, b.multiplier).then_with(|| a.symbol.cmp(&b.symbol))
        });
        alerts
    }

    /// Latest spike multiplier for a symbol, for the fusion engine. `None`
    /// when tracking is too shallow.
    pub fn multiplier_for(&self, symbol: &str) -> Option<f64> {
        let snapshots = self.snapshots.read();
        let ring = snapshots.get(symbol)?;
        spike_ratio(ring).map(|(m, _, _)| m)
    }

}

/// (multiplier, recentRate, avgRate) from a cumulative-volume ring, or
/// `None` when the ring is shallower than both windows or the baseline is
/// flat.
fn spike_ratio(ring: &VecDeque<f64>) -> Option<(f64, f64, f64)> {
    let len = ring.len();
    if len < RECENT_WINDOW + BASELINE_WINDOW + 1 {
        return None;
    }

    let last = *ring.get(len - 1)?;
    let recent_start = *ring.get(len - 1 - RECENT_WINDOW)?;
    let baseline_start = *ring.get(len - 1 - RECENT_WINDOW - BASELINE_WINDOW)?;

    let recent_rate = (last - recent_start) / RECENT_WINDOW as f64;
    let avg_rate = (recent_start - baseline_start) / BASELINE_WINDOW as f64;

    if avg_rate <= 0.0 {
        return None;
    }
    let multiplier = recent_rate / avg_rate;
    multiplier.is_finite().then_some((multiplier, recent_rate, avg_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, qv: f64, pct: f64, event_time: i64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: 1.0,
            price_change: 0.0,
            price_change_percent: pct,
            open_price: 1.0,
            high_price: 1.0,
            low_price: 1.0,
            volume: 0.0,
            quote_volume: qv,
            trade_count: 0,
            event_time,
        }
    }

    fn rig() -> (VolumeDetector, DataStore, Clock) {
        let clock = Clock::manual(0);
        (
            VolumeDetector::new(&crate::config::VolumeConfig::default(), clock.clone()),
            DataStore::new(clock.clone(), 5, 60),
            clock,
        )
    }

    /// Feed 60 snapshots: +100/step for the first 50, +400/step for the
    /// last 10. Base keeps total volume above the 1M floor.
    fn feed_spike(det: &VolumeDetector, store: &DataStore, clock: &Clock, symbol: &str) {
        let mut cumulative = 2_000_000.0;
        for i in 0..60i64 {
            cumulative += if i < 50 { 100.0 } else { 400.0 };
            clock.advance(1_000);
            let t = ticker(symbol, cumulative, 2.5, i + 1);
            store.update(std::slice::from_ref(&t));
            det.update_volume_tracking(std::slice::from_ref(&t));
        }
    }

    #[test]
    fn four_x_step_change_yields_multiplier_near_four() {
        let (det, store, clock) = rig();
        feed_spike(&det, &store, &clock, "BBBUSDT");

        let alerts = det.detect(&store);
        assert_eq!(alerts.len(), 1);
        let a = &alerts[0];
        assert_eq!(a.symbol, "BBBUSDT");
        assert!((a.multiplier - 4.0).abs() < 0.05, "multiplier {}", a.multiplier);
        assert_eq!(a.direction, Direction::Long);
    }

    #[test]
    fn steady_flow_is_silent() {
        let (det, store, clock) = rig();
        let mut cumulative = 2_000_000.0;
        for i in 0..60i64 {
            cumulative += 100.0;
            clock.advance(1_000);
            let t = ticker("BBBUSDT", cumulative, 1.0, i + 1);
            store.update(std::slice::from_ref(&t));
            det.update_volume_tracking(std::slice::from_ref(&t));
        }
        assert!(det.detect(&store).is_empty());
    }

    #[test]
    fn quote_volume_floor_is_strict() {
        let (det, store, clock) = rig();
        // Spike pattern but cumulative volume lands exactly on the floor.
        let mut cumulative = 1_000_000.0 - 9_000.0;
        for i in 0..60i64 {
            cumulative += if i < 50 { 100.0 } else { 400.0 };
            clock.advance(1_000);
            let t = ticker("CCCUSDT", cumulative, 2.5, i + 1);
            store.update(std::slice::from_ref(&t));
            det.update_volume_tracking(std::slice::from_ref(&t));
        }
        assert_eq!(cumulative, 1_000_000.0);
        assert!(det.detect(&store).is_empty(), "volume equal to the floor must be excluded");
    }

    #[test]
    fn shallow_tracking_yields_nothing() {
        let (det, store, clock) = rig();
        let mut cumulative = 2_000_000.0;
        for i in 0..20i64 {
            cumulative += 400.0;
            clock.advance(1_000);
            let t = ticker("BBBUSDT", cumulative, 2.5, i + 1);
            store.update(std::slice::from_ref(&t));
            det.update_volume_tracking(std::slice::from_ref(&t));
        }
        assert!(det.detect(&store).is_empty());
        assert!(det.multiplier_for("BBBUSDT").is_none());
    }

    #[test]
    fn multiplier_accessor_matches_alert() {
        let (det, store, clock) = rig();
        feed_spike(&det, &store, &clock, "BBBUSDT");
        let alert = &det.detect(&store)[0];
        let m = det.multiplier_for("BBBUSDT").unwrap();
        assert!((m - alert.multiplier).abs() < 1e-12);
    }
}
