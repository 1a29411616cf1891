// =============================================================================
// Whale Detector — outsized flow against the recent baseline
// =============================================================================
//
// Tracks the last 60 cumulative quote-volume snapshots per symbol. The flow
// over the 10 most recent snapshots is compared against the per-point rate
// of the 20 snapshots before them; a burst of at least $100K at 3x the
// baseline rate is whale-sized. The concurrent price move decides the label:
// above 5x it is accumulation / distribution, otherwise a large buy / sell.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;

use crate::clock::Clock;
use crate::market::DataStore;
use crate::types::Direction;

use super::magnitude_desc;

/// Snapshots retained per symbol.
const TRACKING_DEPTH: usize = 60;
/// Recent burst window (points).
const RECENT_WINDOW: usize = 10;
/// Baseline window (points).
const BASELINE_WINDOW: usize = 20;
/// Minimum burst notional.
const MIN_BURST_USD: f64 = 100_000.0;
/// Minimum burst / baseline rate ratio.
const MIN_RATIO: f64 = 3.0;
/// Ratio at which the label upgrades to accumulation / distribution.
const CAMPAIGN_RATIO: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WhaleKind {
    Accumulation,
    Distribution,
    LargeBuy,
    LargeSell,
}

#[derive(Debug, Clone, Serialize)]
pub struct WhaleAlert {
    pub symbol: String,
    /// Burst notional over the recent window.
    pub est_size: f64,
    /// Burst rate / baseline rate.
    pub ratio: f64,
    pub price_move_pct: f64,
    pub kind: WhaleKind,
    /// clamp(size * 25 / 1M + ratio * 50 / 10, 0, 100).
    pub confidence: f64,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct WhaleDetector {
    clock: Clock,
    snapshots: RwLock<HashMap<String, VecDeque<f64>>>,
}

impl WhaleDetector {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    /// Sample the current cumulative quote volume per symbol. Driven on the
    /// whale cadence.
    pub fn update(&self, store: &DataStore) {
        let mut snapshots = self.snapshots.write();
        for state in store.all_states() {
            let ring = snapshots
                .entry(state.symbol.clone())
                .or_insert_with(|| VecDeque::with_capacity(TRACKING_DEPTH + 1));
            ring.push_back(state.current.quote_volume);
            while ring.len() > TRACKING_DEPTH {
                ring.pop_front();
            }
        }
    }

    pub fn detect(&self, store: &DataStore) -> Vec<WhaleAlert> {
        let now = self.clock.now_ms();
        let snapshots = self.snapshots.read();
        let mut alerts = Vec::new();

        for (symbol, ring) in snapshots.iter() {
            let Some((burst, ratio)) = burst_metrics(ring) else {
                continue;
            };
            if burst <= MIN_BURST_USD || ratio < MIN_RATIO {
                continue;
            }

            let price_move = store
                .symbol_state(symbol)
                .and_then(|s| s.recent_move_pct(RECENT_WINDOW))
                .unwrap_or(0.0);

            let kind = classify(ratio, price_move);
            let direction = match kind {
                WhaleKind::Accumulation | WhaleKind::LargeBuy => Direction::Long,
                WhaleKind::Distribution | WhaleKind::LargeSell => Direction::Short,
            };

            alerts.push(WhaleAlert {
                symbol: symbol.clone(),
                est_size: burst,
                ratio,
                price_move_pct: price_move,
                kind,
                confidence: confidence(burst, ratio),
                direction,
                timestamp: now,
            });
        }

        alerts.sort_by(|a, b| {
            magnitude_desc(a.est_size, b.est_size).then_with(|| a.symbol.cmp(&b.symbol))
        });
        alerts
    }

    /// Whale-activity feature: the latest confidence for the symbol, zero
    /// when no whale flow is visible.
    pub fn activity_for(&self, store: &DataStore, symbol: &str) -> f64 {
        self.detect(store)
            .into_iter()
            .find(|a| a.symbol == symbol)
            .map(|a| a.confidence)
            .unwrap_or(0.0)
    }
}

/// (burst notional over recent window, burst rate / baseline rate).
fn burst_metrics(ring: &VecDeque<f64>) -> Option<(f64, f64)> {
    let len = ring.len();
    if len < RECENT_WINDOW + BASELINE_WINDOW + 1 {
        return None;
    }

    let last = *ring.get(len - 1)?;
    let recent_start = *ring.get(len - 1 - RECENT_WINDOW)?;
    let baseline_start = *ring.get(len - 1 - RECENT_WINDOW - BASELINE_WINDOW)?;

    let burst = last - recent_start;
    let recent_rate = burst / RECENT_WINDOW as f64;
    let baseline_rate = (recent_start - baseline_start) / BASELINE_WINDOW as f64;

    if baseline_rate <= 0.0 {
        return None;
    }
    let ratio = recent_rate / baseline_rate;
    ratio.is_finite().then_some((burst, ratio))
}

fn classify(ratio: f64, price_move_pct: f64) -> WhaleKind {
    if ratio > CAMPAIGN_RATIO {
        if price_move_pct >= 0.0 {
            WhaleKind::Accumulation
        } else {
            WhaleKind::Distribution
        }
    } else if price_move_pct >= 0.0 {
        WhaleKind::LargeBuy
    } else {
        WhaleKind::LargeSell
    }
}

fn confidence(size: f64, ratio: f64) -> f64 {
    (size * 25.0 / 1_000_000.0 + ratio * 50.0 / 10.0).clamp(0.0, 100.0)
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

    fn rig() -> (WhaleDetector, DataStore, Clock) {
        let clock = Clock::manual(0);
        (
            WhaleDetector::new(clock.clone()),
            DataStore::new(clock.clone(), 5, 60),
            clock,
        )
    }

    /// Baseline 10K/step for 50 snapshots, then `burst_step` for 10.
    fn feed(det: &WhaleDetector, store: &DataStore, clock: &Clock, price_step: f64, burst_step: f64) {
        let mut cumulative: f64 = 50_000_000.0;
        let mut price = 100.0;
        for i in 0..60i64 {
            cumulative += if i < 50 { 10_000.0 } else { burst_step };
            price += price_step;
            clock.advance(1_000);
            let t = ticker("AAAUSDT", price, cumulative, i + 1);
            store.update(std::slice::from_ref(&t));
            det.update(store);
        }
    }

    #[test]
    fn large_buy_on_modest_ratio() {
        let (det, store, clock) = rig();
        // 40K/step burst = 4x baseline, 400K total; price drifting up.
        feed(&det, &store, &clock, 0.05, 40_000.0);
        let alerts = det.detect(&store);
        assert_eq!(alerts.len(), 1);
        let a = &alerts[0];
        assert_eq!(a.kind, WhaleKind::LargeBuy);
        assert_eq!(a.direction, Direction::Long);
        assert!((a.ratio - 4.0).abs() < 0.2, "ratio {}", a.ratio);
        assert!(a.est_size >= 390_000.0);
    }

    #[test]
    fn accumulation_above_campaign_ratio() {
        let (det, store, clock) = rig();
        // 70K/step = 7x baseline.
        feed(&det, &store, &clock, 0.05, 70_000.0);
        let a = &det.detect(&store)[0];
        assert_eq!(a.kind, WhaleKind::Accumulation);
    }

    #[test]
    fn distribution_on_falling_price() {
        let (det, store, clock) = rig();
        feed(&det, &store, &clock, -0.05, 70_000.0);
        let a = &det.detect(&store)[0];
        assert_eq!(a.kind, WhaleKind::Distribution);
        assert_eq!(a.direction, Direction::Short);
    }

    #[test]
    fn small_burst_is_ignored() {
        let (det, store, clock) = rig();
        // 4x ratio but only 8K total burst — below the $100K floor.
        let mut cumulative: f64 = 50_000_000.0;
        for i in 0..60i64 {
            cumulative += if i < 50 { 200.0 } else { 800.0 };
            clock.advance(1_000);
            let t = ticker("AAAUSDT", 100.0, cumulative, i + 1);
            store.update(std::slice::from_ref(&t));
            det.update(&store);
        }
        assert!(det.detect(&store).is_empty());
    }

    #[test]
    fn confidence_formula() {
        // size 1M contributes 25, ratio 10 contributes 50.
        assert!((confidence(1_000_000.0, 10.0) - 75.0).abs() < 1e-9);
        assert_eq!(confidence(10_000_000.0, 20.0), 100.0);
    }
}
