// =============================================================================
// Velocity Detector — short-window price speed
// =============================================================================
//
// v = percent change across the retained price window / elapsed minutes.
// Needs at least two history points; symbols with shorter histories emit
// nothing. The trend label compares |v| against the previous call's |v|
// using the acceleration threshold.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use crate::clock::Clock;
use crate::config::VelocityConfig;
use crate::market::DataStore;
use crate::types::{Direction, TrendState};

use super::magnitude_desc;

#[derive(Debug, Clone, Serialize)]
pub struct VelocityAlert {
    pub symbol: String,
    /// Percent per minute, signed.
    pub velocity: f64,
    /// Percent change across the window.
    pub change_pct: f64,
    pub window_minutes: f64,
    pub trend: TrendState,
    pub direction: Direction,
    pub last_price: f64,
    pub timestamp: i64,
}

pub struct VelocityDetector {
    min_velocity: f64,
    accel_threshold: f64,
    clock: Clock,
    /// Previous |v| per symbol, for the trend classification.
    previous: RwLock<HashMap<String, f64>>,
}

impl VelocityDetector {
    pub fn new(config: &VelocityConfig, clock: Clock) -> Self {
        Self {
            min_velocity: config.min_velocity,
            accel_threshold: config.acceleration_threshold,
            clock,
            previous: RwLock::new(HashMap::new()),
        }
    }

    pub fn detect(&self, store: &DataStore) -> Vec<VelocityAlert> {
        let now = self.clock.now_ms();
        let mut alerts = Vec::new();

        for state in store.all_states() {
            let Some((velocity, change_pct, minutes)) = window_velocity(&state.price_history)
            else {
                continue;
            };

            if velocity.abs() < self.min_velocity {
                // Still update the memory so the trend label is continuous.
                self.previous.write().insert(state.symbol.clone(), velocity);
                continue;
            }

            let trend = {
                let mut prev = self.previous.write();
                let label = match prev.get(&state.symbol) {
                    Some(&p) => {
                        let delta = velocity.abs() - p.abs();
                        if delta > self.accel_threshold {
                            TrendState::Accelerating
                        } else if delta < -self.accel_threshold {
                            TrendState::Decelerating
                        } else {
                            TrendState::Steady
                        }
                    }
                    None => TrendState::Steady,
                };
                prev.insert(state.symbol.clone(), velocity);
                label
            };

            alerts.push(VelocityAlert {
                symbol: state.symbol.clone(),
                velocity,
                change_pct,
                window_minutes: minutes,
                trend,
                direction: Direction::from_sign(velocity),
                last_price: state.current.last_price,
                timestamp: now,
            });
        }

        alerts.sort_by(|a, b| {
            magnitude_desc(a.velocity, b.velocity).then_with(|| a.symbol.cmp(&b.symbol))
        });
        alerts
    }

    /// Latest velocity and |v| delta against the previous observation, for
    /// the feature vector. `None` when the history is too short.
    pub fn velocity_for(&self, store: &DataStore, symbol: &str) -> Option<(f64, f64)> {
        let state = store.symbol_state(symbol)?;
        let (velocity, _, _) = window_velocity(&state.price_history)?;
        let accel = self
            .previous
            .read()
            .get(symbol)
            .map(|p| velocity.abs() - p.abs())
            .unwrap_or(0.0);
        Some((velocity, accel))
    }
}

/// (velocity %/min, window change %, elapsed minutes), or `None` with fewer
/// than two points or a degenerate span.
fn window_velocity(history: &std::collections::VecDeque<(f64, i64)>) -> Option<(f64, f64, f64)> {
    if history.len() < 2 {
        return None;
    }
    let (first_price, first_ts) = *history.front()?;
    let (last_price, last_ts) = *history.back()?;
    if first_price == 0.0 || last_ts <= first_ts {
        return None;
    }

    let change_pct = (last_price - first_price) / first_price * 100.0;
    let minutes = (last_ts - first_ts) as f64 / 60_000.0;
    let velocity = change_pct / minutes;
    velocity.is_finite().then_some((velocity, change_pct, minutes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Ticker;

    fn ticker(symbol: &str, price: f64, event_time: i64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: price,
            price_change: 0.0,
            price_change_percent: 0.0,
            open_price: price,
            high_price: price,
            low_price: price,
            volume: 0.0,
            quote_volume: 1e6,
            trade_count: 0,
            event_time,
        }
    }

    fn rig() -> (VelocityDetector, DataStore, Clock) {
        let clock = Clock::manual(0);
        (
            VelocityDetector::new(&crate::config::VelocityConfig::default(), clock.clone()),
            DataStore::new(clock.clone(), 5, 60),
            clock,
        )
    }

    #[test]
    fn single_point_emits_nothing() {
        let (det, store, _clock) = rig();
        store.update(&[ticker("AAAUSDT", 100.0, 1)]);
        assert!(det.detect(&store).is_empty());
    }

    #[test]
    fn fast_move_emits_with_direction() {
        let (det, store, clock) = rig();
        // +2% in 2 minutes = 1 %/min, above the 0.5 floor.
        store.update(&[ticker("AAAUSDT", 100.0, 1)]);
        clock.advance(120_000);
        store.update(&[ticker("AAAUSDT", 102.0, 2)]);

        let alerts = det.detect(&store);
        assert_eq!(alerts.len(), 1);
        let a = &alerts[0];
        assert!((a.velocity - 1.0).abs() < 1e-9);
        assert_eq!(a.direction, Direction::Long);
        assert_eq!(a.trend, TrendState::Steady);
    }

    #[test]
    fn slow_drift_is_silent() {
        let (det, store, clock) = rig();
        // +0.4% over 4 minutes = 0.1 %/min.
        store.update(&[ticker("AAAUSDT", 100.0, 1)]);
        clock.advance(240_000);
        store.update(&[ticker("AAAUSDT", 100.4, 2)]);
        assert!(det.detect(&store).is_empty());
    }

    #[test]
    fn acceleration_labels_against_previous_call() {
        let (det, store, clock) = rig();
        store.update(&[ticker("AAAUSDT", 100.0, 1)]);
        clock.advance(120_000);
        store.update(&[ticker("AAAUSDT", 102.0, 2)]);
        assert_eq!(det.detect(&store)[0].trend, TrendState::Steady);

        // Same window now shows a much faster move.
        clock.advance(60_000);
        store.update(&[ticker("AAAUSDT", 108.0, 3)]);
        let alerts = det.detect(&store);
        assert_eq!(alerts[0].trend, TrendState::Accelerating);

        // And a later reading that cools off decelerates.
        clock.advance(60_000);
        store.update(&[ticker("AAAUSDT", 108.1, 4)]);
        let alerts = det.detect(&store);
        if let Some(a) = alerts.first() {
            assert_eq!(a.trend, TrendState::Decelerating);
        }
    }

    #[test]
    fn sorted_by_speed_magnitude() {
        let (det, store, clock) = rig();
        store.update(&[ticker("AAAUSDT", 100.0, 1), ticker("BBBUSDT", 100.0, 1)]);
        clock.advance(60_000);
        store.update(&[ticker("AAAUSDT", 101.0, 2), ticker("BBBUSDT", 97.0, 2)]);

        let alerts = det.detect(&store);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].symbol, "BBBUSDT");
        assert_eq!(alerts[0].direction, Direction::Short);
    }
}
