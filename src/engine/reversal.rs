// =============================================================================
// Reversal Engine — additive exhaustion triggers
// =============================================================================
//
// Independent of the fusion path: each trigger that fires adds 15–25 points
// of confidence, and the first trigger to fire fixes the direction. At most
// one reversal per symbol per cycle; the latest wins.
//
// Triggers:
//   RSI extreme        (1h RSI <= 25 or >= 75)            +25
//   RSI divergence     (cross-timeframe divergence)       +20
//   Extreme funding    (|rate| past the extreme band)     +20
//   OI unwind          (ClosingPositions on a real move)  +15
//   Volume climax      (>= 4x spike into a stretched 24h) +15

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use crate::clock::Clock;
use crate::detectors::DetectorSet;
use crate::market::DataStore;
use crate::types::{Direction, DivergenceType, FundingSignal, OiSignal};

const RSI_EXTREME_LOW: f64 = 25.0;
const RSI_EXTREME_HIGH: f64 = 75.0;
/// |24h %| that counts as a real move for the OI unwind trigger.
const UNWIND_MOVE_PCT: f64 = 2.0;
/// Spike multiplier for the volume climax trigger.
const CLIMAX_MULTIPLIER: f64 = 4.0;
/// |24h %| that counts as stretched for the climax trigger.
const CLIMAX_MOVE_PCT: f64 = 10.0;

#[derive(Debug, Clone, Serialize)]
pub struct ReversalSignal {
    pub symbol: String,
    pub direction: Direction,
    pub confidence: f64,
    pub triggers: Vec<String>,
    pub price: f64,
    pub timestamp: i64,
}

pub struct ReversalEngine {
    clock: Clock,
    latest: RwLock<HashMap<String, ReversalSignal>>,
}

impl ReversalEngine {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Evaluate the triggers for one symbol; retains and returns the signal
    /// when at least one fired, clears the symbol's entry otherwise.
    pub fn analyze_symbol(
        &self,
        symbol: &str,
        store: &DataStore,
        detectors: &DetectorSet,
    ) -> Option<ReversalSignal> {
        let ticker = store.current(symbol)?;
        let change_24h = ticker.price_change_percent;

        let mut direction = Direction::Neutral;
        let mut confidence = 0.0;
        let mut triggers = Vec::new();

        let mut fire = |dir: Direction, points: f64, label: String| {
            if direction == Direction::Neutral {
                direction = dir;
            }
            confidence += points;
            triggers.push(label);
        };

        // ── RSI extreme / divergence ────────────────────────────────────
        if let Some(mtf) = detectors.multi_timeframe.analysis_for(symbol) {
            if let Some(rsi) = mtf.rsi_1h {
                if rsi <= RSI_EXTREME_LOW {
                    fire(Direction::Long, 25.0, format!("1h RSI oversold ({rsi:.0})"));
                } else if rsi >= RSI_EXTREME_HIGH {
                    fire(Direction::Short, 25.0, format!("1h RSI overbought ({rsi:.0})"));
                }
            }
            match mtf.divergence {
                DivergenceType::Bullish => {
                    fire(Direction::Long, 20.0, "bullish timeframe divergence".to_string());
                }
                DivergenceType::Bearish => {
                    fire(Direction::Short, 20.0, "bearish timeframe divergence".to_string());
                }
                DivergenceType::None => {}
            }
        }

        // ── Extreme funding (contrarian) ────────────────────────────────
        if let Some((signal, _, fdir)) = detectors.funding.signal_for(symbol) {
            if matches!(
                signal,
                FundingSignal::ExtremePositive | FundingSignal::ExtremeNegative
            ) {
                fire(fdir, 20.0, format!("extreme funding {signal:?}"));
            }
        }

        // ── OI unwind against a real move ───────────────────────────────
        if let Some((OiSignal::ClosingPositions, _, _)) =
            detectors.open_interest.signal_for(symbol)
        {
            if change_24h.abs() > UNWIND_MOVE_PCT {
                // Positions closing into a move fade it.
                fire(
                    Direction::from_sign(-change_24h),
                    15.0,
                    "open interest unwinding".to_string(),
                );
            }
        }

        // ── Volume climax ───────────────────────────────────────────────
        if let Some(multiplier) = detectors.volume.multiplier_for(symbol) {
            if multiplier >= CLIMAX_MULTIPLIER && change_24h.abs() >= CLIMAX_MOVE_PCT {
                fire(
                    Direction::from_sign(-change_24h),
                    15.0,
                    format!("volume climax {multiplier:.1}x"),
                );
            }
        }

        if triggers.is_empty() || direction == Direction::Neutral {
            self.latest.write().remove(symbol);
            return None;
        }

        let signal = ReversalSignal {
            symbol: symbol.to_string(),
            direction,
            confidence: confidence.min(100.0),
            triggers,
            price: ticker.last_price,
            timestamp: self.clock.now_ms(),
        };
        self.latest.write().insert(symbol.to_string(), signal.clone());
        Some(signal)
    }

    /// Current reversal signals, highest confidence first.
    pub fn reversal_signals(&self, limit: usize) -> Vec<ReversalSignal> {
        let mut out: Vec<ReversalSignal> = self.latest.read().values().cloned().collect();
        out.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        out.truncate(limit);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RadarConfig;
    use crate::detectors::DetectorSet;
    use crate::market::{DataStore, Ticker};

    fn ticker(symbol: &str, pct: f64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: 100.0,
            price_change: 0.0,
            price_change_percent: pct,
            open_price: 100.0,
            high_price: 100.0,
            low_price: 100.0,
            volume: 0.0,
            quote_volume: 2e7,
            trade_count: 0,
            event_time: 1,
        }
    }

    #[test]
    fn no_triggers_means_no_signal() {
        let clock = Clock::manual(0);
        let store = DataStore::new(clock.clone(), 5, 60);
        let detectors = DetectorSet::new(&RadarConfig::default(), clock.clone());
        let engine = ReversalEngine::new(clock);

        store.update(&[ticker("AAAUSDT", 1.0)]);
        assert!(engine.analyze_symbol("AAAUSDT", &store, &detectors).is_none());
        assert!(engine.reversal_signals(10).is_empty());
    }

    #[test]
    fn climax_trigger_fades_the_move() {
        let clock = Clock::manual(0);
        let store = DataStore::new(clock.clone(), 5, 60);
        let detectors = DetectorSet::new(&RadarConfig::default(), clock.clone());
        let engine = ReversalEngine::new(clock.clone());

        // 31 volume snapshots with a 5x burst in the last 10 on a +12% day.
        let mut cumulative = 5_000_000.0;
        for i in 0..40i64 {
            cumulative += if i < 30 { 1_000.0 } else { 5_000.0 };
            clock.advance(1_000);
            let t = Ticker {
                quote_volume: cumulative,
                event_time: i + 1,
                ..ticker("AAAUSDT", 12.0)
            };
            store.update(std::slice::from_ref(&t));
            detectors.volume.update_volume_tracking(std::slice::from_ref(&t));
        }

        let signal = engine
            .analyze_symbol("AAAUSDT", &store, &detectors)
            .expect("climax should fire");
        assert_eq!(signal.direction, Direction::Short);
        assert!((signal.confidence - 15.0).abs() < 1e-9);
        assert_eq!(signal.triggers.len(), 1);
        assert_eq!(engine.reversal_signals(10).len(), 1);

        // A calm re-read clears the retained signal.
        let calm = ticker("AAAUSDT", 1.0);
        clock.advance(1_000);
        let mut t = calm.clone();
        t.event_time = 100;
        t.quote_volume = cumulative + 1_000.0;
        store.update(std::slice::from_ref(&t));
        for i in 0..40i64 {
            clock.advance(1_000);
            let mut t2 = calm.clone();
            t2.event_time = 101 + i;
            t2.quote_volume = cumulative + 2_000.0 + 1_000.0 * i as f64;
            store.update(std::slice::from_ref(&t2));
            detectors.volume.update_volume_tracking(std::slice::from_ref(&t2));
        }
        assert!(engine.analyze_symbol("AAAUSDT", &store, &detectors).is_none());
        assert!(engine.reversal_signals(10).is_empty());
    }
}
