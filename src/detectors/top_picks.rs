// =============================================================================
// Top Picker — composite ranking across the detector set
// =============================================================================
//
// The one detector allowed to read the others. Each detector's current
// alerts contribute a weighted score to its symbols; the picker ranks the
// composite and keeps the strongest names. The dependency is strictly
// one-way: nothing reads the picker back.

use serde::Serialize;

use crate::clock::Clock;
use crate::market::DataStore;
use crate::types::Direction;

use super::magnitude_desc;
use super::DetectorSet;

/// Picks retained per cycle.
const MAX_PICKS: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct TopPick {
    pub symbol: String,
    pub score: f64,
    pub reasons: Vec<String>,
    pub direction: Direction,
    pub last_price: f64,
    pub change_24h: f64,
    pub timestamp: i64,
}

pub struct TopPicker {
    clock: Clock,
}

impl TopPicker {
    pub fn new(clock: Clock) -> Self {
        Self { clock }
    }

    pub fn detect(&self, store: &DataStore, detectors: &DetectorSet) -> Vec<TopPick> {
        let now = self.clock.now_ms();
        let mut tallies: std::collections::HashMap<String, (f64, f64, Vec<String>)> =
            std::collections::HashMap::new();

        let mut add = |symbol: &str, score: f64, direction: Direction, reason: String| {
            let entry = tallies.entry(symbol.to_string()).or_default();
            entry.0 += score;
            entry.1 += score * direction.encoding();
            entry.2.push(reason);
        };

        for a in detectors.volatility.detect(store) {
            let pts = if a.is_critical { 30.0 } else { 20.0 };
            add(&a.symbol, pts, a.direction, format!("24h move {:+.1}%", a.change_24h));
        }
        for a in detectors.volume.detect(store) {
            add(
                &a.symbol,
                15.0_f64.min(a.multiplier * 4.0),
                a.direction,
                format!("volume {:.1}x", a.multiplier),
            );
        }
        for a in detectors.velocity.detect(store) {
            add(
                &a.symbol,
                15.0,
                a.direction,
                format!("velocity {:+.2}%/min", a.velocity),
            );
        }
        for a in detectors.whale.detect(store) {
            add(
                &a.symbol,
                10.0,
                a.direction,
                format!("whale flow ${:.0}K", a.est_size / 1_000.0),
            );
        }
        for a in detectors.multi_timeframe.detect() {
            let pts = a.alignment.encoding().abs() * 7.5;
            if pts > 0.0 {
                add(&a.symbol, pts, a.direction, format!("mtf {:?}", a.alignment));
            }
        }
        for a in detectors.funding.detect() {
            add(
                &a.symbol,
                10.0,
                a.direction,
                format!("funding {:+.3}%", a.rate_pct),
            );
        }
        for a in detectors.pattern.detect() {
            add(
                &a.symbol,
                a.confidence / 10.0,
                a.direction,
                format!("pattern {:?}", a.kind),
            );
        }
        for a in detectors.range.detect(store) {
            add(
                &a.symbol,
                5.0,
                a.direction,
                format!("range {:.1}%", a.range_pct),
            );
        }

        let mut picks: Vec<TopPick> = tallies
            .into_iter()
            .filter_map(|(symbol, (score, directional, reasons))| {
                let ticker = store.current(&symbol)?;
                Some(TopPick {
                    symbol,
                    score,
                    reasons,
                    direction: Direction::from_sign(directional),
                    last_price: ticker.last_price,
                    change_24h: ticker.price_change_percent,
                    timestamp: now,
                })
            })
            .collect();

        picks.sort_by(|a, b| {
            magnitude_desc(a.score, b.score).then_with(|| a.symbol.cmp(&b.symbol))
        });
        picks.truncate(MAX_PICKS);
        picks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RadarConfig;
    use crate::market::Ticker;

    fn ticker(symbol: &str, pct: f64, qv: f64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: 100.0,
            price_change: 0.0,
            price_change_percent: pct,
            open_price: 100.0,
            high_price: 100.0,
            low_price: 100.0,
            volume: 0.0,
            quote_volume: qv,
            trade_count: 0,
            event_time: 1,
        }
    }

    #[test]
    fn volatile_symbols_rank_first() {
        let clock = Clock::manual(0);
        let store = DataStore::new(clock.clone(), 5, 60);
        let detectors = DetectorSet::new(&RadarConfig::default(), clock.clone());

        store.update(&[
            ticker("CALMUSDT", 1.0, 5e6),
            ticker("WILDUSDT", 28.0, 5e7),
            ticker("WARMUSDT", 12.0, 2e7),
        ]);

        let picks = detectors.top_picker.detect(&store, &detectors);
        assert!(picks.len() >= 2);
        assert_eq!(picks[0].symbol, "WILDUSDT");
        assert_eq!(picks[0].direction, Direction::Long);
        assert!(picks[0].score > picks[1].score);
        assert!(picks.iter().all(|p| p.symbol != "CALMUSDT"));
        assert!(!picks[0].reasons.is_empty());
    }

    #[test]
    fn empty_store_yields_no_picks() {
        let clock = Clock::manual(0);
        let store = DataStore::new(clock.clone(), 5, 60);
        let detectors = DetectorSet::new(&RadarConfig::default(), clock);
        assert!(detectors.top_picker.detect(&store, &detectors).is_empty());
    }
}
