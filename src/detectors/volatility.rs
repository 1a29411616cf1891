// =============================================================================
// Volatility Detector — outsized 24h moves
// =============================================================================

use serde::Serialize;

use crate::clock::Clock;
use crate::config::VolatilityConfig;
use crate::market::DataStore;
use crate::types::Direction;

use super::magnitude_desc;

#[derive(Debug, Clone, Serialize)]
pub struct VolatilityAlert {
    pub symbol: String,
    pub change_24h: f64,
    pub last_price: f64,
    pub quote_volume: f64,
    pub direction: Direction,
    /// Set at `critical_change_24h` and beyond; critical entrants fire an
    /// edge notification in the scheduler.
    pub is_critical: bool,
    pub timestamp: i64,
}

pub struct VolatilityDetector {
    min_change: f64,
    critical_change: f64,
    clock: Clock,
}

impl VolatilityDetector {
    pub fn new(config: &VolatilityConfig, clock: Clock) -> Self {
        Self {
            min_change: config.min_change_24h,
            critical_change: config.critical_change_24h,
            clock,
        }
    }

    /// One alert per symbol whose |24h %| is at or above the floor, sorted
    /// by descending magnitude, symbol as tiebreak.
    pub fn detect(&self, store: &DataStore) -> Vec<VolatilityAlert> {
        let now = self.clock.now_ms();
        let mut alerts: Vec<VolatilityAlert> = store
            .all_states()
            .into_iter()
            .filter(|s| s.current.price_change_percent.abs() >= self.min_change)
            .map(|s| {
                let change = s.current.price_change_percent;
                VolatilityAlert {
                    symbol: s.symbol.clone(),
                    change_24h: change,
                    last_price: s.current.last_price,
                    quote_volume: s.current.quote_volume,
                    direction: Direction::from_sign(change),
                    is_critical: change.abs() >= self.critical_change,
                    timestamp: now,
                }
            })
            .collect();

        alerts.sort_by(|a, b| {
            magnitude_desc(a.change_24h, b.change_24h).then_with(|| a.symbol.cmp(&b.symbol))
        });
        alerts
    }

    /// Symbols currently in the critical band, for the scheduler's set diff.
    pub fn critical_symbols(&self, store: &DataStore) -> std::collections::BTreeSet<String> {
        self.detect(store)
            .into_iter()
            .filter(|a| a.is_critical)
            .map(|a| a.symbol)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Ticker;

    fn ticker(symbol: &str, open: f64, last: f64, high: f64, low: f64, qv: f64, pct: f64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: last,
            price_change: last - open,
            price_change_percent: pct,
            open_price: open,
            high_price: high,
            low_price: low,
            volume: 0.0,
            quote_volume: qv,
            trade_count: 0,
            event_time: 1,
        }
    }

    fn detector() -> (VolatilityDetector, DataStore) {
        let clock = Clock::manual(1_000);
        (
            VolatilityDetector::new(&crate::config::VolatilityConfig::default(), clock.clone()),
            DataStore::new(clock, 5, 60),
        )
    }

    #[test]
    fn eleven_percent_move_emits_single_long_non_critical() {
        let (det, store) = detector();
        store.update(&[ticker("AAAUSDT", 100.0, 111.0, 112.0, 99.0, 2e7, 11.0)]);

        let alerts = det.detect(&store);
        assert_eq!(alerts.len(), 1);
        let a = &alerts[0];
        assert_eq!(a.symbol, "AAAUSDT");
        assert_eq!(a.direction, Direction::Long);
        assert!(!a.is_critical);
        assert_eq!(a.change_24h, 11.0);
    }

    #[test]
    fn below_floor_is_silent() {
        let (det, store) = detector();
        store.update(&[ticker("AAAUSDT", 100.0, 105.0, 106.0, 99.0, 2e7, 5.0)]);
        assert!(det.detect(&store).is_empty());
    }

    #[test]
    fn critical_band_and_direction() {
        let (det, store) = detector();
        store.update(&[
            ticker("AAAUSDT", 100.0, 70.0, 101.0, 69.0, 2e7, -30.0),
            ticker("BBBUSDT", 100.0, 112.0, 113.0, 99.0, 2e7, 12.0),
        ]);

        let alerts = det.detect(&store);
        assert_eq!(alerts.len(), 2);
        // Sorted by |change| descending.
        assert_eq!(alerts[0].symbol, "AAAUSDT");
        assert!(alerts[0].is_critical);
        assert_eq!(alerts[0].direction, Direction::Short);
        assert!(!alerts[1].is_critical);

        let critical = det.critical_symbols(&store);
        assert!(critical.contains("AAAUSDT"));
        assert!(!critical.contains("BBBUSDT"));
    }

    #[test]
    fn equal_magnitude_ties_break_by_symbol() {
        let (det, store) = detector();
        store.update(&[
            ticker("ZZZUSDT", 100.0, 111.0, 112.0, 99.0, 1e6, 11.0),
            ticker("AAAUSDT", 100.0, 89.0, 101.0, 88.0, 1e6, -11.0),
        ]);
        let alerts = det.detect(&store);
        assert_eq!(alerts[0].symbol, "AAAUSDT");
        assert_eq!(alerts[1].symbol, "ZZZUSDT");
    }
}
