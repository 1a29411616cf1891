// =============================================================================
// New Listing Detector — first-hour tracking of freshly listed symbols
// =============================================================================
//
// The data store reports first-sight symbols after its seeding batch; this
// detector pins their first observed price and reports drift from it while
// the symbol is still inside its new-listing hour.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use crate::clock::Clock;
use crate::market::DataStore;
use crate::types::Direction;

use super::magnitude_desc;

#[derive(Debug, Clone, Serialize)]
pub struct NewListingAlert {
    pub symbol: String,
    pub first_price: f64,
    pub current_price: f64,
    pub change_from_first_pct: f64,
    pub first_seen_ms: i64,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct NewListingDetector {
    clock: Clock,
    first_prices: RwLock<HashMap<String, f64>>,
}

impl NewListingDetector {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            first_prices: RwLock::new(HashMap::new()),
        }
    }

    /// Pin the first observed price of a newly listed symbol. Driven by the
    /// scheduler from the ingest path's `newListings` output.
    pub fn record_listing(&self, symbol: &str, first_price: f64) {
        self.first_prices
            .write()
            .entry(symbol.to_string())
            .or_insert(first_price);
    }

    pub fn detect(&self, store: &DataStore) -> Vec<NewListingAlert> {
        let now = self.clock.now_ms();
        let first_prices = self.first_prices.read();
        let mut alerts = Vec::new();

        for (symbol, &first_price) in first_prices.iter() {
            let Some(state) = store.symbol_state(symbol) else {
                continue;
            };
            if !state.is_new || first_price == 0.0 {
                continue;
            }

            let current_price = state.current.last_price;
            let change = (current_price - first_price) / first_price * 100.0;

            alerts.push(NewListingAlert {
                symbol: symbol.clone(),
                first_price,
                current_price,
                change_from_first_pct: change,
                first_seen_ms: state.first_seen_ms,
                direction: Direction::from_sign(change),
                timestamp: now,
            });
        }

        alerts.sort_by(|a, b| {
            magnitude_desc(a.change_from_first_pct, b.change_from_first_pct)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        alerts
    }

    /// Drop pins for symbols that have aged out, keeping the map bounded.
    pub fn prune(&self, store: &DataStore) {
        self.first_prices
            .write()
            .retain(|symbol, _| store.symbol_state(symbol).map_or(false, |s| s.is_new));
    }
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
            quote_volume: 1e5,
            trade_count: 0,
            event_time,
        }
    }

    #[test]
    fn tracks_drift_from_first_price() {
        let clock = Clock::manual(0);
        let store = DataStore::new(clock.clone(), 5, 60);
        let det = NewListingDetector::new(clock.clone());

        store.update(&[ticker("BTCUSDT", 40_000.0, 1)]); // seeding batch
        clock.advance(1_000);
        let listings = store.update(&[ticker("NEWUSDT", 2.0, 1), ticker("BTCUSDT", 40_000.0, 2)]);
        for s in &listings {
            det.record_listing(s, store.last_price(s).unwrap_or(0.0));
        }

        clock.advance(60_000);
        store.update(&[ticker("NEWUSDT", 2.5, 2)]);

        let alerts = det.detect(&store);
        assert_eq!(alerts.len(), 1);
        let a = &alerts[0];
        assert_eq!(a.symbol, "NEWUSDT");
        assert_eq!(a.first_price, 2.0);
        assert_eq!(a.current_price, 2.5);
        assert!((a.change_from_first_pct - 25.0).abs() < 1e-9);
        assert_eq!(a.direction, Direction::Long);
    }

    #[test]
    fn aged_out_symbols_disappear_and_prune() {
        let clock = Clock::manual(0);
        let store = DataStore::new(clock.clone(), 5, 60);
        let det = NewListingDetector::new(clock.clone());

        store.update(&[ticker("BTCUSDT", 40_000.0, 1)]);
        clock.advance(1_000);
        store.update(&[ticker("NEWUSDT", 2.0, 1)]);
        det.record_listing("NEWUSDT", 2.0);
        assert_eq!(det.detect(&store).len(), 1);

        // Past the one-hour window the symbol is no longer new.
        clock.advance(61 * 60_000);
        store.update(&[ticker("NEWUSDT", 2.1, 2)]);
        assert!(det.detect(&store).is_empty());

        det.prune(&store);
        assert!(det.first_prices.read().is_empty());
    }

    #[test]
    fn first_price_is_not_overwritten() {
        let clock = Clock::manual(0);
        let det = NewListingDetector::new(clock);
        det.record_listing("NEWUSDT", 2.0);
        det.record_listing("NEWUSDT", 3.0);
        assert_eq!(*det.first_prices.read().get("NEWUSDT").unwrap(), 2.0);
    }
}
