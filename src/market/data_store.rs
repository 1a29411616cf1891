// =============================================================================
// DataStore — per-symbol rolling state fed by the ticker stream
// =============================================================================
//
// Single writer: only the ingest task calls `update`. Readers get cloned
// per-symbol snapshots, never references into the map, so a reader always
// observes a whole batch or none of it.
//
// Histories are time-indexed and trimmed to their configured windows:
//   price_history  — (last price, ts), window = velocity.windowMinutes
//   volume_history — (cumulative 24h quote volume, ts), window = volume.avgWindowMinutes

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;

/// Age after which a first-seen symbol is no longer considered new.
const NEW_LISTING_AGE_MS: i64 = 60 * 60 * 1000;

/// Snapshot of a symbol's 24h ticker at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: f64,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trade_count: u64,
    pub event_time: i64,
}

/// Rolling state for one symbol. Owned by the `DataStore`; everything handed
/// out is a clone.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolState {
    pub symbol: String,
    pub current: Ticker,
    /// (last price, ts) — strictly increasing in ts.
    pub price_history: VecDeque<(f64, i64)>,
    /// (cumulative 24h quote volume, ts) — strictly increasing in ts.
    pub volume_history: VecDeque<(f64, i64)>,
    pub first_seen_ms: i64,
    pub is_new: bool,
}

impl SymbolState {
    fn new(ticker: Ticker, now_ms: i64) -> Self {
        Self {
            symbol: ticker.symbol.clone(),
            current: ticker,
            price_history: VecDeque::new(),
            volume_history: VecDeque::new(),
            first_seen_ms: now_ms,
            is_new: true,
        }
    }

    /// Percent price change across the retained price window. `None` with
    /// fewer than two points.
    pub fn window_change_pct(&self) -> Option<f64> {
        let (first, _) = self.price_history.front()?;
        let (last, _) = self.price_history.back()?;
        if self.price_history.len() < 2 || *first == 0.0 {
            return None;
        }
        Some((last - first) / first * 100.0)
    }

    /// Percent price change over the most recent `points` history entries.
    pub fn recent_move_pct(&self, points: usize) -> Option<f64> {
        if self.price_history.len() < 2 {
            return None;
        }
        let len = self.price_history.len();
        let start = len.saturating_sub(points);
        let (first, _) = self.price_history[start];
        let (last, _) = self.price_history[len - 1];
        if first == 0.0 {
            return None;
        }
        Some((last - first) / first * 100.0)
    }

    /// Percent growth of cumulative quote volume across the volume window.
    pub fn volume_window_change_pct(&self) -> Option<f64> {
        let (first, _) = self.volume_history.front()?;
        let (last, _) = self.volume_history.back()?;
        if self.volume_history.len() < 2 || *first == 0.0 {
            return None;
        }
        Some((last - first) / first * 100.0)
    }
}

/// Thread-safe store of per-symbol rolling state.
pub struct DataStore {
    clock: Clock,
    price_window_ms: i64,
    volume_window_ms: i64,
    states: RwLock<HashMap<String, SymbolState>>,
    /// Set once the first batch has been absorbed; first-sight symbols after
    /// that are reported as new listings.
    seeded: AtomicBool,
}

impl DataStore {
    pub fn new(clock: Clock, price_window_minutes: i64, volume_window_minutes: i64) -> Self {
        Self {
            clock,
            price_window_ms: price_window_minutes * 60_000,
            volume_window_ms: volume_window_minutes * 60_000,
            states: RwLock::new(HashMap::new()),
            seeded: AtomicBool::new(false),
        }
    }

    /// Apply one ticker batch atomically. Returns the symbols first seen in
    /// this batch (empty for the seeding batch).
    ///
    /// Out-of-order events (event_time not greater than the stored one) are
    /// dropped, which also deduplicates burst replays of the same batch.
    pub fn update(&self, batch: &[Ticker]) -> Vec<String> {
        let now = self.clock.now_ms();
        let seeded = self.seeded.load(Ordering::SeqCst);
        let mut new_listings = Vec::new();

        let mut states = self.states.write();
        for ticker in batch {
            match states.get_mut(&ticker.symbol) {
                Some(state) => {
                    if ticker.event_time <= state.current.event_time {
                        continue;
                    }
                    state.current = ticker.clone();
                    push_point(&mut state.price_history, ticker.last_price, now);
                    push_point(&mut state.volume_history, ticker.quote_volume, now);
                    trim_window(&mut state.price_history, now, self.price_window_ms);
                    trim_window(&mut state.volume_history, now, self.volume_window_ms);
                    if state.is_new && now - state.first_seen_ms > NEW_LISTING_AGE_MS {
                        state.is_new = false;
                    }
                }
                None => {
                    let mut state = SymbolState::new(ticker.clone(), now);
                    push_point(&mut state.price_history, ticker.last_price, now);
                    push_point(&mut state.volume_history, ticker.quote_volume, now);
                    states.insert(ticker.symbol.clone(), state);
                    if seeded {
                        new_listings.push(ticker.symbol.clone());
                    }
                }
            }
        }
        drop(states);

        if !seeded && !batch.is_empty() {
            self.seeded.store(true, Ordering::SeqCst);
        }

        new_listings.sort();
        new_listings
    }

    /// Cloned state for one symbol.
    pub fn symbol_state(&self, symbol: &str) -> Option<SymbolState> {
        self.states.read().get(symbol).cloned()
    }

    /// Cloned states for every tracked symbol.
    pub fn all_states(&self) -> Vec<SymbolState> {
        self.states.read().values().cloned().collect()
    }

    pub fn current(&self, symbol: &str) -> Option<Ticker> {
        self.states.read().get(symbol).map(|s| s.current.clone())
    }

    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.states.read().get(symbol).map(|s| s.current.last_price)
    }

    pub fn symbol_count(&self) -> usize {
        self.states.read().len()
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.states.read().keys().cloned().collect();
        out.sort();
        out
    }

    /// Symbols ranked by 24h quote volume, highest first.
    pub fn top_by_quote_volume(&self, limit: usize) -> Vec<String> {
        let states = self.states.read();
        let mut ranked: Vec<(&String, f64)> = states
            .iter()
            .map(|(sym, s)| (sym, s.current.quote_volume))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        ranked.into_iter().take(limit).map(|(s, _)| s.clone()).collect()
    }
}

/// Append a point keeping ts strictly increasing: a second point in the same
/// millisecond replaces the last one.
fn push_point(history: &mut VecDeque<(f64, i64)>, value: f64, ts: i64) {
    if let Some(&(_, last_ts)) = history.back() {
        if last_ts == ts {
            history.pop_back();
        } else if last_ts > ts {
            return;
        }
    }
    history.push_back((value, ts));
}

/// Drop points at or beyond the window boundary, keeping ts > now - window.
fn trim_window(history: &mut VecDeque<(f64, i64)>, now: i64, window_ms: i64) {
    let cutoff = now - window_ms;
    while let Some(&(_, ts)) = history.front() {
        if ts > cutoff {
            break;
        }
        history.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, price: f64, quote_volume: f64, event_time: i64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: price,
            price_change: 0.0,
            price_change_percent: 0.0,
            open_price: price,
            high_price: price,
            low_price: price,
            volume: 0.0,
            quote_volume,
            trade_count: 0,
            event_time,
        }
    }

    #[test]
    fn first_batch_is_seeding_not_new_listing() {
        let store = DataStore::new(Clock::manual(0), 5, 60);
        let listings = store.update(&[ticker("AAAUSDT", 1.0, 10.0, 1)]);
        assert!(listings.is_empty());
        assert_eq!(store.symbol_count(), 1);
    }

    #[test]
    fn later_first_sight_is_reported() {
        let clock = Clock::manual(0);
        let store = DataStore::new(clock.clone(), 5, 60);
        store.update(&[ticker("AAAUSDT", 1.0, 10.0, 1)]);
        clock.advance(1_000);
        let listings = store.update(&[
            ticker("AAAUSDT", 1.1, 11.0, 2),
            ticker("NEWUSDT", 0.5, 1.0, 2),
        ]);
        assert_eq!(listings, vec!["NEWUSDT".to_string()]);
        assert!(store.symbol_state("NEWUSDT").unwrap().is_new);
    }

    #[test]
    fn out_of_order_events_are_dropped() {
        let clock = Clock::manual(0);
        let store = DataStore::new(clock.clone(), 5, 60);
        store.update(&[ticker("AAAUSDT", 1.0, 10.0, 100)]);
        clock.advance(1_000);
        store.update(&[ticker("AAAUSDT", 2.0, 20.0, 50)]);
        let state = store.symbol_state("AAAUSDT").unwrap();
        assert_eq!(state.current.last_price, 1.0);
        assert_eq!(state.price_history.len(), 1);
    }

    #[test]
    fn histories_are_strictly_increasing_and_windowed() {
        let clock = Clock::manual(0);
        // 5-minute price window, 60-minute volume window.
        let store = DataStore::new(clock.clone(), 5, 60);

        // Pseudo-random update spacing; 200 updates over ~33 minutes.
        let mut seed: u64 = 0x9E37_79B9;
        for i in 0..200 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let step = 1_000 + (seed >> 33) % 19_000; // 1s..20s
            clock.advance(step as i64);
            store.update(&[ticker("AAAUSDT", 100.0 + i as f64, 1_000.0 + i as f64, i + 1)]);
        }

        let state = store.symbol_state("AAAUSDT").unwrap();
        let now = clock.now_ms();

        for pair in state.price_history.iter().zip(state.price_history.iter().skip(1)) {
            assert!(pair.0 .1 < pair.1 .1, "price history ts not strictly increasing");
        }
        for pair in state.volume_history.iter().zip(state.volume_history.iter().skip(1)) {
            assert!(pair.0 .1 < pair.1 .1, "volume history ts not strictly increasing");
        }
        for &(_, ts) in &state.price_history {
            assert!(ts > now - 5 * 60_000, "price point outside window");
        }
        for &(_, ts) in &state.volume_history {
            assert!(ts > now - 60 * 60_000, "volume point outside window");
        }
    }

    #[test]
    fn same_millisecond_update_replaces_last_point() {
        let clock = Clock::manual(10);
        let store = DataStore::new(clock.clone(), 5, 60);
        store.update(&[ticker("AAAUSDT", 1.0, 10.0, 1)]);
        store.update(&[ticker("AAAUSDT", 2.0, 20.0, 2)]);
        let state = store.symbol_state("AAAUSDT").unwrap();
        assert_eq!(state.price_history.len(), 1);
        assert_eq!(state.price_history.back().unwrap().0, 2.0);
    }

    #[test]
    fn is_new_flips_off_after_an_hour() {
        let clock = Clock::manual(0);
        let store = DataStore::new(clock.clone(), 5, 60);
        store.update(&[ticker("AAAUSDT", 1.0, 10.0, 1)]);
        clock.advance(1_000);
        store.update(&[ticker("NEWUSDT", 1.0, 10.0, 1)]);
        assert!(store.symbol_state("NEWUSDT").unwrap().is_new);

        clock.advance(NEW_LISTING_AGE_MS + 1);
        store.update(&[ticker("NEWUSDT", 1.1, 11.0, 2)]);
        assert!(!store.symbol_state("NEWUSDT").unwrap().is_new);
    }

    #[test]
    fn top_by_quote_volume_ranks_descending() {
        let store = DataStore::new(Clock::manual(0), 5, 60);
        store.update(&[
            ticker("AAAUSDT", 1.0, 300.0, 1),
            ticker("BBBUSDT", 1.0, 100.0, 1),
            ticker("CCCUSDT", 1.0, 200.0, 1),
        ]);
        assert_eq!(
            store.top_by_quote_volume(2),
            vec!["AAAUSDT".to_string(), "CCCUSDT".to_string()]
        );
    }
}
