// =============================================================================
// Pattern Detector — key levels and double tops / bottoms on 1h candles
// =============================================================================
//
// Works on 48 hourly candles per symbol, rotating through the liquidity
// universe five symbols per cycle. Two families of structure:
//
//   Key levels — 24h high/low, round numbers, and clustered highs/lows with
//   at least three touches; reported when price is within two percent.
//
//   Double top / bottom — the last 20 closes split into halves whose
//   extremes agree within two percent, with the current close pulled back
//   at least two percent from the shared extreme.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::binance::FuturesClient;
use crate::clock::Clock;
use crate::market::{Candle, DataStore};
use crate::types::{Direction, PatternKind};

use super::magnitude_desc;

const UNIVERSE_SIZE: usize = 50;
const SYMBOLS_PER_CYCLE: usize = 5;
const KLINE_INTERVAL: &str = "1h";
const KLINE_DEPTH: u32 = 48;

/// Percent proximity to a level worth reporting.
const PROXIMITY_PCT: f64 = 2.0;
/// Touch tolerance when clustering highs/lows, percent.
const CLUSTER_TOLERANCE_PCT: f64 = 0.5;
/// Touches required for a cluster level.
const MIN_TOUCHES: usize = 3;
/// Closes inspected for double formations.
const FORMATION_DEPTH: usize = 20;
/// Agreement between the two extremes, percent.
const FORMATION_MATCH_PCT: f64 = 2.0;
/// Reclaim distance off the extreme, percent.
const RECLAIM_PCT: f64 = 2.0;

#[derive(Debug, Clone, Serialize)]
pub struct PatternAlert {
    pub symbol: String,
    pub kind: PatternKind,
    /// The level or formation extreme.
    pub level: f64,
    /// Signed percent distance of the current close from the level.
    pub distance_pct: f64,
    /// Touch count for key levels, reclaim size for formations; in [0, 100].
    pub confidence: f64,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct PatternDetector {
    clock: Clock,
    queue: RwLock<VecDeque<String>>,
    cache: RwLock<HashMap<String, Vec<PatternAlert>>>,
}

impl PatternDetector {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            queue: RwLock::new(VecDeque::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn refresh_universe(&self, store: &DataStore) {
        let top = store.top_by_quote_volume(UNIVERSE_SIZE);
        let mut queue = self.queue.write();
        queue.retain(|s| top.contains(s));
        for symbol in &top {
            if !queue.contains(symbol) {
                queue.push_back(symbol.clone());
            }
        }
        self.cache.write().retain(|s, _| top.contains(s));
    }

    pub async fn update(&self, client: &FuturesClient, store: &DataStore) {
        self.refresh_universe(store);

        let batch: Vec<String> = {
            let mut queue = self.queue.write();
            let take = SYMBOLS_PER_CYCLE.min(queue.len());
            let mut batch = Vec::with_capacity(take);
            for _ in 0..take {
                if let Some(symbol) = queue.pop_front() {
                    queue.push_back(symbol.clone());
                    batch.push(symbol);
                }
            }
            batch
        };

        for symbol in batch {
            match client.klines(&symbol, KLINE_INTERVAL, KLINE_DEPTH).await {
                Ok(candles) => {
                    let alerts = scan(&symbol, &candles, self.clock.now_ms());
                    self.cache.write().insert(symbol, alerts);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "pattern kline fetch failed");
                }
            }
        }

        debug!(cached = self.cache.read().len(), "pattern cache updated");
    }

    pub fn detect(&self) -> Vec<PatternAlert> {
        let mut out: Vec<PatternAlert> =
            self.cache.read().values().flatten().cloned().collect();
        out.sort_by(|a, b| {
            magnitude_desc(a.confidence, b.confidence).then_with(|| a.symbol.cmp(&b.symbol))
        });
        out
    }

    /// Strongest pattern for a symbol, for the feature vector:
    /// (kind, confidence, distance from level).
    pub fn pattern_for(&self, symbol: &str) -> Option<(PatternKind, f64, f64)> {
        let cache = self.cache.read();
        let alerts = cache.get(symbol)?;
        alerts
            .iter()
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|a| (a.kind, a.confidence, a.distance_pct))
    }
}

/// All pattern structures visible on the candle set.
fn scan(symbol: &str, candles: &[Candle], now: i64) -> Vec<PatternAlert> {
    let Some(last) = candles.last() else {
        return Vec::new();
    };
    let close = last.close;
    if close <= 0.0 {
        return Vec::new();
    }

    let mut alerts = Vec::new();

    for (level, touches) in key_levels(candles) {
        let distance = (close - level) / level * 100.0;
        if distance.abs() <= PROXIMITY_PCT {
            alerts.push(PatternAlert {
                symbol: symbol.to_string(),
                kind: PatternKind::KeyLevel,
                level,
                distance_pct: distance,
                confidence: (touches as f64 * 20.0).min(100.0),
                direction: Direction::Neutral,
                timestamp: now,
            });
        }
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    if let Some(alert) = double_formation(symbol, &closes, now) {
        alerts.push(alert);
    }

    alerts
}

/// Candidate levels with their touch counts: window high/low, round numbers
/// near price, and multi-touch clusters.
fn key_levels(candles: &[Candle]) -> Vec<(f64, usize)> {
    let mut levels = Vec::new();
    let Some(last) = candles.last() else {
        return levels;
    };

    let high = candles.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = candles.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    if high > low {
        levels.push((high, 1));
        levels.push((low, 1));
    }

    if let Some(round) = nearest_round(last.close) {
        levels.push((round, 1));
    }

    // Cluster highs and lows into CLUSTER_TOLERANCE_PCT buckets.
    let mut points: Vec<f64> = Vec::with_capacity(candles.len() * 2);
    points.extend(candles.iter().map(|c| c.high));
    points.extend(candles.iter().map(|c| c.low));
    points.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut i = 0;
    while i < points.len() {
        let anchor = points[i];
        let mut j = i;
        let mut sum = 0.0;
        while j < points.len() && (points[j] - anchor) / anchor * 100.0 <= CLUSTER_TOLERANCE_PCT {
            sum += points[j];
            j += 1;
        }
        let touches = j - i;
        if touches >= MIN_TOUCHES {
            levels.push((sum / touches as f64, touches));
        }
        i = j;
    }

    levels
}

/// Round number with a 1 / 2.5 / 5 mantissa nearest to `price`.
fn nearest_round(price: f64) -> Option<f64> {
    if price <= 0.0 || !price.is_finite() {
        return None;
    }
    let magnitude = 10f64.powf(price.log10().floor());
    let candidates = [
        magnitude,
        2.5 * magnitude,
        5.0 * magnitude,
        10.0 * magnitude,
    ];
    candidates
        .into_iter()
        .min_by(|a, b| {
            (a - price)
                .abs()
                .partial_cmp(&(b - price).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Double top / bottom over the last [`FORMATION_DEPTH`] closes.
fn double_formation(symbol: &str, closes: &[f64], now: i64) -> Option<PatternAlert> {
    if closes.len() < FORMATION_DEPTH {
        return None;
    }
    let window = &closes[closes.len() - FORMATION_DEPTH..];
    let current = *window.last()?;
    let mid = FORMATION_DEPTH / 2;
    let (first, second) = window.split_at(mid);

    let max_a = first.iter().copied().fold(f64::MIN, f64::max);
    let max_b = second.iter().copied().fold(f64::MIN, f64::max);
    let min_a = first.iter().copied().fold(f64::MAX, f64::min);
    let min_b = second.iter().copied().fold(f64::MAX, f64::min);

    // Double top: two matched highs, price reclaimed down off them.
    let top = max_a.max(max_b);
    if top > 0.0
        && (max_a - max_b).abs() / top * 100.0 <= FORMATION_MATCH_PCT
        && (top - current) / top * 100.0 >= RECLAIM_PCT
    {
        let reclaim = (top - current) / top * 100.0;
        return Some(PatternAlert {
            symbol: symbol.to_string(),
            kind: PatternKind::DoubleTop,
            level: top,
            distance_pct: (current - top) / top * 100.0,
            confidence: (reclaim * 20.0).min(100.0),
            direction: Direction::Short,
            timestamp: now,
        });
    }

    // Double bottom: two matched lows, price reclaimed up off them.
    let bottom = min_a.min(min_b);
    if bottom > 0.0
        && bottom < f64::MAX
        && (min_a - min_b).abs() / bottom * 100.0 <= FORMATION_MATCH_PCT
        && (current - bottom) / bottom * 100.0 >= RECLAIM_PCT
    {
        let reclaim = (current - bottom) / bottom * 100.0;
        return Some(PatternAlert {
            symbol: symbol.to_string(),
            kind: PatternKind::DoubleBottom,
            level: bottom,
            distance_pct: (current - bottom) / bottom * 100.0,
            confidence: (reclaim * 20.0).min(100.0),
            direction: Direction::Long,
            timestamp: now,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 0,
            open: close,
            high,
            low,
            close,
            volume: 10.0,
            quote_volume: 0.0,
        }
    }

    #[test]
    fn nearest_round_picks_sensible_levels() {
        assert_eq!(nearest_round(97.0), Some(100.0));
        assert_eq!(nearest_round(2.4), Some(2.5));
        assert_eq!(nearest_round(48_000.0), Some(50_000.0));
        assert!(nearest_round(0.0).is_none());
    }

    #[test]
    fn cluster_levels_need_three_touches() {
        // Three candles touching ~110 highs, spread lows.
        let candles = vec![
            candle(110.0, 90.0, 100.0),
            candle(110.2, 95.0, 100.0),
            candle(110.4, 97.0, 100.0),
            candle(105.0, 99.0, 100.0),
        ];
        let levels = key_levels(&candles);
        let clustered = levels.iter().find(|(_, touches)| *touches >= MIN_TOUCHES);
        assert!(clustered.is_some(), "expected a 3-touch cluster: {levels:?}");
    }

    #[test]
    fn double_top_detected() {
        // Two peaks at ~100 split across the halves, current pulled back 4%.
        let mut closes = vec![90.0; 20];
        closes[3] = 100.0;
        closes[13] = 99.5;
        closes[19] = 96.0;
        let alert = double_formation("AAAUSDT", &closes, 0).unwrap();
        assert_eq!(alert.kind, PatternKind::DoubleTop);
        assert_eq!(alert.direction, Direction::Short);
        assert!(alert.distance_pct < 0.0);
    }

    #[test]
    fn double_bottom_detected() {
        // Ceilings differ across the halves so the top branch cannot match;
        // the floors agree within 2% and price reclaims 4% off them.
        let mut closes = vec![95.0; 10];
        closes.extend(vec![98.0; 10]);
        closes[4] = 90.0;
        closes[15] = 90.5;
        closes[19] = 94.0;
        let alert = double_formation("AAAUSDT", &closes, 0).unwrap();
        assert_eq!(alert.kind, PatternKind::DoubleBottom);
        assert_eq!(alert.direction, Direction::Long);
    }

    #[test]
    fn mismatched_extremes_do_not_form() {
        // Peaks 100 vs 94 disagree by 6%.
        let mut closes = vec![90.0; 20];
        closes[3] = 100.0;
        closes[13] = 94.0;
        closes[19] = 88.0;
        assert!(double_formation("AAAUSDT", &closes, 0).is_none());
    }

    #[test]
    fn proximity_gate_on_key_levels() {
        // Price 3% from every level: no key-level alert.
        let candles: Vec<Candle> = (0..48)
            .map(|_| candle(113.0, 107.0, 110.0))
            .collect();
        let alerts = scan("AAAUSDT", &candles, 0);
        for a in &alerts {
            assert!(a.distance_pct.abs() <= PROXIMITY_PCT);
        }
    }
}
