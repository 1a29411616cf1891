// =============================================================================
// Multi-Timeframe Detector — 15m / 1h / 4h alignment
// =============================================================================
//
// Klines for three timeframes are expensive, so the detector rotates through
// the 50 highest-liquidity symbols five at a time: one full pass of the
// universe every ten update cycles. Analyses are cached per symbol until the
// rotation comes back around.
//
// Divergence fires when the 15m move and the 4h move disagree by at least
// two percent in opposite directions.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::binance::FuturesClient;
use crate::clock::Clock;
use crate::market::DataStore;
use crate::types::{Direction, DivergenceType, MtfAlignment, TrendState};

use super::magnitude_desc;

/// Size of the rotating liquidity universe.
const UNIVERSE_SIZE: usize = 50;
/// Symbols analysed per update cycle.
const SYMBOLS_PER_CYCLE: usize = 5;
/// Per-timeframe move that counts as strong.
const STRONG_MOVE_PCT: f64 = 1.0;
/// Opposite-move threshold for a divergence.
const DIVERGENCE_PCT: f64 = 2.0;

#[derive(Debug, Clone, Serialize)]
pub struct MtfAnalysis {
    pub symbol: String,
    pub change_15m: f64,
    pub change_1h: f64,
    pub change_4h: f64,
    pub rsi_1h: Option<f64>,
    pub alignment: MtfAlignment,
    pub divergence: DivergenceType,
    pub momentum: TrendState,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct MultiTimeframeDetector {
    clock: Clock,
    queue: RwLock<VecDeque<String>>,
    cache: RwLock<HashMap<String, MtfAnalysis>>,
}

impl MultiTimeframeDetector {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            queue: RwLock::new(VecDeque::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Re-rank the rotation universe. Symbols that fell out of the top 50
    /// are dropped from both the queue and the cache; new entrants join the
    /// back of the queue.
    pub fn refresh_universe(&self, store: &DataStore) {
        let top: Vec<String> = store.top_by_quote_volume(UNIVERSE_SIZE);
        let mut queue = self.queue.write();
        queue.retain(|s| top.contains(s));
        for symbol in &top {
            if !queue.contains(symbol) {
                queue.push_back(symbol.clone());
            }
        }
        self.cache.write().retain(|s, _| top.contains(s));
    }

    /// Analyse the next [`SYMBOLS_PER_CYCLE`] symbols in rotation.
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
            match self.analyse(client, &symbol).await {
                Ok(analysis) => {
                    self.cache.write().insert(symbol, analysis);
                }
                Err(e) => {
                    // Previous cached analysis stays authoritative.
                    warn!(symbol = %symbol, error = %e, "mtf analysis failed");
                }
            }
        }

        debug!(cached = self.cache.read().len(), "mtf cache updated");
    }

    async fn analyse(&self, client: &FuturesClient, symbol: &str) -> anyhow::Result<MtfAnalysis> {
        let c15 = client.klines(symbol, "15m", 2).await?;
        let c1h = client.klines(symbol, "1h", 2).await?;
        let c4h = client.klines(symbol, "4h", 2).await?;

        let change_15m = c15.last().map(|c| c.change_pct()).unwrap_or(0.0);
        let change_1h = c1h.last().map(|c| c.change_pct()).unwrap_or(0.0);
        let change_4h = c4h.last().map(|c| c.change_pct()).unwrap_or(0.0);

        let rsi_1h = client.symbol_rsi(symbol, "1h").await.unwrap_or(None);

        Ok(build_analysis(
            symbol,
            change_15m,
            change_1h,
            change_4h,
            rsi_1h,
            self.clock.now_ms(),
        ))
    }

    /// Cached analyses, strongest alignment first.
    pub fn detect(&self) -> Vec<MtfAnalysis> {
        let mut out: Vec<MtfAnalysis> = self.cache.read().values().cloned().collect();
        out.sort_by(|a, b| {
            magnitude_desc(a.alignment.encoding(), b.alignment.encoding())
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        out
    }

    pub fn analysis_for(&self, symbol: &str) -> Option<MtfAnalysis> {
        self.cache.read().get(symbol).cloned()
    }
}

fn build_analysis(
    symbol: &str,
    change_15m: f64,
    change_1h: f64,
    change_4h: f64,
    rsi_1h: Option<f64>,
    now: i64,
) -> MtfAnalysis {
    let alignment = classify_alignment(change_15m, change_1h, change_4h);
    let divergence = classify_divergence(change_15m, change_4h);
    let momentum = classify_momentum(change_15m, change_4h);

    let direction = match alignment {
        MtfAlignment::StrongBullish | MtfAlignment::Bullish => Direction::Long,
        MtfAlignment::StrongBearish | MtfAlignment::Bearish => Direction::Short,
        MtfAlignment::Mixed => Direction::Neutral,
    };

    MtfAnalysis {
        symbol: symbol.to_string(),
        change_15m,
        change_1h,
        change_4h,
        rsi_1h,
        alignment,
        divergence,
        momentum,
        direction,
        timestamp: now,
    }
}

fn classify_alignment(c15: f64, c1h: f64, c4h: f64) -> MtfAlignment {
    let all_up = c15 > 0.0 && c1h > 0.0 && c4h > 0.0;
    let all_down = c15 < 0.0 && c1h < 0.0 && c4h < 0.0;
    let all_strong =
        c15.abs() >= STRONG_MOVE_PCT && c1h.abs() >= STRONG_MOVE_PCT && c4h.abs() >= STRONG_MOVE_PCT;

    if all_up && all_strong {
        MtfAlignment::StrongBullish
    } else if all_up {
        MtfAlignment::Bullish
    } else if all_down && all_strong {
        MtfAlignment::StrongBearish
    } else if all_down {
        MtfAlignment::Bearish
    } else {
        MtfAlignment::Mixed
    }
}

fn classify_divergence(c15: f64, c4h: f64) -> DivergenceType {
    if c15 >= DIVERGENCE_PCT && c4h <= -DIVERGENCE_PCT {
        // Short-term strength against a falling higher timeframe.
        DivergenceType::Bullish
    } else if c15 <= -DIVERGENCE_PCT && c4h >= DIVERGENCE_PCT {
        DivergenceType::Bearish
    } else {
        DivergenceType::None
    }
}

/// Compare per-hour rates: the 15m bar annualises 4x, the 4h bar 1/4x.
fn classify_momentum(c15: f64, c4h: f64) -> TrendState {
    let short_rate = c15.abs() * 4.0;
    let long_rate = c4h.abs() / 4.0;
    if long_rate == 0.0 {
        return if short_rate > 0.0 {
            TrendState::Accelerating
        } else {
            TrendState::Steady
        };
    }
    let ratio = short_rate / long_rate;
    if ratio > 1.25 {
        TrendState::Accelerating
    } else if ratio < 0.75 {
        TrendState::Decelerating
    } else {
        TrendState::Steady
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Ticker;

    #[test]
    fn alignment_bands() {
        assert_eq!(classify_alignment(1.5, 2.0, 1.2), MtfAlignment::StrongBullish);
        assert_eq!(classify_alignment(0.3, 0.8, 0.2), MtfAlignment::Bullish);
        assert_eq!(classify_alignment(-1.5, -2.0, -1.2), MtfAlignment::StrongBearish);
        assert_eq!(classify_alignment(-0.3, -0.8, -0.2), MtfAlignment::Bearish);
        assert_eq!(classify_alignment(0.5, -0.5, 0.5), MtfAlignment::Mixed);
    }

    #[test]
    fn divergence_needs_two_percent_both_ways() {
        assert_eq!(classify_divergence(2.5, -2.5), DivergenceType::Bullish);
        assert_eq!(classify_divergence(-2.5, 2.5), DivergenceType::Bearish);
        assert_eq!(classify_divergence(2.5, -1.0), DivergenceType::None);
        assert_eq!(classify_divergence(1.0, -2.5), DivergenceType::None);
    }

    #[test]
    fn momentum_compares_hourly_rates() {
        // 1% on 15m = 4%/h vs 4% on 4h = 1%/h: accelerating.
        assert_eq!(classify_momentum(1.0, 4.0), TrendState::Accelerating);
        // 0.1% on 15m = 0.4%/h vs 4% on 4h = 1%/h: decelerating.
        assert_eq!(classify_momentum(0.1, 4.0), TrendState::Decelerating);
        // Equal rates: steady.
        assert_eq!(classify_momentum(0.25, 4.0), TrendState::Steady);
    }

    #[test]
    fn build_analysis_direction_follows_alignment() {
        let a = build_analysis("BTCUSDT", 1.5, 2.0, 1.2, Some(60.0), 0);
        assert_eq!(a.direction, Direction::Long);
        let b = build_analysis("BTCUSDT", -0.4, -0.2, -0.3, None, 0);
        assert_eq!(b.direction, Direction::Short);
        assert_eq!(b.alignment, MtfAlignment::Bearish);
    }

    #[test]
    fn universe_rotation_keeps_top_symbols() {
        let clock = Clock::manual(0);
        let store = DataStore::new(clock.clone(), 5, 60);
        let det = MultiTimeframeDetector::new(clock);

        let mk = |s: &str, qv: f64| Ticker {
            symbol: s.to_string(),
            last_price: 1.0,
            price_change: 0.0,
            price_change_percent: 0.0,
            open_price: 1.0,
            high_price: 1.0,
            low_price: 1.0,
            volume: 0.0,
            quote_volume: qv,
            trade_count: 0,
            event_time: 1,
        };
        store.update(&[mk("AAAUSDT", 300.0), mk("BBBUSDT", 200.0), mk("CCCUSDT", 100.0)]);

        det.refresh_universe(&store);
        assert_eq!(det.queue.read().len(), 3);

        // Re-ranking is idempotent.
        det.refresh_universe(&store);
        assert_eq!(det.queue.read().len(), 3);
    }
}
