// =============================================================================
// Sentiment Detector — greed/fear composite
// =============================================================================
//
// Reduces market-wide and per-symbol state into a 0–100 composite:
//   funding 30%, momentum 35%, volatility 15%, open interest 20%.
// 50 is neutral; higher is greed.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use crate::clock::Clock;
use crate::market::DataStore;

use super::funding::FundingDetector;
use super::open_interest::OpenInterestDetector;

const W_FUNDING: f64 = 0.30;
const W_MOMENTUM: f64 = 0.35;
const W_VOLATILITY: f64 = 0.15;
const W_OPEN_INTEREST: f64 = 0.20;

#[derive(Debug, Clone, Serialize)]
pub struct SymbolSentiment {
    pub symbol: String,
    pub score: f64,
    pub label: String,
    pub funding_component: f64,
    pub momentum_component: f64,
    pub volatility_component: f64,
    pub oi_component: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketSentiment {
    pub score: f64,
    pub label: String,
    pub bullish_count: usize,
    pub bearish_count: usize,
    pub avg_change_24h: f64,
    pub timestamp: i64,
}

pub struct SentimentDetector {
    clock: Clock,
    market: RwLock<Option<MarketSentiment>>,
    per_symbol: RwLock<HashMap<String, SymbolSentiment>>,
}

impl SentimentDetector {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            market: RwLock::new(None),
            per_symbol: RwLock::new(HashMap::new()),
        }
    }

    /// Recompute per-symbol and market composites from current state and the
    /// funding / OI caches.
    pub fn update(
        &self,
        store: &DataStore,
        funding: &FundingDetector,
        open_interest: &OpenInterestDetector,
    ) {
        let now = self.clock.now_ms();
        let states = store.all_states();
        if states.is_empty() {
            return;
        }

        let mut per_symbol = HashMap::with_capacity(states.len());
        let mut bullish = 0usize;
        let mut bearish = 0usize;
        let mut change_sum = 0.0;
        let mut score_sum = 0.0;

        for state in &states {
            let change = state.current.price_change_percent;
            change_sum += change;
            if change > 0.0 {
                bullish += 1;
            } else if change < 0.0 {
                bearish += 1;
            }

            let funding_score = funding
                .rate_for(&state.symbol)
                .map(funding_to_score)
                .unwrap_or(50.0);
            let momentum_score = scale(change, -10.0, 10.0);
            let volatility_score = scale(change.abs(), 0.0, 20.0);
            let oi_score = open_interest
                .signal_for(&state.symbol)
                .map(|(_, oi_change, _)| scale(oi_change, -5.0, 5.0))
                .unwrap_or(50.0);

            let score = funding_score * W_FUNDING
                + momentum_score * W_MOMENTUM
                + volatility_score * W_VOLATILITY
                + oi_score * W_OPEN_INTEREST;
            score_sum += score;

            per_symbol.insert(
                state.symbol.clone(),
                SymbolSentiment {
                    symbol: state.symbol.clone(),
                    score,
                    label: label(score).to_string(),
                    funding_component: funding_score,
                    momentum_component: momentum_score,
                    volatility_component: volatility_score,
                    oi_component: oi_score,
                    timestamp: now,
                },
            );
        }

        let n = states.len() as f64;
        let market_score = score_sum / n;
        *self.market.write() = Some(MarketSentiment {
            score: market_score,
            label: label(market_score).to_string(),
            bullish_count: bullish,
            bearish_count: bearish,
            avg_change_24h: change_sum / n,
            timestamp: now,
        });
        *self.per_symbol.write() = per_symbol;
    }

    pub fn market(&self) -> Option<MarketSentiment> {
        self.market.read().clone()
    }

    pub fn sentiment_for(&self, symbol: &str) -> Option<SymbolSentiment> {
        self.per_symbol.read().get(symbol).cloned()
    }
}

/// Positive funding reads greedy: map percent in [-0.1, 0.1] to [0, 100].
fn funding_to_score(rate_pct: f64) -> f64 {
    scale(rate_pct, -0.1, 0.1)
}

/// Linear map of `value` from [lo, hi] onto [0, 100], clamped.
fn scale(value: f64, lo: f64, hi: f64) -> f64 {
    ((value - lo) / (hi - lo) * 100.0).clamp(0.0, 100.0)
}

fn label(score: f64) -> &'static str {
    if score >= 75.0 {
        "EXTREME_GREED"
    } else if score >= 55.0 {
        "GREED"
    } else if score > 45.0 {
        "NEUTRAL"
    } else if score > 25.0 {
        "FEAR"
    } else {
        "EXTREME_FEAR"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Ticker;

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
            quote_volume: 1e6,
            trade_count: 0,
            event_time: 1,
        }
    }

    #[test]
    fn scale_is_clamped_linear() {
        assert_eq!(scale(0.0, -10.0, 10.0), 50.0);
        assert_eq!(scale(10.0, -10.0, 10.0), 100.0);
        assert_eq!(scale(-25.0, -10.0, 10.0), 0.0);
    }

    #[test]
    fn labels_band_the_score() {
        assert_eq!(label(90.0), "EXTREME_GREED");
        assert_eq!(label(60.0), "GREED");
        assert_eq!(label(50.0), "NEUTRAL");
        assert_eq!(label(30.0), "FEAR");
        assert_eq!(label(10.0), "EXTREME_FEAR");
    }

    #[test]
    fn flat_market_reads_near_neutral_fear_boundary() {
        let clock = Clock::manual(0);
        let store = DataStore::new(clock.clone(), 5, 60);
        store.update(&[ticker("AAAUSDT", 0.0), ticker("BBBUSDT", 0.0)]);

        let det = SentimentDetector::new(clock.clone());
        det.update(
            &store,
            &FundingDetector::new(clock.clone()),
            &OpenInterestDetector::new(clock),
        );

        let market = det.market().unwrap();
        // funding 50*0.3 + momentum 50*0.35 + volatility 0*0.15 + oi 50*0.2 = 42.5
        assert!((market.score - 42.5).abs() < 1e-9, "score {}", market.score);
        assert_eq!(market.bullish_count, 0);
        assert_eq!(market.bearish_count, 0);
    }

    #[test]
    fn broad_rally_scores_greedy() {
        let clock = Clock::manual(0);
        let store = DataStore::new(clock.clone(), 5, 60);
        store.update(&[ticker("AAAUSDT", 8.0), ticker("BBBUSDT", 9.0)]);

        let det = SentimentDetector::new(clock.clone());
        det.update(
            &store,
            &FundingDetector::new(clock.clone()),
            &OpenInterestDetector::new(clock),
        );

        let market = det.market().unwrap();
        assert!(market.score > 55.0, "score {}", market.score);
        assert_eq!(market.bullish_count, 2);
        let sym = det.sentiment_for("AAAUSDT").unwrap();
        assert!(sym.momentum_component > 85.0);
    }
}
