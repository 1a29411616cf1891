// =============================================================================
// Entry Timing Detector — 15m setup classification with ATR levels
// =============================================================================
//
// Works on 50 fifteen-minute candles per symbol in the same rotating fashion
// as the other kline detectors. For each symbol it computes ATR(14),
// VWAP(20), and RSI(14), classifies the setup, and proposes ATR-scaled stop
// and target levels:
//
//   stop        entry -/+ 2.0 * ATR
//   targets     entry +/- 1.5, 3.0, 5.0 * ATR
//
// A setup is kept only when reward to the second target is at least 1.5x
// the stop distance.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::binance::FuturesClient;
use crate::clock::Clock;
use crate::indicators::atr::{atr, atr_pct, ATR_PERIOD};
use crate::indicators::rsi::{latest_rsi, RSI_PERIOD};
use crate::indicators::vwap::{distance_from_vwap_pct, vwap};
use crate::market::{Candle, DataStore};
use crate::types::{Direction, EntryType};

use super::magnitude_desc;

const UNIVERSE_SIZE: usize = 50;
const SYMBOLS_PER_CYCLE: usize = 5;
const KLINE_INTERVAL: &str = "15m";
const KLINE_DEPTH: u32 = 50;
const VWAP_WINDOW: usize = 20;
/// Bars defining the breakout extreme.
const BREAKOUT_LOOKBACK: usize = 20;

const SL_ATR: f64 = 2.0;
const TP_ATR: [f64; 3] = [1.5, 3.0, 5.0];
const MIN_RISK_REWARD: f64 = 1.5;

/// VWAP proximity band for a pullback, percent.
const PULLBACK_BAND_PCT: f64 = 0.5;
const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;

#[derive(Debug, Clone, Serialize)]
pub struct EntryTimingAlert {
    pub symbol: String,
    pub entry_type: EntryType,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub take_profit_3: f64,
    pub atr: f64,
    pub atr_pct: f64,
    pub vwap: f64,
    pub vwap_distance_pct: f64,
    pub rsi: f64,
    pub risk_reward: f64,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct EntryTimingDetector {
    clock: Clock,
    queue: RwLock<VecDeque<String>>,
    cache: RwLock<HashMap<String, EntryTimingAlert>>,
}

impl EntryTimingDetector {
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
                    let mut cache = self.cache.write();
                    match evaluate(&symbol, &candles, self.clock.now_ms()) {
                        Some(alert) => {
                            cache.insert(symbol, alert);
                        }
                        None => {
                            cache.remove(&symbol);
                        }
                    }
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "entry timing kline fetch failed");
                }
            }
        }

        debug!(cached = self.cache.read().len(), "entry timing cache updated");
    }

    pub fn detect(&self) -> Vec<EntryTimingAlert> {
        let mut out: Vec<EntryTimingAlert> = self.cache.read().values().cloned().collect();
        out.sort_by(|a, b| {
            magnitude_desc(a.risk_reward, b.risk_reward).then_with(|| a.symbol.cmp(&b.symbol))
        });
        out
    }

    /// (ATR %, VWAP distance %, risk/reward) for the feature vector.
    pub fn timing_for(&self, symbol: &str) -> Option<(f64, f64, f64)> {
        self.cache
            .read()
            .get(symbol)
            .map(|a| (a.atr_pct, a.vwap_distance_pct, a.risk_reward))
    }
}

/// Classify the setup and size its levels; `None` when indicators cannot be
/// computed or the reward does not justify the stop.
fn evaluate(symbol: &str, candles: &[Candle], now: i64) -> Option<EntryTimingAlert> {
    let atr_value = atr(candles, ATR_PERIOD)?;
    let atr_percent = atr_pct(candles, ATR_PERIOD)?;
    let vwap_value = vwap(candles, VWAP_WINDOW)?;
    let vwap_distance = distance_from_vwap_pct(candles, VWAP_WINDOW)?;
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let rsi = latest_rsi(&closes, RSI_PERIOD)?;

    let entry = candles.last()?.close;
    if entry <= 0.0 || atr_value <= 0.0 {
        return None;
    }

    let (entry_type, direction) = classify(candles, rsi, vwap_distance)?;

    let sign = match direction {
        Direction::Long => 1.0,
        Direction::Short => -1.0,
        Direction::Neutral => return None,
    };

    let stop_loss = entry - sign * SL_ATR * atr_value;
    let tp1 = entry + sign * TP_ATR[0] * atr_value;
    let tp2 = entry + sign * TP_ATR[1] * atr_value;
    let tp3 = entry + sign * TP_ATR[2] * atr_value;

    let risk = (entry - stop_loss).abs();
    let reward = (tp2 - entry).abs();
    if risk <= 0.0 {
        return None;
    }
    let risk_reward = reward / risk;
    if risk_reward < MIN_RISK_REWARD {
        return None;
    }

    Some(EntryTimingAlert {
        symbol: symbol.to_string(),
        entry_type,
        entry_price: entry,
        stop_loss,
        take_profit_1: tp1,
        take_profit_2: tp2,
        take_profit_3: tp3,
        atr: atr_value,
        atr_pct: atr_percent,
        vwap: vwap_value,
        vwap_distance_pct: vwap_distance,
        rsi,
        risk_reward,
        direction,
        timestamp: now,
    })
}

/// Setup classification, first match wins:
///   reversal at RSI extremes, breakout beyond the 20-bar extreme, pullback
///   near VWAP in the direction of the drift, else momentum.
fn classify(candles: &[Candle], rsi: f64, vwap_distance: f64) -> Option<(EntryType, Direction)> {
    let last = candles.last()?;
    let close = last.close;

    if rsi <= RSI_OVERSOLD {
        return Some((EntryType::Reversal, Direction::Long));
    }
    if rsi >= RSI_OVERBOUGHT {
        return Some((EntryType::Reversal, Direction::Short));
    }

    if candles.len() > BREAKOUT_LOOKBACK {
        let prior = &candles[candles.len() - 1 - BREAKOUT_LOOKBACK..candles.len() - 1];
        let prior_high = prior.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let prior_low = prior.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        if close > prior_high {
            return Some((EntryType::Breakout, Direction::Long));
        }
        if close < prior_low {
            return Some((EntryType::Breakout, Direction::Short));
        }
    }

    if vwap_distance.abs() <= PULLBACK_BAND_PCT {
        // At VWAP: trade with the drift of the last few bars.
        let drift: f64 = candles.iter().rev().take(5).map(|c| c.change_pct()).sum();
        let direction = Direction::from_sign(drift);
        if direction != Direction::Neutral {
            return Some((EntryType::Early, direction));
        }
    }

    let drift = last.change_pct();
    let direction = Direction::from_sign(drift);
    if direction == Direction::Neutral {
        return None;
    }
    Some((EntryType::Momentum, direction))
}
