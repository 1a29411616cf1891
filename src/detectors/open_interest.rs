// =============================================================================
// Open Interest Detector — participation shifts behind price moves
// =============================================================================
//
// Open interest is the total notional of outstanding contracts. Its change,
// co-read with the price change over the same interval, separates new money
// entering from positions unwinding:
//
//   OI up,   price up    => StrongTrend (longs pressing)
//   OI up,   price down  => BuildingShorts
//   OI up,   price flat  => BuildingLongs
//   OI down              => ClosingPositions
//
// Emission requires at least two historical samples and |OI delta| >= 2%.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::binance::FuturesClient;
use crate::clock::Clock;
use crate::market::DataStore;
use crate::types::{Direction, OiSignal};

use super::magnitude_desc;

/// Symbols ranked by liquidity that the detector polls.
const UNIVERSE_SIZE: usize = 100;
/// OI samples retained per symbol.
const HISTORY_DEPTH: usize = 30;
/// Minimum |OI delta| percent to emit.
const MIN_OI_DELTA_PCT: f64 = 2.0;
/// Price delta percent that counts as a real move in the classification.
const PRICE_MOVE_PCT: f64 = 1.0;

#[derive(Debug, Clone)]
struct OiSample {
    open_interest: f64,
    price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenInterestAlert {
    pub symbol: String,
    pub open_interest: f64,
    pub oi_change_pct: f64,
    pub price_change_pct: f64,
    pub signal: OiSignal,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct OpenInterestDetector {
    clock: Clock,
    history: RwLock<HashMap<String, VecDeque<OiSample>>>,
    alerts: RwLock<Vec<OpenInterestAlert>>,
}

impl OpenInterestDetector {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            history: RwLock::new(HashMap::new()),
            alerts: RwLock::new(Vec::new()),
        }
    }

    /// Poll OI for the top liquidity universe (batched upstream) and rebuild
    /// the alert cache.
    pub async fn update(&self, client: &FuturesClient, store: &DataStore) {
        let universe = store.top_by_quote_volume(UNIVERSE_SIZE);
        if universe.is_empty() {
            return;
        }

        let points = client.open_interest_batch(&universe).await;
        let now = self.clock.now_ms();
        let mut alerts = Vec::new();

        {
            let mut history = self.history.write();
            for point in points {
                let price = store.last_price(&point.symbol).unwrap_or(0.0);
                let ring = history
                    .entry(point.symbol.clone())
                    .or_insert_with(|| VecDeque::with_capacity(HISTORY_DEPTH + 1));

                if let Some(prev) = ring.back() {
                    if let Some(alert) =
                        evaluate(&point.symbol, prev, point.open_interest, price, now)
                    {
                        alerts.push(alert);
                    }
                }

                ring.push_back(OiSample {
                    open_interest: point.open_interest,
                    price,
                });
                while ring.len() > HISTORY_DEPTH {
                    ring.pop_front();
                }
            }
        }

        alerts.sort_by(|a, b| {
            magnitude_desc(a.oi_change_pct, b.oi_change_pct).then_with(|| a.symbol.cmp(&b.symbol))
        });

        debug!(count = alerts.len(), "open interest alerts rebuilt");
        *self.alerts.write() = alerts;
    }

    pub fn detect(&self) -> Vec<OpenInterestAlert> {
        self.alerts.read().clone()
    }

    /// (signal, oi change %, price alignment) for the fusion engine and the
    /// feature vector. `None` until two samples exist for the symbol.
    pub fn signal_for(&self, symbol: &str) -> Option<(OiSignal, f64, f64)> {
        let history = self.history.read();
        let ring = history.get(symbol)?;
        if ring.len() < 2 {
            return None;
        }
        let prev = &ring[ring.len() - 2];
        let last = &ring[ring.len() - 1];
        if prev.open_interest == 0.0 {
            return None;
        }

        let oi_change = (last.open_interest - prev.open_interest) / prev.open_interest * 100.0;
        let price_change = if prev.price > 0.0 {
            (last.price - prev.price) / prev.price * 100.0
        } else {
            0.0
        };
        let signal = classify(oi_change, price_change);
        let aligned = if oi_change > 0.0 && price_change.abs() > 0.0 {
            if (price_change > 0.0) == matches!(signal, OiSignal::StrongTrend | OiSignal::BuildingLongs)
            {
                1.0
            } else {
                0.0
            }
        } else {
            0.0
        };
        Some((signal, oi_change, aligned))
    }
}

fn evaluate(
    symbol: &str,
    prev: &OiSample,
    open_interest: f64,
    price: f64,
    now: i64,
) -> Option<OpenInterestAlert> {
    if prev.open_interest == 0.0 {
        return None;
    }
    let oi_change = (open_interest - prev.open_interest) / prev.open_interest * 100.0;
    if oi_change.abs() < MIN_OI_DELTA_PCT {
        return None;
    }

    let price_change = if prev.price > 0.0 {
        (price - prev.price) / prev.price * 100.0
    } else {
        0.0
    };

    let signal = classify(oi_change, price_change);
    Some(OpenInterestAlert {
        symbol: symbol.to_string(),
        open_interest,
        oi_change_pct: oi_change,
        price_change_pct: price_change,
        signal,
        direction: signal_direction(signal, price_change),
        timestamp: now,
    })
}

fn classify(oi_change_pct: f64, price_change_pct: f64) -> OiSignal {
    if oi_change_pct.abs() < MIN_OI_DELTA_PCT {
        OiSignal::Neutral
    } else if oi_change_pct > 0.0 {
        if price_change_pct > PRICE_MOVE_PCT {
            OiSignal::StrongTrend
        } else if price_change_pct < -PRICE_MOVE_PCT {
            OiSignal::BuildingShorts
        } else {
            OiSignal::BuildingLongs
        }
    } else {
        OiSignal::ClosingPositions
    }
}

fn signal_direction(signal: OiSignal, price_change_pct: f64) -> Direction {
    match signal {
        OiSignal::StrongTrend => Direction::from_sign(price_change_pct),
        OiSignal::BuildingLongs => Direction::Long,
        OiSignal::BuildingShorts => Direction::Short,
        OiSignal::ClosingPositions | OiSignal::Neutral => Direction::Neutral,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matrix() {
        assert_eq!(classify(3.0, 2.0), OiSignal::StrongTrend);
        assert_eq!(classify(3.0, -2.0), OiSignal::BuildingShorts);
        assert_eq!(classify(3.0, 0.2), OiSignal::BuildingLongs);
        assert_eq!(classify(-3.0, 2.0), OiSignal::ClosingPositions);
        assert_eq!(classify(1.0, 5.0), OiSignal::Neutral);
    }

    #[test]
    fn delta_threshold_gates_emission() {
        let prev = OiSample {
            open_interest: 1_000.0,
            price: 100.0,
        };
        // +1.9% OI change: below the floor.
        assert!(evaluate("X", &prev, 1_019.0, 101.0, 0).is_none());
        // +2.5%: emits.
        let alert = evaluate("X", &prev, 1_025.0, 102.0, 0).unwrap();
        assert!((alert.oi_change_pct - 2.5).abs() < 1e-9);
        assert_eq!(alert.signal, OiSignal::StrongTrend);
        assert_eq!(alert.direction, Direction::Long);
    }

    #[test]
    fn signal_for_requires_two_samples() {
        let det = OpenInterestDetector::new(Clock::manual(0));
        det.history.write().insert(
            "BTCUSDT".to_string(),
            VecDeque::from(vec![OiSample {
                open_interest: 1_000.0,
                price: 100.0,
            }]),
        );
        assert!(det.signal_for("BTCUSDT").is_none());

        det.history
            .write()
            .get_mut("BTCUSDT")
            .unwrap()
            .push_back(OiSample {
                open_interest: 1_030.0,
                price: 102.0,
            });
        let (signal, change, aligned) = det.signal_for("BTCUSDT").unwrap();
        assert_eq!(signal, OiSignal::StrongTrend);
        assert!((change - 3.0).abs() < 1e-9);
        assert_eq!(aligned, 1.0);
    }

    #[test]
    fn closing_positions_is_neutral_direction() {
        assert_eq!(
            signal_direction(OiSignal::ClosingPositions, -3.0),
            Direction::Neutral
        );
    }
}
