// =============================================================================
// Correlation Detector — alt behaviour relative to BTC
// =============================================================================
//
// Keeps a rolling 60-point price series per symbol, sampled on the
// correlation cadence, and computes Pearson correlation against BTC over
// equal-length windows. Low |r| is a decoupling; a correlated alt whose
// window change beats BTC's by more than two points is an out- or
// under-performer.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;

use crate::clock::Clock;
use crate::market::DataStore;
use crate::types::Direction;

use super::magnitude_desc;

const SERIES_DEPTH: usize = 60;
/// Minimum overlapping points for a meaningful correlation.
const MIN_POINTS: usize = 10;
/// |r| below this is decoupled.
const DECOUPLE_R: f64 = 0.3;
/// |altΔ - btcΔ| beyond this is out/under-performance.
const OUTPERFORM_PCT: f64 = 2.0;

const BTC_SYMBOL: &str = "BTCUSDT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrelationKind {
    Decoupling,
    Outperformance,
    Underperformance,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationAlert {
    pub symbol: String,
    pub correlation: f64,
    pub alt_change_pct: f64,
    pub btc_change_pct: f64,
    pub kind: CorrelationKind,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct CorrelationDetector {
    clock: Clock,
    series: RwLock<HashMap<String, VecDeque<f64>>>,
}

impl CorrelationDetector {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Sample the latest price of every tracked symbol.
    pub fn update(&self, store: &DataStore) {
        let mut series = self.series.write();
        for state in store.all_states() {
            let ring = series
                .entry(state.symbol.clone())
                .or_insert_with(|| VecDeque::with_capacity(SERIES_DEPTH + 1));
            ring.push_back(state.current.last_price);
            while ring.len() > SERIES_DEPTH {
                ring.pop_front();
            }
        }
    }

    pub fn detect(&self) -> Vec<CorrelationAlert> {
        let now = self.clock.now_ms();
        let series = self.series.read();
        let Some(btc) = series.get(BTC_SYMBOL) else {
            return Vec::new();
        };

        let mut alerts = Vec::new();
        for (symbol, alt) in series.iter() {
            if symbol == BTC_SYMBOL {
                continue;
            }
            let Some((r, alt_change, btc_change)) = relate(alt, btc) else {
                continue;
            };

            let diff = alt_change - btc_change;
            let kind = if r.abs() < DECOUPLE_R {
                CorrelationKind::Decoupling
            } else if diff > OUTPERFORM_PCT {
                CorrelationKind::Outperformance
            } else if diff < -OUTPERFORM_PCT {
                CorrelationKind::Underperformance
            } else {
                continue;
            };

            let direction = match kind {
                CorrelationKind::Outperformance => Direction::Long,
                CorrelationKind::Underperformance => Direction::Short,
                CorrelationKind::Decoupling => Direction::Neutral,
            };

            alerts.push(CorrelationAlert {
                symbol: symbol.clone(),
                correlation: r,
                alt_change_pct: alt_change,
                btc_change_pct: btc_change,
                kind,
                direction,
                timestamp: now,
            });
        }

        alerts.sort_by(|a, b| {
            magnitude_desc(
                a.alt_change_pct - a.btc_change_pct,
                b.alt_change_pct - b.btc_change_pct,
            )
            .then_with(|| a.symbol.cmp(&b.symbol))
        });
        alerts
    }

    /// (r vs BTC, alt window change minus BTC window change) for the feature
    /// vector. `None` with insufficient overlap.
    pub fn btc_metrics_for(&self, symbol: &str) -> Option<(f64, f64)> {
        let series = self.series.read();
        let btc = series.get(BTC_SYMBOL)?;
        let alt = series.get(symbol)?;
        let (r, alt_change, btc_change) = relate(alt, btc)?;
        Some((r, alt_change - btc_change))
    }
}

/// Pearson r over the overlapping tail plus both window changes.
fn relate(alt: &VecDeque<f64>, btc: &VecDeque<f64>) -> Option<(f64, f64, f64)> {
    let len = alt.len().min(btc.len());
    if len < MIN_POINTS {
        return None;
    }

    let alt_tail: Vec<f64> = alt.iter().skip(alt.len() - len).copied().collect();
    let btc_tail: Vec<f64> = btc.iter().skip(btc.len() - len).copied().collect();

    let r = pearson(&alt_tail, &btc_tail)?;
    let alt_change = window_change(&alt_tail)?;
    let btc_change = window_change(&btc_tail)?;
    Some((r, alt_change, btc_change))
}

fn window_change(series: &[f64]) -> Option<f64> {
    let first = *series.first()?;
    let last = *series.last()?;
    if first == 0.0 {
        return None;
    }
    Some((last - first) / first * 100.0)
}

/// Pearson correlation; `None` when either series has no variance.
fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    let r = cov / (var_a.sqrt() * var_b.sqrt());
    r.is_finite().then_some(r)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(det: &CorrelationDetector, symbol: &str, values: &[f64]) {
        let mut series = det.series.write();
        let ring = series.entry(symbol.to_string()).or_default();
        for &v in values {
            ring.push_back(v);
        }
    }

    #[test]
    fn pearson_perfect_correlation() {
        let a: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..20).map(|i| 2.0 * i as f64 + 5.0).collect();
        let r = pearson(&a, &b).unwrap();
        assert!((r - 1.0).abs() < 1e-12);

        let c: Vec<f64> = (0..20).map(|i| -(i as f64)).collect();
        let r = pearson(&a, &c).unwrap();
        assert!((r + 1.0).abs() < 1e-12);
    }

    #[test]
    fn pearson_flat_series_is_none() {
        let a = vec![1.0; 20];
        let b: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert!(pearson(&a, &b).is_none());
    }

    #[test]
    fn outperformance_long() {
        let det = CorrelationDetector::new(Clock::manual(0));
        // BTC +1%, alt +5%, tightly correlated shapes.
        let btc: Vec<f64> = (0..20).map(|i| 100.0 + 0.05 * i as f64).collect();
        let alt: Vec<f64> = (0..20).map(|i| 10.0 + 0.025 * i as f64).collect();
        feed(&det, BTC_SYMBOL, &btc);
        feed(&det, "ALTUSDT", &alt);

        let alerts = det.detect();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, CorrelationKind::Outperformance);
        assert_eq!(alerts[0].direction, Direction::Long);
    }

    #[test]
    fn decoupling_on_low_r() {
        let det = CorrelationDetector::new(Clock::manual(0));
        let btc: Vec<f64> = (0..30).map(|i| 100.0 + (i as f64 * 0.9).sin()).collect();
        // Alt moves on its own schedule: near-zero correlation.
        let alt: Vec<f64> = (0..30).map(|i| 10.0 + (i as f64 * 2.3 + 1.0).cos() * 0.01).collect();
        feed(&det, BTC_SYMBOL, &btc);
        feed(&det, "ALTUSDT", &alt);

        let alerts = det.detect();
        if let Some(a) = alerts.first() {
            assert_eq!(a.kind, CorrelationKind::Decoupling);
            assert!(a.correlation.abs() < DECOUPLE_R);
        }
    }

    #[test]
    fn short_series_is_silent() {
        let det = CorrelationDetector::new(Clock::manual(0));
        feed(&det, BTC_SYMBOL, &[100.0, 101.0, 102.0]);
        feed(&det, "ALTUSDT", &[10.0, 10.5, 11.0]);
        assert!(det.detect().is_empty());
        assert!(det.btc_metrics_for("ALTUSDT").is_none());
    }

    #[test]
    fn correlated_tracker_is_silent() {
        let det = CorrelationDetector::new(Clock::manual(0));
        // Alt mirrors BTC exactly: correlated, no performance gap.
        let btc: Vec<f64> = (0..20).map(|i| 100.0 + 0.05 * i as f64).collect();
        let alt: Vec<f64> = (0..20).map(|i| 10.0 + 0.005 * i as f64).collect();
        feed(&det, BTC_SYMBOL, &btc);
        feed(&det, "ALTUSDT", &alt);
        assert!(det.detect().is_empty());
    }
}
