// =============================================================================
// Outcome Tracker — labels emitted signals as wins or losses
// =============================================================================
//
// A signal whose confidence clears the emit threshold (and that has a real
// direction) becomes a PENDING record. After the evaluation window the most
// recent observed price stands in for the exit; there is no true exit
// tracking, so labels lean toward mean-reverting noise. A record is
// evaluated at most once and never leaves WIN/LOSS again.
//
// Completed records live in a bounded in-memory ring; the store keeps all
// of them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::OutcomeConfig;
use crate::engine::{FeatureVector, SmartSignal};
use crate::predictor::Prediction;
use crate::types::{Direction, EntryType, Outcome};

/// Completed records retained in memory.
const COMPLETED_RING: usize = 500;
/// Window of the rolling win-rate view.
const ROLLING_WINDOW: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct SignalRecord {
    pub id: String,
    pub symbol: String,
    pub entry_type: EntryType,
    pub direction: Direction,
    pub entry_price: f64,
    pub confidence: f64,
    pub timestamp: i64,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ml_prediction: Option<Prediction>,
}

/// Aggregate win/loss statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WinRateStats {
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    /// Sum of win percents over sum of |loss percents|.
    pub profit_factor: f64,
}

impl WinRateStats {
    fn from_records<'a>(records: impl Iterator<Item = &'a SignalRecord>) -> Self {
        let mut wins = 0usize;
        let mut losses = 0usize;
        let mut win_sum = 0.0;
        let mut loss_sum = 0.0;

        for r in records {
            let pnl = r.pnl_percent.unwrap_or(0.0);
            match r.outcome {
                Outcome::Win => {
                    wins += 1;
                    win_sum += pnl;
                }
                Outcome::Loss => {
                    losses += 1;
                    loss_sum += pnl.abs();
                }
                Outcome::Pending => {}
            }
        }

        let total = wins + losses;
        Self {
            total,
            wins,
            losses,
            win_rate: if total > 0 {
                wins as f64 / total as f64
            } else {
                0.0
            },
            avg_win_pct: if wins > 0 { win_sum / wins as f64 } else { 0.0 },
            avg_loss_pct: if losses > 0 {
                loss_sum / losses as f64
            } else {
                0.0
            },
            profit_factor: if loss_sum > 0.0 {
                win_sum / loss_sum
            } else if win_sum > 0.0 {
                f64::INFINITY
            } else {
                0.0
            },
        }
    }
}

/// Overall plus sliced statistics for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeBreakdown {
    pub overall: WinRateStats,
    pub by_entry_type: HashMap<String, WinRateStats>,
    pub by_symbol: HashMap<String, WinRateStats>,
    /// Over the most recent completed signals only.
    pub rolling: WinRateStats,
}

pub struct OutcomeTracker {
    clock: Clock,
    emit_threshold: f64,
    evaluation_time_ms: i64,
    win_threshold_pct: f64,
    pending: RwLock<HashMap<String, SignalRecord>>,
    completed: RwLock<VecDeque<SignalRecord>>,
    /// Completions since the last training push.
    completed_since_training: AtomicUsize,
}

impl OutcomeTracker {
    pub fn new(config: &OutcomeConfig, clock: Clock) -> Self {
        Self {
            clock,
            emit_threshold: config.emit_threshold,
            evaluation_time_ms: config.evaluation_time_ms,
            win_threshold_pct: config.win_threshold_pct,
            pending: RwLock::new(HashMap::new()),
            completed: RwLock::new(VecDeque::new()),
            completed_since_training: AtomicUsize::new(0),
        }
    }

    // -------------------------------------------------------------------------
    // Recording
    // -------------------------------------------------------------------------

    /// Record an emitted signal. Gated on the emit threshold and a defined
    /// direction; a symbol with a pending record is not re-recorded.
    pub fn record_signal(
        &self,
        signal: &SmartSignal,
        features: FeatureVector,
    ) -> Option<SignalRecord> {
        if signal.direction == Direction::Neutral || signal.confidence < self.emit_threshold {
            return None;
        }

        let mut pending = self.pending.write();
        if pending.values().any(|r| r.symbol == signal.symbol) {
            return None;
        }

        let record = SignalRecord {
            id: Uuid::new_v4().to_string(),
            symbol: signal.symbol.clone(),
            entry_type: signal.entry_type,
            direction: signal.direction,
            entry_price: signal.price,
            confidence: signal.confidence,
            timestamp: signal.timestamp,
            outcome: Outcome::Pending,
            exit_price: None,
            pnl_percent: None,
            features: Some(features),
            ml_prediction: signal.ml_prediction.clone(),
        };

        debug!(
            symbol = %record.symbol,
            id = %record.id,
            confidence = format!("{:.1}", record.confidence),
            "signal recorded for outcome tracking"
        );
        pending.insert(record.id.clone(), record.clone());
        Some(record)
    }

    /// Attach a late-arriving prediction to a pending record.
    pub fn attach_prediction(&self, id: &str, prediction: Prediction) {
        if let Some(record) = self.pending.write().get_mut(id) {
            record.ml_prediction = Some(prediction);
        }
    }

    /// Re-seed pending records, e.g. from `signal_features` rows with
    /// `outcome = PENDING` after a restart.
    pub fn restore_pending(&self, records: Vec<SignalRecord>) {
        let mut pending = self.pending.write();
        for record in records {
            if record.outcome == Outcome::Pending {
                pending.insert(record.id.clone(), record);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Evaluation
    // -------------------------------------------------------------------------

    /// Evaluate every pending record past the evaluation window, using the
    /// most recent observed price as the exit. Returns the records completed
    /// in this pass.
    pub fn evaluate_pending<F>(&self, price_of: F) -> Vec<SignalRecord>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let now = self.clock.now_ms();
        let mut finished = Vec::new();

        {
            let mut pending = self.pending.write();
            let eligible: Vec<String> = pending
                .values()
                .filter(|r| now - r.timestamp >= self.evaluation_time_ms)
                .map(|r| r.id.clone())
                .collect();

            for id in eligible {
                let Some(record) = pending.get(&id) else {
                    continue;
                };
                let Some(current) = price_of(&record.symbol) else {
                    continue;
                };
                if record.entry_price <= 0.0 {
                    pending.remove(&id);
                    continue;
                }

                let mut record = pending.remove(&id).expect("id was just read");
                let raw = (current - record.entry_price) / record.entry_price * 100.0;
                let pnl = match record.direction {
                    Direction::Short => -raw,
                    _ => raw,
                };

                record.outcome = decide(pnl, self.win_threshold_pct);
                record.exit_price = Some(current);
                record.pnl_percent = Some(pnl);

                info!(
                    symbol = %record.symbol,
                    outcome = %record.outcome,
                    pnl = format!("{:.2}", pnl),
                    "signal evaluated"
                );
                finished.push(record);
            }
        }

        if !finished.is_empty() {
            let mut completed = self.completed.write();
            for record in &finished {
                completed.push_back(record.clone());
                while completed.len() > COMPLETED_RING {
                    completed.pop_front();
                }
            }
            self.completed_since_training
                .fetch_add(finished.len(), Ordering::SeqCst);
        }

        finished
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn stats(&self) -> OutcomeBreakdown {
        let completed = self.completed.read();

        let overall = WinRateStats::from_records(completed.iter());

        let mut by_entry_type: HashMap<String, Vec<&SignalRecord>> = HashMap::new();
        let mut by_symbol: HashMap<String, Vec<&SignalRecord>> = HashMap::new();
        for r in completed.iter() {
            by_entry_type
                .entry(r.entry_type.to_string())
                .or_default()
                .push(r);
            by_symbol.entry(r.symbol.clone()).or_default().push(r);
        }

        let rolling_start = completed.len().saturating_sub(ROLLING_WINDOW);
        let rolling = WinRateStats::from_records(completed.iter().skip(rolling_start));

        OutcomeBreakdown {
            overall,
            by_entry_type: by_entry_type
                .into_iter()
                .map(|(k, v)| (k, WinRateStats::from_records(v.into_iter())))
                .collect(),
            by_symbol: by_symbol
                .into_iter()
                .map(|(k, v)| (k, WinRateStats::from_records(v.into_iter())))
                .collect(),
            rolling,
        }
    }

    pub fn recent_completed(&self, n: usize) -> Vec<SignalRecord> {
        let completed = self.completed.read();
        let start = completed.len().saturating_sub(n);
        completed.iter().skip(start).cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.read().len()
    }

    /// True once enough new completions have piled up for a training push;
    /// resets the counter when it fires.
    pub fn take_training_trigger(&self, min_signals: usize) -> bool {
        if min_signals == 0 {
            return false;
        }
        let current = self.completed_since_training.load(Ordering::SeqCst);
        if current >= min_signals {
            self.completed_since_training.store(0, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

/// The labelling rule: a clear move decides outright, anything inside the
/// band falls back to the sign of the pnl.
fn decide(pnl: f64, threshold: f64) -> Outcome {
    if pnl > threshold {
        Outcome::Win
    } else if pnl < -threshold {
        Outcome::Loss
    } else if pnl >= 0.0 {
        Outcome::Win
    } else {
        Outcome::Loss
    }
}
