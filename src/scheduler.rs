// =============================================================================
// Scheduler — cadence loops over the detector set and the outcome pipeline
// =============================================================================
//
// One spawned task per loop, each a `tokio::time::interval` with
// `MissedTickBehavior::Skip`: when a tick's work runs past the period the
// overdue ticks are dropped, never queued, so a slow REST update coalesces
// instead of piling up. Every loop observes the shutdown flag at its next
// tick and exits; `drain` then flushes the session.
//
// Production cadences (seconds): funding/OI 120, MTF/pattern 60,
// entry-timing/correlation 30, whale 10, top-picks/liquidation 5,
// snapshot 2, outcome evaluation 15, save pulse 30.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::engine::features::build_features;
use crate::predictor::{Predictor, TrainingRow};
use crate::store::{AlertRow, OpportunityRow, SignalFeaturesRow, Store};
use crate::types::{Direction, Outcome};

pub struct Scheduler;

impl Scheduler {
    /// Spawn every cadence loop. Handles are returned for the caller to
    /// await on shutdown if it cares to.
    pub fn spawn_all(state: &Arc<AppState>) -> Vec<JoinHandle<()>> {
        let cadence = state.config.read().cadence.clone();
        let save_pulse = state.config.read().store.save_pulse_secs;
        let mut handles = Vec::new();

        // ── Funding (REST) ──────────────────────────────────────────────
        handles.push(spawn_loop(state, "funding", cadence.funding_secs, |st| async move {
            if let Err(e) = st.detectors.funding.update(&st.client, &st.data).await {
                warn!(error = %e, "funding update failed; previous cache kept");
            }
        }));

        // ── Open interest (REST, batched) ───────────────────────────────
        handles.push(spawn_loop(
            state,
            "open_interest",
            cadence.open_interest_secs,
            |st| async move {
                st.detectors.open_interest.update(&st.client, &st.data).await;
            },
        ));

        // ── Multi-timeframe (REST, rotating) ────────────────────────────
        handles.push(spawn_loop(state, "mtf", cadence.mtf_secs, |st| async move {
            st.detectors.multi_timeframe.update(&st.client, &st.data).await;
        }));

        // ── Patterns (REST, rotating) ───────────────────────────────────
        handles.push(spawn_loop(state, "pattern", cadence.pattern_secs, |st| async move {
            st.detectors.pattern.update(&st.client, &st.data).await;
        }));

        // ── Entry timing (REST, rotating) ───────────────────────────────
        handles.push(spawn_loop(
            state,
            "entry_timing",
            cadence.entry_timing_secs,
            |st| async move {
                st.detectors.entry_timing.update(&st.client, &st.data).await;
            },
        ));

        // ── Correlation + sentiment (in-memory) ─────────────────────────
        handles.push(spawn_loop(
            state,
            "correlation",
            cadence.correlation_secs,
            |st| async move {
                st.detectors.correlation.update(&st.data);
                st.detectors.sentiment.update(
                    &st.data,
                    &st.detectors.funding,
                    &st.detectors.open_interest,
                );
            },
        ));

        // ── Whale flow (in-memory) ──────────────────────────────────────
        handles.push(spawn_loop(state, "whale", cadence.whale_secs, |st| async move {
            st.detectors.whale.update(&st.data);
        }));

        // ── Liquidation inference (in-memory) ───────────────────────────
        handles.push(spawn_loop(
            state,
            "liquidation",
            cadence.liquidation_secs,
            |st| async move {
                st.detectors.liquidation.update(&st.data);
            },
        ));

        // ── Top picks ───────────────────────────────────────────────────
        handles.push(spawn_loop(state, "top_picks", cadence.top_picks_secs, |st| async move {
            let picks = st.detectors.top_picker.detect(&st.data, &st.detectors);
            *st.top_picks.write() = picks;
        }));

        // ── Snapshot / analysis cycle ───────────────────────────────────
        handles.push(spawn_loop(state, "snapshot", cadence.snapshot_secs, |st| async move {
            run_analysis_cycle(&st).await;
            emit_critical_edge_alerts(&st).await;
            st.increment_version();
        }));

        // ── Outcome evaluation ──────────────────────────────────────────
        handles.push(spawn_loop(
            state,
            "outcome",
            cadence.outcome_eval_secs,
            |st| async move {
                evaluate_outcomes(&st).await;
                st.detectors.new_listing.prune(&st.data);
            },
        ));

        // ── Durability pulse ────────────────────────────────────────────
        handles.push(spawn_loop(state, "save", save_pulse, |st| async move {
            persist_opportunities(&st).await;
        }));

        info!(loops = handles.len(), "scheduler loops running");
        handles
    }

    /// Cooperative drain on shutdown: one last snapshot for subscribers,
    /// then the session row is closed.
    pub async fn drain(state: &Arc<AppState>) {
        info!("scheduler draining");

        persist_opportunities(state).await;
        let snapshot = state.build_snapshot();
        debug!(version = snapshot.state_version, "final snapshot built");

        let session_id = *state.session_id.read();
        if let Some(id) = session_id {
            let result = state
                .store
                .close_session(
                    id,
                    state.clock.now_ms(),
                    state.session_opportunities.load(Ordering::Relaxed) as i64,
                    state.session_alerts.load(Ordering::Relaxed) as i64,
                )
                .await;
            match result {
                Ok(()) => info!(session_id = id, "session closed"),
                Err(e) => warn!(error = %e, "failed to close session"),
            }
        }
    }
}

/// Spawn one cadence loop. The body runs inline in the loop task, so a
/// long-running body simply causes later ticks to be skipped.
fn spawn_loop<F, Fut>(
    state: &Arc<AppState>,
    name: &'static str,
    period_secs: u64,
    body: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<AppState>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let state = state.clone();
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(period_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if state.shutdown.load(Ordering::SeqCst) {
                debug!(name, "loop observed shutdown");
                break;
            }
            body(state.clone()).await;
            state.mark_tick(name);
        }
    })
}

/// Fuse every filter-passing symbol, record emit-worthy signals, and give
/// the predictor its best-effort chance to enhance them.
async fn run_analysis_cycle(state: &Arc<AppState>) {
    let (emit_threshold, ml_enabled) = {
        let config = state.config.read();
        (config.outcome.emit_threshold, config.ml.enabled)
    };

    for symbol in state.data.symbols() {
        if !state.passes_filter(&symbol) {
            continue;
        }

        let Some(signal) = state.engine.analyze_symbol(&symbol, &state.data, &state.detectors)
        else {
            continue;
        };
        state.reversals.analyze_symbol(&symbol, &state.data, &state.detectors);

        if signal.direction == Direction::Neutral || signal.confidence < emit_threshold {
            continue;
        }

        let features = build_features(&signal, &state.data, &state.detectors);
        let Some(record) = state.tracker.record_signal(&signal, features.clone()) else {
            continue;
        };

        // ML enhancement is best-effort: failure ships the signal with its
        // rule confidence only, and there is no retry this cycle.
        let mut prediction = None;
        if ml_enabled && state.predictor.health().await {
            match state.predictor.predict(&record.id, &features).await {
                Ok(p) => {
                    state.engine.apply_prediction(&symbol, p.clone());
                    state.tracker.attach_prediction(&record.id, p.clone());
                    prediction = Some(p);
                }
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "prediction unavailable; signal unenhanced");
                }
            }
        }

        let row = SignalFeaturesRow {
            signal_id: record.id.clone(),
            symbol: record.symbol.clone(),
            ts: record.timestamp,
            entry_price: record.entry_price,
            features,
            outcome: Outcome::Pending,
            pnl_percent: None,
            ml_win_probability: prediction.as_ref().map(|p| p.win_probability),
            ml_quality_tier: prediction
                .as_ref()
                .map(|p| p.quality_tier.as_str().to_string()),
            ml_model_version: prediction.as_ref().map(|p| p.model_version.clone()),
        };
        if let Err(e) = state.store.upsert_signal_features(&row).await {
            state.store_errors.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "failed to persist signal features; recoverable on next pulse");
        }

        state.notifications.push(
            "SMART_SIGNAL",
            &record.symbol,
            format!(
                "{} {} signal at {:.4} ({:.0}% confidence)",
                record.symbol, record.direction, record.entry_price, record.confidence
            ),
            "info",
        );
    }
}

/// Diff the critical-volatility set against the previous tick; each new
/// entrant fires exactly one alert.
async fn emit_critical_edge_alerts(state: &Arc<AppState>) {
    let current = state.detectors.volatility.critical_symbols(&state.data);
    let previous = {
        let mut set = state.critical_set.write();
        std::mem::replace(&mut *set, current.clone())
    };

    for symbol in current.difference(&previous) {
        let change = state
            .data
            .current(symbol)
            .map(|t| t.price_change_percent)
            .unwrap_or(0.0);
        let message = format!("{symbol} moved {change:+.1}% in 24h");

        state
            .notifications
            .push("CRITICAL_VOLATILITY", symbol, message.clone(), "warning");

        let alert = AlertRow {
            symbol: symbol.clone(),
            kind: "CRITICAL_VOLATILITY".to_string(),
            message,
            level: "warning".to_string(),
            created_at: state.clock.now_ms(),
        };
        match state.store.record_alert(&alert).await {
            Ok(()) => {
                state.session_alerts.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                state.store_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "failed to persist alert");
            }
        }
    }
}

/// Evaluate due records, persist their outcomes, and trigger a training
/// push when enough completions have accumulated.
async fn evaluate_outcomes(state: &Arc<AppState>) {
    let finished = state.tracker.evaluate_pending(|sym| state.data.last_price(sym));

    for record in &finished {
        if let Err(e) = state
            .store
            .update_outcome(&record.id, record.outcome, record.pnl_percent)
            .await
        {
            state.store_errors.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, signal_id = %record.id, "failed to persist outcome");
        }

        state.notifications.push(
            "SIGNAL_OUTCOME",
            &record.symbol,
            format!(
                "{} {} closed {} ({:+.2}%)",
                record.symbol,
                record.direction,
                record.outcome,
                record.pnl_percent.unwrap_or(0.0)
            ),
            if record.outcome == Outcome::Win {
                "info"
            } else {
                "warning"
            },
        );
    }

    let (min_training, ml_enabled) = {
        let config = state.config.read();
        (config.ml.min_signals_for_training, config.ml.enabled)
    };
    if ml_enabled && state.tracker.take_training_trigger(min_training) {
        let rows: Vec<TrainingRow> = state
            .tracker
            .recent_completed(min_training)
            .into_iter()
            .filter_map(|r| {
                let features = r.features.as_ref()?.to_named();
                Some(TrainingRow {
                    signal_id: r.id,
                    symbol: r.symbol,
                    features,
                    outcome: r.outcome,
                    pnl_percent: r.pnl_percent.unwrap_or(0.0),
                })
            })
            .collect();
        if !rows.is_empty() {
            match state.predictor.train(&rows).await {
                Ok(()) => info!(rows = rows.len(), "training batch shipped"),
                Err(e) => debug!(error = %e, "training push failed; will retry on next trigger"),
            }
        }
    }
}

/// Persist the current top picks as opportunity rows. The unique
/// (symbol, type, created_at) key makes repeats of an unchanged pick a
/// no-op.
async fn persist_opportunities(state: &Arc<AppState>) {
    let picks = state.top_picks.read().clone();
    for pick in picks {
        if !state.passes_filter(&pick.symbol) {
            continue;
        }
        let is_new = state
            .data
            .symbol_state(&pick.symbol)
            .map(|s| s.is_new)
            .unwrap_or(false);

        let row = OpportunityRow {
            symbol: pick.symbol.clone(),
            kind: "TOP_PICK".to_string(),
            score: pick.score,
            direction: pick.direction.to_string(),
            change_24h: Some(pick.change_24h),
            vol_mult: state.detectors.volume.multiplier_for(&pick.symbol),
            velocity: state
                .detectors
                .velocity
                .velocity_for(&state.data, &pick.symbol)
                .map(|(v, _)| v),
            range_pct: None,
            is_new,
            last_price: pick.last_price,
            created_at: pick.timestamp,
        };
        match state.store.record_opportunity(&row).await {
            Ok(()) => {
                state.session_opportunities.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                state.store_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "failed to persist opportunity");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::config::RadarConfig;
    use crate::market::Ticker;
    use crate::predictor::HttpPredictor;
    use crate::store::{SqliteStore, Store};
    use crate::binance::FuturesClient;

    fn ticker(symbol: &str, pct: f64, qv: f64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: 100.0 + pct,
            price_change: pct,
            price_change_percent: pct,
            open_price: 100.0,
            high_price: 101.0 + pct,
            low_price: 99.0,
            volume: 0.0,
            quote_volume: qv,
            trade_count: 0,
            event_time: 1,
        }
    }

    fn state_with_manual_clock() -> (Arc<AppState>, Clock) {
        let clock = Clock::manual(0);
        let mut config = RadarConfig::default();
        // Keep the predictor out of unit tests.
        config.ml.enabled = false;
        let state = Arc::new(AppState::new(
            config.clone(),
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            Arc::new(HttpPredictor::new(&config.ml, clock.clone())),
            Arc::new(FuturesClient::new()),
            clock.clone(),
        ));
        (state, clock)
    }

    #[tokio::test]
    async fn critical_edge_alert_fires_once_per_entrant() {
        let (state, clock) = state_with_manual_clock();
        state.ingest(vec![
            ticker("AAAUSDT", 30.0, 2e7),
            ticker("BBBUSDT", 1.0, 2e7),
        ]);

        emit_critical_edge_alerts(&state).await;
        let first = state.notifications.drain();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, "CRITICAL_VOLATILITY");
        assert_eq!(first[0].symbol, "AAAUSDT");

        // Same set next tick: no new alert.
        emit_critical_edge_alerts(&state).await;
        assert!(state.notifications.is_empty());

        // A new entrant fires exactly one more.
        clock.advance(120_000);
        let mut crash = ticker("BBBUSDT", -28.0, 2e7);
        crash.event_time = 2;
        state.ingest(vec![crash]);
        emit_critical_edge_alerts(&state).await;
        let second = state.notifications.drain();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].symbol, "BBBUSDT");
        assert_eq!(state.session_alerts.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn analysis_cycle_records_and_persists_strong_signals() {
        let (state, _clock) = state_with_manual_clock();
        // An 8% mover alone stays inside the neutral net band (0.32 * 20 =
        // 6.4), so nothing is recorded.
        state.ingest(vec![ticker("AAAUSDT", 8.0, 2e7)]);
        run_analysis_cycle(&state).await;
        assert_eq!(state.tracker.pending_count(), 0);

        // Volume tracking deep enough for a spike component pushes the
        // fused confidence over the emit threshold.
        let mut cumulative = 2e7;
        for i in 0..31i64 {
            cumulative += if i < 21 { 1_000.0 } else { 5_000.0 };
            let mut t = ticker("AAAUSDT", 25.0, cumulative);
            t.event_time = 2 + i;
            state.ingest(vec![t]);
        }
        run_analysis_cycle(&state).await;
        assert_eq!(state.tracker.pending_count(), 1);

        let pending = state.store.pending_signals().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].symbol, "AAAUSDT");
        assert_eq!(pending[0].features.get("price_change_24h"), Some(25.0));
    }

    #[tokio::test]
    async fn outcome_loop_persists_results() {
        let (state, clock) = state_with_manual_clock();
        state.ingest(vec![ticker("AAAUSDT", 25.0, 2e7)]);

        // Seed a pending record directly through the tracker.
        let mut cumulative = 2e7;
        for i in 0..31i64 {
            cumulative += if i < 21 { 1_000.0 } else { 5_000.0 };
            let mut t = ticker("AAAUSDT", 25.0, cumulative);
            t.event_time = 2 + i;
            state.ingest(vec![t]);
        }
        run_analysis_cycle(&state).await;
        assert_eq!(state.tracker.pending_count(), 1);

        clock.advance(16 * 60_000);
        // Push the price up 2% so the record completes as a win.
        let mut t = ticker("AAAUSDT", 25.0, cumulative + 1_000.0);
        t.last_price = 127.5;
        t.event_time = 100;
        state.ingest(vec![t]);

        evaluate_outcomes(&state).await;
        assert_eq!(state.tracker.pending_count(), 0);
        assert_eq!(state.tracker.completed_count(), 1);

        let completed = state.store.completed_signals(10).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_ne!(completed[0].outcome, Outcome::Pending);
    }
}
