// =============================================================================
// Orion Futures Radar — Main Entry Point
// =============================================================================
//
// Composition root: config, ports, shared state, the ticker ingest loop,
// the scheduler's cadence loops, and the REST/WebSocket surface. Everything
// downstream of ingest degrades to empty output while the exchange stream
// is disconnected.

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod binance;
mod clock;
mod config;
mod detectors;
mod engine;
mod filter;
mod indicators;
mod market;
mod outcome;
mod predictor;
mod scheduler;
mod snapshot;
mod store;
mod types;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::clock::Clock;
use crate::config::RadarConfig;
use crate::outcome::SignalRecord;
use crate::predictor::HttpPredictor;
use crate::scheduler::Scheduler;
use crate::store::{SqliteStore, Store};
use crate::types::{Direction, EntryType, Outcome};

const CONFIG_PATH: &str = "radar_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║         Orion Futures Radar — Starting Up                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RadarConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RadarConfig::default()
    });

    if let Ok(addr) = std::env::var("ORION_BIND_ADDR") {
        config.bind_addr = addr;
    }
    if let Ok(url) = std::env::var("ORION_ML_URL") {
        config.ml.service_url = url;
    }

    // Invalid bounds are fatal here and nowhere else.
    config.validate()?;

    info!(
        db = %config.store.db_path,
        ml_enabled = config.ml.enabled,
        bind = %config.bind_addr,
        "configuration ready"
    );

    // ── 2. Ports ─────────────────────────────────────────────────────────
    let clock = Clock::system();
    let sqlite: Arc<dyn Store> = Arc::new(SqliteStore::open(&config.store.db_path)?);
    let predictor = Arc::new(HttpPredictor::new(&config.ml, clock.clone()));
    let client = Arc::new(binance::FuturesClient::new());

    // ── 3. Shared state ──────────────────────────────────────────────────
    let state = Arc::new(AppState::new(
        config,
        sqlite.clone(),
        predictor,
        client,
        clock,
    ));

    // ── 4. Restart recovery: re-seed the pending set ─────────────────────
    match sqlite.pending_signals().await {
        Ok(rows) => {
            if !rows.is_empty() {
                info!(count = rows.len(), "restoring pending signals from store");
            }
            let records: Vec<SignalRecord> = rows
                .into_iter()
                .filter(|row| row.entry_price > 0.0)
                .map(|row| SignalRecord {
                    id: row.signal_id,
                    symbol: row.symbol,
                    entry_type: EntryType::from_encoding(
                        row.features.get("entry_type").unwrap_or(1.0),
                    ),
                    direction: Direction::from_encoding(row.features.direction()),
                    entry_price: row.entry_price,
                    confidence: row.features.get("smart_confidence").unwrap_or(0.0),
                    timestamp: row.ts,
                    outcome: Outcome::Pending,
                    exit_price: None,
                    pnl_percent: None,
                    features: Some(row.features),
                    ml_prediction: None,
                })
                .collect();
            state.tracker.restore_pending(records);
        }
        Err(e) => warn!(error = %e, "failed to restore pending signals"),
    }

    // ── 5. Session accounting ────────────────────────────────────────────
    match sqlite.open_session(state.clock.now_ms()).await {
        Ok(id) => {
            info!(session_id = id, "session opened");
            *state.session_id.write() = Some(id);
        }
        Err(e) => warn!(error = %e, "failed to open session row"),
    }

    // ── 6. Ticker stream with fixed reconnect backoff ────────────────────
    let stream_state = state.clone();
    tokio::spawn(async move {
        loop {
            if stream_state.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let ingest_state = stream_state.clone();
            let result = binance::run_ticker_stream(binance::DEFAULT_STREAM_URL, move |batch| {
                ingest_state.ingest(batch)
            })
            .await;

            stream_state.connected.store(false, Ordering::SeqCst);
            match result {
                Ok(()) => warn!(
                    "ticker stream ended — reconnecting in {}s",
                    binance::RECONNECT_DELAY_SECS
                ),
                Err(e) => {
                    stream_state.stream_errors.fetch_add(1, Ordering::Relaxed);
                    error!(
                        error = %e,
                        "ticker stream error — reconnecting in {}s",
                        binance::RECONNECT_DELAY_SECS
                    );
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(
                binance::RECONNECT_DELAY_SECS,
            ))
            .await;
        }
    });

    // ── 7. Scheduler loops ───────────────────────────────────────────────
    let _handles = Scheduler::spawn_all(&state);

    // ── 8. API server ────────────────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = state.config.read().bind_addr.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state)
            .into_make_service_with_connect_info::<SocketAddr>();
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 9. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — draining");

    state.shutdown.store(true, Ordering::SeqCst);
    Scheduler::drain(&state).await;

    info!("Orion Futures Radar shut down complete");
    Ok(())
}
