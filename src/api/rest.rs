// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. The feed is a read-only broadcast of
// public market analysis, so there is no authentication; abuse control is
// per-IP connection and message limits on the WebSocket side.
//
// CORS is configured permissively for development; tighten allowed origins
// in production.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::app_state::AppState;
use crate::filter::FilterConfig;
use crate::store::Store;
use crate::types::Direction;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/snapshot", get(snapshot))
        .route("/api/v1/signals", get(signals))
        .route("/api/v1/signals/early", get(signals_early))
        .route("/api/v1/signals/breakouts", get(signals_breakouts))
        .route("/api/v1/signals/reversals", get(signals_reversals))
        .route("/api/v1/signals/low-risk", get(signals_low_risk))
        .route("/api/v1/signals/:symbol", get(signal_for_symbol))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/sentiment", get(sentiment))
        .route("/api/v1/sentiment/:symbol", get(sentiment_for_symbol))
        .route("/api/v1/filter", get(get_filter))
        .route("/api/v1/filter", post(set_filter))
        .route("/api/v1/export.csv", get(export_csv))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health & status
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status())
}

// =============================================================================
// Snapshot
// =============================================================================

async fn snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

// =============================================================================
// Signals
// =============================================================================

#[derive(Deserialize)]
struct SignalsQuery {
    limit: Option<usize>,
    direction: Option<String>,
}

async fn signals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SignalsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(20).min(100);
    let direction = match query.direction.as_deref() {
        Some("LONG") => Some(Direction::Long),
        Some("SHORT") => Some(Direction::Short),
        _ => None,
    };
    Json(state.engine.top_signals(limit, direction))
}

async fn signals_early(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let limit = state.config.read().ui.max_displayed;
    Json(state.engine.early_entries(limit))
}

async fn signals_breakouts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let limit = state.config.read().ui.max_displayed;
    Json(state.engine.breakout_candidates(limit))
}

async fn signals_reversals(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let limit = state.config.read().ui.max_displayed;
    Json(state.reversals.reversal_signals(limit))
}

async fn signals_low_risk(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let limit = state.config.read().ui.max_displayed;
    Json(state.engine.low_risk_setups(limit))
}

async fn signal_for_symbol(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = symbol.to_uppercase();
    match state.engine.signal_for(&symbol) {
        Some(signal) => Json(serde_json::json!({ "signal": signal })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no signal for symbol", "symbol": symbol })),
        )
            .into_response(),
    }
}

// =============================================================================
// Stats & sentiment
// =============================================================================

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.tracker.stats())
}

async fn sentiment(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.detectors.sentiment.market() {
        Some(market) => Json(serde_json::json!({ "market": market })).into_response(),
        None => Json(serde_json::json!({ "market": null })).into_response(),
    }
}

async fn sentiment_for_symbol(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = symbol.to_uppercase();
    match state.detectors.sentiment.sentiment_for(&symbol) {
        Some(sentiment) => Json(serde_json::json!({ "sentiment": sentiment })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no sentiment for symbol", "symbol": symbol })),
        )
            .into_response(),
    }
}

// =============================================================================
// Filter control
// =============================================================================

async fn get_filter(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.filter.read().config().clone())
}

#[derive(Deserialize)]
struct FilterRequest {
    /// Named preset: all | highVolume | bigMovers | topTier.
    preset: Option<String>,
    /// Full config override; wins over `preset` when both are present.
    config: Option<FilterConfig>,
}

async fn set_filter(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FilterRequest>,
) -> impl IntoResponse {
    let config = match (request.config, request.preset.as_deref()) {
        (Some(config), _) => config,
        (None, Some(name)) => match FilterConfig::preset(name) {
            Some(config) => config,
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": "unknown preset", "preset": name })),
                )
                    .into_response();
            }
        },
        (None, None) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "preset or config required" })),
            )
                .into_response();
        }
    };

    info!(?config, "filter updated via API");
    state.set_filter(config.clone());
    Json(config).into_response()
}

// =============================================================================
// Export
// =============================================================================

async fn export_csv(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.export_completed_csv().await {
        Ok(csv) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv")],
            csv,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
