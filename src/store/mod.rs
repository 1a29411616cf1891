// =============================================================================
// Store port — persistence surface for signals, outcomes, and sessions
// =============================================================================
//
// Writes are recoverable by design: the pending set is derivable from
// `signal_features` rows with `outcome = PENDING`, so a dropped write is
// repaired on the next pulse or restart.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::engine::FeatureVector;
use crate::types::Outcome;

pub use sqlite::SqliteStore;

/// One row of the append-only `opportunities` table.
#[derive(Debug, Clone, Serialize)]
pub struct OpportunityRow {
    pub symbol: String,
    pub kind: String,
    pub score: f64,
    pub direction: String,
    pub change_24h: Option<f64>,
    pub vol_mult: Option<f64>,
    pub velocity: Option<f64>,
    pub range_pct: Option<f64>,
    pub is_new: bool,
    pub last_price: f64,
    pub created_at: i64,
}

/// One row of the append-only `alerts` table.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRow {
    pub symbol: String,
    pub kind: String,
    pub message: String,
    pub level: String,
    pub created_at: i64,
}

/// One `signal_features` row: identity, the 35-column vector, and outcome.
/// `entry_price` is an implementation column outside the feature schema; it
/// lets the pending set be re-evaluated after a restart.
#[derive(Debug, Clone, Serialize)]
pub struct SignalFeaturesRow {
    pub signal_id: String,
    pub symbol: String,
    pub ts: i64,
    pub entry_price: f64,
    pub features: FeatureVector,
    pub outcome: Outcome,
    pub pnl_percent: Option<f64>,
    pub ml_win_probability: Option<f64>,
    pub ml_quality_tier: Option<String>,
    pub ml_model_version: Option<String>,
}

/// One `ml_model_metrics` row.
#[derive(Debug, Clone, Serialize)]
pub struct ModelMetricsRow {
    pub model_version: String,
    pub training_date: i64,
    pub training_samples: i64,
    pub validation_auc: f64,
    pub validation_accuracy: f64,
    pub win_rate_predicted: f64,
    pub win_rate_actual: f64,
    pub feature_importance_json: String,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn record_opportunity(&self, row: &OpportunityRow) -> Result<()>;

    async fn record_alert(&self, row: &AlertRow) -> Result<()>;

    /// Open a session row; returns its id.
    async fn open_session(&self, started_at: i64) -> Result<i64>;

    async fn close_session(
        &self,
        session_id: i64,
        ended_at: i64,
        total_opportunities: i64,
        total_alerts: i64,
    ) -> Result<()>;

    /// Idempotent on `signal_id`: a repeat upsert replaces the row.
    async fn upsert_signal_features(&self, row: &SignalFeaturesRow) -> Result<()>;

    /// Flip a row's outcome by `signal_id`.
    async fn update_outcome(
        &self,
        signal_id: &str,
        outcome: Outcome,
        pnl_percent: Option<f64>,
    ) -> Result<()>;

    /// Rows still pending, for restart recovery.
    async fn pending_signals(&self) -> Result<Vec<SignalFeaturesRow>>;

    /// Completed rows, most recent first.
    async fn completed_signals(&self, limit: usize) -> Result<Vec<SignalFeaturesRow>>;

    /// CSV of completed rows in ascending `ts`.
    async fn export_completed_csv(&self) -> Result<String>;

    /// Re-ingest rows from [`Store::export_completed_csv`] output. Returns
    /// the number of rows upserted.
    async fn import_csv(&self, csv: &str) -> Result<usize>;

    async fn record_model_metrics(&self, row: &ModelMetricsRow) -> Result<()>;
}
