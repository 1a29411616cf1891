// =============================================================================
// Predictor Port — external quality model, best-effort only
// =============================================================================
//
// The predictor scores a feature vector into a win probability and a quality
// tier. Everything about it is best-effort: a short 2-second deadline, a
// 30-second health cache, and a 5-second prediction cache keyed by signal
// id. Any failure means the signal ships unenhanced; the engine never
// retries within the same analysis cycle.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::MlConfig;
use crate::engine::FeatureVector;
use crate::types::{Outcome, QualityTier};

/// Predictor response for one feature vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub win_probability: f64,
    pub quality_tier: QualityTier,
    pub confidence: f64,
    pub model_version: String,
}

/// One completed row shipped to the training endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingRow {
    pub signal_id: String,
    pub symbol: String,
    pub features: serde_json::Value,
    pub outcome: Outcome,
    pub pnl_percent: f64,
}

/// The port the engine speaks. Implementations own their caches.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Score a feature vector. Two calls with the same `signal_id` within
    /// the cache window return the same prediction without an outbound call.
    async fn predict(&self, signal_id: &str, features: &FeatureVector) -> Result<Prediction>;

    /// Cheap liveness check, cached by the adapter.
    async fn health(&self) -> bool;

    /// Ship completed rows for retraining. Best-effort.
    async fn train(&self, rows: &[TrainingRow]) -> Result<()>;

    /// Model statistics passthrough for the dashboard.
    async fn stats(&self) -> Result<serde_json::Value>;
}

// =============================================================================
// HTTP adapter
// =============================================================================

pub struct HttpPredictor {
    client: reqwest::Client,
    base_url: String,
    clock: Clock,
    prediction_cache_ms: i64,
    health_cache_ms: i64,
    predictions: RwLock<HashMap<String, (Prediction, i64)>>,
    health: RwLock<Option<(bool, i64)>>,
}

impl HttpPredictor {
    pub fn new(config: &MlConfig, clock: Clock) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .expect("failed to build reqwest client for HttpPredictor");

        Self {
            client,
            base_url: config.service_url.trim_end_matches('/').to_string(),
            clock,
            prediction_cache_ms: config.prediction_cache_secs as i64 * 1_000,
            health_cache_ms: config.health_cache_secs as i64 * 1_000,
            predictions: RwLock::new(HashMap::new()),
            health: RwLock::new(None),
        }
    }

    fn cached_prediction(&self, signal_id: &str) -> Option<Prediction> {
        let now = self.clock.now_ms();
        let cache = self.predictions.read();
        cache.get(signal_id).and_then(|(prediction, at)| {
            (now - at < self.prediction_cache_ms).then(|| prediction.clone())
        })
    }

    fn store_prediction(&self, signal_id: &str, prediction: &Prediction) {
        let now = self.clock.now_ms();
        let mut cache = self.predictions.write();
        cache.retain(|_, (_, at)| now - *at < self.prediction_cache_ms);
        cache.insert(signal_id.to_string(), (prediction.clone(), now));
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn predict(&self, signal_id: &str, features: &FeatureVector) -> Result<Prediction> {
        if let Some(cached) = self.cached_prediction(signal_id) {
            debug!(signal_id, "prediction served from cache");
            return Ok(cached);
        }

        let url = format!("{}/predict", self.base_url);
        let body = serde_json::json!({
            "signal_id": signal_id,
            "features": features.to_named(),
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("POST /predict request failed")?;

        let status = resp.status();
        let payload: serde_json::Value =
            resp.json().await.context("failed to parse predict response")?;

        if !status.is_success() {
            anyhow::bail!("predict returned {}: {}", status, payload);
        }

        let prediction = Prediction {
            win_probability: payload["win_probability"].as_f64().unwrap_or(0.5),
            quality_tier: payload["quality_tier"]
                .as_str()
                .and_then(QualityTier::parse)
                .unwrap_or(QualityTier::Low),
            confidence: payload["confidence"].as_f64().unwrap_or(0.0),
            model_version: payload["model_version"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
        };

        self.store_prediction(signal_id, &prediction);
        Ok(prediction)
    }

    async fn health(&self) -> bool {
        let now = self.clock.now_ms();
        if let Some((healthy, at)) = *self.health.read() {
            if now - at < self.health_cache_ms {
                return healthy;
            }
        }

        let url = format!("{}/health", self.base_url);
        let healthy = match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "predictor health check failed");
                false
            }
        };

        *self.health.write() = Some((healthy, now));
        healthy
    }

    async fn train(&self, rows: &[TrainingRow]) -> Result<()> {
        let url = format!("{}/train", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "records": rows }))
            .send()
            .await
            .context("POST /train request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("train returned {}", resp.status());
        }
        debug!(rows = rows.len(), "training rows shipped");
        Ok(())
    }

    async fn stats(&self) -> Result<serde_json::Value> {
        let url = format!("{}/stats", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /stats request failed")?;
        resp.json().await.context("failed to parse stats response")
    }
}
