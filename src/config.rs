// =============================================================================
// Radar Configuration — every tunable with a defined default
// =============================================================================
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file. Validation runs once at
// startup; out-of-bounds values are fatal there and nowhere else.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::filter::FilterConfig;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_min_change_24h() -> f64 {
    10.0
}

fn default_critical_change_24h() -> f64 {
    25.0
}

fn default_spike_multiplier() -> f64 {
    3.0
}

fn default_avg_window_minutes() -> i64 {
    60
}

fn default_min_quote_volume() -> f64 {
    1_000_000.0
}

fn default_min_velocity() -> f64 {
    0.5
}

fn default_velocity_window_minutes() -> i64 {
    5
}

fn default_acceleration_threshold() -> f64 {
    0.1
}

fn default_min_range() -> f64 {
    15.0
}

fn default_refresh_ms() -> u64 {
    2_000
}

fn default_max_displayed() -> usize {
    15
}

fn default_true() -> bool {
    true
}

fn default_ml_weight() -> f64 {
    0.6
}

fn default_rule_weight() -> f64 {
    0.4
}

fn default_filter_threshold() -> f64 {
    0.35
}

fn default_min_signals_for_training() -> usize {
    50
}

fn default_service_url() -> String {
    "http://127.0.0.1:8100".to_string()
}

fn default_request_timeout_ms() -> u64 {
    2_000
}

fn default_health_cache_secs() -> u64 {
    30
}

fn default_prediction_cache_secs() -> u64 {
    5
}

fn default_funding_secs() -> u64 {
    120
}

fn default_mtf_secs() -> u64 {
    60
}

fn default_fast_secs() -> u64 {
    30
}

fn default_whale_secs() -> u64 {
    10
}

fn default_picker_secs() -> u64 {
    5
}

fn default_snapshot_secs() -> u64 {
    2
}

fn default_outcome_eval_secs() -> u64 {
    15
}

fn default_emit_threshold() -> f64 {
    60.0
}

fn default_evaluation_time_ms() -> i64 {
    15 * 60 * 1000
}

fn default_win_threshold_pct() -> f64 {
    0.5
}

fn default_db_path() -> String {
    "radar.db".to_string()
}

fn default_save_pulse_secs() -> u64 {
    30
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityConfig {
    /// Minimum |24h %| to emit.
    #[serde(default = "default_min_change_24h")]
    pub min_change_24h: f64,

    /// |24h %| at which an alert is marked critical.
    #[serde(default = "default_critical_change_24h")]
    pub critical_change_24h: f64,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            min_change_24h: default_min_change_24h(),
            critical_change_24h: default_critical_change_24h(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// recentRate / avgRate ratio required for a spike.
    #[serde(default = "default_spike_multiplier")]
    pub spike_multiplier: f64,

    /// Retention window for the cumulative-volume history, minutes.
    #[serde(default = "default_avg_window_minutes")]
    pub avg_window_minutes: i64,

    /// 24h quote-volume floor; equal is excluded.
    #[serde(default = "default_min_quote_volume")]
    pub min_quote_volume: f64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            spike_multiplier: default_spike_multiplier(),
            avg_window_minutes: default_avg_window_minutes(),
            min_quote_volume: default_min_quote_volume(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityConfig {
    /// Minimum |%/min| to emit.
    #[serde(default = "default_min_velocity")]
    pub min_velocity: f64,

    /// Price-history retention window, minutes.
    #[serde(default = "default_velocity_window_minutes")]
    pub window_minutes: i64,

    /// |v| delta against the previous observation that separates
    /// accelerating / steady / decelerating.
    #[serde(default = "default_acceleration_threshold")]
    pub acceleration_threshold: f64,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            min_velocity: default_min_velocity(),
            window_minutes: default_velocity_window_minutes(),
            acceleration_threshold: default_acceleration_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeConfig {
    /// Minimum (high - low) / open percent.
    #[serde(default = "default_min_range")]
    pub min_range: f64,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            min_range: default_min_range(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,

    /// Top-K cap for each snapshot category.
    #[serde(default = "default_max_displayed")]
    pub max_displayed: usize,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            refresh_ms: default_refresh_ms(),
            max_displayed: default_max_displayed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Weight of the predictor probability in the blended confidence.
    #[serde(default = "default_ml_weight")]
    pub ml_weight: f64,

    /// Weight of the rule-based confidence in the blended confidence.
    #[serde(default = "default_rule_weight")]
    pub rule_weight: f64,

    /// Signals whose predicted win probability falls below this are tiered
    /// FILTER by the predictor.
    #[serde(default = "default_filter_threshold")]
    pub filter_threshold: f64,

    /// Completed signals required before a training push is attempted.
    #[serde(default = "default_min_signals_for_training")]
    pub min_signals_for_training: usize,

    #[serde(default = "default_service_url")]
    pub service_url: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_health_cache_secs")]
    pub health_cache_secs: u64,

    #[serde(default = "default_prediction_cache_secs")]
    pub prediction_cache_secs: u64,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ml_weight: default_ml_weight(),
            rule_weight: default_rule_weight(),
            filter_threshold: default_filter_threshold(),
            min_signals_for_training: default_min_signals_for_training(),
            service_url: default_service_url(),
            request_timeout_ms: default_request_timeout_ms(),
            health_cache_secs: default_health_cache_secs(),
            prediction_cache_secs: default_prediction_cache_secs(),
        }
    }
}

/// Per-loop cadences in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default = "default_funding_secs")]
    pub funding_secs: u64,

    #[serde(default = "default_funding_secs")]
    pub open_interest_secs: u64,

    #[serde(default = "default_mtf_secs")]
    pub mtf_secs: u64,

    #[serde(default = "default_mtf_secs")]
    pub pattern_secs: u64,

    #[serde(default = "default_fast_secs")]
    pub entry_timing_secs: u64,

    #[serde(default = "default_fast_secs")]
    pub correlation_secs: u64,

    #[serde(default = "default_whale_secs")]
    pub whale_secs: u64,

    #[serde(default = "default_picker_secs")]
    pub top_picks_secs: u64,

    #[serde(default = "default_picker_secs")]
    pub liquidation_secs: u64,

    #[serde(default = "default_snapshot_secs")]
    pub snapshot_secs: u64,

    #[serde(default = "default_outcome_eval_secs")]
    pub outcome_eval_secs: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            funding_secs: default_funding_secs(),
            open_interest_secs: default_funding_secs(),
            mtf_secs: default_mtf_secs(),
            pattern_secs: default_mtf_secs(),
            entry_timing_secs: default_fast_secs(),
            correlation_secs: default_fast_secs(),
            whale_secs: default_whale_secs(),
            top_picks_secs: default_picker_secs(),
            liquidation_secs: default_picker_secs(),
            snapshot_secs: default_snapshot_secs(),
            outcome_eval_secs: default_outcome_eval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeConfig {
    /// Minimum confidence for a signal to enter the outcome pipeline.
    #[serde(default = "default_emit_threshold")]
    pub emit_threshold: f64,

    /// Age at which a pending record becomes eligible for evaluation.
    /// Evaluation uses the most recent observed price as the exit; the
    /// resulting labels lean toward mean-reverting noise.
    #[serde(default = "default_evaluation_time_ms")]
    pub evaluation_time_ms: i64,

    /// |pnl| beyond which the outcome is decided outright.
    #[serde(default = "default_win_threshold_pct")]
    pub win_threshold_pct: f64,
}

impl Default for OutcomeConfig {
    fn default() -> Self {
        Self {
            emit_threshold: default_emit_threshold(),
            evaluation_time_ms: default_evaluation_time_ms(),
            win_threshold_pct: default_win_threshold_pct(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Durability pulse for opportunities / alerts / session totals.
    #[serde(default = "default_save_pulse_secs")]
    pub save_pulse_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            save_pulse_secs: default_save_pulse_secs(),
        }
    }
}

// =============================================================================
// RadarConfig
// =============================================================================

/// Top-level configuration for the radar engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadarConfig {
    #[serde(default)]
    pub volatility: VolatilityConfig,

    #[serde(default)]
    pub volume: VolumeConfig,

    #[serde(default)]
    pub velocity: VelocityConfig,

    #[serde(default)]
    pub range: RangeConfig,

    #[serde(default)]
    pub ui: UiConfig,

    #[serde(default)]
    pub ml: MlConfig,

    #[serde(default)]
    pub cadence: CadenceConfig,

    #[serde(default)]
    pub outcome: OutcomeConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            volatility: VolatilityConfig::default(),
            volume: VolumeConfig::default(),
            velocity: VelocityConfig::default(),
            range: RangeConfig::default(),
            ui: UiConfig::default(),
            ml: MlConfig::default(),
            cadence: CadenceConfig::default(),
            outcome: OutcomeConfig::default(),
            store: StoreConfig::default(),
            filter: FilterConfig::default(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl RadarConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// A missing file is an error so the caller can fall back to defaults
    /// with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Persist to `path` atomically (write `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Startup bounds validation. The only fatal error surface outside I/O.
    pub fn validate(&self) -> Result<()> {
        if self.volatility.min_change_24h <= 0.0 {
            anyhow::bail!("volatility.min_change_24h must be positive");
        }
        if self.volatility.critical_change_24h < self.volatility.min_change_24h {
            anyhow::bail!("volatility.critical_change_24h must be >= min_change_24h");
        }
        if self.volume.spike_multiplier <= 1.0 {
            anyhow::bail!("volume.spike_multiplier must exceed 1.0");
        }
        if self.volume.avg_window_minutes <= 0 || self.velocity.window_minutes <= 0 {
            anyhow::bail!("history windows must be positive");
        }
        if self.velocity.min_velocity <= 0.0 {
            anyhow::bail!("velocity.min_velocity must be positive");
        }
        if !(0.0..=100.0).contains(&self.outcome.emit_threshold) {
            anyhow::bail!("outcome.emit_threshold must be within [0, 100]");
        }
        if self.outcome.evaluation_time_ms <= 0 {
            anyhow::bail!("outcome.evaluation_time_ms must be positive");
        }
        let weight_sum = self.ml.ml_weight + self.ml.rule_weight;
        if self.ml.ml_weight < 0.0 || self.ml.rule_weight < 0.0 || weight_sum <= 0.0 {
            anyhow::bail!("ml weights must be non-negative and sum above zero");
        }
        if self.cadence.snapshot_secs == 0 || self.cadence.outcome_eval_secs == 0 {
            anyhow::bail!("cadences must be non-zero");
        }
        Ok(())
    }
}
