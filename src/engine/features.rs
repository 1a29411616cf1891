// =============================================================================
// Feature schema — the 35-column vector shared with predictor and store
// =============================================================================
//
// Column order is the schema: names, positions, and the integer encodings of
// the categorical columns are frozen. `direction` is the final column (+1
// long / -1 short) and is required for training rows.

use serde::{Deserialize, Serialize};

use crate::market::DataStore;
use crate::types::Direction;

use super::signal_engine::SmartSignal;
use crate::detectors::DetectorSet;

/// Ordered column names. Index into a [`FeatureVector`] with
/// [`feature_index`].
pub const FEATURE_NAMES: [&str; 35] = [
    "price_change_24h",
    "price_change_1h",
    "price_change_15m",
    "price_change_5m",
    "high_low_range",
    "price_position",
    "volume_quote_24h",
    "volume_multiplier",
    "volume_change_1h",
    "velocity",
    "acceleration",
    "trend_state",
    "rsi_1h",
    "mtf_alignment",
    "divergence_type",
    "funding_rate",
    "funding_signal",
    "funding_direction_match",
    "oi_change_percent",
    "oi_signal",
    "oi_price_alignment",
    "pattern_type",
    "pattern_confidence",
    "distance_from_level",
    "smart_confidence",
    "component_count",
    "entry_type",
    "risk_level",
    "atr_percent",
    "vwap_distance",
    "risk_reward_ratio",
    "whale_activity",
    "btc_correlation",
    "btc_outperformance",
    "direction",
];

/// Position of a named column, or `None` for an unknown name.
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|n| *n == name)
}

/// One row of the schema. Always exactly 35 values in column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn zeroed() -> Self {
        Self {
            values: vec![0.0; FEATURE_NAMES.len()],
        }
    }

    /// Build from raw values; the length must match the schema.
    pub fn from_values(values: Vec<f64>) -> Option<Self> {
        (values.len() == FEATURE_NAMES.len()).then_some(Self { values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        Some(self.values[feature_index(name)?])
    }

    pub fn set(&mut self, name: &str, value: f64) {
        if let Some(i) = feature_index(name) {
            self.values[i] = value;
        }
    }

    pub fn direction(&self) -> f64 {
        *self.values.last().unwrap_or(&0.0)
    }

    /// Named JSON object, the predictor's request shape.
    pub fn to_named(&self) -> serde_json::Value {
        let mut map = serde_json::Map::with_capacity(FEATURE_NAMES.len());
        for (name, value) in FEATURE_NAMES.iter().zip(self.values.iter()) {
            map.insert(
                (*name).to_string(),
                serde_json::Number::from_f64(*value)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(map)
    }
}

/// Assemble the vector for an emitted signal from current store state and
/// the detector caches. Unavailable features stay at their neutral zero.
pub fn build_features(
    signal: &SmartSignal,
    store: &DataStore,
    detectors: &DetectorSet,
) -> FeatureVector {
    let mut f = FeatureVector::zeroed();
    let symbol = signal.symbol.as_str();

    if let Some(state) = store.symbol_state(symbol) {
        let t = &state.current;
        f.set("price_change_24h", t.price_change_percent);
        if t.open_price > 0.0 {
            f.set(
                "high_low_range",
                (t.high_price - t.low_price) / t.open_price * 100.0,
            );
        }
        let span = t.high_price - t.low_price;
        if span > 0.0 {
            f.set(
                "price_position",
                ((t.last_price - t.low_price) / span).clamp(0.0, 1.0),
            );
        }
        f.set("volume_quote_24h", t.quote_volume);
        f.set("price_change_5m", state.window_change_pct().unwrap_or(0.0));
        f.set(
            "volume_change_1h",
            state.volume_window_change_pct().unwrap_or(0.0),
        );
    }

    if let Some(multiplier) = detectors.volume.multiplier_for(symbol) {
        f.set("volume_multiplier", multiplier);
    }

    if let Some((velocity, acceleration)) = detectors.velocity.velocity_for(store, symbol) {
        f.set("velocity", velocity);
        f.set("acceleration", acceleration);
        let trend = if acceleration > 0.1 {
            crate::types::TrendState::Accelerating
        } else if acceleration < -0.1 {
            crate::types::TrendState::Decelerating
        } else {
            crate::types::TrendState::Steady
        };
        f.set("trend_state", trend.encoding());
    } else {
        f.set("trend_state", crate::types::TrendState::Steady.encoding());
    }

    if let Some(mtf) = detectors.multi_timeframe.analysis_for(symbol) {
        f.set("price_change_1h", mtf.change_1h);
        f.set("price_change_15m", mtf.change_15m);
        f.set("rsi_1h", mtf.rsi_1h.unwrap_or(50.0));
        f.set("mtf_alignment", mtf.alignment.encoding());
        f.set("divergence_type", mtf.divergence.encoding());
    } else {
        f.set("rsi_1h", 50.0);
    }

    if let Some(rate_pct) = detectors.funding.rate_for(symbol) {
        f.set("funding_rate", rate_pct);
    }
    if let Some((fsig, _, fdir)) = detectors.funding.signal_for(symbol) {
        f.set("funding_signal", fsig.encoding());
        let matched = fdir != Direction::Neutral && fdir == signal.direction;
        f.set("funding_direction_match", if matched { 1.0 } else { 0.0 });
    }

    if let Some((oi_signal, oi_change, aligned)) = detectors.open_interest.signal_for(symbol) {
        f.set("oi_change_percent", oi_change);
        f.set("oi_signal", oi_signal.encoding());
        f.set("oi_price_alignment", aligned);
    }

    if let Some((kind, confidence, distance)) = detectors.pattern.pattern_for(symbol) {
        f.set("pattern_type", kind.encoding());
        f.set("pattern_confidence", confidence);
        f.set("distance_from_level", distance);
    }

    f.set("smart_confidence", signal.confidence);
    f.set("component_count", signal.components.len() as f64);
    f.set("entry_type", signal.entry_type.encoding());
    f.set("risk_level", signal.risk_level.encoding());

    if let Some((atr_percent, vwap_distance, risk_reward)) =
        detectors.entry_timing.timing_for(symbol)
    {
        f.set("atr_percent", atr_percent);
        f.set("vwap_distance", vwap_distance);
        f.set("risk_reward_ratio", risk_reward);
    }

    f.set("whale_activity", detectors.whale.activity_for(store, symbol));

    if let Some((correlation, outperformance)) = detectors.correlation.btc_metrics_for(symbol) {
        f.set("btc_correlation", correlation);
        f.set("btc_outperformance", outperformance);
    }

    f.set("direction", signal.direction.encoding());
    f
}
