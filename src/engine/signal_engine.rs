// =============================================================================
// Signal Engine — weighted fusion of detector components
// =============================================================================
//
// Per symbol, per analysis cycle, up to six components are scored:
//
//   PriceMovement 20, Volume 15, Velocity 20, Funding 15, OpenInterest 10,
//   MultiTimeframe 20
//
// Missing components simply drop out of the weight total. Fusion:
//
//   W          = sum of present weights
//   net        = sum(strength/100 * weight | bullish)
//              - sum(strength/100 * weight | bearish)
//   confluence = |net| / W * 100
//   aligned    = components whose direction matches sign(net)
//   confidence = min(100, confluence + aligned/n * 20)
//   direction  = LONG above +10 net, SHORT below -10, else NEUTRAL
//
// The engine keeps only the latest signal per symbol (overwrite semantics)
// and serves the query surface from that map.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::clock::Clock;
use crate::config::MlConfig;
use crate::detectors::DetectorSet;
use crate::market::DataStore;
use crate::predictor::Prediction;
use crate::types::{
    ComponentDirection, Direction, DivergenceType, EntryType, MtfAlignment, QualityTier,
    RiskLevel, TrendState,
};

const WEIGHT_PRICE: u32 = 20;
const WEIGHT_VOLUME: u32 = 15;
const WEIGHT_VELOCITY: u32 = 20;
const WEIGHT_FUNDING: u32 = 15;
const WEIGHT_OPEN_INTEREST: u32 = 10;
const WEIGHT_MTF: u32 = 20;

/// |net| beyond which the fused direction is no longer neutral.
const DIRECTION_NET_THRESHOLD: f64 = 10.0;

/// One detector's contribution to a fused signal.
#[derive(Debug, Clone, Serialize)]
pub struct SignalComponent {
    pub name: String,
    pub direction: ComponentDirection,
    pub strength: f64,
    pub weight: u32,
}

impl SignalComponent {
    fn new(
        name: &str,
        direction: ComponentDirection,
        strength: f64,
        weight: u32,
    ) -> Self {
        Self {
            name: name.to_string(),
            direction,
            strength: strength.clamp(0.0, 100.0),
            weight,
        }
    }
}

/// A fused, ranked signal for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct SmartSignal {
    pub symbol: String,
    pub direction: Direction,
    pub confidence: f64,
    pub confluence_score: f64,
    pub components: Vec<SignalComponent>,
    pub reasoning: Vec<String>,
    pub entry_type: EntryType,
    pub risk_level: RiskLevel,
    pub price: f64,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ml_prediction: Option<Prediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_tier: Option<QualityTier>,
}

impl SmartSignal {
    /// Confidence used for ranking: the ML blend when present.
    pub fn effective_confidence(&self) -> f64 {
        self.combined_confidence.unwrap_or(self.confidence)
    }
}

/// Outcome of the confluence calculation, before entry-type and risk labels.
#[derive(Debug, Clone, Copy)]
pub struct Fusion {
    pub net: f64,
    pub weight_total: u32,
    pub confluence: f64,
    pub aligned: usize,
    pub confidence: f64,
    pub direction: Direction,
}

/// The fusion rule. Returns `None` for an empty component list.
pub fn calculate_confluence(components: &[SignalComponent]) -> Option<Fusion> {
    if components.is_empty() {
        return None;
    }

    let weight_total: u32 = components.iter().map(|c| c.weight).sum();
    if weight_total == 0 {
        return None;
    }

    let mut bullish = 0.0;
    let mut bearish = 0.0;
    for c in components {
        let contribution = c.strength / 100.0 * c.weight as f64;
        match c.direction {
            ComponentDirection::Bullish => bullish += contribution,
            ComponentDirection::Bearish => bearish += contribution,
            ComponentDirection::Neutral => {}
        }
    }

    let net = bullish - bearish;
    let confluence = (net.abs() / weight_total as f64 * 100.0).clamp(0.0, 100.0);

    let majority = ComponentDirection::from_sign(net);
    let aligned = components
        .iter()
        .filter(|c| majority != ComponentDirection::Neutral && c.direction == majority)
        .count();

    let confidence =
        (confluence + aligned as f64 / components.len() as f64 * 20.0).min(100.0);

    let direction = if net > DIRECTION_NET_THRESHOLD {
        Direction::Long
    } else if net < -DIRECTION_NET_THRESHOLD {
        Direction::Short
    } else {
        Direction::Neutral
    };

    Some(Fusion {
        net,
        weight_total,
        confluence,
        aligned,
        confidence,
        direction,
    })
}

/// Confidence blend of the predictor probability with the rule confidence.
///
/// base = ml * w_ml + rule * w_rule, then a 1.1x agreement bonus when both
/// sit on the same side of the 60/40 bands and a 0.9x penalty when they
/// disagree by more than 30 points.
pub fn blend_confidence(ml: f64, rule: f64, w_ml: f64, w_rule: f64) -> f64 {
    let mut base = ml * w_ml + rule * w_rule;
    if (ml > 60.0 && rule > 60.0) || (ml < 40.0 && rule < 40.0) {
        base *= 1.1;
    }
    if (ml - rule).abs() > 30.0 {
        base *= 0.9;
    }
    base.clamp(0.0, 100.0)
}

pub struct SignalEngine {
    clock: Clock,
    ml_weight: f64,
    rule_weight: f64,
    latest: RwLock<HashMap<String, SmartSignal>>,
}

impl SignalEngine {
    pub fn new(ml: &MlConfig, clock: Clock) -> Self {
        Self {
            clock,
            ml_weight: ml.ml_weight,
            rule_weight: ml.rule_weight,
            latest: RwLock::new(HashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Analysis
    // -------------------------------------------------------------------------

    /// Build components from the detector caches, fuse them, and retain the
    /// result as the symbol's latest signal. `None` when the symbol is
    /// unknown or fusion has nothing to work with.
    pub fn analyze_symbol(
        &self,
        symbol: &str,
        store: &DataStore,
        detectors: &DetectorSet,
    ) -> Option<SmartSignal> {
        let ticker = store.current(symbol)?;
        let mut components = Vec::with_capacity(6);
        let mut reasoning = Vec::new();

        // ── PriceMovement ───────────────────────────────────────────────
        let change = ticker.price_change_percent;
        components.push(SignalComponent::new(
            "PriceMovement",
            ComponentDirection::from_sign(change),
            change.abs() * 4.0,
            WEIGHT_PRICE,
        ));
        reasoning.push(format!("24h move {change:+.2}%"));

        // ── Volume ──────────────────────────────────────────────────────
        if let Some(multiplier) = detectors.volume.multiplier_for(symbol) {
            components.push(SignalComponent::new(
                "Volume",
                ComponentDirection::from_sign(change),
                multiplier * 20.0,
                WEIGHT_VOLUME,
            ));
            reasoning.push(format!("volume {multiplier:.1}x baseline"));
        }

        // ── Velocity ────────────────────────────────────────────────────
        if let Some((velocity, _accel)) = detectors.velocity.velocity_for(store, symbol) {
            components.push(SignalComponent::new(
                "Velocity",
                ComponentDirection::from_sign(velocity),
                velocity.abs() * 40.0,
                WEIGHT_VELOCITY,
            ));
            reasoning.push(format!("velocity {velocity:+.2}%/min"));
        }

        // ── Funding ─────────────────────────────────────────────────────
        let mut funding_strength = 0.0;
        if let Some((fsig, strength, fdir)) = detectors.funding.signal_for(symbol) {
            funding_strength = strength;
            components.push(SignalComponent::new(
                "Funding",
                match fdir {
                    Direction::Long => ComponentDirection::Bullish,
                    Direction::Short => ComponentDirection::Bearish,
                    Direction::Neutral => ComponentDirection::Neutral,
                },
                strength,
                WEIGHT_FUNDING,
            ));
            reasoning.push(format!("funding {fsig:?}"));
        }

        // ── OpenInterest ────────────────────────────────────────────────
        if let Some((oi_signal, oi_change, _aligned)) = detectors.open_interest.signal_for(symbol)
        {
            components.push(SignalComponent::new(
                "OpenInterest",
                ComponentDirection::from_sign(oi_signal.encoding()),
                oi_change.abs() * 10.0,
                WEIGHT_OPEN_INTEREST,
            ));
            reasoning.push(format!("OI {oi_signal:?} {oi_change:+.1}%"));
        }

        // ── MultiTimeframe ──────────────────────────────────────────────
        let mut mtf_strength = 0.0;
        let mut divergence = DivergenceType::None;
        if let Some(mtf) = detectors.multi_timeframe.analysis_for(symbol) {
            divergence = mtf.divergence;
            let (dir, strength) = mtf_component(mtf.alignment, mtf.momentum);
            mtf_strength = strength;
            components.push(SignalComponent::new("MultiTimeframe", dir, strength, WEIGHT_MTF));
            reasoning.push(format!("mtf {:?}", mtf.alignment));
        }

        let fusion = calculate_confluence(&components)?;

        let strength_of = |name: &str| {
            components
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.strength)
                .unwrap_or(0.0)
        };

        let entry_type = select_entry_type(
            divergence,
            funding_strength,
            strength_of("Volume"),
            strength_of("Velocity"),
            mtf_strength,
        );
        let risk_level = classify_risk(fusion.confluence, &components);

        let signal = SmartSignal {
            symbol: symbol.to_string(),
            direction: fusion.direction,
            confidence: fusion.confidence,
            confluence_score: fusion.confluence,
            components,
            reasoning,
            entry_type,
            risk_level,
            price: ticker.last_price,
            timestamp: self.clock.now_ms(),
            ml_prediction: None,
            combined_confidence: None,
            quality_tier: None,
        };

        debug!(
            symbol,
            direction = %signal.direction,
            confidence = format!("{:.1}", signal.confidence),
            confluence = format!("{:.1}", signal.confluence_score),
            entry_type = %signal.entry_type,
            "signal fused"
        );

        self.latest.write().insert(symbol.to_string(), signal.clone());
        Some(signal)
    }

    /// Attach a predictor result to the symbol's latest signal, producing
    /// the blended confidence. Returns the updated signal.
    pub fn apply_prediction(&self, symbol: &str, prediction: Prediction) -> Option<SmartSignal> {
        let mut latest = self.latest.write();
        let signal = latest.get_mut(symbol)?;

        let ml = prediction.win_probability * 100.0;
        let combined = blend_confidence(ml, signal.confidence, self.ml_weight, self.rule_weight);

        signal.quality_tier = Some(prediction.quality_tier);
        signal.combined_confidence = Some(combined);
        signal.ml_prediction = Some(prediction);
        Some(signal.clone())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Strongest signals, optionally restricted to one direction. Total
    /// order: effective confidence descending, then symbol.
    pub fn top_signals(&self, limit: usize, direction: Option<Direction>) -> Vec<SmartSignal> {
        let mut out: Vec<SmartSignal> = self
            .latest
            .read()
            .values()
            .filter(|s| s.direction != Direction::Neutral)
            .filter(|s| direction.map_or(true, |d| s.direction == d))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.effective_confidence()
                .partial_cmp(&a.effective_confidence())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        out.truncate(limit);
        out
    }

    pub fn early_entries(&self, limit: usize) -> Vec<SmartSignal> {
        self.by_entry_type(EntryType::Early, limit)
    }

    pub fn breakout_candidates(&self, limit: usize) -> Vec<SmartSignal> {
        self.by_entry_type(EntryType::Breakout, limit)
    }

    pub fn low_risk_setups(&self, limit: usize) -> Vec<SmartSignal> {
        let mut out: Vec<SmartSignal> = self
            .latest
            .read()
            .values()
            .filter(|s| s.risk_level == RiskLevel::Low && s.direction != Direction::Neutral)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.effective_confidence()
                .partial_cmp(&a.effective_confidence())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        out.truncate(limit);
        out
    }

    pub fn signal_for(&self, symbol: &str) -> Option<SmartSignal> {
        self.latest.read().get(symbol).cloned()
    }

    pub fn signal_count(&self) -> usize {
        self.latest.read().len()
    }

    fn by_entry_type(&self, entry_type: EntryType, limit: usize) -> Vec<SmartSignal> {
        let mut out: Vec<SmartSignal> = self
            .latest
            .read()
            .values()
            .filter(|s| s.entry_type == entry_type && s.direction != Direction::Neutral)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.effective_confidence()
                .partial_cmp(&a.effective_confidence())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        out.truncate(limit);
        out
    }
}

/// MTF alignment to a component: strong alignment reads 80 (90 when the
/// momentum is still accelerating), plain alignment 55, mixed 30 neutral.
fn mtf_component(alignment: MtfAlignment, momentum: TrendState) -> (ComponentDirection, f64) {
    match alignment {
        MtfAlignment::StrongBullish | MtfAlignment::StrongBearish => {
            let strength = if momentum == TrendState::Accelerating {
                90.0
            } else {
                80.0
            };
            let dir = if alignment == MtfAlignment::StrongBullish {
                ComponentDirection::Bullish
            } else {
                ComponentDirection::Bearish
            };
            (dir, strength)
        }
        MtfAlignment::Bullish => (ComponentDirection::Bullish, 55.0),
        MtfAlignment::Bearish => (ComponentDirection::Bearish, 55.0),
        MtfAlignment::Mixed => (ComponentDirection::Neutral, 30.0),
    }
}

/// Entry-type priority, first match wins.
fn select_entry_type(
    divergence: DivergenceType,
    funding_strength: f64,
    volume_strength: f64,
    velocity_strength: f64,
    mtf_strength: f64,
) -> EntryType {
    if divergence != DivergenceType::None || funding_strength > 70.0 {
        EntryType::Reversal
    } else if volume_strength > 60.0 && velocity_strength < 40.0 {
        EntryType::Early
    } else if velocity_strength > 70.0 && mtf_strength > 60.0 {
        EntryType::Breakout
    } else {
        EntryType::Momentum
    }
}

/// Risk bands on confluence and the count of strong components.
fn classify_risk(confluence: f64, components: &[SignalComponent]) -> RiskLevel {
    let strong = components.iter().filter(|c| c.strength > 50.0).count();
    if confluence > 70.0 && strong >= 4 {
        RiskLevel::Low
    } else if confluence > 50.0 && strong >= 3 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}
