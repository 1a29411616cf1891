// =============================================================================
// Shared types used across the Orion radar engine
// =============================================================================
//
// Every enum here is a closed sum type with a stable integer encoding. The
// encodings are part of the persisted feature schema and must never be
// renumbered; add new variants at new codes only.

use serde::{Deserialize, Serialize};

/// Directional read of a signal or alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
    Neutral,
}

impl Direction {
    /// Encoding used by the feature schema: LONG = +1, SHORT = -1.
    pub fn encoding(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
            Self::Neutral => 0.0,
        }
    }

    /// Direction from the sign of a change metric.
    pub fn from_sign(value: f64) -> Self {
        if value > 0.0 {
            Self::Long
        } else if value < 0.0 {
            Self::Short
        } else {
            Self::Neutral
        }
    }

    /// Inverse of [`Direction::encoding`].
    pub fn from_encoding(value: f64) -> Self {
        Self::from_sign(value)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
            Self::Neutral => "NEUTRAL",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-component directional read inside a fused signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl ComponentDirection {
    pub fn sign(self) -> f64 {
        match self {
            Self::Bullish => 1.0,
            Self::Bearish => -1.0,
            Self::Neutral => 0.0,
        }
    }

    pub fn from_sign(value: f64) -> Self {
        if value > 0.0 {
            Self::Bullish
        } else if value < 0.0 {
            Self::Bearish
        } else {
            Self::Neutral
        }
    }
}

/// Trading thesis behind an emitted signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Early,
    Momentum,
    Reversal,
    Breakout,
}

impl EntryType {
    pub fn encoding(self) -> f64 {
        match self {
            Self::Early => 0.0,
            Self::Momentum => 1.0,
            Self::Reversal => 2.0,
            Self::Breakout => 3.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Early => "EARLY",
            Self::Momentum => "MOMENTUM",
            Self::Reversal => "REVERSAL",
            Self::Breakout => "BREAKOUT",
        }
    }

    /// Inverse of [`EntryType::encoding`]; unknown codes read as momentum.
    pub fn from_encoding(value: f64) -> Self {
        match value as i64 {
            0 => Self::Early,
            2 => Self::Reversal,
            3 => Self::Breakout,
            _ => Self::Momentum,
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk classification of a fused signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn encoding(self) -> f64 {
        match self {
            Self::Low => 0.0,
            Self::Medium => 1.0,
            Self::High => 2.0,
        }
    }
}

/// Quality tier returned by the predictor for its own probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityTier {
    High,
    Medium,
    Low,
    Filter,
}

impl QualityTier {
    pub fn encoding(self) -> f64 {
        match self {
            Self::High => 3.0,
            Self::Medium => 2.0,
            Self::Low => 1.0,
            Self::Filter => 0.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Filter => "FILTER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HIGH" => Some(Self::High),
            "MEDIUM" => Some(Self::Medium),
            "LOW" => Some(Self::Low),
            "FILTER" => Some(Self::Filter),
            _ => None,
        }
    }
}

/// Velocity trend classification against the previous observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendState {
    Accelerating,
    Steady,
    Decelerating,
}

impl TrendState {
    pub fn encoding(self) -> f64 {
        match self {
            Self::Accelerating => 2.0,
            Self::Steady => 1.0,
            Self::Decelerating => 0.0,
        }
    }
}

/// Alignment across the 15m / 1h / 4h timeframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MtfAlignment {
    StrongBullish,
    Bullish,
    Mixed,
    Bearish,
    StrongBearish,
}

impl MtfAlignment {
    pub fn encoding(self) -> f64 {
        match self {
            Self::StrongBullish => 2.0,
            Self::Bullish => 1.0,
            Self::Mixed => 0.0,
            Self::Bearish => -1.0,
            Self::StrongBearish => -2.0,
        }
    }
}

/// Cross-timeframe divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DivergenceType {
    None,
    Bullish,
    Bearish,
}

impl DivergenceType {
    pub fn encoding(self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Bullish => 1.0,
            Self::Bearish => 2.0,
        }
    }
}

/// Open-interest / price co-movement classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OiSignal {
    StrongTrend,
    BuildingLongs,
    Neutral,
    BuildingShorts,
    ClosingPositions,
}

impl OiSignal {
    pub fn encoding(self) -> f64 {
        match self {
            Self::StrongTrend => 2.0,
            Self::BuildingLongs => 1.0,
            Self::Neutral => 0.0,
            Self::BuildingShorts => -1.0,
            Self::ClosingPositions => -2.0,
        }
    }
}

/// Funding-rate regime classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FundingSignal {
    ExtremePositive,
    ShortSqueeze,
    Neutral,
    LongSqueeze,
    ExtremeNegative,
}

impl FundingSignal {
    pub fn encoding(self) -> f64 {
        match self {
            Self::ExtremePositive => 2.0,
            Self::ShortSqueeze => 1.0,
            Self::Neutral => 0.0,
            Self::LongSqueeze => -1.0,
            Self::ExtremeNegative => -2.0,
        }
    }
}

/// Chart structure detected by the pattern scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternKind {
    None,
    KeyLevel,
    DoubleTop,
    DoubleBottom,
}

impl PatternKind {
    pub fn encoding(self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::KeyLevel => 1.0,
            Self::DoubleTop => 2.0,
            Self::DoubleBottom => 3.0,
        }
    }
}

/// Lifecycle state of a recorded signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Pending,
    Win,
    Loss,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Win => "WIN",
            Self::Loss => "LOSS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "WIN" => Some(Self::Win),
            "LOSS" => Some(Self::Loss),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_from_sign() {
        assert_eq!(Direction::from_sign(3.2), Direction::Long);
        assert_eq!(Direction::from_sign(-0.1), Direction::Short);
        assert_eq!(Direction::from_sign(0.0), Direction::Neutral);
    }

    #[test]
    fn direction_encoding_is_signed_unit() {
        assert_eq!(Direction::Long.encoding(), 1.0);
        assert_eq!(Direction::Short.encoding(), -1.0);
        assert_eq!(Direction::Neutral.encoding(), 0.0);
    }

    #[test]
    fn serde_uses_screaming_case() {
        let json = serde_json::to_string(&Direction::Long).unwrap();
        assert_eq!(json, "\"LONG\"");
        let tier: QualityTier = serde_json::from_str("\"FILTER\"").unwrap();
        assert_eq!(tier, QualityTier::Filter);
    }

    #[test]
    fn outcome_roundtrip() {
        for o in [Outcome::Pending, Outcome::Win, Outcome::Loss] {
            assert_eq!(Outcome::parse(o.as_str()), Some(o));
        }
        assert_eq!(Outcome::parse("BOGUS"), None);
    }

    #[test]
    fn quality_tier_parse() {
        assert_eq!(QualityTier::parse("HIGH"), Some(QualityTier::High));
        assert_eq!(QualityTier::parse("high"), None);
    }
}
