// =============================================================================
// Snapshot — the dashboard document and its notification buffer
// =============================================================================
//
// The snapshot is a pure copy of current state: category top-Ks after the
// symbol filter, fused signal buckets, sentiment, win-rate stats, recently
// completed signals, and the drained notification queue. Consumers receive
// immutable documents; nothing in here is shared back.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;

use crate::clock::Clock;
use crate::detectors::correlation::CorrelationAlert;
use crate::detectors::entry_timing::EntryTimingAlert;
use crate::detectors::funding::FundingAlert;
use crate::detectors::liquidation::LiquidationAlert;
use crate::detectors::multi_timeframe::MtfAnalysis;
use crate::detectors::new_listing::NewListingAlert;
use crate::detectors::open_interest::OpenInterestAlert;
use crate::detectors::pattern::PatternAlert;
use crate::detectors::range::RangeAlert;
use crate::detectors::sentiment::MarketSentiment;
use crate::detectors::top_picks::TopPick;
use crate::detectors::velocity::VelocityAlert;
use crate::detectors::volatility::VolatilityAlert;
use crate::detectors::volume::VolumeAlert;
use crate::detectors::whale::WhaleAlert;
use crate::engine::{ReversalSignal, SmartSignal};
use crate::filter::FilterConfig;
use crate::outcome::{OutcomeBreakdown, SignalRecord};

/// Maximum buffered notifications.
const MAX_NOTIFICATIONS: usize = 50;
/// Per-(type, symbol) cooldown.
const COOLDOWN_MS: i64 = 60_000;

// =============================================================================
// Notifications
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: String,
    pub symbol: String,
    pub message: String,
    pub level: String,
    pub timestamp: i64,
}

/// Bounded queue with a per-(type, symbol) cooldown, drained into each
/// snapshot.
pub struct NotificationBuffer {
    clock: Clock,
    entries: RwLock<VecDeque<Notification>>,
    last_sent: RwLock<HashMap<(String, String), i64>>,
    /// Per-type enable switches, keyed as configured (camelCase).
    enabled_types: RwLock<HashMap<String, bool>>,
}

impl NotificationBuffer {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            entries: RwLock::new(VecDeque::new()),
            last_sent: RwLock::new(HashMap::new()),
            enabled_types: RwLock::new(HashMap::new()),
        }
    }

    /// Configure a per-type switch. Keys are camelCase (`smartSignals`).
    pub fn set_type_enabled(&self, key: &str, enabled: bool) {
        self.enabled_types.write().insert(key.to_string(), enabled);
    }

    /// Per-type switch lookup. The incoming kind is normalised by stripping
    /// underscores and lowercasing (`SMART_SIGNAL` -> `smartsignal`) while
    /// the configured keys are camelCase, so the lookup never matches and
    /// every type falls back to enabled. Kept bug-compatible with the
    /// long-standing observable behaviour: all types pass.
    fn type_enabled(&self, kind: &str) -> bool {
        let normalised: String = kind
            .chars()
            .filter(|c| *c != '_')
            .collect::<String>()
            .to_lowercase();
        self.enabled_types
            .read()
            .get(&normalised)
            .copied()
            .unwrap_or(true)
    }

    /// Queue a notification unless its (type, symbol) pair is cooling down.
    pub fn push(&self, kind: &str, symbol: &str, message: String, level: &str) {
        if !self.type_enabled(kind) {
            return;
        }

        let now = self.clock.now_ms();
        {
            let mut last_sent = self.last_sent.write();
            let key = (kind.to_string(), symbol.to_string());
            if let Some(&at) = last_sent.get(&key) {
                if now - at < COOLDOWN_MS {
                    return;
                }
            }
            last_sent.insert(key, now);
        }

        let mut entries = self.entries.write();
        entries.push_back(Notification {
            kind: kind.to_string(),
            symbol: symbol.to_string(),
            message,
            level: level.to_string(),
            timestamp: now,
        });
        while entries.len() > MAX_NOTIFICATIONS {
            entries.pop_front();
        }
    }

    /// Take everything queued since the last drain.
    pub fn drain(&self) -> Vec<Notification> {
        self.entries.write().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// =============================================================================
// Snapshot document
// =============================================================================

/// Fused signals grouped for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct SignalBuckets {
    pub long: Vec<SmartSignal>,
    pub short: Vec<SmartSignal>,
    pub early: Vec<SmartSignal>,
    pub reversal: Vec<ReversalSignal>,
    pub breakout: Vec<SmartSignal>,
    pub low_risk: Vec<SmartSignal>,
}

/// The complete dashboard state published on every snapshot tick.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotDocument {
    pub connected: bool,
    pub symbol_count: usize,
    pub timestamp: i64,
    pub uptime_secs: u64,
    pub state_version: u64,

    pub volatility: Vec<VolatilityAlert>,
    pub volume: Vec<VolumeAlert>,
    pub velocity: Vec<VelocityAlert>,
    pub range: Vec<RangeAlert>,
    pub new_listings: Vec<NewListingAlert>,
    pub funding: Vec<FundingAlert>,
    pub open_interest: Vec<OpenInterestAlert>,
    pub multi_timeframe: Vec<MtfAnalysis>,
    pub liquidation: Vec<LiquidationAlert>,
    pub whales: Vec<WhaleAlert>,
    pub correlation: Vec<CorrelationAlert>,
    pub patterns: Vec<PatternAlert>,
    pub entry_timing: Vec<EntryTimingAlert>,
    pub top_picks: Vec<TopPick>,

    pub signals: SignalBuckets,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_sentiment: Option<MarketSentiment>,

    pub win_rate: OutcomeBreakdown,
    pub recent_completed: Vec<SignalRecord>,
    pub notifications: Vec<Notification>,

    pub filter: FilterConfig,
    pub watchlist: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_suppresses_repeats() {
        let clock = Clock::manual(0);
        let buffer = NotificationBuffer::new(clock.clone());

        buffer.push("CRITICAL_VOLATILITY", "AAAUSDT", "first".into(), "warning");
        buffer.push("CRITICAL_VOLATILITY", "AAAUSDT", "repeat".into(), "warning");
        assert_eq!(buffer.len(), 1);

        // Different symbol or type is independent.
        buffer.push("CRITICAL_VOLATILITY", "BBBUSDT", "other".into(), "warning");
        buffer.push("SMART_SIGNAL", "AAAUSDT", "signal".into(), "info");
        assert_eq!(buffer.len(), 3);

        // Past the cooldown the pair fires again.
        clock.advance(COOLDOWN_MS + 1);
        buffer.push("CRITICAL_VOLATILITY", "AAAUSDT", "again".into(), "warning");
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn drain_empties_the_buffer() {
        let clock = Clock::manual(0);
        let buffer = NotificationBuffer::new(clock);
        buffer.push("SMART_SIGNAL", "AAAUSDT", "one".into(), "info");

        let drained = buffer.drain();
        assert_eq!(drained.len(), 1);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn buffer_is_bounded() {
        let clock = Clock::manual(0);
        let buffer = NotificationBuffer::new(clock.clone());
        for i in 0..(MAX_NOTIFICATIONS + 10) {
            // Distinct symbols dodge the cooldown.
            buffer.push("SMART_SIGNAL", &format!("S{i}USDT"), "x".into(), "info");
        }
        assert_eq!(buffer.len(), MAX_NOTIFICATIONS);
    }

    #[test]
    fn camel_case_config_keys_never_match_so_all_types_pass() {
        let clock = Clock::manual(0);
        let buffer = NotificationBuffer::new(clock);

        // The operator disables smart signals under the camelCase key...
        buffer.set_type_enabled("smartSignals", false);
        // ...but SMART_SIGNAL normalises to "smartsignal" and misses it.
        buffer.push("SMART_SIGNAL", "AAAUSDT", "still delivered".into(), "info");
        assert_eq!(buffer.len(), 1);
    }
}
