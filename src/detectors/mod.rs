// =============================================================================
// Detector set — independent scanners over the shared market state
// =============================================================================
//
// Every detector is a value holding its own caches and a pair of operations:
// an optional `update` (rolling state, exchange REST fetches) and a pure
// `detect` over the store's current state plus those caches. Detectors never
// read each other's output; only the top picker composes across them, and
// that dependency is one-way.
//
// A detector that cannot compute a statistic for a symbol emits nothing for
// it. REST failures are absorbed inside the detector: the previous cached
// alerts stay authoritative and the scheduler never sees an error.

pub mod correlation;
pub mod entry_timing;
pub mod funding;
pub mod liquidation;
pub mod multi_timeframe;
pub mod new_listing;
pub mod open_interest;
pub mod pattern;
pub mod range;
pub mod sentiment;
pub mod top_picks;
pub mod velocity;
pub mod volatility;
pub mod volume;
pub mod whale;

use crate::clock::Clock;
use crate::config::RadarConfig;

/// Descending-magnitude ordering for alert sorting; ties are broken by the
/// caller with an ascending symbol compare.
pub(crate) fn magnitude_desc(a: f64, b: f64) -> std::cmp::Ordering {
    b.abs()
        .partial_cmp(&a.abs())
        .unwrap_or(std::cmp::Ordering::Equal)
}

/// All detectors, constructed together and wired one-way by the composition
/// root.
pub struct DetectorSet {
    pub volatility: volatility::VolatilityDetector,
    pub velocity: velocity::VelocityDetector,
    pub volume: volume::VolumeDetector,
    pub range: range::RangeDetector,
    pub new_listing: new_listing::NewListingDetector,
    pub funding: funding::FundingDetector,
    pub open_interest: open_interest::OpenInterestDetector,
    pub multi_timeframe: multi_timeframe::MultiTimeframeDetector,
    pub liquidation: liquidation::LiquidationDetector,
    pub whale: whale::WhaleDetector,
    pub correlation: correlation::CorrelationDetector,
    pub sentiment: sentiment::SentimentDetector,
    pub pattern: pattern::PatternDetector,
    pub entry_timing: entry_timing::EntryTimingDetector,
    pub top_picker: top_picks::TopPicker,
}

impl DetectorSet {
    pub fn new(config: &RadarConfig, clock: Clock) -> Self {
        Self {
            volatility: volatility::VolatilityDetector::new(&config.volatility, clock.clone()),
            velocity: velocity::VelocityDetector::new(&config.velocity, clock.clone()),
            volume: volume::VolumeDetector::new(&config.volume, clock.clone()),
            range: range::RangeDetector::new(&config.range, clock.clone()),
            new_listing: new_listing::NewListingDetector::new(clock.clone()),
            funding: funding::FundingDetector::new(clock.clone()),
            open_interest: open_interest::OpenInterestDetector::new(clock.clone()),
            multi_timeframe: multi_timeframe::MultiTimeframeDetector::new(clock.clone()),
            liquidation: liquidation::LiquidationDetector::new(clock.clone()),
            whale: whale::WhaleDetector::new(clock.clone()),
            correlation: correlation::CorrelationDetector::new(clock.clone()),
            sentiment: sentiment::SentimentDetector::new(clock.clone()),
            pattern: pattern::PatternDetector::new(clock.clone()),
            entry_timing: entry_timing::EntryTimingDetector::new(clock.clone()),
            top_picker: top_picks::TopPicker::new(clock),
        }
    }
}
