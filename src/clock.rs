// =============================================================================
// Clock — injectable time source
// =============================================================================
//
// Every component that makes time-based decisions (history trimming, outcome
// evaluation, cache expiry, notification cooldowns) reads "now" through a
// Clock handle instead of the global wall clock. Tests use a manual clock
// that only moves when advanced, which makes the 15-minute outcome window
// deterministic.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Shared time source. Cheap to clone; all clones of a manual clock observe
/// the same instant.
#[derive(Clone)]
pub enum Clock {
    /// Wall clock (UTC milliseconds).
    System,
    /// Test clock that advances only via [`Clock::advance`].
    Manual(Arc<AtomicI64>),
}

impl Clock {
    pub fn system() -> Self {
        Self::System
    }

    /// A manual clock starting at `start_ms`.
    pub fn manual(start_ms: i64) -> Self {
        Self::Manual(Arc::new(AtomicI64::new(start_ms)))
    }

    /// Current time in milliseconds since the UNIX epoch.
    pub fn now_ms(&self) -> i64 {
        match self {
            Self::System => chrono::Utc::now().timestamp_millis(),
            Self::Manual(t) => t.load(Ordering::SeqCst),
        }
    }

    /// Advance a manual clock by `ms`. No-op on the system clock.
    pub fn advance(&self, ms: i64) {
        if let Self::Manual(t) = self {
            t.fetch_add(ms, Ordering::SeqCst);
        }
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "Clock::System"),
            Self::Manual(t) => write!(f, "Clock::Manual({})", t.load(Ordering::SeqCst)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = Clock::manual(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = Clock::manual(0);
        let other = clock.clone();
        clock.advance(42);
        assert_eq!(other.now_ms(), 42);
    }

    #[test]
    fn system_clock_is_monotone_enough() {
        let clock = Clock::system();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
