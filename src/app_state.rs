// =============================================================================
// Central Application State — Orion Futures Radar
// =============================================================================
//
// The single source of truth for the pipeline. All subsystems hold Arc
// references to their own state; AppState ties them together and provides
// the snapshot document for the REST and WebSocket feeds.
//
// Thread safety:
//   - Atomic counters for lock-free version and error tracking.
//   - parking_lot::RwLock for mutable shared collections.
//   - Arc wrappers for subsystems that manage their own interior mutability.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::binance::FuturesClient;
use crate::clock::Clock;
use crate::config::RadarConfig;
use crate::detectors::DetectorSet;
use crate::engine::{ReversalEngine, SignalEngine};
use crate::filter::{FilterConfig, SymbolFilter};
use crate::market::{DataStore, Ticker};
use crate::outcome::OutcomeTracker;
use crate::predictor::Predictor;
use crate::snapshot::{NotificationBuffer, SignalBuckets, SnapshotDocument};
use crate::store::Store;
use crate::types::Direction;

/// Operator-facing status surface, served by `GET /api/v1/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusDocument {
    pub connected: bool,
    pub symbol_count: usize,
    pub uptime_secs: u64,
    pub state_version: u64,
    pub ingest_batches: u64,
    pub stream_errors: u64,
    pub store_errors: u64,
    pub pending_signals: usize,
    pub completed_signals: usize,
    pub ml_enabled: bool,
    /// Milliseconds since each scheduler loop last ticked.
    pub loop_ages_ms: HashMap<String, i64>,
}

/// Central application state shared across all async tasks via
/// `Arc<AppState>`.
pub struct AppState {
    pub clock: Clock,
    pub config: Arc<RwLock<RadarConfig>>,

    // ── Ports ───────────────────────────────────────────────────────────
    pub store: Arc<dyn Store>,
    pub predictor: Arc<dyn Predictor>,
    pub client: Arc<FuturesClient>,

    // ── Pipeline ────────────────────────────────────────────────────────
    pub data: Arc<DataStore>,
    pub detectors: Arc<DetectorSet>,
    pub engine: Arc<SignalEngine>,
    pub reversals: Arc<ReversalEngine>,
    pub tracker: Arc<OutcomeTracker>,
    pub notifications: Arc<NotificationBuffer>,
    pub filter: RwLock<SymbolFilter>,

    // ── Caches written by scheduler loops ───────────────────────────────
    pub top_picks: RwLock<Vec<crate::detectors::top_picks::TopPick>>,
    pub critical_set: RwLock<BTreeSet<String>>,

    // ── Operational counters ────────────────────────────────────────────
    pub connected: AtomicBool,
    pub state_version: AtomicU64,
    pub ingest_batches: AtomicU64,
    pub stream_errors: AtomicU64,
    pub store_errors: AtomicU64,
    pub session_opportunities: AtomicU64,
    pub session_alerts: AtomicU64,
    pub session_id: RwLock<Option<i64>>,
    pub shutdown: Arc<AtomicBool>,
    pub start_time: std::time::Instant,
    pub last_tick: RwLock<HashMap<String, i64>>,

    // ── Fan-out bookkeeping ─────────────────────────────────────────────
    pub ws_connections: RwLock<HashMap<IpAddr, u32>>,
}

impl AppState {
    pub fn new(
        config: RadarConfig,
        store: Arc<dyn Store>,
        predictor: Arc<dyn Predictor>,
        client: Arc<FuturesClient>,
        clock: Clock,
    ) -> Self {
        let data = Arc::new(DataStore::new(
            clock.clone(),
            config.velocity.window_minutes,
            config.volume.avg_window_minutes,
        ));
        let detectors = Arc::new(DetectorSet::new(&config, clock.clone()));
        let engine = Arc::new(SignalEngine::new(&config.ml, clock.clone()));
        let reversals = Arc::new(ReversalEngine::new(clock.clone()));
        let tracker = Arc::new(OutcomeTracker::new(&config.outcome, clock.clone()));
        let notifications = Arc::new(NotificationBuffer::new(clock.clone()));
        let filter = RwLock::new(SymbolFilter::new(config.filter.clone()));

        Self {
            clock,
            config: Arc::new(RwLock::new(config)),
            store,
            predictor,
            client,
            data,
            detectors,
            engine,
            reversals,
            tracker,
            notifications,
            filter,
            top_picks: RwLock::new(Vec::new()),
            critical_set: RwLock::new(BTreeSet::new()),
            connected: AtomicBool::new(false),
            state_version: AtomicU64::new(1),
            ingest_batches: AtomicU64::new(0),
            stream_errors: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            session_opportunities: AtomicU64::new(0),
            session_alerts: AtomicU64::new(0),
            session_id: RwLock::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
            start_time: std::time::Instant::now(),
            last_tick: RwLock::new(HashMap::new()),
            ws_connections: RwLock::new(HashMap::new()),
        }
    }

    // ── Version management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Ingest path ─────────────────────────────────────────────────────

    /// Apply one ticker batch: data store, volume tracking, new-listing
    /// pins. Called from the stream task only.
    pub fn ingest(&self, batch: Vec<Ticker>) {
        if batch.is_empty() {
            return;
        }

        let listings = self.data.update(&batch);
        self.detectors.volume.update_volume_tracking(&batch);

        for symbol in &listings {
            if let Some(price) = self.data.last_price(symbol) {
                self.detectors.new_listing.record_listing(symbol, price);
            }
            self.notifications.push(
                "NEW_LISTING",
                symbol,
                format!("{symbol} listed"),
                "info",
            );
        }

        self.connected.store(true, Ordering::SeqCst);
        self.ingest_batches.fetch_add(1, Ordering::Relaxed);
        self.increment_version();
        debug!(count = batch.len(), listings = listings.len(), "batch ingested");
    }

    // ── Filter ──────────────────────────────────────────────────────────

    /// Whether a symbol passes the active filter, judged on its current
    /// ticker. Unknown symbols fail.
    pub fn passes_filter(&self, symbol: &str) -> bool {
        match self.data.current(symbol) {
            Some(t) => self
                .filter
                .read()
                .pass(symbol, t.price_change_percent, t.quote_volume),
            None => false,
        }
    }

    pub fn set_filter(&self, config: FilterConfig) {
        self.filter.write().set_config(config);
        self.increment_version();
    }

    // ── Scheduler bookkeeping ───────────────────────────────────────────

    pub fn mark_tick(&self, name: &str) {
        self.last_tick
            .write()
            .insert(name.to_string(), self.clock.now_ms());
    }

    // ── Status ──────────────────────────────────────────────────────────

    pub fn status(&self) -> StatusDocument {
        let now = self.clock.now_ms();
        let loop_ages_ms = self
            .last_tick
            .read()
            .iter()
            .map(|(name, &at)| (name.clone(), now - at))
            .collect();

        StatusDocument {
            connected: self.connected.load(Ordering::SeqCst),
            symbol_count: self.data.symbol_count(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            state_version: self.current_state_version(),
            ingest_batches: self.ingest_batches.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            pending_signals: self.tracker.pending_count(),
            completed_signals: self.tracker.completed_count(),
            ml_enabled: self.config.read().ml.enabled,
            loop_ages_ms,
        }
    }

    // ── Snapshot builder ────────────────────────────────────────────────

    /// Build the complete dashboard document. Pure over current state and
    /// the detector caches; detector caches may be slightly stale.
    pub fn build_snapshot(&self) -> SnapshotDocument {
        let config = self.config.read();
        let k = config.ui.max_displayed;
        let filter_config = self.filter.read().config().clone();

        // Category lists: filter first, then cap at K.
        let keep = |symbol: &str| self.passes_filter(symbol);

        let mut volatility = self.detectors.volatility.detect(&self.data);
        volatility.retain(|a| keep(&a.symbol));
        volatility.truncate(k);

        let mut volume = self.detectors.volume.detect(&self.data);
        volume.retain(|a| keep(&a.symbol));
        volume.truncate(k);

        let mut velocity = self.detectors.velocity.detect(&self.data);
        velocity.retain(|a| keep(&a.symbol));
        velocity.truncate(k);

        let mut range = self.detectors.range.detect(&self.data);
        range.retain(|a| keep(&a.symbol));
        range.truncate(k);

        let mut new_listings = self.detectors.new_listing.detect(&self.data);
        new_listings.retain(|a| keep(&a.symbol));
        new_listings.truncate(k);

        let mut funding = self.detectors.funding.detect();
        funding.retain(|a| keep(&a.symbol));
        funding.truncate(k);

        let mut open_interest = self.detectors.open_interest.detect();
        open_interest.retain(|a| keep(&a.symbol));
        open_interest.truncate(k);

        let mut multi_timeframe = self.detectors.multi_timeframe.detect();
        multi_timeframe.retain(|a| keep(&a.symbol));
        multi_timeframe.truncate(k);

        let mut liquidation = self.detectors.liquidation.detect();
        liquidation.retain(|a| keep(&a.symbol));
        liquidation.truncate(k);

        let mut whales = self.detectors.whale.detect(&self.data);
        whales.retain(|a| keep(&a.symbol));
        whales.truncate(k);

        let mut correlation = self.detectors.correlation.detect();
        correlation.retain(|a| keep(&a.symbol));
        correlation.truncate(k);

        let mut patterns = self.detectors.pattern.detect();
        patterns.retain(|a| keep(&a.symbol));
        patterns.truncate(k);

        let mut entry_timing = self.detectors.entry_timing.detect();
        entry_timing.retain(|a| keep(&a.symbol));
        entry_timing.truncate(k);

        let mut top_picks = self.top_picks.read().clone();
        top_picks.retain(|a| keep(&a.symbol));
        top_picks.truncate(k);

        // Buckets obey the filter too: a signal retained before a filter
        // change must not leak back into the snapshot.
        let bucket = |mut signals: Vec<crate::engine::SmartSignal>| {
            signals.retain(|s| keep(&s.symbol));
            signals
        };
        let mut reversal = self.reversals.reversal_signals(k);
        reversal.retain(|s| keep(&s.symbol));

        let signals = SignalBuckets {
            long: bucket(self.engine.top_signals(k, Some(Direction::Long))),
            short: bucket(self.engine.top_signals(k, Some(Direction::Short))),
            early: bucket(self.engine.early_entries(k)),
            reversal,
            breakout: bucket(self.engine.breakout_candidates(k)),
            low_risk: bucket(self.engine.low_risk_setups(k)),
        };

        SnapshotDocument {
            connected: self.connected.load(Ordering::SeqCst),
            symbol_count: self.data.symbol_count(),
            timestamp: self.clock.now_ms(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            state_version: self.current_state_version(),
            volatility,
            volume,
            velocity,
            range,
            new_listings,
            funding,
            open_interest,
            multi_timeframe,
            liquidation,
            whales,
            correlation,
            patterns,
            entry_timing,
            top_picks,
            signals,
            market_sentiment: self.detectors.sentiment.market(),
            win_rate: self.tracker.stats(),
            recent_completed: self.tracker.recent_completed(10),
            notifications: self.notifications.drain(),
            filter: filter_config.clone(),
            watchlist: filter_config.watchlist,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::HttpPredictor;
    use crate::store::SqliteStore;

    fn ticker(symbol: &str, pct: f64, qv: f64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: 100.0,
            price_change: pct,
            price_change_percent: pct,
            open_price: 100.0,
            high_price: 101.0,
            low_price: 99.0,
            volume: 0.0,
            quote_volume: qv,
            trade_count: 0,
            event_time: 1,
        }
    }

    fn state() -> AppState {
        let clock = Clock::manual(0);
        let config = RadarConfig::default();
        AppState::new(
            config.clone(),
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            Arc::new(HttpPredictor::new(&config.ml, clock.clone())),
            Arc::new(FuturesClient::new()),
            clock,
        )
    }

    #[test]
    fn ingest_updates_counters_and_version() {
        let s = state();
        let v0 = s.current_state_version();
        s.ingest(vec![ticker("AAAUSDT", 1.0, 2e6)]);
        assert!(s.connected.load(Ordering::SeqCst));
        assert_eq!(s.ingest_batches.load(Ordering::Relaxed), 1);
        assert!(s.current_state_version() > v0);
        assert_eq!(s.data.symbol_count(), 1);
    }

    #[test]
    fn snapshot_respects_the_filter() {
        let s = state();
        s.ingest(vec![
            ticker("AAAUSDT", 12.0, 2e7),
            ticker("USDCUSDT", 12.0, 2e8),
        ]);

        // The default filter excludes stablecoin bases.
        let snapshot = s.build_snapshot();
        assert!(snapshot
            .volatility
            .iter()
            .all(|a| a.symbol != "USDCUSDT"));
        assert!(snapshot.volatility.iter().any(|a| a.symbol == "AAAUSDT"));
        assert_eq!(snapshot.symbol_count, 2);
    }

    #[test]
    fn filtered_symbol_never_appears_anywhere() {
        let s = state();
        s.ingest(vec![ticker("AAAUSDT", 30.0, 2e7), ticker("BBBBUSD", 30.0, 2e7)]);
        // BBBBUSD fails the USDT quote check everywhere.
        let snapshot = s.build_snapshot();
        let everywhere: Vec<&str> = snapshot
            .volatility
            .iter()
            .map(|a| a.symbol.as_str())
            .chain(snapshot.range.iter().map(|a| a.symbol.as_str()))
            .chain(snapshot.top_picks.iter().map(|a| a.symbol.as_str()))
            .collect();
        assert!(!everywhere.contains(&"BBBBUSD"));
    }

    #[test]
    fn status_reports_loop_ages() {
        let s = state();
        s.mark_tick("snapshot");
        s.clock.advance(3_000);
        let status = s.status();
        assert_eq!(status.loop_ages_ms.get("snapshot"), Some(&3_000));
        assert!(!status.connected);
    }
}
