// =============================================================================
// Signal engine — fusion of detector outputs into ranked signals
// =============================================================================

pub mod features;
pub mod reversal;
pub mod signal_engine;

pub use features::{FeatureVector, FEATURE_NAMES};
pub use reversal::{ReversalEngine, ReversalSignal};
pub use signal_engine::{SignalComponent, SignalEngine, SmartSignal};
