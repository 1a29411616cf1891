// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators the detector set
// relies on. Every public function returns `Option<T>` or an empty series so
// callers are forced to handle insufficient-data and numerical edge cases.

pub mod atr;
pub mod rsi;
pub mod vwap;
