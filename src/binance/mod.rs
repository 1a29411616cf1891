// =============================================================================
// Binance futures adapters — REST client and ticker stream
// =============================================================================

pub mod client;
pub mod ticker_stream;

pub use client::{FundingRate, FuturesClient, OpenInterestPoint};
pub use ticker_stream::{run_ticker_stream, DEFAULT_STREAM_URL, RECONNECT_DELAY_SECS};
