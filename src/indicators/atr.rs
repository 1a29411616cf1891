// =============================================================================
// Average True Range — Wilder smoothing
// =============================================================================
//
// True range per bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
// Seed with the SMA of the first `period` TR values, then smooth:
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period
//
// The entry-timing detector uses ATR(14) for stop and target distances.

use crate::market::Candle;

/// Standard look-back used across the radar.
pub const ATR_PERIOD: usize = 14;

/// Most recent ATR over `candles` (oldest first).
///
/// `None` when `period` is zero, fewer than `period + 1` candles are given
/// (each TR needs a previous close), or any intermediate is non-finite.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut tr_values: Vec<f64> = Vec::with_capacity(candles.len() - 1);
    for pair in candles.windows(2) {
        let prev_close = pair[0].close;
        let bar = &pair[1];

        let hl = bar.high - bar.low;
        let hc = (bar.high - prev_close).abs();
        let lc = (bar.low - prev_close).abs();
        tr_values.push(hl.max(hc).max(lc));
    }

    let period_f = period as f64;
    let mut value: f64 = tr_values[..period].iter().sum::<f64>() / period_f;
    if !value.is_finite() {
        return None;
    }

    for &tr in &tr_values[period..] {
        value = (value * (period_f - 1.0) + tr) / period_f;
        if !value.is_finite() {
            return None;
        }
    }

    Some(value)
}

/// ATR as a percentage of the latest close. Comparable across price scales.
pub fn atr_pct(candles: &[Candle], period: usize) -> Option<f64> {
    let value = atr(candles, period)?;
    let close = candles.last()?.close;
    if close == 0.0 {
        return None;
    }
    Some(value / close * 100.0)
}
