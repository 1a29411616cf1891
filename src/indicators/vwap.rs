// =============================================================================
// Volume-Weighted Average Price
// =============================================================================
//
// VWAP over the trailing `window` bars:
//   VWAP = sum(typical_price * volume) / sum(volume)
// with typical price (H + L + C) / 3. Zero total volume yields no value.

use crate::market::Candle;

/// VWAP over the most recent `window` candles (oldest first input).
///
/// Returns `None` when there are fewer than `window` candles, `window` is
/// zero, or total volume over the window is zero.
pub fn vwap(candles: &[Candle], window: usize) -> Option<f64> {
    if window == 0 || candles.len() < window {
        return None;
    }

    let slice = &candles[candles.len() - window..];
    let mut pv_sum = 0.0;
    let mut v_sum = 0.0;
    for c in slice {
        pv_sum += c.typical_price() * c.volume;
        v_sum += c.volume;
    }

    if v_sum <= 0.0 {
        return None;
    }

    let value = pv_sum / v_sum;
    value.is_finite().then_some(value)
}

/// Signed percent distance of the latest close from the window VWAP.
/// Positive means price is trading above VWAP.
pub fn distance_from_vwap_pct(candles: &[Candle], window: usize) -> Option<f64> {
    let vw = vwap(candles, window)?;
    let close = candles.last()?.close;
    if vw == 0.0 {
        return None;
    }
    Some((close - vw) / vw * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 0,
            open: close,
            high,
            low,
            close,
            volume,
            quote_volume: 0.0,
        }
    }

    #[test]
    fn vwap_insufficient_data() {
        let candles = vec![candle(101.0, 99.0, 100.0, 10.0); 5];
        assert!(vwap(&candles, 20).is_none());
        assert!(vwap(&candles, 0).is_none());
    }

    #[test]
    fn vwap_equal_volumes_is_mean_of_typical() {
        // All bars identical: VWAP equals the common typical price.
        let candles = vec![candle(102.0, 98.0, 100.0, 10.0); 20];
        let vw = vwap(&candles, 20).unwrap();
        assert!((vw - 100.0).abs() < 1e-12);
    }

    #[test]
    fn vwap_weights_by_volume() {
        // One heavy bar at 200 dominates nine light bars at 100.
        let mut candles = vec![candle(100.0, 100.0, 100.0, 1.0); 9];
        candles.push(candle(200.0, 200.0, 200.0, 91.0));
        let vw = vwap(&candles, 10).unwrap();
        assert!((vw - 191.0).abs() < 1e-9, "got {vw}");
    }

    #[test]
    fn vwap_zero_volume_is_none() {
        let candles = vec![candle(102.0, 98.0, 100.0, 0.0); 20];
        assert!(vwap(&candles, 20).is_none());
    }

    #[test]
    fn distance_sign_matches_side_of_vwap() {
        let mut candles = vec![candle(102.0, 98.0, 100.0, 10.0); 19];
        candles.push(candle(112.0, 108.0, 110.0, 10.0));
        let d = distance_from_vwap_pct(&candles, 20).unwrap();
        assert!(d > 0.0, "close above vwap should be positive, got {d}");
    }
}
