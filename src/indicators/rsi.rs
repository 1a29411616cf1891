// =============================================================================
// Relative Strength Index — Wilder smoothing over 14 periods
// =============================================================================
//
// Seed the average gain / average loss with the SMA of the first `period`
// deltas, then smooth:
//   avg_gain = (prev_avg_gain * (period - 1) + gain) / period
//   avg_loss = (prev_avg_loss * (period - 1) + loss) / period
//   RSI      = 100 - 100 / (1 + avg_gain / avg_loss)
//
// RSI > 70 is overbought, RSI < 30 oversold; the engine's reversal triggers
// use 75 / 25.

/// Standard look-back used across the radar.
pub const RSI_PERIOD: usize = 14;

/// Full RSI series for `closes`, one value per close starting at index
/// `period` (the first `period` closes seed the averages).
///
/// Empty result when `period == 0`, when there are fewer than `period + 1`
/// closes, or from the first non-finite intermediate onward.
pub fn wilder_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (sum_gain, sum_loss) = deltas[..period]
        .iter()
        .fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 {
                (g + d, l)
            } else {
                (g, l + d.abs())
            }
        });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    let mut series = Vec::with_capacity(deltas.len() - period + 1);
    match rsi_value(avg_gain, avg_loss) {
        Some(first) => series.push(first),
        None => return Vec::new(),
    }

    for &delta in &deltas[period..] {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        match rsi_value(avg_gain, avg_loss) {
            Some(rsi) => series.push(rsi),
            None => break,
        }
    }

    series
}

/// Most recent RSI value, if computable.
pub fn latest_rsi(closes: &[f64], period: usize) -> Option<f64> {
    wilder_rsi(closes, period).last().copied()
}

/// Averages to RSI in [0, 100]. Flat market maps to 50, all-gains to 100.
fn rsi_value(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    rsi.is_finite().then_some(rsi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_short_inputs() {
        assert!(wilder_rsi(&[], RSI_PERIOD).is_empty());
        assert!(wilder_rsi(&[1.0, 2.0, 3.0], 0).is_empty());
        // 14 closes give only 13 deltas — one short of a seed.
        let closes: Vec<f64> = (1..=14).map(|x| x as f64).collect();
        assert!(wilder_rsi(&closes, RSI_PERIOD).is_empty());
    }

    #[test]
    fn monotone_up_is_pegged_at_100() {
        let closes: Vec<f64> = (1..=40).map(|x| x as f64).collect();
        let series = wilder_rsi(&closes, RSI_PERIOD);
        assert!(!series.is_empty());
        for &v in &series {
            assert!((v - 100.0).abs() < 1e-10, "expected 100, got {v}");
        }
    }

    #[test]
    fn monotone_down_is_pegged_at_0() {
        let closes: Vec<f64> = (1..=40).rev().map(|x| x as f64).collect();
        for &v in &wilder_rsi(&closes, RSI_PERIOD) {
            assert!(v.abs() < 1e-10, "expected 0, got {v}");
        }
    }

    #[test]
    fn flat_series_is_neutral() {
        let closes = vec![250.0; 40];
        for &v in &wilder_rsi(&closes, RSI_PERIOD) {
            assert!((v - 50.0).abs() < 1e-10, "expected 50, got {v}");
        }
    }

    #[test]
    fn values_stay_in_range() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89,
            46.03, 44.18, 44.22, 44.57, 43.42, 42.66, 43.13, 43.90, 44.52,
        ];
        let series = wilder_rsi(&closes, RSI_PERIOD);
        assert!(!series.is_empty());
        for &v in &series {
            assert!((0.0..=100.0).contains(&v), "RSI {v} out of range");
        }
    }

    #[test]
    fn latest_tracks_series_tail() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin()).collect();
        let series = wilder_rsi(&closes, RSI_PERIOD);
        assert_eq!(latest_rsi(&closes, RSI_PERIOD), series.last().copied());
        assert!(latest_rsi(&[], RSI_PERIOD).is_none());
    }
}
