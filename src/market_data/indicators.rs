// =============================================================================
// Technical indicators — EMA, RSI (Wilder), MACD, ATR, SMA
// =============================================================================
//
// All functions take series ordered oldest first and return series ordered
// oldest first. Each series starts after its warm-up window; callers align
// by taking tails. Non-finite intermediates truncate the output — downstream
// consumers should not trust a broken series.
// =============================================================================

use crate::market_data::Candle;

/// Exponential moving average.
///
/// The first value is seeded with the SMA of the first `period` closes:
///   multiplier = 2 / (period + 1)
///   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period + 1) as f64;

    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(values.len() - period + 1);
    result.push(seed);

    let mut prev = seed;
    for &value in &values[period..] {
        let next = value * multiplier + prev * (1.0 - multiplier);
        if !next.is_finite() {
            break;
        }
        result.push(next);
        prev = next;
    }

    result
}

/// Simple moving average over a sliding window.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    values
        .windows(period)
        .map(|w| w.iter().sum::<f64>() / period as f64)
        .collect()
}

/// Relative Strength Index with Wilder's smoothing.
///
/// Average gain/loss are seeded with the SMA of the first `period` deltas,
/// then smoothed:
///   avg = (prev_avg * (period - 1) + current) / period
///   RSI = 100 - 100 / (1 + avg_gain / avg_loss)
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
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

    let Some(first) = rsi_from_averages(avg_gain, avg_loss) else {
        return Vec::new();
    };

    let mut result = Vec::with_capacity(deltas.len() - period + 1);
    result.push(first);

    for &delta in &deltas[period..] {
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { delta.abs() } else { 0.0 };

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        match rsi_from_averages(avg_gain, avg_loss) {
            Some(value) => result.push(value),
            None => break,
        }
    }

    result
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let value = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    value.is_finite().then_some(value)
}

/// MACD line, signal line, and histogram.
///
/// MACD = EMA(fast) - EMA(slow); signal = EMA(MACD, signal_period);
/// histogram = MACD - signal, aligned to the signal series.
pub fn macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    if fast == 0 || slow == 0 || fast >= slow || closes.len() < slow {
        return (Vec::new(), Vec::new(), Vec::new());
    }

    let ema_fast = ema(closes, fast);
    let ema_slow = ema(closes, slow);

    // ema(fast) starts at index fast-1, ema(slow) at slow-1: offset the fast
    // series so both align on the same candle.
    let offset = slow - fast;
    if ema_fast.len() <= offset {
        return (Vec::new(), Vec::new(), Vec::new());
    }

    let macd_line: Vec<f64> = ema_slow
        .iter()
        .zip(ema_fast[offset..].iter())
        .map(|(s, f)| f - s)
        .collect();

    let signal_line = ema(&macd_line, signal_period);
    if signal_line.is_empty() {
        return (macd_line, Vec::new(), Vec::new());
    }

    let hist_offset = macd_line.len() - signal_line.len();
    let histogram: Vec<f64> = macd_line[hist_offset..]
        .iter()
        .zip(signal_line.iter())
        .map(|(m, s)| m - s)
        .collect();

    (macd_line, signal_line, histogram)
}

/// Average True Range series using Wilder's smoothing.
///
/// TR = max(H - L, |H - prevClose|, |L - prevClose|); the series is seeded
/// with the SMA of the first `period` TR values.
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period + 1 {
        return Vec::new();
    }

    let mut tr_values = Vec::with_capacity(candles.len() - 1);
    for pair in candles.windows(2) {
        let prev_close = pair[0].close;
        let high = pair[1].high;
        let low = pair[1].low;

        let hl = high - low;
        let hc = (high - prev_close).abs();
        let lc = (low - prev_close).abs();
        tr_values.push(hl.max(hc).max(lc));
    }

    let seed: f64 = tr_values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return Vec::new();
    }

    let period_f = period as f64;
    let mut result = Vec::with_capacity(tr_values.len() - period + 1);
    result.push(seed);

    let mut atr = seed;
    for &tr in &tr_values[period..] {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
        if !atr.is_finite() {
            break;
        }
        result.push(atr);
    }

    result
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            open,
            high,
            low,
            close,
            volume: 100.0,
        }
    }

    // ---- ema -------------------------------------------------------------

    #[test]
    fn ema_empty_and_short_inputs() {
        assert!(ema(&[], 5).is_empty());
        assert!(ema(&[1.0, 2.0], 5).is_empty());
        assert!(ema(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn ema_seed_is_sma() {
        let values = vec![2.0, 4.0, 6.0];
        let series = ema(&values, 3);
        assert_eq!(series.len(), 1);
        assert!((series[0] - 4.0).abs() < 1e-10);
    }

    #[test]
    fn ema_known_values() {
        // 5-period EMA of 1..=10: seed = 3.0, multiplier = 1/3.
        let values: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let series = ema(&values, 5);
        assert_eq!(series.len(), 6);

        let mult = 2.0 / 6.0;
        let mut expected = 3.0;
        assert!((series[0] - expected).abs() < 1e-10);
        for (i, &value) in values[5..].iter().enumerate() {
            expected = value * mult + expected * (1.0 - mult);
            assert!((series[i + 1] - expected).abs() < 1e-10);
        }
    }

    // ---- sma -------------------------------------------------------------

    #[test]
    fn sma_windows() {
        let series = sma(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(series, vec![1.5, 2.5, 3.5]);
        assert!(sma(&[1.0], 2).is_empty());
    }

    // ---- rsi -------------------------------------------------------------

    #[test]
    fn rsi_all_gains_is_100() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        for value in rsi(&closes, 14) {
            assert!((value - 100.0).abs() < 1e-10);
        }
    }

    #[test]
    fn rsi_all_losses_is_0() {
        let closes: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        for value in rsi(&closes, 14) {
            assert!(value.abs() < 1e-10);
        }
    }

    #[test]
    fn rsi_flat_is_50() {
        let closes = vec![100.0; 30];
        for value in rsi(&closes, 14) {
            assert!((value - 50.0).abs() < 1e-10);
        }
    }

    #[test]
    fn rsi_stays_in_range() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        for value in rsi(&closes, 14) {
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn rsi_needs_period_plus_one() {
        let closes: Vec<f64> = (1..=14).map(|x| x as f64).collect();
        assert!(rsi(&closes, 14).is_empty());
    }

    // ---- macd ------------------------------------------------------------

    #[test]
    fn macd_lengths_align() {
        let closes: Vec<f64> = (0..100).map(|i| 100.0 + (i as f64 * 0.3).sin()).collect();
        let (line, signal, hist) = macd(&closes, 12, 26, 9);
        assert_eq!(line.len(), 100 - 26 + 1);
        assert_eq!(signal.len(), line.len() - 9 + 1);
        assert_eq!(hist.len(), signal.len());
    }

    #[test]
    fn macd_positive_in_uptrend() {
        let closes: Vec<f64> = (0..100).map(|i| 100.0 + i as f64).collect();
        let (line, _, _) = macd(&closes, 12, 26, 9);
        assert!(*line.last().unwrap() > 0.0);
    }

    #[test]
    fn macd_rejects_bad_periods() {
        let closes: Vec<f64> = (0..50).map(|x| x as f64).collect();
        let (line, signal, hist) = macd(&closes, 26, 12, 9);
        assert!(line.is_empty() && signal.is_empty() && hist.is_empty());
    }

    #[test]
    fn macd_histogram_is_line_minus_signal() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + (i as f64 * 0.7).cos() * 5.0).collect();
        let (line, signal, hist) = macd(&closes, 12, 26, 9);
        let offset = line.len() - signal.len();
        for i in 0..signal.len() {
            assert!((hist[i] - (line[i + offset] - signal[i])).abs() < 1e-10);
        }
    }

    // ---- atr -------------------------------------------------------------

    #[test]
    fn atr_constant_range_converges() {
        let mut series = Vec::new();
        for i in 0..30 {
            let base = 100.0 + i as f64 * 0.1;
            series.push(candle(base, base + 5.0, base - 5.0, base));
        }
        let atr = atr_series(&series, 14);
        assert!(!atr.is_empty());
        assert!((atr.last().unwrap() - 10.0).abs() < 1.0);
    }

    #[test]
    fn atr_uses_prev_close_on_gaps() {
        let series = vec![
            candle(100.0, 105.0, 95.0, 95.0),
            candle(110.0, 115.0, 108.0, 112.0), // gap: |115-95| = 20 > 115-108
            candle(112.0, 118.0, 110.0, 115.0),
            candle(115.0, 120.0, 113.0, 118.0),
        ];
        let atr = atr_series(&series, 3);
        assert!(atr[0] > 7.0);
    }

    #[test]
    fn atr_insufficient_data() {
        let series = vec![candle(100.0, 105.0, 95.0, 102.0); 10];
        assert!(atr_series(&series, 14).is_empty());
        assert!(atr_series(&series, 0).is_empty());
    }

    #[test]
    fn atr_series_grows_with_data() {
        let mut series = Vec::new();
        for i in 0..30 {
            let base = 100.0 + i as f64;
            series.push(candle(base, base + 3.0, base - 3.0, base + 1.0));
        }
        let atr = atr_series(&series, 14);
        // 29 TR values, period 14 => 16 smoothed outputs.
        assert_eq!(atr.len(), 16);
        assert!(atr.iter().all(|v| *v > 0.0));
    }
}
