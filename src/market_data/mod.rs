// =============================================================================
// Market data — candles, indicator series, per-coin snapshots
// =============================================================================

pub mod fetcher;
pub mod indicators;

use serde::{Deserialize, Serialize};

/// Number of indicator rows included in prompts, oldest → newest.
pub const SERIES_TAIL_ROWS: usize = 12;

/// A single OHLCV candle. `open_time` is the candle's start in epoch
/// milliseconds; candles are always ordered oldest first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// The full set of indicator series computed over one coin's candles.
/// Individual series have different lengths (each consumes its own warm-up
/// window); all are ordered oldest → newest.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndicatorSeries {
    pub closes: Vec<f64>,
    pub ema_20: Vec<f64>,
    pub ema_50: Vec<f64>,
    pub rsi_7: Vec<f64>,
    pub rsi_14: Vec<f64>,
    pub macd: Vec<f64>,
    pub macd_signal: Vec<f64>,
    pub macd_hist: Vec<f64>,
    pub atr_3: Vec<f64>,
    pub atr_14: Vec<f64>,
    pub volume: Vec<f64>,
    pub volume_sma_20: Vec<f64>,
}

/// Latest value of each indicator, where available.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IndicatorSnapshot {
    pub ema_20: Option<f64>,
    pub ema_50: Option<f64>,
    pub rsi_7: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub atr_3: Option<f64>,
    pub atr_14: Option<f64>,
    pub volume: Option<f64>,
    pub volume_sma_20: Option<f64>,
}

impl IndicatorSeries {
    /// Compute every series from candles (oldest first).
    pub fn compute(candles: &[Candle]) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volume: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        let (macd, macd_signal, macd_hist) = indicators::macd(&closes, 12, 26, 9);

        Self {
            ema_20: indicators::ema(&closes, 20),
            ema_50: indicators::ema(&closes, 50),
            rsi_7: indicators::rsi(&closes, 7),
            rsi_14: indicators::rsi(&closes, 14),
            macd,
            macd_signal,
            macd_hist,
            atr_3: indicators::atr_series(candles, 3),
            atr_14: indicators::atr_series(candles, 14),
            volume_sma_20: indicators::sma(&volume, 20),
            closes,
            volume,
        }
    }

    /// The most recent value of each series.
    pub fn latest(&self) -> IndicatorSnapshot {
        IndicatorSnapshot {
            ema_20: self.ema_20.last().copied(),
            ema_50: self.ema_50.last().copied(),
            rsi_7: self.rsi_7.last().copied(),
            rsi_14: self.rsi_14.last().copied(),
            macd: self.macd.last().copied(),
            macd_signal: self.macd_signal.last().copied(),
            macd_hist: self.macd_hist.last().copied(),
            atr_3: self.atr_3.last().copied(),
            atr_14: self.atr_14.last().copied(),
            volume: self.volume.last().copied(),
            volume_sma_20: self.volume_sma_20.last().copied(),
        }
    }
}

/// Everything the prompt builder needs about one coin for one cycle.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub coin: String,
    pub current_price: f64,
    /// Age of the newest candle in seconds, when known.
    pub candle_age_secs: Option<i64>,
    pub funding_rate: Option<f64>,
    pub open_interest: Option<f64>,
    pub series: IndicatorSeries,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.5;
                Candle {
                    open_time: i as i64 * 180_000,
                    open: base,
                    high: base + 2.0,
                    low: base - 2.0,
                    close: base + 0.5,
                    volume: 100.0 + i as f64,
                }
            })
            .collect()
    }

    #[test]
    fn compute_populates_all_series() {
        let series = IndicatorSeries::compute(&candles(100));
        assert_eq!(series.closes.len(), 100);
        assert!(!series.ema_20.is_empty());
        assert!(!series.ema_50.is_empty());
        assert!(!series.rsi_7.is_empty());
        assert!(!series.rsi_14.is_empty());
        assert!(!series.macd.is_empty());
        assert!(!series.macd_signal.is_empty());
        assert!(!series.macd_hist.is_empty());
        assert!(!series.atr_3.is_empty());
        assert!(!series.atr_14.is_empty());
        assert!(!series.volume_sma_20.is_empty());
    }

    #[test]
    fn latest_matches_series_tails() {
        let series = IndicatorSeries::compute(&candles(100));
        let snapshot = series.latest();
        assert_eq!(snapshot.ema_20, series.ema_20.last().copied());
        assert_eq!(snapshot.macd_hist, series.macd_hist.last().copied());
        assert_eq!(snapshot.volume, Some(199.0));
    }

    #[test]
    fn short_history_yields_empty_series_not_panic() {
        let series = IndicatorSeries::compute(&candles(5));
        assert!(series.ema_50.is_empty());
        assert!(series.macd.is_empty());
        assert!(series.latest().ema_50.is_none());
    }
}
