// =============================================================================
// OHLCV fetcher — candle snapshots over the exchange's public info endpoint
// =============================================================================

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument};

use crate::error::MarketDataError;
use crate::exchange::base_symbol;
use crate::market_data::Candle;

/// Source of historical candles. The engine only ever talks to this trait,
/// so tests can substitute canned data.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetch up to `limit` closed candles for `coin` (canonical symbol),
    /// oldest first.
    async fn fetch_ohlcv(
        &self,
        coin: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, MarketDataError>;
}

/// Timeframe string ("1m", "3m", "15m", "1h", …) to milliseconds.
pub fn timeframe_ms(timeframe: &str) -> Option<i64> {
    let (digits, unit) = timeframe.split_at(timeframe.len().checked_sub(1)?);
    let value: i64 = digits.parse().ok()?;
    let unit_ms = match unit {
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return None,
    };
    Some(value * unit_ms)
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Candle fetch against the exchange's unauthenticated info endpoint.
pub struct HttpMarketData {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMarketData {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

fn field_f64(value: &serde_json::Value, key: &str) -> Result<f64, MarketDataError> {
    let field = value
        .get(key)
        .ok_or_else(|| MarketDataError::Malformed(format!("missing field '{key}'")))?;

    // The venue serialises prices as strings and counts as numbers.
    if let Some(s) = field.as_str() {
        return s
            .parse::<f64>()
            .map_err(|_| MarketDataError::Malformed(format!("non-numeric '{key}': {s}")));
    }
    field
        .as_f64()
        .ok_or_else(|| MarketDataError::Malformed(format!("non-numeric '{key}'")))
}

#[async_trait]
impl MarketDataSource for HttpMarketData {
    #[instrument(skip(self), name = "market_data::fetch_ohlcv")]
    async fn fetch_ohlcv(
        &self,
        coin: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let interval_ms = timeframe_ms(timeframe)
            .ok_or_else(|| MarketDataError::Malformed(format!("bad timeframe '{timeframe}'")))?;
        let end_time = Utc::now().timestamp_millis();
        let start_time = end_time - interval_ms * limit as i64;

        let body = serde_json::json!({
            "type": "candleSnapshot",
            "req": {
                "coin": base_symbol(coin),
                "interval": timeframe,
                "startTime": start_time,
                "endTime": end_time,
            }
        });

        let url = format!("{}/info", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MarketDataError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MarketDataError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MarketDataError::Malformed(e.to_string()))?;

        let rows = payload
            .as_array()
            .ok_or_else(|| MarketDataError::Malformed("expected a candle array".to_string()))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            candles.push(Candle {
                open_time: row
                    .get("t")
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| MarketDataError::Malformed("missing field 't'".to_string()))?,
                open: field_f64(row, "o")?,
                high: field_f64(row, "h")?,
                low: field_f64(row, "l")?,
                close: field_f64(row, "c")?,
                volume: field_f64(row, "v")?,
            });
        }

        if candles.is_empty() {
            return Err(MarketDataError::Empty(coin.to_string()));
        }

        candles.sort_by_key(|c| c.open_time);
        debug!(coin, count = candles.len(), "candles fetched");
        Ok(candles)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_conversion() {
        assert_eq!(timeframe_ms("1m"), Some(60_000));
        assert_eq!(timeframe_ms("3m"), Some(180_000));
        assert_eq!(timeframe_ms("1h"), Some(3_600_000));
        assert_eq!(timeframe_ms("1d"), Some(86_400_000));
        assert_eq!(timeframe_ms("3x"), None);
        assert_eq!(timeframe_ms(""), None);
    }

    #[test]
    fn field_parsing_accepts_strings_and_numbers() {
        let row = serde_json::json!({"o": "123.5", "h": 130.0});
        assert!((field_f64(&row, "o").unwrap() - 123.5).abs() < 1e-9);
        assert!((field_f64(&row, "h").unwrap() - 130.0).abs() < 1e-9);
        assert!(field_f64(&row, "l").is_err());
    }
}
