// =============================================================================
// Live exchange adapter — real orders with hard safety rails
// =============================================================================
//
// Safety applied before anything reaches the wire:
//   - executed leverage is capped at 20x regardless of the decision
//   - order size is rounded to the venue's per-asset decimals
//   - orders under $1 notional are rejected as dust
//
// The venue does not report entry timestamps, so `entry_time` is merged from
// the store's position rows by coin. Closing a position the store never saw
// (opened externally) synthesizes a position row with an `_EXT_` infix so the
// history stays reviewable.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::ExchangeError;
use crate::exchange::provider::ExchangeClient;
use crate::exchange::{
    base_symbol, canonical_symbol, AccountState, CloseOutcome, ExchangeAdapter, OpenOutcome,
    OpenRequest, PositionState,
};
use crate::settings::LIVE_LEVERAGE_CAP;
use crate::store::Store;
use crate::types::{Side, TradeMode};

/// Minimum order notional accepted by the venue.
const MIN_NOTIONAL_USD: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
struct AssetMeta {
    sz_decimals: u32,
    max_leverage: f64,
}

pub struct LiveExchange {
    provider: Arc<ExchangeClient>,
    store: Arc<Store>,
    meta_cache: RwLock<HashMap<String, AssetMeta>>,
}

impl LiveExchange {
    pub fn new(provider: Arc<ExchangeClient>, store: Arc<Store>) -> Self {
        Self {
            provider,
            store,
            meta_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Round `size` to the venue's precision for this asset.
    fn round_size(size: f64, decimals: u32) -> f64 {
        let factor = 10f64.powi(decimals as i32);
        (size * factor).round() / factor
    }

    async fn asset_meta(&self, base: &str) -> Result<AssetMeta, ExchangeError> {
        if let Some(meta) = self.meta_cache.read().get(base) {
            return Ok(*meta);
        }

        let payload = self.provider.meta().await?;
        let universe = payload
            .get("universe")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut fetched = HashMap::new();
        for asset in &universe {
            let Some(name) = asset.get("name").and_then(|v| v.as_str()) else {
                continue;
            };
            fetched.insert(
                name.to_string(),
                AssetMeta {
                    sz_decimals: asset
                        .get("szDecimals")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(8) as u32,
                    max_leverage: asset
                        .get("maxLeverage")
                        .and_then(|v| v.as_f64())
                        .unwrap_or(LIVE_LEVERAGE_CAP),
                },
            );
        }

        let meta = fetched.get(base).copied().unwrap_or(AssetMeta {
            sz_decimals: 8,
            max_leverage: LIVE_LEVERAGE_CAP,
        });
        self.meta_cache.write().extend(fetched);
        Ok(meta)
    }

    /// Parse the first fill or error out of an order response's statuses.
    fn parse_fill(payload: &serde_json::Value) -> Result<Option<(f64, f64)>, ExchangeError> {
        if payload.get("status").and_then(|v| v.as_str()) != Some("ok") {
            let detail = payload
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("order not acknowledged");
            return Err(ExchangeError::Rejected(detail.to_string()));
        }

        let statuses = payload
            .pointer("/response/data/statuses")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        for status in &statuses {
            if let Some(filled) = status.get("filled") {
                let avg_px = filled
                    .get("avgPx")
                    .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_f64()))
                    .unwrap_or(0.0);
                let total_sz = filled
                    .get("totalSz")
                    .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_f64()))
                    .unwrap_or(0.0);
                return Ok(Some((avg_px, total_sz)));
            }
            if let Some(error) = status.get("error").and_then(|v| v.as_str()) {
                return Err(ExchangeError::Rejected(error.to_string()));
            }
        }
        Ok(None)
    }

    /// Live position info for one coin from the venue's user state.
    async fn venue_position(
        &self,
        base: &str,
    ) -> Result<Option<(Side, f64, f64, f64, f64)>, ExchangeError> {
        let state = self.provider.user_state().await?;
        let positions = state
            .get("assetPositions")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        for asset_position in &positions {
            let Some(position) = asset_position.get("position") else {
                continue;
            };
            if position.get("coin").and_then(|v| v.as_str()) != Some(base) {
                continue;
            }
            let szi = json_f64(position, "szi");
            if szi.abs() <= 0.0 {
                continue;
            }
            let side = if szi > 0.0 { Side::Long } else { Side::Short };
            let entry_price = json_f64(position, "entryPx");
            let unrealized_pnl = json_f64(position, "unrealizedPnl");
            let leverage = position
                .pointer("/leverage/value")
                .and_then(|v| v.as_f64())
                .unwrap_or(1.0);
            // Fall back to notional/leverage when marginUsed is absent.
            let mut margin = json_f64(position, "marginUsed");
            if margin <= 0.0 {
                margin = szi.abs() * entry_price / leverage.max(1.0);
            }
            return Ok(Some((side, entry_price, unrealized_pnl, margin, leverage)));
        }
        Ok(None)
    }
}

/// Numeric field that may arrive as a string or a number.
fn json_f64(value: &serde_json::Value, key: &str) -> f64 {
    match value.get(key) {
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or(0.0),
        Some(v) => v.as_f64().unwrap_or(0.0),
        None => 0.0,
    }
}

#[async_trait]
impl ExchangeAdapter for LiveExchange {
    fn mode(&self) -> TradeMode {
        TradeMode::Live
    }

    async fn account_state(
        &self,
        _prices: &HashMap<String, f64>,
    ) -> Result<AccountState, ExchangeError> {
        let state = self.provider.user_state().await?;

        let account_value = state
            .pointer("/marginSummary/accountValue")
            .map(|v| match v {
                serde_json::Value::String(s) => s.parse().unwrap_or(0.0),
                other => other.as_f64().unwrap_or(0.0),
            })
            .unwrap_or(0.0);

        // Entry times come from our own rows; the venue does not track them.
        let stored_entries: HashMap<String, DateTime<Utc>> = self
            .store
            .open_positions()
            .map_err(|e| ExchangeError::Ledger(e.to_string()))?
            .into_iter()
            .filter_map(|row| {
                DateTime::parse_from_rfc3339(&row.entry_time)
                    .ok()
                    .map(|t| (row.coin, t.with_timezone(&Utc)))
            })
            .collect();

        let mut positions = Vec::new();
        let mut total_unrealized = 0.0;

        let asset_positions = state
            .get("assetPositions")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        for asset_position in &asset_positions {
            let Some(position) = asset_position.get("position") else {
                continue;
            };
            let szi = json_f64(position, "szi");
            if szi.abs() <= 0.0 {
                continue;
            }

            let base = position
                .get("coin")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let coin = canonical_symbol(base);
            let entry_price = json_f64(position, "entryPx");
            let unrealized_pnl = json_f64(position, "unrealizedPnl");
            total_unrealized += unrealized_pnl;

            positions.push(PositionState {
                side: if szi > 0.0 { Side::Long } else { Side::Short },
                entry_price,
                current_price: entry_price,
                quantity_usd: json_f64(position, "marginUsed"),
                leverage: position
                    .pointer("/leverage/value")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(1.0),
                unrealized_pnl,
                entry_time: stored_entries.get(&coin).copied(),
                coin,
            });
        }

        Ok(AccountState {
            balance: account_value - total_unrealized,
            equity: account_value,
            unrealized_pnl: total_unrealized,
            // The venue folds realized P&L into the account value.
            realized_pnl: 0.0,
            total_pnl: total_unrealized,
            num_positions: positions.len(),
            positions,
        })
    }

    async fn open(&self, request: &OpenRequest) -> Result<OpenOutcome, ExchangeError> {
        let base = base_symbol(&request.coin).to_string();
        let meta = self.asset_meta(&base).await?;

        // Hard cap on executed leverage, whatever the decision asked for.
        let leverage = request.leverage.min(LIVE_LEVERAGE_CAP).min(meta.max_leverage);
        if leverage < request.leverage {
            warn!(
                coin = %request.coin,
                requested = request.leverage,
                executed = leverage,
                "capping leverage for live execution"
            );
        }

        if request.current_price <= 0.0 {
            return Err(ExchangeError::Rejected("no current price".to_string()));
        }

        let raw_size = (request.quantity_usd * leverage) / request.current_price;
        let size = Self::round_size(raw_size, meta.sz_decimals);
        let notional = size * request.current_price;
        if notional < MIN_NOTIONAL_USD {
            return Err(ExchangeError::DustSize(notional));
        }

        self.provider.update_leverage(&base, leverage as u32).await?;

        let payload = self
            .provider
            .market_open(&base, request.is_buy, size, request.slippage_tolerance)
            .await?;

        let (fill_price, fill_size) = Self::parse_fill(&payload)?
            .ok_or_else(|| ExchangeError::Rejected("order status unclear".to_string()))?;

        let position_id = format!("{base}_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        let side = if request.is_buy { Side::Long } else { Side::Short };
        self.store
            .append_position_entry(
                &position_id,
                &request.coin,
                side.as_str(),
                fill_price,
                request.quantity_usd,
                leverage,
                request.decision_id,
            )
            .map_err(|e| ExchangeError::Ledger(e.to_string()))?;

        info!(
            coin = %request.coin,
            position_id = %position_id,
            fill_price,
            fill_size,
            leverage,
            "live position opened"
        );

        Ok(OpenOutcome {
            position_id,
            fill_price,
            fill_size,
        })
    }

    async fn close(
        &self,
        coin: &str,
        current_price: f64,
        decision_id: Option<i64>,
    ) -> Result<CloseOutcome, ExchangeError> {
        let base = base_symbol(coin).to_string();

        // Snapshot the venue's view before closing so a synthetic row can be
        // reconstructed if the store never saw the entry.
        let venue_view = self.venue_position(&base).await?;
        if venue_view.is_none() {
            return Err(ExchangeError::NoPosition(coin.to_string()));
        }

        let payload = self.provider.market_close(&base).await?;
        let fill = Self::parse_fill(&payload)?;
        let exit_price = fill.map(|(px, _)| px).filter(|px| *px > 0.0).unwrap_or(current_price);

        let stored = self
            .store
            .open_positions()
            .map_err(|e| ExchangeError::Ledger(e.to_string()))?
            .into_iter()
            .find(|p| p.coin == coin);

        let (position_id, realized_pnl) = match stored {
            Some(row) => {
                // P&L from our own entry row.
                let units = (row.quantity_usd * row.leverage) / row.entry_price;
                let realized = match Side::parse(&row.side) {
                    Some(Side::Short) => (row.entry_price - exit_price) * units,
                    _ => (exit_price - row.entry_price) * units,
                };
                self.store
                    .close_position(&row.position_id, exit_price, realized)
                    .map_err(|e| ExchangeError::Ledger(e.to_string()))?;
                (row.position_id, realized)
            }
            None => {
                // Position was opened outside the bot: synthesize its row so
                // the close still lands in history. The venue's unrealized
                // P&L at close time is the best available realized figure.
                let (side, entry_price, unrealized_pnl, margin, leverage) =
                    venue_view.expect("checked above");
                let position_id =
                    format!("{base}_EXT_{}", Utc::now().format("%Y%m%d_%H%M%S"));

                self.store
                    .append_position_entry(
                        &position_id,
                        coin,
                        side.as_str(),
                        entry_price,
                        margin,
                        leverage,
                        decision_id,
                    )
                    .map_err(|e| ExchangeError::Ledger(e.to_string()))?;
                self.store
                    .close_position(&position_id, exit_price, unrealized_pnl)
                    .map_err(|e| ExchangeError::Ledger(e.to_string()))?;

                info!(
                    coin,
                    position_id = %position_id,
                    realized_pnl = unrealized_pnl,
                    "external position synthesized and closed"
                );
                (position_id, unrealized_pnl)
            }
        };

        info!(coin, position_id = %position_id, exit_price, realized_pnl, "live position closed");

        Ok(CloseOutcome {
            position_id: Some(position_id),
            exit_price,
            realized_pnl,
        })
    }

    async fn max_leverage(&self, coin: &str) -> Result<f64, ExchangeError> {
        let meta = self.asset_meta(base_symbol(coin)).await?;
        Ok(meta.max_leverage.min(LIVE_LEVERAGE_CAP))
    }

    async fn size_decimals(&self, coin: &str) -> Result<u32, ExchangeError> {
        let meta = self.asset_meta(base_symbol(coin)).await?;
        Ok(meta.sz_decimals)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_rounding_respects_decimals() {
        assert!((LiveExchange::round_size(0.0012345, 3) - 0.001).abs() < 1e-12);
        assert!((LiveExchange::round_size(1.23456789, 5) - 1.23457).abs() < 1e-12);
        assert!((LiveExchange::round_size(10.4, 0) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn parse_fill_extracts_price_and_size() {
        let payload = serde_json::json!({
            "status": "ok",
            "response": {"data": {"statuses": [
                {"filled": {"oid": 7, "avgPx": "100250.5", "totalSz": "0.001"}}
            ]}}
        });
        let (px, sz) = LiveExchange::parse_fill(&payload).unwrap().unwrap();
        assert!((px - 100_250.5).abs() < 1e-9);
        assert!((sz - 0.001).abs() < 1e-12);
    }

    #[test]
    fn parse_fill_surfaces_order_errors() {
        let payload = serde_json::json!({
            "status": "ok",
            "response": {"data": {"statuses": [{"error": "Insufficient margin"}]}}
        });
        let err = LiveExchange::parse_fill(&payload);
        assert!(matches!(err, Err(ExchangeError::Rejected(_))));
    }

    #[test]
    fn parse_fill_rejects_unacknowledged_orders() {
        let payload = serde_json::json!({"status": "err", "error": "down for maintenance"});
        assert!(matches!(
            LiveExchange::parse_fill(&payload),
            Err(ExchangeError::Rejected(_))
        ));
    }

    #[test]
    fn parse_fill_unclear_status_is_none() {
        let payload = serde_json::json!({
            "status": "ok",
            "response": {"data": {"statuses": [{"resting": {"oid": 9}}]}}
        });
        assert!(LiveExchange::parse_fill(&payload).unwrap().is_none());
    }

    #[test]
    fn json_f64_handles_both_encodings() {
        let value = serde_json::json!({"a": "1.5", "b": 2.5, "c": "junk"});
        assert!((json_f64(&value, "a") - 1.5).abs() < 1e-12);
        assert!((json_f64(&value, "b") - 2.5).abs() < 1e-12);
        assert_eq!(json_f64(&value, "c"), 0.0);
        assert_eq!(json_f64(&value, "missing"), 0.0);
    }
}
