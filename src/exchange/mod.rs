// =============================================================================
// Exchange adapters — one interface over paper and live execution
// =============================================================================
//
// The adapter is the sole translator between canonical symbols
// ("BTC/USDC:USDC") and the exchange-native base form ("BTC"). Everything
// above this boundary speaks canonical symbols only.
// =============================================================================

pub mod live;
pub mod paper;
pub mod provider;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ExchangeError;
use crate::types::{Side, TradeMode};

/// Canonical symbol → exchange-native base symbol.
pub fn base_symbol(coin: &str) -> &str {
    coin.split('/').next().unwrap_or(coin)
}

/// Exchange-native base symbol → canonical form.
pub fn canonical_symbol(base: &str) -> String {
    if base.contains('/') {
        base.to_string()
    } else {
        format!("{base}/USDC:USDC")
    }
}

// ---------------------------------------------------------------------------
// Shared shapes
// ---------------------------------------------------------------------------

/// One open position as reported by the adapter.
#[derive(Debug, Clone, Serialize)]
pub struct PositionState {
    pub coin: String,
    pub side: Side,
    pub entry_price: f64,
    pub current_price: f64,
    /// Margin committed in USD.
    pub quantity_usd: f64,
    pub leverage: f64,
    pub unrealized_pnl: f64,
    pub entry_time: Option<DateTime<Utc>>,
}

/// Uniform account summary across paper and live backends.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountState {
    pub balance: f64,
    pub equity: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub total_pnl: f64,
    pub num_positions: usize,
    pub positions: Vec<PositionState>,
}

impl AccountState {
    pub fn position(&self, coin: &str) -> Option<&PositionState> {
        self.positions.iter().find(|p| p.coin == coin)
    }
}

/// Parameters for a market entry.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub coin: String,
    pub is_buy: bool,
    /// Margin to commit in USD; notional is `quantity_usd * leverage`.
    pub quantity_usd: f64,
    pub current_price: f64,
    pub leverage: f64,
    pub slippage_tolerance: f64,
    pub decision_id: Option<i64>,
}

/// A filled entry.
#[derive(Debug, Clone)]
pub struct OpenOutcome {
    pub position_id: String,
    pub fill_price: f64,
    pub fill_size: f64,
}

/// A completed close.
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub position_id: Option<String>,
    pub exit_price: f64,
    pub realized_pnl: f64,
}

// ---------------------------------------------------------------------------
// The adapter interface
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn mode(&self) -> TradeMode;

    /// Current account summary. `prices` supplies marks for positions whose
    /// backend does not report its own (the paper ledger).
    async fn account_state(
        &self,
        prices: &HashMap<String, f64>,
    ) -> Result<AccountState, ExchangeError>;

    /// Open a market position.
    async fn open(&self, request: &OpenRequest) -> Result<OpenOutcome, ExchangeError>;

    /// Close the entire position for `coin`.
    async fn close(
        &self,
        coin: &str,
        current_price: f64,
        decision_id: Option<i64>,
    ) -> Result<CloseOutcome, ExchangeError>;

    /// Per-coin leverage ceiling.
    async fn max_leverage(&self, coin: &str) -> Result<f64, ExchangeError>;

    /// Per-coin size precision (decimal places).
    async fn size_decimals(&self, coin: &str) -> Result<u32, ExchangeError>;
}
