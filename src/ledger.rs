// =============================================================================
// Ledger — simulated paper-trading account mirrored through the Store
// =============================================================================
//
// Isolated-margin accounting: opening a position moves `quantity_usd` of
// margin out of the balance; closing returns the margin plus realized P&L.
//
// P&L for both sides uses the position size in base units:
//   units = (quantity_usd * leverage) / entry_price
//   long:  pnl = (exit - entry) * units
//   short: pnl = (entry - exit) * units
//
// A position liquidates when the price moves 1/leverage against the entry,
// i.e. the move that zeroes the committed margin.
//
// Thread-safety: all mutable state is behind `parking_lot::RwLock`; every
// mutation writes through to the Store before updating memory is observable.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::Store;
use crate::types::Side;

// ---------------------------------------------------------------------------
// Position model
// ---------------------------------------------------------------------------

/// An open paper position held in memory (the Store keeps the durable row).
#[derive(Debug, Clone, serde::Serialize)]
pub struct OpenPosition {
    pub position_id: String,
    pub coin: String,
    pub side: Side,
    pub entry_price: f64,
    /// Margin committed, in USD. Notional is `quantity_usd * leverage`.
    pub quantity_usd: f64,
    pub leverage: f64,
    pub entry_time: DateTime<Utc>,
    pub decision_id: Option<i64>,
}

impl OpenPosition {
    /// Position size in base units.
    pub fn units(&self) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (self.quantity_usd * self.leverage) / self.entry_price
    }

    /// Unrealized P&L at `current_price`.
    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        let units = self.units();
        match self.side {
            Side::Long => (current_price - self.entry_price) * units,
            Side::Short => (self.entry_price - current_price) * units,
        }
    }

    /// Price at which the committed margin is fully consumed.
    pub fn liquidation_price(&self) -> f64 {
        liquidation_price(self.entry_price, self.leverage, self.side)
    }
}

/// Liquidation price for a hypothetical or existing position: a move of
/// `1/leverage` against entry zeroes the margin.
pub fn liquidation_price(entry_price: f64, leverage: f64, side: Side) -> f64 {
    if leverage <= 0.0 {
        return 0.0;
    }
    let threshold = 1.0 / leverage;
    match side {
        Side::Long => entry_price * (1.0 - threshold),
        Side::Short => entry_price * (1.0 + threshold),
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient balance: need ${needed:.2}, available ${available:.2}")]
    InsufficientBalance { needed: f64, available: f64 },
    #[error("position already open for {0}")]
    PositionExists(String),
    #[error("no open position for {0}")]
    NoPosition(String),
    #[error("quantity and leverage must be positive")]
    NonPositive,
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

struct Inner {
    balance: f64,
    realized_pnl: f64,
    positions: HashMap<String, OpenPosition>,
}

pub struct Ledger {
    inner: RwLock<Inner>,
    store: Arc<Store>,
    initial_balance: f64,
}

impl Ledger {
    /// Create a ledger, restoring balance and open positions from the store
    /// when present; otherwise start fresh at `initial_balance`.
    pub fn new(store: Arc<Store>, initial_balance: f64) -> Self {
        let mut balance = initial_balance;
        let mut realized_pnl = 0.0;
        let mut positions = HashMap::new();

        match store.latest_account_snapshot() {
            Ok(Some(snapshot)) => {
                balance = snapshot.balance_usd;
                realized_pnl = snapshot.realized_pnl;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not restore account snapshot — starting fresh"),
        }

        match store.open_positions() {
            Ok(rows) => {
                for row in rows {
                    let Some(side) = Side::parse(&row.side) else {
                        warn!(position_id = %row.position_id, side = %row.side,
                              "unknown side on stored position — skipping");
                        continue;
                    };
                    let entry_time = DateTime::parse_from_rfc3339(&row.entry_time)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now());
                    positions.insert(
                        row.coin.clone(),
                        OpenPosition {
                            position_id: row.position_id,
                            coin: row.coin,
                            side,
                            entry_price: row.entry_price,
                            quantity_usd: row.quantity_usd,
                            leverage: row.leverage,
                            entry_time,
                            decision_id: row.decision_id,
                        },
                    );
                }
            }
            Err(e) => warn!(error = %e, "could not restore open positions — starting fresh"),
        }

        info!(
            balance,
            realized_pnl,
            open_positions = positions.len(),
            "paper ledger initialised"
        );

        Self {
            inner: RwLock::new(Inner {
                balance,
                realized_pnl,
                positions,
            }),
            store,
            initial_balance,
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Cash not locked in open positions.
    pub fn available_balance(&self) -> f64 {
        self.inner.read().balance
    }

    pub fn realized_pnl(&self) -> f64 {
        self.inner.read().realized_pnl
    }

    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    pub fn num_positions(&self) -> usize {
        self.inner.read().positions.len()
    }

    pub fn position(&self, coin: &str) -> Option<OpenPosition> {
        self.inner.read().positions.get(coin).cloned()
    }

    pub fn open_positions(&self) -> Vec<OpenPosition> {
        self.inner.read().positions.values().cloned().collect()
    }

    /// Total unrealized P&L across open positions, skipping coins without a
    /// price in the map.
    pub fn unrealized_pnl(&self, prices: &HashMap<String, f64>) -> f64 {
        self.inner
            .read()
            .positions
            .values()
            .filter_map(|p| prices.get(&p.coin).map(|price| p.unrealized_pnl(*price)))
            .sum()
    }

    /// Balance plus unrealized P&L.
    pub fn equity(&self, prices: &HashMap<String, f64>) -> f64 {
        self.available_balance() + self.unrealized_pnl(prices)
    }

    /// Check whether a position of this size could be opened at all.
    pub fn can_open(&self, quantity_usd: f64, leverage: f64) -> (bool, Option<String>) {
        if quantity_usd <= 0.0 || leverage <= 0.0 {
            return (false, Some("quantity and leverage must be positive".to_string()));
        }
        let available = self.available_balance();
        if quantity_usd > available {
            return (
                false,
                Some(format!(
                    "insufficient balance: need ${quantity_usd:.2}, available ${available:.2}"
                )),
            );
        }
        (true, None)
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Open a position: deduct margin, persist the entry row, then expose it
    /// in the in-memory map.
    pub fn open(
        &self,
        coin: &str,
        side: Side,
        entry_price: f64,
        quantity_usd: f64,
        leverage: f64,
        decision_id: Option<i64>,
    ) -> Result<OpenPosition, LedgerError> {
        if quantity_usd <= 0.0 || leverage <= 0.0 || entry_price <= 0.0 {
            return Err(LedgerError::NonPositive);
        }

        let mut inner = self.inner.write();

        if inner.positions.contains_key(coin) {
            return Err(LedgerError::PositionExists(coin.to_string()));
        }
        if quantity_usd > inner.balance {
            return Err(LedgerError::InsufficientBalance {
                needed: quantity_usd,
                available: inner.balance,
            });
        }

        let base = coin.split('/').next().unwrap_or(coin);
        let suffix = Uuid::new_v4().simple().to_string();
        let position_id = format!(
            "{base}_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &suffix[..8]
        );

        let position = OpenPosition {
            position_id: position_id.clone(),
            coin: coin.to_string(),
            side,
            entry_price,
            quantity_usd,
            leverage,
            entry_time: Utc::now(),
            decision_id,
        };

        self.store.append_position_entry(
            &position_id,
            coin,
            side.as_str(),
            entry_price,
            quantity_usd,
            leverage,
            decision_id,
        )?;

        inner.balance -= quantity_usd;
        inner.positions.insert(coin.to_string(), position.clone());

        info!(
            position_id = %position_id,
            coin,
            side = %side,
            entry_price,
            quantity_usd,
            leverage,
            balance = inner.balance,
            "paper position opened"
        );

        Ok(position)
    }

    /// Close the position for `coin` at `exit_price`, returning realized P&L.
    pub fn close(&self, coin: &str, exit_price: f64) -> Result<f64, LedgerError> {
        let mut inner = self.inner.write();

        let position = inner
            .positions
            .get(coin)
            .cloned()
            .ok_or_else(|| LedgerError::NoPosition(coin.to_string()))?;

        let pnl = position.unrealized_pnl(exit_price);

        self.store
            .close_position(&position.position_id, exit_price, pnl)?;

        inner.balance += position.quantity_usd + pnl;
        inner.realized_pnl += pnl;
        inner.positions.remove(coin);

        info!(
            position_id = %position.position_id,
            coin,
            exit_price,
            realized_pnl = pnl,
            balance = inner.balance,
            "paper position closed"
        );

        Ok(pnl)
    }

    /// Sweep open positions against current prices and force-close any whose
    /// price has crossed the liquidation threshold, at the liquidation price.
    /// Returns the ids of liquidated positions.
    pub fn check_liquidation(&self, prices: &HashMap<String, f64>) -> Vec<String> {
        let candidates: Vec<(String, f64, String)> = {
            let inner = self.inner.read();
            inner
                .positions
                .values()
                .filter_map(|p| {
                    let price = *prices.get(&p.coin)?;
                    let liq = p.liquidation_price();
                    let crossed = match p.side {
                        Side::Long => price <= liq,
                        Side::Short => price >= liq,
                    };
                    crossed.then(|| (p.coin.clone(), liq, p.position_id.clone()))
                })
                .collect()
        };

        let mut liquidated = Vec::new();
        for (coin, liq_price, position_id) in candidates {
            match self.close(&coin, liq_price) {
                Ok(pnl) => {
                    warn!(
                        position_id = %position_id,
                        coin = %coin,
                        liquidation_price = liq_price,
                        realized_pnl = pnl,
                        "position liquidated"
                    );
                    liquidated.push(position_id);
                }
                Err(e) => warn!(coin = %coin, error = %e, "liquidation close failed"),
            }
        }
        liquidated
    }

    // -------------------------------------------------------------------------
    // Metrics & persistence
    // -------------------------------------------------------------------------

    /// Per-trade Sharpe over closed positions: mean / sample-stddev of
    /// `realized_pnl / quantity_usd` percentages. Needs at least two samples
    /// and non-zero spread.
    pub fn sharpe(&self) -> Option<f64> {
        let closed = self.store.closed_positions(500).ok()?;

        let returns: Vec<f64> = closed
            .iter()
            .filter_map(|p| {
                let pnl = p.realized_pnl?;
                (p.quantity_usd > 0.0).then(|| (pnl / p.quantity_usd) * 100.0)
            })
            .collect();

        if returns.len() < 2 {
            return None;
        }

        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std = variance.sqrt();

        if std == 0.0 || !std.is_finite() {
            return None;
        }
        Some(mean / std)
    }

    /// Write an account snapshot with the current prices applied.
    pub fn save_state(&self, prices: &HashMap<String, f64>) -> Result<(), StoreError> {
        let unrealized = self.unrealized_pnl(prices);
        let equity = self.equity(prices);
        let sharpe = self.sharpe();
        let (balance, realized, num_positions) = {
            let inner = self.inner.read();
            (inner.balance, inner.realized_pnl, inner.positions.len())
        };

        self.store.append_account_snapshot(
            balance,
            equity,
            unrealized,
            realized,
            sharpe,
            num_positions as i64,
        )
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Ledger")
            .field("balance", &inner.balance)
            .field("realized_pnl", &inner.realized_pnl)
            .field("open_positions", &inner.positions.len())
            .finish()
    }
}
