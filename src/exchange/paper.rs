// =============================================================================
// Paper exchange — adapter over the simulated ledger
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ExchangeError;
use crate::exchange::{
    AccountState, CloseOutcome, ExchangeAdapter, OpenOutcome, OpenRequest, PositionState,
};
use crate::ledger::{Ledger, LedgerError};
use crate::settings::LIVE_LEVERAGE_CAP;
use crate::types::{Side, TradeMode};

pub struct PaperExchange {
    ledger: Arc<Ledger>,
}

impl PaperExchange {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

fn map_ledger_error(err: LedgerError) -> ExchangeError {
    match err {
        LedgerError::InsufficientBalance { .. }
        | LedgerError::PositionExists(_)
        | LedgerError::NonPositive => ExchangeError::Rejected(err.to_string()),
        LedgerError::NoPosition(coin) => ExchangeError::NoPosition(coin),
        LedgerError::Store(e) => ExchangeError::Ledger(e.to_string()),
    }
}

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    fn mode(&self) -> TradeMode {
        TradeMode::Paper
    }

    async fn account_state(
        &self,
        prices: &HashMap<String, f64>,
    ) -> Result<AccountState, ExchangeError> {
        let balance = self.ledger.available_balance();
        let unrealized = self.ledger.unrealized_pnl(prices);
        let realized = self.ledger.realized_pnl();

        let positions: Vec<PositionState> = self
            .ledger
            .open_positions()
            .into_iter()
            .map(|p| {
                let current_price = prices.get(&p.coin).copied().unwrap_or(p.entry_price);
                PositionState {
                    current_price,
                    unrealized_pnl: p.unrealized_pnl(current_price),
                    coin: p.coin,
                    side: p.side,
                    entry_price: p.entry_price,
                    quantity_usd: p.quantity_usd,
                    leverage: p.leverage,
                    entry_time: Some(p.entry_time),
                }
            })
            .collect();

        Ok(AccountState {
            balance,
            equity: balance + unrealized,
            unrealized_pnl: unrealized,
            realized_pnl: realized,
            total_pnl: unrealized + realized,
            num_positions: positions.len(),
            positions,
        })
    }

    async fn open(&self, request: &OpenRequest) -> Result<OpenOutcome, ExchangeError> {
        let (ok, reason) = self.ledger.can_open(request.quantity_usd, request.leverage);
        if !ok {
            return Err(ExchangeError::Rejected(
                reason.unwrap_or_else(|| "cannot open position".to_string()),
            ));
        }

        let side = if request.is_buy { Side::Long } else { Side::Short };

        let position = self
            .ledger
            .open(
                &request.coin,
                side,
                request.current_price,
                request.quantity_usd,
                request.leverage,
                request.decision_id,
            )
            .map_err(map_ledger_error)?;

        Ok(OpenOutcome {
            fill_price: position.entry_price,
            fill_size: position.units(),
            position_id: position.position_id,
        })
    }

    async fn close(
        &self,
        coin: &str,
        current_price: f64,
        _decision_id: Option<i64>,
    ) -> Result<CloseOutcome, ExchangeError> {
        let position_id = self.ledger.position(coin).map(|p| p.position_id);
        let realized_pnl = self
            .ledger
            .close(coin, current_price)
            .map_err(map_ledger_error)?;

        Ok(CloseOutcome {
            position_id,
            exit_price: current_price,
            realized_pnl,
        })
    }

    async fn max_leverage(&self, _coin: &str) -> Result<f64, ExchangeError> {
        Ok(LIVE_LEVERAGE_CAP)
    }

    async fn size_decimals(&self, _coin: &str) -> Result<u32, ExchangeError> {
        Ok(8)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn adapter() -> PaperExchange {
        let store = Store::open_in_memory().unwrap();
        PaperExchange::new(Arc::new(Ledger::new(store, 1000.0)))
    }

    fn prices(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(c, p)| (c.to_string(), *p)).collect()
    }

    fn open_request(coin: &str, is_buy: bool) -> OpenRequest {
        OpenRequest {
            coin: coin.to_string(),
            is_buy,
            quantity_usd: 50.0,
            current_price: 100_000.0,
            leverage: 2.0,
            slippage_tolerance: 0.05,
            decision_id: Some(1),
        }
    }

    #[tokio::test]
    async fn open_then_state_then_close() {
        let exchange = adapter();

        let outcome = exchange.open(&open_request("BTC/USDC:USDC", true)).await.unwrap();
        assert!((outcome.fill_size - 0.001).abs() < 1e-12);
        assert!((outcome.fill_price - 100_000.0).abs() < 1e-9);

        let marks = prices(&[("BTC/USDC:USDC", 101_000.0)]);
        let state = exchange.account_state(&marks).await.unwrap();
        assert_eq!(state.num_positions, 1);
        assert!((state.balance - 950.0).abs() < 1e-9);
        assert!((state.equity - 951.0).abs() < 1e-9);
        assert_eq!(state.positions[0].side, Side::Long);
        assert!(state.positions[0].entry_time.is_some());

        let close = exchange.close("BTC/USDC:USDC", 102_000.0, None).await.unwrap();
        assert!((close.realized_pnl - 2.0).abs() < 1e-9);
        assert_eq!(close.position_id, Some(outcome.position_id));
    }

    #[tokio::test]
    async fn duplicate_open_rejected() {
        let exchange = adapter();
        exchange.open(&open_request("BTC/USDC:USDC", true)).await.unwrap();
        let err = exchange.open(&open_request("BTC/USDC:USDC", false)).await;
        assert!(matches!(err, Err(ExchangeError::Rejected(_))));
    }

    #[tokio::test]
    async fn close_without_position_reports_no_position() {
        let exchange = adapter();
        let err = exchange.close("ETH/USDC:USDC", 3000.0, None).await;
        assert!(matches!(err, Err(ExchangeError::NoPosition(_))));
    }

    #[tokio::test]
    async fn short_open_maps_to_short_side() {
        let exchange = adapter();
        exchange.open(&open_request("ETH/USDC:USDC", false)).await.unwrap();
        let state = exchange.account_state(&HashMap::new()).await.unwrap();
        assert_eq!(state.positions[0].side, Side::Short);
    }
}
