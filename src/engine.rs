// =============================================================================
// Cycle engine — the periodic analyze → decide → validate → execute loop
// =============================================================================
//
// Single-threaded cooperative scheduler: exactly one cycle runs at a time.
// The control token is observed between cycles and at ~100 ms granularity
// during the inter-cycle sleep; a `stopped` token parks the engine until the
// control plane starts it again. A token observed after execution begins
// never interrupts that execution.
//
// Ordering guarantee per cycle: the decision row is inserted before
// execution starts, its execution status is updated after execution
// completes, and the account snapshot is appended after that.
//
// Every failure inside a cycle is caught, recorded as a status event, and
// the engine moves on to the next cycle.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::control::ControlChannel;
use crate::error::{LlmError, MarketDataError};
use crate::exchange::{AccountState, ExchangeAdapter, OpenRequest};
use crate::ledger::Ledger;
use crate::llm::client::LlmClient;
use crate::llm::parser::{parse_decision, TradeDecision};
use crate::llm::prompts::{AccountContext, PositionView, PromptBuilder, TradingConfig};
use crate::market_data::fetcher::MarketDataSource;
use crate::market_data::{Candle, IndicatorSeries, MarketSnapshot};
use crate::risk::{self, AccountView, RiskLimits};
use crate::settings::{BotConfig, Settings, CANDLE_TIMEFRAME_SECS};
use crate::store::{NewDecision, Store};
use crate::types::{ControlState, ExecutionStatus, Signal};

/// Candle window fetched per coin per cycle.
const CANDLE_LIMIT: u32 = 100;
const CANDLE_TIMEFRAME: &str = "3m";
/// Token poll granularity inside the sleep loop.
const SLEEP_POLL: Duration = Duration::from_millis(100);
/// Poll granularity while parked (paused or stopped).
const PARKED_POLL: Duration = Duration::from_millis(500);

pub struct CycleEngine {
    store: Arc<Store>,
    settings: Arc<Settings>,
    control: Arc<ControlChannel>,
    llm: Arc<LlmClient>,
    adapter: Arc<dyn ExchangeAdapter>,
    market: Arc<dyn MarketDataSource>,
    /// Present in paper mode only; live state belongs to the venue.
    ledger: Option<Arc<Ledger>>,
    alive: Arc<AtomicBool>,
    start_time: DateTime<Utc>,
}

impl CycleEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        settings: Arc<Settings>,
        control: Arc<ControlChannel>,
        llm: Arc<LlmClient>,
        adapter: Arc<dyn ExchangeAdapter>,
        market: Arc<dyn MarketDataSource>,
        ledger: Option<Arc<Ledger>>,
        alive: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            settings,
            control,
            llm,
            adapter,
            market,
            ledger,
            alive,
            start_time: Utc::now(),
        }
    }

    // -------------------------------------------------------------------------
    // Main loop
    // -------------------------------------------------------------------------

    pub async fn run(self) {
        self.alive.store(true, Ordering::SeqCst);
        info!(mode = %self.adapter.mode(), "cycle engine started");

        let mut last_state: Option<ControlState> = None;
        let mut cycle_count: u64 = 0;

        loop {
            let state = self.control.state();
            let transitioned = last_state != Some(state);
            last_state = Some(state);

            match state {
                ControlState::Stopped => {
                    if transitioned {
                        info!("engine stopped — waiting for start");
                        let _ = self.store.append_status("stopped", None, None);
                    }
                    self.control.wait_for_nudge(PARKED_POLL).await;
                }
                ControlState::Paused => {
                    if transitioned {
                        info!("engine paused — waiting for resume");
                        let _ = self.store.append_status("paused", Some("paused by operator"), None);
                    }
                    self.control.wait_for_nudge(PARKED_POLL).await;
                }
                ControlState::Running => {
                    cycle_count += 1;
                    info!(cycle = cycle_count, "starting analysis cycle");

                    if let Err(e) = self.run_cycle().await {
                        error!(cycle = cycle_count, error = %e, "cycle failed");
                        let _ = self.store.append_status(
                            "error",
                            Some("analysis cycle failed"),
                            Some(&e.to_string()),
                        );
                    }

                    // The dashboard countdown is derived from this row; it is
                    // written even when the cycle skipped or failed.
                    let interval = BotConfig::load(&self.store).execution_interval_seconds;
                    let next_cycle = Utc::now() + ChronoDuration::seconds(interval as i64);
                    if let Err(e) = self
                        .store
                        .set_setting("next_cycle_time", &next_cycle.to_rfc3339())
                    {
                        warn!(error = %e, "failed to persist next_cycle_time");
                    }

                    info!(
                        cycle = cycle_count,
                        next_cycle = %next_cycle.to_rfc3339(),
                        "cycle complete — sleeping"
                    );
                    self.sleep_until_next_cycle(Duration::from_secs(interval)).await;
                }
            }
        }
    }

    /// Sleep for `interval`, checking the control token every ~100 ms.
    /// Returns early when the token leaves `running`.
    async fn sleep_until_next_cycle(&self, interval: Duration) {
        let deadline = Instant::now() + interval;
        loop {
            if self.control.state() != ControlState::Running {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let wait = (deadline - now).min(SLEEP_POLL);
            self.control.wait_for_nudge(wait).await;
        }
    }

    // -------------------------------------------------------------------------
    // One cycle
    // -------------------------------------------------------------------------

    async fn run_cycle(&self) -> anyhow::Result<()> {
        let config = BotConfig::load(&self.store);
        if config.execution_interval_seconds < CANDLE_TIMEFRAME_SECS {
            warn!(
                interval = config.execution_interval_seconds,
                candle = CANDLE_TIMEFRAME_SECS,
                "cycle interval shorter than the candle timeframe — consecutive \
                 cycles may see identical data"
            );
        }

        // Preliminary account view, before prices exist, to learn which coins
        // hold positions — those are always analysed so they never orphan.
        let preliminary = self
            .adapter
            .account_state(&HashMap::new())
            .await
            .map_err(|e| anyhow::anyhow!("account state query failed: {e}"))?;

        let coins = analysis_coins(&self.settings.trading_assets, &preliminary);
        info!(coins = ?coins, "analysing assets");

        // Fetch candles and compute indicators per coin. Coins that fail to
        // fetch are skipped; a cycle with no data at all is an error.
        let mut market_map: BTreeMap<String, MarketSnapshot> = BTreeMap::new();
        let mut prices: HashMap<String, f64> = HashMap::new();

        for coin in &coins {
            match self.fetch_candles(coin).await {
                Ok(candles) => {
                    let current_price = candles.last().map(|c| c.close).unwrap_or(0.0);
                    if current_price <= 0.0 {
                        warn!(coin = %coin, "no usable price — skipping coin");
                        continue;
                    }
                    let candle_age_secs = candles
                        .last()
                        .map(|c| (Utc::now().timestamp_millis() - c.open_time) / 1000);
                    if let Some(age) = candle_age_secs {
                        if age > 2 * CANDLE_TIMEFRAME_SECS as i64 {
                            warn!(coin = %coin, age_secs = age, "newest candle is stale");
                        }
                    }
                    prices.insert(coin.clone(), current_price);
                    market_map.insert(
                        coin.clone(),
                        MarketSnapshot {
                            coin: coin.clone(),
                            current_price,
                            candle_age_secs,
                            funding_rate: None,
                            open_interest: None,
                            series: IndicatorSeries::compute(&candles),
                        },
                    );
                }
                Err(e) => warn!(coin = %coin, error = %e, "market data fetch failed — skipping coin"),
            }
        }

        if market_map.is_empty() {
            anyhow::bail!("no market data available for any analysed asset");
        }

        // Pre-flight: when the balance cannot open anything and no position
        // needs managing, skip the model call entirely.
        if should_skip_preflight(
            preliminary.balance,
            config.min_balance_threshold,
            preliminary.num_positions,
        ) {
            info!(
                balance = preliminary.balance,
                threshold = config.min_balance_threshold,
                "pre-flight skip: insufficient balance"
            );
            self.store.append_status(
                "paused",
                Some(&format!(
                    "paused: insufficient balance (${:.2} below ${:.2})",
                    preliminary.balance, config.min_balance_threshold
                )),
                None,
            )?;
            return Ok(());
        }

        // Mark positions to market; in paper mode sweep liquidations first so
        // the model never reasons about a position that no longer exists.
        if let Some(ledger) = &self.ledger {
            let liquidated = ledger.check_liquidation(&prices);
            if !liquidated.is_empty() {
                self.store.append_status(
                    "running",
                    Some(&format!("liquidated {} position(s)", liquidated.len())),
                    None,
                )?;
            }
        }
        let account = self
            .adapter
            .account_state(&prices)
            .await
            .map_err(|e| anyhow::anyhow!("account state refresh failed: {e}"))?;

        info!(
            balance = account.balance,
            equity = account.equity,
            unrealized_pnl = account.unrealized_pnl,
            positions = account.num_positions,
            "account state"
        );

        // History context for the prompt.
        let trade_history = self.store.closed_positions(10)?;
        let recent_decisions: Vec<_> = self
            .store
            .recent_decisions(5)?
            .into_iter()
            .map(|row| row.decision)
            .collect();
        let sharpe = self.ledger.as_ref().and_then(|l| l.sharpe());

        // Active operator guidance of type `cycle` is inlined verbatim.
        let guidance = self
            .store
            .get_active_operator_input()?
            .filter(|input| input.message_type == "cycle")
            .map(|input| input.message);
        if let Some(g) = &guidance {
            info!(guidance = %g, "active supervisor guidance");
        }

        // Per-coin leverage caps, fetched once per cycle.
        let mut leverage_limits: BTreeMap<String, f64> = BTreeMap::new();
        for coin in market_map.keys() {
            let cap = match self.adapter.max_leverage(coin).await {
                Ok(cap) => cap,
                Err(e) => {
                    warn!(coin = %coin, error = %e, "max leverage lookup failed — using global cap");
                    self.settings.max_leverage
                }
            };
            leverage_limits.insert(coin.clone(), cap);
        }

        // Build prompts.
        let prompt_builder = PromptBuilder::new(TradingConfig {
            exchange_name: "Hyperliquid".to_string(),
            asset_class: "Perpetual Futures".to_string(),
            min_position_size_usd: config.min_margin_usd,
            max_leverage: self.settings.max_leverage,
            preset_name: config.prompt_preset.clone(),
        });

        let account_context = AccountContext {
            available_cash: account.balance,
            total_value: account.equity,
            total_return_pct: self.total_return_pct(&account),
            sharpe_ratio: sharpe,
            positions: self.position_views(&account),
            max_positions: config.max_open_positions,
            trade_history,
            recent_decisions,
        };

        let minutes_since_start =
            Utc::now().signed_duration_since(self.start_time).num_minutes();
        let system_prompt = prompt_builder.build_system_prompt();
        let user_prompt = prompt_builder.build_user_prompt(
            &market_map,
            &account_context,
            minutes_since_start,
            guidance.as_deref(),
            &leverage_limits,
        );

        // Ask the model.
        info!(preset = %config.prompt_preset, "requesting trading decision");
        let response = match self.llm.complete(&system_prompt, &user_prompt).await {
            Ok(text) => text,
            Err(e @ (LlmError::Api { .. } | LlmError::Empty)) => {
                self.store.append_status(
                    "error",
                    Some("no decision from model"),
                    Some(&e.to_string()),
                )?;
                return Ok(());
            }
            Err(e) => {
                self.store.append_status(
                    "error",
                    Some("model unreachable after retries"),
                    Some(&e.to_string()),
                )?;
                return Ok(());
            }
        };

        // Parse and validate the decision shape.
        let caps_for_parser: HashMap<String, f64> =
            leverage_limits.iter().map(|(k, v)| (k.clone(), *v)).collect();
        let mut decision = match parse_decision(&response, Some(&caps_for_parser)) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "decision parse failed");
                self.store.append_status(
                    "error",
                    Some("could not parse model response"),
                    Some(&e.to_string()),
                )?;
                return Ok(());
            }
        };

        let Some(decision_price) = prices.get(&decision.coin).copied() else {
            self.store.append_status(
                "error",
                Some(&format!("no market data for decided coin {}", decision.coin)),
                None,
            )?;
            return Ok(());
        };

        // A hold against an existing position reports that position's actual
        // size and leverage; a hold with no position changes nothing.
        if decision.signal == Signal::Hold {
            if let Some(position) = account.position(&decision.coin) {
                decision.quantity_usd = position.quantity_usd;
                decision.leverage = position.leverage;
            }
        }

        // Persist the decision before any execution starts.
        let decision_id = self.store.append_decision(&NewDecision {
            coin: decision.coin.clone(),
            signal: decision.signal.as_str().to_string(),
            quantity_usd: decision.quantity_usd,
            leverage: decision.leverage,
            confidence: decision.confidence,
            profit_target: decision.exit_plan.profit_target,
            stop_loss: decision.exit_plan.stop_loss,
            invalidation_condition: decision.exit_plan.invalidation_condition.clone(),
            justification: decision.justification.clone(),
            raw_response: response.clone(),
            system_prompt,
            user_prompt,
        })?;

        info!(
            decision_id,
            coin = %decision.coin,
            signal = %decision.signal,
            quantity_usd = decision.quantity_usd,
            leverage = decision.leverage,
            confidence = decision.confidence,
            "decision recorded"
        );

        // Risk gate.
        let daily_pnl = self.store.realized_pnl_since(&risk::utc_day_start())?;
        let view = AccountView {
            available_balance: account.balance,
            open_coins: account.positions.iter().map(|p| p.coin.clone()).collect(),
            open_position_count: account.num_positions as u32,
            daily_realized_pnl: daily_pnl,
        };
        let limits = RiskLimits {
            min_margin_usd: config.min_margin_usd,
            max_margin_usd: config.max_margin_usd,
            max_leverage_for_coin: leverage_limits
                .get(&decision.coin)
                .copied()
                .unwrap_or(self.settings.max_leverage)
                .min(self.settings.max_leverage),
            daily_loss_limit_usd: self.settings.daily_loss_limit_usd,
            max_open_positions: config.max_open_positions,
        };

        let verdict = risk::validate(&decision, decision_price, &view, &limits);
        for advisory in &verdict.warnings {
            warn!(decision_id, advisory = %advisory, "risk advisory");
        }
        if !verdict.approved {
            let reason = verdict.reason.unwrap_or_else(|| "rejected".to_string());
            warn!(decision_id, reason = %reason, "decision rejected by risk gate");
            self.store
                .set_decision_execution(decision_id, ExecutionStatus::Skipped, Some(&reason))?;
            self.store.append_status(
                "running",
                Some(&format!(
                    "skipped {} for {}: {reason}",
                    decision.signal, decision.coin
                )),
                None,
            )?;
            return Ok(());
        }

        // Execute.
        self.execute_decision(&decision, decision_id, decision_price).await?;

        // Persist the post-execution account snapshot and status line.
        match &self.ledger {
            Some(ledger) => ledger.save_state(&prices)?,
            None => {
                let refreshed = self
                    .adapter
                    .account_state(&prices)
                    .await
                    .unwrap_or(account);
                self.store.append_account_snapshot(
                    refreshed.balance,
                    refreshed.equity,
                    refreshed.unrealized_pnl,
                    refreshed.realized_pnl,
                    None,
                    refreshed.num_positions as i64,
                )?;
            }
        }

        self.store.append_status(
            "running",
            Some(&format!("executed {} for {}", decision.signal, decision.coin)),
            None,
        )?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    async fn execute_decision(
        &self,
        decision: &TradeDecision,
        decision_id: i64,
        current_price: f64,
    ) -> anyhow::Result<()> {
        match decision.signal {
            Signal::Hold => {
                self.store
                    .set_decision_execution(decision_id, ExecutionStatus::Success, None)?;
            }
            Signal::BuyToEnter | Signal::SellToEnter => {
                let request = OpenRequest {
                    coin: decision.coin.clone(),
                    is_buy: decision.signal == Signal::BuyToEnter,
                    quantity_usd: decision.quantity_usd,
                    current_price,
                    leverage: decision.leverage,
                    slippage_tolerance: self.settings.slippage_tolerance,
                    decision_id: Some(decision_id),
                };
                match self.adapter.open(&request).await {
                    Ok(outcome) => {
                        info!(
                            decision_id,
                            position_id = %outcome.position_id,
                            fill_price = outcome.fill_price,
                            fill_size = outcome.fill_size,
                            "entry executed"
                        );
                        self.store.set_decision_execution(
                            decision_id,
                            ExecutionStatus::Success,
                            None,
                        )?;
                    }
                    Err(e) => {
                        warn!(decision_id, error = %e, "entry execution failed");
                        self.store.set_decision_execution(
                            decision_id,
                            ExecutionStatus::Failed,
                            Some(&e.to_string()),
                        )?;
                        self.store.append_status(
                            "error",
                            Some(&format!("trade execution failed for {}", decision.coin)),
                            Some(&e.to_string()),
                        )?;
                    }
                }
            }
            Signal::Close => {
                match self
                    .adapter
                    .close(&decision.coin, current_price, Some(decision_id))
                    .await
                {
                    Ok(outcome) => {
                        info!(
                            decision_id,
                            exit_price = outcome.exit_price,
                            realized_pnl = outcome.realized_pnl,
                            "close executed"
                        );
                        self.store.set_decision_execution(
                            decision_id,
                            ExecutionStatus::Success,
                            None,
                        )?;
                    }
                    Err(e) => {
                        warn!(decision_id, error = %e, "close execution failed");
                        self.store.set_decision_execution(
                            decision_id,
                            ExecutionStatus::Failed,
                            Some(&e.to_string()),
                        )?;
                        self.store.append_status(
                            "error",
                            Some(&format!("close failed for {}", decision.coin)),
                            Some(&e.to_string()),
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Cycle helpers
    // -------------------------------------------------------------------------

    /// Bounded-retry candle fetch: transient failures retry twice with a
    /// short backoff, hard failures surface immediately.
    async fn fetch_candles(&self, coin: &str) -> Result<Vec<Candle>, MarketDataError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .market
                .fetch_ohlcv(coin, CANDLE_TIMEFRAME, CANDLE_LIMIT)
                .await
            {
                Ok(candles) => return Ok(candles),
                Err(e) if e.is_transient() && attempt < 3 => {
                    warn!(coin, attempt, error = %e, "transient market data error — retrying");
                    tokio::time::sleep(Duration::from_secs(2 * attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn total_return_pct(&self, account: &AccountState) -> f64 {
        match &self.ledger {
            Some(ledger) if ledger.initial_balance() > 0.0 => {
                (account.total_pnl / ledger.initial_balance()) * 100.0
            }
            _ => 0.0,
        }
    }

    /// Position views for the prompt, with exit plans pulled from the
    /// decisions that opened them.
    fn position_views(&self, account: &AccountState) -> Vec<PositionView> {
        account
            .positions
            .iter()
            .map(|p| {
                let exit_plan = self
                    .store
                    .open_positions()
                    .ok()
                    .and_then(|rows| rows.into_iter().find(|row| row.coin == p.coin))
                    .and_then(|row| row.decision_id)
                    .and_then(|id| self.store.get_decision(id).ok().flatten());

                PositionView {
                    coin: p.coin.clone(),
                    side: p.side,
                    entry_price: p.entry_price,
                    current_price: p.current_price,
                    quantity_usd: p.quantity_usd,
                    leverage: p.leverage,
                    unrealized_pnl: p.unrealized_pnl,
                    entry_time: p.entry_time,
                    profit_target: exit_plan.as_ref().and_then(|d| d.profit_target),
                    stop_loss: exit_plan.as_ref().and_then(|d| d.stop_loss),
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Pure helpers (also used by tests)
// ---------------------------------------------------------------------------

/// True when the model call should be skipped: the balance is below the
/// trading threshold and there is no position to manage.
pub fn should_skip_preflight(balance: f64, min_balance_threshold: f64, num_positions: usize) -> bool {
    balance < min_balance_threshold && num_positions == 0
}

/// The union of configured assets and coins with open positions, configured
/// assets first, without duplicates.
pub fn analysis_coins(configured: &[String], account: &AccountState) -> Vec<String> {
    let mut coins = configured.to_vec();
    for position in &account.positions {
        if !coins.contains(&position.coin) {
            coins.push(position.coin.clone());
        }
    }
    coins
}

// ---------------------------------------------------------------------------
// Direct queries (interrupt-type operator inputs)
// ---------------------------------------------------------------------------

/// Answer an out-of-band operator question using current stored state. Does
/// not touch the ledger and records no decision; only a `direct_query`
/// status row marks that it happened.
pub async fn direct_query(
    store: &Arc<Store>,
    llm: &Arc<LlmClient>,
    question: &str,
) -> Result<String, LlmError> {
    let mut context = Vec::new();

    if let Ok(Some(snapshot)) = store.latest_account_snapshot() {
        context.push(format!(
            "Account: balance ${:.2}, equity ${:.2}, unrealized P&L ${:+.2}, {} open position(s).",
            snapshot.balance_usd, snapshot.equity_usd, snapshot.unrealized_pnl,
            snapshot.num_positions
        ));
    }
    if let Ok(positions) = store.open_positions() {
        for p in positions {
            context.push(format!(
                "Open: {} {} entry ${:.2}, margin ${:.2} at {}x.",
                p.coin, p.side, p.entry_price, p.quantity_usd, p.leverage
            ));
        }
    }
    if let Ok(rows) = store.recent_decisions(3) {
        for row in rows {
            context.push(format!(
                "Recent decision: {} {} ({}).",
                row.decision.signal, row.decision.coin, row.decision.execution_status
            ));
        }
    }

    let system = "You are the supervisor-facing assistant of an autonomous trading bot. \
                  Answer the operator's question using the provided account context. \
                  Be concise and factual; do not invent data or propose trades."
        .to_string();
    let user = format!("{}\n\nOperator question: {question}", context.join("\n"));

    let answer = llm.complete(&system, &user).await?;
    let _ = store.append_status("direct_query", Some(question), None);
    Ok(answer)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::PositionState;
    use crate::types::Side;

    fn account_with(coins: &[&str]) -> AccountState {
        AccountState {
            balance: 1000.0,
            positions: coins
                .iter()
                .map(|c| PositionState {
                    coin: c.to_string(),
                    side: Side::Long,
                    entry_price: 100.0,
                    current_price: 100.0,
                    quantity_usd: 10.0,
                    leverage: 2.0,
                    unrealized_pnl: 0.0,
                    entry_time: None,
                })
                .collect(),
            num_positions: coins.len(),
            ..Default::default()
        }
    }

    #[test]
    fn analysis_coins_unions_positions() {
        let configured = vec!["BTC/USDC:USDC".to_string(), "ETH/USDC:USDC".to_string()];
        let account = account_with(&["SOL/USDC:USDC", "BTC/USDC:USDC"]);

        let coins = analysis_coins(&configured, &account);
        assert_eq!(
            coins,
            vec![
                "BTC/USDC:USDC".to_string(),
                "ETH/USDC:USDC".to_string(),
                "SOL/USDC:USDC".to_string(),
            ]
        );
    }

    #[test]
    fn analysis_coins_without_positions_is_configured_list() {
        let configured = vec!["BTC/USDC:USDC".to_string()];
        let coins = analysis_coins(&configured, &account_with(&[]));
        assert_eq!(coins, configured);
    }

    #[test]
    fn preflight_skips_only_broke_and_flat_accounts() {
        // Balance below threshold with no positions: skip.
        assert!(should_skip_preflight(5.0, 10.0, 0));
        // An open position must still be managed, however small the balance.
        assert!(!should_skip_preflight(5.0, 10.0, 1));
        // Balance at or above the threshold trades normally.
        assert!(!should_skip_preflight(10.0, 10.0, 0));
        assert!(!should_skip_preflight(500.0, 10.0, 0));
    }
}
