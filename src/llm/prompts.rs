// =============================================================================
// Prompt builder — system and user prompts for the trading decision
// =============================================================================
//
// The system prompt is assembled from the active preset plus the session's
// operational constraints. The user prompt is a pure rendering of snapshot
// data: market series (always oldest → newest), account state, trade history,
// recent decisions, and any active operator guidance. No side effects.
// =============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::llm::presets::{get_preset, PromptPreset};
use crate::market_data::{MarketSnapshot, SERIES_TAIL_ROWS};
use crate::store::{DecisionRecord, PositionRecord};
use crate::types::Side;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Session-level constraints echoed into the system prompt.
#[derive(Debug, Clone)]
pub struct TradingConfig {
    pub exchange_name: String,
    pub asset_class: String,
    pub min_position_size_usd: f64,
    pub max_leverage: f64,
    pub preset_name: String,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            exchange_name: "Hyperliquid".to_string(),
            asset_class: "Perpetual Futures".to_string(),
            min_position_size_usd: 10.0,
            max_leverage: 20.0,
            preset_name: "aggressive_small_account".to_string(),
        }
    }
}

/// One open position as shown to the model, with its recorded exit plan.
#[derive(Debug, Clone)]
pub struct PositionView {
    pub coin: String,
    pub side: Side,
    pub entry_price: f64,
    pub current_price: f64,
    pub quantity_usd: f64,
    pub leverage: f64,
    pub unrealized_pnl: f64,
    pub entry_time: Option<DateTime<Utc>>,
    pub profit_target: Option<f64>,
    pub stop_loss: Option<f64>,
}

/// Account snapshot plus history context for the prompt.
#[derive(Debug, Clone, Default)]
pub struct AccountContext {
    pub available_cash: f64,
    pub total_value: f64,
    pub total_return_pct: f64,
    pub sharpe_ratio: Option<f64>,
    pub positions: Vec<PositionView>,
    pub max_positions: u32,
    /// Recent closed positions, newest first (capped at ~10 by the caller).
    pub trade_history: Vec<PositionRecord>,
    /// Recent decisions, newest first (capped at ~5 by the caller).
    pub recent_decisions: Vec<DecisionRecord>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct PromptBuilder {
    config: TradingConfig,
}

impl PromptBuilder {
    pub fn new(config: TradingConfig) -> Self {
        Self { config }
    }

    fn preset(&self) -> &'static PromptPreset {
        get_preset(&self.config.preset_name)
            .or_else(|| get_preset("standard"))
            .expect("the standard preset always exists")
    }

    // -------------------------------------------------------------------------
    // System prompt
    // -------------------------------------------------------------------------

    pub fn build_system_prompt(&self) -> String {
        let preset = self.preset();
        let cfg = &self.config;

        format!(
            "You are an autonomous cryptocurrency trading agent operating on the {exchange} exchange.

Your goal is to maximize profit and loss (PnL) while managing risk appropriately. You have been given real capital to trade.

## Operational Constraints (CRITICAL)
- **Minimum Position Size:** ${min_size:.2} USD (Trades below this will fail).
- **Maximum Leverage:** {max_lev}x (Do not exceed this leverage unless told otherwise in strategy).
- **Asset Class:** {asset_class}.

## Your Capabilities
- Analyze technical indicators provided in the context.
- Open long or short positions.
- Manage multiple positions across different assets.

## Trading Rules
1. STRICTLY adhere to the minimum position size of ${min_size}.
2. Set clear exit plans for every position (profit target, stop loss, invalidation).
3. Be explicit about confidence levels (0.0 to 1.0).
4. Provide clear justification for every decision.

{strategy}

{sizing}

{risk}

{exits}

## Learning from Trade History

You will receive your RECENT TRADE HISTORY and RECENT DECISIONS in each prompt. Use this data:

1. Identify patterns in losses: what setups consistently lose money?
2. Replicate winning trades: what conditions led to profitable exits?
3. Avoid repeating mistakes: if a setup stopped you out twice, stop trading it.
4. Track your performance: if you are down money, the current approach is not working — change it.

## Output Format
Return valid JSON with these exact fields:
{{
    \"coin\": \"BTC/USDC:USDC\",
    \"signal\": \"buy_to_enter|sell_to_enter|hold|close\",
    \"quantity_usd\": 50.0,
    \"leverage\": 2.0,
    \"confidence\": 0.75,
    \"exit_plan\": {{
        \"profit_target\": 0.0,
        \"stop_loss\": 0.0,
        \"invalidation_condition\": \"Reason text\"
    }},
    \"justification\": \"Clear technical analysis reasoning\"
}}

CRITICAL: Use the EXACT symbol format from the market data section (e.g., \"BTC/USDC:USDC\", \"ETH/USDC:USDC\"). Do NOT shorten to \"BTC\", \"ETH\" etc.

IMPORTANT: Data provided below is ordered OLDEST → NEWEST.",
            exchange = cfg.exchange_name,
            min_size = cfg.min_position_size_usd,
            max_lev = cfg.max_leverage,
            asset_class = cfg.asset_class,
            strategy = preset.strategy_section,
            sizing = preset.sizing_rules,
            risk = preset.risk_rules,
            exits = preset.exit_rules,
        )
    }

    // -------------------------------------------------------------------------
    // User prompt
    // -------------------------------------------------------------------------

    pub fn build_user_prompt(
        &self,
        market_data: &BTreeMap<String, MarketSnapshot>,
        account: &AccountContext,
        minutes_since_start: i64,
        guidance: Option<&str>,
        leverage_limits: &BTreeMap<String, f64>,
    ) -> String {
        let mut lines: Vec<String> = Vec::new();

        lines.push(format!("Trading Session Duration: {minutes_since_start} minutes."));
        lines.push("Analyze the provided state data and predictive signals.".to_string());
        lines.push(format!(
            "REMINDER: Minimum order size is ${}.",
            self.config.min_position_size_usd
        ));

        if !leverage_limits.is_empty() {
            lines.push(String::new());
            lines.push("LEVERAGE LIMITS PER ASSET:".to_string());
            for (symbol, max_lev) in leverage_limits {
                lines.push(format!("  - {symbol}: MAX {max_lev}x leverage"));
            }
        }
        lines.push(String::new());

        if let Some(guidance) = guidance {
            lines.push("!!! SUPERVISOR GUIDANCE (HIGH PRIORITY) !!!".to_string());
            lines.push(
                "The human supervisor has provided the following context/instruction:".to_string(),
            );
            lines.push(format!("> \"{guidance}\""));
            lines.push(
                "You MUST consider this input in your analysis and decision making.".to_string(),
            );
            lines.push(
                "If this guidance contradicts standard rules, prioritize this guidance (within safety limits)."
                    .to_string(),
            );
            lines.push(String::new());
        }

        self.push_capacity_section(&mut lines, account);

        lines.push("---".to_string());
        lines.push(String::new());
        lines.push("### CURRENT MARKET DATA".to_string());
        lines.push(String::new());

        for snapshot in market_data.values() {
            self.push_market_section(&mut lines, snapshot);
        }

        self.push_account_section(&mut lines, account);

        lines.push("---".to_string());
        lines.push(String::new());
        lines.push(
            "Based on this data, make your trading decision. Ensure all constraints are met. Return valid JSON only."
                .to_string(),
        );

        lines.join("\n")
    }

    fn push_capacity_section(&self, lines: &mut Vec<String>, account: &AccountContext) {
        if account.positions.is_empty() {
            return;
        }
        let held = account.positions.len();
        let cap = account.max_positions.max(1) as usize;

        lines.push("!!! POSITION MANAGEMENT FOCUS !!!".to_string());
        lines.push(format!(
            "You currently have {held} of {cap} OPEN position(s):"
        ));
        for p in &account.positions {
            lines.push(format!(
                "  - {}: {} @ ${:.2}, Size: ${:.2}, Leverage: {}x",
                p.coin,
                p.side.as_str().to_uppercase(),
                p.entry_price,
                p.quantity_usd,
                p.leverage
            ));
        }
        lines.push(String::new());

        if held >= cap {
            lines.push(format!("POSITION LIMIT REACHED ({held}/{cap})"));
            lines.push("You CANNOT open new positions until you close an existing one.".to_string());
            lines.push("Your options:".to_string());
            lines.push("  1. HOLD one of your existing positions".to_string());
            lines.push("  2. CLOSE a position to free up a slot".to_string());
            lines.push(String::new());
            lines.push(
                "Do NOT choose buy_to_enter or sell_to_enter - you're at max capacity!".to_string(),
            );
        } else {
            lines.push(format!("POSITION CAPACITY: {held}/{cap} slots used"));
            lines.push("Your options:".to_string());
            lines.push("  1. HOLD or CLOSE existing positions".to_string());
            lines.push(format!(
                "  2. Open NEW positions in different coins (you have {} slot(s) available)",
                cap - held
            ));
            lines.push(String::new());
            lines.push(
                "Multiple positions across different coins is ALLOWED and ENCOURAGED for diversification."
                    .to_string(),
            );
            lines.push(
                "Don't close winning positions prematurely just to open a new one!".to_string(),
            );
        }
        lines.push(String::new());
    }

    fn push_market_section(&self, lines: &mut Vec<String>, snapshot: &MarketSnapshot) {
        lines.push(format!("### {} DATA", snapshot.coin));
        lines.push(String::new());

        let latest = snapshot.series.latest();
        let mut header = vec![format!("current_price = {:.2}", snapshot.current_price)];
        if let Some(v) = latest.ema_20 {
            header.push(format!("current_ema_20 = {v:.4}"));
        }
        if let Some(v) = latest.macd {
            header.push(format!("current_macd = {v:.4}"));
        }
        if let Some(v) = latest.rsi_7 {
            header.push(format!("current_rsi_7 = {v:.4}"));
        }
        lines.push(header.join(", "));
        if let Some(age) = snapshot.candle_age_secs {
            lines.push(format!("Latest candle: {age}s old"));
        }
        lines.push(String::new());

        if snapshot.funding_rate.is_some() || snapshot.open_interest.is_some() {
            lines.push("Open Interest & Funding Rate:".to_string());
            if let Some(oi) = snapshot.open_interest {
                lines.push(format!("Open Interest: Latest: {oi:.2}"));
            }
            if let Some(rate) = snapshot.funding_rate {
                lines.push(format!("Funding Rate: {rate:.8}"));
            }
            lines.push(String::new());
        }

        lines.push("**Intraday series (oldest → latest):**".to_string());
        lines.push(String::new());

        let series = &snapshot.series;
        lines.push(format!("Close prices: {}", fmt_series(&series.closes, 2)));
        lines.push(String::new());

        for (name, values) in [
            ("EMA20", &series.ema_20),
            ("EMA50", &series.ema_50),
            ("RSI7", &series.rsi_7),
            ("RSI14", &series.rsi_14),
            ("MACD", &series.macd),
            ("MACD_SIGNAL", &series.macd_signal),
            ("MACD_HIST", &series.macd_hist),
            ("ATR3", &series.atr_3),
            ("ATR14", &series.atr_14),
            ("VOLUME", &series.volume),
            ("VOLUME_SMA20", &series.volume_sma_20),
        ] {
            if !values.is_empty() {
                lines.push(format!("{name}: {}", fmt_series(values, 3)));
                lines.push(String::new());
            }
        }

        lines.push("---".to_string());
        lines.push(String::new());
    }

    fn push_account_section(&self, lines: &mut Vec<String>, account: &AccountContext) {
        lines.push("### ACCOUNT INFORMATION & PERFORMANCE".to_string());
        lines.push(String::new());
        lines.push(format!("Current Total Return: {:.2}%", account.total_return_pct));
        lines.push(format!("Available Cash: ${:.2}", account.available_cash));
        lines.push(format!("Total Account Value: ${:.2}", account.total_value));
        lines.push(String::new());

        if account.positions.is_empty() {
            lines.push("No active positions.".to_string());
            lines.push(String::new());
        } else {
            lines.push("CURRENT LIVE POSITIONS:".to_string());
            lines.push(String::new());
            for p in &account.positions {
                lines.push(format!(
                    "Position: {} ({})",
                    p.coin,
                    p.side.as_str().to_uppercase()
                ));
                lines.push(format!(
                    "  Entry: ${:.2} | Current: ${:.2}",
                    p.entry_price, p.current_price
                ));
                lines.push(format!(
                    "  Size: ${:.2} (Lev: {}x)",
                    p.quantity_usd, p.leverage
                ));
                lines.push(format!("  Unrealized P&L: ${:+.2}", p.unrealized_pnl));
                if let Some(entry_time) = p.entry_time {
                    lines.push(format!("  Time Open: {}", duration_label(entry_time)));
                }
                if p.profit_target.is_some() || p.stop_loss.is_some() {
                    lines.push("  Exit Plan:".to_string());
                    if let Some(target) = p.profit_target {
                        lines.push(format!("    - Target: ${target:.2}"));
                    }
                    if let Some(stop) = p.stop_loss {
                        lines.push(format!("    - Stop: ${stop:.2}"));
                    }
                }
                lines.push(String::new());
            }
        }

        match account.sharpe_ratio {
            Some(sharpe) => lines.push(format!("Risk Metric (Sharpe): {sharpe:.3}")),
            None => lines.push("Risk Metric (Sharpe): insufficient data".to_string()),
        }
        lines.push(String::new());

        if !account.trade_history.is_empty() {
            lines.push("RECENT TRADE HISTORY (Last 10 Closed Positions):".to_string());
            lines.push(String::new());
            for trade in &account.trade_history {
                if let Some(pnl) = trade.realized_pnl {
                    let exit = trade
                        .exit_price
                        .map(|p| format!("${p:.2}"))
                        .unwrap_or_else(|| "N/A".to_string());
                    lines.push(format!(
                        "  {} ({}) - Entry: ${:.2} → Exit: {} | P&L: ${:+.2}",
                        trade.coin, trade.side, trade.entry_price, exit, pnl
                    ));
                }
            }
            lines.push(String::new());
        }

        if !account.recent_decisions.is_empty() {
            lines.push("YOUR RECENT DECISIONS (Last 5):".to_string());
            lines.push(String::new());
            for decision in &account.recent_decisions {
                let justification: String =
                    decision.justification.chars().take(80).collect();
                lines.push(format!(
                    "  {} - {} (confidence: {:.0}%)",
                    decision.coin,
                    decision.signal.to_uppercase(),
                    decision.confidence * 100.0
                ));
                lines.push(format!("    Reason: {justification}"));
            }
            lines.push(String::new());
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Render the tail of a series as a bracketed list, oldest → newest.
fn fmt_series(values: &[f64], decimals: usize) -> String {
    let tail_start = values.len().saturating_sub(SERIES_TAIL_ROWS);
    let rendered: Vec<String> = values[tail_start..]
        .iter()
        .map(|v| format!("{v:.decimals$}"))
        .collect();
    format!("[{}]", rendered.join(", "))
}

/// "3h 12m" / "45m" style age label.
fn duration_label(entry_time: DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(entry_time);
    let total_minutes = elapsed.num_minutes().max(0);
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{Candle, IndicatorSeries};

    fn snapshot(coin: &str, price: f64) -> MarketSnapshot {
        let candles: Vec<Candle> = (0..80)
            .map(|i| {
                let base = price + i as f64;
                Candle {
                    open_time: i as i64 * 180_000,
                    open: base,
                    high: base + 2.0,
                    low: base - 2.0,
                    close: base + 0.5,
                    volume: 100.0,
                }
            })
            .collect();
        MarketSnapshot {
            coin: coin.to_string(),
            current_price: price,
            candle_age_secs: Some(30),
            funding_rate: Some(0.0001),
            open_interest: None,
            series: IndicatorSeries::compute(&candles),
        }
    }

    fn builder() -> PromptBuilder {
        PromptBuilder::new(TradingConfig {
            min_position_size_usd: 10.0,
            max_leverage: 5.0,
            preset_name: "standard".to_string(),
            ..TradingConfig::default()
        })
    }

    fn one_coin_market() -> BTreeMap<String, MarketSnapshot> {
        let mut market = BTreeMap::new();
        market.insert(
            "BTC/USDC:USDC".to_string(),
            snapshot("BTC/USDC:USDC", 100_000.0),
        );
        market
    }

    #[test]
    fn system_prompt_reflects_config_and_preset() {
        let prompt = builder().build_system_prompt();
        assert!(prompt.contains("Minimum Position Size:** $10.00"));
        assert!(prompt.contains("Maximum Leverage:** 5x"));
        assert!(prompt.contains("Balanced Trend Following"));
        assert!(prompt.contains("OLDEST → NEWEST"));
        assert!(prompt.contains("\"signal\": \"buy_to_enter|sell_to_enter|hold|close\""));
    }

    #[test]
    fn unknown_preset_falls_back_to_standard() {
        let prompt = PromptBuilder::new(TradingConfig {
            preset_name: "no_such_preset".to_string(),
            ..TradingConfig::default()
        })
        .build_system_prompt();
        assert!(prompt.contains("Balanced Trend Following"));
    }

    #[test]
    fn user_prompt_includes_market_and_account_sections() {
        let prompt = builder().build_user_prompt(
            &one_coin_market(),
            &AccountContext {
                available_cash: 1000.0,
                total_value: 1000.0,
                max_positions: 3,
                ..AccountContext::default()
            },
            42,
            None,
            &BTreeMap::new(),
        );

        assert!(prompt.contains("Trading Session Duration: 42 minutes."));
        assert!(prompt.contains("### BTC/USDC:USDC DATA"));
        assert!(prompt.contains("Intraday series (oldest → latest)"));
        assert!(prompt.contains("EMA20:"));
        assert!(prompt.contains("RSI14:"));
        assert!(prompt.contains("Available Cash: $1000.00"));
        assert!(prompt.contains("No active positions."));
    }

    #[test]
    fn guidance_is_inlined_verbatim_and_marked() {
        let prompt = builder().build_user_prompt(
            &one_coin_market(),
            &AccountContext::default(),
            5,
            Some("focus on ETH"),
            &BTreeMap::new(),
        );
        assert!(prompt.contains("SUPERVISOR GUIDANCE (HIGH PRIORITY)"));
        assert!(prompt.contains("> \"focus on ETH\""));
    }

    #[test]
    fn leverage_limits_render_per_coin() {
        let mut limits = BTreeMap::new();
        limits.insert("BTC/USDC:USDC".to_string(), 20.0);
        limits.insert("ETH/USDC:USDC".to_string(), 15.0);

        let prompt = builder().build_user_prompt(
            &one_coin_market(),
            &AccountContext::default(),
            5,
            None,
            &limits,
        );
        assert!(prompt.contains("LEVERAGE LIMITS PER ASSET:"));
        assert!(prompt.contains("  - BTC/USDC:USDC: MAX 20x leverage"));
        assert!(prompt.contains("  - ETH/USDC:USDC: MAX 15x leverage"));
    }

    fn open_position(coin: &str) -> PositionView {
        PositionView {
            coin: coin.to_string(),
            side: Side::Long,
            entry_price: 100_000.0,
            current_price: 101_000.0,
            quantity_usd: 50.0,
            leverage: 2.0,
            unrealized_pnl: 1.0,
            entry_time: Some(Utc::now()),
            profit_target: Some(105_000.0),
            stop_loss: Some(99_000.0),
        }
    }

    #[test]
    fn at_capacity_disallows_entries() {
        let account = AccountContext {
            positions: vec![
                open_position("BTC/USDC:USDC"),
                open_position("ETH/USDC:USDC"),
            ],
            max_positions: 2,
            ..AccountContext::default()
        };
        let prompt =
            builder().build_user_prompt(&one_coin_market(), &account, 5, None, &BTreeMap::new());
        assert!(prompt.contains("POSITION LIMIT REACHED (2/2)"));
        assert!(prompt.contains("Do NOT choose buy_to_enter or sell_to_enter"));
    }

    #[test]
    fn below_capacity_permits_diversification() {
        let account = AccountContext {
            positions: vec![open_position("BTC/USDC:USDC")],
            max_positions: 3,
            ..AccountContext::default()
        };
        let prompt =
            builder().build_user_prompt(&one_coin_market(), &account, 5, None, &BTreeMap::new());
        assert!(prompt.contains("POSITION CAPACITY: 1/3 slots used"));
        assert!(prompt.contains("ENCOURAGED for diversification"));
        // Exit plan recorded at entry shows up on the position.
        assert!(prompt.contains("    - Target: $105000.00"));
        assert!(prompt.contains("    - Stop: $99000.00"));
    }

    #[test]
    fn series_tail_is_bounded() {
        let values: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let rendered = fmt_series(&values, 2);
        let count = rendered.matches(',').count() + 1;
        assert_eq!(count, SERIES_TAIL_ROWS);
        // Oldest → newest: the last value is the series' newest.
        assert!(rendered.ends_with("99.00]"));
    }

    #[test]
    fn duration_label_formats() {
        let recent = Utc::now() - chrono::Duration::minutes(45);
        assert_eq!(duration_label(recent), "45m");
        let old = Utc::now() - chrono::Duration::minutes(135);
        assert_eq!(duration_label(old), "2h 15m");
    }
}
