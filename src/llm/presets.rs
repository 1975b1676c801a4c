// =============================================================================
// Prompt presets — named risk postures for the system prompt
// =============================================================================
//
// Each preset is a complete strategy block: how to read the market, how to
// size, what risk discipline to keep, and how to exit. Exactly one preset is
// active at a time, selected by the `prompt_preset` setting.
// =============================================================================

/// A named trading posture injected into the system prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptPreset {
    pub name: &'static str,
    pub description: &'static str,
    pub strategy_section: &'static str,
    pub sizing_rules: &'static str,
    pub risk_rules: &'static str,
    pub exit_rules: &'static str,
}

const AGGRESSIVE_SMALL_ACCOUNT: PromptPreset = PromptPreset {
    name: "aggressive_small_account",
    description: "Momentum-chasing posture for small accounts: concentrated \
                  positions, higher leverage, fast exits.",
    strategy_section: "\
## Strategy: Aggressive Momentum (Small Account)
You are growing a small account. Favour strong directional moves:
- Enter when EMA20 > EMA50 with rising MACD histogram (longs), or the mirror
  for shorts.
- RSI7 extremes are continuation signals in a trend, not automatic fades.
- Skip chop: if MACD histogram is flat and RSI14 is pinned near 50, hold.
- One clean setup beats three marginal ones. It is fine to hold for many
  cycles in a row.",
    sizing_rules: "\
## Position Sizing
- Commit 20-50% of available cash per position when conviction is high
  (confidence >= 0.7), 10-20% otherwise.
- Leverage 3-5x on clean setups, 2x when volatility (ATR14) is elevated.
- Never leave less than the minimum position size in reserve.",
    risk_rules: "\
## Risk Discipline
- Every entry carries a stop loss. No exceptions.
- Keep the stop within a distance where stop% x leverage <= 35% of margin.
- After two consecutive losses on one coin, stop trading that coin today.",
    exit_rules: "\
## Exits
- Take profit at the target; do not move targets further away mid-trade.
- Close immediately when the invalidation condition triggers, even at a loss.
- Cut any position whose thesis has not moved in your favour after several
  cycles; dead margin is a cost.",
};

const STANDARD: PromptPreset = PromptPreset {
    name: "standard",
    description: "Balanced trend-following posture with moderate sizing and \
                  leverage.",
    strategy_section: "\
## Strategy: Balanced Trend Following
Trade with the prevailing trend, confirmed across indicators:
- Long bias when price > EMA20 > EMA50; short bias on the mirror image.
- Require MACD and RSI14 to agree with the trade direction.
- Hold through noise; act on structure breaks, not single candles.",
    sizing_rules: "\
## Position Sizing
- Commit 10-25% of available cash per position.
- Leverage 2-3x; drop to 1-2x when ATR14 is elevated relative to price.
- Diversify across coins when capacity allows rather than pyramiding one.",
    risk_rules: "\
## Risk Discipline
- Every entry carries a stop loss and a profit target.
- Stop% x leverage should stay under 25% of committed margin.
- Do not average down. A losing position is closed, not reinforced.",
    exit_rules: "\
## Exits
- Respect the exit plan set at entry. Re-evaluate only on new information.
- Close when the invalidation condition triggers.
- Prefer closing into strength rather than waiting for the exact target.",
};

const CONSERVATIVE: PromptPreset = PromptPreset {
    name: "conservative",
    description: "Capital-preservation posture: small size, low leverage, \
                  high conviction threshold.",
    strategy_section: "\
## Strategy: Capital Preservation
Only take trades where multiple timeframe signals align:
- Require EMA20/EMA50 alignment AND a MACD cross in the trade direction.
- Avoid entries when RSI14 is already past 65 (longs) or under 35 (shorts).
- When in doubt, hold. Missing a move costs nothing; a drawdown does.",
    sizing_rules: "\
## Position Sizing
- Commit at most 10% of available cash per position.
- Leverage 1-2x only.
- At most one new position per cycle.",
    risk_rules: "\
## Risk Discipline
- Tight stops: stop% x leverage must stay under 15% of committed margin.
- Confidence below 0.6 means hold, regardless of how good the setup looks.
- Stop trading for the day after a single daily-loss-limit warning.",
    exit_rules: "\
## Exits
- Take profits early; scale expectations to the ATR, not to hope.
- Close on the first trigger of the invalidation condition.
- Never hold a position through an obvious structure break against you.",
};

static PRESETS: [PromptPreset; 3] = [AGGRESSIVE_SMALL_ACCOUNT, STANDARD, CONSERVATIVE];

/// Look up a preset by its setting name.
pub fn get_preset(name: &str) -> Option<&'static PromptPreset> {
    PRESETS.iter().find(|p| p.name == name)
}

/// All presets, in display order.
pub fn all_presets() -> &'static [PromptPreset] {
    &PRESETS
}
