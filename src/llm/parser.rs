// =============================================================================
// Decision parser — turn raw model output into a validated trade decision
// =============================================================================
//
// Extraction is tolerant (models wrap JSON in prose and code fences);
// validation is strict. The decision constructor enforces every invariant so
// an invalid decision value cannot exist downstream.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ParseError;
use crate::types::Signal;

/// Hard ceiling on position size, independent of configured limits.
const QUANTITY_HARD_CAP_USD: f64 = 1_000_000.0;
/// Global leverage ceiling enforced at parse time.
const LEVERAGE_HARD_CAP: f64 = 20.0;
/// Minimum justification length; anything shorter is noise.
const MIN_JUSTIFICATION_CHARS: usize = 10;

// ---------------------------------------------------------------------------
// Decision model
// ---------------------------------------------------------------------------

/// Exit intentions attached to a decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitPlan {
    #[serde(default)]
    pub profit_target: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub invalidation_condition: Option<String>,
}

/// A validated trade decision. Construct via [`parse_decision`] or
/// [`TradeDecision::from_value`]; the fields are public for read access and
/// for the hold back-fill performed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeDecision {
    pub coin: String,
    pub signal: Signal,
    pub quantity_usd: f64,
    pub leverage: f64,
    pub confidence: f64,
    pub exit_plan: ExitPlan,
    pub justification: String,
}

/// Wire shape before validation.
#[derive(Debug, Deserialize)]
struct RawDecision {
    coin: String,
    signal: String,
    quantity_usd: f64,
    leverage: f64,
    confidence: f64,
    exit_plan: ExitPlan,
    justification: String,
}

impl TradeDecision {
    /// Validate a parsed JSON object into a decision.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ParseError> {
        let raw: RawDecision = serde_json::from_value(value)
            .map_err(|e| ParseError::Schema(e.to_string()))?;

        let signal = Signal::parse(&raw.signal)
            .ok_or_else(|| ParseError::UnknownSignal(raw.signal.clone()))?;

        let coin = raw.coin.trim().to_uppercase();
        if coin.len() < 3 {
            return Err(ParseError::Invariant(format!("invalid coin symbol '{coin}'")));
        }

        if raw.quantity_usd < 0.0 {
            return Err(ParseError::Invariant("quantity_usd cannot be negative".into()));
        }
        if raw.quantity_usd > QUANTITY_HARD_CAP_USD {
            return Err(ParseError::Invariant(format!(
                "quantity_usd {:.0} exceeds the hard cap of {:.0}",
                raw.quantity_usd, QUANTITY_HARD_CAP_USD
            )));
        }

        if raw.leverage < 0.0 || raw.leverage > LEVERAGE_HARD_CAP {
            return Err(ParseError::Invariant(format!(
                "leverage {} outside [0, {LEVERAGE_HARD_CAP}]",
                raw.leverage
            )));
        }
        if signal.is_entry() {
            if raw.leverage <= 0.0 {
                return Err(ParseError::Invariant(
                    "leverage must be > 0 for entry signals".into(),
                ));
            }
            if raw.quantity_usd <= 0.0 {
                return Err(ParseError::Invariant(
                    "quantity_usd must be > 0 for entry signals".into(),
                ));
            }
        }

        if !(0.0..=1.0).contains(&raw.confidence) {
            return Err(ParseError::Invariant(format!(
                "confidence {} outside [0, 1]",
                raw.confidence
            )));
        }

        for (label, price) in [
            ("profit_target", raw.exit_plan.profit_target),
            ("stop_loss", raw.exit_plan.stop_loss),
        ] {
            if let Some(p) = price {
                if p < 0.0 {
                    return Err(ParseError::Invariant(format!("{label} cannot be negative")));
                }
            }
        }

        // Side-dependent ordering of stop vs target, when both are set.
        if let (Some(stop), Some(target)) =
            (raw.exit_plan.stop_loss, raw.exit_plan.profit_target)
        {
            if stop > 0.0 && target > 0.0 {
                match signal {
                    Signal::BuyToEnter if stop >= target => {
                        return Err(ParseError::Invariant(
                            "stop_loss must be below profit_target for a long entry".into(),
                        ));
                    }
                    Signal::SellToEnter if stop <= target => {
                        return Err(ParseError::Invariant(
                            "stop_loss must be above profit_target for a short entry".into(),
                        ));
                    }
                    _ => {}
                }
            }
        }

        let justification = raw.justification.trim().to_string();
        if justification.chars().count() < MIN_JUSTIFICATION_CHARS {
            return Err(ParseError::Invariant(format!(
                "justification must be at least {MIN_JUSTIFICATION_CHARS} characters"
            )));
        }

        Ok(Self {
            coin,
            signal,
            quantity_usd: raw.quantity_usd,
            leverage: raw.leverage,
            confidence: raw.confidence,
            exit_plan: raw.exit_plan,
            justification,
        })
    }
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

/// Pull a JSON object out of model output.
///
/// Tries, in order: a direct parse of the whole text; the contents of a
/// ```json fenced block; the outermost `{ … }` run. Extraction is idempotent
/// for well-formed inputs: re-extracting the serialized result yields the
/// same value.
pub fn extract_json(text: &str) -> Result<serde_json::Value, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::NoJson);
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if value.is_object() {
            return Ok(value);
        }
    }

    // Fenced code block: ```json { … } ```
    if let Some(fence_start) = trimmed.find("```json") {
        let after = &trimmed[fence_start + "```json".len()..];
        if let Some(fence_end) = after.find("```") {
            let inner = after[..fence_end].trim();
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(inner) {
                if value.is_object() {
                    return Ok(value);
                }
            }
        }
    }

    // Outermost brace run.
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&trimmed[start..=end]) {
                if value.is_object() {
                    return Ok(value);
                }
            }
        }
    }

    Err(ParseError::NoJson)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Parse and validate raw LLM output into a decision. When `leverage_limits`
/// carries a cap for the decision's coin, an entry exceeding it is rejected
/// outright rather than clamped.
pub fn parse_decision(
    text: &str,
    leverage_limits: Option<&HashMap<String, f64>>,
) -> Result<TradeDecision, ParseError> {
    let value = extract_json(text)?;
    let decision = TradeDecision::from_value(value)?;

    if decision.signal.is_entry() {
        if let Some(cap) = leverage_limits.and_then(|limits| limits.get(&decision.coin)) {
            if decision.leverage > *cap {
                return Err(ParseError::LeverageExceedsCap {
                    coin: decision.coin,
                    requested: decision.leverage,
                    cap: *cap,
                });
            }
        }
    }

    debug!(
        coin = %decision.coin,
        signal = %decision.signal,
        quantity_usd = decision.quantity_usd,
        leverage = decision.leverage,
        confidence = decision.confidence,
        "decision parsed"
    );
    Ok(decision)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "coin": "BTC/USDC:USDC",
        "signal": "buy_to_enter",
        "quantity_usd": 50.0,
        "leverage": 2.0,
        "confidence": 0.8,
        "exit_plan": {
            "profit_target": 105000,
            "stop_loss": 99000,
            "invalidation_condition": "RSI<30"
        },
        "justification": "trend up with momentum confirmation"
    }"#;

    #[test]
    fn parses_plain_json() {
        let decision = parse_decision(VALID, None).unwrap();
        assert_eq!(decision.coin, "BTC/USDC:USDC");
        assert_eq!(decision.signal, Signal::BuyToEnter);
        assert!((decision.quantity_usd - 50.0).abs() < 1e-9);
        assert_eq!(decision.exit_plan.profit_target, Some(105_000.0));
    }

    #[test]
    fn parses_json_in_fenced_prose() {
        let wrapped = format!("Here you go:\n```json\n{VALID}\n```\nLet me know.");
        let decision = parse_decision(&wrapped, None).unwrap();
        assert_eq!(decision.signal, Signal::BuyToEnter);
        assert!((decision.leverage - 2.0).abs() < 1e-9);
    }

    #[test]
    fn parses_bare_brace_run_in_prose() {
        let wrapped = format!("My decision is {VALID} based on the charts.");
        assert!(parse_decision(&wrapped, None).is_ok());
    }

    #[test]
    fn extraction_is_idempotent() {
        let wrapped = format!("noise before\n```json\n{VALID}\n```\nnoise after");
        let once = extract_json(&wrapped).unwrap();
        let twice = extract_json(&serde_json::to_string(&once).unwrap()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_non_json() {
        assert_eq!(parse_decision("not json at all", None), Err(ParseError::NoJson));
        assert_eq!(parse_decision("", None), Err(ParseError::NoJson));
    }

    #[test]
    fn rejects_missing_fields() {
        let incomplete = r#"{"coin": "SOL/USDC:USDC", "signal": "buy_to_enter"}"#;
        assert!(matches!(
            parse_decision(incomplete, None),
            Err(ParseError::Schema(_))
        ));
    }

    #[test]
    fn rejects_unknown_signal() {
        let bad = VALID.replace("buy_to_enter", "yolo_long");
        assert!(matches!(
            parse_decision(&bad, None),
            Err(ParseError::UnknownSignal(_))
        ));
    }

    #[test]
    fn normalizes_coin_to_uppercase() {
        let lower = VALID.replace("BTC/USDC:USDC", "btc/usdc:usdc");
        let decision = parse_decision(&lower, None).unwrap();
        assert_eq!(decision.coin, "BTC/USDC:USDC");
    }

    #[test]
    fn entry_requires_positive_leverage_and_quantity() {
        let zero_leverage = VALID.replace("\"leverage\": 2.0", "\"leverage\": 0");
        assert!(matches!(
            parse_decision(&zero_leverage, None),
            Err(ParseError::Invariant(_))
        ));

        let zero_quantity = VALID.replace("\"quantity_usd\": 50.0", "\"quantity_usd\": 0");
        assert!(matches!(
            parse_decision(&zero_quantity, None),
            Err(ParseError::Invariant(_))
        ));
    }

    #[test]
    fn hold_allows_zero_quantity_and_leverage() {
        let hold = r#"{
            "coin": "ETH/USDC:USDC",
            "signal": "hold",
            "quantity_usd": 0,
            "leverage": 0,
            "confidence": 0.5,
            "exit_plan": {"profit_target": null, "stop_loss": null, "invalidation_condition": null},
            "justification": "mixed signals, waiting for clarity"
        }"#;
        let decision = parse_decision(hold, None).unwrap();
        assert_eq!(decision.signal, Signal::Hold);
        assert_eq!(decision.quantity_usd, 0.0);
    }

    #[test]
    fn rejects_confidence_out_of_range() {
        let high = VALID.replace("\"confidence\": 0.8", "\"confidence\": 1.5");
        assert!(matches!(parse_decision(&high, None), Err(ParseError::Invariant(_))));
    }

    #[test]
    fn rejects_quantity_above_hard_cap() {
        let huge = VALID.replace("\"quantity_usd\": 50.0", "\"quantity_usd\": 2000000");
        assert!(matches!(parse_decision(&huge, None), Err(ParseError::Invariant(_))));
    }

    #[test]
    fn rejects_leverage_above_global_cap() {
        let high = VALID.replace("\"leverage\": 2.0", "\"leverage\": 25");
        assert!(matches!(parse_decision(&high, None), Err(ParseError::Invariant(_))));
    }

    #[test]
    fn long_requires_stop_below_target() {
        let inverted = VALID
            .replace("\"profit_target\": 105000", "\"profit_target\": 95000")
            .replace("\"stop_loss\": 99000", "\"stop_loss\": 98000");
        assert!(matches!(
            parse_decision(&inverted, None),
            Err(ParseError::Invariant(_))
        ));
    }

    #[test]
    fn short_requires_stop_above_target() {
        let valid_short = VALID
            .replace("buy_to_enter", "sell_to_enter")
            .replace("\"profit_target\": 105000", "\"profit_target\": 95000")
            .replace("\"stop_loss\": 99000", "\"stop_loss\": 101000");
        assert!(parse_decision(&valid_short, None).is_ok());

        let inverted_short = VALID.replace("buy_to_enter", "sell_to_enter");
        assert!(matches!(
            parse_decision(&inverted_short, None),
            Err(ParseError::Invariant(_))
        ));
    }

    #[test]
    fn short_justification_rejected() {
        let terse = VALID.replace("trend up with momentum confirmation", "up");
        assert!(matches!(parse_decision(&terse, None), Err(ParseError::Invariant(_))));
    }

    #[test]
    fn per_coin_leverage_cap_rejects() {
        let mut limits = HashMap::new();
        limits.insert("BTC/USDC:USDC".to_string(), 1.5);
        let err = parse_decision(VALID, Some(&limits));
        assert!(matches!(err, Err(ParseError::LeverageExceedsCap { .. })));

        // A looser cap passes.
        limits.insert("BTC/USDC:USDC".to_string(), 3.0);
        assert!(parse_decision(VALID, Some(&limits)).is_ok());
    }

    #[test]
    fn leverage_cap_ignored_for_hold_and_close() {
        let close = r#"{
            "coin": "BTC/USDC:USDC",
            "signal": "close",
            "quantity_usd": 0,
            "leverage": 0,
            "confidence": 0.9,
            "exit_plan": {"profit_target": null, "stop_loss": null, "invalidation_condition": null},
            "justification": "target reached, taking profits"
        }"#;
        let mut limits = HashMap::new();
        limits.insert("BTC/USDC:USDC".to_string(), 0.5);
        assert!(parse_decision(close, Some(&limits)).is_ok());
    }
}
