// =============================================================================
// Shared types used across the Helios trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Whether we are running against the simulated paper ledger or real funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Paper,
    Live,
}

impl Default for TradeMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for TradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "paper"),
            Self::Live => write!(f, "live"),
        }
    }
}

impl std::str::FromStr for TradeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "paper" => Ok(Self::Paper),
            "live" => Ok(Self::Live),
            other => Err(format!("invalid trade mode: '{other}' (use 'paper' or 'live')")),
        }
    }
}

/// Desired run state of the cycle engine, as written to the control token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlState {
    Running,
    Paused,
    Stopped,
}

impl ControlState {
    /// The exact token-file spelling. Case-sensitive on disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }

    /// Parse a token-file value. Unknown or empty content reads as `Stopped`.
    pub fn from_token(s: &str) -> Self {
        match s.trim() {
            "running" => Self::Running,
            "paused" => Self::Paused,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for ControlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "long" => Some(Self::Long),
            "short" => Some(Self::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The single action the model may request per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    BuyToEnter,
    SellToEnter,
    Hold,
    Close,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuyToEnter => "buy_to_enter",
            Self::SellToEnter => "sell_to_enter",
            Self::Hold => "hold",
            Self::Close => "close",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "buy_to_enter" => Some(Self::BuyToEnter),
            "sell_to_enter" => Some(Self::SellToEnter),
            "hold" => Some(Self::Hold),
            "close" => Some(Self::Close),
            _ => None,
        }
    }

    /// Entry signals open a new position (long or short).
    pub fn is_entry(&self) -> bool {
        matches!(self, Self::BuyToEnter | Self::SellToEnter)
    }

    /// The side an entry signal would open. `None` for hold/close.
    pub fn entry_side(&self) -> Option<Side> {
        match self {
            Self::BuyToEnter => Some(Side::Long),
            Self::SellToEnter => Some(Side::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Post-execution outcome recorded exactly once on each decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Success,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_state_token_round_trip() {
        for state in [ControlState::Running, ControlState::Paused, ControlState::Stopped] {
            assert_eq!(ControlState::from_token(state.as_str()), state);
        }
    }

    #[test]
    fn control_state_unknown_reads_stopped() {
        assert_eq!(ControlState::from_token(""), ControlState::Stopped);
        assert_eq!(ControlState::from_token("RUNNING"), ControlState::Stopped);
        assert_eq!(ControlState::from_token("garbage"), ControlState::Stopped);
    }

    #[test]
    fn signal_entry_sides() {
        assert_eq!(Signal::BuyToEnter.entry_side(), Some(Side::Long));
        assert_eq!(Signal::SellToEnter.entry_side(), Some(Side::Short));
        assert_eq!(Signal::Hold.entry_side(), None);
        assert_eq!(Signal::Close.entry_side(), None);
    }

    #[test]
    fn signal_parse_matches_wire_names() {
        assert_eq!(Signal::parse("buy_to_enter"), Some(Signal::BuyToEnter));
        assert_eq!(Signal::parse("sell_to_enter"), Some(Signal::SellToEnter));
        assert_eq!(Signal::parse("hold"), Some(Signal::Hold));
        assert_eq!(Signal::parse("close"), Some(Signal::Close));
        assert_eq!(Signal::parse("buy"), None);
    }

    #[test]
    fn trade_mode_from_str() {
        assert_eq!("paper".parse::<TradeMode>().unwrap(), TradeMode::Paper);
        assert_eq!("LIVE".parse::<TradeMode>().unwrap(), TradeMode::Live);
        assert!("demo".parse::<TradeMode>().is_err());
    }
}
