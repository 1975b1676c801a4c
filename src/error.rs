// =============================================================================
// Error taxonomy — typed failures for each collaborator boundary
// =============================================================================
//
// The cycle engine catches every error inside a cycle, records a status row,
// and moves on to the next cycle. Only configuration errors abort startup.
// =============================================================================

use thiserror::Error;

/// Fatal startup problem: missing or invalid setting or credential.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Transactional storage failure. Always rolled back before surfacing.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("position {0} is already closed")]
    AlreadyClosed(String),
    #[error("position {0} not found")]
    PositionNotFound(String),
    #[error("decision {0} already has a final execution status")]
    DecisionFinalized(i64),
    #[error("table '{0}' is not exposed for inspection")]
    TableNotAllowed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Market data retrieval failure.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("exchange returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("no candles returned for {0}")]
    Empty(String),
    #[error("malformed candle payload: {0}")]
    Malformed(String),
}

impl MarketDataError {
    /// Transient failures are worth a bounded retry; the rest skip the cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// LLM call failure. RateLimited and Connection are retried with backoff.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limited by provider")]
    RateLimited,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("provider error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("empty completion")]
    Empty,
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Connection(_))
    }
}

/// Model output could not be turned into a valid decision.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("no JSON object found in response")]
    NoJson,
    #[error("missing or mistyped field '{0}'")]
    Schema(String),
    #[error("unknown signal '{0}'")]
    UnknownSignal(String),
    #[error("{0}")]
    Invariant(String),
    #[error("leverage {requested}x exceeds the {cap}x cap for {coin}")]
    LeverageExceedsCap {
        coin: String,
        requested: f64,
        cap: f64,
    },
}

/// Order submission or settlement failure reported by the exchange path.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("exchange returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("no open position for {0}")]
    NoPosition(String),
    #[error("order size ${0:.2} below the $1 notional minimum")]
    DustSize(f64),
    #[error("{0}")]
    Ledger(String),
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_transient_classification() {
        assert!(LlmError::RateLimited.is_transient());
        assert!(LlmError::Connection("reset".into()).is_transient());
        assert!(!LlmError::Api { status: 400, body: "bad".into() }.is_transient());
        assert!(!LlmError::Empty.is_transient());
    }

    #[test]
    fn market_data_transient_classification() {
        assert!(MarketDataError::Transport("timeout".into()).is_transient());
        assert!(MarketDataError::Status { status: 429, body: String::new() }.is_transient());
        assert!(MarketDataError::Status { status: 503, body: String::new() }.is_transient());
        assert!(!MarketDataError::Status { status: 404, body: String::new() }.is_transient());
        assert!(!MarketDataError::Empty("BTC".into()).is_transient());
    }

    #[test]
    fn leverage_cap_error_message() {
        let err = ParseError::LeverageExceedsCap {
            coin: "DOGE/USDC:USDC".into(),
            requested: 25.0,
            cap: 10.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("25"));
        assert!(msg.contains("10"));
        assert!(msg.contains("DOGE"));
    }
}
