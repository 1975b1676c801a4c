// =============================================================================
// Settings — process environment + store-backed runtime configuration
// =============================================================================
//
// Two layers of configuration:
//
//   1. `Settings`  — read once from the environment at startup (mode, keys,
//      asset list, network addresses). Invalid values are fatal.
//   2. `BotConfig` — operator-tunable knobs persisted in the store's
//      bot_settings table, re-read at the top of every cycle so dashboard
//      changes apply without a restart.
// =============================================================================

use std::str::FromStr;
use std::sync::Arc;

use tracing::warn;

use crate::error::ConfigError;
use crate::store::Store;
use crate::types::TradeMode;

/// Hard ceiling on executed leverage in live mode, regardless of what the
/// model asks for or what the per-coin exchange limit is.
pub const LIVE_LEVERAGE_CAP: f64 = 20.0;

/// Candle timeframe used for analysis. Cycles faster than this will see the
/// same candle twice; the config endpoint warns about it.
pub const CANDLE_TIMEFRAME_SECS: u64 = 180;

fn default_assets() -> Vec<String> {
    vec![
        "BTC/USDC:USDC".to_string(),
        "ETH/USDC:USDC".to_string(),
        "SOL/USDC:USDC".to_string(),
    ]
}

// =============================================================================
// Process settings (environment)
// =============================================================================

/// Startup configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Paper (simulated ledger) or live (real exchange) execution.
    pub trade_mode: TradeMode,
    /// Canonical symbols the engine analyses every cycle.
    pub trading_assets: Vec<String>,

    /// LLM provider key and model.
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_max_tokens: u32,

    /// Exchange REST credentials (live mode only).
    pub exchange_api_key: String,
    pub exchange_api_secret: String,
    pub exchange_testnet: bool,

    /// Global leverage ceiling applied by the risk gate when a coin has no
    /// tighter exchange-reported limit.
    pub max_leverage: f64,
    /// Stop trading for the day once realized losses exceed this.
    pub daily_loss_limit_usd: f64,
    /// Fractional slippage accepted on market orders.
    pub slippage_tolerance: f64,
    /// Starting balance for a fresh paper ledger.
    pub initial_balance: f64,

    /// HTTP bind address for the control plane.
    pub bind_addr: String,
    /// Root directory for databases, the control token, and uploads.
    pub data_dir: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("could not parse '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}

impl Settings {
    /// Load settings from the environment. `dotenv` should already have run.
    pub fn from_env() -> Result<Self, ConfigError> {
        let trade_mode = env_or("HELIOS_TRADE_MODE", "paper")
            .parse::<TradeMode>()
            .map_err(|reason| ConfigError::InvalidValue {
                key: "HELIOS_TRADE_MODE".to_string(),
                reason,
            })?;

        let trading_assets: Vec<String> = match std::env::var("HELIOS_TRADING_ASSETS") {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => default_assets(),
        };
        if trading_assets.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "HELIOS_TRADING_ASSETS".to_string(),
                reason: "asset list is empty".to_string(),
            });
        }
        if trading_assets.len() > 10 {
            return Err(ConfigError::InvalidValue {
                key: "HELIOS_TRADING_ASSETS".to_string(),
                reason: format!("{} assets exceeds the maximum of 10", trading_assets.len()),
            });
        }

        let settings = Self {
            trade_mode,
            trading_assets,
            llm_api_key: env_or("LLM_API_KEY", ""),
            llm_model: env_or("LLM_MODEL", "claude-sonnet-4-5"),
            llm_max_tokens: env_parse("LLM_MAX_TOKENS", 2048u32)?,
            exchange_api_key: env_or("EXCHANGE_API_KEY", ""),
            exchange_api_secret: env_or("EXCHANGE_API_SECRET", ""),
            exchange_testnet: env_parse("EXCHANGE_TESTNET", false)?,
            max_leverage: env_parse("HELIOS_MAX_LEVERAGE", 5.0f64)?,
            daily_loss_limit_usd: env_parse("HELIOS_DAILY_LOSS_LIMIT_USD", 20.0f64)?,
            slippage_tolerance: env_parse("HELIOS_SLIPPAGE_TOLERANCE", 0.05f64)?,
            initial_balance: env_parse("HELIOS_INITIAL_BALANCE", 1000.0f64)?,
            bind_addr: env_or("HELIOS_BIND_ADDR", "0.0.0.0:5050"),
            data_dir: env_or("HELIOS_DATA_DIR", "data"),
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.llm_api_key.is_empty() {
            return Err(ConfigError::MissingVar("LLM_API_KEY"));
        }
        if self.trade_mode == TradeMode::Live && self.exchange_api_secret.is_empty() {
            return Err(ConfigError::MissingVar("EXCHANGE_API_SECRET"));
        }
        if self.max_leverage <= 0.0 || self.max_leverage > LIVE_LEVERAGE_CAP {
            return Err(ConfigError::InvalidValue {
                key: "HELIOS_MAX_LEVERAGE".to_string(),
                reason: format!("must be in (0, {LIVE_LEVERAGE_CAP}]"),
            });
        }
        if self.daily_loss_limit_usd < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "HELIOS_DAILY_LOSS_LIMIT_USD".to_string(),
                reason: "must be >= 0".to_string(),
            });
        }
        if self.initial_balance <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "HELIOS_INITIAL_BALANCE".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.trade_mode == TradeMode::Live
    }

    /// Path of the on-disk control token.
    pub fn control_token_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join("bot_control.txt")
    }

    /// Mode-separated database path.
    pub fn database_path(&self) -> std::path::PathBuf {
        let file = match self.trade_mode {
            TradeMode::Paper => "trading_paper.db",
            TradeMode::Live => "trading_live.db",
        };
        std::path::Path::new(&self.data_dir).join(file)
    }

    /// Directory for uploaded operator images.
    pub fn uploads_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join("uploads")
    }
}

// =============================================================================
// Store-backed runtime configuration
// =============================================================================

/// The enumerated, operator-tunable settings. Stored as strings in the
/// bot_settings table and parsed on every load.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BotConfig {
    pub prompt_preset: String,
    pub min_margin_usd: f64,
    pub min_balance_threshold: f64,
    pub max_margin_usd: f64,
    pub execution_interval_seconds: u64,
    pub max_open_positions: u32,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            prompt_preset: "aggressive_small_account".to_string(),
            min_margin_usd: 1.0,
            min_balance_threshold: 1.0,
            max_margin_usd: 1000.0,
            execution_interval_seconds: 600,
            max_open_positions: 3,
        }
    }
}

impl BotConfig {
    /// Load the config from the store, falling back to defaults for any key
    /// that is missing or fails to parse.
    pub fn load(store: &Arc<Store>) -> Self {
        let defaults = Self::default();

        let get_f64 = |key: &str, fallback: f64| -> f64 {
            match store.get_setting(key) {
                Ok(Some(raw)) => raw.parse().unwrap_or_else(|_| {
                    warn!(key, raw = %raw, "unparseable setting — using default");
                    fallback
                }),
                _ => fallback,
            }
        };

        let prompt_preset = match store.get_setting("prompt_preset") {
            Ok(Some(name)) if crate::llm::presets::get_preset(&name).is_some() => name,
            _ => defaults.prompt_preset.clone(),
        };

        let execution_interval_seconds = match store.get_setting("execution_interval_seconds") {
            Ok(Some(raw)) => raw
                .parse::<u64>()
                .unwrap_or(defaults.execution_interval_seconds)
                .max(10),
            _ => defaults.execution_interval_seconds,
        };

        let max_open_positions = match store.get_setting("max_open_positions") {
            Ok(Some(raw)) => raw
                .parse::<u32>()
                .unwrap_or(defaults.max_open_positions)
                .clamp(1, 10),
            _ => defaults.max_open_positions,
        };

        Self {
            prompt_preset,
            min_margin_usd: get_f64("min_margin_usd", defaults.min_margin_usd),
            min_balance_threshold: get_f64(
                "min_balance_threshold",
                defaults.min_balance_threshold,
            ),
            max_margin_usd: get_f64("max_margin_usd", defaults.max_margin_usd),
            execution_interval_seconds,
            max_open_positions,
        }
    }

    /// Validate a single key/value update from the config endpoint.
    ///
    /// Returns an optional advisory string for accepted-but-questionable
    /// values (e.g. an interval shorter than the candle timeframe).
    pub fn validate_update(key: &str, value: &str) -> Result<Option<String>, String> {
        match key {
            "prompt_preset" => {
                if crate::llm::presets::get_preset(value).is_some() {
                    Ok(None)
                } else {
                    Err(format!("unknown prompt preset '{value}'"))
                }
            }
            "min_margin_usd" | "max_margin_usd" => {
                let parsed: f64 = value.parse().map_err(|_| format!("{key} must be a number"))?;
                if parsed > 0.0 {
                    Ok(None)
                } else {
                    Err(format!("{key} must be > 0"))
                }
            }
            "min_balance_threshold" => {
                let parsed: f64 = value.parse().map_err(|_| format!("{key} must be a number"))?;
                if parsed >= 0.0 {
                    Ok(None)
                } else {
                    Err(format!("{key} must be >= 0"))
                }
            }
            "execution_interval_seconds" => {
                let parsed: u64 = value
                    .parse()
                    .map_err(|_| format!("{key} must be an integer"))?;
                if parsed < 10 {
                    return Err(format!("{key} must be >= 10"));
                }
                if parsed < CANDLE_TIMEFRAME_SECS {
                    return Ok(Some(format!(
                        "interval {parsed}s is below the {CANDLE_TIMEFRAME_SECS}s candle \
                         timeframe; consecutive cycles may see identical data"
                    )));
                }
                Ok(None)
            }
            "max_open_positions" => {
                let parsed: u32 = value
                    .parse()
                    .map_err(|_| format!("{key} must be an integer"))?;
                if (1..=10).contains(&parsed) {
                    Ok(None)
                } else {
                    Err(format!("{key} must be between 1 and 10"))
                }
            }
            "next_cycle_time" => {
                chrono::DateTime::parse_from_rfc3339(value)
                    .map_err(|_| format!("{key} must be an ISO-8601 timestamp"))?;
                Ok(None)
            }
            other => Err(format!("unknown setting key '{other}'")),
        }
    }

    /// The keys accepted by `validate_update`, in display order.
    pub fn known_keys() -> &'static [&'static str] {
        &[
            "prompt_preset",
            "min_margin_usd",
            "min_balance_threshold",
            "max_margin_usd",
            "execution_interval_seconds",
            "max_open_positions",
            "next_cycle_time",
        ]
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.prompt_preset, "aggressive_small_account");
        assert!((cfg.min_margin_usd - 1.0).abs() < f64::EPSILON);
        assert!((cfg.max_margin_usd - 1000.0).abs() < f64::EPSILON);
        assert_eq!(cfg.execution_interval_seconds, 600);
        assert_eq!(cfg.max_open_positions, 3);
    }

    #[test]
    fn validate_rejects_short_interval() {
        assert!(BotConfig::validate_update("execution_interval_seconds", "5").is_err());
        assert!(BotConfig::validate_update("execution_interval_seconds", "600")
            .unwrap()
            .is_none());
    }

    #[test]
    fn validate_warns_on_sub_candle_interval() {
        let advisory = BotConfig::validate_update("execution_interval_seconds", "60").unwrap();
        assert!(advisory.is_some());
        assert!(advisory.unwrap().contains("candle"));
    }

    #[test]
    fn validate_position_cap_bounds() {
        assert!(BotConfig::validate_update("max_open_positions", "0").is_err());
        assert!(BotConfig::validate_update("max_open_positions", "11").is_err());
        assert!(BotConfig::validate_update("max_open_positions", "10").unwrap().is_none());
    }

    #[test]
    fn validate_rejects_unknown_key() {
        assert!(BotConfig::validate_update("favourite_color", "blue").is_err());
    }

    #[test]
    fn validate_preset_names() {
        assert!(BotConfig::validate_update("prompt_preset", "standard").unwrap().is_none());
        assert!(BotConfig::validate_update("prompt_preset", "yolo").is_err());
    }

    #[test]
    fn validate_margin_bounds() {
        assert!(BotConfig::validate_update("min_margin_usd", "0").is_err());
        assert!(BotConfig::validate_update("min_margin_usd", "-3").is_err());
        assert!(BotConfig::validate_update("max_margin_usd", "250").unwrap().is_none());
        assert!(BotConfig::validate_update("min_balance_threshold", "0").unwrap().is_none());
    }

    #[test]
    fn validate_next_cycle_time_format() {
        assert!(BotConfig::validate_update("next_cycle_time", "2026-08-01T12:00:00+00:00")
            .unwrap()
            .is_none());
        assert!(BotConfig::validate_update("next_cycle_time", "tomorrow").is_err());
    }
}
