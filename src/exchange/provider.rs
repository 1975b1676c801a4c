// =============================================================================
// Exchange REST provider — HMAC-SHA256 signed order endpoints
// =============================================================================
//
// Thin typed wrapper over the venue's two endpoints: the public `/info`
// endpoint (account state, asset metadata) and the signed `/exchange`
// endpoint (orders). The secret key is used exclusively for signing and is
// never logged or serialized.
// =============================================================================

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

use crate::error::ExchangeError;

type HmacSha256 = Hmac<Sha256>;

pub const MAINNET_URL: &str = "https://api.hyperliquid.xyz";
pub const TESTNET_URL: &str = "https://api.hyperliquid-testnet.xyz";

/// API base URL for the given network.
pub fn api_url(testnet: bool) -> &'static str {
    if testnet {
        TESTNET_URL
    } else {
        MAINNET_URL
    }
}

pub struct ExchangeClient {
    /// Account address queried for state.
    address: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl ExchangeClient {
    pub fn new(address: impl Into<String>, secret: impl Into<String>, testnet: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .expect("failed to build reqwest client");

        Self {
            address: address.into(),
            secret: secret.into(),
            base_url: if testnet { TESTNET_URL } else { MAINNET_URL }.to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// HMAC-SHA256 hex signature of `payload`.
    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Current UNIX timestamp in milliseconds, used as the request nonce.
    fn nonce_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    async fn post_info(&self, body: serde_json::Value) -> Result<serde_json::Value, ExchangeError> {
        let url = format!("{}/info", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        let status = resp.status();
        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ExchangeError::Status {
                status: status.as_u16(),
                body: payload.to_string(),
            });
        }
        Ok(payload)
    }

    /// POST a signed action to `/exchange`. The nonce and signature travel as
    /// headers so the action body stays byte-identical to what was signed.
    async fn post_signed(
        &self,
        action: serde_json::Value,
    ) -> Result<serde_json::Value, ExchangeError> {
        let nonce = Self::nonce_ms();
        let body = serde_json::json!({ "action": action, "nonce": nonce });
        let signature = self.sign(&body.to_string());

        let url = format!("{}/exchange", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("X-API-ADDRESS", &self.address)
            .header("X-API-SIGNATURE", signature)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        let status = resp.status();
        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ExchangeError::Status {
                status: status.as_u16(),
                body: payload.to_string(),
            });
        }
        Ok(payload)
    }

    // -------------------------------------------------------------------------
    // Info queries
    // -------------------------------------------------------------------------

    /// Account value, margin summary, and assetPositions for the account.
    #[instrument(skip(self), name = "exchange::user_state")]
    pub async fn user_state(&self) -> Result<serde_json::Value, ExchangeError> {
        self.post_info(serde_json::json!({
            "type": "clearinghouseState",
            "user": self.address,
        }))
        .await
    }

    /// The asset universe: per-coin szDecimals and maxLeverage.
    #[instrument(skip(self), name = "exchange::meta")]
    pub async fn meta(&self) -> Result<serde_json::Value, ExchangeError> {
        self.post_info(serde_json::json!({ "type": "meta" })).await
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// Set leverage for a base symbol ahead of an order.
    #[instrument(skip(self), name = "exchange::update_leverage")]
    pub async fn update_leverage(
        &self,
        base: &str,
        leverage: u32,
    ) -> Result<serde_json::Value, ExchangeError> {
        debug!(base, leverage, "setting leverage (isolated)");
        self.post_signed(serde_json::json!({
            "type": "updateLeverage",
            "coin": base,
            "isCross": false,
            "leverage": leverage,
        }))
        .await
    }

    /// Market-open `size` units of `base` with a slippage bound.
    #[instrument(skip(self), name = "exchange::market_open")]
    pub async fn market_open(
        &self,
        base: &str,
        is_buy: bool,
        size: f64,
        slippage: f64,
    ) -> Result<serde_json::Value, ExchangeError> {
        debug!(base, is_buy, size, slippage, "submitting market open");
        self.post_signed(serde_json::json!({
            "type": "marketOpen",
            "coin": base,
            "isBuy": is_buy,
            "sz": size,
            "slippage": slippage,
        }))
        .await
    }

    /// Close the entire position for `base` at market.
    #[instrument(skip(self), name = "exchange::market_close")]
    pub async fn market_close(&self, base: &str) -> Result<serde_json::Value, ExchangeError> {
        debug!(base, "submitting market close");
        self.post_signed(serde_json::json!({
            "type": "marketClose",
            "coin": base,
        }))
        .await
    }
}

impl std::fmt::Debug for ExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeClient")
            .field("address", &self.address)
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_hex() {
        let client = ExchangeClient::new("0xabc", "secret", true);
        let a = client.sign("payload");
        let b = client.sign("payload");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, client.sign("other payload"));
    }

    #[test]
    fn testnet_selects_testnet_url() {
        assert_eq!(ExchangeClient::new("a", "s", true).base_url(), TESTNET_URL);
        assert_eq!(ExchangeClient::new("a", "s", false).base_url(), MAINNET_URL);
    }
}
