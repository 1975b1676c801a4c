// =============================================================================
// LLM client — messages API with bounded exponential retry
// =============================================================================
//
// `complete(system, user) → text`. Rate limits and connection failures are
// retried with exponential backoff (4s, 8s, 16s, … capped at 60s, five
// attempts total); hard API errors surface immediately as typed failures.
// The client never interprets model output — parsing happens elsewhere.
// =============================================================================

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::LlmError;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_ATTEMPTS: u32 = 5;

pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Backoff for the given retry attempt (1-based): 4s, 8s, 16s, 32s, 60s cap.
fn backoff_secs(attempt: u32) -> u64 {
    (4u64 << (attempt.saturating_sub(1)).min(4)).min(60)
}

impl LlmClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, max_tokens: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("failed to build reqwest client");

        let model = model.into();
        info!(model = %model, "LLM client initialised");

        Self {
            client,
            api_key: api_key.into(),
            model,
            max_tokens,
            temperature: 1.0,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One completion round-trip, retrying transient failures.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.complete_once(system, user).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    let wait = backoff_secs(attempt);
                    warn!(
                        attempt,
                        wait_secs = wait,
                        error = %e,
                        "transient LLM error — backing off"
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn complete_once(&self, system: &str, user: &str) -> Result<String, LlmError> {
        debug!(
            system_chars = system.len(),
            user_chars = user.len(),
            model = %self.model,
            "sending completion request"
        );

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": system,
            "messages": [{ "role": "user", "content": user }],
        });

        let started = std::time::Instant::now();
        let resp = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let payload: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        if let Some(usage) = &payload.usage {
            debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "completion received"
            );
        }

        let text = payload
            .content
            .first()
            .map(|block| block.text.clone())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(text)
    }
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
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
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_secs(1), 4);
        assert_eq!(backoff_secs(2), 8);
        assert_eq!(backoff_secs(3), 16);
        assert_eq!(backoff_secs(4), 32);
        assert_eq!(backoff_secs(5), 60);
        assert_eq!(backoff_secs(9), 60);
    }

    #[test]
    fn response_deserialization_tolerates_missing_fields() {
        let payload: MessagesResponse = serde_json::from_str(r#"{"content": []}"#).unwrap();
        assert!(payload.content.is_empty());
        assert!(payload.usage.is_none());

        let payload: MessagesResponse = serde_json::from_str(
            r#"{"content": [{"type": "text", "text": "hello"}],
                "usage": {"input_tokens": 10, "output_tokens": 2}}"#,
        )
        .unwrap();
        assert_eq!(payload.content[0].text, "hello");
        assert_eq!(payload.usage.unwrap().output_tokens, 2);
    }
}
