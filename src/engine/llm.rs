// ── LLM Client ──────────────────────────────────────────────────────────────
// Minimal non-streaming chat-completion client for QA augmentation and
// LLM-assisted assignment. Retry/backoff mirrors the agent engine's
// provider client.

use crate::atoms::error::{EngineError, EngineResult};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 1000;

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 529)
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self { http: Client::new(), config }
    }

    /// Single-shot chat completion with exponential backoff on 429/5xx.
    pub async fn complete(&self, system_prompt: &str, user_prompt: &str) -> EngineResult<String> {
        let url = format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        let mut attempt = 0;
        loop {
            let mut req = self.http.post(&url).json(&body).timeout(Duration::from_secs(60));
            if !self.config.api_key.is_empty() {
                req = req.bearer_auth(&self.config.api_key);
            }

            let resp = req.send().await.map_err(|e| EngineError::upstream("llm", format!("request failed: {e}")))?;
            let status = resp.status();

            if status.is_success() {
                let v: Value = resp.json().await.map_err(|e| EngineError::upstream("llm", format!("parse error: {e}")))?;
                return v["choices"][0]["message"]["content"]
                    .as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| EngineError::upstream("llm", "no content in chat completion response"));
            }

            if is_retryable_status(status.as_u16()) && attempt < MAX_RETRIES {
                let delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::upstream("llm", format!("{status} — {text}")));
        }
    }
}
