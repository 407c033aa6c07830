// ── WuKongIM Messaging Substrate Client ─────────────────────────────────────
// HTTP client for the messaging substrate behind the Channel Fabric Adapter.
// Mirrors the LLM client's retry-free, single-shot request style; substrate
// calls are already treated as best-effort by the caller.

use super::MessagingSubstrate;
use crate::atoms::error::{EngineError, EngineResult};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WukongimConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

pub struct WukongimClient {
    http: Client,
    config: WukongimConfig,
}

impl WukongimClient {
    pub fn new(config: WukongimConfig) -> Self {
        Self { http: Client::new(), config }
    }

    async fn post(&self, path: &str, body: Value) -> EngineResult<Value> {
        let url = format!("{}{path}", self.config.base_url.trim_end_matches('/'));
        let mut req = self.http.post(&url).json(&body).timeout(Duration::from_secs(10));
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| EngineError::upstream("wukongim", format!("request to {path} failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::upstream("wukongim", format!("{path} returned {status} — {text}")));
        }
        resp.json().await.map_err(|e| EngineError::upstream("wukongim", format!("{path} parse error: {e}")))
    }
}

#[async_trait]
impl MessagingSubstrate for WukongimClient {
    async fn add_subscribers(&self, channel_id: &str, channel_type: i32, subscribers: &[String]) -> EngineResult<()> {
        self.post(
            "/channel/subscriber_add",
            json!({"channel_id": channel_id, "channel_type": channel_type, "subscribers": subscribers}),
        )
        .await?;
        Ok(())
    }

    async fn remove_subscribers(&self, channel_id: &str, channel_type: i32, subscribers: &[String]) -> EngineResult<()> {
        self.post(
            "/channel/subscriber_remove",
            json!({"channel_id": channel_id, "channel_type": channel_type, "subscribers": subscribers}),
        )
        .await?;
        Ok(())
    }

    async fn send_system_message(
        &self,
        channel_id: &str,
        channel_type: i32,
        from_uid: &str,
        msg_type: i32,
        content: &str,
        extra: Value,
    ) -> EngineResult<()> {
        self.post(
            "/message/send",
            json!({
                "from_uid": from_uid,
                "channel_id": channel_id,
                "channel_type": channel_type,
                "payload": {"type": msg_type, "content": content, "extra": extra},
            }),
        )
        .await?;
        Ok(())
    }

    async fn send_event(&self, channel_id: &str, channel_type: i32, event: &str, data: Value, client_msg_no: &str) -> EngineResult<()> {
        self.post(
            "/message/send",
            json!({
                "channel_id": channel_id,
                "channel_type": channel_type,
                "payload": {"event": event, "data": data},
                "client_msg_no": client_msg_no,
            }),
        )
        .await?;
        Ok(())
    }

    async fn search(&self, payload: Value) -> EngineResult<Value> {
        self.post("/message/search", payload).await
    }

    async fn sync_conversations(&self, payload: Value) -> EngineResult<Value> {
        self.post("/conversation/sync", payload).await
    }

    async fn set_unread(&self, payload: Value) -> EngineResult<()> {
        self.post("/conversation/setUnread", payload).await?;
        Ok(())
    }

    async fn kick_device(&self, payload: Value) -> EngineResult<()> {
        self.post("/user/device_kick", payload).await?;
        Ok(())
    }
}
