// ── Inbox Intake (C7) ───────────────────────────────────────────────────────
// One handler per platform type behind a single webhook endpoint. Each
// handler authenticates the callback in its own way, normalizes it into
// zero or more `NormalizedMessage`s, and persists them into the platform's
// own inbox table. A duplicate `(platform_id, message_id)` is logged and
// still reported as success — the webhook caller never sees a retryable
// failure for something the unique index already absorbed.

pub mod crypto;
pub mod dingtalk;
pub mod feishu;
pub mod telegram;
pub mod wecom;
pub mod wecom_bot;
pub mod wukongim;

use crate::atoms::ids::PlatformId;
use crate::atoms::error::EngineResult;
use crate::atoms::types::{InboxMessage, InboxStatus, Platform, PlatformType};
use crate::engine::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use serde_json::Value;
use std::collections::HashMap;

/// Platform-agnostic view of an inbound webhook call. Headers are
/// lowercased on construction so handlers can look them up case-insensitively.
pub struct CallbackRequest {
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl CallbackRequest {
    pub fn new(headers: HashMap<String, String>, query: HashMap<String, String>, body: Vec<u8>) -> Self {
        let headers = headers.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect();
        Self { headers, query, body }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// One row ready to be written to a platform's inbox table.
pub struct NormalizedMessage {
    pub message_id: String,
    pub from_user: String,
    pub chat_id: Option<String>,
    pub msg_type: String,
    pub content: String,
    pub received_at: DateTime<Utc>,
    pub raw_payload: Value,
}

pub enum CallbackResponse {
    Ok,
    /// Feishu's URL-verification handshake echoes the challenge instead of
    /// acknowledging a message.
    Challenge(String),
}

/// What `verify` hands to `normalize`: either the canonical bytes to parse
/// a message out of, or a response that bypasses normalize/persist entirely
/// (a verification handshake, or an event type this platform ignores).
pub enum VerifyOutcome {
    Proceed(Vec<u8>),
    ShortCircuit(CallbackResponse),
}

#[async_trait]
pub trait PlatformHandler: Send + Sync {
    fn platform_type(&self) -> PlatformType;

    /// Authenticates the callback (signature/HMAC/secret-token check) and
    /// decrypts the body where the platform requires it.
    fn verify(&self, platform: &Platform, req: &CallbackRequest) -> EngineResult<VerifyOutcome>;

    /// Extracts zero or more messages from the verified body. Zero is valid
    /// (WeCom KF events carry no message; WuKongIM batches may contain only
    /// staff-authored messages, which are filtered out).
    fn normalize(&self, platform: &Platform, body: &[u8], req: &CallbackRequest) -> EngineResult<Vec<NormalizedMessage>>;

    async fn handle(&self, store: &Store, platform: &Platform, req: &CallbackRequest) -> EngineResult<CallbackResponse> {
        let body = match self.verify(platform, req)? {
            VerifyOutcome::ShortCircuit(resp) => return Ok(resp),
            VerifyOutcome::Proceed(body) => body,
        };
        for msg in self.normalize(platform, &body, req)? {
            persist_message(store, self.platform_type(), platform.id, msg)?;
        }
        Ok(CallbackResponse::Ok)
    }
}

fn persist_message(store: &Store, platform_type: PlatformType, platform_id: PlatformId, msg: NormalizedMessage) -> EngineResult<()> {
    let inbox = InboxMessage {
        id: uuid::Uuid::new_v4().to_string(),
        platform_id,
        message_id: msg.message_id,
        from_user: msg.from_user,
        chat_id: msg.chat_id,
        msg_type: msg.msg_type,
        content: msg.content,
        raw_payload: msg.raw_payload,
        status: InboxStatus::Pending,
        received_at: msg.received_at,
    };
    if !store.insert_inbox_message(platform_type, &inbox)? {
        info!("duplicate inbox message {} for platform {platform_id}, treating as success", inbox.message_id);
    }
    Ok(())
}

/// Selects the handler for a platform's configured type. The registry is a
/// plain match rather than a `HashMap` since the platform set is fixed at
/// compile time.
pub fn handler_for(platform_type: PlatformType) -> Box<dyn PlatformHandler> {
    match platform_type {
        PlatformType::Wecom => Box::new(wecom::WecomHandler),
        PlatformType::WecomBot => Box::new(wecom_bot::WecomBotHandler),
        PlatformType::Feishu => Box::new(feishu::FeishuHandler),
        PlatformType::Dingtalk => Box::new(dingtalk::DingtalkHandler),
        PlatformType::Telegram => Box::new(telegram::TelegramHandler),
        PlatformType::Wukongim => Box::new(wukongim::WukongimHandler),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::ids::ProjectId;
    use crate::atoms::types::AiMode;

    fn sample_platform(platform_type: PlatformType, config: HashMap<String, Value>) -> Platform {
        Platform {
            id: PlatformId::new(),
            project_id: ProjectId::new(),
            platform_type,
            api_key: "key".into(),
            config,
            is_active: true,
            ai_mode: AiMode::Auto,
            agent_ids: vec![],
            logo_path: None,
            fallback_to_ai_timeout: None,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn duplicate_message_id_is_logged_and_reported_as_success() {
        let store = Store::open_in_memory().unwrap();
        let platform = sample_platform(PlatformType::Telegram, HashMap::new());
        store.create_platform(&platform).unwrap();
        let handler = telegram::TelegramHandler;

        let update = serde_json::json!({
            "update_id": 1,
            "message": {"message_id": 5, "date": 1_700_000_000, "chat": {"id": 9, "type": "private"}, "from": {"id": 9, "first_name": "A"}, "text": "hi"}
        });
        let req = CallbackRequest::new(HashMap::new(), HashMap::new(), serde_json::to_vec(&update).unwrap());

        handler.handle(&store, &platform, &req).await.unwrap();
        handler.handle(&store, &platform, &req).await.unwrap();

        let pending = store.list_pending_inbox_messages(PlatformType::Telegram, 10).unwrap();
        assert_eq!(pending.len(), 1);
    }
}
