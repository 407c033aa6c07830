// Telegram Bot API webhook: JSON `Update` body, `X-Telegram-Bot-Api-Secret-Token`
// header checked against the configured webhook secret.

use super::crypto::telegram_verify_secret_token;
use super::{CallbackRequest, NormalizedMessage, PlatformHandler, VerifyOutcome};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Platform, PlatformType};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;

pub struct TelegramHandler;

#[async_trait]
impl PlatformHandler for TelegramHandler {
    fn platform_type(&self) -> PlatformType {
        PlatformType::Telegram
    }

    fn verify(&self, platform: &Platform, req: &CallbackRequest) -> EngineResult<VerifyOutcome> {
        if let Some(configured) = config_str(platform, "webhook_secret") {
            let header = req.header("x-telegram-bot-api-secret-token").unwrap_or_default();
            if !telegram_verify_secret_token(header, &configured) {
                return Err(EngineError::SignatureMismatch("telegram".into()));
            }
        }
        Ok(VerifyOutcome::Proceed(req.body.clone()))
    }

    fn normalize(&self, _platform: &Platform, body: &[u8], _req: &CallbackRequest) -> EngineResult<Vec<NormalizedMessage>> {
        let update: Value = serde_json::from_slice(body).map_err(|_| EngineError::invalid("invalid Telegram update payload"))?;

        let Some(message) = update
            .get("message")
            .or_else(|| update.get("edited_message"))
            .or_else(|| update.get("channel_post"))
            .or_else(|| update.get("edited_channel_post"))
        else {
            return Ok(vec![]);
        };

        let message_id = message.get("message_id").and_then(|v| v.as_i64()).map(|id| id.to_string());
        let chat = message.get("chat");
        let chat_id = chat.and_then(|c| c.get("id")).and_then(|v| v.as_i64()).map(|id| id.to_string());
        let from_user_id = message
            .get("from")
            .and_then(|f| f.get("id"))
            .and_then(|v| v.as_i64())
            .map(|id| id.to_string())
            .or_else(|| chat_id.clone());

        let (Some(message_id), Some(chat_id), Some(from_user_id)) = (message_id, chat_id.clone(), from_user_id) else {
            return Ok(vec![]);
        };

        let msg_type = if message.get("text").is_some() {
            "text"
        } else if message.get("photo").is_some() {
            "photo"
        } else if message.get("document").is_some() {
            "document"
        } else if message.get("voice").is_some() {
            "voice"
        } else if message.get("video").is_some() {
            "video"
        } else if message.get("audio").is_some() {
            "audio"
        } else if message.get("sticker").is_some() {
            "sticker"
        } else if message.get("location").is_some() {
            "location"
        } else if message.get("contact").is_some() {
            "contact"
        } else if message.get("poll").is_some() {
            "poll"
        } else {
            "unknown"
        }
        .to_string();

        let content = match msg_type.as_str() {
            "text" => message.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            "photo" => "[photo]".to_string(),
            "document" => format!("[document] {}", message.get("document").and_then(|d| d.get("file_name")).and_then(|v| v.as_str()).unwrap_or("")),
            "voice" => "[voice message]".to_string(),
            "video" => "[video]".to_string(),
            "audio" => "[audio]".to_string(),
            "sticker" => format!("[sticker] {}", message.get("sticker").and_then(|s| s.get("emoji")).and_then(|v| v.as_str()).unwrap_or("")),
            "location" => "[location]".to_string(),
            "contact" => "[contact]".to_string(),
            "poll" => format!("[poll] {}", message.get("poll").and_then(|p| p.get("question")).and_then(|v| v.as_str()).unwrap_or("")),
            other => format!("[{other}]"),
        };

        let date_secs = message.get("date").and_then(|v| v.as_i64()).unwrap_or(0);
        let received_at = Utc.timestamp_opt(date_secs, 0).single().unwrap_or_else(Utc::now);

        Ok(vec![NormalizedMessage {
            message_id,
            from_user: from_user_id,
            chat_id: Some(chat_id),
            msg_type,
            content,
            received_at,
            raw_payload: update,
        }])
    }
}

fn config_str(platform: &Platform, key: &str) -> Option<String> {
    platform.config.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::ids::{PlatformId, ProjectId};
    use crate::atoms::types::AiMode;
    use std::collections::HashMap;

    fn platform_with(config: HashMap<String, Value>) -> Platform {
        Platform {
            id: PlatformId::new(),
            project_id: ProjectId::new(),
            platform_type: PlatformType::Telegram,
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

    #[test]
    fn bad_secret_token_is_rejected() {
        let mut config = HashMap::new();
        config.insert("webhook_secret".to_string(), serde_json::json!("shh"));
        let platform = platform_with(config);
        let mut headers = HashMap::new();
        headers.insert("x-telegram-bot-api-secret-token".to_string(), "wrong".to_string());
        let req = CallbackRequest::new(headers, HashMap::new(), b"{}".to_vec());
        assert!(matches!(TelegramHandler.verify(&platform, &req), Err(EngineError::SignatureMismatch(_))));
    }

    #[test]
    fn normalize_extracts_text_message() {
        let handler = TelegramHandler;
        let update = serde_json::json!({
            "update_id": 1,
            "message": {"message_id": 7, "date": 1_700_000_000, "chat": {"id": 42, "type": "private"}, "from": {"id": 42, "first_name": "A"}, "text": "hi"}
        });
        let req = CallbackRequest::new(HashMap::new(), HashMap::new(), vec![]);
        let messages = handler.normalize(&platform_with(HashMap::new()), serde_json::to_vec(&update).unwrap().as_slice(), &req).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[0].chat_id.as_deref(), Some("42"));
    }
}
