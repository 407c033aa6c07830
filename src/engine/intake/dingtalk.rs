// DingTalk robot webhook: JSON body, `X-DingTalk-Sign` HMAC-SHA256 over
// `"{timestamp}\n{secret}"` keyed by the robot's app secret.

use super::crypto::dingtalk_verify_signature;
use super::{CallbackRequest, NormalizedMessage, PlatformHandler, VerifyOutcome};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Platform, PlatformType};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;

pub struct DingtalkHandler;

#[async_trait]
impl PlatformHandler for DingtalkHandler {
    fn platform_type(&self) -> PlatformType {
        PlatformType::Dingtalk
    }

    fn verify(&self, platform: &Platform, req: &CallbackRequest) -> EngineResult<VerifyOutcome> {
        let app_secret = config_str(platform, "app_secret");
        if let (Some(secret), Some(sign)) = (app_secret.as_deref(), req.header("x-dingtalk-sign")) {
            let timestamp = req.header("x-dingtalk-timestamp").unwrap_or_default();
            if !dingtalk_verify_signature(timestamp, sign, secret) {
                return Err(EngineError::SignatureMismatch("dingtalk".into()));
            }
        }
        Ok(VerifyOutcome::Proceed(req.body.clone()))
    }

    fn normalize(&self, _platform: &Platform, body: &[u8], _req: &CallbackRequest) -> EngineResult<Vec<NormalizedMessage>> {
        let payload: Value = serde_json::from_slice(body).map_err(|_| EngineError::invalid("invalid JSON payload"))?;

        let from_user = payload.get("senderId").or_else(|| payload.get("senderStaffId")).and_then(|v| v.as_str()).unwrap_or("").to_string();
        if from_user.is_empty() {
            return Ok(vec![]);
        }

        let message_id = payload.get("msgId").and_then(|v| v.as_str()).map(str::to_string).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let chat_id = payload.get("conversationId").and_then(|v| v.as_str()).map(str::to_string);
        let msg_type = payload.get("msgtype").and_then(|v| v.as_str()).unwrap_or("text").to_string();

        let content = match msg_type.as_str() {
            "text" => payload.get("text").and_then(|t| t.get("content")).and_then(|v| v.as_str()).unwrap_or("").trim().to_string(),
            "picture" => format!("[picture] {}", payload.get("content").and_then(|c| c.get("downloadCode")).and_then(|v| v.as_str()).unwrap_or("")),
            "richText" => payload
                .get("content")
                .and_then(|c| c.get("richText"))
                .and_then(|v| v.as_array())
                .map(|items| items.iter().filter_map(|i| i.get("text").and_then(|t| t.as_str())).collect::<Vec<_>>().join(""))
                .unwrap_or_default(),
            "audio" => "[audio message]".to_string(),
            "file" => format!("[file] {}", payload.get("content").and_then(|c| c.get("fileName")).and_then(|v| v.as_str()).unwrap_or("")),
            other => format!("[{other}] {}", payload.get("content").map(|c| c.to_string()).unwrap_or_default()),
        };

        let create_at_ms = payload.get("createAt").and_then(|v| v.as_i64()).unwrap_or(0);
        let received_at = Utc.timestamp_millis_opt(create_at_ms).single().unwrap_or_else(Utc::now);

        Ok(vec![NormalizedMessage {
            message_id,
            from_user,
            chat_id,
            msg_type,
            content,
            received_at,
            raw_payload: payload,
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
            platform_type: PlatformType::Dingtalk,
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
    fn bad_signature_is_rejected() {
        let mut config = HashMap::new();
        config.insert("app_secret".to_string(), serde_json::json!("shh"));
        let platform = platform_with(config);
        let mut headers = HashMap::new();
        headers.insert("x-dingtalk-timestamp".to_string(), "1690000000000".to_string());
        headers.insert("x-dingtalk-sign".to_string(), "bogus".to_string());
        let req = CallbackRequest::new(headers, HashMap::new(), b"{}".to_vec());
        assert!(matches!(DingtalkHandler.verify(&platform, &req), Err(EngineError::SignatureMismatch(_))));
    }

    #[test]
    fn normalize_extracts_text_and_drops_missing_sender() {
        let handler = DingtalkHandler;
        let body = serde_json::json!({
            "msgId": "m1",
            "senderId": "u1",
            "conversationId": "c1",
            "msgtype": "text",
            "text": {"content": "hello"},
            "createAt": 1_700_000_000_000i64
        });
        let req = CallbackRequest::new(HashMap::new(), HashMap::new(), vec![]);
        let messages = handler.normalize(&platform_with(HashMap::new()), serde_json::to_vec(&body).unwrap().as_slice(), &req).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");

        let no_sender = serde_json::json!({"msgId": "m2", "msgtype": "text"});
        let dropped = handler.normalize(&platform_with(HashMap::new()), serde_json::to_vec(&no_sender).unwrap().as_slice(), &req).unwrap();
        assert!(dropped.is_empty());
    }
}
