// Feishu/Lark bot webhook: JSON body, optional encrypted `encrypt` field
// (AES-256-CBC, key = sha256(encrypt_key), IV = first 16 bytes of the
// ciphertext), `X-Lark-Signature` over timestamp+nonce+encrypt_key+body.
// URL-verification handshakes short-circuit with the echoed challenge.

use super::crypto::{feishu_decrypt, feishu_verify_signature};
use super::{CallbackRequest, CallbackResponse, NormalizedMessage, PlatformHandler, VerifyOutcome};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Platform, PlatformType};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;

pub struct FeishuHandler;

#[async_trait]
impl PlatformHandler for FeishuHandler {
    fn platform_type(&self) -> PlatformType {
        PlatformType::Feishu
    }

    fn verify(&self, platform: &Platform, req: &CallbackRequest) -> EngineResult<VerifyOutcome> {
        let encrypt_key = config_str(platform, "encrypt_key");
        let verification_token = config_str(platform, "verification_token");

        let body_text = req.body_text();
        let raw: Value = serde_json::from_str(&body_text).map_err(|_| EngineError::invalid("invalid JSON payload"))?;

        let decrypted_text;
        let event: Value = if let Some(encrypt) = raw.get("encrypt").and_then(|v| v.as_str()) {
            let key = encrypt_key.as_deref().ok_or_else(|| EngineError::config_missing("encrypt_key is not configured for this Feishu platform"))?;

            if let Some(signature) = req.header("x-lark-signature") {
                let timestamp = req.header("x-lark-request-timestamp").unwrap_or_default();
                let nonce = req.header("x-lark-request-nonce").unwrap_or_default();
                if !feishu_verify_signature(timestamp, nonce, key, &body_text, signature) {
                    return Err(EngineError::SignatureMismatch("feishu".into()));
                }
            }

            decrypted_text = feishu_decrypt(encrypt, key).ok_or_else(|| EngineError::invalid("failed to decrypt Feishu message"))?;
            serde_json::from_str(&decrypted_text).map_err(|_| EngineError::invalid("decrypted Feishu payload is not valid JSON"))?
        } else {
            raw
        };

        if event.get("type").and_then(|v| v.as_str()) == Some("url_verification") {
            if let Some(expected) = &verification_token {
                let token = event.get("token").and_then(|v| v.as_str()).unwrap_or_default();
                if token != expected {
                    return Err(EngineError::SignatureMismatch("feishu".into()));
                }
            }
            let challenge = event.get("challenge").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            return Ok(VerifyOutcome::ShortCircuit(CallbackResponse::Challenge(challenge)));
        }

        let event_type = event.get("header").and_then(|h| h.get("event_type")).and_then(|v| v.as_str()).unwrap_or_default();
        if event_type != "im.message.receive_v1" {
            return Ok(VerifyOutcome::ShortCircuit(CallbackResponse::Ok));
        }

        Ok(VerifyOutcome::Proceed(serde_json::to_vec(&event).unwrap_or_default()))
    }

    fn normalize(&self, _platform: &Platform, body: &[u8], _req: &CallbackRequest) -> EngineResult<Vec<NormalizedMessage>> {
        let event: Value = serde_json::from_slice(body).map_err(|_| EngineError::invalid("invalid Feishu event payload"))?;
        let Some(message) = event.get("event").and_then(|e| e.get("message")) else {
            return Ok(vec![]);
        };

        let message_id = message.get("message_id").and_then(|v| v.as_str()).map(str::to_string).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let chat_id = message.get("chat_id").and_then(|v| v.as_str()).map(str::to_string);

        let sender = event.get("event").and_then(|e| e.get("sender"));
        let from_user = sender
            .and_then(|s| s.get("sender_id"))
            .and_then(|id| id.get("open_id").or_else(|| id.get("user_id")).or_else(|| id.get("union_id")))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        if from_user.is_empty() {
            return Ok(vec![]);
        }

        let msg_type = message.get("message_type").and_then(|v| v.as_str()).unwrap_or("text").to_string();
        let content_raw = message.get("content").and_then(|v| v.as_str()).unwrap_or("{}");
        let content_json: Value = serde_json::from_str(content_raw).unwrap_or(Value::Null);
        let content = match msg_type.as_str() {
            "text" => content_json.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            "post" => content_json.to_string(),
            "image" => format!("[image] {}", content_json.get("image_key").and_then(|v| v.as_str()).unwrap_or("")),
            "file" => format!("[file] {}", content_json.get("file_name").and_then(|v| v.as_str()).unwrap_or("")),
            other => format!("[{other}] {content_raw}"),
        };

        let create_time_ms: i64 = message.get("create_time").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()).unwrap_or(0);
        let received_at = Utc.timestamp_millis_opt(create_time_ms).single().unwrap_or_else(Utc::now);

        Ok(vec![NormalizedMessage {
            message_id,
            from_user,
            chat_id,
            msg_type,
            content,
            received_at,
            raw_payload: event,
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
            platform_type: PlatformType::Feishu,
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
    fn url_verification_echoes_challenge() {
        let handler = FeishuHandler;
        let body = serde_json::json!({"type": "url_verification", "challenge": "abc123", "token": "tok"});
        let mut config = HashMap::new();
        config.insert("verification_token".to_string(), serde_json::json!("tok"));
        let platform = platform_with(config);
        let req = CallbackRequest::new(HashMap::new(), HashMap::new(), serde_json::to_vec(&body).unwrap());

        match handler.verify(&platform, &req).unwrap() {
            VerifyOutcome::ShortCircuit(CallbackResponse::Challenge(c)) => assert_eq!(c, "abc123"),
            _ => panic!("expected challenge short-circuit"),
        }
    }

    #[test]
    fn non_message_event_short_circuits_ok() {
        let handler = FeishuHandler;
        let body = serde_json::json!({"header": {"event_type": "im.chat.member.user.added_v1"}});
        let req = CallbackRequest::new(HashMap::new(), HashMap::new(), serde_json::to_vec(&body).unwrap());
        match handler.verify(&platform_with(HashMap::new()), &req).unwrap() {
            VerifyOutcome::ShortCircuit(CallbackResponse::Ok) => {}
            _ => panic!("expected ok short-circuit"),
        }
    }

    #[test]
    fn normalize_extracts_text_content() {
        let handler = FeishuHandler;
        let event = serde_json::json!({
            "header": {"event_type": "im.message.receive_v1"},
            "event": {
                "sender": {"sender_id": {"open_id": "ou_1"}},
                "message": {
                    "message_id": "om_1",
                    "chat_id": "oc_1",
                    "message_type": "text",
                    "content": "{\"text\":\"hello\"}",
                    "create_time": "1700000000000"
                }
            }
        });
        let req = CallbackRequest::new(HashMap::new(), HashMap::new(), vec![]);
        let messages = handler.normalize(&platform_with(HashMap::new()), serde_json::to_vec(&event).unwrap().as_slice(), &req).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[0].from_user, "ou_1");
        assert_eq!(messages[0].chat_id.as_deref(), Some("oc_1"));
    }
}
