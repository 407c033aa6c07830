// WeCom Bot (智能机器人) webhook: JSON body `{"encrypt": "..."}`, same
// signature scheme as regular WeCom but decrypted content is itself JSON.
// `receiveid` is tried as `corp_id` first, then empty — an undocumented
// workaround carried over as-is.

use super::crypto::{compute_msg_signature, wecom_decrypt};
use super::{CallbackRequest, NormalizedMessage, PlatformHandler, VerifyOutcome};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Platform, PlatformType};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

pub struct WecomBotHandler;

#[async_trait]
impl PlatformHandler for WecomBotHandler {
    fn platform_type(&self) -> PlatformType {
        PlatformType::WecomBot
    }

    fn verify(&self, platform: &Platform, req: &CallbackRequest) -> EngineResult<VerifyOutcome> {
        let token = config_str(platform, "token").unwrap_or_default();
        let encoding_aes_key = config_str(platform, "encoding_aes_key")
            .ok_or_else(|| EngineError::config_missing("encoding_aes_key is not configured for this WeCom Bot platform"))?;
        let corp_id = config_str(platform, "corp_id").unwrap_or_default();

        let body_json: Value = serde_json::from_slice(&req.body).map_err(|_| EngineError::invalid("invalid JSON payload"))?;
        let encrypt = body_json
            .get("encrypt")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::invalid("WeCom Bot callback missing \"encrypt\" field"))?;

        if let Some(msg_signature) = req.query.get("msg_signature") {
            let timestamp = req.query.get("timestamp").cloned().unwrap_or_default();
            let nonce = req.query.get("nonce").cloned().unwrap_or_default();
            let expected = compute_msg_signature(&token, &timestamp, &nonce, Some(encrypt));
            if &expected != msg_signature {
                return Err(EngineError::SignatureMismatch("wecom_bot".into()));
            }
        }

        let decrypted = wecom_decrypt(encrypt, &encoding_aes_key, &corp_id).or_else(|| wecom_decrypt(encrypt, &encoding_aes_key, ""));
        let decrypted = decrypted.ok_or_else(|| EngineError::invalid("failed to decrypt WeCom Bot message"))?;
        Ok(VerifyOutcome::Proceed(decrypted.into_bytes()))
    }

    fn normalize(&self, _platform: &Platform, body: &[u8], _req: &CallbackRequest) -> EngineResult<Vec<NormalizedMessage>> {
        // Decrypted content is itself JSON for WeCom Bot. A non-JSON payload
        // is kept verbatim as plain text rather than dropped.
        let text = String::from_utf8_lossy(body).to_string();
        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::String(text.clone()));

        let message_id = parsed.get("msgid").and_then(|v| v.as_str()).map(str::to_string).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let from_user = parsed.get("from").and_then(|f| f.get("userid")).and_then(|v| v.as_str()).unwrap_or("").to_string();
        if from_user.is_empty() {
            return Ok(vec![]);
        }
        let msg_type = parsed.get("msgtype").and_then(|v| v.as_str()).unwrap_or("text").to_string();
        let content = match msg_type.as_str() {
            "text" => parsed.get("text").and_then(|t| t.get("content")).and_then(|v| v.as_str()).unwrap_or("").to_string(),
            other => format!("[{other}] {text}"),
        };

        Ok(vec![NormalizedMessage {
            message_id,
            from_user,
            chat_id: None,
            msg_type,
            content,
            received_at: Utc::now(),
            raw_payload: parsed,
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
            platform_type: PlatformType::WecomBot,
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
    fn normalize_reads_nested_text_content() {
        let handler = WecomBotHandler;
        let body = serde_json::json!({
            "msgid": "m1",
            "from": {"userid": "u1"},
            "msgtype": "text",
            "text": {"content": "hi there"}
        });
        let req = CallbackRequest::new(HashMap::new(), HashMap::new(), vec![]);
        let messages = handler.normalize(&platform_with(HashMap::new()), serde_json::to_vec(&body).unwrap().as_slice(), &req).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hi there");
        assert_eq!(messages[0].from_user, "u1");
    }

    #[test]
    fn missing_encrypt_field_is_rejected() {
        let mut config = HashMap::new();
        config.insert("encoding_aes_key".to_string(), serde_json::json!("0123456789abcdef0123456789abcdef0123456789a"));
        let platform = platform_with(config);
        let req = CallbackRequest::new(HashMap::new(), HashMap::new(), b"{}".to_vec());
        assert!(WecomBotHandler.verify(&platform, &req).is_err());
    }
}
