// WeCom (企业微信) customer-service webhook: XML body, SHA-1 signature over
// sorted (token, timestamp, nonce, Encrypt), AES-256-CBC decrypt keyed on
// `corp_id` as the expected receiveid.

use super::crypto::{compute_msg_signature, extract_xml_tag, wecom_decrypt};
use super::{CallbackRequest, NormalizedMessage, PlatformHandler, VerifyOutcome};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Platform, PlatformType};
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};

pub struct WecomHandler;

#[async_trait]
impl PlatformHandler for WecomHandler {
    fn platform_type(&self) -> PlatformType {
        PlatformType::Wecom
    }

    fn verify(&self, platform: &Platform, req: &CallbackRequest) -> EngineResult<VerifyOutcome> {
        let token = config_str(platform, "token").unwrap_or_default();
        let encoding_aes_key = config_str(platform, "encoding_aes_key")
            .ok_or_else(|| EngineError::config_missing("encoding_aes_key is not configured for this WeCom platform"))?;
        let corp_id = config_str(platform, "corp_id").unwrap_or_default();

        let msg_signature = req.query.get("msg_signature").cloned().unwrap_or_default();
        let timestamp = req.query.get("timestamp").cloned().unwrap_or_default();
        let nonce = req.query.get("nonce").cloned().unwrap_or_default();

        let body_text = req.body_text();
        let encrypt = extract_xml_tag(&body_text, "Encrypt")
            .ok_or_else(|| EngineError::invalid("WeCom callback body missing <Encrypt>"))?;

        let expected = compute_msg_signature(&token, &timestamp, &nonce, Some(&encrypt));
        if expected != msg_signature {
            return Err(EngineError::SignatureMismatch("wecom".into()));
        }

        let decrypted = wecom_decrypt(&encrypt, &encoding_aes_key, &corp_id)
            .ok_or_else(|| EngineError::invalid("failed to decrypt WeCom message"))?;
        Ok(VerifyOutcome::Proceed(decrypted.into_bytes()))
    }

    fn normalize(&self, _platform: &Platform, body: &[u8], _req: &CallbackRequest) -> EngineResult<Vec<NormalizedMessage>> {
        let xml = String::from_utf8_lossy(body);

        // kf_msg_or_event carries a pull token, not the message itself; the
        // actual content has to be fetched separately via the WeCom KF sync
        // API, which this engine does not call out to. Acknowledge and move on.
        if extract_xml_tag(&xml, "Event").as_deref() == Some("kf_msg_or_event") {
            info!("wecom kf_msg_or_event received, pull not implemented; acknowledging only");
            return Ok(vec![]);
        }

        let message_id = extract_xml_tag(&xml, "MsgId").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let from_user = match extract_xml_tag(&xml, "FromUserName") {
            Some(u) => u,
            None => {
                warn!("wecom message missing FromUserName, dropping");
                return Ok(vec![]);
            }
        };
        let msg_type = extract_xml_tag(&xml, "MsgType").unwrap_or_else(|| "text".into());
        let content = match msg_type.as_str() {
            "text" => extract_xml_tag(&xml, "Content").unwrap_or_default(),
            "image" => format!("[image] {}", extract_xml_tag(&xml, "PicUrl").unwrap_or_default()),
            "voice" => format!("[voice] {}", extract_xml_tag(&xml, "MediaId").unwrap_or_default()),
            other => format!("[{other}] {}", xml.chars().take(200).collect::<String>()),
        };

        Ok(vec![NormalizedMessage {
            message_id,
            from_user,
            chat_id: None,
            msg_type,
            content,
            received_at: Utc::now(),
            raw_payload: serde_json::json!({ "decrypted_xml": xml }),
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

    fn platform_with(config: HashMap<String, serde_json::Value>) -> Platform {
        Platform {
            id: PlatformId::new(),
            project_id: ProjectId::new(),
            platform_type: PlatformType::Wecom,
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
        config.insert("token".to_string(), serde_json::json!("tok"));
        config.insert("encoding_aes_key".to_string(), serde_json::json!("0123456789abcdef0123456789abcdef0123456789a"));
        config.insert("corp_id".to_string(), serde_json::json!("corp1"));
        let platform = platform_with(config);

        let mut query = HashMap::new();
        query.insert("msg_signature".to_string(), "deadbeef".to_string());
        query.insert("timestamp".to_string(), "123".to_string());
        query.insert("nonce".to_string(), "abc".to_string());
        let body = "<xml><Encrypt><![CDATA[ciphertext]]></Encrypt></xml>".as_bytes().to_vec();
        let req = CallbackRequest::new(HashMap::new(), query, body);

        let handler = WecomHandler;
        let result = handler.verify(&platform, &req);
        assert!(matches!(result, Err(EngineError::SignatureMismatch(_))));
    }

    #[test]
    fn normalize_extracts_text_message() {
        let handler = WecomHandler;
        let xml = r#"<xml><MsgId>m1</MsgId><FromUserName>wmUser1</FromUserName><MsgType>text</MsgType><Content>hello there</Content></xml>"#;
        let req = CallbackRequest::new(HashMap::new(), HashMap::new(), vec![]);
        let messages = handler.normalize(&platform_with(HashMap::new()), xml.as_bytes(), &req).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello there");
        assert_eq!(messages[0].from_user, "wmUser1");
    }
}
