// WuKongIM webhook: `?event=msg.notify` query param gates delivery; body is
// a JSON array of messages. Staff-authored messages (`from_uid` ending in
// `-staff`) are filtered out rather than re-ingested as visitor messages.

use super::{CallbackRequest, CallbackResponse, NormalizedMessage, PlatformHandler, VerifyOutcome};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Platform, PlatformType};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{TimeZone, Utc};
use log::warn;
use serde_json::Value;

pub struct WukongimHandler;

#[async_trait]
impl PlatformHandler for WukongimHandler {
    fn platform_type(&self) -> PlatformType {
        PlatformType::Wukongim
    }

    fn verify(&self, _platform: &Platform, req: &CallbackRequest) -> EngineResult<VerifyOutcome> {
        if req.query.get("event").map(String::as_str) != Some("msg.notify") {
            return Ok(VerifyOutcome::ShortCircuit(CallbackResponse::Ok));
        }
        Ok(VerifyOutcome::Proceed(req.body.clone()))
    }

    fn normalize(&self, _platform: &Platform, body: &[u8], _req: &CallbackRequest) -> EngineResult<Vec<NormalizedMessage>> {
        let entries: Vec<Value> = serde_json::from_slice(body).map_err(|_| EngineError::invalid("invalid WuKongIM message batch"))?;

        let mut messages = Vec::new();
        for entry in entries {
            let Some(msg) = normalize_one(&entry) else {
                warn!("skipping malformed or staff-authored WuKongIM message entry");
                continue;
            };
            messages.push(msg);
        }
        Ok(messages)
    }
}

fn normalize_one(entry: &Value) -> Option<NormalizedMessage> {
    let from_uid = entry.get("from_uid").and_then(|v| v.as_str())?.to_string();
    if from_uid.ends_with("-staff") {
        return None;
    }

    let message_id = entry
        .get("message_id")
        .or_else(|| entry.get("client_msg_no"))
        .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))?;
    let channel_id = entry.get("channel_id").and_then(|v| v.as_str())?.to_string();

    let payload_b64 = entry.get("payload").and_then(|v| v.as_str()).unwrap_or("");
    let payload_bytes = STANDARD.decode(payload_b64).ok()?;
    let payload_text = String::from_utf8_lossy(&payload_bytes).to_string();
    let payload_json: Value = serde_json::from_str(&payload_text).unwrap_or(Value::String(payload_text.clone()));
    let msg_type = payload_json.get("type").and_then(|v| v.as_str()).unwrap_or("text").to_string();
    let content = payload_json.get("content").and_then(|v| v.as_str()).map(str::to_string).unwrap_or(payload_text);

    let timestamp = entry.get("timestamp").and_then(|v| v.as_i64()).unwrap_or(0);
    let received_at = Utc.timestamp_opt(timestamp, 0).single().unwrap_or_else(Utc::now);

    Some(NormalizedMessage {
        message_id,
        from_user: from_uid,
        chat_id: Some(channel_id),
        msg_type,
        content,
        received_at,
        raw_payload: entry.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::ids::{PlatformId, ProjectId};
    use crate::atoms::types::AiMode;
    use std::collections::HashMap;

    fn platform() -> Platform {
        Platform {
            id: PlatformId::new(),
            project_id: ProjectId::new(),
            platform_type: PlatformType::Wukongim,
            api_key: "key".into(),
            config: HashMap::new(),
            is_active: true,
            ai_mode: AiMode::Auto,
            agent_ids: vec![],
            logo_path: None,
            fallback_to_ai_timeout: None,
            deleted_at: None,
        }
    }

    #[test]
    fn non_notify_event_short_circuits_ok() {
        let mut query = HashMap::new();
        query.insert("event".to_string(), "conn.status".to_string());
        let req = CallbackRequest::new(HashMap::new(), query, vec![]);
        match WukongimHandler.verify(&platform(), &req).unwrap() {
            VerifyOutcome::ShortCircuit(CallbackResponse::Ok) => {}
            _ => panic!("expected ok short-circuit"),
        }
    }

    #[test]
    fn normalize_filters_staff_and_skips_malformed() {
        let handler = WukongimHandler;
        let payload = STANDARD.encode(r#"{"type":"text","content":"hello"}"#);
        let entries = serde_json::json!([
            {"message_id": "1", "from_uid": "visitor1", "channel_id": "c1", "timestamp": 1_700_000_000, "payload": payload},
            {"message_id": "2", "from_uid": "agent1-staff", "channel_id": "c1", "timestamp": 1_700_000_000, "payload": payload},
            {"from_uid": "visitor2"},
        ]);
        let req = CallbackRequest::new(HashMap::new(), HashMap::new(), vec![]);
        let messages = handler.normalize(&platform(), serde_json::to_vec(&entries).unwrap().as_slice(), &req).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[0].from_user, "visitor1");
    }
}
