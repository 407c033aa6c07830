// ── Channel Fabric Adapter (C9) ─────────────────────────────────────────────
// Owns channel membership and system notifications. Every operation here is
// idempotent on the database side; the messaging substrate call that follows
// is best-effort — its failure is logged and never rolls back a committed
// membership change.

pub mod wukongim;

use crate::atoms::error::EngineResult;
use crate::atoms::ids::{ProjectId, StaffId, VisitorId};
use crate::atoms::types::{ChannelMember, ChannelMemberType};
use crate::engine::store::Store;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use log::warn;
use serde_json::Value;
use std::sync::Arc;

pub const CHANNEL_TYPE_CUSTOMER_SERVICE: i32 = 1;
pub const CHANNEL_TYPE_PROJECT_STAFF: i32 = 2;

pub const SYSTEM_MSG_STAFF_ASSIGNED: i32 = 1000;
pub const SYSTEM_MSG_SESSION_CLOSED: i32 = 1001;
pub const SYSTEM_MSG_SESSION_TRANSFERRED: i32 = 1002;

/// The messaging substrate boundary. Production wiring is `wukongim::WukongimClient`;
/// tests substitute a recording fake so the adapter's DB-vs-substrate sequencing can
/// be checked without a live server.
#[async_trait]
pub trait MessagingSubstrate: Send + Sync {
    async fn add_subscribers(&self, channel_id: &str, channel_type: i32, subscribers: &[String]) -> EngineResult<()>;
    async fn remove_subscribers(&self, channel_id: &str, channel_type: i32, subscribers: &[String]) -> EngineResult<()>;
    async fn send_system_message(
        &self,
        channel_id: &str,
        channel_type: i32,
        from_uid: &str,
        msg_type: i32,
        content: &str,
        extra: Value,
    ) -> EngineResult<()>;
    async fn send_event(&self, channel_id: &str, channel_type: i32, event: &str, data: Value, client_msg_no: &str) -> EngineResult<()>;
    async fn search(&self, payload: Value) -> EngineResult<Value>;
    async fn sync_conversations(&self, payload: Value) -> EngineResult<Value>;
    async fn set_unread(&self, payload: Value) -> EngineResult<()>;
    async fn kick_device(&self, payload: Value) -> EngineResult<()>;
}

pub fn build_visitor_channel_id(visitor_id: VisitorId) -> String {
    format!("{visitor_id}-visitor")
}

pub fn build_project_staff_channel_id(project_id: ProjectId) -> String {
    format!("{project_id}-prj")
}

fn staff_uid(staff_id: StaffId) -> String {
    format!("{staff_id}-staff")
}

pub struct ChannelFabric {
    store: Arc<Store>,
    substrate: Arc<dyn MessagingSubstrate>,
}

impl ChannelFabric {
    pub fn new(store: Arc<Store>, substrate: Arc<dyn MessagingSubstrate>) -> Self {
        Self { store, substrate }
    }

    /// Seats `staff_id` as the sole operator on `visitor_id`'s channel: any other
    /// operator row is soft-deleted first, then the new row is (idempotently)
    /// inserted. A staff-assigned system message follows only when AI handling
    /// has been turned off for the visitor and notification wasn't suppressed.
    pub async fn seat_operator(
        &self,
        project_id: ProjectId,
        visitor_id: VisitorId,
        staff_id: StaffId,
        ai_disabled: bool,
        send_notification: bool,
    ) -> EngineResult<()> {
        let channel_id = build_visitor_channel_id(visitor_id);
        let new_member_id = staff_id.to_string();

        let existing = self.store.list_channel_members(project_id, &channel_id)?;
        for old in existing.iter().filter(|m| m.member_type == ChannelMemberType::Staff && m.member_id != new_member_id) {
            if let Err(e) = self.store.remove_channel_member(project_id, &channel_id, &old.member_id) {
                warn!("failed to soft-delete old channel member {}: {e}", old.member_id);
            }
            if let Err(e) = self
                .substrate
                .remove_subscribers(&channel_id, CHANNEL_TYPE_CUSTOMER_SERVICE, &[format!("{}-staff", old.member_id)])
                .await
            {
                warn!("failed to remove old staff {} from messaging substrate: {e}", old.member_id);
            }
        }

        let member = ChannelMember {
            project_id,
            channel_id: channel_id.clone(),
            channel_type: CHANNEL_TYPE_CUSTOMER_SERVICE,
            member_id: new_member_id,
            member_type: ChannelMemberType::Staff,
            deleted_at: None,
        };
        self.store.seat_channel_member(&member)?;

        let uid = staff_uid(staff_id);
        if let Err(e) = self.substrate.add_subscribers(&channel_id, CHANNEL_TYPE_CUSTOMER_SERVICE, &[uid.clone()]).await {
            warn!("failed to add staff {staff_id} to messaging substrate: {e}");
        }

        if ai_disabled && send_notification {
            match self.store.get_staff(project_id, staff_id) {
                Ok(staff) => {
                    let display = staff.nickname.clone().unwrap_or_else(|| staff.name.clone());
                    let extra = serde_json::json!([{"uid": uid, "name": display}]);
                    if let Err(e) = self
                        .substrate
                        .send_system_message(&channel_id, CHANNEL_TYPE_CUSTOMER_SERVICE, &uid, SYSTEM_MSG_STAFF_ASSIGNED, "你已接入人工客服", extra)
                        .await
                    {
                        warn!("failed to send staff-assigned system message: {e}");
                    }
                }
                Err(e) => warn!("could not load staff {staff_id} for assignment notification: {e}"),
            }
        }

        Ok(())
    }

    /// Emits a session-closed or session-transferred system message to the
    /// visitor's channel. `extra` carries the staff uid/name pairs the client
    /// renders alongside the message.
    pub async fn emit_session_system_message(
        &self,
        visitor_id: VisitorId,
        msg_type: i32,
        from_uid: &str,
        content: &str,
        extra: Value,
    ) -> EngineResult<()> {
        let channel_id = build_visitor_channel_id(visitor_id);
        self.substrate
            .send_system_message(&channel_id, CHANNEL_TYPE_CUSTOMER_SERVICE, from_uid, msg_type, content, extra)
            .await
    }

    /// Emits a queue-updated event to the project's staff channel, used after
    /// every enqueue/dequeue so connected staff clients can refresh their
    /// waiting-list badge.
    pub async fn emit_queue_updated(&self, project_id: ProjectId, waiting_count: i32, client_msg_no: &str) -> EngineResult<()> {
        let channel_id = build_project_staff_channel_id(project_id);
        let data = serde_json::json!({"project_id": project_id.to_string(), "waiting_count": waiting_count});
        self.substrate
            .send_event(&channel_id, CHANNEL_TYPE_PROJECT_STAFF, "queue_updated", data, client_msg_no)
            .await
    }

    /// Emits a visitor presence update (online/offline) to the project's staff channel.
    pub async fn emit_presence_update(&self, project_id: ProjectId, visitor_id: VisitorId, is_online: bool, client_msg_no: &str) -> EngineResult<()> {
        let channel_id = build_project_staff_channel_id(project_id);
        let data = serde_json::json!({"visitor_id": visitor_id.to_string(), "is_online": is_online});
        self.substrate
            .send_event(&channel_id, CHANNEL_TYPE_PROJECT_STAFF, "presence_update", data, client_msg_no)
            .await
    }

    /// Thin pass-through: decode the base64-JSON request, forward it, re-encode
    /// the response the same way. Shared shape for search/sync/unread/kick.
    pub async fn search(&self, payload_b64: &str) -> EngineResult<String> {
        let payload = decode_b64_json(payload_b64)?;
        let result = self.substrate.search(payload).await?;
        encode_b64_json(&result)
    }

    pub async fn sync_conversations(&self, payload_b64: &str) -> EngineResult<String> {
        let payload = decode_b64_json(payload_b64)?;
        let result = self.substrate.sync_conversations(payload).await?;
        encode_b64_json(&result)
    }

    pub async fn set_unread(&self, payload_b64: &str) -> EngineResult<()> {
        let payload = decode_b64_json(payload_b64)?;
        self.substrate.set_unread(payload).await
    }

    pub async fn kick_device(&self, payload_b64: &str) -> EngineResult<()> {
        let payload = decode_b64_json(payload_b64)?;
        self.substrate.kick_device(payload).await
    }
}

fn decode_b64_json(payload_b64: &str) -> EngineResult<Value> {
    use crate::atoms::error::EngineError;
    let bytes = STANDARD.decode(payload_b64).map_err(|e| EngineError::invalid(format!("invalid base64 payload: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| EngineError::invalid(format!("invalid JSON payload: {e}")))
}

fn encode_b64_json(value: &Value) -> EngineResult<String> {
    use crate::atoms::error::EngineError;
    let bytes = serde_json::to_vec(value).map_err(|e| EngineError::invalid(format!("failed to encode response: {e}")))?;
    Ok(STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSubstrate {
        added: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
        messages: Mutex<Vec<(i32, String)>>,
    }

    #[async_trait]
    impl MessagingSubstrate for RecordingSubstrate {
        async fn add_subscribers(&self, _channel_id: &str, _channel_type: i32, subscribers: &[String]) -> EngineResult<()> {
            self.added.lock().extend(subscribers.iter().cloned());
            Ok(())
        }
        async fn remove_subscribers(&self, _channel_id: &str, _channel_type: i32, subscribers: &[String]) -> EngineResult<()> {
            self.removed.lock().extend(subscribers.iter().cloned());
            Ok(())
        }
        async fn send_system_message(
            &self,
            _channel_id: &str,
            _channel_type: i32,
            _from_uid: &str,
            msg_type: i32,
            content: &str,
            _extra: Value,
        ) -> EngineResult<()> {
            self.messages.lock().push((msg_type, content.to_string()));
            Ok(())
        }
        async fn send_event(&self, _channel_id: &str, _channel_type: i32, _event: &str, _data: Value, _client_msg_no: &str) -> EngineResult<()> {
            Ok(())
        }
        async fn search(&self, payload: Value) -> EngineResult<Value> {
            Ok(payload)
        }
        async fn sync_conversations(&self, payload: Value) -> EngineResult<Value> {
            Ok(payload)
        }
        async fn set_unread(&self, _payload: Value) -> EngineResult<()> {
            Ok(())
        }
        async fn kick_device(&self, _payload: Value) -> EngineResult<()> {
            Ok(())
        }
    }

    fn sample_staff(project_id: ProjectId, id: StaffId) -> crate::atoms::types::Staff {
        crate::atoms::types::Staff {
            id,
            project_id,
            status: "online".into(),
            is_active: true,
            service_paused: false,
            role: "user".into(),
            name: "Alice".into(),
            nickname: None,
            description: None,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn seating_replaces_prior_operator_and_notifies_when_ai_disabled() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let project_id = ProjectId::new();
        let visitor_id = VisitorId::new();
        let old_staff = StaffId::new();
        let new_staff = StaffId::new();
        store.create_staff(&sample_staff(project_id, old_staff)).unwrap();
        store.create_staff(&sample_staff(project_id, new_staff)).unwrap();

        let substrate = Arc::new(RecordingSubstrate::default());
        let fabric = ChannelFabric::new(store.clone(), substrate.clone());
        fabric.seat_operator(project_id, visitor_id, old_staff, false, true).await.unwrap();
        fabric.seat_operator(project_id, visitor_id, new_staff, true, true).await.unwrap();

        let channel_id = build_visitor_channel_id(visitor_id);
        let members = store.list_channel_members(project_id, &channel_id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].member_id, new_staff.to_string());
        assert_eq!(substrate.removed.lock().len(), 1);
        assert_eq!(substrate.messages.lock().len(), 1);
        assert_eq!(substrate.messages.lock()[0].0, SYSTEM_MSG_STAFF_ASSIGNED);
    }

    #[tokio::test]
    async fn seating_is_idempotent_for_the_same_operator() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let project_id = ProjectId::new();
        let visitor_id = VisitorId::new();
        let staff_id = StaffId::new();
        store.create_staff(&sample_staff(project_id, staff_id)).unwrap();

        let fabric = ChannelFabric::new(store.clone(), Arc::new(RecordingSubstrate::default()));
        fabric.seat_operator(project_id, visitor_id, staff_id, false, false).await.unwrap();
        fabric.seat_operator(project_id, visitor_id, staff_id, false, false).await.unwrap();

        let channel_id = build_visitor_channel_id(visitor_id);
        assert_eq!(store.list_channel_members(project_id, &channel_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pass_through_round_trips_base64_json() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let fabric = ChannelFabric::new(store, Arc::new(RecordingSubstrate::default()));
        let payload = STANDARD.encode(br#"{"query":"hello"}"#);
        let response = fabric.search(&payload).await.unwrap();
        let decoded = decode_b64_json(&response).unwrap();
        assert_eq!(decoded["query"], "hello");
    }
}
