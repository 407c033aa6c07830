// ── Atoms: Assignment-flow transient types ─────────────────────────────────
// These are request/response shapes for the assignment engine (C8) that are
// never persisted directly — they carry intermediate decision state through
// `transfer_to_staff` and its helpers.

use crate::atoms::ids::*;
use crate::atoms::types::AssignmentSource;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    pub source: AssignmentSource,
    pub visitor_message: Option<String>,
    pub assigned_by_staff_id: Option<StaffId>,
    pub target_staff_id: Option<StaffId>,
    pub session_id: Option<SessionId>,
    pub platform_id: Option<PlatformId>,
    pub notes: Option<String>,
    pub skip_queue_status_check: bool,
    /// None = keep current, Some(true/false) = set explicitly.
    pub ai_disabled: Option<bool>,
    pub add_to_queue_if_no_staff: bool,
    pub send_notification: bool,
}

impl Default for AssignmentSource {
    fn default() -> Self {
        AssignmentSource::Manual
    }
}

#[derive(Debug, Clone)]
pub struct StaffCandidate {
    pub id: StaffId,
    pub name: String,
    pub nickname: Option<String>,
    pub description: Option<String>,
    pub status: String,
    pub current_chat_count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct AssignmentOutcome {
    pub assigned_staff_id: Option<StaffId>,
    pub candidate_staff_ids: Vec<StaffId>,
    pub llm_response: Option<String>,
    pub llm_reasoning: Option<String>,
    pub candidate_scores: Option<serde_json::Value>,
    pub model_used: Option<String>,
    pub prompt_used: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    pub success: bool,
    pub session_id: Option<SessionId>,
    pub assignment_history_id: Option<AssignmentHistoryId>,
    pub assigned_staff_id: Option<StaffId>,
    #[serde(default)]
    pub candidate_staff_ids: Vec<StaffId>,
    pub waiting_queue_id: Option<WaitingQueueId>,
    pub queue_position: Option<i32>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_transfer_options_queue_and_notify() {
        let opts = TransferOptions { add_to_queue_if_no_staff: true, send_notification: true, ..Default::default() };
        assert!(opts.add_to_queue_if_no_staff);
        assert!(opts.send_notification);
        assert!(opts.target_staff_id.is_none());
    }
}
