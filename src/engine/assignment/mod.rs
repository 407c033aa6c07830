// ── Assignment Engine (C8) ──────────────────────────────────────────────────
// `transfer_to_staff` runs the full target -> candidates -> last-operator
// affinity -> LLM -> load-balance -> queue-or-refuse policy chain and commits
// its outcome as one DB transaction via `Store::commit_assignment` /
// `Store::commit_enqueue`.

pub mod service_window;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::ids::{ProjectId, StaffId, VisitorId, WaitingQueueId};
use crate::atoms::routing_types::{AssignmentOutcome, TransferOptions, TransferResult};
use crate::atoms::types::{AssignmentSource, QueueStatus, Staff, VisitorAssignmentHistory, VisitorAssignmentRule};
use crate::engine::channel_fabric::ChannelFabric;
use crate::engine::llm::LlmClient;
use crate::engine::store::Store;
use chrono::{Duration, Utc};
use log::{info, warn};
use std::sync::Arc;

const DEFAULT_QUEUE_SOURCE: &str = "no_staff";

pub struct AssignmentEngine {
    store: Arc<Store>,
    default_queue_timeout_minutes: i64,
    channel_fabric: Option<Arc<ChannelFabric>>,
}

impl AssignmentEngine {
    pub fn new(store: Arc<Store>, default_queue_timeout_minutes: i64) -> Self {
        Self { store, default_queue_timeout_minutes, channel_fabric: None }
    }

    /// Attaches the Channel Fabric Adapter so a successful assignment also
    /// seats the operator in the visitor's channel. Assignment still succeeds
    /// without one (used in tests and any deployment without the substrate
    /// wired up yet); the seat call is skipped entirely, not retried later.
    pub fn with_channel_fabric(mut self, channel_fabric: Arc<ChannelFabric>) -> Self {
        self.channel_fabric = Some(channel_fabric);
        self
    }

    pub async fn transfer_to_staff(
        &self,
        project_id: ProjectId,
        visitor_id: VisitorId,
        opts: TransferOptions,
        llm: Option<&LlmClient>,
    ) -> EngineResult<TransferResult> {
        let visitor = self.store.get_visitor(project_id, visitor_id)?;
        let session = self.store.get_or_create_open_session(project_id, visitor_id, opts.platform_id)?;
        if let Some(ai_disabled) = opts.ai_disabled {
            self.store.set_visitor_service_status(project_id, visitor_id, visitor.service_status.clone(), Some(ai_disabled))?;
        }
        let rule = self.store.get_assignment_rule(project_id)?;

        // Step 1: a named target operator, if it still exists, is assigned
        // directly without going through candidate filtering.
        if let Some(target_id) = opts.target_staff_id {
            match self.store.get_staff(project_id, target_id) {
                Ok(staff) => {
                    let outcome = AssignmentOutcome { candidate_staff_ids: vec![staff.id], ..Default::default() };
                    return self.finalize(project_id, visitor_id, session.id, staff.id, &opts, outcome, None).await;
                }
                Err(_) => warn!("target staff {target_id} not found for project {project_id}, falling back to auto-assignment"),
            }
        }

        // Step 2: candidate pool, gated by service window and load cap.
        let candidates = self.available_candidates(project_id, rule.as_ref())?;
        let mut outcome = AssignmentOutcome {
            candidate_staff_ids: candidates.iter().map(|(s, _)| s.id).collect(),
            ..Default::default()
        };

        if candidates.is_empty() {
            return self.queue_or_refuse(project_id, visitor_id, session.id, &opts, rule.as_ref(), outcome).await;
        }

        // Step 3: last-operator affinity.
        if let Some(last_staff) = self.store.last_assigned_staff(project_id, visitor_id)? {
            if candidates.iter().any(|(s, _)| s.id.0 == last_staff.0) {
                info!("visitor {visitor_id} reassigned to last-serving staff {last_staff}");
                return self.finalize(project_id, visitor_id, session.id, last_staff, &opts, outcome, None).await;
            }
        }

        // Step 4/5: LLM resolution among multiple candidates, falling back to
        // load-balance on any failure; single candidate skips straight there.
        let chosen = if candidates.len() > 1 {
            match (rule.as_ref(), llm) {
                (Some(r), Some(client)) if r.llm_assignment_enabled => {
                    self.resolve_via_llm(r, &visitor, opts.visitor_message.as_deref(), &candidates, client, &mut outcome).await
                }
                _ => load_balance(&candidates),
            }
        } else {
            load_balance(&candidates)
        };

        let Some(chosen) = chosen else {
            return self.queue_or_refuse(project_id, visitor_id, session.id, &opts, rule.as_ref(), outcome).await;
        };
        self.finalize(project_id, visitor_id, session.id, chosen, &opts, outcome, None).await
    }

    fn available_candidates(
        &self,
        project_id: ProjectId,
        rule: Option<&VisitorAssignmentRule>,
    ) -> EngineResult<Vec<(Staff, i64)>> {
        let within_window = rule.map(|r| service_window::in_service(r, Utc::now())).unwrap_or(true);
        if !within_window {
            return Ok(Vec::new());
        }
        let ranked = self.store.list_assignable_staff_by_load(project_id)?;
        let cap = rule.and_then(|r| r.max_concurrent_chats);
        Ok(ranked.into_iter().filter(|(_, count)| cap.map(|c| *count < c as i64).unwrap_or(true)).collect())
    }

    /// Builds the structured selection prompt, calls the LLM, and validates
    /// the returned id is actually in the candidate set; any failure along
    /// the way falls back to load-balancing rather than failing the transfer.
    async fn resolve_via_llm(
        &self,
        rule: &VisitorAssignmentRule,
        visitor: &crate::atoms::types::Visitor,
        visitor_message: Option<&str>,
        candidates: &[(Staff, i64)],
        client: &LlmClient,
        outcome: &mut AssignmentOutcome,
    ) -> Option<StaffId> {
        let staff_info = candidates
            .iter()
            .enumerate()
            .map(|(i, (s, count))| {
                let name = s.nickname.clone().unwrap_or_else(|| s.name.clone());
                let desc = s.description.clone().unwrap_or_else(|| "No description available".into());
                format!("{}. ID: {}\n   Name: {name}\n   Description: {desc}\n   Current chats: {count}", i + 1, s.id)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let visitor_name = visitor.name.clone().or_else(|| visitor.nickname.clone()).unwrap_or_else(|| "Unknown".into());
        let mut visitor_info = format!("Name: {visitor_name}");
        if let Some(msg) = visitor_message {
            visitor_info.push_str(&format!("\nMessage: {msg}"));
        }

        let system_prompt = rule.effective_prompt.clone();
        let user_prompt = format!(
            "Select the best-suited support operator for this visitor.\n\n\
             ## Visitor\n{visitor_info}\n\n## Available operators\n{staff_info}\n\n\
             Respond with JSON only: {{\"selected_staff_id\": \"...\", \"reasoning\": \"...\"}}"
        );
        outcome.prompt_used = Some(format!("System: {system_prompt}\n\nUser: {user_prompt}"));
        outcome.model_used = rule.model.clone();

        let response = match client.complete(&system_prompt, &user_prompt).await {
            Ok(r) => r,
            Err(e) => {
                warn!("llm assignment call failed, falling back to load balancing: {e}");
                return load_balance(candidates);
            }
        };
        outcome.llm_response = Some(response.clone());

        let candidates_ids: Vec<StaffId> = candidates.iter().map(|(s, _)| s.id).collect();
        match parse_llm_selection(&response) {
            Some((selected, reasoning)) if candidates_ids.iter().any(|id| *id == selected) => {
                outcome.llm_reasoning = reasoning;
                Some(selected)
            }
            Some((_, reasoning)) => {
                warn!("llm returned a staff id outside the candidate set, falling back to load balancing");
                outcome.llm_reasoning = reasoning.map(|r| format!("LLM returned invalid id, fallback to load balancing. Original: {r}"));
                load_balance(candidates)
            }
            None => {
                warn!("could not parse llm assignment response, falling back to load balancing");
                outcome.llm_reasoning = Some("Failed to parse LLM response, fallback to load balancing".into());
                load_balance(candidates)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        project_id: ProjectId,
        visitor_id: VisitorId,
        session_id: crate::atoms::ids::SessionId,
        staff_id: StaffId,
        opts: &TransferOptions,
        outcome: AssignmentOutcome,
        queue_id: Option<WaitingQueueId>,
    ) -> EngineResult<TransferResult> {
        let session = self.store.get_or_create_open_session(project_id, visitor_id, opts.platform_id)?;
        let previous_staff_id = session.staff_id;

        let history = VisitorAssignmentHistory {
            id: crate::atoms::ids::AssignmentHistoryId::new(),
            project_id,
            visitor_id,
            session_id,
            assigned_staff_id: Some(staff_id),
            previous_staff_id,
            assigned_by_staff_id: opts.assigned_by_staff_id,
            source: opts.source.clone(),
            visitor_message: opts.visitor_message.clone(),
            notes: opts.notes.clone(),
            model_used: outcome.model_used.clone(),
            prompt_used: outcome.prompt_used.clone(),
            llm_response: outcome.llm_response.clone(),
            reasoning: outcome.llm_reasoning.clone(),
            candidate_staff_ids: outcome.candidate_staff_ids.clone(),
            candidate_scores: outcome.candidate_scores.clone(),
            created_at: Utc::now(),
        };

        self.store.commit_assignment(project_id, session_id, staff_id, &history, queue_id)?;

        if let Some(fabric) = &self.channel_fabric {
            let ai_disabled = self.store.get_visitor(project_id, visitor_id).map(|v| v.ai_disabled).unwrap_or(false);
            if let Err(e) = fabric.seat_operator(project_id, visitor_id, staff_id, ai_disabled, opts.send_notification).await {
                warn!("channel fabric failed to seat operator {staff_id} for visitor {visitor_id}: {e}");
            }
        }

        Ok(TransferResult {
            success: true,
            session_id: Some(session_id),
            assignment_history_id: Some(history.id),
            assigned_staff_id: Some(staff_id),
            candidate_staff_ids: outcome.candidate_staff_ids,
            waiting_queue_id: queue_id,
            queue_position: None,
            message: "assigned".into(),
        })
    }

    /// No candidates available: enqueue (at most one WAITING row per
    /// visitor) when the caller allows it, otherwise report "awaiting
    /// assignment" without touching the queue.
    async fn queue_or_refuse(
        &self,
        project_id: ProjectId,
        visitor_id: VisitorId,
        session_id: crate::atoms::ids::SessionId,
        opts: &TransferOptions,
        rule: Option<&VisitorAssignmentRule>,
        outcome: AssignmentOutcome,
    ) -> EngineResult<TransferResult> {
        if !opts.add_to_queue_if_no_staff {
            return Ok(TransferResult {
                success: false,
                session_id: Some(session_id),
                assignment_history_id: None,
                assigned_staff_id: None,
                candidate_staff_ids: outcome.candidate_staff_ids,
                waiting_queue_id: None,
                queue_position: None,
                message: "awaiting assignment".into(),
            });
        }

        if let Some(existing) = self.store.list_waiting(project_id)?.into_iter().find(|w| w.visitor_id.0 == visitor_id.0) {
            return Ok(TransferResult {
                success: true,
                session_id: Some(session_id),
                assignment_history_id: None,
                assigned_staff_id: None,
                candidate_staff_ids: outcome.candidate_staff_ids,
                waiting_queue_id: Some(existing.id),
                queue_position: Some(existing.position),
                message: "already queued".into(),
            });
        }

        let timeout_minutes = rule.and_then(|r| r.queue_wait_timeout_minutes).unwrap_or(self.default_queue_timeout_minutes);
        let entry = self.store.commit_enqueue(
            project_id,
            visitor_id,
            session_id,
            DEFAULT_QUEUE_SOURCE,
            0,
            opts.visitor_message.as_deref(),
            Some("no available staff"),
            Utc::now() + Duration::minutes(timeout_minutes),
            opts.ai_disabled,
        )?;

        if let Some(fabric) = &self.channel_fabric {
            let client_msg_no = format!("queue-{}", entry.id);
            if let Err(e) = fabric.emit_queue_updated(project_id, entry.position, &client_msg_no).await {
                warn!("channel fabric failed to emit queue-updated event for project {project_id}: {e}");
            }
        }

        Ok(TransferResult {
            success: true,
            session_id: Some(session_id),
            assignment_history_id: None,
            assigned_staff_id: None,
            candidate_staff_ids: outcome.candidate_staff_ids,
            waiting_queue_id: Some(entry.id),
            queue_position: Some(entry.position),
            message: "queued".into(),
        })
    }

    pub fn cancel_visitor_from_queue(&self, project_id: ProjectId, queue_id: WaitingQueueId) -> EngineResult<()> {
        self.store.set_queue_status(project_id, queue_id, QueueStatus::Cancelled)
    }

    /// Pops the highest-priority, lowest-position waiting row and runs it
    /// through the same transfer flow pinned to `staff_id`.
    pub async fn assign_from_waiting_queue(
        &self,
        project_id: ProjectId,
        staff_id: StaffId,
        queue_id: Option<WaitingQueueId>,
        llm: Option<&LlmClient>,
    ) -> EngineResult<TransferResult> {
        let mut waiting = self.store.list_waiting(project_id)?;
        let entry = match queue_id {
            Some(id) => waiting.into_iter().find(|w| w.id.0 == id.0).ok_or_else(|| EngineError::not_found("waiting_queue_entry"))?,
            None => {
                if waiting.is_empty() {
                    return Err(EngineError::not_found("waiting_queue_entry"));
                }
                waiting.remove(0)
            }
        };

        let opts = TransferOptions {
            source: AssignmentSource::Manual,
            visitor_message: entry.visitor_message.clone(),
            target_staff_id: Some(staff_id),
            session_id: Some(entry.session_id),
            ai_disabled: entry.ai_disabled,
            add_to_queue_if_no_staff: false,
            send_notification: true,
            ..Default::default()
        };
        self.transfer_to_staff(project_id, entry.visitor_id, opts, llm).await
    }
}

fn load_balance(candidates: &[(Staff, i64)]) -> Option<StaffId> {
    candidates.iter().min_by_key(|(s, count)| (*count, s.id.0)).map(|(s, _)| s.id)
}

fn parse_llm_selection(response: &str) -> Option<(StaffId, Option<String>)> {
    let json_slice = extract_json_block(response);
    let value: serde_json::Value = serde_json::from_str(json_slice).ok()?;
    let selected = value.get("selected_staff_id")?.as_str()?;
    let staff_id = StaffId::parse(selected).ok()?;
    let reasoning = value.get("reasoning").and_then(|v| v.as_str()).map(String::from);
    Some((staff_id, reasoning))
}

fn extract_json_block(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
    }
    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
    }
    text.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::ids::StaffId;

    fn staff(id: StaffId, count: i64) -> (Staff, i64) {
        (
            Staff {
                id,
                project_id: ProjectId::new(),
                status: "online".into(),
                is_active: true,
                service_paused: false,
                role: "user".into(),
                name: "Operator".into(),
                nickname: None,
                description: None,
                deleted_at: None,
            },
            count,
        )
    }

    #[test]
    fn load_balance_picks_lowest_count_then_lowest_id() {
        let a = StaffId::new();
        let b = StaffId::new();
        let (lower_id, higher_id) = if a.0 < b.0 { (a, b) } else { (b, a) };
        let candidates = vec![staff(higher_id, 1), staff(lower_id, 1)];
        assert_eq!(load_balance(&candidates), Some(lower_id));
    }

    #[test]
    fn load_balance_prefers_fewer_chats_over_id_order() {
        let busy = StaffId::new();
        let idle = StaffId::new();
        let candidates = vec![staff(busy, 5), staff(idle, 0)];
        assert_eq!(load_balance(&candidates), Some(idle));
    }

    #[test]
    fn parses_plain_json_selection() {
        let text = r#"{"selected_staff_id": "not-a-uuid", "reasoning": "closest fit"}"#;
        assert!(parse_llm_selection(text).is_none());
    }

    #[test]
    fn parses_fenced_json_selection() {
        let id = StaffId::new();
        let text = format!("```json\n{{\"selected_staff_id\": \"{id}\", \"reasoning\": \"best fit\"}}\n```");
        let (parsed, reasoning) = parse_llm_selection(&text).unwrap();
        assert_eq!(parsed.0, id.0);
        assert_eq!(reasoning.as_deref(), Some("best fit"));
    }
}
