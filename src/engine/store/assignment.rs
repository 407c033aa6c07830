use super::{enum_from_str, enum_str, from_json, map_missing, parse_ts, to_json, to_ts, Store};
use crate::atoms::error::EngineResult;
use crate::atoms::ids::{AssignmentHistoryId, ProjectId, SessionId, StaffId, VisitorId, WaitingQueueId};
use crate::atoms::types::{
    AssignmentSource, QueueStatus, VisitorAssignmentHistory, VisitorAssignmentRule, VisitorWaitingQueue,
};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

fn row_to_rule(row: &Row) -> rusqlite::Result<VisitorAssignmentRule> {
    let weekdays_raw: Option<String> = row.get("service_weekdays")?;
    Ok(VisitorAssignmentRule {
        project_id: row.get("project_id")?,
        max_concurrent_chats: row.get("max_concurrent_chats")?,
        service_weekdays: weekdays_raw.map(|s| from_json(&s)),
        service_start_time: row.get("service_start_time")?,
        service_end_time: row.get("service_end_time")?,
        timezone: row.get("timezone")?,
        llm_assignment_enabled: row.get::<_, i64>("llm_assignment_enabled")? != 0,
        ai_provider_id: row.get("ai_provider_id")?,
        model: row.get("model")?,
        effective_prompt: row.get("effective_prompt")?,
        queue_wait_timeout_minutes: row.get("queue_wait_timeout_minutes")?,
    })
}

fn row_to_queue_entry(row: &Row) -> rusqlite::Result<VisitorWaitingQueue> {
    let status_raw: String = row.get("status")?;
    let expired_raw: String = row.get("expired_at")?;
    let created_raw: String = row.get("created_at")?;
    let ai_disabled_raw: Option<i64> = row.get("ai_disabled")?;
    Ok(VisitorWaitingQueue {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        visitor_id: row.get("visitor_id")?,
        session_id: row.get("session_id")?,
        source: row.get("source")?,
        position: row.get("position")?,
        priority: row.get("priority")?,
        status: enum_from_str::<QueueStatus>(&status_raw).unwrap_or(QueueStatus::Waiting),
        visitor_message: row.get("visitor_message")?,
        reason: row.get("reason")?,
        expired_at: parse_ts(&expired_raw).unwrap_or_else(|_| Utc::now()),
        ai_disabled: ai_disabled_raw.map(|v| v != 0),
        created_at: parse_ts(&created_raw).unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_history(row: &Row) -> rusqlite::Result<VisitorAssignmentHistory> {
    let source_raw: String = row.get("source")?;
    let candidates_raw: String = row.get("candidate_staff_ids")?;
    let scores_raw: Option<String> = row.get("candidate_scores")?;
    let created_raw: String = row.get("created_at")?;
    Ok(VisitorAssignmentHistory {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        visitor_id: row.get("visitor_id")?,
        session_id: row.get("session_id")?,
        assigned_staff_id: row.get("assigned_staff_id")?,
        previous_staff_id: row.get("previous_staff_id")?,
        assigned_by_staff_id: row.get("assigned_by_staff_id")?,
        source: enum_from_str::<AssignmentSource>(&source_raw).unwrap_or(AssignmentSource::Manual),
        visitor_message: row.get("visitor_message")?,
        notes: row.get("notes")?,
        model_used: row.get("model_used")?,
        prompt_used: row.get("prompt_used")?,
        llm_response: row.get("llm_response")?,
        reasoning: row.get("reasoning")?,
        candidate_staff_ids: from_json(&candidates_raw),
        candidate_scores: scores_raw.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_ts(&created_raw).unwrap_or_else(|_| Utc::now()),
    })
}

impl Store {
    pub fn get_assignment_rule(&self, project_id: ProjectId) -> EngineResult<Option<VisitorAssignmentRule>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM visitor_assignment_rules WHERE project_id = ?1",
            params![project_id],
            row_to_rule,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn upsert_assignment_rule(&self, rule: &VisitorAssignmentRule) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO visitor_assignment_rules (project_id, max_concurrent_chats, service_weekdays,
                service_start_time, service_end_time, timezone, llm_assignment_enabled, ai_provider_id, model,
                effective_prompt, queue_wait_timeout_minutes)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
             ON CONFLICT(project_id) DO UPDATE SET max_concurrent_chats=excluded.max_concurrent_chats,
                service_weekdays=excluded.service_weekdays, service_start_time=excluded.service_start_time,
                service_end_time=excluded.service_end_time, timezone=excluded.timezone,
                llm_assignment_enabled=excluded.llm_assignment_enabled, ai_provider_id=excluded.ai_provider_id,
                model=excluded.model, effective_prompt=excluded.effective_prompt,
                queue_wait_timeout_minutes=excluded.queue_wait_timeout_minutes",
            params![
                rule.project_id, rule.max_concurrent_chats, rule.service_weekdays.as_ref().map(to_json),
                rule.service_start_time, rule.service_end_time, rule.timezone, rule.llm_assignment_enabled as i64,
                rule.ai_provider_id, rule.model, rule.effective_prompt, rule.queue_wait_timeout_minutes,
            ],
        )?;
        Ok(())
    }

    pub fn list_waiting(&self, project_id: ProjectId) -> EngineResult<Vec<VisitorWaitingQueue>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM visitor_waiting_queue WHERE project_id = ?1 AND status = 'WAITING' ORDER BY priority DESC, position ASC",
        )?;
        let rows = stmt.query_map(params![project_id], row_to_queue_entry)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn set_queue_status(&self, project_id: ProjectId, id: WaitingQueueId, status: QueueStatus) -> EngineResult<()> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE visitor_waiting_queue SET status = ?1 WHERE project_id = ?2 AND id = ?3",
            params![enum_str(&status), project_id, id],
        )?;
        if affected == 0 {
            return Err(map_missing("waiting_queue_entry", rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }

    /// Expires waiting entries whose `expired_at` has passed; returns their ids.
    pub fn expire_stale_waiting(&self, project_id: ProjectId, now: chrono::DateTime<Utc>) -> EngineResult<Vec<WaitingQueueId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM visitor_waiting_queue WHERE project_id = ?1 AND status = 'WAITING' AND expired_at <= ?2",
        )?;
        let ids: Vec<WaitingQueueId> = stmt
            .query_map(params![project_id, to_ts(now)], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        conn.execute(
            "UPDATE visitor_waiting_queue SET status = 'EXPIRED' WHERE project_id = ?1 AND status = 'WAITING' AND expired_at <= ?2",
            params![project_id, to_ts(now)],
        )?;
        Ok(ids)
    }

    #[allow(dead_code)]
    pub fn list_assignment_history(&self, project_id: ProjectId, visitor_id: VisitorId) -> EngineResult<Vec<VisitorAssignmentHistory>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM visitor_assignment_history WHERE project_id = ?1 AND visitor_id = ?2 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![project_id, visitor_id], row_to_history)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Staff id of the visitor's most recent non-null assignment, used for
    /// last-operator-affinity before falling back to load balancing.
    pub fn last_assigned_staff(&self, project_id: ProjectId, visitor_id: VisitorId) -> EngineResult<Option<StaffId>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT assigned_staff_id FROM visitor_assignment_history
             WHERE project_id = ?1 AND visitor_id = ?2 AND assigned_staff_id IS NOT NULL
             ORDER BY created_at DESC LIMIT 1",
            params![project_id, visitor_id],
            |row| row.get(0),
        )
        .optional()
        .map(Option::flatten)
        .map_err(Into::into)
    }

    /// Seats `staff_id` on `session_id` and records the history row as one
    /// transaction: a crashed write must never leave a session pointing at a
    /// staff member with no matching history entry.
    pub fn commit_assignment(
        &self,
        project_id: ProjectId,
        session_id: SessionId,
        staff_id: StaffId,
        history: &VisitorAssignmentHistory,
        queue_id: Option<WaitingQueueId>,
    ) -> EngineResult<()> {
        self.transaction(|tx| {
            tx.execute(
                "UPDATE visitor_sessions SET staff_id = ?1, updated_at = ?2 WHERE project_id = ?3 AND id = ?4",
                params![staff_id, to_ts(Utc::now()), project_id, session_id],
            )?;
            tx.execute(
                "INSERT INTO visitor_assignment_history (id, project_id, visitor_id, session_id, assigned_staff_id,
                    previous_staff_id, assigned_by_staff_id, source, visitor_message, notes, model_used, prompt_used,
                    llm_response, reasoning, candidate_staff_ids, candidate_scores, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
                params![
                    history.id, history.project_id, history.visitor_id, history.session_id, history.assigned_staff_id,
                    history.previous_staff_id, history.assigned_by_staff_id, enum_str(&history.source),
                    history.visitor_message, history.notes, history.model_used, history.prompt_used,
                    history.llm_response, history.reasoning, to_json(&history.candidate_staff_ids),
                    history.candidate_scores.as_ref().map(to_json), to_ts(history.created_at),
                ],
            )?;
            tx.execute(
                "UPDATE visitors SET service_status = 'ACTIVE' WHERE project_id = ?1 AND id = ?2",
                params![project_id, history.visitor_id],
            )?;
            if let Some(qid) = queue_id {
                tx.execute(
                    "UPDATE visitor_waiting_queue SET status = 'ASSIGNED' WHERE project_id = ?1 AND id = ?2",
                    params![project_id, qid],
                )?;
            }
            Ok(())
        })
    }

    /// Computes the next queue position and inserts the waiting-queue row in
    /// one transaction, so two concurrent enqueues can never observe the same
    /// `MAX(position)` and collide.
    pub fn commit_enqueue(
        &self,
        project_id: ProjectId,
        visitor_id: VisitorId,
        session_id: SessionId,
        source: &str,
        priority: i32,
        visitor_message: Option<&str>,
        reason: Option<&str>,
        expired_at: chrono::DateTime<Utc>,
        ai_disabled: Option<bool>,
    ) -> EngineResult<VisitorWaitingQueue> {
        self.transaction(|tx| {
            let max: Option<i32> = tx.query_row(
                "SELECT MAX(position) FROM visitor_waiting_queue WHERE project_id = ?1 AND status = 'WAITING'",
                params![project_id],
                |row| row.get(0),
            )?;
            let entry = VisitorWaitingQueue {
                id: WaitingQueueId::new(),
                project_id,
                visitor_id,
                session_id,
                source: source.to_string(),
                position: max.unwrap_or(0) + 1,
                priority,
                status: QueueStatus::Waiting,
                visitor_message: visitor_message.map(str::to_string),
                reason: reason.map(str::to_string),
                expired_at,
                ai_disabled,
                created_at: Utc::now(),
            };
            tx.execute(
                "INSERT INTO visitor_waiting_queue (id, project_id, visitor_id, session_id, source, position, priority,
                    status, visitor_message, reason, expired_at, ai_disabled, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
                params![
                    entry.id, entry.project_id, entry.visitor_id, entry.session_id, entry.source, entry.position,
                    entry.priority, enum_str(&entry.status), entry.visitor_message, entry.reason,
                    to_ts(entry.expired_at), entry.ai_disabled.map(|b| b as i64), to_ts(entry.created_at),
                ],
            )?;
            tx.execute(
                "UPDATE visitors SET service_status = 'QUEUED' WHERE project_id = ?1 AND id = ?2",
                params![project_id, visitor_id],
            )?;
            Ok(entry)
        })
    }

    #[allow(dead_code)]
    pub fn session_exists_open(&self, project_id: ProjectId, session_id: SessionId) -> EngineResult<bool> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT 1 FROM visitor_sessions WHERE project_id = ?1 AND id = ?2 AND status = 'OPEN'",
            params![project_id, session_id],
            |_| Ok(true),
        )
        .optional()
        .map(|v| v.unwrap_or(false))
        .map_err(Into::into)
    }
}
