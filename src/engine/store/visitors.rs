use super::{enum_from_str, enum_str, map_missing, parse_ts, to_ts, Store};
use crate::atoms::error::EngineResult;
use crate::atoms::ids::{PlatformId, ProjectId, SessionId, StaffId, VisitorId};
use crate::atoms::types::{ServiceStatus, SessionStatus, Visitor, VisitorSession};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

fn row_to_visitor(row: &Row) -> rusqlite::Result<Visitor> {
    let status_raw: String = row.get("service_status")?;
    let last_visit_raw: Option<String> = row.get("last_visit_time")?;
    let last_offline_raw: Option<String> = row.get("last_offline_time")?;
    let created_raw: String = row.get("created_at")?;
    let deleted_raw: Option<String> = row.get("deleted_at")?;

    Ok(Visitor {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        platform_id: row.get("platform_id")?,
        platform_open_id: row.get("platform_open_id")?,
        is_online: row.get::<_, i64>("is_online")? != 0,
        ai_disabled: row.get::<_, i64>("ai_disabled")? != 0,
        service_status: enum_from_str::<ServiceStatus>(&status_raw).unwrap_or(ServiceStatus::New),
        name: row.get("name")?,
        nickname: row.get("nickname")?,
        last_visit_time: last_visit_raw.and_then(|s| parse_ts(&s).ok()),
        last_offline_time: last_offline_raw.and_then(|s| parse_ts(&s).ok()),
        created_at: parse_ts(&created_raw).unwrap_or_else(|_| Utc::now()),
        deleted_at: deleted_raw.and_then(|s| parse_ts(&s).ok()),
    })
}

fn row_to_session(row: &Row) -> rusqlite::Result<VisitorSession> {
    let status_raw: String = row.get("status")?;
    let created_raw: String = row.get("created_at")?;
    let updated_raw: String = row.get("updated_at")?;

    Ok(VisitorSession {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        visitor_id: row.get("visitor_id")?,
        platform_id: row.get("platform_id")?,
        staff_id: row.get("staff_id")?,
        status: enum_from_str::<SessionStatus>(&status_raw).unwrap_or(SessionStatus::Open),
        created_at: parse_ts(&created_raw).unwrap_or_else(|_| Utc::now()),
        updated_at: parse_ts(&updated_raw).unwrap_or_else(|_| Utc::now()),
    })
}

impl Store {
    /// Gets the visitor identified by `(platform_id, platform_open_id)`, creating one if absent.
    pub fn get_or_create_visitor(&self, project_id: ProjectId, platform_id: PlatformId, platform_open_id: &str) -> EngineResult<Visitor> {
        let conn = self.conn.lock();
        let existing = conn
            .query_row(
                "SELECT * FROM visitors WHERE platform_id = ?1 AND platform_open_id = ?2",
                params![platform_id, platform_open_id],
                row_to_visitor,
            )
            .optional()?;
        if let Some(visitor) = existing {
            return Ok(visitor);
        }

        let visitor = Visitor {
            id: VisitorId::new(),
            project_id,
            platform_id,
            platform_open_id: platform_open_id.to_string(),
            is_online: true,
            ai_disabled: false,
            service_status: ServiceStatus::New,
            name: None,
            nickname: None,
            last_visit_time: Some(Utc::now()),
            last_offline_time: None,
            created_at: Utc::now(),
            deleted_at: None,
        };
        conn.execute(
            "INSERT INTO visitors (id, project_id, platform_id, platform_open_id, is_online, ai_disabled,
                service_status, name, nickname, last_visit_time, last_offline_time, created_at, deleted_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            params![
                visitor.id, visitor.project_id, visitor.platform_id, visitor.platform_open_id,
                visitor.is_online as i64, visitor.ai_disabled as i64, enum_str(&visitor.service_status),
                visitor.name, visitor.nickname, visitor.last_visit_time.map(to_ts),
                visitor.last_offline_time.map(to_ts), to_ts(visitor.created_at), visitor.deleted_at.map(to_ts),
            ],
        )?;
        Ok(visitor)
    }

    pub fn get_visitor(&self, project_id: ProjectId, id: VisitorId) -> EngineResult<Visitor> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM visitors WHERE project_id = ?1 AND id = ?2",
            params![project_id, id],
            row_to_visitor,
        )
        .map_err(|e| map_missing("visitor", e))
    }

    pub fn set_visitor_service_status(&self, project_id: ProjectId, id: VisitorId, status: ServiceStatus, ai_disabled: Option<bool>) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE visitors SET service_status = ?1, ai_disabled = COALESCE(?2, ai_disabled) WHERE project_id = ?3 AND id = ?4",
            params![enum_str(&status), ai_disabled.map(|b| b as i64), project_id, id],
        )?;
        Ok(())
    }

    /// Gets the visitor's open session, creating one if absent.
    pub fn get_or_create_open_session(&self, project_id: ProjectId, visitor_id: VisitorId, platform_id: Option<PlatformId>) -> EngineResult<VisitorSession> {
        let conn = self.conn.lock();
        let existing = conn
            .query_row(
                "SELECT * FROM visitor_sessions WHERE visitor_id = ?1 AND status = 'OPEN' ORDER BY created_at DESC LIMIT 1",
                params![visitor_id],
                row_to_session,
            )
            .optional()?;
        if let Some(session) = existing {
            return Ok(session);
        }

        let session = VisitorSession {
            id: SessionId::new(),
            project_id,
            visitor_id,
            platform_id,
            staff_id: None,
            status: SessionStatus::Open,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO visitor_sessions (id, project_id, visitor_id, platform_id, staff_id, status, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                session.id, session.project_id, session.visitor_id, session.platform_id, session.staff_id,
                enum_str(&session.status), to_ts(session.created_at), to_ts(session.updated_at),
            ],
        )?;
        Ok(session)
    }

    pub fn set_session_staff(&self, project_id: ProjectId, id: SessionId, staff_id: Option<StaffId>) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE visitor_sessions SET staff_id = ?1, updated_at = ?2 WHERE project_id = ?3 AND id = ?4",
            params![staff_id, to_ts(Utc::now()), project_id, id],
        )?;
        Ok(())
    }

    /// Number of currently-open sessions assigned to `staff_id`.
    pub fn open_session_count_for_staff(&self, project_id: ProjectId, staff_id: StaffId) -> EngineResult<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM visitor_sessions WHERE project_id = ?1 AND staff_id = ?2 AND status = 'OPEN'",
            params![project_id, staff_id],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_visitor_is_idempotent_per_identity() {
        let store = Store::open_in_memory().unwrap();
        let project_id = ProjectId::new();
        let platform_id = PlatformId::new();

        let first = store.get_or_create_visitor(project_id, platform_id, "open-1").unwrap();
        let second = store.get_or_create_visitor(project_id, platform_id, "open-1").unwrap();
        assert_eq!(first.id.0, second.id.0);

        let third = store.get_or_create_visitor(project_id, platform_id, "open-2").unwrap();
        assert_ne!(first.id.0, third.id.0);
    }

    #[test]
    fn get_or_create_open_session_reuses_existing_open_session() {
        let store = Store::open_in_memory().unwrap();
        let project_id = ProjectId::new();
        let visitor = store.get_or_create_visitor(project_id, PlatformId::new(), "open-1").unwrap();

        let s1 = store.get_or_create_open_session(project_id, visitor.id, None).unwrap();
        let s2 = store.get_or_create_open_session(project_id, visitor.id, None).unwrap();
        assert_eq!(s1.id.0, s2.id.0);
    }
}
