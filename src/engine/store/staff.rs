use super::{map_missing, Store};
use crate::atoms::error::EngineResult;
use crate::atoms::ids::{ProjectId, StaffId};
use crate::atoms::types::Staff;
use rusqlite::{params, Row};

fn row_to_staff(row: &Row) -> rusqlite::Result<Staff> {
    let deleted_raw: Option<String> = row.get("deleted_at")?;
    Ok(Staff {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        status: row.get("status")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        service_paused: row.get::<_, i64>("service_paused")? != 0,
        role: row.get("role")?,
        name: row.get("name")?,
        nickname: row.get("nickname")?,
        description: row.get("description")?,
        deleted_at: deleted_raw.and_then(|s| super::parse_ts(&s).ok()),
    })
}

impl Store {
    pub fn create_staff(&self, staff: &Staff) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO staff (id, project_id, status, is_active, service_paused, role, name, nickname, description, deleted_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                staff.id, staff.project_id, staff.status, staff.is_active as i64, staff.service_paused as i64,
                staff.role, staff.name, staff.nickname, staff.description, staff.deleted_at.map(super::to_ts),
            ],
        )?;
        Ok(())
    }

    pub fn get_staff(&self, project_id: ProjectId, id: StaffId) -> EngineResult<Staff> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM staff WHERE project_id = ?1 AND id = ?2 AND deleted_at IS NULL",
            params![project_id, id],
            row_to_staff,
        )
        .map_err(|e| map_missing("staff", e))
    }

    /// Candidates eligible for auto-assignment: active, not paused, "user" role,
    /// ordered by ascending open-session count then `id` for deterministic ties.
    pub fn list_assignable_staff_by_load(&self, project_id: ProjectId) -> EngineResult<Vec<(Staff, i64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT s.*, (
                SELECT COUNT(*) FROM visitor_sessions vs WHERE vs.staff_id = s.id AND vs.status = 'OPEN'
             ) AS chat_count
             FROM staff s
             WHERE s.project_id = ?1 AND s.deleted_at IS NULL AND s.is_active = 1
                AND s.service_paused = 0 AND s.role = 'user'
             ORDER BY chat_count ASC, s.id ASC",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            let staff = row_to_staff(row)?;
            let chat_count: i64 = row.get("chat_count")?;
            Ok((staff, chat_count))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(project_id: ProjectId, name: &str) -> Staff {
        Staff {
            id: StaffId::new(),
            project_id,
            status: "online".into(),
            is_active: true,
            service_paused: false,
            role: "user".into(),
            name: name.into(),
            nickname: None,
            description: None,
            deleted_at: None,
        }
    }

    #[test]
    fn ordered_by_load_ascending() {
        let store = Store::open_in_memory().unwrap();
        let project_id = ProjectId::new();
        let busy = sample(project_id, "busy");
        let idle = sample(project_id, "idle");
        store.create_staff(&busy).unwrap();
        store.create_staff(&idle).unwrap();

        let visitor = store.get_or_create_visitor(project_id, crate::atoms::ids::PlatformId::new(), "v1").unwrap();
        let session = store.get_or_create_open_session(project_id, visitor.id, None).unwrap();
        store.set_session_staff(project_id, session.id, Some(busy.id)).unwrap();

        let ranked = store.list_assignable_staff_by_load(project_id).unwrap();
        assert_eq!(ranked[0].0.id.0, idle.id.0);
        assert_eq!(ranked[0].1, 0);
        assert_eq!(ranked[1].0.id.0, busy.id.0);
        assert_eq!(ranked[1].1, 1);
    }

    #[test]
    fn paused_and_non_user_role_excluded() {
        let store = Store::open_in_memory().unwrap();
        let project_id = ProjectId::new();
        let mut paused = sample(project_id, "paused");
        paused.service_paused = true;
        let mut admin = sample(project_id, "admin");
        admin.role = "admin".into();
        store.create_staff(&paused).unwrap();
        store.create_staff(&admin).unwrap();

        assert!(store.list_assignable_staff_by_load(project_id).unwrap().is_empty());
    }
}
