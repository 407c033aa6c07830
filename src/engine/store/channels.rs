use super::{enum_from_str, enum_str, map_missing, Store};
use crate::atoms::error::EngineResult;
use crate::atoms::ids::ProjectId;
use crate::atoms::types::{ChannelMember, ChannelMemberType};
use chrono::Utc;
use rusqlite::{params, Row};

fn row_to_member(row: &Row) -> rusqlite::Result<ChannelMember> {
    let member_type_raw: String = row.get("member_type")?;
    let deleted_raw: Option<String> = row.get("deleted_at")?;
    Ok(ChannelMember {
        project_id: row.get("project_id")?,
        channel_id: row.get("channel_id")?,
        channel_type: row.get("channel_type")?,
        member_id: row.get("member_id")?,
        member_type: enum_from_str::<ChannelMemberType>(&member_type_raw).unwrap_or(ChannelMemberType::Visitor),
        deleted_at: deleted_raw.and_then(|s| super::parse_ts(&s).ok()),
    })
}

impl Store {
    /// Seats a member into a channel idempotently: re-seating an already
    /// deleted-then-rejoining member clears `deleted_at` rather than erroring.
    pub fn seat_channel_member(&self, member: &ChannelMember) -> EngineResult<bool> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "INSERT INTO channel_members (project_id, channel_id, channel_type, member_id, member_type, deleted_at)
             VALUES (?1,?2,?3,?4,?5,NULL)
             ON CONFLICT(channel_id, member_id) DO UPDATE SET deleted_at = NULL
                WHERE channel_members.deleted_at IS NOT NULL",
            params![member.project_id, member.channel_id, member.channel_type, member.member_id, enum_str(&member.member_type)],
        )?;
        Ok(affected == 1)
    }

    pub fn remove_channel_member(&self, project_id: ProjectId, channel_id: &str, member_id: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE channel_members SET deleted_at = ?1 WHERE project_id = ?2 AND channel_id = ?3 AND member_id = ?4 AND deleted_at IS NULL",
            params![super::to_ts(Utc::now()), project_id, channel_id, member_id],
        )?;
        if affected == 0 {
            return Err(map_missing("channel_member", rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }

    pub fn list_channel_members(&self, project_id: ProjectId, channel_id: &str) -> EngineResult<Vec<ChannelMember>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM channel_members WHERE project_id = ?1 AND channel_id = ?2 AND deleted_at IS NULL",
        )?;
        let rows = stmt.query_map(params![project_id, channel_id], row_to_member)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seating_twice_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let member = ChannelMember {
            project_id: ProjectId::new(),
            channel_id: "chan-1".into(),
            channel_type: 1,
            member_id: "staff-1".into(),
            member_type: ChannelMemberType::Staff,
            deleted_at: None,
        };
        assert!(store.seat_channel_member(&member).unwrap());
        assert!(!store.seat_channel_member(&member).unwrap());
        assert_eq!(store.list_channel_members(member.project_id, "chan-1").unwrap().len(), 1);
    }

    #[test]
    fn remove_then_reseat_clears_deleted_marker() {
        let store = Store::open_in_memory().unwrap();
        let member = ChannelMember {
            project_id: ProjectId::new(),
            channel_id: "chan-1".into(),
            channel_type: 1,
            member_id: "staff-1".into(),
            member_type: ChannelMemberType::Staff,
            deleted_at: None,
        };
        store.seat_channel_member(&member).unwrap();
        store.remove_channel_member(member.project_id, "chan-1", "staff-1").unwrap();
        assert_eq!(store.list_channel_members(member.project_id, "chan-1").unwrap().len(), 0);

        store.seat_channel_member(&member).unwrap();
        assert_eq!(store.list_channel_members(member.project_id, "chan-1").unwrap().len(), 1);
    }
}
