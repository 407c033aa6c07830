use super::{enum_from_str, enum_str, from_json, map_missing, to_json, Store};
use crate::atoms::error::EngineResult;
use crate::atoms::ids::PlatformId;
use crate::atoms::types::{AiMode, InboxMessage, InboxStatus, Platform, PlatformType};
use chrono::Utc;
use rusqlite::{params, Row};

fn row_to_platform(row: &Row) -> rusqlite::Result<Platform> {
    let type_raw: String = row.get("type")?;
    let config_raw: String = row.get("config")?;
    let ai_mode_raw: String = row.get("ai_mode")?;
    let agent_ids_raw: String = row.get("agent_ids")?;
    let deleted_raw: Option<String> = row.get("deleted_at")?;

    Ok(Platform {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        platform_type: enum_from_str::<PlatformType>(&type_raw).unwrap_or(PlatformType::Wecom),
        api_key: row.get("api_key")?,
        config: from_json(&config_raw),
        is_active: row.get::<_, i64>("is_active")? != 0,
        ai_mode: enum_from_str::<AiMode>(&ai_mode_raw).unwrap_or(AiMode::Auto),
        agent_ids: from_json(&agent_ids_raw),
        logo_path: row.get("logo_path")?,
        fallback_to_ai_timeout: row.get("fallback_to_ai_timeout")?,
        deleted_at: deleted_raw.and_then(|s| super::parse_ts(&s).ok()),
    })
}

fn row_to_inbox(row: &Row) -> rusqlite::Result<InboxMessage> {
    let status_raw: String = row.get("status")?;
    let raw_payload_str: String = row.get("raw_payload")?;
    let received_raw: String = row.get("received_at")?;

    Ok(InboxMessage {
        id: row.get("id")?,
        platform_id: row.get("platform_id")?,
        message_id: row.get("message_id")?,
        from_user: row.get("from_user")?,
        chat_id: row.get("chat_id")?,
        msg_type: row.get("msg_type")?,
        content: row.get("content")?,
        raw_payload: serde_json::from_str(&raw_payload_str).unwrap_or(serde_json::Value::Null),
        status: enum_from_str::<InboxStatus>(&status_raw).unwrap_or(InboxStatus::Pending),
        received_at: super::parse_ts(&received_raw).unwrap_or_else(|_| Utc::now()),
    })
}

impl Store {
    pub fn create_platform(&self, platform: &Platform) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO platforms (id, project_id, type, api_key, config, is_active, ai_mode, agent_ids, logo_path, fallback_to_ai_timeout, deleted_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                platform.id, platform.project_id, enum_str(&platform.platform_type), platform.api_key,
                to_json(&platform.config), platform.is_active as i64, enum_str(&platform.ai_mode),
                to_json(&platform.agent_ids), platform.logo_path, platform.fallback_to_ai_timeout,
                platform.deleted_at.map(super::to_ts),
            ],
        )?;
        Ok(())
    }

    pub fn get_platform_by_api_key(&self, api_key: &str) -> EngineResult<Platform> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM platforms WHERE api_key = ?1 AND is_active = 1 AND deleted_at IS NULL",
            params![api_key],
            row_to_platform,
        )
        .map_err(|e| map_missing("platform", e))
    }

    /// Used by substrate-level webhooks (WuKongIM) that have no per-call
    /// `api_key` path segment to identify the platform from.
    pub fn list_platforms_by_type(&self, platform_type: PlatformType) -> EngineResult<Vec<Platform>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM platforms WHERE type = ?1 AND is_active = 1 AND deleted_at IS NULL")?;
        let rows = stmt.query_map(params![enum_str(&platform_type)], row_to_platform)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn get_platform(&self, id: PlatformId) -> EngineResult<Platform> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM platforms WHERE id = ?1 AND deleted_at IS NULL",
            params![id],
            row_to_platform,
        )
        .map_err(|e| map_missing("platform", e))
    }

    /// Inserts an inbound message into the platform's own inbox table,
    /// returning `false` when `(platform_id, message_id)` was already seen.
    pub fn insert_inbox_message(&self, platform_type: PlatformType, msg: &InboxMessage) -> EngineResult<bool> {
        let table = platform_type.inbox_table();
        let conn = self.conn.lock();
        let sql = format!(
            "INSERT OR IGNORE INTO {table} (id, platform_id, message_id, from_user, chat_id, msg_type, content, raw_payload, status, received_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)"
        );
        let affected = conn.execute(
            &sql,
            params![
                msg.id, msg.platform_id, msg.message_id, msg.from_user, msg.chat_id, msg.msg_type,
                msg.content, to_json(&msg.raw_payload), enum_str(&msg.status), super::to_ts(msg.received_at),
            ],
        )?;
        Ok(affected == 1)
    }

    pub fn mark_inbox_message(&self, platform_type: PlatformType, id: &str, status: InboxStatus) -> EngineResult<()> {
        let table = platform_type.inbox_table();
        let conn = self.conn.lock();
        let sql = format!("UPDATE {table} SET status = ?1 WHERE id = ?2");
        conn.execute(&sql, params![enum_str(&status), id])?;
        Ok(())
    }

    pub fn list_pending_inbox_messages(&self, platform_type: PlatformType, limit: i64) -> EngineResult<Vec<InboxMessage>> {
        let table = platform_type.inbox_table();
        let conn = self.conn.lock();
        let sql = format!("SELECT * FROM {table} WHERE status = 'pending' ORDER BY received_at ASC LIMIT ?1");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit], row_to_inbox)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_platform(project_id: crate::atoms::ids::ProjectId) -> Platform {
        Platform {
            id: PlatformId::new(),
            project_id,
            platform_type: PlatformType::Telegram,
            api_key: "key-123".into(),
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
    fn lookup_by_api_key_and_inbox_dedup() {
        let store = Store::open_in_memory().unwrap();
        let platform = sample_platform(crate::atoms::ids::ProjectId::new());
        store.create_platform(&platform).unwrap();

        let fetched = store.get_platform_by_api_key("key-123").unwrap();
        assert_eq!(fetched.id.0, platform.id.0);

        let msg = InboxMessage {
            id: uuid::Uuid::new_v4().to_string(),
            platform_id: platform.id,
            message_id: "msg-1".into(),
            from_user: "user-1".into(),
            chat_id: None,
            msg_type: "text".into(),
            content: "hello".into(),
            raw_payload: serde_json::json!({"text": "hello"}),
            status: InboxStatus::Pending,
            received_at: Utc::now(),
        };
        assert!(store.insert_inbox_message(PlatformType::Telegram, &msg).unwrap());

        let mut duplicate = msg.clone();
        duplicate.id = uuid::Uuid::new_v4().to_string();
        assert!(!store.insert_inbox_message(PlatformType::Telegram, &duplicate).unwrap());
    }
}
