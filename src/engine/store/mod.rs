// ── Relational Store ────────────────────────────────────────────────────────
// One SQLite database for the whole service: ingestion entities (collections,
// files, qa pairs, website crawl state, embedding configs) and routing
// entities (platforms, inboxes, visitors, sessions, staff, assignment rules,
// waiting queue, assignment history, channel members).
//
// Grounded on `engine/sessions.rs`'s `SessionStore` (a `Mutex<Connection>`
// wrapper, WAL mode, idempotent `CREATE TABLE IF NOT EXISTS` blocks run once
// at `open()`) and `engine/engram/schema.rs`'s FTS5 + sync-trigger pattern for
// `file_documents_fts`.

mod assignment;
mod channels;
mod collections;
mod embeddings;
mod files;
mod platforms;
mod qa;
mod staff;
mod visitors;
mod websites;

use crate::atoms::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

pub(crate) fn to_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::InternalError(format!("bad timestamp {s:?}: {e}")))
}

pub(crate) fn to_json<T: Serialize>(v: &T) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "null".into())
}

pub(crate) fn from_json<T: DeserializeOwned + Default>(s: &str) -> T {
    serde_json::from_str(s).unwrap_or_default()
}

/// Renders a `#[serde(rename_all = "...")]` enum as the bare string SQLite
/// stores (no surrounding JSON quotes).
pub(crate) fn enum_str<T: Serialize>(v: &T) -> String {
    match serde_json::to_value(v) {
        Ok(serde_json::Value::String(s)) => s,
        _ => to_json(v),
    }
}

pub(crate) fn enum_from_str<T: DeserializeOwned>(s: &str) -> EngineResult<T> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| EngineError::InternalError(format!("bad enum value {s:?}: {e}")))
}

pub struct Store {
    pub(crate) conn: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if absent) the database at `path` and applies schema.
    pub fn open(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("[store] opening database at {:?}", path);
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self { conn: Mutex::new(conn) };
        store.apply_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self { conn: Mutex::new(conn) };
        store.apply_schema()?;
        Ok(store)
    }

    fn apply_schema(&self) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(SCHEMA).map_err(EngineError::from)
    }

    /// Runs `f` inside a single SQLite transaction, committing on `Ok` and
    /// rolling back (via drop) on `Err`. Used where a multi-row invariant
    /// must not be observed half-applied — assignment, queue insertion.
    pub(crate) fn transaction<F, T>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&rusqlite::Transaction) -> EngineResult<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(EngineError::Database)?;
        let result = f(&tx)?;
        tx.commit().map_err(EngineError::Database)?;
        Ok(result)
    }
}

/// `not_found` helper shared across store submodules: turns an empty
/// `query_row` result into a named `EngineError` instead of a bare rusqlite
/// `QueryReturnedNoRows`.
pub(crate) fn map_missing(what: &str, err: rusqlite::Error) -> EngineError {
    match err {
        rusqlite::Error::QueryReturnedNoRows => EngineError::not_found(what),
        other => EngineError::Database(other),
    }
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS collections (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        type TEXT NOT NULL,
        display_name TEXT NOT NULL,
        description TEXT,
        metadata TEXT NOT NULL DEFAULT '{}',
        tags TEXT NOT NULL DEFAULT '[]',
        crawl_config TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_collections_project ON collections(project_id);

    CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        collection_id TEXT,
        original_filename TEXT NOT NULL,
        size INTEGER NOT NULL,
        content_type TEXT NOT NULL,
        storage_provider TEXT NOT NULL,
        storage_path TEXT NOT NULL,
        storage_metadata TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL,
        language TEXT,
        description TEXT,
        tags TEXT NOT NULL DEFAULT '[]',
        document_count INTEGER,
        total_tokens INTEGER,
        error_message TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_files_project ON files(project_id);
    CREATE INDEX IF NOT EXISTS idx_files_collection ON files(collection_id);

    CREATE TABLE IF NOT EXISTS file_documents (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        file_id TEXT,
        collection_id TEXT,
        content TEXT NOT NULL,
        content_length INTEGER NOT NULL,
        token_count INTEGER,
        chunk_index INTEGER,
        section_title TEXT,
        page_number INTEGER,
        content_type TEXT NOT NULL,
        language TEXT,
        confidence_score REAL,
        tags TEXT NOT NULL DEFAULT '{}',
        embedding_model TEXT,
        embedding_dimensions INTEGER,
        embedding BLOB,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_file_documents_project ON file_documents(project_id);
    CREATE INDEX IF NOT EXISTS idx_file_documents_file ON file_documents(file_id);
    CREATE INDEX IF NOT EXISTS idx_file_documents_collection ON file_documents(collection_id);

    CREATE VIRTUAL TABLE IF NOT EXISTS file_documents_fts USING fts5(
        id UNINDEXED,
        content,
        section_title,
        content=file_documents,
        content_rowid=rowid,
        tokenize='porter unicode61'
    );

    CREATE TRIGGER IF NOT EXISTS file_documents_fts_insert AFTER INSERT ON file_documents
    BEGIN
        INSERT INTO file_documents_fts(rowid, id, content, section_title)
        VALUES (NEW.rowid, NEW.id, NEW.content, NEW.section_title);
    END;

    CREATE TRIGGER IF NOT EXISTS file_documents_fts_delete AFTER DELETE ON file_documents
    BEGIN
        INSERT INTO file_documents_fts(file_documents_fts, rowid, id, content, section_title)
        VALUES ('delete', OLD.rowid, OLD.id, OLD.content, OLD.section_title);
    END;

    CREATE TRIGGER IF NOT EXISTS file_documents_fts_update AFTER UPDATE ON file_documents
    BEGIN
        INSERT INTO file_documents_fts(file_documents_fts, rowid, id, content, section_title)
        VALUES ('delete', OLD.rowid, OLD.id, OLD.content, OLD.section_title);
        INSERT INTO file_documents_fts(rowid, id, content, section_title)
        VALUES (NEW.rowid, NEW.id, NEW.content, NEW.section_title);
    END;

    CREATE TABLE IF NOT EXISTS qa_pairs (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        collection_id TEXT NOT NULL,
        question TEXT NOT NULL,
        answer TEXT NOT NULL,
        question_hash TEXT NOT NULL,
        category TEXT,
        subcategory TEXT,
        tags TEXT NOT NULL DEFAULT '[]',
        qa_metadata TEXT,
        source_type TEXT NOT NULL,
        status TEXT NOT NULL,
        document_id TEXT,
        priority INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_qa_pairs_collection ON qa_pairs(collection_id);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_qa_pairs_dedup ON qa_pairs(collection_id, question_hash) WHERE deleted_at IS NULL;

    CREATE TABLE IF NOT EXISTS website_crawl_jobs (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        collection_id TEXT NOT NULL,
        start_url TEXT NOT NULL,
        max_pages INTEGER NOT NULL,
        max_depth INTEGER NOT NULL,
        include_patterns TEXT NOT NULL DEFAULT '[]',
        exclude_patterns TEXT NOT NULL DEFAULT '[]',
        status TEXT NOT NULL,
        pages_discovered INTEGER NOT NULL DEFAULT 0,
        pages_crawled INTEGER NOT NULL DEFAULT 0,
        pages_processed INTEGER NOT NULL DEFAULT 0,
        pages_failed INTEGER NOT NULL DEFAULT 0,
        crawl_options TEXT,
        error_message TEXT,
        task_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_crawl_jobs_collection ON website_crawl_jobs(collection_id);

    CREATE TABLE IF NOT EXISTS website_pages (
        id TEXT PRIMARY KEY,
        crawl_job_id TEXT NOT NULL,
        collection_id TEXT NOT NULL,
        project_id TEXT NOT NULL,
        file_id TEXT,
        url TEXT NOT NULL,
        url_hash TEXT NOT NULL,
        title TEXT,
        depth INTEGER NOT NULL,
        content_markdown TEXT,
        content_length INTEGER NOT NULL DEFAULT 0,
        content_hash TEXT,
        meta_description TEXT,
        page_metadata TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL,
        http_status_code INTEGER,
        error_message TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_website_pages_dedup ON website_pages(crawl_job_id, url_hash);
    CREATE INDEX IF NOT EXISTS idx_website_pages_job ON website_pages(crawl_job_id);

    CREATE TABLE IF NOT EXISTS embedding_configs (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        provider TEXT NOT NULL,
        model TEXT NOT NULL,
        dimensions INTEGER NOT NULL,
        batch_size INTEGER NOT NULL,
        api_key TEXT NOT NULL,
        base_url TEXT,
        is_active INTEGER NOT NULL DEFAULT 0
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_embedding_configs_active
        ON embedding_configs(project_id) WHERE is_active = 1;

    CREATE TABLE IF NOT EXISTS platforms (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        type TEXT NOT NULL,
        api_key TEXT NOT NULL,
        config TEXT NOT NULL DEFAULT '{}',
        is_active INTEGER NOT NULL DEFAULT 1,
        ai_mode TEXT NOT NULL DEFAULT 'auto',
        agent_ids TEXT NOT NULL DEFAULT '[]',
        logo_path TEXT,
        fallback_to_ai_timeout INTEGER,
        deleted_at TEXT
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_platforms_api_key ON platforms(api_key);

    CREATE TABLE IF NOT EXISTS wecom_inbox (
        id TEXT PRIMARY KEY, platform_id TEXT NOT NULL, message_id TEXT NOT NULL,
        from_user TEXT NOT NULL, chat_id TEXT, msg_type TEXT NOT NULL,
        content TEXT NOT NULL, raw_payload TEXT NOT NULL, status TEXT NOT NULL,
        received_at TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_wecom_inbox_dedup ON wecom_inbox(platform_id, message_id);

    CREATE TABLE IF NOT EXISTS wecom_bot_inbox (
        id TEXT PRIMARY KEY, platform_id TEXT NOT NULL, message_id TEXT NOT NULL,
        from_user TEXT NOT NULL, chat_id TEXT, msg_type TEXT NOT NULL,
        content TEXT NOT NULL, raw_payload TEXT NOT NULL, status TEXT NOT NULL,
        received_at TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_wecom_bot_inbox_dedup ON wecom_bot_inbox(platform_id, message_id);

    CREATE TABLE IF NOT EXISTS feishu_inbox (
        id TEXT PRIMARY KEY, platform_id TEXT NOT NULL, message_id TEXT NOT NULL,
        from_user TEXT NOT NULL, chat_id TEXT, msg_type TEXT NOT NULL,
        content TEXT NOT NULL, raw_payload TEXT NOT NULL, status TEXT NOT NULL,
        received_at TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_feishu_inbox_dedup ON feishu_inbox(platform_id, message_id);

    CREATE TABLE IF NOT EXISTS dingtalk_inbox (
        id TEXT PRIMARY KEY, platform_id TEXT NOT NULL, message_id TEXT NOT NULL,
        from_user TEXT NOT NULL, chat_id TEXT, msg_type TEXT NOT NULL,
        content TEXT NOT NULL, raw_payload TEXT NOT NULL, status TEXT NOT NULL,
        received_at TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_dingtalk_inbox_dedup ON dingtalk_inbox(platform_id, message_id);

    CREATE TABLE IF NOT EXISTS telegram_inbox (
        id TEXT PRIMARY KEY, platform_id TEXT NOT NULL, message_id TEXT NOT NULL,
        from_user TEXT NOT NULL, chat_id TEXT, msg_type TEXT NOT NULL,
        content TEXT NOT NULL, raw_payload TEXT NOT NULL, status TEXT NOT NULL,
        received_at TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_telegram_inbox_dedup ON telegram_inbox(platform_id, message_id);

    CREATE TABLE IF NOT EXISTS wukongim_inbox (
        id TEXT PRIMARY KEY, platform_id TEXT NOT NULL, message_id TEXT NOT NULL,
        from_user TEXT NOT NULL, chat_id TEXT, msg_type TEXT NOT NULL,
        content TEXT NOT NULL, raw_payload TEXT NOT NULL, status TEXT NOT NULL,
        received_at TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_wukongim_inbox_dedup ON wukongim_inbox(platform_id, message_id);

    CREATE TABLE IF NOT EXISTS visitors (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        platform_id TEXT NOT NULL,
        platform_open_id TEXT NOT NULL,
        is_online INTEGER NOT NULL DEFAULT 0,
        ai_disabled INTEGER NOT NULL DEFAULT 0,
        service_status TEXT NOT NULL DEFAULT 'NEW',
        name TEXT,
        nickname TEXT,
        last_visit_time TEXT,
        last_offline_time TEXT,
        created_at TEXT NOT NULL,
        deleted_at TEXT
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_visitors_identity ON visitors(platform_id, platform_open_id);

    CREATE TABLE IF NOT EXISTS visitor_sessions (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        visitor_id TEXT NOT NULL,
        platform_id TEXT,
        staff_id TEXT,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_visitor_sessions_visitor ON visitor_sessions(visitor_id);
    CREATE INDEX IF NOT EXISTS idx_visitor_sessions_staff_open ON visitor_sessions(staff_id, status);

    CREATE TABLE IF NOT EXISTS staff (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'offline',
        is_active INTEGER NOT NULL DEFAULT 1,
        service_paused INTEGER NOT NULL DEFAULT 0,
        role TEXT NOT NULL DEFAULT 'user',
        name TEXT NOT NULL,
        nickname TEXT,
        description TEXT,
        deleted_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_staff_project ON staff(project_id);

    CREATE TABLE IF NOT EXISTS visitor_assignment_rules (
        project_id TEXT PRIMARY KEY,
        max_concurrent_chats INTEGER,
        service_weekdays TEXT,
        service_start_time TEXT,
        service_end_time TEXT,
        timezone TEXT NOT NULL DEFAULT 'Asia/Shanghai',
        llm_assignment_enabled INTEGER NOT NULL DEFAULT 0,
        ai_provider_id TEXT,
        model TEXT,
        effective_prompt TEXT NOT NULL DEFAULT '',
        queue_wait_timeout_minutes INTEGER
    );

    CREATE TABLE IF NOT EXISTS visitor_waiting_queue (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        visitor_id TEXT NOT NULL,
        session_id TEXT NOT NULL,
        source TEXT NOT NULL,
        position INTEGER NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        visitor_message TEXT,
        reason TEXT,
        expired_at TEXT NOT NULL,
        ai_disabled INTEGER,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_waiting_queue_project_status ON visitor_waiting_queue(project_id, status, position);

    CREATE TABLE IF NOT EXISTS visitor_assignment_history (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        visitor_id TEXT NOT NULL,
        session_id TEXT NOT NULL,
        assigned_staff_id TEXT,
        previous_staff_id TEXT,
        assigned_by_staff_id TEXT,
        source TEXT NOT NULL,
        visitor_message TEXT,
        notes TEXT,
        model_used TEXT,
        prompt_used TEXT,
        llm_response TEXT,
        reasoning TEXT,
        candidate_staff_ids TEXT NOT NULL DEFAULT '[]',
        candidate_scores TEXT,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_assignment_history_visitor ON visitor_assignment_history(visitor_id);

    CREATE TABLE IF NOT EXISTS channel_members (
        project_id TEXT NOT NULL,
        channel_id TEXT NOT NULL,
        channel_type INTEGER NOT NULL,
        member_id TEXT NOT NULL,
        member_type TEXT NOT NULL,
        deleted_at TEXT,
        PRIMARY KEY (channel_id, member_id)
    );
    CREATE INDEX IF NOT EXISTS idx_channel_members_channel ON channel_members(channel_id);
";
