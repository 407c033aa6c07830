// ── Atoms: Domain Data Types ────────────────────────────────────────────────
// Pure struct/enum definitions for the ingestion and routing data model.
// No I/O, no side effects — see §3 for the entity shapes these mirror.

use crate::atoms::ids::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Ingestion side ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
    File,
    Website,
    Qa,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub project_id: ProjectId,
    #[serde(rename = "type")]
    pub collection_type: CollectionType,
    pub display_name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub crawl_config: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Chunking,
    Embedding,
    Completed,
    Failed,
}

impl FileStatus {
    /// File.status transitions only forward or to `failed`.
    pub fn can_transition_to(self, next: FileStatus) -> bool {
        use FileStatus::*;
        if next == Failed {
            return self != Completed && self != Failed;
        }
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Chunking)
                | (Chunking, Embedding)
                | (Embedding, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FileStatus::Completed | FileStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub project_id: ProjectId,
    pub collection_id: Option<CollectionId>,
    pub original_filename: String,
    pub size: i64,
    pub content_type: String,
    pub storage_provider: String,
    pub storage_path: String,
    #[serde(default)]
    pub storage_metadata: HashMap<String, serde_json::Value>,
    pub status: FileStatus,
    pub language: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub document_count: Option<i64>,
    pub total_tokens: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDocument {
    pub id: ChunkId,
    pub project_id: ProjectId,
    pub file_id: Option<FileId>,
    pub collection_id: Option<CollectionId>,
    pub content: String,
    pub content_length: i64,
    pub token_count: Option<i64>,
    pub chunk_index: Option<i64>,
    pub section_title: Option<String>,
    pub page_number: Option<i64>,
    /// e.g. "paragraph", "heading", "qa_pair"
    pub content_type: String,
    pub language: Option<String>,
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub tags: HashMap<String, serde_json::Value>,
    pub embedding_model: Option<String>,
    pub embedding_dimensions: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QaStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaPair {
    pub id: QaPairId,
    pub project_id: ProjectId,
    pub collection_id: CollectionId,
    pub question: String,
    pub answer: String,
    pub question_hash: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub qa_metadata: Option<serde_json::Value>,
    /// "manual" | "import" | "generated"
    pub source_type: String,
    pub status: QaStatus,
    pub document_id: Option<ChunkId>,
    pub priority: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlJobStatus {
    Pending,
    Crawling,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsiteCrawlJob {
    pub id: WebsiteId,
    pub project_id: ProjectId,
    pub collection_id: CollectionId,
    pub start_url: String,
    pub max_pages: i32,
    pub max_depth: i32,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    pub status: CrawlJobStatus,
    pub pages_discovered: i32,
    pub pages_crawled: i32,
    pub pages_processed: i32,
    pub pages_failed: i32,
    pub crawl_options: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebsitePageStatus {
    Pending,
    Fetched,
    Extracted,
    Processed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsitePage {
    pub id: WebsitePageId,
    pub crawl_job_id: WebsiteId,
    pub collection_id: CollectionId,
    pub project_id: ProjectId,
    pub file_id: Option<FileId>,
    pub url: String,
    pub url_hash: String,
    pub title: Option<String>,
    pub depth: i32,
    pub content_markdown: Option<String>,
    pub content_length: i64,
    pub content_hash: Option<String>,
    pub meta_description: Option<String>,
    #[serde(default)]
    pub page_metadata: HashMap<String, serde_json::Value>,
    pub status: WebsitePageStatus,
    pub http_status_code: Option<i32>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    OpenAi,
    OpenAiCompatible,
    Qwen3,
}

impl EmbeddingProvider {
    /// Per-call batch cap honored regardless of requested batch_size.
    pub fn max_batch_size(self) -> usize {
        match self {
            EmbeddingProvider::Qwen3 => 10,
            EmbeddingProvider::OpenAi | EmbeddingProvider::OpenAiCompatible => 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub id: EmbeddingConfigId,
    pub project_id: ProjectId,
    pub provider: EmbeddingProvider,
    pub model: String,
    pub dimensions: i32,
    pub batch_size: i32,
    pub api_key: String,
    pub base_url: Option<String>,
    pub is_active: bool,
}

/// Fixed dimensional contract enforced by `batch-sync` (§6).
pub const ENFORCED_EMBEDDING_DIMENSIONS: i32 = 1536;

// ── Routing side ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiMode {
    Auto,
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub id: PlatformId,
    pub project_id: ProjectId,
    #[serde(rename = "type")]
    pub platform_type: PlatformType,
    pub api_key: String,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
    pub is_active: bool,
    pub ai_mode: AiMode,
    #[serde(default)]
    pub agent_ids: Vec<String>,
    pub logo_path: Option<String>,
    pub fallback_to_ai_timeout: Option<i64>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformType {
    Wecom,
    WecomBot,
    Feishu,
    Dingtalk,
    Telegram,
    Wukongim,
}

impl PlatformType {
    pub fn inbox_table(self) -> &'static str {
        match self {
            PlatformType::Wecom => "wecom_inbox",
            PlatformType::WecomBot => "wecom_bot_inbox",
            PlatformType::Feishu => "feishu_inbox",
            PlatformType::Dingtalk => "dingtalk_inbox",
            PlatformType::Telegram => "telegram_inbox",
            PlatformType::Wukongim => "wukongim_inbox",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboxStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

/// Common shape shared by every per-platform inbox table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: String,
    pub platform_id: PlatformId,
    pub message_id: String,
    pub from_user: String,
    pub chat_id: Option<String>,
    pub msg_type: String,
    pub content: String,
    pub raw_payload: serde_json::Value,
    pub status: InboxStatus,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    New,
    Queued,
    Active,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visitor {
    pub id: VisitorId,
    pub project_id: ProjectId,
    pub platform_id: PlatformId,
    pub platform_open_id: String,
    pub is_online: bool,
    pub ai_disabled: bool,
    pub service_status: ServiceStatus,
    pub name: Option<String>,
    pub nickname: Option<String>,
    pub last_visit_time: Option<DateTime<Utc>>,
    pub last_offline_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Visitor {
    pub fn is_unassigned(&self) -> bool {
        matches!(self.service_status, ServiceStatus::New | ServiceStatus::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitorSession {
    pub id: SessionId,
    pub project_id: ProjectId,
    pub visitor_id: VisitorId,
    pub platform_id: Option<PlatformId>,
    pub staff_id: Option<StaffId>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Staff {
    pub id: StaffId,
    pub project_id: ProjectId,
    pub status: String,
    pub is_active: bool,
    pub service_paused: bool,
    /// Only "user"-role staff are eligible for auto-assignment.
    pub role: String,
    pub name: String,
    pub nickname: Option<String>,
    pub description: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitorAssignmentRule {
    pub project_id: ProjectId,
    pub max_concurrent_chats: Option<i32>,
    /// ISO weekdays 1=Monday .. 7=Sunday. Empty/None = every day.
    #[serde(default)]
    pub service_weekdays: Option<Vec<u8>>,
    /// "HH:MM", local to `timezone`.
    pub service_start_time: Option<String>,
    pub service_end_time: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub llm_assignment_enabled: bool,
    pub ai_provider_id: Option<String>,
    pub model: Option<String>,
    pub effective_prompt: String,
    pub queue_wait_timeout_minutes: Option<i64>,
}

fn default_timezone() -> String {
    "Asia/Shanghai".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueStatus {
    Waiting,
    Assigned,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitorWaitingQueue {
    pub id: WaitingQueueId,
    pub project_id: ProjectId,
    pub visitor_id: VisitorId,
    pub session_id: SessionId,
    pub source: String,
    pub position: i32,
    pub priority: i32,
    pub status: QueueStatus,
    pub visitor_message: Option<String>,
    pub reason: Option<String>,
    pub expired_at: DateTime<Utc>,
    pub ai_disabled: Option<bool>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssignmentSource {
    Manual,
    Llm,
    Rule,
    Transfer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitorAssignmentHistory {
    pub id: AssignmentHistoryId,
    pub project_id: ProjectId,
    pub visitor_id: VisitorId,
    pub session_id: SessionId,
    pub assigned_staff_id: Option<StaffId>,
    pub previous_staff_id: Option<StaffId>,
    pub assigned_by_staff_id: Option<StaffId>,
    pub source: AssignmentSource,
    pub visitor_message: Option<String>,
    pub notes: Option<String>,
    pub model_used: Option<String>,
    pub prompt_used: Option<String>,
    pub llm_response: Option<String>,
    pub reasoning: Option<String>,
    #[serde(default)]
    pub candidate_staff_ids: Vec<StaffId>,
    pub candidate_scores: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelMemberType {
    Staff,
    Visitor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMember {
    pub project_id: ProjectId,
    pub channel_id: String,
    pub channel_type: i32,
    pub member_id: String,
    pub member_type: ChannelMemberType,
    pub deleted_at: Option<DateTime<Utc>>,
}

// ── Retrieval result shapes (§4.6) ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Semantic,
    Lexical,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub document_id: ChunkId,
    pub file_id: Option<FileId>,
    pub collection_id: Option<CollectionId>,
    pub relevance_score: f64,
    pub content_preview: String,
    pub document_title: Option<String>,
    pub content_type: String,
    pub chunk_index: Option<i64>,
    pub page_number: Option<i64>,
    pub section_title: Option<String>,
    pub tags: Option<HashMap<String, serde_json::Value>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub query: String,
    pub total_results: usize,
    pub returned_results: usize,
    pub search_time_ms: u64,
    pub filters_applied: Option<serde_json::Value>,
    pub search_type: SearchKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_status_forward_only() {
        assert!(FileStatus::Pending.can_transition_to(FileStatus::Processing));
        assert!(!FileStatus::Processing.can_transition_to(FileStatus::Pending));
        assert!(FileStatus::Chunking.can_transition_to(FileStatus::Failed));
        assert!(!FileStatus::Completed.can_transition_to(FileStatus::Failed));
    }

    #[test]
    fn visitor_unassigned_only_new_or_closed() {
        let mut v = Visitor {
            id: VisitorId::new(),
            project_id: ProjectId::new(),
            platform_id: PlatformId::new(),
            platform_open_id: "open1".into(),
            is_online: true,
            ai_disabled: false,
            service_status: ServiceStatus::New,
            name: None,
            nickname: None,
            last_visit_time: None,
            last_offline_time: None,
            created_at: Utc::now(),
            deleted_at: None,
        };
        assert!(v.is_unassigned());
        v.service_status = ServiceStatus::Queued;
        assert!(!v.is_unassigned());
        v.service_status = ServiceStatus::Closed;
        assert!(v.is_unassigned());
    }
}
