//! Core data models for the knowledge pipeline.
//!
//! These types describe the knowledge items, chunks, RAG queries, audit
//! entries, and activity records that flow between ingestion, retrieval,
//! and answering. Timestamps are Unix seconds.

use serde::{Deserialize, Serialize};

/// Where a knowledge item's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Document,
    Email,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Document => "document",
            ItemKind::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(ItemKind::Document),
            "email" => Some(ItemKind::Email),
            _ => None,
        }
    }
}

/// Processing state of a knowledge item.
///
/// Items start `pending` and move to exactly one of `processed` or
/// `failed`. Only `pending` items are picked up by the ingestion worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processed => "processed",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ItemStatus::Pending),
            "processed" => Some(ItemStatus::Processed),
            "failed" => Some(ItemStatus::Failed),
            _ => None,
        }
    }
}

/// One ingested source (a document upload or a pasted email) in a project.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeItem {
    pub id: i64,
    pub project_id: i64,
    pub kind: ItemKind,
    pub title: String,
    /// Free-form source metadata: `{filename, mime, size}` for documents,
    /// `{from, sent_at}` for emails.
    pub source_meta: serde_json::Value,
    /// Blob key of the stored original file (documents only).
    pub original_content_path: Option<String>,
    /// Normalized text. Null until extraction succeeds, except for emails
    /// whose body is stored at creation time.
    pub raw_text: Option<String>,
    pub status: ItemStatus,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl KnowledgeItem {
    /// Title used when citing this item; falls back to `"Document"`.
    pub fn display_title(&self) -> &str {
        display_title(Some(self.title.as_str()))
    }
}

/// Title shown for a source, with the `"Document"` fallback for blank titles.
pub fn display_title(title: Option<&str>) -> &str {
    match title {
        Some(t) if !t.trim().is_empty() => t,
        _ => "Document",
    }
}

/// Fields required to create a new [`KnowledgeItem`]. New items are always
/// `pending`.
#[derive(Debug, Clone)]
pub struct NewKnowledgeItem {
    pub project_id: i64,
    pub kind: ItemKind,
    pub title: String,
    pub source_meta: serde_json::Value,
    pub original_content_path: Option<String>,
    pub raw_text: Option<String>,
}

/// A stored chunk of an item's normalized text.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeChunk {
    pub id: i64,
    pub item_id: i64,
    pub chunk_index: i64,
    pub content_text: String,
    pub content_hash: String,
    pub tokens_count: Option<i64>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A chunk about to be written by [`Store::replace_chunks`](crate::store::Store::replace_chunks).
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i64,
    pub content_text: String,
    pub content_hash: String,
    pub tokens_count: Option<i64>,
    pub embedding: Option<Vec<f32>>,
}

/// A chunk returned by nearest-neighbour retrieval, with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: i64,
    pub text: String,
    pub source_item_id: i64,
    pub source_title: Option<String>,
}

/// Entity an audit or activity record is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    KnowledgeItem,
    RagQuery,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::KnowledgeItem => "knowledge_item",
            SubjectKind::RagQuery => "rag_query",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pub kind: SubjectKind,
    pub id: i64,
}

impl Subject {
    pub fn knowledge_item(id: i64) -> Self {
        Self {
            kind: SubjectKind::KnowledgeItem,
            id,
        }
    }

    pub fn rag_query(id: i64) -> Self {
        Self {
            kind: SubjectKind::RagQuery,
            id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Error,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(AuditStatus::Success),
            "error" => Some(AuditStatus::Error),
            _ => None,
        }
    }
}

/// One record per external AI call attempt. Never holds credentials.
#[derive(Debug, Clone, Serialize)]
pub struct AiAuditLogEntry {
    /// UUID v4.
    pub id: String,
    pub user_id: Option<i64>,
    pub subject_type: Option<String>,
    pub subject_id: Option<i64>,
    pub provider: String,
    pub model: String,
    pub request_payload: serde_json::Value,
    pub response_payload: Option<serde_json::Value>,
    pub response_text: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub latency_ms: Option<i64>,
    pub created_at: i64,
}

/// A question asked against a project's knowledge base.
#[derive(Debug, Clone, Serialize)]
pub struct RagQuery {
    pub id: i64,
    pub project_id: i64,
    pub user_id: Option<i64>,
    pub question_text: String,
    pub answer_text: Option<String>,
    /// Chunk ids in retrieval order.
    pub cited_chunk_ids: Option<Vec<i64>>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewRagQuery {
    pub project_id: i64,
    pub user_id: Option<i64>,
    pub question_text: String,
}

/// The single update applied to a [`RagQuery`] once an answer exists.
#[derive(Debug, Clone)]
pub struct RagAnswer {
    pub answer_text: String,
    pub cited_chunk_ids: Vec<i64>,
    pub provider: String,
    pub model: String,
}

/// Actions recorded in the activity trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityAction {
    KnowledgeItemUploaded,
    KnowledgeItemProcessed,
    KnowledgeItemFailed,
    RagAsked,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::KnowledgeItemUploaded => "knowledge_item.uploaded",
            ActivityAction::KnowledgeItemProcessed => "knowledge_item.processed",
            ActivityAction::KnowledgeItemFailed => "knowledge_item.failed",
            ActivityAction::RagAsked => "rag.asked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "knowledge_item.uploaded" => Some(ActivityAction::KnowledgeItemUploaded),
            "knowledge_item.processed" => Some(ActivityAction::KnowledgeItemProcessed),
            "knowledge_item.failed" => Some(ActivityAction::KnowledgeItemFailed),
            "rag.asked" => Some(ActivityAction::RagAsked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewActivity {
    pub user_id: Option<i64>,
    pub action: ActivityAction,
    pub subject: Option<Subject>,
    pub project_id: Option<i64>,
    pub metadata: serde_json::Value,
}

impl NewActivity {
    pub fn new(action: ActivityAction, subject: Subject, project_id: i64) -> Self {
        Self {
            user_id: None,
            action,
            subject: Some(subject),
            project_id: Some(project_id),
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_user(mut self, user_id: Option<i64>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append-only activity record.
#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub id: i64,
    pub user_id: Option<i64>,
    pub action: ActivityAction,
    pub subject_type: Option<String>,
    pub subject_id: Option<i64>,
    pub project_id: Option<i64>,
    pub metadata: serde_json::Value,
    pub created_at: i64,
}
