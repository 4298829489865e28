//! Storage abstractions for TeamKB.
//!
//! The [`Store`] trait covers every structured-storage operation the
//! ingestion and answering pipeline needs; [`BlobStore`] covers raw file
//! bytes. Both are implemented in memory here and by SQLite and the
//! filesystem in the `teamkb` app crate.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ActivityEntry, AiAuditLogEntry, ItemStatus, KnowledgeChunk, KnowledgeItem, NewActivity,
    NewChunk, NewKnowledgeItem, NewRagQuery, RagAnswer, RagQuery, RetrievedChunk,
};

/// Abstract structured-storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_item`](Store::insert_item) | Create a `pending` knowledge item |
/// | [`set_item_text`](Store::set_item_text) | Persist normalized text, clear the error |
/// | [`set_item_status`](Store::set_item_status) | Move an item to a new status |
/// | [`claim_item`](Store::claim_item) | Atomically claim a pending item for processing |
/// | [`replace_chunks`](Store::replace_chunks) | Atomically replace every chunk of an item |
/// | [`nearest_chunks`](Store::nearest_chunks) | Project-scoped cosine nearest neighbours |
/// | [`record_rag_answer`](Store::record_rag_answer) | Store the one answer of a RAG query |
/// | [`insert_audit_entry`](Store::insert_audit_entry) | Append an AI audit record |
/// | [`insert_activity`](Store::insert_activity) | Append an activity record |
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_item(&self, item: &NewKnowledgeItem) -> Result<KnowledgeItem>;

    async fn get_item(&self, id: i64) -> Result<Option<KnowledgeItem>>;

    /// All items of a project, oldest first.
    async fn list_items(&self, project_id: i64) -> Result<Vec<KnowledgeItem>>;

    /// Store normalized text and clear any previous error. Status is left
    /// untouched.
    async fn set_item_text(&self, id: i64, raw_text: &str) -> Result<()>;

    async fn set_item_status(
        &self,
        id: i64,
        status: ItemStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Claim a `pending` item for processing as one atomic step. Returns
    /// `false` when the item is missing, not pending, or already claimed.
    /// A claim is never handed out twice.
    async fn claim_item(&self, id: i64) -> Result<bool>;

    /// Delete every chunk of `item_id` and insert `chunks` in one atomic
    /// step. Readers never observe a partial set.
    async fn replace_chunks(&self, item_id: i64, chunks: &[NewChunk]) -> Result<()>;

    /// Chunks of an item ordered by `chunk_index`.
    async fn list_chunks(&self, item_id: i64) -> Result<Vec<KnowledgeChunk>>;

    /// Whether [`nearest_chunks`](Store::nearest_chunks) is available.
    fn supports_vector_search(&self) -> bool {
        true
    }

    /// Up to `limit` chunks of `project_id`, ordered by ascending cosine
    /// distance to `query`. Chunks without an embedding are skipped.
    async fn nearest_chunks(
        &self,
        project_id: i64,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>>;

    async fn insert_rag_query(&self, query: &NewRagQuery) -> Result<RagQuery>;

    /// Record the answer of a RAG query. Fails if the query does not exist
    /// or has already been answered.
    async fn record_rag_answer(&self, id: i64, answer: &RagAnswer) -> Result<()>;

    async fn get_rag_query(&self, id: i64) -> Result<Option<RagQuery>>;

    async fn insert_audit_entry(&self, entry: &AiAuditLogEntry) -> Result<()>;

    /// Audit entries in insertion order.
    async fn list_audit_entries(&self) -> Result<Vec<AiAuditLogEntry>>;

    async fn insert_activity(&self, activity: &NewActivity) -> Result<ActivityEntry>;

    /// Activity entries in insertion order.
    async fn list_activity(&self) -> Result<Vec<ActivityEntry>>;
}

/// Key/value storage for original upload bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, returning the key to persist.
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<String>;

    /// Read the bytes stored under `key`.
    async fn read(&self, key: &str) -> Result<Vec<u8>>;
}
