//! In-memory [`Store`] and [`BlobStore`] implementations for tests and
//! embedded use.
//!
//! All tables live behind a single `std::sync::RwLock`, so chunk
//! replacement is atomic with respect to readers. Vector search is
//! brute-force cosine distance over the project's chunks.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::models::{
    ActivityEntry, AiAuditLogEntry, ItemStatus, KnowledgeChunk, KnowledgeItem, NewActivity,
    NewChunk, NewKnowledgeItem, NewRagQuery, RagAnswer, RagQuery, RetrievedChunk,
};

use super::{BlobStore, Store};

#[derive(Default)]
struct Tables {
    items: Vec<KnowledgeItem>,
    chunks: Vec<KnowledgeChunk>,
    rag_queries: Vec<RagQuery>,
    audit: Vec<AiAuditLogEntry>,
    activity: Vec<ActivityEntry>,
    claimed: HashSet<i64>,
    next_item_id: i64,
    next_chunk_id: i64,
    next_query_id: i64,
    next_activity_id: i64,
}

/// In-memory store.
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    vector_search: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            vector_search: true,
        }
    }

    /// A store that reports no vector-search capability, so retrieval
    /// returns nothing.
    pub fn without_vector_search() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            vector_search: false,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn item_mut(tables: &mut Tables, id: i64) -> Result<&mut KnowledgeItem> {
    tables
        .items
        .iter_mut()
        .find(|i| i.id == id)
        .ok_or_else(|| anyhow!("knowledge item {} not found", id))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_item(&self, item: &NewKnowledgeItem) -> Result<KnowledgeItem> {
        let mut t = self.write()?;
        t.next_item_id += 1;
        let ts = now();
        let stored = KnowledgeItem {
            id: t.next_item_id,
            project_id: item.project_id,
            kind: item.kind,
            title: item.title.clone(),
            source_meta: item.source_meta.clone(),
            original_content_path: item.original_content_path.clone(),
            raw_text: item.raw_text.clone(),
            status: ItemStatus::Pending,
            error_message: None,
            created_at: ts,
            updated_at: ts,
        };
        t.items.push(stored.clone());
        Ok(stored)
    }

    async fn get_item(&self, id: i64) -> Result<Option<KnowledgeItem>> {
        Ok(self.read()?.items.iter().find(|i| i.id == id).cloned())
    }

    async fn list_items(&self, project_id: i64) -> Result<Vec<KnowledgeItem>> {
        Ok(self
            .read()?
            .items
            .iter()
            .filter(|i| i.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn set_item_text(&self, id: i64, raw_text: &str) -> Result<()> {
        let mut t = self.write()?;
        let item = item_mut(&mut t, id)?;
        item.raw_text = Some(raw_text.to_string());
        item.error_message = None;
        item.updated_at = now();
        Ok(())
    }

    async fn set_item_status(
        &self,
        id: i64,
        status: ItemStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut t = self.write()?;
        let item = item_mut(&mut t, id)?;
        item.status = status;
        item.error_message = error_message.map(str::to_string);
        item.updated_at = now();
        Ok(())
    }

    async fn claim_item(&self, id: i64) -> Result<bool> {
        let mut t = self.write()?;
        let pending = t
            .items
            .iter()
            .any(|i| i.id == id && i.status == ItemStatus::Pending);
        Ok(pending && t.claimed.insert(id))
    }

    async fn replace_chunks(&self, item_id: i64, chunks: &[NewChunk]) -> Result<()> {
        let mut t = self.write()?;
        if !t.items.iter().any(|i| i.id == item_id) {
            bail!("knowledge item {} not found", item_id);
        }
        let mut seen = HashSet::new();
        for c in chunks {
            if !seen.insert(c.chunk_index) {
                bail!(
                    "duplicate chunk_index {} for knowledge item {}",
                    c.chunk_index,
                    item_id
                );
            }
        }

        t.chunks.retain(|c| c.item_id != item_id);
        let ts = now();
        for c in chunks {
            t.next_chunk_id += 1;
            let id = t.next_chunk_id;
            t.chunks.push(KnowledgeChunk {
                id,
                item_id,
                chunk_index: c.chunk_index,
                content_text: c.content_text.clone(),
                content_hash: c.content_hash.clone(),
                tokens_count: c.tokens_count,
                embedding: c.embedding.clone(),
                created_at: ts,
                updated_at: ts,
            });
        }
        Ok(())
    }

    async fn list_chunks(&self, item_id: i64) -> Result<Vec<KnowledgeChunk>> {
        let mut chunks: Vec<KnowledgeChunk> = self
            .read()?
            .chunks
            .iter()
            .filter(|c| c.item_id == item_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    fn supports_vector_search(&self) -> bool {
        self.vector_search
    }

    async fn nearest_chunks(
        &self,
        project_id: i64,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let t = self.read()?;
        let titles: HashMap<i64, &str> = t
            .items
            .iter()
            .filter(|i| i.project_id == project_id)
            .map(|i| (i.id, i.title.as_str()))
            .collect();

        let mut scored: Vec<(f32, &KnowledgeChunk)> = t
            .chunks
            .iter()
            .filter(|c| titles.contains_key(&c.item_id))
            .filter_map(|c| {
                c.embedding
                    .as_ref()
                    .map(|v| (cosine_distance(query, v), c))
            })
            .collect();

        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.id.cmp(&b.1.id))
        });
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(_, c)| RetrievedChunk {
                chunk_id: c.id,
                text: c.content_text.clone(),
                source_item_id: c.item_id,
                source_title: titles.get(&c.item_id).map(|title| title.to_string()),
            })
            .collect())
    }

    async fn insert_rag_query(&self, query: &NewRagQuery) -> Result<RagQuery> {
        let mut t = self.write()?;
        t.next_query_id += 1;
        let ts = now();
        let stored = RagQuery {
            id: t.next_query_id,
            project_id: query.project_id,
            user_id: query.user_id,
            question_text: query.question_text.clone(),
            answer_text: None,
            cited_chunk_ids: None,
            provider: None,
            model: None,
            created_at: ts,
            updated_at: ts,
        };
        t.rag_queries.push(stored.clone());
        Ok(stored)
    }

    async fn record_rag_answer(&self, id: i64, answer: &RagAnswer) -> Result<()> {
        let mut t = self.write()?;
        let query = t
            .rag_queries
            .iter_mut()
            .find(|q| q.id == id)
            .ok_or_else(|| anyhow!("rag query {} not found", id))?;
        if query.answer_text.is_some() {
            bail!("rag query {} already answered", id);
        }
        query.answer_text = Some(answer.answer_text.clone());
        query.cited_chunk_ids = Some(answer.cited_chunk_ids.clone());
        query.provider = Some(answer.provider.clone());
        query.model = Some(answer.model.clone());
        query.updated_at = now();
        Ok(())
    }

    async fn get_rag_query(&self, id: i64) -> Result<Option<RagQuery>> {
        Ok(self.read()?.rag_queries.iter().find(|q| q.id == id).cloned())
    }

    async fn insert_audit_entry(&self, entry: &AiAuditLogEntry) -> Result<()> {
        self.write()?.audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit_entries(&self) -> Result<Vec<AiAuditLogEntry>> {
        Ok(self.read()?.audit.clone())
    }

    async fn insert_activity(&self, activity: &NewActivity) -> Result<ActivityEntry> {
        let mut t = self.write()?;
        t.next_activity_id += 1;
        let entry = ActivityEntry {
            id: t.next_activity_id,
            user_id: activity.user_id,
            action: activity.action,
            subject_type: activity.subject.map(|s| s.kind.as_str().to_string()),
            subject_id: activity.subject.map(|s| s.id),
            project_id: activity.project_id,
            metadata: activity.metadata.clone(),
            created_at: now(),
        };
        t.activity.push(entry.clone());
        Ok(entry)
    }

    async fn list_activity(&self) -> Result<Vec<ActivityEntry>> {
        Ok(self.read()?.activity.clone())
    }
}

/// In-memory blob store keyed by string.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<String> {
        self.blobs
            .write()
            .map_err(|_| anyhow!("blob store lock poisoned"))?
            .insert(key.to_string(), bytes.to_vec());
        Ok(key.to_string())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .map_err(|_| anyhow!("blob store lock poisoned"))?
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("blob not found: {}", key))
    }
}
