//! SQLite-backed [`Store`] implementation.
//!
//! Vectors are stored as little-endian f32 BLOBs on the chunk row.
//! Nearest-neighbour search loads the project's embedded chunks and ranks
//! them by cosine distance in Rust, which is adequate for a few thousand
//! chunks per project.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use teamkb_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use teamkb_core::models::{
    ActivityAction, ActivityEntry, AiAuditLogEntry, AuditStatus, ItemKind, ItemStatus,
    KnowledgeChunk, KnowledgeItem, NewActivity, NewChunk, NewKnowledgeItem, NewRagQuery,
    RagAnswer, RagQuery, RetrievedChunk,
};
use teamkb_core::store::Store;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn parse_json(text: Option<String>) -> Option<serde_json::Value> {
    text.and_then(|t| serde_json::from_str(&t).ok())
}

fn item_from_row(row: &SqliteRow) -> Result<KnowledgeItem> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let source_meta: String = row.get("source_meta");
    Ok(KnowledgeItem {
        id: row.get("id"),
        project_id: row.get("project_id"),
        kind: ItemKind::parse(&kind).ok_or_else(|| anyhow!("unknown item kind: {}", kind))?,
        title: row.get("title"),
        source_meta: serde_json::from_str(&source_meta).unwrap_or(serde_json::json!({})),
        original_content_path: row.get("original_content_path"),
        raw_text: row.get("raw_text"),
        status: ItemStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown item status: {}", status))?,
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn rag_query_from_row(row: &SqliteRow) -> Result<RagQuery> {
    let cited: Option<String> = row.get("cited_chunk_ids");
    let cited_chunk_ids = match cited {
        Some(text) => Some(serde_json::from_str::<Vec<i64>>(&text)?),
        None => None,
    };
    Ok(RagQuery {
        id: row.get("id"),
        project_id: row.get("project_id"),
        user_id: row.get("user_id"),
        question_text: row.get("question_text"),
        answer_text: row.get("answer_text"),
        cited_chunk_ids,
        provider: row.get("provider"),
        model: row.get("model"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const ITEM_COLUMNS: &str = "id, project_id, kind, title, source_meta, original_content_path, \
                            raw_text, status, error_message, created_at, updated_at";

#[async_trait]
impl Store for SqliteStore {
    async fn insert_item(&self, item: &NewKnowledgeItem) -> Result<KnowledgeItem> {
        let ts = now();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO knowledge_items (project_id, kind, title, source_meta,
                                         original_content_path, raw_text, status,
                                         created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)
            RETURNING id
            "#,
        )
        .bind(item.project_id)
        .bind(item.kind.as_str())
        .bind(&item.title)
        .bind(serde_json::to_string(&item.source_meta)?)
        .bind(&item.original_content_path)
        .bind(&item.raw_text)
        .bind(ts)
        .bind(ts)
        .fetch_one(&self.pool)
        .await?;

        self.get_item(id)
            .await?
            .ok_or_else(|| anyhow!("knowledge item {} vanished after insert", id))
    }

    async fn get_item(&self, id: i64) -> Result<Option<KnowledgeItem>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM knowledge_items WHERE id = ?",
            ITEM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn list_items(&self, project_id: i64) -> Result<Vec<KnowledgeItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM knowledge_items WHERE project_id = ? ORDER BY id ASC",
            ITEM_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    async fn set_item_text(&self, id: i64, raw_text: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE knowledge_items SET raw_text = ?, error_message = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(raw_text)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("knowledge item {} not found", id);
        }
        Ok(())
    }

    async fn set_item_status(
        &self,
        id: i64,
        status: ItemStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE knowledge_items SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("knowledge item {} not found", id);
        }
        Ok(())
    }

    async fn claim_item(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE knowledge_items SET processing_started_at = ? \
             WHERE id = ? AND status = 'pending' AND processing_started_at IS NULL",
        )
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn replace_chunks(&self, item_id: i64, chunks: &[NewChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM knowledge_chunks WHERE knowledge_item_id = ?")
            .bind(item_id)
            .execute(&mut *tx)
            .await?;

        let ts = now();
        for chunk in chunks {
            let blob = chunk.embedding.as_deref().map(vec_to_blob);
            sqlx::query(
                r#"
                INSERT INTO knowledge_chunks (knowledge_item_id, chunk_index, content_text,
                                              content_hash, tokens_count, embedding,
                                              created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(item_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content_text)
            .bind(&chunk.content_hash)
            .bind(chunk.tokens_count)
            .bind(blob)
            .bind(ts)
            .bind(ts)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_chunks(&self, item_id: i64) -> Result<Vec<KnowledgeChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, knowledge_item_id, chunk_index, content_text, content_hash,
                   tokens_count, embedding, created_at, updated_at
            FROM knowledge_chunks
            WHERE knowledge_item_id = ?
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Option<Vec<u8>> = row.get("embedding");
                KnowledgeChunk {
                    id: row.get("id"),
                    item_id: row.get("knowledge_item_id"),
                    chunk_index: row.get("chunk_index"),
                    content_text: row.get("content_text"),
                    content_hash: row.get("content_hash"),
                    tokens_count: row.get("tokens_count"),
                    embedding: blob.map(|b| blob_to_vec(&b)),
                    created_at: row.get("created_at"),
                    updated_at: row.get("updated_at"),
                }
            })
            .collect())
    }

    async fn nearest_chunks(
        &self,
        project_id: i64,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT kc.id, kc.knowledge_item_id, kc.content_text, kc.embedding, ki.title
            FROM knowledge_chunks kc
            INNER JOIN knowledge_items ki ON ki.id = kc.knowledge_item_id
            WHERE ki.project_id = ? AND kc.embedding IS NOT NULL
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(f32, RetrievedChunk)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let distance = cosine_distance(query, &blob_to_vec(&blob));
                (
                    distance,
                    RetrievedChunk {
                        chunk_id: row.get("id"),
                        text: row.get("content_text"),
                        source_item_id: row.get("knowledge_item_id"),
                        source_title: row.get("title"),
                    },
                )
            })
            .collect();

        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.chunk_id.cmp(&b.1.chunk_id))
        });
        scored.truncate(limit);

        Ok(scored.into_iter().map(|(_, c)| c).collect())
    }

    async fn insert_rag_query(&self, query: &NewRagQuery) -> Result<RagQuery> {
        let ts = now();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO rag_queries (project_id, user_id, question_text, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(query.project_id)
        .bind(query.user_id)
        .bind(&query.question_text)
        .bind(ts)
        .bind(ts)
        .fetch_one(&self.pool)
        .await?;

        self.get_rag_query(id)
            .await?
            .ok_or_else(|| anyhow!("rag query {} vanished after insert", id))
    }

    async fn record_rag_answer(&self, id: i64, answer: &RagAnswer) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE rag_queries
            SET answer_text = ?, cited_chunk_ids = ?, provider = ?, model = ?, updated_at = ?
            WHERE id = ? AND answer_text IS NULL
            "#,
        )
        .bind(&answer.answer_text)
        .bind(serde_json::to_string(&answer.cited_chunk_ids)?)
        .bind(&answer.provider)
        .bind(&answer.model)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("rag query {} not found or already answered", id);
        }
        Ok(())
    }

    async fn get_rag_query(&self, id: i64) -> Result<Option<RagQuery>> {
        let row = sqlx::query(
            r#"
            SELECT id, project_id, user_id, question_text, answer_text, cited_chunk_ids,
                   provider, model, created_at, updated_at
            FROM rag_queries WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(rag_query_from_row).transpose()
    }

    async fn insert_audit_entry(&self, entry: &AiAuditLogEntry) -> Result<()> {
        let response_payload = entry
            .response_payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO ai_audit_logs (id, user_id, subject_type, subject_id, provider, model,
                                       request_payload, response_payload, response_text,
                                       input_tokens, output_tokens, total_tokens, status,
                                       error_message, latency_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(entry.user_id)
        .bind(&entry.subject_type)
        .bind(entry.subject_id)
        .bind(&entry.provider)
        .bind(&entry.model)
        .bind(serde_json::to_string(&entry.request_payload)?)
        .bind(response_payload)
        .bind(&entry.response_text)
        .bind(entry.input_tokens)
        .bind(entry.output_tokens)
        .bind(entry.total_tokens)
        .bind(entry.status.as_str())
        .bind(&entry.error_message)
        .bind(entry.latency_ms)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_audit_entries(&self) -> Result<Vec<AiAuditLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, subject_type, subject_id, provider, model, request_payload,
                   response_payload, response_text, input_tokens, output_tokens, total_tokens,
                   status, error_message, latency_ms, created_at
            FROM ai_audit_logs
            ORDER BY rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                let request: String = row.get("request_payload");
                Ok(AiAuditLogEntry {
                    id: row.get("id"),
                    user_id: row.get("user_id"),
                    subject_type: row.get("subject_type"),
                    subject_id: row.get("subject_id"),
                    provider: row.get("provider"),
                    model: row.get("model"),
                    request_payload: serde_json::from_str(&request)?,
                    response_payload: parse_json(row.get("response_payload")),
                    response_text: row.get("response_text"),
                    input_tokens: row.get("input_tokens"),
                    output_tokens: row.get("output_tokens"),
                    total_tokens: row.get("total_tokens"),
                    status: AuditStatus::parse(&status)
                        .ok_or_else(|| anyhow!("unknown audit status: {}", status))?,
                    error_message: row.get("error_message"),
                    latency_ms: row.get("latency_ms"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn insert_activity(&self, activity: &NewActivity) -> Result<ActivityEntry> {
        let ts = now();
        let subject_type = activity.subject.map(|s| s.kind.as_str().to_string());
        let subject_id = activity.subject.map(|s| s.id);

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO activity_logs (user_id, action, subject_type, subject_id, project_id,
                                       metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(activity.user_id)
        .bind(activity.action.as_str())
        .bind(&subject_type)
        .bind(subject_id)
        .bind(activity.project_id)
        .bind(serde_json::to_string(&activity.metadata)?)
        .bind(ts)
        .fetch_one(&self.pool)
        .await?;

        Ok(ActivityEntry {
            id,
            user_id: activity.user_id,
            action: activity.action,
            subject_type,
            subject_id,
            project_id: activity.project_id,
            metadata: activity.metadata.clone(),
            created_at: ts,
        })
    }

    async fn list_activity(&self) -> Result<Vec<ActivityEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, action, subject_type, subject_id, project_id, metadata, created_at
            FROM activity_logs
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let action: String = row.get("action");
                Ok(ActivityEntry {
                    id: row.get("id"),
                    user_id: row.get("user_id"),
                    action: ActivityAction::parse(&action)
                        .ok_or_else(|| anyhow!("unknown activity action: {}", action))?,
                    subject_type: row.get("subject_type"),
                    subject_id: row.get("subject_id"),
                    project_id: row.get("project_id"),
                    metadata: parse_json(row.get("metadata")).unwrap_or(serde_json::json!({})),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }
}
