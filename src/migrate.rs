//! Idempotent schema setup for the SQLite store.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            title TEXT NOT NULL,
            source_meta TEXT NOT NULL DEFAULT '{}',
            original_content_path TEXT,
            raw_text TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            processing_started_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before processing claims existed lack the column.
    let (has_claim_column,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM pragma_table_info('knowledge_items') WHERE name = 'processing_started_at'",
    )
    .fetch_one(pool)
    .await?;
    if has_claim_column == 0 {
        sqlx::query("ALTER TABLE knowledge_items ADD COLUMN processing_started_at INTEGER")
            .execute(pool)
            .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            knowledge_item_id INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            content_text TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            tokens_count INTEGER,
            embedding BLOB,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(knowledge_item_id, chunk_index),
            FOREIGN KEY (knowledge_item_id) REFERENCES knowledge_items(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ai_audit_logs (
            id TEXT PRIMARY KEY,
            user_id INTEGER,
            subject_type TEXT,
            subject_id INTEGER,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            request_payload TEXT NOT NULL,
            response_payload TEXT,
            response_text TEXT,
            input_tokens INTEGER,
            output_tokens INTEGER,
            total_tokens INTEGER,
            status TEXT NOT NULL,
            error_message TEXT,
            latency_ms INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rag_queries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL,
            user_id INTEGER,
            question_text TEXT NOT NULL,
            answer_text TEXT,
            cited_chunk_ids TEXT,
            provider TEXT,
            model TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS activity_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER,
            action TEXT NOT NULL,
            subject_type TEXT,
            subject_id INTEGER,
            project_id INTEGER,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_knowledge_items_project ON knowledge_items(project_id, status)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_knowledge_chunks_item ON knowledge_chunks(knowledge_item_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_ai_audit_logs_subject ON ai_audit_logs(subject_type, subject_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rag_queries_project ON rag_queries(project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_activity_logs_project ON activity_logs(project_id)")
        .execute(pool)
        .await?;

    Ok(())
}
