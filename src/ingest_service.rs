//! Creation of knowledge items from uploads and pasted emails.
//!
//! Validates input, stores the original bytes, inserts a `pending` item,
//! records a `knowledge_item.uploaded` activity, and hands the item to the
//! job queue.

use std::path::Path;
use std::sync::Arc;

use teamkb_core::models::{
    ActivityAction, ItemKind, KnowledgeItem, NewActivity, NewKnowledgeItem, Subject,
};
use teamkb_core::store::{BlobStore, Store};

use crate::error::{KbError, KbResult};
use crate::extract::extension_for_mime;
use crate::queue::JobQueue;

pub const MAX_TITLE_CHARS: usize = 500;
pub const MAX_EMAIL_BODY_CHARS: usize = 100_000;
pub const MAX_FROM_CHARS: usize = 255;

/// An uploaded file as received from the caller.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct EmailInput {
    pub title: Option<String>,
    pub from: Option<String>,
    pub sent_at: Option<String>,
    pub body_text: String,
}

pub struct KnowledgeIngestService {
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn JobQueue>,
    max_document_bytes: u64,
}

impl KnowledgeIngestService {
    pub fn new(
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn JobQueue>,
        max_document_bytes: u64,
    ) -> Self {
        Self {
            store,
            blobs,
            queue,
            max_document_bytes,
        }
    }

    pub async fn create_from_document(
        &self,
        project_id: i64,
        user_id: Option<i64>,
        upload: DocumentUpload,
    ) -> KbResult<KnowledgeItem> {
        let ext = extension_for_mime(&upload.mime).ok_or_else(|| {
            KbError::InvalidInput("Unsupported file type. Allowed: PDF, DOCX, TXT.".to_string())
        })?;
        let size = upload.bytes.len() as u64;
        if size > self.max_document_bytes {
            return Err(KbError::InvalidInput(format!(
                "File is too large. Maximum size is {} bytes.",
                self.max_document_bytes
            )));
        }

        let key = format!("knowledge/{}/{}.{}", project_id, uuid::Uuid::new_v4(), ext);
        let stored = self.blobs.store(&key, &upload.bytes).await?;

        let title = Path::new(&upload.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("Document {}", &id[..8])
            });

        let item = self
            .store
            .insert_item(&NewKnowledgeItem {
                project_id,
                kind: ItemKind::Document,
                title,
                source_meta: serde_json::json!({
                    "filename": upload.filename,
                    "mime": upload.mime,
                    "size": size,
                }),
                original_content_path: Some(stored),
                raw_text: None,
            })
            .await?;

        self.accepted(&item, user_id).await?;
        Ok(item)
    }

    pub async fn create_from_email(
        &self,
        project_id: i64,
        user_id: Option<i64>,
        email: EmailInput,
    ) -> KbResult<KnowledgeItem> {
        let body = email.body_text.trim();
        if body.is_empty() {
            return Err(KbError::InvalidInput("Email body is required.".to_string()));
        }
        if body.chars().count() > MAX_EMAIL_BODY_CHARS {
            return Err(KbError::InvalidInput(format!(
                "Email body must be at most {} characters.",
                MAX_EMAIL_BODY_CHARS
            )));
        }
        let title = email
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("Email");
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(KbError::InvalidInput(format!(
                "Title must be at most {} characters.",
                MAX_TITLE_CHARS
            )));
        }
        let from = email.from.as_deref().map(str::trim).filter(|f| !f.is_empty());
        if from.is_some_and(|f| f.chars().count() > MAX_FROM_CHARS) {
            return Err(KbError::InvalidInput(format!(
                "Sender must be at most {} characters.",
                MAX_FROM_CHARS
            )));
        }
        let sent_at = email
            .sent_at
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let item = self
            .store
            .insert_item(&NewKnowledgeItem {
                project_id,
                kind: ItemKind::Email,
                title: title.to_string(),
                source_meta: serde_json::json!({ "from": from, "sent_at": sent_at }),
                original_content_path: None,
                raw_text: Some(body.to_string()),
            })
            .await?;

        self.accepted(&item, user_id).await?;
        Ok(item)
    }

    async fn accepted(&self, item: &KnowledgeItem, user_id: Option<i64>) -> KbResult<()> {
        let activity = NewActivity::new(
            ActivityAction::KnowledgeItemUploaded,
            Subject::knowledge_item(item.id),
            item.project_id,
        )
        .with_user(user_id)
        .with_metadata(serde_json::json!({
            "type": item.kind.as_str(),
            "title": item.title,
        }));
        self.store.insert_activity(&activity).await?;

        tracing::info!(
            item_id = item.id,
            project_id = item.project_id,
            kind = item.kind.as_str(),
            "knowledge item accepted"
        );
        self.queue.enqueue(item.id).await
    }
}
