//! Wiring of stores, orchestrators, and services into one handle.

use std::sync::Arc;

use anyhow::Result;

use teamkb_core::store::{BlobStore, Store};

use crate::answer::AnswerComposer;
use crate::blob::FsBlobStore;
use crate::config::Config;
use crate::db;
use crate::extract::TextExtractor;
use crate::ingest::KnowledgeIngestPipeline;
use crate::ingest_service::KnowledgeIngestService;
use crate::migrate::run_migrations;
use crate::orchestrator::{ChatOrchestrator, EmbeddingOrchestrator};
use crate::queue::JobQueue;
use crate::sqlite_store::SqliteStore;

/// Everything a caller needs to ingest and ask, sharing one store.
pub struct App {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub blobs: Arc<dyn BlobStore>,
    pub embeddings: Arc<EmbeddingOrchestrator>,
    pub pipeline: Arc<KnowledgeIngestPipeline>,
    pub answers: AnswerComposer,
}

impl App {
    /// Open the SQLite database and blob root named by `config`, running
    /// migrations first.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config.db.path).await?;
        run_migrations(&pool).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.storage.root.clone()));
        Ok(Self::from_parts(config, store, blobs))
    }

    pub fn from_parts(config: Config, store: Arc<dyn Store>, blobs: Arc<dyn BlobStore>) -> Self {
        let embeddings = Arc::new(EmbeddingOrchestrator::new(config.ai.clone(), store.clone()));
        Self::with_embeddings(config, store, blobs, embeddings)
    }

    /// Like [`from_parts`](Self::from_parts) with a caller-built embedding
    /// orchestrator (e.g. one carrying an injected client).
    pub fn with_embeddings(
        config: Config,
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        embeddings: Arc<EmbeddingOrchestrator>,
    ) -> Self {
        let pipeline = Arc::new(KnowledgeIngestPipeline::new(
            store.clone(),
            TextExtractor::new(blobs.clone()),
            embeddings.clone(),
        ));
        let chat = ChatOrchestrator::new(config.ai.clone(), store.clone());
        let answers = AnswerComposer::new(store.clone(), embeddings.clone(), chat);
        Self {
            config,
            store,
            blobs,
            embeddings,
            pipeline,
            answers,
        }
    }

    /// Ingest service that dispatches jobs to `queue`.
    pub fn ingest_service(&self, queue: Arc<dyn JobQueue>) -> KnowledgeIngestService {
        KnowledgeIngestService::new(
            self.store.clone(),
            self.blobs.clone(),
            queue,
            self.config.ingest.max_document_bytes,
        )
    }
}
