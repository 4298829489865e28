//! Background ingestion jobs.
//!
//! [`WorkerQueue`] feeds item ids through a tokio mpsc channel to a fixed
//! number of worker tasks, each running the ingest pipeline. Job failures
//! are already recorded on the item by the pipeline; here they are only
//! logged.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::{KbError, KbResult};
use crate::ingest::{KnowledgeIngestPipeline, ProcessOutcome};

/// Dispatches processing of a newly created knowledge item.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, item_id: i64) -> KbResult<()>;
}

pub struct WorkerQueue {
    sender: mpsc::UnboundedSender<i64>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerQueue {
    /// Spawn `workers` tasks on the current tokio runtime.
    pub fn start(pipeline: Arc<KnowledgeIngestPipeline>, workers: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<i64>();
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let receiver = receiver.clone();
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(item_id) = next else { break };
                        run_job(&pipeline, worker, item_id).await;
                    }
                    tracing::debug!(worker, "ingest worker stopped");
                })
            })
            .collect();

        Self {
            sender,
            workers: handles,
        }
    }

    /// Close the queue and wait until every queued job has run.
    pub async fn shutdown(self) {
        drop(self.sender);
        for handle in self.workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "ingest worker panicked");
            }
        }
    }
}

async fn run_job(pipeline: &KnowledgeIngestPipeline, worker: usize, item_id: i64) {
    match pipeline.process(item_id).await {
        Ok(ProcessOutcome::Processed { chunks }) => {
            tracing::debug!(worker, item_id, chunks, "job finished");
        }
        Ok(ProcessOutcome::NoContent) => {
            tracing::debug!(worker, item_id, "job finished without content");
        }
        Ok(ProcessOutcome::Skipped) => {
            tracing::debug!(worker, item_id, "job skipped");
        }
        Err(e) => {
            tracing::warn!(worker, item_id, error = %e, "job failed");
        }
    }
}

#[async_trait]
impl JobQueue for WorkerQueue {
    async fn enqueue(&self, item_id: i64) -> KbResult<()> {
        self.sender
            .send(item_id)
            .map_err(|_| KbError::Storage(anyhow::anyhow!("ingest queue is closed")))
    }
}

/// Runs each job inline on the caller's task. Used by the CLI's one-shot
/// commands and by tests that need processing to finish before asserting.
pub struct InlineQueue {
    pipeline: Arc<KnowledgeIngestPipeline>,
}

impl InlineQueue {
    pub fn new(pipeline: Arc<KnowledgeIngestPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl JobQueue for InlineQueue {
    async fn enqueue(&self, item_id: i64) -> KbResult<()> {
        run_job(&self.pipeline, 0, item_id).await;
        Ok(())
    }
}

/// Accepts jobs without running them; items stay `pending` until
/// processed explicitly.
pub struct DeferredQueue;

#[async_trait]
impl JobQueue for DeferredQueue {
    async fn enqueue(&self, item_id: i64) -> KbResult<()> {
        tracing::debug!(item_id, "job deferred");
        Ok(())
    }
}
